//! # Field Station Library
//!
//! Unattended weather and seismic station: sensor readings are enriched with
//! position and battery voltage and written into hour/day block files on
//! removable media, falling back to internal storage.
//!
//! This library provides the core pieces:
//! - [`serial::RobustPort`]: serial links that recover on their own
//! - [`storage::BlockStore`]: crash-safe block-partitioned JSON storage
//! - [`storage::StorageRouter`]: removable media failover and migration
//! - [`manager::SensorManager`]: the per-sensor acquisition loop

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod power;
pub mod reading;
pub mod sensors;
pub mod serial;
pub mod storage;
pub mod uplink;
