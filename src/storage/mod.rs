//! # Storage Module
//!
//! Block-partitioned JSON storage with hot switching between removable and
//! internal media.
//!
//! This module handles:
//! - Hour/day block files with one reading per sub-interval
//! - Crash-safe writes (temp file, fsync, rename)
//! - Removable media detection and fallback to internal storage
//! - Backlog migration with duplicate and conflict handling

pub mod atomic;
pub mod block;
pub mod media;
pub mod migrate;
pub mod router;

pub use block::{BlockKind, BlockStore, StationIdentity};
pub use media::{MediaProbe, SysinfoProbe};
pub use migrate::{migrate_backlog, MigrationReport};
pub use router::{RouterEvent, StorageRouter};
