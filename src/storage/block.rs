//! # Block Store
//!
//! Groups readings of one sensor stream into hour or day blocks and keeps
//! each block's JSON file current on every accepted reading.
//!
//! ## File layout
//!
//! ```text
//! <root>/2025/06/01/EC.REVS2.RGA_rpi-5_4512_20250601_1400.json
//! ```
//!
//! ```text
//! { "TIPO": "RGA", "NOMBRE": "REVS2", "IDENTIFICADOR": 1,
//!   "LECTURAS": [ { "FECHA": "2025-06-01", "TIEMPO": "14:07:00", ... } ] }
//! ```
//!
//! ## Invariants
//!
//! - At most one reading per `(date, hour, minute / interval_minutes)`
//!   bucket; a later reading for an occupied bucket replaces it in place.
//! - Every write goes through [`write_atomic`], so a block file is always
//!   either the previous or the new complete version.
//! - All state, including the output root, sits behind one mutex, so a root
//!   switch never interleaves with a write under the old root.
//! - A root switch merges the live block with a file already at the new
//!   root instead of replacing it.
//! - Nothing is written under a root directory that does not exist; a
//!   rotated block that could not be written is retried on later writes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use super::atomic::write_atomic;
use crate::clock::Clock;
use crate::error::{Result, StationError};
use crate::reading::{Normalizer, RawReading, Reading};

/// Time span covered by one block file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Hour,
    Day,
}

impl BlockKind {
    /// Start of the block containing `t`.
    #[must_use]
    pub fn start_of(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        match self {
            BlockKind::Hour => date
                .and_hms_opt(chrono::Timelike::hour(&t), 0, 0)
                .unwrap_or(t),
            BlockKind::Day => date.and_hms_opt(0, 0, 0).unwrap_or(t),
        }
    }

    /// `HHMM` part of the file name: `1400` for hourly, `0000` for daily.
    #[must_use]
    pub fn hour_tag(&self, start: NaiveDateTime) -> String {
        match self {
            BlockKind::Hour => start.format("%H00").to_string(),
            BlockKind::Day => "0000".to_string(),
        }
    }
}

/// Who wrote the block: goes into every file name and header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationIdentity {
    pub name: String,
    pub identifier: i64,
    /// Sensor type code, e.g. `RGA` or `SIS`
    pub type_code: String,
    pub model: String,
    pub serial_number: String,
}

/// On-disk block document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFile {
    #[serde(rename = "TIPO")]
    pub type_code: String,
    #[serde(rename = "NOMBRE")]
    pub name: String,
    #[serde(rename = "IDENTIFICADOR")]
    pub identifier: i64,
    #[serde(rename = "LECTURAS")]
    pub readings: Vec<Reading>,
}

/// `EC.<name>.<type>_<model>_<serial>_<YYYYMMDD>_<HHMM>.json`
#[must_use]
pub fn block_file_name(identity: &StationIdentity, kind: BlockKind, start: NaiveDateTime) -> String {
    format!(
        "EC.{}.{}_{}_{}_{}_{}.json",
        identity.name,
        identity.type_code,
        identity.model,
        identity.serial_number,
        start.format("%Y%m%d"),
        kind.hour_tag(start)
    )
}

/// `<root>/<YYYY>/<MM>/<DD>`
#[must_use]
pub fn block_dir(root: &Path, start: NaiveDateTime) -> PathBuf {
    root.join(start.format("%Y").to_string())
        .join(start.format("%m").to_string())
        .join(start.format("%d").to_string())
}

#[derive(Debug)]
struct BlockState {
    root: PathBuf,
    current: Option<NaiveDateTime>,
    readings: Vec<Reading>,
    /// Rotated blocks whose final write failed
    unsaved: Vec<(NaiveDateTime, Vec<Reading>)>,
}

/// Write-through store for one sensor stream.
pub struct BlockStore {
    identity: StationIdentity,
    kind: BlockKind,
    interval_minutes: u32,
    normalizer: Normalizer,
    clock: Arc<dyn Clock>,
    state: Mutex<BlockState>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("type_code", &self.identity.type_code)
            .field("kind", &self.kind)
            .field("interval_minutes", &self.interval_minutes)
            .finish_non_exhaustive()
    }
}

impl BlockStore {
    /// Creates an empty store writing under `root`.
    pub fn new(
        identity: StationIdentity,
        kind: BlockKind,
        interval_minutes: u32,
        normalizer: Normalizer,
        root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            kind,
            interval_minutes: interval_minutes.max(1),
            normalizer,
            clock,
            state: Mutex::new(BlockState {
                root: root.into(),
                current: None,
                readings: Vec::new(),
                unsaved: Vec::new(),
            }),
        }
    }

    pub fn identity(&self) -> &StationIdentity {
        &self.identity
    }

    /// Current output root
    pub fn output_dir(&self) -> PathBuf {
        self.lock().root.clone()
    }

    /// Path of the block starting at `start` under the current root.
    pub fn block_path(&self, start: NaiveDateTime) -> PathBuf {
        let root = self.lock().root.clone();
        self.path_under(&root, start)
    }

    /// Copy of the in-memory block.
    pub fn current_readings(&self) -> Vec<Reading> {
        self.lock().readings.clone()
    }

    /// Normalizes `raw` at the current wall time, places it in its bucket
    /// and rewrites the block file.
    ///
    /// Crossing a block boundary first writes out and drops the previous
    /// block. Invalid input is ignored; write failures are logged and the
    /// next call writes the whole block again.
    pub fn add_data(&self, raw: &RawReading) {
        let mut state = self.lock();
        let now = self.clock.wall();
        let block_start = self.kind.start_of(now);

        if let Some(current) = state.current {
            if current != block_start {
                let readings = std::mem::take(&mut state.readings);
                if !readings.is_empty() && !self.write_logged(&state.root, current, &readings) {
                    warn!(
                        "{}: keeping block {} until it can be written",
                        self.identity.type_code,
                        current.format("%Y-%m-%d %H:%M")
                    );
                    state.unsaved.push((current, readings));
                }
                state.current = None;
            }
        }
        self.retry_unsaved(&mut state);

        if state.current.is_none() {
            state.readings = self.load_block(&state.root, block_start);
            state.current = Some(block_start);
        }

        let Some(reading) = self.normalizer.normalize(raw, now) else {
            debug!("{}: reading rejected by normalizer", self.identity.type_code);
            return;
        };

        let bucket = reading.bucket(self.interval_minutes);
        let slot = state
            .readings
            .iter()
            .position(|r| r.bucket(self.interval_minutes) == bucket);
        match slot {
            Some(index) => state.readings[index] = reading,
            None => state.readings.push(reading),
        }

        self.write_logged(&state.root, block_start, &state.readings);
    }

    /// Writes `readings` as the block starting at `block_start` under the
    /// current root. Returns `false` (after logging) if the write failed.
    pub fn save_block_file(&self, block_start: NaiveDateTime, readings: &[Reading]) -> bool {
        let state = self.lock();
        self.write_logged(&state.root, block_start, readings)
    }

    /// Writes the in-memory block if it holds anything. The block stays in
    /// memory.
    pub fn flush(&self) {
        let mut state = self.lock();
        self.retry_unsaved(&mut state);
        if let Some(current) = state.current {
            if !state.readings.is_empty() {
                self.write_logged(&state.root, current, &state.readings);
            }
        }
    }

    /// Switches the output root and writes the in-memory block under it.
    ///
    /// A block file already present under the new root is merged with the
    /// in-memory block (in-memory readings win per bucket). Once the merged
    /// block is written, its copy under the old root is removed.
    pub fn set_output_dir(&self, new_root: impl Into<PathBuf>) {
        let mut state = self.lock();
        let old_root = std::mem::replace(&mut state.root, new_root.into());
        info!(
            "{}: storage path changed to {}",
            self.identity.type_code,
            state.root.display()
        );
        if old_root == state.root {
            return;
        }

        self.retry_unsaved(&mut state);
        let Some(current) = state.current else {
            return;
        };
        let on_disk = self.load_block(&state.root, current);
        if !on_disk.is_empty() {
            info!(
                "{}: merging {} readings already under {}",
                self.identity.type_code,
                on_disk.len(),
                state.root.display()
            );
        }
        let merged = merge_readings(on_disk, &state.readings, self.interval_minutes);
        if merged.is_empty() {
            return;
        }
        state.readings = merged;
        if self.write_logged(&state.root, current, &state.readings) {
            let stale = self.path_under(&old_root, current);
            match fs::remove_file(&stale) {
                Ok(()) => debug!("Removed superseded {}", stale.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => debug!("Could not remove {}: {}", stale.display(), e),
            }
        }
    }

    /// Final flush; the in-memory block is dropped afterwards.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        self.retry_unsaved(&mut state);
        for (start, readings) in state.unsaved.drain(..) {
            error!(
                "{}: block {} lost on shutdown ({} readings)",
                self.identity.type_code,
                start.format("%Y-%m-%d %H:%M"),
                readings.len()
            );
        }
        if let Some(current) = state.current.take() {
            if !state.readings.is_empty() {
                self.write_logged(&state.root, current, &state.readings);
            }
        }
        state.readings.clear();
    }

    fn lock(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn path_under(&self, root: &Path, start: NaiveDateTime) -> PathBuf {
        block_dir(root, start).join(block_file_name(&self.identity, self.kind, start))
    }

    /// Writes rotated blocks that failed earlier, merged with whatever the
    /// current root already holds for them.
    fn retry_unsaved(&self, state: &mut BlockState) {
        if state.unsaved.is_empty() || !state.root.is_dir() {
            return;
        }
        let pending = std::mem::take(&mut state.unsaved);
        for (start, readings) in pending {
            let merged = merge_readings(
                self.load_block(&state.root, start),
                &readings,
                self.interval_minutes,
            );
            if !self.write_logged(&state.root, start, &merged) {
                state.unsaved.push((start, readings));
            }
        }
    }

    fn write_logged(&self, root: &Path, start: NaiveDateTime, readings: &[Reading]) -> bool {
        match self.write_block(root, start, readings) {
            Ok(path) => {
                info!("[ OK ] {} data saved: {}", self.identity.type_code, path.display());
                true
            }
            Err(e) => {
                error!(
                    "{}: failed to save block {}: {}",
                    self.identity.type_code,
                    start.format("%Y-%m-%d %H:%M"),
                    e
                );
                false
            }
        }
    }

    fn write_block(&self, root: &Path, start: NaiveDateTime, readings: &[Reading]) -> Result<PathBuf> {
        if !root.is_dir() {
            return Err(StationError::Storage(format!(
                "output root {} is not available",
                root.display()
            )));
        }
        let path = self.path_under(root, start);
        let file = BlockFile {
            type_code: self.identity.type_code.clone(),
            name: self.identity.name.clone(),
            identifier: self.identity.identifier,
            readings: readings.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// Readings already on disk for this block (e.g. after a restart).
    ///
    /// An unreadable file is kept aside as `<name>.corrupt` and the block
    /// starts empty.
    fn load_block(&self, root: &Path, start: NaiveDateTime) -> Vec<Reading> {
        let path = self.path_under(root, start);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<BlockFile>(&bytes) {
            Ok(file) => {
                debug!("Resuming {} with {} readings", path.display(), file.readings.len());
                file.readings
            }
            Err(e) => {
                let mut aside = path.clone().into_os_string();
                aside.push(".corrupt");
                warn!(
                    "Unreadable block {} ({}); keeping it as {}",
                    path.display(),
                    e,
                    PathBuf::from(&aside).display()
                );
                if let Err(e) = fs::rename(&path, &aside) {
                    warn!("Could not set aside {}: {}", path.display(), e);
                }
                Vec::new()
            }
        }
    }
}

/// Union of two versions of one block, one reading per bucket, ordered by
/// time. `ours` wins where both hold the same bucket.
fn merge_readings(theirs: Vec<Reading>, ours: &[Reading], interval_minutes: u32) -> Vec<Reading> {
    let mut merged: Vec<Reading> = theirs
        .into_iter()
        .filter(|r| {
            let bucket = r.bucket(interval_minutes);
            !ours.iter().any(|o| o.bucket(interval_minutes) == bucket)
        })
        .collect();
    merged.extend_from_slice(ours);
    merged.sort_by_key(Reading::timestamp);
    merged
}
