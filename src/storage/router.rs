//! Chooses where block files go: removable media when present, internal
//! storage otherwise. Polled, not event driven.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::block::BlockStore;
use super::media::MediaProbe;
use super::migrate::{migrate_backlog, MigrationReport};

/// What a poll changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// Stores now write under `root`; the backlog was merged into it.
    Attached { root: PathBuf, report: MigrationReport },
    /// Media gone; stores are back on internal storage.
    Detached,
    Unchanged,
}

/// Owns the hotplug state and switches every store's output root.
pub struct StorageRouter<P: MediaProbe> {
    probe: P,
    stores: Vec<Arc<BlockStore>>,
    internal_root: PathBuf,
    data_dir_name: String,
    miss_threshold: u32,
    connected: bool,
    last_known: Option<PathBuf>,
    misses: u32,
}

impl<P: MediaProbe> StorageRouter<P> {
    /// # Arguments
    ///
    /// * `internal_root` - Fallback root, also the backlog migrated onto media
    /// * `data_dir_name` - Directory created on the media (e.g. `DTA`)
    /// * `miss_threshold` - Consecutive misses before reverting to internal
    pub fn new(
        probe: P,
        stores: Vec<Arc<BlockStore>>,
        internal_root: impl Into<PathBuf>,
        data_dir_name: impl Into<String>,
        miss_threshold: u32,
    ) -> Self {
        Self {
            probe,
            stores,
            internal_root: internal_root.into(),
            data_dir_name: data_dir_name.into(),
            miss_threshold: miss_threshold.max(1),
            connected: false,
            last_known: None,
            misses: 0,
        }
    }

    /// Root the stores are currently writing under.
    pub fn active_root(&self) -> PathBuf {
        match (&self.last_known, self.connected) {
            (Some(mount), true) => mount.join(&self.data_dir_name),
            _ => self.internal_root.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// One detection step.
    pub fn poll(&mut self) -> RouterEvent {
        match self.probe.find_media() {
            Some(mount) => {
                self.misses = 0;
                if self.connected && self.last_known.as_deref() == Some(mount.as_path()) {
                    return RouterEvent::Unchanged;
                }
                self.attach(mount)
            }
            None => self.on_miss(),
        }
    }

    fn attach(&mut self, mount: PathBuf) -> RouterEvent {
        let root = mount.join(&self.data_dir_name);
        if let Err(e) = std::fs::create_dir_all(&root) {
            error!("Cannot use media {}: {}", root.display(), e);
            return RouterEvent::Unchanged;
        }

        info!("USB detected: {}", mount.display());
        self.switch_all(&root);
        let report = migrate_backlog(&self.internal_root, &root);

        self.connected = true;
        self.last_known = Some(mount);
        RouterEvent::Attached { root, report }
    }

    fn on_miss(&mut self) -> RouterEvent {
        if !self.connected {
            return RouterEvent::Unchanged;
        }

        if let Some(mount) = &self.last_known {
            if self.probe.is_mounted(mount) {
                self.misses = 0;
                return RouterEvent::Unchanged;
            }
        }

        self.misses += 1;
        if self.misses < self.miss_threshold {
            warn!(
                "Media not detected ({}/{})",
                self.misses, self.miss_threshold
            );
            return RouterEvent::Unchanged;
        }

        warn!("USB removed, reverting to {}", self.internal_root.display());
        let internal = self.internal_root.clone();
        self.switch_all(&internal);
        self.connected = false;
        self.last_known = None;
        self.misses = 0;
        RouterEvent::Detached
    }

    fn switch_all(&self, root: &Path) {
        for store in &self.stores {
            store.set_output_dir(root);
        }
    }
}

impl<P: MediaProbe + 'static> StorageRouter<P> {
    /// Polls every `period` until `shutdown` flips to `true`.
    ///
    /// Each poll runs on the blocking pool since it walks the filesystem.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut router = self;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let polled = tokio::task::spawn_blocking(move || {
                        let event = router.poll();
                        (router, event)
                    })
                    .await;
                    match polled {
                        Ok((back, _event)) => router = back,
                        Err(e) => {
                            error!("Storage poll task failed: {}", e);
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Storage router stopped on {}", router.active_root().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reading::{Normalizer, RawPayload, RawReading};
    use crate::storage::block::{BlockKind, StationIdentity};
    use crate::storage::media::MockMediaProbe;
    use chrono::NaiveDate;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const BLOCK: &str = "2025/06/01/EC.REVS2.RGA_rpi-5_4512_20250601_1400.json";

    struct Rig {
        internal: TempDir,
        media: TempDir,
        present: Arc<Mutex<bool>>,
        clock: Arc<ManualClock>,
        store: Arc<BlockStore>,
        router: StorageRouter<MockMediaProbe>,
    }

    fn rig(miss_threshold: u32) -> Rig {
        let internal = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let present = Arc::new(Mutex::new(false));
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(14, 7, 0).unwrap(),
        ));
        let store = Arc::new(BlockStore::new(
            StationIdentity {
                name: "REVS2".to_string(),
                identifier: 1,
                type_code: "RGA".to_string(),
                model: "rpi-5".to_string(),
                serial_number: "4512".to_string(),
            },
            BlockKind::Hour,
            1,
            Normalizer::Rain,
            internal.path(),
            clock.clone(),
        ));

        let mut probe = MockMediaProbe::new();
        let mount = media.path().to_path_buf();
        let found = Arc::clone(&present);
        probe
            .expect_find_media()
            .returning(move || found.lock().unwrap().then(|| mount.clone()));
        let mounted = Arc::clone(&present);
        probe
            .expect_is_mounted()
            .returning(move |_| *mounted.lock().unwrap());

        let router = StorageRouter::new(
            probe,
            vec![Arc::clone(&store)],
            internal.path(),
            "DTA",
            miss_threshold,
        );
        Rig { internal, media, present, clock, store, router }
    }

    fn rain(level_mm: f64) -> RawReading {
        RawReading::new(RawPayload::Rain { level_mm })
    }

    #[test]
    fn test_attach_switches_store_and_migrates_backlog() {
        let mut rig = rig(3);
        rig.store.add_data(&rain(0.25));
        fs::create_dir_all(rig.internal.path().join("2025/05/31")).unwrap();
        fs::write(rig.internal.path().join("2025/05/31/old.json"), b"{}").unwrap();

        *rig.present.lock().unwrap() = true;
        let event = rig.router.poll();

        let root = rig.media.path().join("DTA");
        match event {
            RouterEvent::Attached { root: attached, report } => {
                assert_eq!(attached, root);
                assert_eq!(report.moved, 1);
                // The live block was moved with the root switch.
                assert_eq!(report.duplicates, 0);
                assert_eq!(report.conflicts, 0);
            }
            other => panic!("Expected Attached, got: {:?}", other),
        }
        assert_eq!(rig.store.output_dir(), root);
        assert!(root.join(BLOCK).exists());
        assert!(root.join("2025/05/31/old.json").exists());
        assert!(!rig.internal.path().join(BLOCK).exists());
        assert_eq!(rig.router.poll(), RouterEvent::Unchanged);
    }

    #[test]
    fn test_late_mount_merges_live_block_with_media_copy() {
        let mut rig = rig(3);
        let media_block = rig.media.path().join("DTA").join(BLOCK);
        fs::create_dir_all(media_block.parent().unwrap()).unwrap();
        let earlier: Vec<_> = (0..3)
            .map(|m| {
                let at = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(14, m, 0).unwrap();
                Normalizer::Rain.normalize(&rain(0.25), at).unwrap()
            })
            .collect();
        let file = serde_json::json!({
            "TIPO": "RGA",
            "NOMBRE": "REVS2",
            "IDENTIFICADOR": 1,
            "LECTURAS": earlier,
        });
        fs::write(&media_block, serde_json::to_vec_pretty(&file).unwrap()).unwrap();

        // Station restarted before the drive mounted: first reading goes internal.
        rig.clock.set_wall(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(14, 30, 0).unwrap(),
        );
        rig.store.add_data(&rain(0.5));
        assert!(rig.internal.path().join(BLOCK).exists());

        *rig.present.lock().unwrap() = true;
        match rig.router.poll() {
            RouterEvent::Attached { report, .. } => {
                assert_eq!(report.duplicates, 0);
                assert_eq!(report.conflicts, 0);
            }
            other => panic!("Expected Attached, got: {:?}", other),
        }

        let written: serde_json::Value = serde_json::from_slice(&fs::read(&media_block).unwrap()).unwrap();
        let times: Vec<_> = written["LECTURAS"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["TIEMPO"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(times, vec!["14:00:00", "14:01:00", "14:02:00", "14:30:00"]);
        assert!(!rig.internal.path().join(BLOCK).exists());
        assert_eq!(rig.store.current_readings().len(), 4);
    }

    #[test]
    fn test_transient_miss_keeps_media_while_mounted() {
        let mut rig = rig(1);
        *rig.present.lock().unwrap() = true;
        rig.router.poll();

        // Scan misses, but the mount is still there.
        rig.router.probe.checkpoint();
        let mount = rig.media.path().to_path_buf();
        rig.router.probe.expect_find_media().returning(|| None);
        rig.router
            .probe
            .expect_is_mounted()
            .returning(move |path| path == mount.as_path());

        assert_eq!(rig.router.poll(), RouterEvent::Unchanged);
        assert!(rig.router.is_connected());
    }

    #[test]
    fn test_removal_reverts_after_threshold_without_losing_block() {
        let mut rig = rig(3);
        *rig.present.lock().unwrap() = true;
        rig.router.poll();
        rig.store.add_data(&rain(0.25));

        *rig.present.lock().unwrap() = false;
        assert_eq!(rig.router.poll(), RouterEvent::Unchanged);
        assert_eq!(rig.router.poll(), RouterEvent::Unchanged);
        assert!(rig.router.is_connected());
        assert_eq!(rig.router.poll(), RouterEvent::Detached);

        assert_eq!(rig.router.active_root(), rig.internal.path());
        assert_eq!(rig.store.output_dir(), rig.internal.path());

        rig.clock.set_wall(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(14, 8, 0).unwrap(),
        );
        rig.store.add_data(&rain(0.5));
        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(rig.internal.path().join(BLOCK)).unwrap()).unwrap();
        assert_eq!(written["LECTURAS"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_reappearing_media_resets_miss_count() {
        let mut rig = rig(2);
        *rig.present.lock().unwrap() = true;
        rig.router.poll();

        *rig.present.lock().unwrap() = false;
        rig.router.poll();
        *rig.present.lock().unwrap() = true;
        rig.router.poll();
        *rig.present.lock().unwrap() = false;

        assert_eq!(rig.router.poll(), RouterEvent::Unchanged);
        assert_eq!(rig.router.poll(), RouterEvent::Detached);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let rig = rig(3);
        *rig.present.lock().unwrap() = true;
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(rig.router.run(Duration::from_millis(10), rx));
        let root = rig.media.path().join("DTA");
        for _ in 0..200 {
            if root.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(root.exists());
    }
}
