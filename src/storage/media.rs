//! Removable media discovery.

use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::debug;

/// Answers "is there a usable removable drive, and is it still mounted?"
#[cfg_attr(test, mockall::automock)]
pub trait MediaProbe: Send {
    /// Mount point of a usable removable drive, if any.
    fn find_media(&self) -> Option<PathBuf>;

    /// Whether `mount_point` is still a mounted filesystem.
    fn is_mounted(&self, mount_point: &Path) -> bool;
}

/// Probe backed by the OS disk list.
///
/// A drive qualifies when it is mounted below `media_base`, writable, and
/// has at least `min_free_bytes` available.
#[derive(Debug, Clone)]
pub struct SysinfoProbe {
    media_base: PathBuf,
    min_free_bytes: u64,
}

impl SysinfoProbe {
    pub fn new(media_base: impl Into<PathBuf>, min_free_bytes: u64) -> Self {
        Self {
            media_base: media_base.into(),
            min_free_bytes,
        }
    }
}

impl MediaProbe for SysinfoProbe {
    fn find_media(&self) -> Option<PathBuf> {
        let disks = Disks::new_with_refreshed_list();
        let mut candidates: Vec<PathBuf> = disks
            .list()
            .iter()
            .filter(|disk| {
                let mount = disk.mount_point();
                if mount == self.media_base || !mount.starts_with(&self.media_base) {
                    return false;
                }
                if disk.is_read_only() {
                    debug!("Skipping read-only media {}", mount.display());
                    return false;
                }
                if disk.available_space() < self.min_free_bytes {
                    debug!(
                        "Skipping {}: {} bytes free",
                        mount.display(),
                        disk.available_space()
                    );
                    return false;
                }
                true
            })
            .map(|disk| disk.mount_point().to_path_buf())
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    fn is_mounted(&self, mount_point: &Path) -> bool {
        Disks::new_with_refreshed_list()
            .list()
            .iter()
            .any(|disk| disk.mount_point() == mount_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_base_finds_nothing() {
        let probe = SysinfoProbe::new("/nonexistent/media/base", 0);
        assert_eq!(probe.find_media(), None);
        assert!(!probe.is_mounted(Path::new("/nonexistent/media/base/USB")));
    }
}
