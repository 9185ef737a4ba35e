//! Backlog migration from internal storage onto removable media.
//!
//! Files are merged, never blindly overwritten:
//!
//! - absent at the destination: moved
//! - present and byte-identical: source deleted
//! - present and different: source moved alongside as
//!   `<name>.conflict-<hash8>`
//!
//! Directories emptied by the pass are pruned; the source root itself is
//! always kept.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::atomic::{commit, is_temp_name, stage};

/// Outcome counts of one migration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    pub duplicates: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl MigrationReport {
    /// Files the pass looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.moved + self.duplicates + self.conflicts + self.failed
    }
}

/// Merges every file under `source` into the same relative path under
/// `dest`, then prunes emptied directories.
///
/// Per-file failures are logged and counted; the pass carries on.
pub fn migrate_backlog(source: &Path, dest: &Path) -> MigrationReport {
    let mut report = MigrationReport::default();

    if !source.is_dir() {
        return report;
    }
    if same_path(source, dest) {
        warn!("Migration source and destination are the same: {}", source.display());
        return report;
    }

    let mut files = Vec::new();
    if let Err(e) = collect_files(source, dest, &mut files) {
        error!("Could not scan backlog {}: {}", source.display(), e);
        return report;
    }

    for file in files {
        let Ok(relative) = file.strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        match merge_file(&file, &target) {
            Ok(Outcome::Moved) => report.moved += 1,
            Ok(Outcome::Duplicate) => report.duplicates += 1,
            Ok(Outcome::Conflict(kept)) => {
                warn!("Conflicting copy kept as {}", kept.display());
                report.conflicts += 1;
            }
            Err(e) => {
                error!("Failed to migrate {}: {}", file.display(), e);
                report.failed += 1;
            }
        }
    }

    prune_empty_dirs(source);

    if report.total() > 0 {
        info!(
            "Migration {} -> {}: {} moved, {} duplicates, {} conflicts, {} failed",
            source.display(),
            dest.display(),
            report.moved,
            report.duplicates,
            report.conflicts,
            report.failed
        );
    }
    report
}

enum Outcome {
    Moved,
    Duplicate,
    Conflict(PathBuf),
}

fn merge_file(file: &Path, target: &Path) -> io::Result<Outcome> {
    if !target.exists() {
        move_file(file, target)?;
        debug!("Moved {} -> {}", file.display(), target.display());
        return Ok(Outcome::Moved);
    }

    let source_hash = content_hash(file)?;
    if source_hash == content_hash(target)? {
        fs::remove_file(file)?;
        debug!("Duplicate removed: {}", file.display());
        return Ok(Outcome::Duplicate);
    }

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let conflict = target.with_file_name(format!("{}.conflict-{}", name, &source_hash[..8]));
    if conflict.exists() && content_hash(&conflict)? == source_hash {
        fs::remove_file(file)?;
        return Ok(Outcome::Duplicate);
    }
    move_file(file, &conflict)?;
    Ok(Outcome::Conflict(conflict))
}

/// Hex SHA-256 of a file's content.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Rename, falling back to copy + remove when the rename crosses devices.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            let contents = fs::read(from)?;
            let staged = stage(to, &contents)?;
            commit(&staged, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV
    e.raw_os_error() == Some(18)
}

/// Regular files under `dir`, skipping temp files and `dest` if nested.
fn collect_files(dir: &Path, dest: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if same_path(&path, dest) {
                continue;
            }
            collect_files(&path, dest, out)?;
        } else if file_type.is_file() {
            if is_temp_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            out.push(path);
        }
    }
    Ok(())
}

/// Removes empty directories below `root`, deepest first. `root` stays.
pub fn prune_empty_dirs(root: &Path) {
    fn prune(dir: &Path) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        let mut empty = true;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && prune(&path) {
                if fs::remove_dir(&path).is_err() {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        empty
    }
    prune(root);
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BLOCK: &str = "2025/06/01/EC.REVS2.RGA_rpi-5_4512_20250601_1400.json";

    fn put(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_absent_file_is_moved_and_tree_pruned() {
        let internal = TempDir::new().unwrap();
        let usb = TempDir::new().unwrap();
        let source = put(internal.path(), BLOCK, b"{\"LECTURAS\":[]}");

        let report = migrate_backlog(internal.path(), usb.path());

        assert_eq!(report, MigrationReport { moved: 1, ..Default::default() });
        assert!(!source.exists());
        assert_eq!(fs::read(usb.path().join(BLOCK)).unwrap(), b"{\"LECTURAS\":[]}");
        assert!(internal.path().exists(), "root is never pruned");
        assert_eq!(fs::read_dir(internal.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_identical_file_is_deduplicated() {
        let internal = TempDir::new().unwrap();
        let usb = TempDir::new().unwrap();
        let source = put(internal.path(), BLOCK, b"same");
        put(usb.path(), BLOCK, b"same");

        let report = migrate_backlog(internal.path(), usb.path());

        assert_eq!(report.duplicates, 1);
        assert!(!source.exists());
        let names: Vec<_> = fs::read_dir(usb.path().join("2025/06/01")).unwrap().collect();
        assert_eq!(names.len(), 1, "no second copy at the destination");
    }

    #[test]
    fn test_differing_file_is_kept_as_conflict() {
        let internal = TempDir::new().unwrap();
        let usb = TempDir::new().unwrap();
        let source = put(internal.path(), BLOCK, b"internal version");
        put(usb.path(), BLOCK, b"usb version");
        let hash = content_hash(&source).unwrap();

        let report = migrate_backlog(internal.path(), usb.path());

        assert_eq!(report.conflicts, 1);
        assert!(!source.exists());
        assert_eq!(fs::read(usb.path().join(BLOCK)).unwrap(), b"usb version");
        let conflict = usb
            .path()
            .join(format!("{}.conflict-{}", BLOCK, &hash[..8]));
        assert_eq!(fs::read(conflict).unwrap(), b"internal version");
    }

    #[test]
    fn test_temp_files_are_left_alone() {
        let internal = TempDir::new().unwrap();
        let usb = TempDir::new().unwrap();
        let temp = put(internal.path(), "2025/06/01/.block.json.tmp-42-0", b"partial");

        let report = migrate_backlog(internal.path(), usb.path());

        assert_eq!(report.total(), 0);
        assert!(temp.exists());
    }

    #[test]
    fn test_destination_nested_in_source_is_skipped() {
        let internal = TempDir::new().unwrap();
        let dest = internal.path().join("usb");
        put(&dest, BLOCK, b"already there");
        put(internal.path(), BLOCK, b"backlog");

        let report = migrate_backlog(internal.path(), &dest);

        assert_eq!(report.conflicts, 1);
        assert_eq!(fs::read(dest.join(BLOCK)).unwrap(), b"already there");
    }

    #[test]
    fn test_missing_source_is_a_no_op() {
        let usb = TempDir::new().unwrap();
        let report = migrate_backlog(&usb.path().join("missing"), usb.path());
        assert_eq!(report, MigrationReport::default());
    }

    #[test]
    fn test_prune_keeps_directories_with_files() {
        let root = TempDir::new().unwrap();
        put(root.path(), "2025/06/02/keep.json", b"x");
        fs::create_dir_all(root.path().join("2025/06/01")).unwrap();

        prune_empty_dirs(root.path());

        assert!(root.path().join("2025/06/02/keep.json").exists());
        assert!(!root.path().join("2025/06/01").exists());
    }

    #[test]
    fn test_content_hash_matches_sha256() {
        let dir = TempDir::new().unwrap();
        let path = put(dir.path(), "a.json", b"abc");
        assert_eq!(
            content_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
