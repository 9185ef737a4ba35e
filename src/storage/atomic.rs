//! Crash-safe file replacement.
//!
//! Content is written to a temp file next to the target, fsynced, then
//! renamed over the target and the directory fsynced. A reader of the
//! target path sees either the old or the new content, never a prefix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replaces `path` with `contents` atomically, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staged = stage(path, contents)?;
    commit(&staged, path)
}

/// Writes `contents` to a fresh temp file beside `path` and fsyncs it.
///
/// Returns the temp path; nothing is visible at `path` until [`commit`].
pub(crate) fn stage(path: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("block.json");

    let mut counter = 0u32;
    loop {
        let candidate = dir.join(temp_name(base, counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                let written = tmp
                    .write_all(contents)
                    .and_then(|()| tmp.flush())
                    .and_then(|()| tmp.sync_all());
                if let Err(e) = written {
                    drop(tmp);
                    let _ = fs::remove_file(&candidate);
                    return Err(e);
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Renames a staged temp file over `path`, then fsyncs the directory
/// (best-effort).
pub(crate) fn commit(staged: &Path, path: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(staged, path) {
        let _ = fs::remove_file(staged);
        return Err(e);
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}

/// Hidden temp name, unique per process and attempt.
fn temp_name(base: &str, counter: u32) -> String {
    format!(".{}.tmp-{}-{}", base, std::process::id(), counter)
}

/// Whether `name` looks like a temp file left by [`stage`].
pub(crate) fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_directories_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2025/06/01/block.json");

        write_atomic(&path, b"{}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["block.json".to_string()]);
    }

    #[test]
    fn test_crash_before_rename_keeps_old_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.json");
        write_atomic(&path, b"complete old block").unwrap();

        // Staged but never committed: the process died here.
        let staged = stage(&path, b"new block that never landed").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"complete old block");
        assert!(staged.exists());
        assert!(is_temp_name(staged.file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("block.json");
        let a = vec![b'a'; 256 * 1024];
        let b = vec![b'b'; 256 * 1024];
        write_atomic(&path, &a).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let path = path.clone();
            let done = Arc::clone(&done);
            let (a, b) = (a.clone(), b.clone());
            std::thread::spawn(move || {
                for i in 0..50 {
                    write_atomic(&path, if i % 2 == 0 { &b } else { &a }).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        while !done.load(Ordering::SeqCst) {
            let seen = fs::read(&path).unwrap();
            assert!(seen == a || seen == b, "reader saw {} partial bytes", seen.len());
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_temp_names_are_recognised() {
        assert!(is_temp_name(&temp_name("EC.REVS2.json", 3)));
        assert!(!is_temp_name("EC.REVS2.RGA_rpi-5_4512_20250601_1400.json"));
    }
}
