// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe replacement of a live store file by a freshly built one.
//!
//! The live store is renamed to a uniquely named backup, the new store is
//! renamed into place, and only then is the backup deleted. WAL and shared
//! memory sidecars travel with their main file.

use std::io;
use std::path::{Path, PathBuf};

use memdex_core::MemdexError;
use tracing::{info, warn};

const SIDECARS: &[&str] = &["-wal", "-shm"];

/// Unique temporary path next to `live` for building a replacement store.
pub fn temp_path_for(live: &Path) -> PathBuf {
    suffixed(live, &format!(".tmp-{}", uuid::Uuid::new_v4()))
}

/// Unique backup path next to `live`.
pub fn backup_path_for(live: &Path) -> PathBuf {
    suffixed(live, &format!(".backup-{}", uuid::Uuid::new_v4()))
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Deletes a store file and its sidecars. Missing files are ignored.
pub fn remove_index_files(path: &Path) -> Result<(), MemdexError> {
    remove_if_exists(path)?;
    for sidecar in SIDECARS {
        remove_if_exists(&suffixed(path, sidecar))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), MemdexError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MemdexError::io(path, e)),
    }
}

/// Moves `temp` into place at `live` and deletes the previous store.
///
/// If `live` does not exist yet the temp store is simply renamed. On failure
/// after the live store was moved aside, it is restored from the backup.
pub fn swap_index_files(live: &Path, temp: &Path) -> Result<(), MemdexError> {
    begin_swap(live, temp)?.commit()
}

/// Moves `temp` into place at `live`, keeping the previous store as a
/// backup until the returned [`PendingSwap`] is committed or rolled back.
pub fn begin_swap(live: &Path, temp: &Path) -> Result<PendingSwap, MemdexError> {
    swap_with(live, temp, &mut |from: &Path, to: &Path| std::fs::rename(from, to))
}

/// A store file swapped into place whose predecessor is still on disk.
#[must_use = "a pending swap leaves a backup behind until committed or rolled back"]
#[derive(Debug)]
pub struct PendingSwap {
    live: PathBuf,
    backup: Option<PathBuf>,
}

impl PendingSwap {
    /// Deletes the backup of the replaced store.
    pub fn commit(self) -> Result<(), MemdexError> {
        if let Some(backup) = &self.backup {
            remove_index_files(backup)?;
        }
        info!(live = %self.live.display(), "index store swapped into place");
        Ok(())
    }

    /// Deletes the swapped-in store and moves the backup back into place.
    /// Without a backup the live path is simply left empty.
    pub fn rollback(self) -> Result<(), MemdexError> {
        self.rollback_with(&mut |from: &Path, to: &Path| std::fs::rename(from, to))
    }

    fn rollback_with(self, rename: &mut RenameFn<'_>) -> Result<(), MemdexError> {
        remove_index_files(&self.live)?;
        if let Some(backup) = &self.backup {
            move_index_files(backup, &self.live, rename)?;
        }
        warn!(live = %self.live.display(), "index store swap rolled back");
        Ok(())
    }
}

type RenameFn<'a> = dyn FnMut(&Path, &Path) -> io::Result<()> + 'a;

fn swap_with(live: &Path, temp: &Path, rename: &mut RenameFn<'_>) -> Result<PendingSwap, MemdexError> {
    if !temp.exists() {
        return Err(MemdexError::io(
            temp,
            io::Error::new(io::ErrorKind::NotFound, "replacement store missing"),
        ));
    }

    let backup = if live.exists() {
        let backup = backup_path_for(live);
        move_index_files(live, &backup, rename)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = move_index_files(temp, live, rename) {
        warn!(
            live = %live.display(),
            error = %e,
            "swap failed, restoring live store from backup"
        );
        if let Some(backup) = &backup {
            // A partially moved temp store must not shadow the restored files.
            let _ = remove_index_files(live);
            if let Err(restore) = move_index_files(backup, live, rename) {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "restore from backup failed; backup left in place"
                );
            }
        }
        return Err(e);
    }

    Ok(PendingSwap {
        live: live.to_path_buf(),
        backup,
    })
}

fn move_index_files(from: &Path, to: &Path, rename: &mut RenameFn<'_>) -> Result<(), MemdexError> {
    rename(from, to).map_err(|e| MemdexError::io(from, e))?;
    for sidecar in SIDECARS {
        let src = suffixed(from, sidecar);
        let dst = suffixed(to, sidecar);
        if src.exists() {
            rename(&src, &dst).map_err(|e| MemdexError::io(&src, e))?;
        } else {
            // A stale sidecar would be replayed against the wrong main file.
            remove_if_exists(&dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn temp_and_backup_paths_are_unique_siblings() {
        let live = Path::new("/data/main.sqlite");
        let a = temp_path_for(live);
        let b = temp_path_for(live);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("/data/main.sqlite.tmp-"));
        assert!(
            backup_path_for(live)
                .to_string_lossy()
                .starts_with("/data/main.sqlite.backup-")
        );
    }

    #[test]
    fn swap_replaces_live_and_removes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&live, "old");
        write(&suffixed(&live, "-wal"), "old-wal");
        write(&temp, "new");

        swap_index_files(&live, &temp).unwrap();

        assert_eq!(read(&live), "new");
        assert!(!temp.exists());
        // Old WAL must not survive next to the new main file.
        assert!(!suffixed(&live, "-wal").exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["index.sqlite".to_string()]);
    }

    #[test]
    fn swap_without_live_store_renames_temp() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&temp, "fresh");

        swap_index_files(&live, &temp).unwrap();
        assert_eq!(read(&live), "fresh");
    }

    #[test]
    fn failed_swap_restores_live_store() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&live, "old");
        write(&temp, "new");

        // First rename (live -> backup) succeeds, second (temp -> live) fails.
        let mut calls = 0;
        let mut rename = |from: &Path, to: &Path| {
            calls += 1;
            if calls == 2 {
                return Err(io::Error::other("disk full"));
            }
            std::fs::rename(from, to)
        };
        let err = swap_with(&live, &temp, &mut rename).unwrap_err();

        assert!(matches!(err, MemdexError::Io { .. }));
        assert_eq!(read(&live), "old");
        assert_eq!(read(&temp), "new");
    }

    #[test]
    fn rollback_puts_the_previous_store_back() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&live, "old");
        write(&suffixed(&live, "-wal"), "old-wal");
        write(&temp, "not a database");

        let pending = begin_swap(&live, &temp).unwrap();
        assert_eq!(read(&live), "not a database");
        pending.rollback().unwrap();

        assert_eq!(read(&live), "old");
        assert_eq!(read(&suffixed(&live, "-wal")), "old-wal");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "{names:?}");
    }

    #[test]
    fn rollback_without_previous_store_clears_live() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&temp, "fresh");

        begin_swap(&live, &temp).unwrap().rollback().unwrap();
        assert!(!live.exists());
    }

    #[test]
    fn failed_rollback_keeps_the_backup() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        let temp = temp_path_for(&live);
        write(&live, "old");
        write(&temp, "new");

        let pending = begin_swap(&live, &temp).unwrap();
        let backup = pending.backup.clone().unwrap();
        let mut rename = |_: &Path, _: &Path| -> io::Result<()> { Err(io::Error::other("read-only filesystem")) };
        assert!(pending.rollback_with(&mut rename).is_err());
        assert_eq!(read(&backup), "old");
    }

    #[test]
    fn missing_temp_is_an_error_and_leaves_live() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("index.sqlite");
        write(&live, "old");

        let err = swap_index_files(&live, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, MemdexError::Io { .. }));
        assert_eq!(read(&live), "old");
    }

    #[test]
    fn remove_index_files_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sqlite");
        remove_index_files(&path).unwrap();
        write(&path, "x");
        write(&suffixed(&path, "-shm"), "x");
        remove_index_files(&path).unwrap();
        assert!(!path.exists());
        assert!(!suffixed(&path, "-shm").exists());
    }
}
