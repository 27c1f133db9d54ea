//! Per-run preservation of original files
//!
//! Every run gets one directory `<root>/<YYYYmmdd_HHMMSS>` named after the
//! run's start time. Originals are copied (or moved, when configured) into it
//! before any output for them is written.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::error::{Result, ConverterError};

/// How originals are preserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    Copy,
    Move,
}

/// Backs up originals into a single run directory
#[derive(Debug)]
pub struct BackupManager {
    run_dir: PathBuf,
    mode: BackupMode,
    announced: AtomicBool,
}

impl BackupManager {
    /// Run directory is `backup_root/<run_started as %Y%m%d_%H%M%S>`
    pub fn new(backup_root: &Path, run_started: DateTime<Local>, mode: BackupMode) -> Self {
        let run_dir = backup_root.join(run_started.format("%Y%m%d_%H%M%S").to_string());
        Self {
            run_dir,
            mode,
            announced: AtomicBool::new(false),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    /// Preserve `source` and return where it now lives
    pub fn backup(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| ConverterError::backup("Source has no file name", source.to_path_buf()))?;

        fs::create_dir_all(&self.run_dir).map_err(|e| {
            ConverterError::backup(
                format!("Cannot create backup directory {:?}: {}", self.run_dir, e),
                source.to_path_buf(),
            )
        })?;
        if !self.announced.swap(true, Ordering::Relaxed) {
            info!("Backing up originals to {:?}", self.run_dir);
        }

        let (target, mut placeholder) = self.reserve(Path::new(file_name), source)?;

        let outcome = match self.mode {
            BackupMode::Copy => copy_into(source, &mut placeholder),
            BackupMode::Move => {
                drop(placeholder);
                move_file(source, &target)
            }
        };

        if let Err(e) = outcome {
            let _ = fs::remove_file(&target);
            return Err(ConverterError::backup(e.to_string(), source.to_path_buf()));
        }

        debug!("Backed up {:?} -> {:?} ({:?})", source, target, self.mode);
        Ok(target)
    }

    /// Exclusively create the backup target, suffixing on name clashes
    fn reserve(&self, file_name: &Path, source: &Path) -> Result<(PathBuf, File)> {
        let stem = file_name.file_stem().and_then(|s| s.to_str()).unwrap_or("original");
        let extension = file_name.extension().and_then(|s| s.to_str());

        let mut candidate = self.run_dir.join(file_name);
        let mut n = 1u32;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    n += 1;
                    let name = match extension {
                        Some(ext) => format!("{}-{}.{}", stem, n, ext),
                        None => format!("{}-{}", stem, n),
                    };
                    candidate = self.run_dir.join(name);
                }
                Err(e) => {
                    return Err(ConverterError::backup(
                        format!("Cannot create {:?}: {}", candidate, e),
                        source.to_path_buf(),
                    ))
                }
            }
        }
    }
}

fn copy_into(source: &Path, target: &mut File) -> io::Result<()> {
    let mut reader = File::open(source)?;
    io::copy(&mut reader, target)?;
    target.sync_all()
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target)?;
    fs::remove_file(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn run_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_run_dir_layout() {
        let manager = BackupManager::new(Path::new("/out/originals_backup"), run_time(), BackupMode::Copy);
        assert_eq!(manager.run_dir(), Path::new("/out/originals_backup/20240309_140507"));
    }

    #[test]
    fn test_copy_keeps_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"original bytes").unwrap();

        let manager = BackupManager::new(&dir.path().join("backup"), run_time(), BackupMode::Copy);
        let backed_up = manager.backup(&source).unwrap();

        assert_eq!(backed_up, manager.run_dir().join("photo.jpg"));
        assert_eq!(fs::read(&backed_up).unwrap(), b"original bytes");
        assert!(source.exists());
    }

    #[test]
    fn test_move_removes_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.png");
        fs::write(&source, b"png").unwrap();

        let manager = BackupManager::new(&dir.path().join("backup"), run_time(), BackupMode::Move);
        let backed_up = manager.backup(&source).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(backed_up).unwrap(), b"png");
    }

    #[test]
    fn test_same_name_gets_suffix() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/img.jpg"), b"first").unwrap();
        fs::write(dir.path().join("b/img.jpg"), b"second").unwrap();

        let manager = BackupManager::new(&dir.path().join("backup"), run_time(), BackupMode::Copy);
        let first = manager.backup(&dir.path().join("a/img.jpg")).unwrap();
        let second = manager.backup(&dir.path().join("b/img.jpg")).unwrap();

        assert_eq!(first.file_name().unwrap(), "img.jpg");
        assert_eq!(second.file_name().unwrap(), "img-2.jpg");
        assert_eq!(fs::read(second).unwrap(), b"second");
    }

    #[test]
    fn test_missing_source_is_backup_error() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path(), run_time(), BackupMode::Copy);

        let err = manager.backup(&dir.path().join("missing.jpg")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BackupWrite);
        // No stray placeholder left behind
        assert_eq!(fs::read_dir(manager.run_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unwritable_root_is_backup_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"x").unwrap();

        let manager = BackupManager::new(&blocker, run_time(), BackupMode::Copy);
        assert!(matches!(
            manager.backup(&source),
            Err(ConverterError::BackupWriteError { .. })
        ));
    }
}
