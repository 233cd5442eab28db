//! Files a session creates on disk.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Paths owned by one session. Every registered path is removed by
/// [`WorkingFiles::remove_all`], which always leaves the set empty.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkingFiles {
    paths: BTreeSet<PathBuf>,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cleanup {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

impl WorkingFiles {
    /// Registers a path before anything is written to it.
    pub fn register(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// Deletes every registered file. Blocking; run it off the event loop.
    ///
    /// Missing files count as removed. Other failures are logged and the
    /// path is forgotten anyway.
    pub fn remove_all(&mut self) -> Cleanup {
        let mut report = Cleanup::default();
        for path in std::mem::take(&mut self.paths) {
            match fs_err::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    log::warn!("Failed to remove working file: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
