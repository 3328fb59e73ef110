use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// An image belonging to a session.
///
/// File metadata is read lazily and cached until [`Image::invalidate`].
#[derive(Debug)]
pub struct Image {
    filename: Option<PathBuf>,
    stat: Mutex<Option<FileStat>>,
}

impl Image {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            stat: Mutex::new(None),
        }
    }

    /// An image with no backing file, e.g. a live-view frame.
    pub fn in_memory() -> Self {
        Self {
            filename: None,
            stat: Mutex::new(None),
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn basename(&self) -> Option<&str> {
        self.filename.as_deref()?.file_name()?.to_str()
    }

    pub fn dirname(&self) -> Option<&Path> {
        self.filename.as_deref()?.parent()
    }

    pub fn stat(&self) -> Option<FileStat> {
        let mut cached = self.stat.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.is_none() {
            let path = self.filename.as_deref()?;
            match std::fs::metadata(path) {
                Ok(meta) => {
                    *cached = Some(FileStat {
                        size: meta.len(),
                        modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "unable to stat image");
                    return None;
                }
            }
        }
        *cached
    }

    /// Size in bytes, 0 when the file cannot be read.
    pub fn file_size(&self) -> u64 {
        self.stat().map(|s| s.size).unwrap_or(0)
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.stat().and_then(|s| s.modified)
    }

    /// Drop cached metadata so the next query re-reads the file.
    pub fn invalidate(&self) {
        *self.stat.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
