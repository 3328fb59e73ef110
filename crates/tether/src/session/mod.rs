//! Capture session: a directory of images plus a filename allocator.
//!
//! New captures are named from a pattern like `captureXXXXXX`. The next
//! counter is derived from the images already known to the session and then
//! cached; the cache is dropped whenever the image list is reloaded or the
//! pattern changes.

mod image;
mod pattern;

pub use image::{FileStat, Image};
pub use pattern::FilenamePattern;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::camera::CameraFile;

/// Extension used when the camera file has none.
pub const DEFAULT_EXTENSION: &str = "jpeg";

/// A session shared between the automaton and the host.
///
/// The lock is never held across an await point.
pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// `path` is set when the candidate name was already taken.
    #[error("no filename available")]
    NoFilenameAvailable { path: Option<PathBuf> },

    #[error("filename pattern '{0}' has no XXX placeholder or is too wide")]
    InvalidPattern(String),

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl SessionError {
    fn io(path: &Path, source: io::Error) -> Self {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ImageAdded(Arc<Image>),
    ImageRemoved(Arc<Image>),
}

/// Observer for image-list changes.
///
/// Called while the session is borrowed; implementations must not call back
/// into the session.
pub trait SessionListener: Send + Sync {
    fn session_changed(&self, event: &SessionEvent);
}

pub struct Session {
    directory: PathBuf,
    pattern: FilenamePattern,
    images: Vec<Arc<Image>>,
    next_counter: Option<u64>,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("directory", &self.directory)
            .field("pattern", &self.pattern.as_str())
            .field("images", &self.images.len())
            .field("next_counter", &self.next_counter)
            .finish()
    }
}

impl Session {
    /// Open a session rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>, filename_pattern: &str) -> Result<Self, SessionError> {
        let directory = directory.into();
        let pattern = FilenamePattern::parse(filename_pattern)?;
        std::fs::create_dir_all(&directory).map_err(|e| SessionError::io(&directory, e))?;

        Ok(Self {
            directory,
            pattern,
            images: Vec::new(),
            next_counter: None,
            listeners: Vec::new(),
        })
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn filename_pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn set_filename_pattern(&mut self, filename_pattern: &str) -> Result<(), SessionError> {
        self.pattern = FilenamePattern::parse(filename_pattern)?;
        self.next_counter = None;
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    /// Reserve the next filename for `file`.
    ///
    /// Each call consumes one counter value, whether or not a name comes back.
    /// A name that already exists on disk is never returned.
    pub fn next_filename(&mut self, file: &CameraFile) -> Result<PathBuf, SessionError> {
        let counter = match self.next_counter {
            Some(n) => n,
            None => self.scan_next_counter(),
        };
        self.next_counter = Some(counter.saturating_add(1));

        if counter >= self.pattern.capacity() {
            warn!(
                pattern = self.pattern.as_str(),
                counter, "filename counter exhausted"
            );
            return Err(SessionError::NoFilenameAvailable { path: None });
        }

        let extension = file
            .extension()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let path = self.directory.join(self.pattern.render(counter, &extension));

        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                warn!(path = %path.display(), "filename already taken");
                Err(SessionError::NoFilenameAvailable { path: Some(path) })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), source = %file.name, "allocated filename");
                Ok(path)
            }
            Err(e) => Err(SessionError::io(&path, e)),
        }
    }

    /// One past the highest counter among images in the session directory.
    fn scan_next_counter(&self) -> u64 {
        self.images
            .iter()
            .filter(|image| image.dirname() == Some(self.directory.as_path()))
            .filter_map(|image| image.basename())
            .filter_map(|name| self.pattern.counter_of(name))
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Create an empty `previewXXXXXX` scratch file in the session directory.
    pub fn temp_filename(&self) -> Result<PathBuf, SessionError> {
        let file = tempfile::Builder::new()
            .prefix("preview")
            .rand_bytes(6)
            .tempfile_in(&self.directory)
            .map_err(|e| SessionError::io(&self.directory, e))?;
        let (_, path) = file
            .keep()
            .map_err(|e| SessionError::io(&self.directory, e.error))?;
        Ok(path)
    }

    /// Scan the directory and add every visible file not already listed.
    ///
    /// Dot-files are skipped. Returns the number of images added.
    pub fn load(&mut self) -> Result<usize, SessionError> {
        let entries =
            std::fs::read_dir(&self.directory).map_err(|e| SessionError::io(&self.directory, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io(&self.directory, e))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| SessionError::io(&entry.path(), e))?;
            if file_type.is_file() || file_type.is_symlink() {
                found.push(entry.path());
            }
        }
        found.sort();

        let mut added = 0;
        for path in found {
            if self.images.iter().any(|i| i.filename() == Some(path.as_path())) {
                continue;
            }
            self.add(Image::new(path));
            added += 1;
        }
        self.next_counter = None;

        info!(directory = %self.directory.display(), added, total = self.images.len(), "loaded session");
        Ok(added)
    }

    pub fn add(&mut self, image: Image) -> Arc<Image> {
        let image = Arc::new(image);
        self.images.push(Arc::clone(&image));
        self.notify(SessionEvent::ImageAdded(Arc::clone(&image)));
        image
    }

    /// Remove `image` from the list. The file on disk is left alone.
    pub fn remove(&mut self, image: &Arc<Image>) -> bool {
        let Some(idx) = self.images.iter().position(|i| Arc::ptr_eq(i, image)) else {
            return false;
        };
        let removed = self.images.remove(idx);
        self.notify(SessionEvent::ImageRemoved(removed));
        true
    }

    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, idx: usize) -> Option<&Arc<Image>> {
        self.images.get(idx)
    }

    fn notify(&self, event: SessionEvent) {
        for listener in &self.listeners {
            listener.session_changed(&event);
        }
    }
}
