use std::io::{self, Write};
use std::path::Path;

use bytes::Bytes;

/// A file on (or fetched from) the camera.
///
/// Files reported by capture and file-added events carry only their device
/// location. Downloaded files and preview frames also carry the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFile {
    pub folder: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Option<Bytes>,
}

impl CameraFile {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
            mime_type: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Device path, `folder/name`.
    pub fn device_path(&self) -> String {
        if self.folder.ends_with('/') {
            format!("{}{}", self.folder, self.name)
        } else {
            format!("{}/{}", self.folder, self.name)
        }
    }

    /// Name with the final extension stripped: `DSC1234.JPG` -> `DSC1234`.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    /// Final extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|s| s.to_str())
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Write the payload to `path`, refusing to replace an existing file.
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        let data = self.data.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has not been downloaded", self.name),
            )
        })?;

        let mut out = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        out.write_all(data)?;
        out.sync_all()
    }
}
