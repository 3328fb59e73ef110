//! Camera device proxy contract.
//!
//! The automaton drives a camera only through [`Camera`]. Every operation is
//! async and settles exactly once with a `Result`; file events are delivered
//! on an unbounded channel obtained from [`Camera::subscribe`]. Every
//! subscriber sees every event: a dropped file-added or file-downloaded
//! event would lose a picture that may already be gone from the card.

mod file;
pub mod sim;

pub use file::CameraFile;
pub use sim::{SimCall, SimulatedCamera};

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::token::CancelToken;

/// Receiving end of a camera's file events.
pub type CameraEvents = mpsc::UnboundedReceiver<CameraEvent>;

/// Device operations, used to label errors and scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraOp {
    Connect,
    Disconnect,
    Capture,
    Preview,
    Download,
    Delete,
    Viewfinder,
    EventWait,
}

impl fmt::Display for CameraOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CameraOp::Connect => "connect camera",
            CameraOp::Disconnect => "disconnect camera",
            CameraOp::Capture => "capture image",
            CameraOp::Preview => "capture preview",
            CameraOp::Download => "download file",
            CameraOp::Delete => "delete file",
            CameraOp::Viewfinder => "toggle viewfinder",
            CameraOp::EventWait => "wait for camera events",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera is not connected")]
    NotConnected,

    #[error("unable to {op}: {message}")]
    OperationFailed { op: CameraOp, message: String },

    #[error("{op} was cancelled")]
    Cancelled { op: CameraOp },

    #[error("camera does not support {0}")]
    Unsupported(CameraOp),
}

impl CameraError {
    pub fn failed(op: CameraOp, message: impl Into<String>) -> Self {
        CameraError::OperationFailed {
            op,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraIdentity {
    pub model: String,
    pub port: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CameraCapabilities {
    pub capture: bool,
    pub preview: bool,
    pub viewfinder: bool,
}

/// File activity reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// A capture request produced this file on the device.
    FileCaptured(CameraFile),
    /// A preview request produced this in-memory frame.
    FilePreviewed(CameraFile),
    /// The device created a file outside any request (RAW companion,
    /// shutter pressed on the body).
    FileAdded(CameraFile),
    /// A download finished; the file carries its payload.
    FileDownloaded(CameraFile),
    FileDeleted(CameraFile),
}

impl CameraEvent {
    pub fn file(&self) -> &CameraFile {
        match self {
            CameraEvent::FileCaptured(file)
            | CameraEvent::FilePreviewed(file)
            | CameraEvent::FileAdded(file)
            | CameraEvent::FileDownloaded(file)
            | CameraEvent::FileDeleted(file) => file,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CameraEvent::FileCaptured(_) => "file_captured",
            CameraEvent::FilePreviewed(_) => "file_previewed",
            CameraEvent::FileAdded(_) => "file_added",
            CameraEvent::FileDownloaded(_) => "file_downloaded",
            CameraEvent::FileDeleted(_) => "file_deleted",
        }
    }
}

/// Asynchronous proxy for one physical (or simulated) camera.
///
/// Cancel tokens passed to an operation may be honoured by the device; an
/// operation that is already in flight is otherwise allowed to run to
/// completion.
#[async_trait]
pub trait Camera: Send + Sync {
    fn identity(&self) -> &CameraIdentity;

    fn capabilities(&self) -> CameraCapabilities;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), CameraError>;

    async fn disconnect(&self) -> Result<(), CameraError>;

    /// Fire the shutter. Settles with the file created on the device.
    async fn capture_image(&self, cancel: &CancelToken) -> Result<CameraFile, CameraError>;

    /// Grab one live-view frame. Settles with an in-memory file.
    async fn preview_image(&self, cancel: &CancelToken) -> Result<CameraFile, CameraError>;

    /// Fetch a file's payload. Settles with a copy of `file` carrying data.
    async fn download_file(
        &self,
        file: &CameraFile,
        cancel: &CancelToken,
    ) -> Result<CameraFile, CameraError>;

    async fn delete_file(&self, file: &CameraFile, cancel: &CancelToken) -> Result<(), CameraError>;

    async fn set_viewfinder(&self, enabled: bool, cancel: &CancelToken) -> Result<(), CameraError>;

    /// Poll the device for spontaneous events, waiting at most `wait`.
    async fn event_wait(&self, wait: Duration) -> Result<(), CameraError>;

    /// Discard pending device events without waiting.
    async fn event_flush(&self) -> Result<(), CameraError>;

    /// Start receiving file events. Events raised before the call are not
    /// replayed.
    fn subscribe(&self) -> CameraEvents;

    fn has_capture(&self) -> bool {
        self.capabilities().capture
    }

    fn has_preview(&self) -> bool {
        self.capabilities().preview
    }

    fn has_viewfinder(&self) -> bool {
        self.capabilities().viewfinder
    }
}

/// Fan-out of file events to every live subscriber, for [`Camera`]
/// implementations.
///
/// Each subscriber gets its own unbounded queue, so a slow reader delays
/// events but never loses them. Subscribers that hung up are pruned on the
/// next emit.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CameraEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> CameraEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every subscriber. Returns how many received it.
    pub fn emit(&self, event: CameraEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<CameraEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(name: &str) -> CameraEvent {
        CameraEvent::FileAdded(CameraFile::new("/DCIM", name))
    }

    #[test]
    fn test_hub_keeps_every_event_for_slow_subscribers() -> anyhow::Result<()> {
        let hub = EventHub::new();
        let mut events = hub.subscribe();
        for n in 0..500 {
            hub.emit(added(&format!("DSC{n:04}.JPG")));
        }

        for n in 0..500 {
            assert_eq!(events.try_recv()?, added(&format!("DSC{n:04}.JPG")));
        }
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn test_hub_prunes_closed_subscribers() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());

        assert_eq!(hub.emit(added("DSC0001.JPG")), 1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(kept);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
