//! In-process camera used by tests and by `tetherctl --camera sim`.
//!
//! Captures land in a fake card folder as `DSC0001.JPG`, `DSC0002.JPG`, ...
//! With RAW pairing enabled each capture also leaves a `.ARW` companion that
//! is reported through a file-added event on the next [`Camera::event_wait`],
//! the way bodies shooting RAW+JPEG behave.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use super::{
    Camera, CameraCapabilities, CameraError, CameraEvent, CameraEvents, CameraFile, CameraIdentity,
    CameraOp, EventHub,
};
use crate::token::CancelToken;

const CARD_FOLDER: &str = "/store_00010001/DCIM/100TETHR";

/// One request as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Connect,
    Disconnect,
    Capture,
    Preview,
    Download(String),
    Delete(String),
    Viewfinder(bool),
    EventWait,
    EventFlush,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    viewfinder_on: bool,
    shots: u32,
    frames: u64,
    card: BTreeMap<String, Bytes>,
    pending_added: VecDeque<CameraFile>,
    failures: HashMap<CameraOp, VecDeque<String>>,
    calls: Vec<SimCall>,
}

pub struct SimulatedCamera {
    identity: CameraIdentity,
    capabilities: CameraCapabilities,
    raw_pairs: bool,
    latency: Duration,
    state: Mutex<SimState>,
    events: EventHub,
}

impl SimulatedCamera {
    /// A connected camera with capture and preview but no viewfinder.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            identity: CameraIdentity {
                model: model.into(),
                port: "sim:".to_string(),
            },
            capabilities: CameraCapabilities {
                capture: true,
                preview: true,
                viewfinder: false,
            },
            raw_pairs: false,
            latency: Duration::ZERO,
            state: Mutex::new(SimState {
                connected: true,
                ..SimState::default()
            }),
            events: EventHub::new(),
        }
    }

    pub fn with_viewfinder(mut self, viewfinder: bool) -> Self {
        self.capabilities.viewfinder = viewfinder;
        self
    }

    pub fn with_raw_pairs(mut self, raw_pairs: bool) -> Self {
        self.raw_pairs = raw_pairs;
        self
    }

    /// Delay applied to every capture, preview and download.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn disconnected(self) -> Self {
        self.state().connected = false;
        self
    }

    /// Make the next request of kind `op` fail with `message`.
    pub fn fail_next(&self, op: CameraOp, message: impl Into<String>) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Put a file on the card as if the body created it on its own. It is
    /// reported by the next `event_wait`.
    pub fn inject_file(&self, name: impl Into<String>, data: impl Into<Bytes>) -> CameraFile {
        let file = CameraFile::new(CARD_FOLDER, name);
        let mut state = self.state();
        state.card.insert(file.name.clone(), data.into());
        state.pending_added.push_back(file.clone());
        file
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&SimCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Names of the files currently on the card.
    pub fn card_files(&self) -> Vec<String> {
        self.state().card.keys().cloned().collect()
    }

    pub fn viewfinder_on(&self) -> bool {
        self.state().viewfinder_on
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call and apply connection and scripted-failure checks.
    fn begin(&self, call: SimCall, op: CameraOp) -> Result<MutexGuard<'_, SimState>, CameraError> {
        let mut state = self.state();
        state.calls.push(call);
        if !state.connected {
            return Err(CameraError::NotConnected);
        }
        if let Some(message) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            debug!(%op, %message, "simulated failure");
            return Err(CameraError::failed(op, message));
        }
        Ok(state)
    }

    fn emit(&self, event: CameraEvent) {
        trace!(kind = event.kind(), name = %event.file().name, "sim event");
        self.events.emit(event);
    }

    async fn settle(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("arw") => "image/x-sony-arw",
        Some("cr2") => "image/x-canon-cr2",
        Some("nef") => "image/x-nikon-nef",
        _ => "application/octet-stream",
    }
}

fn fake_jpeg(label: &str) -> Bytes {
    let mut data = vec![0xff, 0xd8, 0xff, 0xe0];
    data.extend_from_slice(label.as_bytes());
    data.extend_from_slice(&[0xff, 0xd9]);
    Bytes::from(data)
}

#[async_trait]
impl Camera for SimulatedCamera {
    fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    fn capabilities(&self) -> CameraCapabilities {
        self.capabilities
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn connect(&self) -> Result<(), CameraError> {
        let mut state = self.state();
        state.calls.push(SimCall::Connect);
        if let Some(message) = state
            .failures
            .get_mut(&CameraOp::Connect)
            .and_then(|q| q.pop_front())
        {
            return Err(CameraError::failed(CameraOp::Connect, message));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CameraError> {
        let mut state = self.state();
        state.calls.push(SimCall::Disconnect);
        state.connected = false;
        state.viewfinder_on = false;
        Ok(())
    }

    async fn capture_image(&self, _cancel: &CancelToken) -> Result<CameraFile, CameraError> {
        if !self.capabilities.capture {
            return Err(CameraError::Unsupported(CameraOp::Capture));
        }
        let file = {
            let mut state = self.begin(SimCall::Capture, CameraOp::Capture)?;
            state.shots += 1;
            let stem = format!("DSC{:04}", state.shots);
            let file = CameraFile::new(CARD_FOLDER, format!("{stem}.JPG"));
            state.card.insert(file.name.clone(), fake_jpeg(&stem));
            if self.raw_pairs {
                let raw = CameraFile::new(CARD_FOLDER, format!("{stem}.ARW"));
                state.card.insert(raw.name.clone(), Bytes::from(format!("raw {stem}")));
                state.pending_added.push_back(raw);
            }
            file
        };
        self.settle().await;
        self.emit(CameraEvent::FileCaptured(file.clone()));
        Ok(file)
    }

    async fn preview_image(&self, _cancel: &CancelToken) -> Result<CameraFile, CameraError> {
        if !self.capabilities.preview {
            return Err(CameraError::Unsupported(CameraOp::Preview));
        }
        let frame = {
            let mut state = self.begin(SimCall::Preview, CameraOp::Preview)?;
            state.frames += 1;
            if self.capabilities.viewfinder {
                state.viewfinder_on = true;
            }
            CameraFile::new("/", "preview.jpg")
                .with_data(fake_jpeg(&format!("frame {}", state.frames)), "image/jpeg")
        };
        self.settle().await;
        self.emit(CameraEvent::FilePreviewed(frame.clone()));
        Ok(frame)
    }

    async fn download_file(
        &self,
        file: &CameraFile,
        _cancel: &CancelToken,
    ) -> Result<CameraFile, CameraError> {
        let data = {
            let state = self.begin(SimCall::Download(file.name.clone()), CameraOp::Download)?;
            state.card.get(&file.name).cloned().ok_or_else(|| {
                CameraError::failed(CameraOp::Download, format!("no such file {}", file.name))
            })?
        };
        self.settle().await;
        let downloaded = file.clone().with_data(data, mime_for(&file.name));
        self.emit(CameraEvent::FileDownloaded(downloaded.clone()));
        Ok(downloaded)
    }

    async fn delete_file(&self, file: &CameraFile, _cancel: &CancelToken) -> Result<(), CameraError> {
        {
            let mut state = self.begin(SimCall::Delete(file.name.clone()), CameraOp::Delete)?;
            if state.card.remove(&file.name).is_none() {
                return Err(CameraError::failed(
                    CameraOp::Delete,
                    format!("no such file {}", file.name),
                ));
            }
        }
        self.emit(CameraEvent::FileDeleted(file.clone()));
        Ok(())
    }

    async fn set_viewfinder(&self, enabled: bool, _cancel: &CancelToken) -> Result<(), CameraError> {
        if !self.capabilities.viewfinder {
            return Err(CameraError::Unsupported(CameraOp::Viewfinder));
        }
        let mut state = self.begin(SimCall::Viewfinder(enabled), CameraOp::Viewfinder)?;
        state.viewfinder_on = enabled;
        Ok(())
    }

    async fn event_wait(&self, wait: Duration) -> Result<(), CameraError> {
        let added = {
            let mut state = self.begin(SimCall::EventWait, CameraOp::EventWait)?;
            std::mem::take(&mut state.pending_added)
        };
        if added.is_empty() {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            return Ok(());
        }
        for file in added {
            self.emit(CameraEvent::FileAdded(file));
        }
        Ok(())
    }

    async fn event_flush(&self) -> Result<(), CameraError> {
        let mut state = self.begin(SimCall::EventFlush, CameraOp::EventWait)?;
        let dropped = state.pending_added.len();
        state.pending_added.clear();
        if dropped > 0 {
            debug!(dropped, "flushed pending camera events");
        }
        Ok(())
    }

    fn subscribe(&self) -> CameraEvents {
        self.events.subscribe()
    }
}
