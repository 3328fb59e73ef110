//! Shared fixtures for workflow tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tether::{
    Automaton, AutomatonEvent, AutomatonPublisher, CancelToken, ConfirmToken, Session,
    SharedSession, SimulatedCamera,
};

/// When a recorder raises one of the host's tokens.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    /// After the n-th preview frame (1-based).
    Frame(usize),
    CaptureBegin,
}

/// Publisher that records events and plays the operator: it raises cancel or
/// confirm at a chosen point in the workflow.
pub struct Recorder {
    events: Mutex<Vec<AutomatonEvent>>,
    pub cancel: CancelToken,
    pub confirm: ConfirmToken,
    cancel_on: Option<Trigger>,
    confirm_on: Option<Trigger>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel: CancelToken::new(),
            confirm: ConfirmToken::new(),
            cancel_on: None,
            confirm_on: None,
        }
    }

    pub fn cancel_on(mut self, trigger: Trigger) -> Self {
        self.cancel_on = Some(trigger);
        self
    }

    pub fn confirm_on(mut self, trigger: Trigger) -> Self {
        self.confirm_on = Some(trigger);
        self
    }

    pub fn events(&self) -> Vec<AutomatonEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events with preview frame payloads collapsed, for compact assertions.
    pub fn timeline(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(|e| match e {
                AutomatonEvent::CaptureBegin => "begin",
                AutomatonEvent::CaptureEnd => "end",
                AutomatonEvent::PreviewFrame(_) => "frame",
                AutomatonEvent::ImageSaved(_) => "saved",
                AutomatonEvent::SaveFailed { .. } => "save failed",
            })
            .collect()
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AutomatonEvent::ImageSaved(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    fn fires(trigger: Option<Trigger>, event: &AutomatonEvent, frames: usize) -> bool {
        match (trigger, event) {
            (Some(Trigger::Frame(n)), AutomatonEvent::PreviewFrame(_)) => frames == n,
            (Some(Trigger::CaptureBegin), AutomatonEvent::CaptureBegin) => true,
            _ => false,
        }
    }
}

impl AutomatonPublisher for Recorder {
    fn publish(&self, event: AutomatonEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());
        let frames = events
            .iter()
            .filter(|e| matches!(e, AutomatonEvent::PreviewFrame(_)))
            .count();

        if Self::fires(self.cancel_on, &event, frames) {
            self.cancel.signal();
        }
        if Self::fires(self.confirm_on, &event, frames) {
            self.confirm.signal();
        }
    }
}

pub struct Rig {
    pub automaton: Automaton,
    pub camera: Arc<SimulatedCamera>,
    pub recorder: Arc<Recorder>,
    pub session: SharedSession,
    pub dir: TempDir,
}

impl Rig {
    pub fn new(camera: SimulatedCamera, recorder: Recorder) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        Self::in_dir(dir, camera, recorder)
    }

    pub fn in_dir(dir: TempDir, camera: SimulatedCamera, recorder: Recorder) -> anyhow::Result<Self> {
        let mut session = Session::new(dir.path(), "captureXXXXXX")?;
        session.load()?;
        let session = session.into_shared();

        let camera = Arc::new(camera);
        let recorder = Arc::new(recorder);
        let automaton = Automaton::new(recorder.clone());
        automaton.set_camera(Some(camera.clone()));
        automaton.set_session(Some(session.clone()));

        Ok(Self {
            automaton,
            camera,
            recorder,
            session,
            dir,
        })
    }

    pub fn saved_names(&self) -> Vec<String> {
        self.session
            .lock()
            .unwrap()
            .images()
            .iter()
            .filter_map(|i| i.basename().map(str::to_string))
            .collect()
    }
}
