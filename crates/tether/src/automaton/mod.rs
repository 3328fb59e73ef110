//! Capture/preview workflow driver.
//!
//! An [`Automaton`] owns the attachment to one camera and one session. It
//! runs at most one task at a time: a one-shot capture, or a live-view
//! preview loop that ends in a capture (confirm) or a discard (cancel).
//! Independently of tasks it services the camera's file events, saving
//! files the body created on its own and deleting discard duplicates.
//!
//! Whatever the automaton downloads it saves itself, before any delete is
//! issued. A file is only removed from the card once a copy is on disk.

mod task;

pub use task::TaskKind;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::camera::{Camera, CameraError, CameraEvent, CameraEvents, CameraFile, CameraOp};
use crate::error::TetherError;
use crate::session::{Image, SharedSession};
use crate::token::{CancelToken, ConfirmToken};
use task::{Effect, Policy, Settled, Step, Task};

/// How a task that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// A real capture was taken; `file` is the downloaded copy when the
    /// download succeeded.
    Captured { file: CameraFile },
    /// The operator cancelled. Nothing was kept.
    Cancelled,
}

/// Notifications for the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomatonEvent {
    /// The shutter is about to fire.
    CaptureBegin,
    /// The shutter request settled, successfully or not.
    CaptureEnd,
    PreviewFrame(CameraFile),
    ImageSaved(PathBuf),
    /// A downloaded file could not be stored. It was left on the card;
    /// `file` still carries the payload.
    SaveFailed { file: CameraFile, error: String },
}

pub trait AutomatonPublisher: Send + Sync {
    fn publish(&self, event: AutomatonEvent);
}

impl AutomatonPublisher for broadcast::Sender<AutomatonEvent> {
    fn publish(&self, event: AutomatonEvent) {
        // Nobody listening is not an error.
        let _ = self.send(event);
    }
}

/// Publisher that drops everything.
pub struct NullPublisher;

impl AutomatonPublisher for NullPublisher {
    fn publish(&self, _event: AutomatonEvent) {}
}

/// Everything tied to one camera attachment. Replaced wholesale by
/// [`Automaton::set_camera`], which also drops the event subscription.
struct CameraLink {
    camera: Arc<dyn Camera>,
    events: tokio::sync::Mutex<CameraEvents>,
    pending_duplicate: Mutex<Option<String>>,
    /// Device paths of downloads the automaton issued and already saves
    /// itself; their file-downloaded events are skipped.
    own_downloads: Mutex<HashMap<String, usize>>,
}

impl CameraLink {
    fn new(camera: Arc<dyn Camera>) -> Self {
        let events = camera.subscribe();
        Self {
            camera,
            events: tokio::sync::Mutex::new(events),
            pending_duplicate: Mutex::new(None),
            own_downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Download `file`, marking it so the resulting file-downloaded event is
    /// not saved a second time.
    async fn download(
        &self,
        file: &CameraFile,
        cancel: &CancelToken,
    ) -> Result<CameraFile, CameraError> {
        let key = file.device_path();
        *lock(&self.own_downloads).entry(key.clone()).or_default() += 1;
        let result = self.camera.download_file(file, cancel).await;
        if result.is_err() {
            self.release_download(&key);
        }
        result
    }

    /// Whether a file-downloaded event belongs to a download we issued.
    fn claim_download(&self, file: &CameraFile) -> bool {
        self.release_download(&file.device_path())
    }

    fn release_download(&self, key: &str) -> bool {
        let mut own = lock(&self.own_downloads);
        match own.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                own.remove(key);
                true
            }
            None => false,
        }
    }

    fn remember_duplicate(&self, stem: String) {
        debug!(%stem, "ignoring companion files of discarded capture");
        *lock(&self.pending_duplicate) = Some(stem);
    }

    /// Consume the memo if `file` is the companion of the discarded capture.
    fn take_duplicate(&self, file: &CameraFile) -> bool {
        let mut pending = lock(&self.pending_duplicate);
        let matched = pending
            .as_deref()
            .is_some_and(|stem| is_companion(file.stem(), stem));
        if matched {
            *pending = None;
        }
        matched
    }
}

/// `DSC1234`, `DSC1234_1` and `DSC1234-2` are companions of `DSC1234`;
/// `DSC12345` is a different shot.
fn is_companion(candidate: &str, stem: &str) -> bool {
    match candidate.strip_prefix(stem) {
        Some(rest) => !rest.starts_with(|c: char| c.is_ascii_alphanumeric()),
        None => false,
    }
}

struct State {
    link: Option<Arc<CameraLink>>,
    session: Option<SharedSession>,
    delete_after_download: bool,
    preview_interval: Duration,
}

struct Inner {
    publisher: Arc<dyn AutomatonPublisher>,
    state: Mutex<State>,
    task_active: AtomicBool,
    generation: watch::Sender<u64>,
}

/// Clears the task-active flag when a task ends, however it ends.
struct TaskGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Automaton {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Automaton {
    pub fn new(publisher: Arc<dyn AutomatonPublisher>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                publisher,
                state: Mutex::new(State {
                    link: None,
                    session: None,
                    delete_after_download: true,
                    preview_interval: Duration::ZERO,
                }),
                task_active: AtomicBool::new(false),
                generation,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    fn link(&self) -> Option<Arc<CameraLink>> {
        self.state().link.clone()
    }

    /// Attach a camera, detaching from the previous one.
    ///
    /// A task already running keeps using the camera it started with.
    pub fn set_camera(&self, camera: Option<Arc<dyn Camera>>) {
        if let Some(camera) = &camera {
            info!(model = %camera.identity().model, port = %camera.identity().port, "camera attached");
        }
        let link = camera.map(|camera| Arc::new(CameraLink::new(camera)));
        self.state().link = link;
        self.inner.generation.send_modify(|g| *g += 1);
    }

    pub fn camera(&self) -> Option<Arc<dyn Camera>> {
        self.link().map(|link| Arc::clone(&link.camera))
    }

    pub fn set_session(&self, session: Option<SharedSession>) {
        self.state().session = session;
    }

    pub fn session(&self) -> Option<SharedSession> {
        self.state().session.clone()
    }

    pub fn set_delete_after_download(&self, delete: bool) {
        self.state().delete_after_download = delete;
    }

    pub fn delete_after_download(&self) -> bool {
        self.state().delete_after_download
    }

    /// Pause between live-view frames. Zero polls as fast as the camera allows.
    pub fn set_preview_interval(&self, interval: Duration) {
        self.state().preview_interval = interval;
    }

    pub fn is_busy(&self) -> bool {
        self.inner.task_active.load(Ordering::SeqCst)
    }

    fn policy(&self) -> Policy {
        Policy {
            delete_after_download: self.state().delete_after_download,
        }
    }

    fn start_task(&self) -> Result<(TaskGuard<'_>, Arc<CameraLink>), TetherError> {
        let link = self.link().ok_or(TetherError::NoCamera)?;
        self.inner
            .task_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| TetherError::TaskActive)?;
        Ok((
            TaskGuard {
                active: &self.inner.task_active,
            },
            link,
        ))
    }

    /// Take one picture, download it, and delete it from the camera when
    /// the delete-after-download policy is on.
    ///
    /// Signalling `cancel` while the shutter is in flight skips the download.
    pub async fn capture(&self, cancel: &CancelToken) -> Result<TaskOutcome, TetherError> {
        let (_guard, link) = self.start_task()?;
        if !link.camera.has_capture() {
            return Err(TetherError::Unsupported(CameraOp::Capture));
        }
        self.drive(&link, Task::capture(cancel.clone())).await
    }

    /// Stream live-view frames until `confirm` (take the shot, as
    /// [`Automaton::capture`]) or `cancel` (discard and stop).
    pub async fn preview(
        &self,
        cancel: &CancelToken,
        confirm: &ConfirmToken,
    ) -> Result<TaskOutcome, TetherError> {
        let (_guard, link) = self.start_task()?;
        if !link.camera.has_preview() {
            return Err(TetherError::Unsupported(CameraOp::Preview));
        }
        let task = Task::preview(cancel.clone(), confirm.clone(), link.camera.has_viewfinder());
        self.drive(&link, task).await
    }

    async fn drive(&self, link: &CameraLink, mut task: Task) -> Result<TaskOutcome, TetherError> {
        let camera = &link.camera;
        // Follow-up requests are never aborted half-way.
        let uninterruptible = CancelToken::new();
        let kind = task.kind();
        info!(?kind, model = %camera.identity().model, "task started");

        self.apply_effects(link, task.take_effects());
        let mut step = task.first_step();
        loop {
            trace!(?kind, ?step, "issuing");
            let settled = match step {
                Step::Preview => {
                    let interval = self.state().preview_interval;
                    if !interval.is_zero() && task.latest().is_some() {
                        tokio::time::sleep(interval).await;
                    }
                    Settled::Previewed(camera.preview_image(task.cancel()).await)
                }
                Step::ViewfinderOff(after) => Settled::ViewfinderOff(
                    after,
                    camera.set_viewfinder(false, &uninterruptible).await,
                ),
                Step::Capture => Settled::Captured(camera.capture_image(task.cancel()).await),
                Step::Download(file) => {
                    Settled::Downloaded(link.download(&file, &uninterruptible).await)
                }
                Step::Save(file) => Settled::Saved(self.save_download(&file)),
                Step::Delete(file) => {
                    Settled::Deleted(camera.delete_file(&file, &uninterruptible).await)
                }
                Step::DiscardCapture => {
                    Settled::DiscardCaptured(camera.capture_image(&uninterruptible).await)
                }
                Step::DiscardDelete(file) => {
                    Settled::DiscardDeleted(camera.delete_file(&file, &uninterruptible).await)
                }
                Step::Done => break,
            };
            step = task.advance(settled, self.policy());
            self.apply_effects(link, task.take_effects());
        }

        let result = task.finish();
        match &result {
            Ok(outcome) => info!(?kind, ?outcome, "task finished"),
            Err(e) => warn!(?kind, error = %e, "task failed"),
        }
        result
    }

    fn apply_effects(&self, link: &CameraLink, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CaptureBegin => self.inner.publisher.publish(AutomatonEvent::CaptureBegin),
                Effect::CaptureEnd => self.inner.publisher.publish(AutomatonEvent::CaptureEnd),
                Effect::PreviewFrame(frame) => {
                    self.inner.publisher.publish(AutomatonEvent::PreviewFrame(frame))
                }
                Effect::RememberDuplicate(stem) => link.remember_duplicate(stem),
            }
        }
    }

    /// Handle every camera event already queued, including ones raised
    /// while handling. Returns how many were handled.
    pub async fn pump_events(&self) -> usize {
        let Some(link) = self.link() else {
            return 0;
        };
        let mut handled = 0;
        loop {
            let event = {
                let mut events = link.events.lock().await;
                match events.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            };
            self.handle_event(&link, event).await;
            handled += 1;
        }
        handled
    }

    /// Service camera events until `shutdown` fires, following camera
    /// changes.
    pub async fn run_events(&self, shutdown: CancellationToken) {
        let mut generation = self.inner.generation.subscribe();
        loop {
            generation.borrow_and_update();
            let link = self.link();

            let next = match &link {
                Some(link) => {
                    let mut events = link.events.lock().await;
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = generation.changed() => None,
                        event = events.recv() => Some(event),
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = generation.changed() => None,
                    }
                }
            };

            match (next, link) {
                (Some(Some(event)), Some(link)) => self.handle_event(&link, event).await,
                (Some(None), _) => {
                    debug!("camera event channel closed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = generation.changed() => {}
                    }
                }
                _ => {}
            }
        }
    }

    async fn handle_event(&self, link: &CameraLink, event: CameraEvent) {
        let result = match event {
            CameraEvent::FileAdded(file) => self.handle_file_added(link, file).await,
            CameraEvent::FileDownloaded(file) if link.claim_download(&file) => {
                trace!(name = %file.name, "download already handled");
                Ok(())
            }
            CameraEvent::FileDownloaded(file) => self.save_download(&file).map(|_| ()),
            other => {
                trace!(kind = other.kind(), name = %other.file().name, "camera event");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "camera event not handled");
        }
    }

    /// Download (then optionally delete) a file the camera created on its
    /// own, or delete it straight away if it belongs to a discarded capture.
    async fn handle_file_added(&self, link: &CameraLink, file: CameraFile) -> Result<(), TetherError> {
        let camera = &link.camera;
        let uninterruptible = CancelToken::new();

        if link.take_duplicate(&file) {
            debug!(name = %file.name, "deleting companion of discarded capture");
            camera.delete_file(&file, &uninterruptible).await?;
            return Ok(());
        }

        debug!(name = %file.name, "downloading added file");
        let mut first_error = match link.download(&file, &uninterruptible).await {
            Ok(downloaded) => {
                // Without a copy on disk the card file must stay.
                self.save_download(&downloaded)?;
                None
            }
            Err(e) => Some(TetherError::from(e)),
        };
        if self.delete_after_download() {
            if let Err(e) = camera.delete_file(&file, &uninterruptible).await {
                first_error.get_or_insert(e.into());
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Store a downloaded file under the session's next filename. Failures
    /// are published as well as returned.
    fn save_download(&self, file: &CameraFile) -> Result<PathBuf, TetherError> {
        match self.store(file) {
            Ok(path) => {
                info!(path = %path.display(), source = %file.name, "saved image");
                self.inner
                    .publisher
                    .publish(AutomatonEvent::ImageSaved(path.clone()));
                Ok(path)
            }
            Err(e) => {
                warn!(source = %file.name, error = %e, "image not saved");
                self.inner.publisher.publish(AutomatonEvent::SaveFailed {
                    file: file.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn store(&self, file: &CameraFile) -> Result<PathBuf, TetherError> {
        let session = self.session().ok_or(TetherError::NoSession)?;
        let mut session = lock(&session);
        let path = session.next_filename(file)?;
        file.save_to(&path).map_err(|source| TetherError::Io {
            path: path.clone(),
            source,
        })?;
        session.add(Image::new(&path));
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{SimCall, SimulatedCamera};

    #[tokio::test]
    async fn test_task_requires_camera() {
        let automaton = Automaton::new(Arc::new(NullPublisher));
        let err = automaton.capture(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TetherError::NoCamera));
        assert!(!automaton.is_busy());
    }

    #[tokio::test]
    async fn test_second_task_is_rejected_while_busy() -> anyhow::Result<()> {
        let camera = Arc::new(SimulatedCamera::new("Sim").with_latency(Duration::from_millis(200)));
        let automaton = Automaton::new(Arc::new(NullPublisher));
        automaton.set_camera(Some(camera.clone()));

        let running = {
            let automaton = automaton.clone();
            tokio::spawn(async move { automaton.capture(&CancelToken::new()).await })
        };
        while !automaton.is_busy() {
            tokio::task::yield_now().await;
        }

        let err = automaton.capture(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TetherError::TaskActive));

        running.await??;
        assert!(!automaton.is_busy());
        assert_eq!(camera.count_calls(|c| *c == SimCall::Capture), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_switching_camera_drops_pending_events() -> anyhow::Result<()> {
        let first = Arc::new(SimulatedCamera::new("First"));
        let second = Arc::new(SimulatedCamera::new("Second"));
        let automaton = Automaton::new(Arc::new(NullPublisher));
        automaton.set_camera(Some(first.clone()));

        first.inject_file("DSC0100.JPG", &b"jpeg"[..]);
        first.event_wait(Duration::ZERO).await?;
        automaton.set_camera(Some(second.clone()));

        assert_eq!(automaton.pump_events().await, 0);
        assert_eq!(first.count_calls(|c| matches!(c, SimCall::Download(_))), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_capture_without_session_leaves_card_file() -> anyhow::Result<()> {
        let camera = Arc::new(SimulatedCamera::new("Sim"));
        let automaton = Automaton::new(Arc::new(NullPublisher));
        automaton.set_camera(Some(camera.clone()));

        let err = automaton.capture(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TetherError::NoSession));
        assert_eq!(camera.card_files(), vec!["DSC0001.JPG"]);
        // captured and downloaded; the download is not saved twice
        assert_eq!(automaton.pump_events().await, 2);
        assert_eq!(camera.count_calls(|c| matches!(c, SimCall::Delete(_))), 0);
        Ok(())
    }

    #[test]
    fn test_companion_names() {
        assert!(is_companion("DSC1234", "DSC1234"));
        assert!(is_companion("DSC1234_1", "DSC1234"));
        assert!(is_companion("DSC1234-2", "DSC1234"));
        assert!(!is_companion("DSC12345", "DSC1234"));
        assert!(!is_companion("DSC1234a", "DSC1234"));
        assert!(!is_companion("DSC123", "DSC1234"));
    }
}
