//! Capture and preview tasks as an explicit step machine.
//!
//! A task never touches the camera itself. The driver issues the device
//! request named by the current [`Step`], waits for it to settle, and feeds
//! the result back through [`Task::advance`], which picks the next step.
//! Cancel and confirm are consulted only here, when a request settles, so at
//! most one device request is ever in flight per task.

use std::path::PathBuf;

use crate::camera::{CameraError, CameraFile};
use crate::error::TetherError;
use crate::token::{CancelToken, ConfirmToken};

use super::TaskOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Capture,
    Preview,
}

/// What follows a viewfinder-off request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterViewfinder {
    /// Operator cancelled: throw away one capture so the mirror is reset.
    Discard,
    /// Operator confirmed: take the real shot.
    Capture,
}

/// Next device request to issue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Preview,
    ViewfinderOff(AfterViewfinder),
    Capture,
    Download(CameraFile),
    /// Store the downloaded payload in the session. Not a device request.
    Save(CameraFile),
    Delete(CameraFile),
    DiscardCapture,
    DiscardDelete(CameraFile),
    Done,
}

/// A device request that has settled, with its result.
#[derive(Debug)]
pub(crate) enum Settled {
    Previewed(Result<CameraFile, CameraError>),
    ViewfinderOff(AfterViewfinder, Result<(), CameraError>),
    Captured(Result<CameraFile, CameraError>),
    Downloaded(Result<CameraFile, CameraError>),
    Saved(Result<PathBuf, TetherError>),
    Deleted(Result<(), CameraError>),
    DiscardCaptured(Result<CameraFile, CameraError>),
    DiscardDeleted(Result<(), CameraError>),
}

/// Side effects a transition asks the automaton to perform.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    CaptureBegin,
    CaptureEnd,
    PreviewFrame(CameraFile),
    /// Ignore the companion file the camera will report for this stem.
    RememberDuplicate(String),
}

/// Settings read at the moment a request settles.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Policy {
    pub delete_after_download: bool,
}

#[derive(Debug)]
pub(crate) struct Task {
    kind: TaskKind,
    cancel: CancelToken,
    confirm: ConfirmToken,
    has_viewfinder: bool,
    /// Most recent file the task produced, preview frames included.
    latest: Option<CameraFile>,
    /// The real capture, once it has settled. Carries the payload after a
    /// successful download.
    shot: Option<CameraFile>,
    /// Where the real capture lives on the card.
    on_card: Option<CameraFile>,
    error: Option<TetherError>,
    cancelled: bool,
    effects: Vec<Effect>,
}

impl Task {
    /// Start a capture task. Emits capture-begin immediately.
    pub fn capture(cancel: CancelToken) -> Self {
        let mut task = Self::new(TaskKind::Capture, cancel, ConfirmToken::new(), false);
        task.effects.push(Effect::CaptureBegin);
        task
    }

    pub fn preview(cancel: CancelToken, confirm: ConfirmToken, has_viewfinder: bool) -> Self {
        Self::new(TaskKind::Preview, cancel, confirm, has_viewfinder)
    }

    fn new(kind: TaskKind, cancel: CancelToken, confirm: ConfirmToken, has_viewfinder: bool) -> Self {
        cancel.reset();
        confirm.reset();
        Self {
            kind,
            cancel,
            confirm,
            has_viewfinder,
            latest: None,
            shot: None,
            on_card: None,
            error: None,
            cancelled: false,
            effects: Vec::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn latest(&self) -> Option<&CameraFile> {
        self.latest.as_ref()
    }

    pub fn first_step(&self) -> Step {
        match self.kind {
            TaskKind::Capture => Step::Capture,
            TaskKind::Preview => Step::Preview,
        }
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn advance(&mut self, settled: Settled, policy: Policy) -> Step {
        match settled {
            Settled::Previewed(Err(err)) => {
                if self.cancel.is_signalled() {
                    self.teardown()
                } else {
                    self.fail(err);
                    Step::Done
                }
            }
            Settled::Previewed(Ok(frame)) => {
                self.latest = Some(frame.clone());
                self.effects.push(Effect::PreviewFrame(frame));
                if self.cancel.is_signalled() {
                    self.teardown()
                } else if self.confirm.is_signalled() {
                    self.effects.push(Effect::CaptureBegin);
                    if self.has_viewfinder {
                        Step::ViewfinderOff(AfterViewfinder::Capture)
                    } else {
                        self.confirm.reset();
                        Step::Capture
                    }
                } else {
                    Step::Preview
                }
            }

            Settled::ViewfinderOff(after, result) => {
                if let Err(err) = result {
                    self.fail(err);
                }
                match after {
                    AfterViewfinder::Discard => Step::DiscardCapture,
                    AfterViewfinder::Capture if self.cancel.is_signalled() => {
                        // capture-begin already went out; close the pair.
                        self.effects.push(Effect::CaptureEnd);
                        self.cancelled = true;
                        Step::Done
                    }
                    AfterViewfinder::Capture => {
                        self.confirm.reset();
                        Step::Capture
                    }
                }
            }

            Settled::Captured(Err(CameraError::Cancelled { .. })) if self.cancel.is_signalled() => {
                self.effects.push(Effect::CaptureEnd);
                self.cancelled = true;
                Step::Done
            }
            Settled::Captured(Err(err)) => {
                self.effects.push(Effect::CaptureEnd);
                self.fail(err);
                Step::Done
            }
            Settled::Captured(Ok(file)) => {
                self.effects.push(Effect::CaptureEnd);
                self.latest = Some(file.clone());
                self.shot = Some(file.clone());
                self.on_card = Some(file.clone());
                if self.cancel.is_signalled() {
                    self.cancelled = true;
                    if policy.delete_after_download {
                        Step::Delete(file)
                    } else {
                        Step::Done
                    }
                } else {
                    Step::Download(file)
                }
            }

            Settled::Downloaded(Ok(file)) => {
                self.latest = Some(file.clone());
                self.shot = Some(file.clone());
                Step::Save(file)
            }
            Settled::Downloaded(Err(err)) => {
                self.fail(err);
                self.delete_from_card(policy)
            }

            Settled::Saved(Ok(_)) => self.delete_from_card(policy),
            Settled::Saved(Err(err)) => {
                // The card copy is the only one left.
                self.fail(err);
                Step::Done
            }

            Settled::Deleted(result) => {
                if let Err(err) = result {
                    self.fail(err);
                }
                Step::Done
            }

            Settled::DiscardCaptured(Err(err)) => {
                self.fail(err);
                Step::Done
            }
            Settled::DiscardCaptured(Ok(file)) => {
                self.latest = Some(file.clone());
                self.effects
                    .push(Effect::RememberDuplicate(file.stem().to_string()));
                Step::DiscardDelete(file)
            }

            Settled::DiscardDeleted(result) => {
                if let Err(err) = result {
                    self.fail(err);
                }
                Step::Done
            }
        }
    }

    /// Cancelled during live view.
    fn teardown(&mut self) -> Step {
        self.cancelled = true;
        if self.has_viewfinder {
            Step::ViewfinderOff(AfterViewfinder::Discard)
        } else {
            Step::DiscardCapture
        }
    }

    fn delete_from_card(&self, policy: Policy) -> Step {
        match &self.on_card {
            Some(file) if policy.delete_after_download => Step::Delete(file.clone()),
            _ => Step::Done,
        }
    }

    /// Record a failure. The first one wins.
    fn fail(&mut self, err: impl Into<TetherError>) {
        if self.error.is_none() {
            self.error = Some(err.into());
        }
    }

    pub fn finish(self) -> Result<TaskOutcome, TetherError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        match self.shot {
            Some(file) if !self.cancelled => Ok(TaskOutcome::Captured { file }),
            _ => Ok(TaskOutcome::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraOp;

    const KEEP: Policy = Policy {
        delete_after_download: false,
    };
    const DELETE: Policy = Policy {
        delete_after_download: true,
    };

    fn shot(name: &str) -> CameraFile {
        CameraFile::new("/DCIM", name)
    }

    fn frame() -> CameraFile {
        CameraFile::new("/", "preview.jpg").with_data(&b"frame"[..], "image/jpeg")
    }

    fn failed(op: CameraOp) -> CameraError {
        CameraError::failed(op, "device busy")
    }

    #[test]
    fn test_capture_happy_path_deletes_after_download() {
        let mut task = Task::capture(CancelToken::new());
        assert_eq!(task.take_effects(), vec![Effect::CaptureBegin]);
        assert_eq!(task.first_step(), Step::Capture);

        let next = task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), DELETE);
        assert_eq!(next, Step::Download(shot("DSC0001.JPG")));
        assert_eq!(task.take_effects(), vec![Effect::CaptureEnd]);

        let downloaded = shot("DSC0001.JPG").with_data(&b"jpeg"[..], "image/jpeg");
        let next = task.advance(Settled::Downloaded(Ok(downloaded.clone())), DELETE);
        assert_eq!(next, Step::Save(downloaded.clone()));

        let next = task.advance(Settled::Saved(Ok(PathBuf::from("/shoot/IMG_0000.jpg"))), DELETE);
        assert_eq!(next, Step::Delete(shot("DSC0001.JPG")));

        assert_eq!(task.advance(Settled::Deleted(Ok(())), DELETE), Step::Done);
        match task.finish() {
            Ok(TaskOutcome::Captured { file }) => assert_eq!(file, downloaded),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_capture_keeps_file_when_policy_off() {
        let mut task = Task::capture(CancelToken::new());
        task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), KEEP);
        let next = task.advance(
            Settled::Downloaded(Ok(shot("DSC0001.JPG").with_data(&b"x"[..], "image/jpeg"))),
            KEEP,
        );
        assert!(matches!(next, Step::Save(_)));
        let next = task.advance(Settled::Saved(Ok(PathBuf::from("/shoot/IMG_0000.jpg"))), KEEP);
        assert_eq!(next, Step::Done);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Captured { .. })));
    }

    #[test]
    fn test_capture_failure_still_closes_pair() {
        let mut task = Task::capture(CancelToken::new());
        task.take_effects();
        let next = task.advance(Settled::Captured(Err(failed(CameraOp::Capture))), DELETE);
        assert_eq!(next, Step::Done);
        assert_eq!(task.take_effects(), vec![Effect::CaptureEnd]);
        assert!(matches!(
            task.finish(),
            Err(TetherError::OperationFailed {
                op: CameraOp::Capture,
                ..
            })
        ));
    }

    #[test]
    fn test_cancel_at_capture_settle_skips_download() {
        let cancel = CancelToken::new();
        let mut task = Task::capture(cancel.clone());
        cancel.signal();

        let next = task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), DELETE);
        assert_eq!(next, Step::Delete(shot("DSC0001.JPG")));
        task.advance(Settled::Deleted(Ok(())), DELETE);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Cancelled)));

        let cancel = CancelToken::new();
        let mut task = Task::capture(cancel.clone());
        cancel.signal();
        let next = task.advance(Settled::Captured(Ok(shot("DSC0002.JPG"))), KEEP);
        assert_eq!(next, Step::Done);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Cancelled)));
    }

    #[test]
    fn test_capture_aborted_by_device_on_cancel() {
        let cancel = CancelToken::new();
        let mut task = Task::capture(cancel.clone());
        task.take_effects();
        cancel.signal();

        let next = task.advance(
            Settled::Captured(Err(CameraError::Cancelled {
                op: CameraOp::Capture,
            })),
            DELETE,
        );
        assert_eq!(next, Step::Done);
        assert_eq!(task.take_effects(), vec![Effect::CaptureEnd]);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Cancelled)));
    }

    #[test]
    fn test_download_error_wins_over_delete_error() {
        let mut task = Task::capture(CancelToken::new());
        task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), DELETE);

        let next = task.advance(Settled::Downloaded(Err(failed(CameraOp::Download))), DELETE);
        assert_eq!(next, Step::Delete(shot("DSC0001.JPG")));
        task.advance(Settled::Deleted(Err(failed(CameraOp::Delete))), DELETE);

        assert!(matches!(
            task.finish(),
            Err(TetherError::OperationFailed {
                op: CameraOp::Download,
                ..
            })
        ));
    }

    #[test]
    fn test_save_failure_keeps_card_copy_and_fails_task() {
        let mut task = Task::capture(CancelToken::new());
        task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), DELETE);
        task.advance(
            Settled::Downloaded(Ok(shot("DSC0001.JPG").with_data(&b"x"[..], "image/jpeg"))),
            DELETE,
        );

        let next = task.advance(Settled::Saved(Err(TetherError::NoFilenameAvailable)), DELETE);
        assert_eq!(next, Step::Done);
        assert!(matches!(task.finish(), Err(TetherError::NoFilenameAvailable)));
    }

    #[test]
    fn test_task_start_resets_tokens() {
        let cancel = CancelToken::new();
        let confirm = ConfirmToken::new();
        cancel.signal();
        confirm.signal();

        let task = Task::preview(cancel.clone(), confirm.clone(), false);
        assert!(!cancel.is_signalled());
        assert!(!confirm.is_signalled());
        assert_eq!(task.first_step(), Step::Preview);
    }

    #[test]
    fn test_preview_loops_until_confirm() {
        let confirm = ConfirmToken::new();
        let mut task = Task::preview(CancelToken::new(), confirm.clone(), false);

        assert_eq!(task.advance(Settled::Previewed(Ok(frame())), KEEP), Step::Preview);
        assert_eq!(task.take_effects(), vec![Effect::PreviewFrame(frame())]);

        confirm.signal();
        assert_eq!(task.advance(Settled::Previewed(Ok(frame())), KEEP), Step::Capture);
        assert!(!confirm.is_signalled());
        assert_eq!(
            task.take_effects(),
            vec![Effect::PreviewFrame(frame()), Effect::CaptureBegin]
        );
        assert_eq!(task.latest(), Some(&frame()));
    }

    #[test]
    fn test_confirm_with_viewfinder_turns_it_off_first() {
        let confirm = ConfirmToken::new();
        let mut task = Task::preview(CancelToken::new(), confirm.clone(), true);
        confirm.signal();

        let next = task.advance(Settled::Previewed(Ok(frame())), KEEP);
        assert_eq!(next, Step::ViewfinderOff(AfterViewfinder::Capture));

        let next = task.advance(
            Settled::ViewfinderOff(AfterViewfinder::Capture, Ok(())),
            KEEP,
        );
        assert_eq!(next, Step::Capture);
        assert!(!confirm.is_signalled());
    }

    #[test]
    fn test_cancel_after_confirm_with_viewfinder_closes_pair() {
        let cancel = CancelToken::new();
        let confirm = ConfirmToken::new();
        let mut task = Task::preview(cancel.clone(), confirm.clone(), true);
        confirm.signal();
        task.advance(Settled::Previewed(Ok(frame())), KEEP);
        task.take_effects();

        cancel.signal();
        let next = task.advance(
            Settled::ViewfinderOff(AfterViewfinder::Capture, Ok(())),
            KEEP,
        );
        assert_eq!(next, Step::Done);
        assert_eq!(task.take_effects(), vec![Effect::CaptureEnd]);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Cancelled)));
    }

    #[test]
    fn test_cancel_without_viewfinder_discards_one_capture() {
        let cancel = CancelToken::new();
        let mut task = Task::preview(cancel.clone(), ConfirmToken::new(), false);
        cancel.signal();

        assert_eq!(
            task.advance(Settled::Previewed(Ok(frame())), KEEP),
            Step::DiscardCapture
        );
        task.take_effects();

        let next = task.advance(Settled::DiscardCaptured(Ok(shot("DSC0007.JPG"))), KEEP);
        assert_eq!(next, Step::DiscardDelete(shot("DSC0007.JPG")));
        assert_eq!(
            task.take_effects(),
            vec![Effect::RememberDuplicate("DSC0007".to_string())]
        );

        assert_eq!(task.advance(Settled::DiscardDeleted(Ok(())), KEEP), Step::Done);
        assert!(matches!(task.finish(), Ok(TaskOutcome::Cancelled)));
    }

    #[test]
    fn test_cancel_with_viewfinder_turns_it_off_then_discards() {
        let cancel = CancelToken::new();
        let mut task = Task::preview(cancel.clone(), ConfirmToken::new(), true);
        cancel.signal();

        let next = task.advance(Settled::Previewed(Err(failed(CameraOp::Preview))), KEEP);
        assert_eq!(next, Step::ViewfinderOff(AfterViewfinder::Discard));

        let next = task.advance(
            Settled::ViewfinderOff(AfterViewfinder::Discard, Ok(())),
            KEEP,
        );
        assert_eq!(next, Step::DiscardCapture);
    }

    #[test]
    fn test_preview_failure_without_cancel_ends_task() {
        let mut task = Task::preview(CancelToken::new(), ConfirmToken::new(), false);
        let next = task.advance(Settled::Previewed(Err(failed(CameraOp::Preview))), KEEP);
        assert_eq!(next, Step::Done);
        assert!(task.finish().is_err());
    }

    #[test]
    fn test_discard_failure_is_task_error() {
        let cancel = CancelToken::new();
        let mut task = Task::preview(cancel.clone(), ConfirmToken::new(), false);
        cancel.signal();
        task.advance(Settled::Previewed(Ok(frame())), KEEP);

        let next = task.advance(Settled::DiscardCaptured(Err(failed(CameraOp::Capture))), KEEP);
        assert_eq!(next, Step::Done);
        assert!(matches!(
            task.finish(),
            Err(TetherError::OperationFailed {
                op: CameraOp::Capture,
                ..
            })
        ));
    }

    #[test]
    fn test_viewfinder_failure_is_recorded_but_flow_continues() {
        let confirm = ConfirmToken::new();
        let mut task = Task::preview(CancelToken::new(), confirm.clone(), true);
        confirm.signal();
        task.advance(Settled::Previewed(Ok(frame())), KEEP);

        let next = task.advance(
            Settled::ViewfinderOff(
                AfterViewfinder::Capture,
                Err(failed(CameraOp::Viewfinder)),
            ),
            KEEP,
        );
        assert_eq!(next, Step::Capture);
        task.advance(Settled::Captured(Ok(shot("DSC0001.JPG"))), KEEP);
        task.advance(Settled::Downloaded(Ok(shot("DSC0001.JPG"))), KEEP);
        task.advance(Settled::Saved(Ok(PathBuf::from("/shoot/IMG_0000.jpg"))), KEEP);
        assert!(matches!(
            task.finish(),
            Err(TetherError::OperationFailed {
                op: CameraOp::Viewfinder,
                ..
            })
        ));
    }
}
