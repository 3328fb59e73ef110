//! Terminal rendering of automaton events.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use owo_colors::OwoColorize;
use tether::{AutomatonEvent, AutomatonPublisher, CameraFile, ConfirmToken};

pub struct Console {
    confirm: ConfirmToken,
    /// Raise confirm by itself after this many live-view frames.
    auto_confirm_after: Option<usize>,
    frames: AtomicUsize,
    last_frame: Mutex<Option<CameraFile>>,
    saved: Mutex<Vec<PathBuf>>,
}

impl Console {
    pub fn new(confirm: ConfirmToken, auto_confirm_after: Option<usize>) -> Self {
        Self {
            confirm,
            auto_confirm_after,
            frames: AtomicUsize::new(0),
            last_frame: Mutex::new(None),
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<CameraFile> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AutomatonPublisher for Console {
    fn publish(&self, event: AutomatonEvent) {
        match event {
            AutomatonEvent::CaptureBegin => {
                if self.frames() > 0 {
                    println!();
                }
                println!("{} shutter", "●".red());
            }
            AutomatonEvent::CaptureEnd => println!("  released"),
            AutomatonEvent::PreviewFrame(frame) => {
                let n = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
                let size = frame.data.as_ref().map_or(0, |d| d.len());
                print!("\r  live view frame {} ({} bytes)", n.bold(), size);
                let _ = std::io::stdout().flush();
                *self.last_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
                if self.auto_confirm_after == Some(n) {
                    self.confirm.signal();
                }
            }
            AutomatonEvent::ImageSaved(path) => {
                println!("{} saved {}", "✓".green(), path.display().bright_white());
                self.saved
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(path);
            }
            AutomatonEvent::SaveFailed { file, error } => {
                eprintln!(
                    "{} {} left on the camera: {}",
                    "✗".red(),
                    file.device_path().bright_white(),
                    error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> CameraFile {
        CameraFile::new("/", "preview.jpg").with_data(&b"frame"[..], "image/jpeg")
    }

    #[test]
    fn test_auto_confirm_after_frames() {
        let confirm = ConfirmToken::new();
        let console = Console::new(confirm.clone(), Some(2));

        console.publish(AutomatonEvent::PreviewFrame(frame()));
        assert!(!confirm.is_signalled());
        console.publish(AutomatonEvent::PreviewFrame(frame()));
        assert!(confirm.is_signalled());
        assert_eq!(console.frames(), 2);
        assert_eq!(console.last_frame(), Some(frame()));
    }

    #[test]
    fn test_saved_paths_are_collected() {
        let console = Console::new(ConfirmToken::new(), None);
        console.publish(AutomatonEvent::ImageSaved(PathBuf::from("/tmp/capture000000.jpg")));
        assert_eq!(console.saved(), vec![PathBuf::from("/tmp/capture000000.jpg")]);
    }
}
