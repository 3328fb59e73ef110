//! Wiring of camera, session and automaton for one CLI invocation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tether::{Automaton, AutomatonPublisher, Camera, Session, SharedSession, SimulatedCamera};
use tetherconf::TetherConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CameraKind {
    /// In-process simulated body
    Sim,
}

#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// Camera backend
    #[arg(long, value_enum, default_value = "sim", global = true)]
    pub camera: CameraKind,

    /// Simulated body shoots RAW+JPEG pairs
    #[arg(long, global = true)]
    pub raw: bool,

    /// Simulated body has a mirror-up viewfinder mode
    #[arg(long, global = true)]
    pub viewfinder: bool,
}

pub fn open_session(config: &TetherConfig) -> Result<SharedSession> {
    let dir = &config.infra.paths.picture_dir;
    let mut session = Session::new(dir, &config.bootstrap.session.filename_pattern)
        .with_context(|| format!("failed to open session in {}", dir.display()))?;
    let loaded = session.load()?;
    info!(directory = %dir.display(), loaded, "session ready");
    Ok(session.into_shared())
}

pub struct Studio {
    pub automaton: Automaton,
    pub camera: Arc<dyn Camera>,
    pub session: SharedSession,
    event_wait: Duration,
}

impl Studio {
    pub async fn open(
        config: &TetherConfig,
        args: &CameraArgs,
        publisher: Arc<dyn AutomatonPublisher>,
    ) -> Result<Self> {
        let session = open_session(config)?;

        let camera: Arc<dyn Camera> = match args.camera {
            CameraKind::Sim => Arc::new(
                SimulatedCamera::new("Simulated DSLR")
                    .with_raw_pairs(args.raw)
                    .with_viewfinder(args.viewfinder),
            ),
        };
        if !camera.is_connected() {
            camera.connect().await.context("failed to connect camera")?;
        }
        // Stale events from before we attached are not ours to handle.
        camera.event_flush().await?;

        let capture = &config.bootstrap.capture;
        let automaton = Automaton::new(publisher);
        automaton.set_camera(Some(Arc::clone(&camera)));
        automaton.set_session(Some(Arc::clone(&session)));
        automaton.set_delete_after_download(capture.delete_after_download);
        automaton.set_preview_interval(Duration::from_millis(capture.preview_interval_ms));

        Ok(Self {
            automaton,
            camera,
            session,
            event_wait: Duration::from_millis(capture.event_wait_ms),
        })
    }

    /// Poll the camera for spontaneous events until `shutdown`. With
    /// `pump` set, also handle queued events on this task.
    pub fn spawn_poller(&self, shutdown: CancellationToken, pump: bool) -> JoinHandle<()> {
        let automaton = self.automaton.clone();
        let camera = Arc::clone(&self.camera);
        let wait = self.event_wait;

        tokio::spawn(async move {
            while !shutdown.is_cancelled() {
                if automaton.is_busy() {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                } else if let Err(e) = camera.event_wait(wait).await {
                    debug!(error = %e, "event poll failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                if pump {
                    automaton.pump_events().await;
                }
            }
        })
    }

    /// Collect anything still queued on the camera and handle it.
    pub async fn drain(&self) -> Result<()> {
        self.camera.event_wait(Duration::ZERO).await?;
        self.automaton.pump_events().await;
        Ok(())
    }
}
