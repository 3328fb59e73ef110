//! Subcommand implementations.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use tether::{CameraFile, CancelToken, ConfirmToken, Session, TaskOutcome};
use tetherconf::{ConfigSources, TetherConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::console::Console;
use crate::studio::{open_session, CameraArgs, Studio};

/// Raise `cancel` and `interrupted` on Ctrl-C.
fn watch_interrupt(cancel: CancelToken) -> CancellationToken {
    let interrupted = CancellationToken::new();
    let token = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            token.cancel();
            cancel.signal();
        }
    });
    interrupted
}

pub async fn capture(config: &TetherConfig, args: &CameraArgs, count: u32, keep: bool) -> Result<()> {
    let console = Arc::new(Console::new(ConfirmToken::new(), None));
    let studio = Studio::open(config, args, console.clone()).await?;
    if keep {
        studio.automaton.set_delete_after_download(false);
    }

    let cancel = CancelToken::new();
    let interrupted = watch_interrupt(cancel.clone());
    let shutdown = CancellationToken::new();
    let poller = studio.spawn_poller(shutdown.clone(), true);

    let mut result = Ok(());
    for n in 1..=count {
        if interrupted.is_cancelled() {
            break;
        }
        match studio.automaton.capture(&cancel).await {
            Ok(TaskOutcome::Captured { file }) => {
                info!(shot = n, name = %file.name, "captured");
            }
            Ok(TaskOutcome::Cancelled) => {
                println!("{}", "cancelled".yellow());
                break;
            }
            Err(e) => {
                result = Err(e).with_context(|| format!("capture {n} of {count} failed"));
                break;
            }
        }
    }

    shutdown.cancel();
    poller.await?;
    studio.drain().await?;
    println!("{} image(s) saved", console.saved().len());
    result
}

pub async fn preview(
    config: &TetherConfig,
    args: &CameraArgs,
    frames: Option<usize>,
    keep_frame: bool,
) -> Result<()> {
    let confirm = ConfirmToken::new();
    let console = Arc::new(Console::new(confirm.clone(), frames));
    let studio = Studio::open(config, args, console.clone()).await?;

    let cancel = CancelToken::new();
    let _interrupted = watch_interrupt(cancel.clone());
    // Detached: a blocked stdin read must not hold up runtime shutdown.
    std::thread::spawn({
        let confirm = confirm.clone();
        move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
                confirm.signal();
            }
        }
    });
    println!("live view: {} to shoot, {} to abort", "Enter".bold(), "Ctrl-C".bold());

    let shutdown = CancellationToken::new();
    let poller = studio.spawn_poller(shutdown.clone(), true);
    let outcome = studio.automaton.preview(&cancel, &confirm).await;
    shutdown.cancel();
    poller.await?;
    studio.drain().await?;
    println!();

    if keep_frame {
        match console.last_frame() {
            Some(frame) => save_frame(&studio, &frame)?,
            None => warn!("no live view frame to keep"),
        }
    }

    match outcome.context("preview failed")? {
        TaskOutcome::Captured { file } => info!(name = %file.name, "captured"),
        TaskOutcome::Cancelled => println!("{}", "cancelled".yellow()),
    }
    Ok(())
}

fn save_frame(studio: &Studio, frame: &CameraFile) -> Result<()> {
    let Some(data) = &frame.data else {
        return Ok(());
    };
    let path = studio
        .session
        .lock()
        .map_err(|_| anyhow::anyhow!("session lock poisoned"))?
        .temp_filename()?;
    std::fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
    println!("last frame kept at {}", path.display());
    Ok(())
}

/// Service camera events (shots taken on the body) until Ctrl-C.
pub async fn watch(config: &TetherConfig, args: &CameraArgs) -> Result<()> {
    let console = Arc::new(Console::new(ConfirmToken::new(), None));
    let studio = Studio::open(config, args, console.clone()).await?;

    let interrupted = watch_interrupt(CancelToken::new());
    let poller = studio.spawn_poller(interrupted.clone(), false);
    println!("watching {} ({})", studio.camera.identity().model, "Ctrl-C to stop".dimmed());

    studio.automaton.run_events(interrupted).await;
    poller.await?;
    println!("{} image(s) saved", console.saved().len());
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ImageRow {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub fn image_rows(session: &Session) -> Vec<ImageRow> {
    session
        .images()
        .iter()
        .map(|image| ImageRow {
            name: image.basename().unwrap_or_default().to_string(),
            size: image.file_size(),
            modified: image.last_modified(),
        })
        .collect()
}

pub fn session_list(config: &TetherConfig, json: bool) -> Result<()> {
    let session = open_session(config)?;
    let session = session
        .lock()
        .map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
    let rows = image_rows(&session);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", session.directory().display().bold());
    for row in &rows {
        let modified = row
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<32} {:>12}  {}", row.name, row.size, modified.dimmed());
    }
    println!("{} image(s)", rows.len());
    Ok(())
}

pub fn session_next(config: &TetherConfig, source: &str) -> Result<()> {
    let session = open_session(config)?;
    let path = session
        .lock()
        .map_err(|_| anyhow::anyhow!("session lock poisoned"))?
        .next_filename(&CameraFile::new("/", source))
        .context("no filename available")?;
    println!("{}", path.display());
    Ok(())
}

pub fn show_config(config: &TetherConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# no config files found, using defaults");
    }
    for file in &sources.files {
        println!("# from {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env {var}");
    }
    print!("{}", config.to_toml());
}
