//! Burrowcam Node – watches a range sensor at the burrow mouth, records a
//! short clip on each debounced trigger and delivers it to the hub,
//! queueing on disk whenever the hub is unreachable.

mod capture;
mod controller;
mod deliver;
mod heartbeat;
mod queue;
mod sensor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use anyhow::{Context, Result};
use tracing::info;

use burrowcam_common::config::NodeConfig;

use crate::capture::ProcessCapturer;
use crate::controller::CaptureController;
use crate::deliver::Uploader;
use crate::heartbeat::HeartbeatReporter;
use crate::queue::ClipQueue;
use crate::sensor::IioRangeSensor;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

const DEFAULT_CONFIG_PATH: &str = "/etc/burrowcam/node.toml";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = NodeConfig::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    info!(
        "Burrowcam node '{}' starting (v{}, hub={})",
        config.node_id,
        env!("CARGO_PKG_VERSION"),
        config.hub_url
    );

    // ── prepare working directories ──────────────────────────────────
    let staging = config.staging_dir();
    std::fs::create_dir_all(&staging)
        .with_context(|| format!("Cannot create staging dir {}", staging.display()))?;
    let removed = queue::sweep_staging(&staging)?;
    if removed > 0 {
        info!("Swept {removed} stale partial(s) from staging");
    }
    let clip_queue = ClipQueue::open(&config.queue_dir()).context("Cannot open retry queue")?;
    if !clip_queue.is_empty() {
        info!("{} clip(s) waiting in the retry queue", clip_queue.len());
    }

    // ── ctrl-c ───────────────────────────────────────────────────────
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── heartbeat thread ─────────────────────────────────────────────
    let reporter = HeartbeatReporter::new(&config, clip_queue.clone())?;
    let heartbeat_thread = std::thread::Builder::new()
        .name("heartbeat".into())
        .spawn(move || reporter.run(&SHUTDOWN))
        .context("Cannot spawn heartbeat thread")?;

    // ── queue-drain thread ───────────────────────────────────────────
    let drain_uploader = Uploader::new(config.clips_endpoint(), config.auth_token.clone())?;
    let drain_queue = clip_queue.clone();
    let drain_thread = std::thread::Builder::new()
        .name("queue-drain".into())
        .spawn(move || deliver::drain_loop(&drain_uploader, &drain_queue, &SHUTDOWN))
        .context("Cannot spawn queue-drain thread")?;

    // ── delivery thread ──────────────────────────────────────────────
    let (clip_tx, clip_rx) = mpsc::sync_channel::<PathBuf>(16);
    let fresh_uploader = Uploader::new(config.clips_endpoint(), config.auth_token.clone())?;
    let fresh_queue = clip_queue.clone();
    let delivery_thread = std::thread::Builder::new()
        .name("delivery".into())
        .spawn(move || {
            while let Ok(clip) = clip_rx.recv() {
                fresh_uploader.deliver(&clip, &fresh_queue);
            }
            info!("Delivery thread finished");
        })
        .context("Cannot spawn delivery thread")?;

    // ── capture loop (main thread) ───────────────────────────────────
    let sensor = IioRangeSensor::new(&config.sensor.device);
    let capturer = ProcessCapturer::new(&config.recording);
    let mut controller = CaptureController::new(&config, Box::new(sensor), Box::new(capturer))?;
    controller.run(&SHUTDOWN, &clip_tx, &clip_queue);

    // Signal the delivery thread to finish
    drop(clip_tx);
    delivery_thread.join().ok();
    heartbeat_thread.join().ok();
    drain_thread.join().ok();

    info!("Burrowcam node stopped");
    Ok(())
}
