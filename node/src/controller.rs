//! Capture controller – owns the sensor poll loop and drives each trigger
//! through record, encode and handoff.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use burrowcam_common::clip::ClipName;
use burrowcam_common::config::NodeConfig;
use burrowcam_common::storage::free_space_pct;

use crate::capture::Capturer;
use crate::queue::ClipQueue;
use crate::sensor::{DebounceGate, GateState, RangeSensor};

/// Sensor poll cadence. Well under the debounce window so a hold is
/// sampled several times before it fires.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pause after a failed sensor read before polling again.
const SENSOR_RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Armed,
    Recording,
    Encoding,
    Handoff,
}

/// What a fired trigger ended up doing.
#[derive(Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Free-space gate refused the capture.
    Skipped,
    /// Encoded clip sitting in staging, ready for handoff.
    Clip(PathBuf),
    /// Record or encode failed; staging was cleaned up.
    Dropped,
}

pub struct CaptureController {
    sensor: Box<dyn RangeSensor>,
    capturer: Box<dyn Capturer>,
    gate: DebounceGate,
    node_id: String,
    staging_dir: PathBuf,
    data_dir: PathBuf,
    duration: Duration,
    min_free_percent: f64,
    state: CaptureState,
}

impl CaptureController {
    pub fn new(
        config: &NodeConfig,
        sensor: Box<dyn RangeSensor>,
        capturer: Box<dyn Capturer>,
    ) -> Result<Self> {
        let staging_dir = config.staging_dir();
        std::fs::create_dir_all(&staging_dir)
            .with_context(|| format!("Cannot create staging dir {}", staging_dir.display()))?;
        Ok(CaptureController {
            sensor,
            capturer,
            gate: DebounceGate::new(
                config.sensor.threshold_mm,
                Duration::from_millis(config.sensor.debounce_ms),
            ),
            node_id: config.node_id.clone(),
            staging_dir,
            data_dir: config.data_dir.clone(),
            duration: Duration::from_secs(config.recording.duration_s),
            min_free_percent: config.storage.min_free_percent,
            state: CaptureState::Idle,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Run one fired trigger to completion. The free-space reading is
    /// passed in so the gate is applied to the same probe that was logged.
    pub fn on_trigger(&mut self, distance_mm: u32, free_space_pct: f64) -> TriggerOutcome {
        if free_space_pct < self.min_free_percent {
            warn!(
                "Skipping capture at {distance_mm}mm: {free_space_pct:.1}% free is below the {:.1}% floor",
                self.min_free_percent
            );
            self.state = CaptureState::Idle;
            return TriggerOutcome::Skipped;
        }

        let name = ClipName::new(&self.node_id, Utc::now());
        let raw_path = self.staging_dir.join(name.raw_file_name());
        let clip_path = self.staging_dir.join(name.file_name());

        self.state = CaptureState::Recording;
        info!("Motion at {distance_mm}mm, recording {name}");
        if let Err(e) = self.capturer.record(&raw_path, self.duration) {
            error!("Recording failed: {e:#}");
            remove_quiet(&raw_path);
            self.state = CaptureState::Idle;
            return TriggerOutcome::Dropped;
        }

        self.state = CaptureState::Encoding;
        if let Err(e) = self.capturer.encode(&raw_path, &clip_path) {
            error!("Encoding failed, dropping {name}: {e:#}");
            remove_quiet(&raw_path);
            remove_quiet(&clip_path);
            self.state = CaptureState::Idle;
            return TriggerOutcome::Dropped;
        }
        remove_quiet(&raw_path);

        self.state = CaptureState::Handoff;
        TriggerOutcome::Clip(clip_path)
    }

    /// Poll loop, run on the main thread until shutdown. Finished clips go
    /// to the delivery thread; if its channel is full they fall back to
    /// the retry queue so capture never blocks on the network.
    pub fn run(&mut self, shutdown: &AtomicBool, handoff: &SyncSender<PathBuf>, queue: &ClipQueue) {
        info!(
            "Watching sensor: threshold {}mm, debounce {}ms",
            self.gate.threshold_mm(),
            self.gate.debounce().as_millis()
        );
        while !shutdown.load(Ordering::Relaxed) {
            let distance = match self.sensor.read_distance_mm() {
                Ok(d) => d,
                Err(e) => {
                    warn!("Sensor read failed: {e:#}");
                    std::thread::sleep(SENSOR_RETRY_PAUSE);
                    continue;
                }
            };
            match self.gate.observe(distance, Instant::now()) {
                GateState::Fired => {
                    let free = match free_space_pct(&self.data_dir) {
                        Ok(pct) => pct,
                        Err(e) => {
                            warn!("Cannot probe free space: {e:#}");
                            -1.0
                        }
                    };
                    if let TriggerOutcome::Clip(clip) = self.on_trigger(distance, free) {
                        if let Err(e) = handoff.try_send(clip.clone()) {
                            warn!("Delivery backlog, queueing {}: {e}", clip.display());
                            if let Err(qe) = queue.enqueue(&clip) {
                                error!("Cannot queue {}: {qe:#}", clip.display());
                            }
                        }
                    }
                    self.state = CaptureState::Idle;
                }
                GateState::Armed => {
                    if self.state == CaptureState::Idle {
                        debug!("Armed at {distance}mm");
                    }
                    self.state = CaptureState::Armed;
                }
                GateState::Idle => self.state = CaptureState::Idle,
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        info!("Capture loop finished");
    }
}

fn remove_quiet(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Cannot remove {}: {e}", path.display());
        }
    }
}

// ─── tests ───────────────────────────────────────────────────────────
