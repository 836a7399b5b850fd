//! Clip recording – spawns `rpicam-vid` and `ffmpeg` as child processes.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use burrowcam_common::config::{RecordingSection, Resolution};

/// Capability seam for the camera, so the capture state machine can be
/// exercised without hardware.
pub trait Capturer: Send {
    /// Record raw H.264 to `raw_path`, blocking for the clip duration.
    /// The camera is exclusive; at most one recording runs at a time.
    fn record(&mut self, raw_path: &Path, duration: Duration) -> Result<()>;

    /// Wrap the raw stream into its final `.mp4` container.
    fn encode(&mut self, raw_path: &Path, clip_path: &Path) -> Result<()>;
}

/// Drives the Pi camera stack: `rpicam-vid` writes the raw stream,
/// `ffmpeg -c copy` remuxes it without re-encoding.
pub struct ProcessCapturer {
    resolution: Resolution,
    framerate: u32,
}

impl ProcessCapturer {
    pub fn new(recording: &RecordingSection) -> Self {
        ProcessCapturer {
            resolution: recording.resolution,
            framerate: recording.framerate,
        }
    }
}

impl Capturer for ProcessCapturer {
    fn record(&mut self, raw_path: &Path, duration: Duration) -> Result<()> {
        let ms = duration.as_millis().to_string();
        let width = self.resolution.width.to_string();
        let height = self.resolution.height.to_string();
        let fps = self.framerate.to_string();

        let mut cmd = Command::new("rpicam-vid");
        cmd.args([
            "--nopreview",
            "-t",
            &ms,
            "--width",
            &width,
            "--height",
            &height,
            "--framerate",
            &fps,
            "--codec",
            "h264",
            "-o",
        ]);
        cmd.arg(raw_path);
        cmd.stdout(Stdio::null());

        debug!(
            "Spawning: rpicam-vid -t {ms} --width {width} --height {height} \
             --framerate {fps} -o {}",
            raw_path.display()
        );
        let output = cmd
            .output()
            .context("Failed to run rpicam-vid (is the camera stack installed?)")?;
        if !output.status.success() {
            bail!(
                "rpicam-vid exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let meta = std::fs::metadata(raw_path)
            .with_context(|| format!("No recording produced at {}", raw_path.display()))?;
        if meta.len() == 0 {
            bail!("rpicam-vid produced an empty stream: {}", raw_path.display());
        }
        Ok(())
    }

    fn encode(&mut self, raw_path: &Path, clip_path: &Path) -> Result<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"]);
        cmd.arg(raw_path);
        cmd.args(["-c", "copy"]);
        cmd.arg(clip_path);
        cmd.stdout(Stdio::null());

        debug!(
            "Spawning: ffmpeg -y -i {} -c copy {}",
            raw_path.display(),
            clip_path.display()
        );
        let output = cmd.output().context("Failed to run ffmpeg")?;
        if !output.status.success() {
            bail!(
                "ffmpeg remux exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
