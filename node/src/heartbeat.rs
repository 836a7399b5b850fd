//! Heartbeat reporter – posts node status to the hub on a fixed interval
//! and backs off (doubling, capped) while the hub is unreachable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use burrowcam_common::config::NodeConfig;
use burrowcam_common::protocol::{Heartbeat, AUTH_HEADER};
use burrowcam_common::storage::free_space_pct;

use crate::deliver::{classify_status, TransportError};
use crate::queue::ClipQueue;

/// How long one heartbeat POST may take.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(6);

/// Capped exponential backoff. Failures double the next delay up to the
/// cap; a success snaps back to the base interval.
struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(base);
        Backoff {
            base,
            cap,
            current: base,
        }
    }

    /// Delay to sleep before the next attempt.
    fn next_delay(&mut self, ok: bool) -> Duration {
        if ok {
            self.current = self.base;
            return self.base;
        }
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.cap, |d| d.min(self.cap));
        delay
    }

    /// Jump straight to the cap. Used when the hub actively rejects us
    /// and hammering it would change nothing.
    fn saturate(&mut self) {
        self.current = self.cap;
    }
}

pub struct HeartbeatReporter {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: String,
    node_id: String,
    data_dir: PathBuf,
    queue: ClipQueue,
    interval: Duration,
    max_interval: Duration,
    hostname: Option<String>,
}

impl HeartbeatReporter {
    pub fn new(config: &NodeConfig, queue: ClipQueue) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HEARTBEAT_TIMEOUT)
            .build()
            .context("Cannot build HTTP client")?;
        let hostname = hostname::get().ok().and_then(|h| h.into_string().ok());
        Ok(HeartbeatReporter {
            client,
            endpoint: config.heartbeat_endpoint(),
            token: config.auth_token.clone(),
            node_id: config.node_id.clone(),
            data_dir: config.data_dir.clone(),
            queue,
            interval: Duration::from_secs(config.heartbeat_interval_sec),
            max_interval: Duration::from_secs(config.heartbeat_max_interval_sec),
            hostname,
        })
    }

    fn payload(&self) -> Heartbeat {
        let free_space_pct = match free_space_pct(&self.data_dir) {
            Ok(pct) => (pct * 100.0).round() / 100.0,
            Err(e) => {
                warn!("Cannot probe free space: {e:#}");
                -1.0
            }
        };
        Heartbeat {
            node_id: self.node_id.clone(),
            version: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            hostname: self.hostname.clone(),
            free_space_pct,
            queue_len: self.queue.len(),
        }
    }

    fn send_once(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTH_HEADER, &self.token)
            .json(&self.payload())
            .send()
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        classify_status(response.status().as_u16())
    }

    /// Body of the heartbeat thread. Never gives up: a rejected token is
    /// logged loudly and retried at the cap in case the hub gets fixed.
    pub fn run(&self, shutdown: &AtomicBool) {
        let mut backoff = Backoff::new(self.interval, self.max_interval);
        while !shutdown.load(Ordering::Relaxed) {
            let delay = match self.send_once() {
                Ok(()) => {
                    debug!("Heartbeat acknowledged");
                    backoff.next_delay(true)
                }
                Err(e @ TransportError::Unauthorized { .. }) => {
                    error!("Heartbeat rejected: {e}; retrying at the backoff cap");
                    backoff.saturate();
                    backoff.next_delay(false)
                }
                Err(TransportError::Transient(reason)) => {
                    warn!("Heartbeat failed: {reason}");
                    backoff.next_delay(false)
                }
            };
            sleep_interruptible(delay, shutdown);
        }
        info!("Heartbeat thread finished");
    }
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(250);
    let mut slept = Duration::ZERO;
    while slept < total && !shutdown.load(Ordering::Relaxed) {
        let chunk = step.min(total - slept);
        std::thread::sleep(chunk);
        slept += chunk;
    }
}

// ─── tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new(secs(10), secs(30));
        assert_eq!(b.next_delay(false), secs(10));
        assert_eq!(b.next_delay(false), secs(20));
        assert_eq!(b.next_delay(false), secs(30));
        assert_eq!(b.next_delay(false), secs(30));
        assert_eq!(b.next_delay(true), secs(10));
        assert_eq!(b.next_delay(true), secs(10));
    }

    #[test]
    fn test_saturate_jumps_to_cap() {
        let mut b = Backoff::new(secs(10), secs(60));
        b.saturate();
        assert_eq!(b.next_delay(false), secs(60));
        assert_eq!(b.next_delay(true), secs(10));
    }

    #[test]
    fn test_cap_never_below_base() {
        let mut b = Backoff::new(secs(10), secs(5));
        assert_eq!(b.next_delay(false), secs(10));
        assert_eq!(b.next_delay(false), secs(10));
    }

    #[test]
    fn test_backoff_survives_huge_intervals() {
        // Doubling this base overflows Duration; the delay must pin to
        // the cap instead of panicking.
        let base = secs(u64::MAX / 2 + 1);
        let cap = secs(u64::MAX);
        let mut b = Backoff::new(base, cap);
        assert_eq!(b.next_delay(false), base);
        assert_eq!(b.next_delay(false), cap);
        assert_eq!(b.next_delay(false), cap);
    }

    fn node_config(data_dir: &Path) -> NodeConfig {
        let text = format!(
            r#"
            node_id = "burrow01"
            hub_url = "http://127.0.0.1:9"
            auth_token = "secret"
            data_dir = "{}"

            [sensor]
            threshold_mm = 400
            debounce_ms = 150

            [recording]
            resolution = "1280x720"
            framerate = 30
            duration_s = 8
            "#,
            data_dir.display()
        );
        NodeConfig::parse(&text).unwrap()
    }

    #[test]
    fn test_payload_reports_queue_depth_and_free_space() {
        let dir = std::env::temp_dir().join(format!(
            "burrowcam_heartbeat_payload_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let config = node_config(&dir);
        let queue = ClipQueue::open(&config.queue_dir()).unwrap();
        std::fs::write(dir.join("queue/burrow01_20250809T020000Z.mp4"), b"a").unwrap();
        std::fs::write(dir.join("queue/burrow01_20250809T030000Z.mp4"), b"b").unwrap();

        let reporter = HeartbeatReporter::new(&config, queue).unwrap();
        let hb = reporter.payload();
        assert_eq!(hb.node_id, "burrow01");
        assert_eq!(hb.queue_len, 2);
        assert!(hb.version.starts_with("burrowcam-node/"));
        assert!((0.0..=100.0).contains(&hb.free_space_pct));
    }
}
