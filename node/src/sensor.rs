//! Range sensing and trigger debouncing.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Capability seam for the proximity sensor, so the capture logic can be
/// exercised without hardware.
pub trait RangeSensor: Send {
    /// Current distance to the nearest object, in millimetres.
    fn read_distance_mm(&mut self) -> Result<u32>;
}

/// Reads a sysfs/IIO attribute reporting integer millimetres, e.g. a
/// VL53L0X time-of-flight sensor bound to the kernel IIO driver.
pub struct IioRangeSensor {
    device: PathBuf,
}

impl IioRangeSensor {
    pub fn new(device: &Path) -> Self {
        IioRangeSensor {
            device: device.to_path_buf(),
        }
    }
}

impl RangeSensor for IioRangeSensor {
    fn read_distance_mm(&mut self) -> Result<u32> {
        let text = std::fs::read_to_string(&self.device)
            .with_context(|| format!("Cannot read sensor {}", self.device.display()))?;
        text.trim().parse().with_context(|| {
            format!(
                "Bad sensor reading '{}' from {}",
                text.trim(),
                self.device.display()
            )
        })
    }
}

/// Where the debounce gate currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Nothing in range.
    Idle,
    /// Below the threshold, waiting out the debounce window.
    Armed,
    /// Held below the threshold for the whole window; record now.
    Fired,
}

/// Turns raw distance readings into debounced triggers.
///
/// A trigger fires only when readings stay below the threshold for the
/// whole debounce window; one reading at or above the threshold disarms
/// and discards the candidate.
#[derive(Debug)]
pub struct DebounceGate {
    threshold_mm: u32,
    debounce: Duration,
    armed_at: Option<Instant>,
}

impl DebounceGate {
    pub fn new(threshold_mm: u32, debounce: Duration) -> Self {
        DebounceGate {
            threshold_mm,
            debounce,
            armed_at: None,
        }
    }

    pub fn observe(&mut self, distance_mm: u32, now: Instant) -> GateState {
        if distance_mm >= self.threshold_mm {
            self.armed_at = None;
            return GateState::Idle;
        }
        match self.armed_at {
            None => {
                self.armed_at = Some(now);
                GateState::Armed
            }
            Some(since) if now.duration_since(since) >= self.debounce => {
                self.armed_at = None;
                GateState::Fired
            }
            Some(_) => GateState::Armed,
        }
    }

    pub fn threshold_mm(&self) -> u32 {
        self.threshold_mm
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> DebounceGate {
        DebounceGate::new(1000, Duration::from_millis(200))
    }

    #[test]
    fn test_fires_after_continuous_hold() {
        let mut g = gate();
        let t0 = Instant::now();
        assert_eq!(g.observe(500, t0), GateState::Armed);
        assert_eq!(
            g.observe(480, t0 + Duration::from_millis(100)),
            GateState::Armed
        );
        assert_eq!(
            g.observe(510, t0 + Duration::from_millis(200)),
            GateState::Fired
        );
    }

    #[test]
    fn test_disarms_when_object_leaves() {
        let mut g = gate();
        let t0 = Instant::now();
        assert_eq!(g.observe(500, t0), GateState::Armed);
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(100)),
            GateState::Armed
        );
        // Rises above the threshold before the window elapses: no trigger.
        assert_eq!(
            g.observe(1500, t0 + Duration::from_millis(150)),
            GateState::Idle
        );
        // Coming back starts a fresh window.
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(210)),
            GateState::Armed
        );
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(300)),
            GateState::Armed
        );
    }

    #[test]
    fn test_threshold_boundary_disarms() {
        let mut g = gate();
        let t0 = Instant::now();
        assert_eq!(g.observe(999, t0), GateState::Armed);
        assert_eq!(
            g.observe(1000, t0 + Duration::from_millis(100)),
            GateState::Idle
        );
    }

    #[test]
    fn test_refire_needs_a_full_window() {
        let mut g = gate();
        let t0 = Instant::now();
        g.observe(500, t0);
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(200)),
            GateState::Fired
        );
        // Object still present right after firing: re-arms, no instant refire.
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(250)),
            GateState::Armed
        );
        assert_eq!(
            g.observe(500, t0 + Duration::from_millis(450)),
            GateState::Fired
        );
    }
}
