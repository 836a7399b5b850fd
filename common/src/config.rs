//! Node and hub configuration.
//!
//! Both binaries load one TOML file at startup and treat it as immutable
//! for the life of the process; changing anything means a restart. Parse
//! or validation failures abort startup, which is the only fatal error
//! either binary has.
//!
//! Node side (`/etc/burrowcam/node.toml`):
//!
//! ```toml
//! node_id = "burrow01"
//! hub_url = "http://hub.local:5000"
//! auth_token = "shared-secret"
//! heartbeat_interval_sec = 10
//!
//! [sensor]
//! threshold_mm = 1000
//! debounce_ms = 200
//!
//! [recording]
//! resolution = "1280x720"
//! framerate = 30
//! duration_s = 10
//!
//! [storage]
//! min_free_percent = 10.0
//! ```
//!
//! Hub side (`/etc/burrowcam/hub.toml`):
//!
//! ```toml
//! listen_addr = "0.0.0.0:5000"
//! database = "/var/lib/burrowcam/hub.db"
//!
//! [storage]
//! base_dir = "/var/lib/burrowcam"
//! min_free_percent = 10.0
//!
//! [auth_tokens]
//! burrow01 = "shared-secret"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Minimum heartbeat cadence; lower configured values are clamped up.
pub const HEARTBEAT_FLOOR_SEC: u64 = 3;

// ── node ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: String,
    pub hub_url: String,
    pub auth_token: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_sec: u64,
    /// Cap for the heartbeat failure backoff.
    #[serde(default = "default_heartbeat_max_interval")]
    pub heartbeat_max_interval_sec: u64,
    /// Holds the `staging/` and `queue/` working directories. Must be on
    /// the filesystem where clips should survive hub outages.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub sensor: SensorSection,
    pub recording: RecordingSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorSection {
    /// Distances below this arm the debounce gate.
    pub threshold_mm: u32,
    /// How long the reading must stay below the threshold to trigger.
    pub debounce_ms: u64,
    /// Sysfs attribute exposing the current range as integer millimetres.
    #[serde(default = "default_sensor_device")]
    pub device: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingSection {
    pub resolution: Resolution,
    pub framerate: u32,
    pub duration_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    /// Captures are skipped while free space is below this.
    #[serde(default = "default_min_free_percent")]
    pub min_free_percent: f64,
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            min_free_percent: default_min_free_percent(),
        }
    }
}

/// Video frame size, written as `"1280x720"` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .with_context(|| format!("Expected WIDTHxHEIGHT, got '{s}'"))?;
        let width: u32 = w
            .trim()
            .parse()
            .with_context(|| format!("Bad width in resolution '{s}'"))?;
        let height: u32 = h
            .trim()
            .parse()
            .with_context(|| format!("Bad height in resolution '{s}'"))?;
        if width == 0 || height == 0 {
            bail!("Resolution dimensions must be positive: '{s}'");
        }
        Ok(Resolution { width, height })
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl NodeConfig {
    /// Load and validate a node config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Parse and validate from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        validate_node_id(&self.node_id)?;
        if self.auth_token.is_empty() {
            bail!("auth_token must not be empty");
        }
        self.hub_url = normalize_url(&self.hub_url)?;
        if self.sensor.threshold_mm == 0 {
            bail!("sensor.threshold_mm must be positive");
        }
        if self.recording.framerate == 0 {
            bail!("recording.framerate must be positive");
        }
        if self.recording.duration_s == 0 {
            bail!("recording.duration_s must be positive");
        }
        validate_min_free(self.storage.min_free_percent)?;
        if self.heartbeat_interval_sec < HEARTBEAT_FLOOR_SEC {
            warn!(
                "heartbeat_interval_sec {} is below the {}s floor; clamping",
                self.heartbeat_interval_sec, HEARTBEAT_FLOOR_SEC
            );
            self.heartbeat_interval_sec = HEARTBEAT_FLOOR_SEC;
        }
        if self.heartbeat_max_interval_sec < self.heartbeat_interval_sec {
            warn!(
                "heartbeat_max_interval_sec {} is below the base interval; clamping",
                self.heartbeat_max_interval_sec
            );
            self.heartbeat_max_interval_sec = self.heartbeat_interval_sec;
        }
        Ok(())
    }

    /// Where clips are assembled before handoff. Same filesystem as the
    /// queue so the failure-path move is one atomic rename.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    /// Durable retry queue directory.
    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn clips_endpoint(&self) -> String {
        format!("{}/api/v1/clips", self.hub_url)
    }

    pub fn heartbeat_endpoint(&self) -> String {
        format!("{}/api/v1/heartbeat", self.hub_url)
    }
}

// ── hub ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub storage: HubStorageSection,
    /// node_id → shared secret. Requests matching no entry are rejected.
    #[serde(default)]
    pub auth_tokens: HashMap<String, String>,
    #[serde(default)]
    pub liveness: LivenessSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubStorageSection {
    /// Clips land under `<base_dir>/clips/`; catalog paths are stored
    /// relative to this.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Uploads are refused (507) while free space is below this.
    #[serde(default = "default_min_free_percent")]
    pub min_free_percent: f64,
}

impl Default for HubStorageSection {
    fn default() -> Self {
        HubStorageSection {
            base_dir: default_base_dir(),
            min_free_percent: default_min_free_percent(),
        }
    }
}

/// Thresholds for deriving node status from `last_seen`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivenessSection {
    #[serde(default = "default_online_sec")]
    pub online_sec: u64,
    #[serde(default = "default_stale_sec")]
    pub stale_sec: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        LivenessSection {
            online_sec: default_online_sec(),
            stale_sec: default_stale_sec(),
        }
    }
}

impl HubConfig {
    /// Load and validate a hub config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Parse and validate from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.auth_tokens.is_empty() {
            warn!("No auth_tokens configured; every node request will be rejected");
        }
        // Clip uploads are attributed to a node by token alone, so a
        // token shared between nodes would misfile clips.
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (node_id, token) in &self.auth_tokens {
            validate_node_id(node_id)?;
            if token.is_empty() {
                bail!("auth_tokens.{node_id} must not be empty");
            }
            if let Some(other) = seen.insert(token.as_str(), node_id.as_str()) {
                bail!("auth_tokens.{node_id} and auth_tokens.{other} share the same token");
            }
        }
        validate_min_free(self.storage.min_free_percent)?;
        if self.liveness.online_sec >= self.liveness.stale_sec {
            bail!(
                "liveness.online_sec ({}) must be below liveness.stale_sec ({})",
                self.liveness.online_sec,
                self.liveness.stale_sec
            );
        }
        Ok(())
    }

    /// Root of the per-node clip tree.
    pub fn clips_dir(&self) -> PathBuf {
        self.storage.base_dir.join("clips")
    }
}

// ── shared validation ────────────────────────────────────────────────

fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.is_empty() {
        bail!("node_id must not be empty");
    }
    // Node ids end up in file names and storage paths.
    if !node_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("node_id may only contain letters, digits, '-' and '_': '{node_id}'");
    }
    Ok(())
}

fn validate_min_free(pct: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&pct) {
        bail!("min_free_percent must be within 0..=100, got {pct}");
    }
    Ok(())
}

fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        bail!("hub_url must not be empty");
    }
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    Ok(with_scheme.trim_end_matches('/').to_string())
}

// ── defaults ─────────────────────────────────────────────────────────

fn default_heartbeat_interval() -> u64 {
    10
}
fn default_heartbeat_max_interval() -> u64 {
    60
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/burrowcam")
}
fn default_sensor_device() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0/in_distance_raw")
}
fn default_min_free_percent() -> f64 {
    10.0
}
fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_database() -> PathBuf {
    PathBuf::from("/var/lib/burrowcam/hub.db")
}
fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/lib/burrowcam")
}
fn default_online_sec() -> u64 {
    10
}
fn default_stale_sec() -> u64 {
    30
}

// ─── tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_TOML: &str = r#"
node_id = "burrow01"
hub_url = "hub.local:5000/"
auth_token = "secret"
heartbeat_interval_sec = 10

[sensor]
threshold_mm = 1000
debounce_ms = 200

[recording]
resolution = "1280x720"
framerate = 30
duration_s = 10

[storage]
min_free_percent = 12.5
"#;

    #[test]
    fn test_parse_node_config() {
        let c = NodeConfig::parse(NODE_TOML).unwrap();
        assert_eq!(c.node_id, "burrow01");
        // Scheme added, trailing slash stripped.
        assert_eq!(c.hub_url, "http://hub.local:5000");
        assert_eq!(c.clips_endpoint(), "http://hub.local:5000/api/v1/clips");
        assert_eq!(c.sensor.threshold_mm, 1000);
        assert_eq!(c.sensor.debounce_ms, 200);
        assert_eq!(c.recording.resolution.width, 1280);
        assert_eq!(c.recording.resolution.height, 720);
        assert_eq!(c.storage.min_free_percent, 12.5);
        assert_eq!(c.queue_dir(), PathBuf::from("/var/lib/burrowcam/queue"));
    }

    #[test]
    fn test_node_defaults() {
        let minimal = r#"
node_id = "burrow01"
hub_url = "http://hub.local:5000"
auth_token = "secret"

[sensor]
threshold_mm = 800
debounce_ms = 150

[recording]
resolution = "1920x1080"
framerate = 25
duration_s = 8
"#;
        let c = NodeConfig::parse(minimal).unwrap();
        assert_eq!(c.heartbeat_interval_sec, 10);
        assert_eq!(c.heartbeat_max_interval_sec, 60);
        assert_eq!(c.storage.min_free_percent, 10.0);
    }

    #[test]
    fn test_heartbeat_floor_clamped() {
        let toml = NODE_TOML.replace(
            "heartbeat_interval_sec = 10",
            "heartbeat_interval_sec = 1",
        );
        let c = NodeConfig::parse(&toml).unwrap();
        assert_eq!(c.heartbeat_interval_sec, HEARTBEAT_FLOOR_SEC);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let toml = NODE_TOML.replace("auth_token = \"secret\"", "");
        assert!(NodeConfig::parse(&toml).is_err());
    }

    #[test]
    fn test_unknown_key_fails() {
        let toml = format!("{NODE_TOML}\nretries = 5\n");
        assert!(NodeConfig::parse(&toml).is_err());
    }

    #[test]
    fn test_bad_resolution_fails() {
        let toml = NODE_TOML.replace("1280x720", "1280by720");
        assert!(NodeConfig::parse(&toml).is_err());
        let toml = NODE_TOML.replace("1280x720", "0x720");
        assert!(NodeConfig::parse(&toml).is_err());
    }

    #[test]
    fn test_bad_node_id_fails() {
        let toml = NODE_TOML.replace("burrow01", "../burrow01");
        assert!(NodeConfig::parse(&toml).is_err());
    }

    #[test]
    fn test_parse_hub_config() {
        let toml = r#"
listen_addr = "127.0.0.1:5000"
database = "/tmp/hub.db"

[storage]
base_dir = "/tmp/hubdata"
min_free_percent = 5.0

[auth_tokens]
burrow01 = "secret-a"
burrow02 = "secret-b"
"#;
        let c = HubConfig::parse(toml).unwrap();
        assert_eq!(c.listen_addr, "127.0.0.1:5000");
        assert_eq!(c.auth_tokens.len(), 2);
        assert_eq!(c.auth_tokens["burrow02"], "secret-b");
        assert_eq!(c.liveness.online_sec, 10);
        assert_eq!(c.liveness.stale_sec, 30);
        assert_eq!(c.clips_dir(), PathBuf::from("/tmp/hubdata/clips"));
    }

    #[test]
    fn test_hub_defaults() {
        let c = HubConfig::parse("").unwrap();
        assert_eq!(c.listen_addr, "0.0.0.0:5000");
        assert!(c.auth_tokens.is_empty());
        assert_eq!(c.storage.min_free_percent, 10.0);
    }

    #[test]
    fn test_hub_liveness_ordering_enforced() {
        let toml = r#"
[liveness]
online_sec = 30
stale_sec = 30
"#;
        assert!(HubConfig::parse(toml).is_err());
    }

    #[test]
    fn test_hub_empty_token_fails() {
        let toml = r#"
[auth_tokens]
burrow01 = ""
"#;
        assert!(HubConfig::parse(toml).is_err());
    }

    #[test]
    fn test_hub_shared_token_fails() {
        let toml = r#"
[auth_tokens]
burrow01 = "same-secret"
burrow02 = "same-secret"
"#;
        let err = HubConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("share the same token"), "{err:#}");
    }
}
