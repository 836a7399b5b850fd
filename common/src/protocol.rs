//! Shared HTTP protocol types for communication between camera nodes
//! and the hub.

use serde::{Deserialize, Serialize};

/// Request header carrying the per-node shared secret.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Periodic health report POSTed by a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    /// Reporting software, e.g. `burrowcam-node/0.1.0`.
    pub version: String,
    /// Best-effort OS hostname; absent when the lookup fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Percent free on the volume holding clips; -1.0 when the probe failed.
    pub free_space_pct: f64,
    /// Clips waiting in the retry queue.
    pub queue_len: u32,
}

/// Hub response to an accepted heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub ok: bool,
    /// ISO-8601 UTC timestamp on the hub.
    pub server_time: String,
}

/// Hub response to an accepted clip upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipAck {
    pub ok: bool,
}

/// One row of the hub's node registry. `status` is derived from
/// `last_seen` at read time; nothing ever expires a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub last_seen: Option<String>,
    pub status: String,
    pub ip: Option<String>,
    pub version: Option<String>,
    pub free_space_pct: Option<f64>,
    pub queue_len: Option<u32>,
}

/// Payload of `GET /api/v1/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<NodeStatus>,
}

/// Health-check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub free_space_pct: f64,
}
