//! Clip naming.
//!
//! Every clip is named `{node_id}_{YYYYMMDDTHHMMSSZ}.mp4`, e.g.
//! `burrow01_20250809T024522Z.mp4`. The UTC timestamp makes names unique
//! per node and lexically sortable in capture order, which the retry
//! queue relies on. The raw H.264 intermediate uses the same stem with
//! an `.h264` extension.

use std::fmt;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Timestamp portion of a clip name, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Final container extension.
pub const CLIP_EXT: &str = "mp4";

/// Raw intermediate extension before the remux.
pub const RAW_EXT: &str = "h264";

/// Parsed identity of a clip file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipName {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ClipName {
    pub fn new(node_id: &str, timestamp: DateTime<Utc>) -> Self {
        ClipName {
            node_id: node_id.to_string(),
            timestamp,
        }
    }

    /// Name of the final `.mp4` container.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.node_id,
            self.timestamp.format(TIMESTAMP_FORMAT),
            CLIP_EXT
        )
    }

    /// Name of the raw H.264 intermediate.
    pub fn raw_file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.node_id,
            self.timestamp.format(TIMESTAMP_FORMAT),
            RAW_EXT
        )
    }

    /// Parse a clip file name back into its parts.
    ///
    /// The node id may itself contain underscores; the timestamp is
    /// whatever follows the last one.
    pub fn parse(file_name: &str) -> anyhow::Result<Self> {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, ext)) if ext.eq_ignore_ascii_case(CLIP_EXT) => stem,
            _ => bail!("Not a clip file: {file_name}"),
        };
        let (node_id, ts) = stem
            .rsplit_once('_')
            .with_context(|| format!("No timestamp in clip name: {file_name}"))?;
        if node_id.is_empty() {
            bail!("Empty node id in clip name: {file_name}");
        }
        let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|e| anyhow::anyhow!("Bad timestamp in clip name {file_name}: {e}"))?;
        Ok(ClipName {
            node_id: node_id.to_string(),
            timestamp: naive.and_utc(),
        })
    }
}

impl fmt::Display for ClipName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}
