//! Clip storage layout under the hub's base directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

/// Reject names that could escape the storage tree.
pub fn sanitize_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Empty file name");
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        bail!("Unsafe file name: {name}");
    }
    Ok(())
}

/// Where an accepted clip lands: `<base>/clips/<node>/<YYYYMMDD>/<name>`,
/// dated by arrival (UTC). Returns the absolute path and the base-relative
/// path recorded in the catalog.
pub fn clip_destination(
    base_dir: &Path,
    node_id: &str,
    file_name: &str,
    received: DateTime<Utc>,
) -> (PathBuf, String) {
    let day = received.format("%Y%m%d").to_string();
    let rel = format!("clips/{node_id}/{day}/{file_name}");
    (base_dir.join(&rel), rel)
}

// ─── tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_accepts_clip_names() {
        assert!(sanitize_file_name("burrow01_20250809T024522Z.mp4").is_ok());
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("../etc/passwd").is_err());
        assert!(sanitize_file_name("a/b.mp4").is_err());
        assert!(sanitize_file_name("a\\b.mp4").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[test]
    fn test_destination_layout() {
        let received = Utc.with_ymd_and_hms(2025, 8, 9, 2, 45, 30).unwrap();
        let (abs, rel) = clip_destination(
            Path::new("/srv/burrowcam"),
            "burrow01",
            "burrow01_20250809T024522Z.mp4",
            received,
        );
        assert_eq!(rel, "clips/burrow01/20250809/burrow01_20250809T024522Z.mp4");
        assert_eq!(
            abs,
            Path::new("/srv/burrowcam/clips/burrow01/20250809/burrow01_20250809T024522Z.mp4")
        );
    }
}
