//! Disk-space probing. Both sides of the pipeline gate on free space:
//! the node before recording, the hub before accepting an upload.

use std::path::Path;

use anyhow::{Context, Result};

/// Percent of the filesystem holding `path` that is free for unprivileged
/// writes (0.0 ..= 100.0).
pub fn free_space_pct(path: &Path) -> Result<f64> {
    let stat = rustix::fs::statvfs(path)
        .with_context(|| format!("statvfs({}) failed", path.display()))?;
    if stat.f_blocks == 0 {
        return Ok(0.0);
    }
    Ok(stat.f_bavail as f64 / stat.f_blocks as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_space_pct_in_range() {
        let pct = free_space_pct(&std::env::temp_dir()).unwrap();
        assert!((0.0..=100.0).contains(&pct), "pct = {pct}");
    }

    #[test]
    fn test_probe_accepts_plain_files() {
        let file = std::env::temp_dir().join(format!("burrowcam_probe_{}", std::process::id()));
        std::fs::write(&file, b"x").unwrap();
        let pct = free_space_pct(&file).unwrap();
        assert!((0.0..=100.0).contains(&pct), "pct = {pct}");
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn test_missing_path_fails() {
        assert!(free_space_pct(Path::new("/no/such/path/here")).is_err());
    }
}
