//! Durable upload queue – a directory of finished clips awaiting retry.
//!
//! Clips enter by atomic rename (same filesystem as staging), so an entry
//! is always a complete file. They leave only on confirmed upload. Order
//! is the capture timestamp embedded in the name, file mtime when a name
//! does not parse.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use burrowcam_common::clip::{ClipName, CLIP_EXT};

#[derive(Clone)]
pub struct ClipQueue {
    dir: PathBuf,
}

impl ClipQueue {
    /// Open the queue directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create queue dir {}", dir.display()))?;
        Ok(ClipQueue {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move a finished clip into the queue. Rename only, never copy, so a
    /// concurrent drain pass can never see a partial entry.
    pub fn enqueue(&self, clip: &Path) -> Result<PathBuf> {
        let name = clip
            .file_name()
            .with_context(|| format!("Not a file path: {}", clip.display()))?;
        let target = self.dir.join(name);
        if target == clip {
            return Ok(target);
        }
        std::fs::rename(clip, &target)
            .with_context(|| format!("Cannot move {} into queue", clip.display()))?;
        Ok(target)
    }

    /// Pending clips, oldest first.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut found: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        let dir = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read queue dir {}", self.dir.display()))?;
        for entry in dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let is_clip = path
                .extension()
                .map_or(false, |e| e.eq_ignore_ascii_case(CLIP_EXT));
            if !is_clip {
                continue;
            }
            let name = entry.file_name();
            let timestamp = match ClipName::parse(&name.to_string_lossy()) {
                Ok(clip_name) => clip_name.timestamp,
                Err(_) => entry
                    .metadata()?
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            };
            found.push((timestamp, path));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Number of pending clips. Errors count as zero, which is also what
    /// heartbeats report when the directory is unreadable.
    pub fn len(&self) -> u32 {
        self.entries().map(|e| e.len() as u32).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a delivered clip.
    pub fn remove(&self, entry: &Path) -> Result<()> {
        std::fs::remove_file(entry)
            .with_context(|| format!("Cannot remove {}", entry.display()))
    }
}

/// Remove leftovers of interrupted captures. Anything still in staging at
/// startup never reached handoff and cannot be assumed complete.
pub fn sweep_staging(staging: &Path) -> Result<usize> {
    let mut removed = 0;
    let dir = std::fs::read_dir(staging)
        .with_context(|| format!("Cannot read staging dir {}", staging.display()))?;
    for entry in dir {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                warn!("Removed stale partial {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Cannot remove stale partial {}: {e}", path.display()),
        }
    }
    Ok(removed)
}

// ─── tests ───────────────────────────────────────────────────────────
