//! Clip delivery – bounded multipart uploads with failure classification,
//! durable queueing and the periodic drain pass over the queue.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use burrowcam_common::protocol::AUTH_HEADER;

use crate::queue::ClipQueue;

/// How long one upload attempt may take end to end.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between drain passes over the queue.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Transport failures split by how the caller should react: transient
/// ones queue and retry, credential rejections halt the pass and alarm.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("hub rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("{0}")]
    Transient(String),
}

/// 2xx is success, 401/403 a credential problem, everything else is
/// worth retrying later.
pub(crate) fn classify_status(status: u16) -> Result<(), TransportError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(TransportError::Unauthorized { status }),
        _ => Err(TransportError::Transient(format!("HTTP {status}"))),
    }
}

pub struct Uploader {
    client: reqwest::blocking::Client,
    clips_url: String,
    token: String,
}

impl Uploader {
    pub fn new(clips_url: String, token: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .context("Cannot build HTTP client")?;
        Ok(Uploader {
            client,
            clips_url,
            token,
        })
    }

    /// One bounded POST of the clip. Classifies the outcome; moves no files.
    pub fn attempt_upload(&self, clip: &Path) -> Result<(), TransportError> {
        let part = reqwest::blocking::multipart::Part::file(clip)
            .map_err(|e| {
                TransportError::Transient(format!("cannot open {}: {e}", clip.display()))
            })?
            .mime_str("video/mp4")
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.clips_url)
            .header(AUTH_HEADER, &self.token)
            .multipart(form)
            .send()
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        classify_status(response.status().as_u16())
    }

    /// Fresh-clip path: try once, delete on success, park in the queue on
    /// any failure. The queue is the error path, so this never returns one.
    pub fn deliver(&self, clip: &Path, queue: &ClipQueue) {
        let name = clip.file_name().unwrap_or_default().to_string_lossy();
        match self.attempt_upload(clip) {
            Ok(()) => {
                info!("Uploaded {name}");
                if let Err(e) = std::fs::remove_file(clip) {
                    warn!("Cannot remove uploaded clip {}: {e}", clip.display());
                }
            }
            Err(e) => {
                match &e {
                    TransportError::Unauthorized { .. } => {
                        error!("Upload of {name} rejected: {e}")
                    }
                    TransportError::Transient(reason) => {
                        warn!("Upload of {name} failed: {reason}")
                    }
                }
                match queue.enqueue(clip) {
                    Ok(target) => info!("Queued for retry: {}", target.display()),
                    Err(qe) => error!("Cannot queue {}: {qe:#}", clip.display()),
                }
            }
        }
    }

    /// One pass over the queue, oldest first. Stops at the first failure
    /// so order is preserved and a down hub costs one attempt per pass.
    pub fn drain_queue(&self, queue: &ClipQueue) {
        let entries = match queue.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list queue: {e:#}");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        debug!("Drain pass over {} queued clip(s)", entries.len());
        for (i, clip) in entries.iter().enumerate() {
            let name = clip.file_name().unwrap_or_default().to_string_lossy();
            match self.attempt_upload(clip) {
                Ok(()) => {
                    info!("Uploaded queued clip {name}");
                    if let Err(e) = queue.remove(clip) {
                        warn!("Delivered clip left in queue: {e:#}");
                    }
                }
                Err(e @ TransportError::Unauthorized { .. }) => {
                    error!("{e}; leaving {} clip(s) queued", entries.len() - i);
                    break;
                }
                Err(TransportError::Transient(reason)) => {
                    warn!("Upload of {name} failed: {reason}; will retry next pass");
                    break;
                }
            }
        }
    }
}

/// Body of the queue-drain thread: one pass, then sleep in short steps so
/// shutdown stays prompt.
pub fn drain_loop(uploader: &Uploader, queue: &ClipQueue, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        uploader.drain_queue(queue);
        for _ in 0..DRAIN_INTERVAL.as_secs() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
    info!("Drain thread finished");
}

// ─── tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "burrowcam_deliver_{tag}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// An endpoint on a port nothing listens on.
    fn dead_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/api/v1/clips")
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(200).is_ok());
        assert!(classify_status(204).is_ok());
        assert!(matches!(
            classify_status(401),
            Err(TransportError::Unauthorized { status: 401 })
        ));
        assert!(matches!(
            classify_status(403),
            Err(TransportError::Unauthorized { status: 403 })
        ));
        assert!(matches!(
            classify_status(500),
            Err(TransportError::Transient(_))
        ));
        assert!(matches!(
            classify_status(507),
            Err(TransportError::Transient(_))
        ));
    }

    #[test]
    fn test_failed_upload_parks_clip_in_queue_once() {
        let dir = test_dir("park");
        let staging = dir.join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let queue = ClipQueue::open(&dir.join("queue")).unwrap();

        let clip = staging.join("burrow01_20250809T024522Z.mp4");
        std::fs::write(&clip, b"frames").unwrap();

        let uploader = Uploader::new(dead_endpoint(), "secret".into()).unwrap();
        uploader.deliver(&clip, &queue);

        assert!(!clip.exists(), "clip must leave staging");
        let entries = queue.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].file_name().unwrap().to_str().unwrap(),
            "burrow01_20250809T024522Z.mp4"
        );
    }

    #[test]
    fn test_drain_halts_pass_on_failure() {
        let dir = test_dir("halt");
        let queue = ClipQueue::open(&dir).unwrap();
        std::fs::write(dir.join("burrow01_20250809T020000Z.mp4"), b"a").unwrap();
        std::fs::write(dir.join("burrow01_20250809T060000Z.mp4"), b"b").unwrap();

        let uploader = Uploader::new(dead_endpoint(), "secret".into()).unwrap();
        uploader.drain_queue(&queue);

        // First attempt fails and the pass stops; nothing is lost.
        assert_eq!(queue.len(), 2);
    }

    // The remaining tests run against a real hub bound to an ephemeral
    // port. The runtime only hosts the server; uploads stay blocking.

    fn start_hub(
        dir: &Path,
    ) -> (
        tokio::runtime::Runtime,
        std::net::SocketAddr,
        tokio::sync::oneshot::Sender<()>,
    ) {
        let text = format!(
            r#"
            listen_addr = "127.0.0.1:0"
            database = "{db}"

            [storage]
            base_dir = "{base}"
            min_free_percent = 0.0

            [auth_tokens]
            burrow01 = "secret-one"
            "#,
            db = dir.join("hub.db").display(),
            base = dir.join("storage").display(),
        );
        let config = burrowcam_common::config::HubConfig::parse(&text).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (addr, shutdown_tx) = rt.block_on(burrowcam_hub::server::spawn(config)).unwrap();
        (rt, addr, shutdown_tx)
    }

    fn hub_filepaths(dir: &Path) -> Vec<String> {
        let conn = rusqlite::Connection::open(dir.join("hub.db")).unwrap();
        let mut stmt = conn
            .prepare("SELECT filepath FROM clips ORDER BY id")
            .unwrap();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_deliver_uploads_and_removes_clip() {
        let dir = test_dir("live");
        let (_rt, addr, _shutdown_tx) = start_hub(&dir);
        let staging = dir.join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let queue = ClipQueue::open(&dir.join("queue")).unwrap();

        let clip = staging.join("burrow01_20250809T024522Z.mp4");
        std::fs::write(&clip, b"frames").unwrap();

        let uploader = Uploader::new(
            format!("http://{addr}/api/v1/clips"),
            "secret-one".into(),
        )
        .unwrap();
        uploader.deliver(&clip, &queue);

        assert!(!clip.exists(), "delivered clip must be deleted");
        assert!(queue.is_empty());

        let paths = hub_filepaths(&dir);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("/burrow01_20250809T024522Z.mp4"));
        let stored = dir.join("storage").join(&paths[0]);
        assert_eq!(std::fs::read(stored).unwrap(), b"frames");
    }

    #[test]
    fn test_drain_uploads_oldest_first() {
        let dir = test_dir("fifo");
        let (_rt, addr, _shutdown_tx) = start_hub(&dir);
        let queue = ClipQueue::open(&dir.join("queue")).unwrap();

        // Written newest-first; the embedded timestamps decide the order.
        for name in [
            "burrow01_20250809T050000Z.mp4",
            "burrow01_20250809T010000Z.mp4",
            "burrow01_20250809T030000Z.mp4",
        ] {
            std::fs::write(queue.dir().join(name), b"frames").unwrap();
        }

        let uploader = Uploader::new(
            format!("http://{addr}/api/v1/clips"),
            "secret-one".into(),
        )
        .unwrap();
        uploader.drain_queue(&queue);

        assert!(queue.is_empty());
        let uploaded: Vec<String> = hub_filepaths(&dir)
            .iter()
            .map(|p| p.rsplit_once('/').unwrap().1.to_string())
            .collect();
        assert_eq!(
            uploaded,
            [
                "burrow01_20250809T010000Z.mp4",
                "burrow01_20250809T030000Z.mp4",
                "burrow01_20250809T050000Z.mp4",
            ]
        );
    }

    #[test]
    fn test_drain_with_rejected_token_keeps_queue() {
        let dir = test_dir("badtoken");
        let (_rt, addr, _shutdown_tx) = start_hub(&dir);
        let queue = ClipQueue::open(&dir.join("queue")).unwrap();
        std::fs::write(
            queue.dir().join("burrow01_20250809T010000Z.mp4"),
            b"frames",
        )
        .unwrap();
        std::fs::write(
            queue.dir().join("burrow01_20250809T030000Z.mp4"),
            b"frames",
        )
        .unwrap();

        let uploader = Uploader::new(
            format!("http://{addr}/api/v1/clips"),
            "not-the-token".into(),
        )
        .unwrap();
        uploader.drain_queue(&queue);

        assert_eq!(queue.len(), 2, "rejected clips must stay queued");
        assert!(hub_filepaths(&dir).is_empty());
    }
}
