//! Hub HTTP server – receives clips and heartbeats from field nodes.
//!
//! Routes:
//!   POST /api/v1/clips      → multipart clip upload (X-Auth-Token)
//!   POST /api/v1/heartbeat  → node status JSON (X-Auth-Token)
//!   GET  /api/v1/nodes      → registry with derived liveness
//!   GET  /api/health        → health check

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::multipart::Field;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use burrowcam_common::config::HubConfig;
use burrowcam_common::protocol::{
    ClipAck, HealthResponse, Heartbeat, HeartbeatAck, NodeList, NodeStatus, AUTH_HEADER,
};
use burrowcam_common::storage::free_space_pct;

use crate::db;
use crate::error::{ApiError, Result};
use crate::storage;

/// Upper bound on one upload. Clips are a few seconds of H.264, so this
/// is generous.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Shared state for route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<HubConfig>,
    start_time: Instant,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/clips", post(receive_clip))
        .route("/api/v1/heartbeat", post(receive_heartbeat))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn prepare_dirs(config: &HubConfig) -> anyhow::Result<()> {
    let clips = config.clips_dir();
    std::fs::create_dir_all(&clips)
        .with_context(|| format!("Cannot create clip dir {}", clips.display()))?;
    Ok(())
}

/// Start the server. Blocks until the shutdown flag is set.
pub async fn run(config: HubConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    prepare_dirs(&config)?;
    db::initialize(&config.database)?;

    let listen_addr = config.listen_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
    };
    let app = router(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Cannot bind {listen_addr}"))?;
    info!("Hub listening on {listen_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
        }
    })
    .await?;

    Ok(())
}

/// Bind on the configured address and serve on a background task. Returns
/// the bound address and a shutdown handle (dropping it stops the server).
/// Lets integration tests run a real hub in-process on port 0.
pub async fn spawn(
    config: HubConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    prepare_dirs(&config)?;
    db::initialize(&config.database)?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Cannot bind {}", config.listen_addr))?;
    let addr = listener.local_addr()?;

    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
    };
    let app = router(state);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = rx.await;
        });
        if let Err(e) = server.await {
            tracing::error!("Hub server error: {e}");
        }
    });

    Ok((addr, tx))
}

// ── route handlers ───────────────────────────────────────────────────────

fn header_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing auth token".into()))
}

async fn receive_clip(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ClipAck>> {
    // The uploading node is identified by its token alone.
    let token = header_token(&headers)?;
    let node_id = state
        .config
        .auth_tokens
        .iter()
        .find(|(_, t)| t.as_str() == token)
        .map(|(id, _)| id.clone())
        .ok_or_else(|| ApiError::Unauthorized("unknown token".into()))?;

    let base_dir = &state.config.storage.base_dir;
    match free_space_pct(base_dir) {
        Ok(pct) if pct < state.config.storage.min_free_percent => {
            return Err(ApiError::InsufficientStorage(format!(
                "{pct:.1}% free on {}",
                base_dir.display()
            )));
        }
        Ok(_) => {}
        Err(e) => warn!("Cannot probe free space on {}: {e:#}", base_dir.display()),
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Bad multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .ok_or_else(|| ApiError::BadRequest("Upload has no filename".into()))?
            .to_string();
        storage::sanitize_file_name(&file_name)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let received = Utc::now();
        let (abs, rel) = storage::clip_destination(base_dir, &node_id, &file_name, received);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let written = match spool_field(field, &abs).await {
            Ok(0) => {
                let _ = tokio::fs::remove_file(&abs).await;
                return Err(ApiError::BadRequest(format!("Empty upload: {file_name}")));
            }
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&abs).await;
                return Err(e);
            }
        };
        db::insert_clip(&state.config.database, &node_id, &rel, received)?;

        info!("Stored clip {rel} ({written} bytes) from {node_id}");
        return Ok(Json(ClipAck { ok: true }));
    }

    Err(ApiError::BadRequest("No 'file' part in upload".into()))
}

/// Stream one multipart field to `dest` without buffering the whole clip
/// in memory. Returns the number of bytes written.
async fn spool_field(mut field: Field<'_>, dest: &Path) -> Result<u64> {
    let mut out = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Bad multipart body: {e}")))?
    {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

async fn receive_heartbeat(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(hb): Json<Heartbeat>,
) -> Result<Json<HeartbeatAck>> {
    let token = header_token(&headers)?;
    let expected = state
        .config
        .auth_tokens
        .get(&hb.node_id)
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown node '{}'", hb.node_id)))?;
    if expected != token {
        return Err(ApiError::Unauthorized(format!(
            "bad token for '{}'",
            hb.node_id
        )));
    }

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let now = Utc::now();
    db::upsert_node(&state.config.database, &hb, Some(&ip), now)?;
    debug!("Heartbeat from {} (queue_len={})", hb.node_id, hb.queue_len);

    Ok(Json(HeartbeatAck {
        ok: true,
        server_time: now.to_rfc3339(),
    }))
}

async fn list_nodes(State(state): State<AppState>) -> Result<Json<NodeList>> {
    let now = Utc::now();
    let liveness = &state.config.liveness;
    let nodes = db::fetch_nodes(&state.config.database)?
        .into_iter()
        .map(|r| {
            let status = db::status_from_last_seen(
                &r.last_seen,
                now,
                liveness.online_sec,
                liveness.stale_sec,
            );
            NodeStatus {
                node_id: r.node_id,
                last_seen: Some(r.last_seen),
                status: status.to_string(),
                ip: r.ip,
                version: r.version,
                free_space_pct: r.free_space_pct,
                queue_len: r.queue_len,
            }
        })
        .collect();
    Ok(Json(NodeList { nodes }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let free = free_space_pct(&state.config.storage.base_dir).unwrap_or(-1.0);
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        free_space_pct: free,
    })
}
