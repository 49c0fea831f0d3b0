use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use media_pacer::{CloseReason, Codec, MediaKind, PacerError, Session, stats::StatsSnapshot};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub(crate) fn start_api_server(listen: String, session: Arc<Session>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = router(session);

        let listener = match TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server bind {} failed: {}", listen, e);
                return;
            }
        };
        log::info!("API server started on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error starting API server: {}", e);
        }
    });
}

fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/keyframe", post(keyframe))
        .with_state(session)
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[derive(Debug, Serialize)]
struct SessionStats {
    session: String,
    closed: bool,
    close_reason: Option<CloseReason>,
    outputs: Vec<OutputStats>,
}

#[derive(Debug, Serialize)]
struct OutputStats {
    kind: MediaKind,
    codec: Codec,
    has_track: bool,
    dropping: bool,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

async fn stats(State(session): State<Arc<Session>>) -> Json<SessionStats> {
    let outputs = session
        .outputs()
        .iter()
        .map(|o| OutputStats {
            kind: o.kind(),
            codec: o.codec(),
            has_track: o.has_track(),
            dropping: o.in_drop_phase(),
            stats: o.stats(),
        })
        .collect();
    Json(SessionStats {
        session: session.id().to_string(),
        closed: session.is_closed(),
        close_reason: session.lifecycle().close_reason(),
        outputs,
    })
}

async fn keyframe(State(session): State<Arc<Session>>) -> (StatusCode, Json<serde_json::Value>) {
    match session.request_keyframe() {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "requested" })),
        ),
        Err(e) => {
            let status = match e {
                PacerError::Unsupported { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() })))
        }
    }
}
