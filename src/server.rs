use crate::apis::{NetworkAdapter, Receipt, WebhookError};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    webhooks: Arc<HashMap<String, Arc<dyn NetworkAdapter>>>,
}

/// Body of every non-2xx webhook response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    reason: &'static str,
    message: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::NotFound => StatusCode::NOT_FOUND,
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::Invalid(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let WebhookError::Internal(message) = &self {
            error!("Webhook failed: {}", message);
        }
        let body = ErrorBody {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or(""),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "lora-bridge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(adapter) = state.webhooks.get(&path) else {
        return WebhookError::NotFound.into_response();
    };
    match adapter.receive(&headers, &body).await {
        Ok(Receipt::Accepted { id, queued }) => {
            Json(serde_json::json!({ "id": id, "queued": queued })).into_response()
        }
        Ok(Receipt::Ping) | Ok(Receipt::Ignored(_)) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found() -> Response {
    WebhookError::NotFound.into_response()
}

/// Create the HTTP router: `GET /health` plus one `POST /<path>` per push adapter.
pub fn create_server(adapters: &[Arc<dyn NetworkAdapter>]) -> Router {
    let webhooks: HashMap<String, Arc<dyn NetworkAdapter>> = adapters
        .iter()
        .filter_map(|adapter| {
            adapter
                .webhook_path()
                .map(|path| (path.to_string(), adapter.clone()))
        })
        .collect();

    Router::new()
        .route("/health", get(health))
        .route("/:network", post(receive_webhook))
        .fallback(not_found)
        .with_state(AppState {
            webhooks: Arc::new(webhooks),
        })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server on the given address
pub async fn start_server(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Webhook server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
