//! [`BridgeServer`] – one axum router for HTTP and the rosbridge WebSocket.
//!
//! * `POST /goal` → start a goal workflow
//! * `GET /events` → SSE stream of `plan` / `subtask` events
//! * `GET /cam0/stream` → MJPEG stream
//! * `GET /cam0/snap` → latest JPEG frame
//! * `GET /` → plain-text banner, or a rosbridge session when the request
//!   asks for a WebSocket upgrade
//! * `OPTIONS *` → 204 with CORS headers

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rescue_types::{BridgeError, topics};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use crate::config::BridgeConfig;
use crate::gateway::{self, Gateway};
use crate::{mjpeg, rosbridge, sse};

/// Body of `GET /`.
pub const BANNER: &str = "Edge Rescue bridge is running.\n";

/// Upper bound on a request body (goal prompts are short).
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const ALLOW_METHODS: &str = "GET,POST,OPTIONS";
const ALLOW_HEADERS: &str = "content-type";

#[derive(Clone)]
pub struct BridgeServer {
    gateway: Gateway,
    config: Arc<BridgeConfig>,
}

impl BridgeServer {
    pub fn new(gateway: Gateway, config: BridgeConfig) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Bind`] when the address is invalid or already in use.
    pub async fn bind(&self) -> Result<TcpListener, BridgeError> {
        TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| BridgeError::Bind {
                addr: self.config.bind_addr.clone(),
                details: e.to_string(),
            })
    }

    /// Bind, then serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Build the router with CORS and the request body limit applied.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route("/", get(root))
            .route("/goal", post(post_goal))
            .route("/events", get(events))
            .route("/cam0/stream", get(camera_stream))
            .route("/cam0/snap", get(snapshot))
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(cors)
            .layer(middleware::from_fn(cors_headers))
            .with_state(self.clone())
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Event and camera streams never finish on their own, so shutdown stops
    /// accepting instead of waiting for open connections to drain.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "bridge listening");
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        tokio::select! {
            served = axum::serve(listener, app).into_future() => served.map_err(BridgeError::from),
            _ = shutdown => {
                info!("shutdown requested, no longer accepting connections");
                Ok(())
            }
        }
    }
}

fn error_response(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "error": reason }))).into_response()
}

/// Complete the CORS headers the inner layer leaves off.
///
/// Every `OPTIONS` request is answered with 204 and only the CORS headers of
/// whatever the inner layers produced. Other responses also get the allowed
/// methods and headers, which the CORS layer only sends on preflights.
async fn cors_headers(request: Request, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        headers
            .entry(header::ACCESS_CONTROL_ALLOW_METHODS)
            .or_insert(HeaderValue::from_static(ALLOW_METHODS));
        headers
            .entry(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .or_insert(HeaderValue::from_static(ALLOW_HEADERS));
        return response;
    }
    let inner = next.run(request).await;
    let mut response = StatusCode::NO_CONTENT.into_response();
    for (name, value) in inner.headers() {
        if name.as_str().starts_with("access-control-") || *name == header::VARY {
            response.headers_mut().append(name, value.clone());
        }
    }
    response
}

async fn root(
    State(server): State<BridgeServer>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let gateway = server.gateway.clone();
            ws.on_upgrade(move |socket| rosbridge::serve(socket, peer, gateway))
        }
        Err(_) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], BANNER).into_response(),
    }
}

async fn post_goal(State(server): State<BridgeServer>, body: Bytes) -> Response {
    let prompt = gateway::parse_goal_prompt(&body);
    match server.gateway.submit_goal(&prompt) {
        Ok(_workflow) => Json(json!({ "status": "ok" })).into_response(),
        Err(BridgeError::ClientRequest(reason)) => {
            debug!(reason = %reason, "goal rejected");
            error_response(StatusCode::BAD_REQUEST, &reason)
        }
        Err(e) => {
            error!(error = %e, "goal could not be started");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn events(
    State(server): State<BridgeServer>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let subscription = server
        .gateway
        .broker()
        .events()
        .open(&[topics::PLAN, topics::SUBTASK]);
    info!(peer = %peer, subscriber = %subscription.id(), "sse client connected");

    Sse::new(sse::event_stream(subscription))
        .keep_alive(sse::keep_alive(server.config.keepalive))
        .into_response()
}

async fn camera_stream(
    State(server): State<BridgeServer>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let watcher = server.gateway.broker().frames().watch();
    info!(peer = %peer, watcher = %watcher.id(), "mjpeg client connected");
    mjpeg::stream_response(watcher, server.config.frame_wait)
}

async fn snapshot(State(server): State<BridgeServer>) -> Response {
    mjpeg::snapshot_response(server.gateway.broker().frames())
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}
