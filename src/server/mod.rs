//! HTTP front for the worker host.
//!
//! Every request that is not a `/__shell/` control route is translated into a
//! [`ShellRequest`] against the upstream origin and handed to the
//! [`WorkerHost`], so pages reaching the app through this server get
//! network-first caching with an offline fallback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use reqwest::Url;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::host::{ClientId, WorkerHost};
use crate::http::{ShellRequest, ShellResponse};

/// Header carrying the identity of the calling page.
pub const CLIENT_HEADER: &str = "x-shell-client";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

#[derive(Clone)]
struct AppState {
    host: Arc<WorkerHost>,
    upstream: Url,
    anonymous: ClientId,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn shell_health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn shell_status(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.host.status().await)
}

async fn shell_message(State(state): State<AppState>, body: String) -> impl IntoResponse {
    axum::Json(state.host.post_message(&body).await)
}

async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = headers
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| state.anonymous.clone(), ClientId::new);

    let url = match upstream_url(&state.upstream, &uri) {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Rejecting {uri}: {e}");
            return (axum::http::StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let request = ShellRequest::new(method, url)
        .with_headers(forwardable(&headers))
        .with_body(body);
    log::debug!("{client}: {} {}", request.method(), request.url());

    into_response(state.host.fetch(&client, &request).await)
}

/// Resolves the incoming request target against the upstream origin.
///
/// Absolute-form targets (as sent to a forward proxy) are used as-is.
fn upstream_url(upstream: &Url, uri: &Uri) -> Result<Url> {
    if uri.scheme().is_some() {
        return Ok(Url::parse(&uri.to_string())?);
    }
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    Ok(upstream.join(target)?)
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded.remove(CLIENT_HEADER);
    forwarded
}

fn into_response(response: ShellResponse) -> Response {
    let mut headers = response.headers().clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    (response.status(), headers, response.body().clone()).into_response()
}

/// Builds the router serving control routes and the proxy fallback.
pub fn router(host: Arc<WorkerHost>, upstream: Url) -> Router {
    let state = AppState {
        host,
        upstream,
        anonymous: ClientId::random(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__shell/health", get(shell_health))
        .route("/__shell/status", get(shell_status))
        .route("/__shell/message", post(shell_message))
        .fallback(proxy)
        .layer(cors)
        .with_state(state)
}

/// Serves `app` on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Binds to the configured address and serves until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the upstream URL is invalid or the address cannot be bound.
pub async fn run_server(
    config: &ServerConfig,
    host: Arc<WorkerHost>,
    cancel: CancellationToken,
) -> Result<()> {
    let upstream = Url::parse(&config.upstream)?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| crate::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on http://{addr}, proxying {upstream}");

    serve(listener, router(host, upstream), cancel).await?;
    log::info!("Server stopped");
    Ok(())
}
