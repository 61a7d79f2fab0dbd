//! Inbound HTTP endpoints
//!
//! Two listeners share one router. The public one is what Drive calls
//! back; the control one binds to loopback and serves the CLI:
//!
//! | Surface | Route                       | Purpose                                  |
//! |---------|-----------------------------|------------------------------------------|
//! | public  | `POST /notifications?scope` | Drive push notification callback         |
//! | control | `POST /sync-channels`       | Run a channel sync pass, returns report  |
//! | control | `POST /reconcile?scope`     | Reconcile one watched scope now          |
//! | control | `GET /metrics`              | Prometheus text exposition               |
//! | both    | `GET /healthz`              | Liveness                                 |
//!
//! A route requested on the other surface is a 404. The notification
//! route answers as soon as the reconciliation is queued; it never
//! reconciles inline.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use drivewatch_core::domain::{Notification, ResourceState, ScopeId, SubscriptionId};
use drivewatch_core::ports::IChannelRegistry;
use drivewatch_core::usecases::{NotificationError, ReconcileError};

use crate::dispatcher::ReconcileDispatcher;
use crate::metrics::WatchMetrics;
use crate::notifications::{NotificationDisposition, NotificationHandler};
use crate::scheduler::SchedulerHandle;

pub const HEADER_CHANNEL_ID: &str = "x-goog-channel-id";
pub const HEADER_CHANNEL_TOKEN: &str = "x-goog-channel-token";
pub const HEADER_RESOURCE_STATE: &str = "x-goog-resource-state";
pub const HEADER_MESSAGE_NUMBER: &str = "x-goog-message-number";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

type HttpResponse = Response<Full<Bytes>>;

/// Which set of routes a listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Drive notification callback
    Public,
    /// Operator routes; loopback only
    Control,
}

impl Surface {
    fn as_str(self) -> &'static str {
        match self {
            Surface::Public => "public",
            Surface::Control => "control",
        }
    }
}

/// Everything the request handlers need
pub struct ServerState {
    pub notifications: Arc<NotificationHandler>,
    pub dispatcher: Arc<ReconcileDispatcher>,
    pub scheduler: SchedulerHandle,
    pub metrics: Arc<WatchMetrics>,
    /// Registry of open channels; a scope with a channel is watched
    pub registry: Arc<dyn IChannelRegistry>,
    /// Configured watch scopes, watched even before their channel opens
    pub scopes: Vec<ScopeId>,
}

impl ServerState {
    /// True if `scope` is configured or currently has a channel
    async fn is_watched(&self, scope: &ScopeId) -> anyhow::Result<bool> {
        if self.scopes.contains(scope) {
            return Ok(true);
        }
        Ok(self.registry.get(scope).await?.is_some())
    }
}

/// HTTP/1 server for one [`Surface`]
pub struct WebhookServer {
    state: Arc<ServerState>,
    surface: Surface,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WebhookServer {
    /// Binds the listening socket; port 0 picks a free port
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound, or if a control listener is
    /// asked for on a non-loopback address
    pub async fn bind(
        state: Arc<ServerState>,
        addr: SocketAddr,
        surface: Surface,
    ) -> anyhow::Result<Self> {
        if surface == Surface::Control && !addr.ip().is_loopback() {
            anyhow::bail!("control endpoint must bind to loopback, got {addr}");
        }
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            state,
            surface,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let surface = self.surface;
        info!(addr = %self.local_addr, surface = surface.as_str(), "HTTP endpoint listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = result?;
                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&self.state);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(route(req, &state, surface).await) }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(peer = %peer, error = %e, "HTTP connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!(surface = surface.as_str(), "HTTP endpoint shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn route<B>(req: Request<B>, state: &ServerState, surface: Surface) -> HttpResponse {
    use Surface::{Control, Public};

    // No route reads a body
    let (parts, _) = req.into_parts();

    match (surface, &parts.method, parts.uri.path()) {
        (_, &Method::GET, "/healthz") => text(StatusCode::OK, "ok"),
        (Public, &Method::POST, "/notifications") => handle_notification(&parts, state).await,
        (Control, &Method::POST, "/sync-channels") => handle_sync_channels(state).await,
        (Control, &Method::POST, "/reconcile") => handle_reconcile(&parts, state).await,
        (Control, &Method::GET, "/metrics") => match state.metrics.encode() {
            Ok(body) => respond(StatusCode::OK, METRICS_CONTENT_TYPE, body),
            Err(e) => text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            ),
        },
        (_, _, "/healthz")
        | (Public, _, "/notifications")
        | (Control, _, "/sync-channels" | "/reconcile" | "/metrics") => {
            text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// A notification request that could not be parsed
#[derive(Debug, PartialEq, Eq)]
pub struct BadNotification(pub String);

/// Builds a [`Notification`] from the callback request
///
/// The scope comes from the `scope` query parameter of the callback URL
/// registered with the channel. A missing token is kept as an empty string
/// and fails signature verification.
pub fn parse_notification(
    req: &Parts,
    received_at: DateTime<Utc>,
) -> Result<Notification, BadNotification> {
    let headers = &req.headers;

    let scope = query_param(req, "scope")
        .ok_or_else(|| BadNotification("missing scope parameter".to_string()))?;
    let scope_id = ScopeId::new(scope).map_err(|e| BadNotification(e.to_string()))?;

    let channel_id = header(headers, HEADER_CHANNEL_ID)
        .ok_or_else(|| BadNotification(format!("missing {HEADER_CHANNEL_ID} header")))?;
    let subscription_id =
        SubscriptionId::new(channel_id).map_err(|e| BadNotification(e.to_string()))?;

    let signing_token = header(headers, HEADER_CHANNEL_TOKEN).unwrap_or_default();

    let resource_state = header(headers, HEADER_RESOURCE_STATE)
        .map(|value| ResourceState::parse(&value))
        .unwrap_or(ResourceState::Change);

    let message_number = match header(headers, HEADER_MESSAGE_NUMBER) {
        Some(value) => Some(value.trim().parse::<u64>().map_err(|_| {
            BadNotification(format!("invalid {HEADER_MESSAGE_NUMBER}: {value}"))
        })?),
        None => None,
    };

    Ok(Notification {
        subscription_id,
        scope_id,
        signing_token,
        resource_state,
        message_number,
        received_at,
    })
}

async fn handle_notification(req: &Parts, state: &ServerState) -> HttpResponse {
    let notification = match parse_notification(req, Utc::now()) {
        Ok(notification) => notification,
        Err(BadNotification(reason)) => {
            debug!(reason = %reason, "Malformed notification");
            state.metrics.record_notification("malformed");
            return text(StatusCode::BAD_REQUEST, reason);
        }
    };

    match state.notifications.handle(&notification).await {
        Ok(NotificationDisposition::Dropped(_)) => {
            text(StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
        }
        Ok(_) => empty(StatusCode::NO_CONTENT),
        Err(NotificationError::InvalidSignature(_)) => {
            text(StatusCode::UNAUTHORIZED, "Invalid channel token")
        }
        Err(NotificationError::Storage(_)) => {
            text(StatusCode::INTERNAL_SERVER_ERROR, "Channel registry unavailable")
        }
        // Stale or superseded channels: acknowledge so Drive stops retrying
        Err(_) => empty(StatusCode::NO_CONTENT),
    }
}

// ============================================================================
// Control
// ============================================================================

async fn handle_sync_channels(state: &ServerState) -> HttpResponse {
    match state.scheduler.sync_channels().await {
        Ok(report) => json(StatusCode::OK, &report),
        Err(e) => {
            error!(error = %e, "On-demand channel sync failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

async fn handle_reconcile(req: &Parts, state: &ServerState) -> HttpResponse {
    let scope = match query_param(req, "scope").map(ScopeId::new) {
        Some(Ok(scope)) => scope,
        Some(Err(e)) => return text(StatusCode::BAD_REQUEST, e.to_string()),
        None => return text(StatusCode::BAD_REQUEST, "missing scope parameter"),
    };

    match state.is_watched(&scope).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(scope = %scope, "Refusing to reconcile unwatched scope");
            return text(StatusCode::FORBIDDEN, format!("Scope {scope} is not watched"));
        }
        Err(e) => {
            error!(scope = %scope, error = %e, "Channel registry unavailable");
            return text(StatusCode::INTERNAL_SERVER_ERROR, "Channel registry unavailable");
        }
    }

    match state.dispatcher.reconcile_now(&scope).await {
        Ok(outcome) => json(StatusCode::OK, &outcome),
        Err(e @ ReconcileError::Remote(_)) => text(StatusCode::BAD_GATEWAY, e.to_string()),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn query_param(req: &Parts, name: &str) -> Option<String> {
    let query = req.uri.query()?;
    let url = reqwest::Url::parse(&format!("http://localhost/?{query}")).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    respond(status, TEXT_PLAIN, body.into())
}

fn empty(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, APPLICATION_JSON, body),
        Err(e) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode response: {e}"),
        ),
    }
}
