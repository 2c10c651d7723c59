//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum app that hands every request to the manager
//! - Wire up middleware (tracing, body limit, request ID)
//! - Serve accepted connections with hyper HTTP/1.1
//! - Map outcomes to responses, or close the connection without one
//! - Bound the time to receive a request by `http_connection_timeout`

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::{DropConnection, DroppedConnection, X_REQUEST_ID};
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::scheduler::{InboundRequest, Manager, Outcome};

/// How long shutdown waits for open connections to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Manager,
    pub connection_timeout: Duration,
}

/// HTTP front end of the supernode.
pub struct HttpServer {
    app: Router,
    connection_timeout: Duration,
}

impl HttpServer {
    pub fn new(manager: Manager) -> Self {
        let server = &manager.config().server;
        let connection_timeout = server.connection_timeout();
        let max_body_size = server.max_body_size;
        let state = AppState {
            manager,
            connection_timeout,
        };
        Self {
            app: Self::build_router(state, max_body_size),
            connection_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState, max_body_size: usize) -> Router {
        Router::new()
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(max_body_size))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// The app without a listener, for in-process callers.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let conn = Connection {
                            app: self.app.clone(),
                            header_timeout: self.connection_timeout,
                            _permit: permit,
                            guard: tracker.track(),
                        };
                        tokio::spawn(conn.serve(stream, peer));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("HTTP server received shutdown signal, stop accepting");
                    break;
                }
            }
        }

        drop(listener);
        if !tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!(open = tracker.active_count(), "Connections still open after drain timeout");
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

struct Connection {
    app: Router,
    header_timeout: Duration,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
}

impl Connection {
    async fn serve(self, stream: TcpStream, peer: SocketAddr) {
        let id = self.guard.id();
        let app = self.app;
        let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
            let app = app.clone();
            async move {
                let response = match app.oneshot(request.map(Body::new)).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                if response.extensions().get::<DropConnection>().is_some() {
                    return Err(DroppedConnection);
                }
                Ok::<_, DroppedConnection>(response)
            }
        });

        let result = hyper::server::conn::http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(self.header_timeout)
            .serve_connection(TokioIo::new(stream), service)
            .await;

        match result {
            Ok(()) => tracing::trace!(connection_id = %id, peer = %peer, "Connection finished"),
            Err(e) => tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Connection closed"),
        }
    }
}

/// Fallback handler: every request goes through the manager.
async fn dispatch_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let body = match tokio::time::timeout(state.connection_timeout, axum::body::to_bytes(body, usize::MAX)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        Err(_) => {
            tracing::warn!(request_id = %request_id, "Request body not received in time, dropping connection");
            return drop_connection();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Dispatching request"
    );

    let inbound = InboundRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        body,
    };

    match state.manager.dispatch(inbound).await {
        Outcome::Respond { status, headers, body } => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response.headers_mut().extend(headers);
            response
        }
        Outcome::Drop => {
            tracing::debug!(request_id = %request_id, "Dropping connection without response");
            drop_connection()
        }
    }
}

fn drop_connection() -> Response {
    let mut response = Response::new(Body::empty());
    response.extensions_mut().insert(DropConnection);
    response
}
