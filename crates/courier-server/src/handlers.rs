//! HTTP handlers for Courier server.
//!
//! This module serves the event streams and wires the ticker and shutdown
//! draining into the server lifecycle.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context as _, Result};
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use courier_core::{Notification, Notifier, Subscription, Ticker};
use futures_util::stream::{Stream, StreamExt};
use std::borrow::Cow;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// Per-user channels.
    pub notifier: Notifier,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, notifier: Notifier) -> Self {
        Self { notifier, config }
    }
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let notifier = Notifier::with_config(config.notifier_config());
    let state = Arc::new(AppState::new(config.clone(), notifier.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let shutdown = CancellationToken::new();
    let ticker = config.ticker.enabled.then(|| {
        let ticker = Ticker::new(notifier.clone(), config.tick_interval());
        tokio::spawn(ticker.run(shutdown.clone()))
    });

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier server listening on {}", addr);
    info!("Event stream endpoint: http://{}{}", addr, config.stream_route());

    let stop_ticker = shutdown.clone();
    serve(listener, state, async move {
        shutdown_signal().await;
        stop_ticker.cancel();
    })
    .await?;

    shutdown.cancel();
    if let Some(handle) = ticker {
        if let Err(e) = handle.await {
            error!(error = %e, "Ticker task failed");
        }
    }

    Ok(())
}

/// Serve on `listener` until `signal` resolves.
///
/// Every channel is completed before the server stops accepting, so open
/// streams end on their own instead of holding the graceful shutdown open.
///
/// # Errors
///
/// Returns an error if the server fails while serving.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let notifier = state.notifier.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            drain(&notifier);
        })
        .await
        .context("Server error")?;

    info!("Courier server stopped");
    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let stream_route = state.config.stream_route();
    Router::new()
        .route(&stream_route, get(stream_handler))
        .route("/users", get(users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Complete every channel ahead of the server shutting down.
fn drain(notifier: &Notifier) {
    info!("Shutdown signal received, completing event streams");
    let report = notifier.shutdown();
    metrics::record_drain_failures(report.failed.len());
    metrics::set_active_channels(0);
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connected users.
async fn users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut users = state.notifier.current_users();
    users.sort();
    axum::Json(serde_json::json!({
        "count": users.len(),
        "users": users,
    }))
}

/// Event stream handler.
async fn stream_handler(
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Sse<EventStream> {
    let metrics_guard = ConnectionMetricsGuard::new();
    let subscription = state.notifier.connect(&user_id);
    metrics::set_active_channels(state.notifier.registry().len());

    debug!(user = %user_id, "Event stream opened");

    Sse::new(EventStream {
        subscription: Some(subscription),
        event_name: Arc::from(state.config.sse.event_name.as_str()),
        notifier: state.notifier.clone(),
        _metrics: metrics_guard,
    })
}

/// SSE body for one subscription.
pub struct EventStream {
    subscription: Option<Subscription>,
    event_name: Arc<str>,
    notifier: Notifier,
    _metrics: ConnectionMetricsGuard,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(subscription) = this.subscription.as_mut() else {
            return Poll::Ready(None);
        };

        subscription.poll_next_unpin(cx).map(|item| {
            item.map(|notification| {
                metrics::record_event(if notification.is_heartbeat() {
                    "heartbeat"
                } else {
                    "message"
                });
                Ok(to_event(&this.event_name, &notification))
            })
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Release the subscription first so the gauge sees any eviction.
        if let Some(subscription) = self.subscription.take() {
            debug!(user = %subscription.user_id(), "Event stream closed");
        }
        metrics::set_active_channels(self.notifier.registry().len());
    }
}

/// Encode a notification as one SSE event.
fn to_event(event_name: &str, notification: &Notification) -> Event {
    Event::default()
        .event(event_name)
        .data(normalize_line_endings(notification.as_str()))
}

/// SSE cannot carry a bare carriage return; fold CR and CRLF into LF.
fn normalize_line_endings(payload: &str) -> Cow<'_, str> {
    if payload.contains('\r') {
        Cow::Owned(payload.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    struct TestServer {
        addr: SocketAddr,
        notifier: Notifier,
        stop: CancellationToken,
        handle: JoinHandle<Result<()>>,
    }

    async fn spawn_server(config: Config) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notifier = Notifier::with_config(config.notifier_config());
        let state = Arc::new(AppState::new(config, notifier.clone()));

        let stop = CancellationToken::new();
        let signal = stop.clone();
        let handle = tokio::spawn(serve(listener, state, async move {
            signal.cancelled().await;
        }));

        TestServer {
            addr,
            notifier,
            stop,
            handle,
        }
    }

    async fn open_stream(addr: SocketAddr, user_id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET /sse/{user_id} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        stream
    }

    async fn read_until(stream: &mut TcpStream, buf: &mut Vec<u8>, needle: &str) {
        timeout(Duration::from_secs(5), async {
            while !String::from_utf8_lossy(buf).contains(needle) {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before {needle:?}");
                buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out waiting for response");
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("plain"), "plain");
        assert!(matches!(normalize_line_endings("plain"), Cow::Borrowed(_)));
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[tokio::test]
    async fn test_stream_delivers_connected_then_messages() {
        let server = spawn_server(Config::default()).await;
        let mut stream = open_stream(server.addr, "u1").await;
        let mut buf = Vec::new();

        read_until(&mut stream, &mut buf, "data: connected").await;
        let head = String::from_utf8_lossy(&buf).to_lowercase();
        assert!(head.contains("content-type: text/event-stream"));
        assert!(head.contains("event: tick"));

        assert_eq!(server.notifier.emit_to_user("u1", "hello"), 1);
        read_until(&mut stream, &mut buf, "data: hello").await;
        assert_eq!(server.notifier.current_users(), vec!["u1".to_string()]);

        server.stop.cancel();
        timeout(Duration::from_secs(5), server.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        assert!(server.notifier.current_users().is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_evicts_user() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 50;
        let server = spawn_server(config).await;

        let mut stream = open_stream(server.addr, "u1").await;
        let mut buf = Vec::new();
        read_until(&mut stream, &mut buf, "data: connected").await;
        assert_eq!(server.notifier.subscriber_count("u1"), 1);

        drop(stream);

        timeout(Duration::from_secs(5), async {
            while !server.notifier.current_users().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("user was not evicted after disconnect");

        server.stop.cancel();
    }

    #[tokio::test]
    async fn test_users_and_health() {
        let server = spawn_server(Config::default()).await;

        let mut stream = open_stream(server.addr, "u1").await;
        let mut buf = Vec::new();
        read_until(&mut stream, &mut buf, "data: connected").await;

        let users = http_get(server.addr, "/users").await;
        assert!(users.contains("\"count\":1"));
        assert!(users.contains("\"users\":[\"u1\"]"));

        let health = http_get(server.addr, "/health").await;
        assert!(health.contains("\"status\":\"ok\""));

        server.stop.cancel();
    }
}
