//! `GroupcastServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use groupcast_core::{Broker, MembershipStore};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionContext, run_ws_session};
use crate::websocket::table::ConnectionTable;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Operation surface shared by every session.
    pub broker: Broker,
    /// Live connections.
    pub table: Arc<ConnectionTable>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Group to join as part of connecting.
    pub group_id: Option<String>,
}

/// The groupcast server.
pub struct GroupcastServer {
    config: Arc<ServerConfig>,
    broker: Broker,
    table: Arc<ConnectionTable>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl GroupcastServer {
    /// Create a server over `store`. The connection table becomes the
    /// broker's pusher.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MembershipStore>,
        push_timeout: Duration,
        metrics: PrometheusHandle,
    ) -> Self {
        let table = Arc::new(ConnectionTable::new());
        let broker = Broker::new(store, table.clone()).with_push_timeout(push_timeout);
        Self {
            config: Arc::new(config),
            broker,
            table,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: self.broker.clone(),
            table: self.table.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "groupcast server listening");
        Ok((local_addr, handle))
    }

    /// The operation surface.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// The live connection table.
    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.table.connection_count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// GET /ws: upgrade, assign a connection id, and run the session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let open = state.table.connection_count().await;
    if open >= state.config.max_connections {
        warn!(open, limit = state.config.max_connections, "connection limit reached");
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let connection_id = Uuid::now_v7().to_string();
    debug!(connection_id = %connection_id, group_id = ?params.group_id, "upgrading connection");

    let ctx = SessionContext {
        broker: state.broker.clone(),
        table: state.table.clone(),
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
        outbound_buffer: state.config.outbound_buffer,
        shutdown: state.shutdown.token(),
    };

    // Held until the session has disconnected its membership.
    let guard = state.shutdown.session_guard();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, connection_id, params.group_id, ctx).await;
            drop(guard);
        })
}
