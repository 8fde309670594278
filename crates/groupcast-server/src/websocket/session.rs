//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use groupcast_core::{Broker, BrokerError, Operation, Response, Session};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Liveness};
use super::table::ConnectionTable;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_DROPPED_FRAMES_TOTAL, record_response,
};

/// How long queued frames may take to flush once the session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Shared handles a session task needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Operation surface.
    pub broker: Broker,
    /// Live connections; also the broker's pusher.
    pub table: Arc<ConnectionTable>,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which the client is dropped.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the socket in the connection table
/// 2. Runs `connect` with the upgrade's optional group and replies with the
///    result; a failed connect closes the socket
/// 3. Applies each inbound frame to the session and replies with a response
/// 4. Pings periodically and drops clients silent past the timeout
/// 5. On close, timeout, or shutdown, disconnects the membership
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: String,
    group_id: Option<String>,
    ctx: SessionContext,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Bytes>(ctx.outbound_buffer);
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    ctx.table.add(connection.clone()).await;

    let mut session = Session::new(connection_id.clone());
    let mut resp = ctx
        .broker
        .handle(&mut session, Operation::Connect { group_id })
        .await;
    record_response(&resp);
    if resp.success {
        resp.detail = Some(json!({ "connectionId": connection_id }));
    }
    let _ = ws_tx.send(Message::Text(resp.to_json().into())).await;

    if !resp.success {
        info!(code = resp.code.as_deref(), "connect rejected, closing socket");
        let _ = ws_tx.send(Message::Close(None)).await;
        ctx.table.remove(&connection_id).await;
        return;
    }

    info!(group_id = ?session.group_id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut outbound = tokio::spawn(forward_outbound(
        ws_tx,
        send_rx,
        connection.liveness(),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
    ));
    let mut outbound_done = false;

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => {
                info!("server shutting down, ending session");
                break;
            }
            _ = &mut outbound => {
                outbound_done = true;
                debug!("outbound task ended");
                break;
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                connection.mark_alive();

                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(data) => {
                        if let Ok(s) = std::str::from_utf8(&data) {
                            s.to_owned()
                        } else {
                            debug!(len = data.len(), "non-UTF8 binary frame");
                            let err = BrokerError::invalid_argument("Binary frames must be UTF-8 JSON");
                            reply(&connection, &Response::from_error("frame", &err));
                            continue;
                        }
                    }
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let resp = ctx.broker.handle_frame(&mut session, &text).await;
                reply(&connection, &resp);

                if session.is_disconnected() {
                    info!("client requested disconnect");
                    break;
                }
            }
        }
    }

    if !session.is_disconnected() {
        let resp = ctx.broker.handle(&mut session, Operation::Disconnect).await;
        record_response(&resp);
    }
    ctx.table.remove(&connection_id).await;

    record_drops(&connection);
    let lifetime = connection.age();

    // Dropping the last sender lets the writer drain and send a close frame.
    drop(connection);
    if !outbound_done && tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
}

/// Report frames the client never received.
fn record_drops(connection: &ClientConnection) {
    let dropped = connection.drop_count();
    if dropped > 0 {
        warn!(dropped, "frames dropped for this client");
        counter!(WS_DROPPED_FRAMES_TOTAL).increment(dropped);
    }
}

fn reply(connection: &ClientConnection, resp: &Response) {
    record_response(resp);
    if let Err(e) = connection.send_text(resp.to_json()) {
        warn!(connection_id = %connection.id, error = %e, "failed to enqueue response");
    }
}

/// Write queued frames and pings until the queue closes or the client
/// goes silent.
async fn forward_outbound<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Bytes>,
    liveness: Arc<Liveness>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = send_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(to_message(frame)).await.is_err() {
                    return;
                }
            }
            _ = ping_interval.tick() => {
                if !liveness.check_alive() && liveness.last_seen_elapsed() > heartbeat_timeout {
                    warn!("client unresponsive for {heartbeat_timeout:?}, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

/// UTF-8 frames go out as text, anything else as binary.
fn to_message(frame: Bytes) -> Message {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}
