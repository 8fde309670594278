//! Inbound operation surface.
//!
//! [`Broker`] ties the registry and fanout engine together and turns every
//! operation into a [`Response`]. Failures of any kind, panics included, are
//! mapped to a structured error response; nothing escapes to the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, error, instrument, warn};

use crate::errors::BrokerError;
use crate::fanout::FanoutEngine;
use crate::operation::{DEFAULT_ROUTE_MESSAGE, Operation, Response};
use crate::pusher::ConnectionPusher;
use crate::registry::Registry;
use crate::session::{Session, require_group_id};
use crate::store::MembershipStore;

/// Registry + fanout engine behind the four inbound operations.
#[derive(Clone)]
pub struct Broker {
    registry: Registry,
    fanout: FanoutEngine,
}

impl Broker {
    /// Create a broker over shared collaborator handles.
    pub fn new(store: Arc<dyn MembershipStore>, pusher: Arc<dyn ConnectionPusher>) -> Self {
        let registry = Registry::new(store);
        let fanout = FanoutEngine::new(registry.clone(), pusher);
        Self { registry, fanout }
    }

    /// Override the per-attempt push timeout.
    #[must_use]
    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.fanout = self.fanout.with_push_timeout(push_timeout);
        self
    }

    /// The membership registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The fanout engine.
    pub fn fanout(&self) -> &FanoutEngine {
        &self.fanout
    }

    // ── Stateless surface ───────────────────────────────────────────

    /// Transport connect event.
    pub async fn on_connect(&self, connection_id: &str, group_id: Option<&str>) -> Response {
        let mut session = Session::new(connection_id);
        let op = Operation::Connect {
            group_id: group_id.map(str::to_owned),
        };
        self.handle(&mut session, op).await
    }

    /// Join or switch group.
    pub async fn on_join(&self, connection_id: &str, group_id: &str) -> Response {
        let mut session = Session::resume(connection_id);
        let op = Operation::Join {
            group_id: group_id.to_owned(),
        };
        self.handle(&mut session, op).await
    }

    /// Broadcast `payload` to `group_id`.
    pub async fn on_broadcast(&self, group_id: &str, payload: Bytes) -> Response {
        guard("broadcast", async {
            let group_id = require_group_id(group_id)?;
            let report = self.fanout.broadcast(group_id, payload).await?;
            Ok(Response::from_broadcast(&report))
        })
        .await
    }

    /// Transport disconnect event. Succeeds for unknown connections.
    pub async fn on_disconnect(&self, connection_id: &str) -> Response {
        let mut session = Session::resume(connection_id);
        self.handle(&mut session, Operation::Disconnect).await
    }

    /// Route an event by name, e.g. from a gateway event router.
    ///
    /// `body` is the raw JSON body; unknown routes yield `UNKNOWN_OPERATION`.
    pub async fn dispatch(&self, connection_id: &str, route: &str, body: Option<&str>) -> Response {
        let op = match Operation::parse(route, body) {
            Ok(op) => op,
            Err(err) => {
                log_failure(route, &err);
                return Response::from_error(route, &err);
            }
        };
        let mut session = match op {
            Operation::Connect { .. } => Session::new(connection_id),
            _ => Session::resume(connection_id),
        };
        self.handle(&mut session, op).await
    }

    // ── Stateful surface ────────────────────────────────────────────

    /// Apply `op` to a session owned by the caller, enforcing its state.
    #[instrument(skip_all, fields(connection_id = %session.connection_id(), operation = op.name()))]
    pub async fn handle(&self, session: &mut Session, op: Operation) -> Response {
        let name = op.name();
        debug!(state = session.state().name(), "handling operation");
        guard(name, self.apply(session, op)).await
    }

    /// Parse a JSON frame with an `action` field and apply it to `session`.
    ///
    /// A frame that does not parse leaves the session untouched.
    pub async fn handle_frame(&self, session: &mut Session, frame: &str) -> Response {
        match Operation::from_frame(frame) {
            Ok(op) => self.handle(session, op).await,
            Err(err) => {
                log_failure("frame", &err);
                Response::from_error("frame", &err)
            }
        }
    }

    async fn apply(&self, session: &mut Session, op: Operation) -> Result<Response, BrokerError> {
        match op {
            Operation::Connect { group_id } => {
                session.connect(&self.registry, group_id.as_deref()).await?;
                Ok(Response::ok("connect", "Connection established"))
            }
            Operation::Join { group_id } => {
                session.join(&self.registry, &group_id).await?;
                Ok(Response::ok("join", "Group registered"))
            }
            Operation::Broadcast { group_id, payload } => {
                let report = session.broadcast(&self.fanout, &group_id, payload).await?;
                Ok(Response::from_broadcast(&report))
            }
            Operation::Disconnect => {
                session.disconnect(&self.registry).await?;
                Ok(Response::ok("disconnect", "Disconnected successfully"))
            }
            Operation::Default => Ok(Response::ok("default", DEFAULT_ROUTE_MESSAGE)),
        }
    }
}

/// Run an operation, mapping errors and panics to a [`Response`].
async fn guard<F>(name: &str, fut: F) -> Response
where
    F: Future<Output = Result<Response, BrokerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(resp)) => resp,
        Ok(Err(err)) => {
            log_failure(name, &err);
            Response::from_error(name, &err)
        }
        Err(panic) => {
            let err = BrokerError::internal(panic_message(panic.as_ref()));
            log_failure(name, &err);
            Response::from_error(name, &err)
        }
    }
}

fn log_failure(operation: &str, err: &BrokerError) {
    if err.is_caller_error() {
        warn!(operation, code = err.code(), error = %err, "operation rejected");
    } else {
        let cause = std::error::Error::source(err)
            .map(ToString::to_string)
            .unwrap_or_default();
        error!(operation, code = err.code(), error = %err, cause = %cause, "operation failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("operation panicked: {s}")
    } else {
        "operation panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{self, INTERNAL_ERROR_MESSAGE, StoreError};
    use crate::store::{InMemoryMembershipStore, MembershipRow};
    use crate::session::SessionState;
    use crate::testing::{FailingStore, ScriptedPusher};
    use async_trait::async_trait;

    fn broker() -> (Broker, Arc<InMemoryMembershipStore>, Arc<ScriptedPusher>) {
        let store = Arc::new(InMemoryMembershipStore::new());
        let pusher = Arc::new(ScriptedPusher::new());
        (Broker::new(store.clone(), pusher.clone()), store, pusher)
    }

    #[tokio::test]
    async fn connect_messages() {
        let (b, store, _) = broker();
        let resp = b.on_connect("c1", Some("A")).await;
        assert!(resp.success);
        assert_eq!(resp.message, "Connection established");
        assert_eq!(store.group_of("c1").as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn join_then_disconnect_leaves_group() {
        let (b, _, _) = broker();
        assert!(b.on_join("c1", "g").await.success);
        let resp = b.on_disconnect("c1").await;
        assert_eq!(resp.message, "Disconnected successfully");
        assert!(!b.registry().members_of("g").await.unwrap().contains(&"c1".to_owned()));
    }

    #[tokio::test]
    async fn disconnect_unknown_succeeds() {
        let (b, _, _) = broker();
        let resp = b.on_disconnect("never-seen").await;
        assert!(resp.success);
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn join_empty_group_is_invalid_argument() {
        let store = Arc::new(FailingStore::reads());
        let b = Broker::new(store.clone(), Arc::new(ScriptedPusher::new()));
        let resp = b.on_join("c", "").await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some(errors::INVALID_ARGUMENT));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn connect_store_failure() {
        let store = Arc::new(FailingStore::writes());
        let b = Broker::new(store.clone(), Arc::new(ScriptedPusher::new()));
        let resp = b.on_connect("c", Some("A")).await;
        assert_eq!(resp.code.as_deref(), Some(errors::STORE_WRITE_FAILED));
        assert_eq!(resp.status, 500);
        assert!(store.inner().group_of("c").is_none());
    }

    #[tokio::test]
    async fn broadcast_to_empty_group_is_no_recipients() {
        let (b, _, _) = broker();
        let resp = b.on_broadcast("B", Bytes::from_static(b"x")).await;
        assert!(resp.success);
        assert_eq!(resp.detail.unwrap()["outcome"], "noRecipients");
    }

    #[tokio::test]
    async fn broadcast_blank_group_is_invalid() {
        let (b, _, pusher) = broker();
        let resp = b.on_broadcast(" ", Bytes::from_static(b"x")).await;
        assert_eq!(resp.code.as_deref(), Some(errors::INVALID_ARGUMENT));
        assert_eq!(pusher.total_attempts(), 0);
    }

    #[tokio::test]
    async fn broadcast_read_failure() {
        let b = Broker::new(Arc::new(FailingStore::reads()), Arc::new(ScriptedPusher::new()));
        let resp = b.on_broadcast("A", Bytes::from_static(b"x")).await;
        assert_eq!(resp.code.as_deref(), Some(errors::STORE_READ_FAILED));
    }

    #[tokio::test]
    async fn dispatch_routes() {
        let (b, store, pusher) = broker();
        let resp = b.dispatch("c1", "$connect", Some(r#"{"groupId":"A"}"#)).await;
        assert_eq!(resp.operation, "connect");
        let resp = b.dispatch("c2", "register", Some(r#"{"groupId":"A"}"#)).await;
        assert_eq!(resp.message, "Group registered");
        assert_eq!(store.len(), 2);

        let resp = b
            .dispatch("c1", "sendMessage", Some(r#"{"groupId":"A","message":"hi"}"#))
            .await;
        assert!(resp.success);
        assert_eq!(pusher.attempts_for("c1"), 1);
        assert_eq!(pusher.attempts_for("c2"), 1);

        let resp = b.dispatch("c1", "$default", None).await;
        assert_eq!(resp.message, DEFAULT_ROUTE_MESSAGE);

        let resp = b.dispatch("c1", "$disconnect", None).await;
        assert!(resp.success);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_route() {
        let (b, _, _) = broker();
        let resp = b.dispatch("c1", "teleport", None).await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.code.as_deref(), Some(errors::UNKNOWN_OPERATION));
        assert_eq!(resp.operation, "teleport");
        assert!(resp.message.contains("teleport"));
    }

    #[tokio::test]
    async fn dispatch_bad_body() {
        let (b, _, _) = broker();
        let resp = b.dispatch("c1", "register", Some("{oops")).await;
        assert_eq!(resp.code.as_deref(), Some(errors::INVALID_ARGUMENT));
    }

    #[tokio::test]
    async fn stateful_handle_enforces_terminal_state() {
        let (b, _, _) = broker();
        let mut s = Session::new("c1");
        assert!(b.handle(&mut s, Operation::Connect { group_id: None }).await.success);
        assert!(b.handle(&mut s, Operation::Disconnect).await.success);
        let resp = b
            .handle(&mut s, Operation::Join {
                group_id: "A".into(),
            })
            .await;
        assert_eq!(resp.code.as_deref(), Some(errors::INVALID_STATE));
    }

    #[tokio::test]
    async fn handle_frame_applies_action() {
        let (b, store, _) = broker();
        let mut s = Session::new("c1");
        assert!(b.handle(&mut s, Operation::Connect { group_id: None }).await.success);
        let resp = b
            .handle_frame(&mut s, r#"{"action":"register","groupId":"A"}"#)
            .await;
        assert_eq!(resp.message, "Group registered");
        assert_eq!(s.group_id(), Some("A"));
        assert_eq!(store.group_of("c1").as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn handle_frame_rejects_garbage_without_state_change() {
        let (b, _, _) = broker();
        let mut s = Session::new("c1");
        let resp = b.handle_frame(&mut s, "[1, 2]").await;
        assert_eq!(resp.code.as_deref(), Some(errors::INVALID_ARGUMENT));
        assert_eq!(resp.operation, "frame");
        assert_eq!(s.state(), &SessionState::Unregistered);

        let resp = b.handle_frame(&mut s, r#"{"action":"teleport"}"#).await;
        assert_eq!(resp.operation, "teleport");
        assert_eq!(resp.code.as_deref(), Some(errors::UNKNOWN_OPERATION));
    }

    struct ExplodingStore;

    #[async_trait]
    impl MembershipStore for ExplodingStore {
        async fn put(&self, _group_id: &str, _connection_id: &str) -> Result<(), StoreError> {
            panic!("secret internals")
        }

        async fn scan_all(&self) -> Result<Vec<MembershipRow>, StoreError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _connection_id: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panics_become_generic_internal_errors() {
        let b = Broker::new(Arc::new(ExplodingStore), Arc::new(ScriptedPusher::new()));
        let resp = b.on_join("c1", "A").await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some(errors::INTERNAL_ERROR));
        assert_eq!(resp.message, INTERNAL_ERROR_MESSAGE);
        assert!(!resp.message.contains("secret"));
    }
}
