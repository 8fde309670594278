//! Per-connection lifecycle state machine.
//!
//! ```text
//! Unregistered --connect--> Connecting --join--> Joined --join--> Joined
//!       |                        |                  |
//!       +--connect(group)--------|------------------+
//!                                +---disconnect-----+--> Disconnected
//! ```
//!
//! `Disconnected` is terminal. Every transition that touches membership goes
//! through the [`Registry`]; the state here only decides legality.

use bytes::Bytes;
use tracing::info;

use crate::errors::BrokerError;
use crate::fanout::{FanoutEngine, FanoutReport};
use crate::registry::Registry;

/// Lifecycle state of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Transport session exists but `connect` has not succeeded yet.
    Unregistered,
    /// Connected, not a member of any group.
    Connecting,
    /// Member of `group_id`.
    Joined {
        /// Current group.
        group_id: String,
    },
    /// Terminal.
    Disconnected,
}

impl SessionState {
    /// Short lowercase name for logs and responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Connecting => "connecting",
            Self::Joined { .. } => "joined",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Reject missing or blank group ids.
pub fn require_group_id(group_id: &str) -> Result<&str, BrokerError> {
    if group_id.trim().is_empty() {
        return Err(BrokerError::invalid_argument("groupId must not be empty"));
    }
    Ok(group_id)
}

/// One connection's session.
#[derive(Clone, Debug)]
pub struct Session {
    connection_id: String,
    state: SessionState,
}

impl Session {
    /// A fresh session awaiting `connect`.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            state: SessionState::Unregistered,
        }
    }

    /// A session for a connection whose `connect` was handled elsewhere.
    ///
    /// Used by stateless callers: the membership store is authoritative, so
    /// the group is unknown here and the session starts as `Connecting`.
    pub fn resume(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            state: SessionState::Connecting,
        }
    }

    /// Transport-assigned connection id.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Group joined through this session, if any.
    pub fn group_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { group_id } => Some(group_id),
            _ => None,
        }
    }

    /// Whether the session reached its terminal state.
    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    fn ensure_open(&self, operation: &str) -> Result<(), BrokerError> {
        if self.is_disconnected() {
            return Err(BrokerError::invalid_state(format!(
                "cannot {operation}: connection {} is disconnected",
                self.connection_id
            )));
        }
        Ok(())
    }

    /// Register the connection, optionally joining `group_id` right away.
    ///
    /// On a store failure the session stays `Unregistered`.
    pub async fn connect(
        &mut self,
        registry: &Registry,
        group_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        if self.state != SessionState::Unregistered {
            return Err(BrokerError::invalid_state(format!(
                "cannot connect: connection {} is already {}",
                self.connection_id,
                self.state.name()
            )));
        }
        match group_id {
            Some(group_id) => {
                let group_id = require_group_id(group_id)?;
                registry.upsert(&self.connection_id, group_id).await?;
                info!(connection_id = %self.connection_id, group_id, "connected and joined group");
                self.state = SessionState::Joined {
                    group_id: group_id.to_owned(),
                };
            }
            None => {
                info!(connection_id = %self.connection_id, "connected");
                self.state = SessionState::Connecting;
            }
        }
        Ok(())
    }

    /// Join `group_id`, leaving any previous group.
    pub async fn join(&mut self, registry: &Registry, group_id: &str) -> Result<(), BrokerError> {
        match self.state {
            SessionState::Connecting | SessionState::Joined { .. } => {}
            SessionState::Unregistered => {
                return Err(BrokerError::invalid_state(format!(
                    "cannot join: connection {} has not connected",
                    self.connection_id
                )));
            }
            SessionState::Disconnected => self.ensure_open("join")?,
        }
        let group_id = require_group_id(group_id)?;
        registry.upsert(&self.connection_id, group_id).await?;
        info!(connection_id = %self.connection_id, group_id, previous = ?self.group_id(), "joined group");
        self.state = SessionState::Joined {
            group_id: group_id.to_owned(),
        };
        Ok(())
    }

    /// Broadcast to `group_id`. Membership in that group is not required.
    pub async fn broadcast(
        &self,
        fanout: &FanoutEngine,
        group_id: &str,
        payload: Bytes,
    ) -> Result<FanoutReport, BrokerError> {
        self.ensure_open("broadcast")?;
        let group_id = require_group_id(group_id)?;
        fanout.broadcast(group_id, payload).await
    }

    /// Drop the membership row and end the session.
    ///
    /// If the delete fails the state is left unchanged so the caller may
    /// try again.
    pub async fn disconnect(&mut self, registry: &Registry) -> Result<(), BrokerError> {
        self.ensure_open("disconnect")?;
        registry.remove(&self.connection_id).await?;
        info!(connection_id = %self.connection_id, "disconnected");
        self.state = SessionState::Disconnected;
        Ok(())
    }
}
