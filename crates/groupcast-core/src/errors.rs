//! Error taxonomy for broker operations and their collaborators.

use std::time::Duration;

// ── Error code constants ────────────────────────────────────────────

/// Malformed or missing caller input.
pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
/// The membership store rejected a write.
pub const STORE_WRITE_FAILED: &str = "STORE_WRITE_FAILED";
/// The membership store could not be read.
pub const STORE_READ_FAILED: &str = "STORE_READ_FAILED";
/// Route name not recognized.
pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
/// Operation not legal in the session's current state.
pub const INVALID_STATE: &str = "INVALID_STATE";
/// Every delivery attempt of a broadcast failed.
pub const BROADCAST_FAILED: &str = "BROADCAST_FAILED";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Message returned to callers for internal errors. The cause is only logged.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Failure reported by a [`MembershipStore`](crate::store::MembershipStore).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (pool exhausted, file missing, ...).
    #[error("membership store unavailable: {0}")]
    Unavailable(String),
    /// The backend accepted the request but failed executing it.
    #[error("membership store backend error: {0}")]
    Backend(String),
}

/// Failure reported by a [`ConnectionPusher`](crate::pusher::ConnectionPusher)
/// for a single recipient.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// No live connection with that id.
    #[error("connection is gone")]
    Gone,
    /// The connection's outbound queue is full.
    #[error("outbound queue is full")]
    Backpressure,
    /// The attempt did not finish within the per-attempt bound.
    #[error("push timed out after {0:?}")]
    Timeout(Duration),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Error kinds surfaced by inbound operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Caller error, never retried.
    #[error("{message}")]
    InvalidArgument {
        /// Description of what is wrong.
        message: String,
    },

    /// Membership upsert or delete failed.
    #[error("membership store write failed")]
    StoreWriteFailed {
        /// Underlying store failure (logged, not shown to callers).
        #[source]
        source: StoreError,
    },

    /// Membership lookup failed.
    #[error("membership store read failed")]
    StoreReadFailed {
        /// Underlying store failure (logged, not shown to callers).
        #[source]
        source: StoreError,
    },

    /// Route name that maps to no operation.
    #[error("Unknown route: {operation}")]
    UnknownOperation {
        /// The offending route name, echoed back.
        operation: String,
    },

    /// Operation is not legal in the session's current state.
    #[error("{message}")]
    InvalidState {
        /// Description of the rejected transition.
        message: String,
    },

    /// Catch-all for unexpected failures.
    #[error("{message}")]
    Internal {
        /// Detailed cause, for operators only.
        message: String,
    },
}

impl BrokerError {
    /// Shorthand for [`BrokerError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`BrokerError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Shorthand for [`BrokerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => INVALID_ARGUMENT,
            Self::StoreWriteFailed { .. } => STORE_WRITE_FAILED,
            Self::StoreReadFailed { .. } => STORE_READ_FAILED,
            Self::UnknownOperation { .. } => UNKNOWN_OPERATION,
            Self::InvalidState { .. } => INVALID_STATE,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// HTTP-style status: 400 for caller errors, 500 for everything else.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidArgument { .. }
            | Self::UnknownOperation { .. }
            | Self::InvalidState { .. } => 400,
            Self::StoreWriteFailed { .. } | Self::StoreReadFailed { .. } | Self::Internal { .. } => {
                500
            }
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => INTERNAL_ERROR_MESSAGE.to_owned(),
            other => other.to_string(),
        }
    }

    /// Whether the caller caused this error.
    pub fn is_caller_error(&self) -> bool {
        self.status() < 500
    }
}
