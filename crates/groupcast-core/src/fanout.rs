//! Group fanout: resolve recipients, push to all of them concurrently, and
//! aggregate per-recipient results into a best-effort outcome.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::errors::{BrokerError, PushError};
use crate::pusher::ConnectionPusher;
use crate::registry::Registry;

/// Default bound on a single push attempt.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one push attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The pusher accepted the payload.
    Delivered,
    /// The attempt failed or timed out.
    Failed(PushError),
}

impl DeliveryResult {
    /// Whether the payload was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Aggregate result of a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The group had no members. Not an error.
    NoRecipients,
    /// At least one recipient received the payload.
    Completed {
        /// Successful deliveries.
        delivered: usize,
        /// Failed deliveries.
        failed: usize,
    },
    /// Every attempted delivery failed.
    Failed {
        /// Number of recipients attempted.
        attempted: usize,
    },
}

/// Per-recipient results of one broadcast. Never persisted.
#[derive(Clone, Debug)]
pub struct FanoutReport {
    /// Target group.
    pub group_id: String,
    /// One entry per distinct recipient.
    pub results: Vec<(String, DeliveryResult)>,
}

impl FanoutReport {
    /// Number of recipients attempted.
    pub fn recipients(&self) -> usize {
        self.results.len()
    }

    /// Number of successful deliveries.
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_delivered()).count()
    }

    /// Number of failed deliveries.
    pub fn failed(&self) -> usize {
        self.recipients() - self.delivered()
    }

    #[cfg(test)]
    fn result_for(&self, connection_id: &str) -> Option<&DeliveryResult> {
        self.results
            .iter()
            .find(|(id, _)| id == connection_id)
            .map(|(_, r)| r)
    }

    /// Any success wins; only a total failure is a failure.
    pub fn outcome(&self) -> BroadcastOutcome {
        let delivered = self.delivered();
        match (self.recipients(), delivered) {
            (0, _) => BroadcastOutcome::NoRecipients,
            (attempted, 0) => BroadcastOutcome::Failed { attempted },
            (_, delivered) => BroadcastOutcome::Completed {
                delivered,
                failed: self.failed(),
            },
        }
    }
}

/// Drives broadcasts through a [`ConnectionPusher`].
#[derive(Clone)]
pub struct FanoutEngine {
    registry: Registry,
    pusher: Arc<dyn ConnectionPusher>,
    push_timeout: Duration,
}

impl FanoutEngine {
    /// Create an engine with [`DEFAULT_PUSH_TIMEOUT`].
    pub fn new(registry: Registry, pusher: Arc<dyn ConnectionPusher>) -> Self {
        Self {
            registry,
            pusher,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    /// Override the per-attempt timeout.
    #[must_use]
    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    /// Per-attempt timeout in effect.
    pub fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    /// Deliver `payload` to every current member of `group_id`.
    ///
    /// All attempts run concurrently and each is bounded by the push timeout,
    /// so a stalled connection only costs its own attempt. A pusher that
    /// panics fails only the attempt it panicked in. Returns once every
    /// attempt has resolved. Only a failed member lookup is an `Err`; push
    /// failures are reported inside the [`FanoutReport`].
    pub async fn broadcast(&self, group_id: &str, payload: Bytes) -> Result<FanoutReport, BrokerError> {
        let members = self.registry.members_of(group_id).await?;

        // one attempt per recipient, even if the store repeats a row
        let mut seen = HashSet::with_capacity(members.len());
        let recipients: Vec<String> = members
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if recipients.is_empty() {
            debug!(group_id, "broadcast to empty group");
            return Ok(FanoutReport {
                group_id: group_id.to_owned(),
                results: Vec::new(),
            });
        }

        let pusher = &self.pusher;
        let push_timeout = self.push_timeout;
        let attempts = recipients.into_iter().map(|connection_id| {
            let payload = payload.clone();
            async move {
                let attempt = AssertUnwindSafe(pusher.push(&connection_id, payload)).catch_unwind();
                let result = match tokio::time::timeout(push_timeout, attempt).await {
                    Ok(Ok(Ok(()))) => DeliveryResult::Delivered,
                    Ok(Ok(Err(e))) => DeliveryResult::Failed(e),
                    Ok(Err(_panic)) => {
                        DeliveryResult::Failed(PushError::Transport("pusher panicked".into()))
                    }
                    Err(_elapsed) => DeliveryResult::Failed(PushError::Timeout(push_timeout)),
                };
                if let DeliveryResult::Failed(ref reason) = result {
                    warn!(connection_id = %connection_id, group_id, error = %reason, "failed to push message to connection");
                }
                (connection_id, result)
            }
        });

        let results = futures::future::join_all(attempts).await;
        let report = FanoutReport {
            group_id: group_id.to_owned(),
            results,
        };
        debug!(
            group_id,
            recipients = report.recipients(),
            delivered = report.delivered(),
            "broadcast finished"
        );
        Ok(report)
    }
}
