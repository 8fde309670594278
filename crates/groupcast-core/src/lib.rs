//! # groupcast-core
//!
//! Connection registry and group fanout for a real-time group-messaging broker.
//!
//! - [`registry`]: connection → group membership over a durable store
//! - [`fanout`]: concurrent, failure-isolated delivery to every group member
//! - [`session`]: per-connection lifecycle state machine
//! - [`broker`]: the inbound operation surface returning structured responses
//!
//! The transport and the durable store are collaborators behind the
//! [`pusher::ConnectionPusher`] and [`store::MembershipStore`] traits.

#![deny(unsafe_code)]

pub mod broker;
pub mod errors;
pub mod fanout;
pub mod logging;
pub mod operation;
pub mod pusher;
pub mod registry;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::Broker;
pub use errors::{BrokerError, PushError, StoreError};
pub use fanout::{BroadcastOutcome, DeliveryResult, FanoutEngine, FanoutReport};
pub use operation::{Operation, Response};
pub use pusher::ConnectionPusher;
pub use registry::Registry;
pub use session::{Session, SessionState};
pub use store::{InMemoryMembershipStore, MembershipRow, MembershipStore};
