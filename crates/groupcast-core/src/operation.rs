//! Inbound operations and their structured responses.
//!
//! Clients name an operation by route: either the transport's route key or
//! the `action` field of a JSON frame. Route names follow the gateway
//! conventions (`$connect`, `register`, `sendMessage`, `$disconnect`,
//! `$default`) and accept plain aliases.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{self, BrokerError};
use crate::fanout::{BroadcastOutcome, FanoutReport};

/// Response message for the default route.
pub const DEFAULT_ROUTE_MESSAGE: &str = "No action given; request hit the default route";

/// A parsed inbound operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Register the connection, optionally joining a group.
    Connect {
        /// Group to join immediately.
        group_id: Option<String>,
    },
    /// Join (or switch to) a group.
    Join {
        /// Target group.
        group_id: String,
    },
    /// Send a payload to every member of a group.
    Broadcast {
        /// Target group.
        group_id: String,
        /// Bytes pushed to each recipient.
        payload: Bytes,
    },
    /// Remove the connection's membership and end the session.
    Disconnect,
    /// No recognizable action; acknowledged without effect.
    Default,
}

impl Operation {
    /// Canonical operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Join { .. } => "join",
            Self::Broadcast { .. } => "broadcast",
            Self::Disconnect => "disconnect",
            Self::Default => "default",
        }
    }

    /// Parse an operation from a route name and an optional JSON body.
    ///
    /// A missing or empty body is treated as `{}`.
    pub fn parse(route: &str, body: Option<&str>) -> Result<Self, BrokerError> {
        let fields = parse_body(body)?;
        Self::from_fields(route, &fields)
    }

    /// Parse a self-describing frame: a JSON object whose `action` field
    /// names the route. A frame without `action` hits the default route.
    pub fn from_frame(frame: &str) -> Result<Self, BrokerError> {
        let fields = parse_body(Some(frame))?;
        match fields.get("action") {
            None | Some(Value::Null) => Ok(Self::Default),
            Some(Value::String(route)) => Self::from_fields(route, &fields),
            Some(_) => Err(BrokerError::invalid_argument("action must be a string")),
        }
    }

    fn from_fields(route: &str, fields: &Map<String, Value>) -> Result<Self, BrokerError> {
        match route {
            "$connect" | "connect" => Ok(Self::Connect {
                group_id: optional_string(fields, "groupId")?,
            }),
            "register" | "join" => Ok(Self::Join {
                group_id: required_string(fields, "groupId")?,
            }),
            "sendMessage" | "broadcast" => Ok(Self::Broadcast {
                group_id: required_string(fields, "groupId")?,
                payload: message_payload(fields)?,
            }),
            "$disconnect" | "disconnect" => Ok(Self::Disconnect),
            "$default" => Ok(Self::Default),
            other => Err(BrokerError::UnknownOperation {
                operation: other.to_owned(),
            }),
        }
    }
}

fn parse_body(body: Option<&str>) -> Result<Map<String, Value>, BrokerError> {
    let body = body.map(str::trim).filter(|b| !b.is_empty()).unwrap_or("{}");
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BrokerError::invalid_argument(
            "Invalid JSON body: expected an object",
        )),
        Err(e) => Err(BrokerError::invalid_argument(format!("Invalid JSON body: {e}"))),
    }
}

fn optional_string(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, BrokerError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(BrokerError::invalid_argument(format!("{key} must be a string"))),
    }
}

fn required_string(fields: &Map<String, Value>, key: &str) -> Result<String, BrokerError> {
    optional_string(fields, key)?
        .ok_or_else(|| BrokerError::invalid_argument(format!("{key} is required")))
}

/// Strings are sent verbatim; any other JSON value is sent as its JSON text.
fn message_payload(fields: &Map<String, Value>) -> Result<Bytes, BrokerError> {
    match fields.get("message") {
        None | Some(Value::Null) => Err(BrokerError::invalid_argument("message is required")),
        Some(Value::String(s)) => Ok(Bytes::from(s.clone())),
        Some(other) => Ok(Bytes::from(other.to_string())),
    }
}

/// Structured result of an inbound operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Operation name, or the unrecognized route echoed back.
    pub operation: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Machine-readable error code (failures only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Response {
    /// A 200 success.
    pub fn ok(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: 200,
            success: true,
            code: None,
            message: message.into(),
            detail: None,
        }
    }

    /// Failure response for `err`. Internal errors get a generic message.
    pub fn from_error(operation: impl Into<String>, err: &BrokerError) -> Self {
        let operation = match err {
            BrokerError::UnknownOperation { operation } => operation.clone(),
            _ => operation.into(),
        };
        Self {
            operation,
            status: err.status(),
            success: false,
            code: Some(err.code().to_owned()),
            message: err.public_message(),
            detail: None,
        }
    }

    /// Aggregate a broadcast: any delivery is success, none is failure.
    pub fn from_broadcast(report: &FanoutReport) -> Self {
        let outcome = report.outcome();
        let detail = json!({
            "groupId": report.group_id,
            "outcome": outcome_name(outcome),
            "recipients": report.recipients(),
            "delivered": report.delivered(),
            "failed": report.failed(),
        });
        let mut resp = match outcome {
            BroadcastOutcome::NoRecipients => Self::ok("broadcast", "No recipients in group"),
            BroadcastOutcome::Completed { .. } => Self::ok("broadcast", "Message broadcasted"),
            BroadcastOutcome::Failed { .. } => Self {
                operation: "broadcast".into(),
                status: 500,
                success: false,
                code: Some(errors::BROADCAST_FAILED.to_owned()),
                message: "Failed to send message".into(),
                detail: None,
            },
        };
        resp.detail = Some(detail);
        resp
    }

    /// Serialize for the wire. Falls back to a minimal error frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize response");
            fallback_json(&self.operation)
        })
    }
}

/// Minimal internal-error frame for `operation`.
fn fallback_json(operation: &str) -> String {
    json!({
        "operation": operation,
        "status": 500,
        "success": false,
        "code": errors::INTERNAL_ERROR,
        "message": errors::INTERNAL_ERROR_MESSAGE,
    })
    .to_string()
}

/// Wire name of a broadcast outcome.
pub fn outcome_name(outcome: BroadcastOutcome) -> &'static str {
    match outcome {
        BroadcastOutcome::NoRecipients => "noRecipients",
        BroadcastOutcome::Completed { .. } => "completed",
        BroadcastOutcome::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PushError;
    use crate::fanout::DeliveryResult;
    use assert_matches::assert_matches;

    #[test]
    fn parse_connect_with_and_without_group() {
        assert_eq!(
            Operation::parse("$connect", Some(r#"{"groupId":"A"}"#)).unwrap(),
            Operation::Connect {
                group_id: Some("A".into())
            }
        );
        assert_eq!(
            Operation::parse("$connect", None).unwrap(),
            Operation::Connect { group_id: None }
        );
    }

    #[test]
    fn parse_register_alias() {
        let op = Operation::parse("register", Some(r#"{"groupId":"room"}"#)).unwrap();
        assert_eq!(op, Operation::Join {
            group_id: "room".into()
        });
        assert_eq!(op.name(), "join");
    }

    #[test]
    fn parse_join_missing_group_is_invalid() {
        assert_matches!(
            Operation::parse("join", Some("{}")),
            Err(BrokerError::InvalidArgument { .. })
        );
        assert_matches!(
            Operation::parse("join", Some(r#"{"groupId":42}"#)),
            Err(BrokerError::InvalidArgument { .. })
        );
    }

    #[test]
    fn parse_send_message_string_payload_verbatim() {
        let op = Operation::parse("sendMessage", Some(r#"{"groupId":"A","message":"hi"}"#)).unwrap();
        assert_eq!(op, Operation::Broadcast {
            group_id: "A".into(),
            payload: Bytes::from_static(b"hi"),
        });
    }

    #[test]
    fn parse_broadcast_json_payload_serialized() {
        let op =
            Operation::parse("broadcast", Some(r#"{"groupId":"A","message":{"n":1}}"#)).unwrap();
        assert_matches!(op, Operation::Broadcast { payload, .. } => {
            assert_eq!(&payload[..], br#"{"n":1}"#);
        });
    }

    #[test]
    fn parse_broadcast_without_message_is_invalid() {
        assert_matches!(
            Operation::parse("sendMessage", Some(r#"{"groupId":"A"}"#)),
            Err(BrokerError::InvalidArgument { .. })
        );
    }

    #[test]
    fn parse_unparsable_body_is_invalid() {
        assert_matches!(
            Operation::parse("join", Some("not json")),
            Err(BrokerError::InvalidArgument { .. })
        );
        assert_matches!(
            Operation::parse("join", Some("[1,2]")),
            Err(BrokerError::InvalidArgument { .. })
        );
    }

    #[test]
    fn parse_unknown_route_echoes_name() {
        let err = Operation::parse("shout", None).unwrap_err();
        assert_matches!(err, BrokerError::UnknownOperation { ref operation } if operation == "shout");
        let resp = Response::from_error("ignored", &err);
        assert_eq!(resp.operation, "shout");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.message, "Unknown route: shout");
    }

    #[test]
    fn parse_disconnect_and_default() {
        assert_eq!(Operation::parse("$disconnect", None).unwrap(), Operation::Disconnect);
        assert_eq!(Operation::parse("$default", Some("{}")).unwrap(), Operation::Default);
    }

    #[test]
    fn frame_routes_by_action() {
        let op = Operation::from_frame(r#"{"action":"sendMessage","groupId":"A","message":"x"}"#)
            .unwrap();
        assert_eq!(op.name(), "broadcast");
        assert_eq!(Operation::from_frame(r#"{"groupId":"A"}"#).unwrap(), Operation::Default);
        assert_matches!(
            Operation::from_frame(r#"{"action":7}"#),
            Err(BrokerError::InvalidArgument { .. })
        );
        assert_matches!(
            Operation::from_frame(r#"{"action":"dance"}"#),
            Err(BrokerError::UnknownOperation { .. })
        );
    }

    fn report(results: Vec<(&str, DeliveryResult)>) -> FanoutReport {
        FanoutReport {
            group_id: "A".into(),
            results: results
                .into_iter()
                .map(|(id, r)| (id.to_owned(), r))
                .collect(),
        }
    }

    #[test]
    fn broadcast_response_no_recipients_is_success() {
        let resp = Response::from_broadcast(&report(vec![]));
        assert!(resp.success);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.detail.unwrap()["outcome"], "noRecipients");
    }

    #[test]
    fn broadcast_response_partial_is_success() {
        let resp = Response::from_broadcast(&report(vec![
            ("c1", DeliveryResult::Delivered),
            ("c2", DeliveryResult::Failed(PushError::Gone)),
        ]));
        assert!(resp.success);
        assert_eq!(resp.message, "Message broadcasted");
        let detail = resp.detail.unwrap();
        assert_eq!(detail["delivered"], 1);
        assert_eq!(detail["failed"], 1);
    }

    #[test]
    fn broadcast_response_all_failed() {
        let resp = Response::from_broadcast(&report(vec![(
            "c1",
            DeliveryResult::Failed(PushError::Backpressure),
        )]));
        assert!(!resp.success);
        assert_eq!(resp.status, 500);
        assert_eq!(resp.code.as_deref(), Some(errors::BROADCAST_FAILED));
    }

    #[test]
    fn fallback_frame_is_valid_json() {
        let op = "we\"ird\u{e9}\u{1f600}\n";
        let parsed: Value = serde_json::from_str(&fallback_json(op)).unwrap();
        assert_eq!(parsed["operation"], op);
        assert_eq!(parsed["status"], 500);
        assert_eq!(parsed["code"], errors::INTERNAL_ERROR);
        assert_eq!(parsed["message"], errors::INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn response_json_shape() {
        let json: Value = serde_json::from_str(&Response::ok("join", "Group registered").to_json())
            .unwrap();
        assert_eq!(json["operation"], "join");
        assert_eq!(json["success"], true);
        assert!(json.get("code").is_none());
        assert!(json.get("detail").is_none());
    }
}
