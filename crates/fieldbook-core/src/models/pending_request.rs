//! Pending request (outbox item) model
//!
//! One row per not-yet-confirmed remote mutation. Items are idempotent under
//! retry by `temp_id` and order-preserving per entity through
//! `depends_on_temp_id`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Unique outbox row identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("req_{}", Uuid::now_v7().simple()))
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an existing id string (from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOp {
    Create,
    Update,
    Delete,
}

impl RequestOp {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse from stable storage name.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown request op: {other}"))),
        }
    }
}

/// Outbox processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Waiting for the next sync drain.
    Pending,
    /// Currently being replayed against the remote.
    Syncing,
    /// Remote confirmed.
    Synced,
    /// Non-retryable rejection; surfaced to the user, skipped by the drain.
    Failed,
}

impl RequestStatus {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Parse from stable storage name.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown request status: {other}"
            ))),
        }
    }
}

/// A durable, not-yet-confirmed remote mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Outbox row id.
    pub request_id: RequestId,
    /// Mutation kind.
    pub op: RequestOp,
    /// Logical remote table name.
    pub endpoint: String,
    /// Mutation payload; temp ids inside are redirected at drain time.
    pub payload: serde_json::Value,
    /// Caller-assigned temporary id the mutation targets or creates.
    pub temp_id: Option<String>,
    /// Temp id of a parent entity whose create must confirm first.
    pub depends_on_temp_id: Option<String>,
    /// Processing state.
    pub status: RequestStatus,
    /// Replay attempts so far.
    pub attempts: i64,
    /// Last failure message, for diagnostics and the retry affordance.
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
}

impl PendingRequest {
    /// Create a pending mutation.
    pub fn new(
        op: RequestOp,
        endpoint: impl Into<String>,
        payload: serde_json::Value,
        temp_id: Option<String>,
        depends_on_temp_id: Option<String>,
    ) -> Result<Self> {
        let endpoint = endpoint.into().trim().to_string();
        if endpoint.is_empty() {
            return Err(Error::InvalidInput(
                "Request endpoint cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            request_id: RequestId::new(),
            op,
            endpoint,
            payload,
            temp_id,
            depends_on_temp_id,
            status: RequestStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: unix_millis_now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_rejects_empty_endpoint() {
        assert!(PendingRequest::new(RequestOp::Create, "  ", json!({}), None, None).is_err());
    }

    #[test]
    fn new_defaults() {
        let request = PendingRequest::new(
            RequestOp::Create,
            "visuals",
            json!({"Category": "Foundations"}),
            Some("temp_visual_a".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.attempts, 0);
        assert!(request.last_error.is_none());
    }

    #[test]
    fn op_and_status_round_trip() {
        for op in [RequestOp::Create, RequestOp::Update, RequestOp::Delete] {
            assert_eq!(RequestOp::parse(op.as_str()).unwrap(), op);
        }
        for status in [
            RequestStatus::Pending,
            RequestStatus::Syncing,
            RequestStatus::Synced,
            RequestStatus::Failed,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
