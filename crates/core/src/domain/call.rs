use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::errors::DomainError;

pub const DEFAULT_ORIGINATE_TIMEOUT: Duration = Duration::from_secs(30);

/// A caller reaching the PBX, as detected from a `Newchannel` manager event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundCallEvent {
    pub caller_number: String,
    pub caller_name: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundCallEvent {
    pub fn new(caller_number: impl Into<String>, caller_name: impl Into<String>) -> Self {
        Self {
            caller_number: caller_number.into(),
            caller_name: caller_name.into(),
            timestamp: Utc::now(),
        }
    }

    /// Customer card pushed to front-end clients. Only the number and name are
    /// known from the PBX; the remaining fields are filled in by the agent.
    pub fn client_card(&self) -> Value {
        json!({
            "numero": self.caller_number,
            "nom": self.caller_name,
            "prenom": "",
            "adresse": "",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginateRequest {
    pub from_extension: String,
    pub to_destination: String,
    pub caller_id_label: String,
    pub timeout: Duration,
}

impl OriginateRequest {
    pub fn new(from: &str, to: &str) -> Result<Self, DomainError> {
        let from = from.trim();
        let to = to.trim();
        if from.is_empty() {
            return Err(DomainError::MissingField("from"));
        }
        if to.is_empty() {
            return Err(DomainError::MissingField("to"));
        }
        reject_control_chars("from", from)?;
        reject_control_chars("to", to)?;

        Ok(Self {
            from_extension: from.to_owned(),
            to_destination: to.to_owned(),
            caller_id_label: format!("poste {from}"),
            timeout: DEFAULT_ORIGINATE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_ms(&self) -> u128 {
        self.timeout.as_millis()
    }
}

/// Endpoints end up as manager header values, where a line break would start
/// a new header or a new action.
fn reject_control_chars(field: &'static str, value: &str) -> Result<(), DomainError> {
    if value.chars().any(char::is_control) {
        return Err(DomainError::InvalidField {
            field,
            reason: "control characters are not allowed".to_owned(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("invalid originate request: {0}")]
    InvalidRequest(String),
    #[error("manager link is not available")]
    ConnectionUnavailable,
    #[error("manager rejected the action: {0}")]
    Manager(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginateResult {
    Accepted { action_id: String },
    Rejected(RejectReason),
    TimedOut,
}

impl OriginateResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Accepted { action_id } => format!("accepted ({action_id})"),
            Self::Rejected(reason) => format!("rejected: {reason}"),
            Self::TimedOut => "timed out waiting for the manager".to_owned(),
        }
    }
}

/// Places an outbound call between an internal extension and a destination.
#[async_trait]
pub trait CallDialer: Send + Sync {
    async fn originate(&self, from: &str, to: &str) -> OriginateResult;
}
