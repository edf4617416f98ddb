use serde::{Deserialize, Serialize};

use crate::retry::RetryAttempt;

/// Why a message ended up in the dead letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqErrorCode {
    /// All retry attempts exhausted.
    MaxRetriesExceeded,
    /// Failed to deserialize the message payload.
    DeserializationError,
}

impl DlqErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
        }
    }
}

impl std::fmt::Display for DlqErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for transporting failed judge jobs to the DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    /// Original job ID.
    pub message_id: String,
    /// `None` when the submission ID could not be determined
    /// (e.g. deserialization failed before extracting it).
    pub submission_id: Option<i32>,
    /// Full serialized message payload.
    pub payload: serde_json::Value,
    pub error_code: DlqErrorCode,
    pub error_message: String,
    /// History of retry attempts before reaching the DLQ.
    pub retry_history: Vec<RetryAttempt>,
}
