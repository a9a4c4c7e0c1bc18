//! Fix lifecycle vocabulary: notification frames pushed by the backend over
//! the fix channel, and the status enums the UI layer renders.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a JSON frame cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is not valid JSON or does not match the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Inbound notification on `/errors/ws/{project_id}`.
///
/// Pushed once the backend starts acting on a previously forwarded batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixNotification {
    /// The backend began a remediation attempt.
    FixStarted {
        /// Why the fix was triggered.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The remediation attempt finished and patches were applied.
    FixCompleted {
        /// Number of patches applied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patches_applied: Option<u32>,
        /// Files touched by the fix.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files_modified: Vec<String>,
    },
    /// The remediation attempt failed.
    FixFailed {
        /// Failure description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl FixNotification {
    /// Decodes a notification from a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] for invalid JSON or an unknown `type`.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes this notification as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Status of the current remediation attempt. Changes only on markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    /// No fix has been attempted since the last reset.
    #[default]
    Idle,
    /// A fix is in progress.
    Fixing,
    /// The last fix succeeded.
    Success,
    /// The last fix failed; more attempts may follow.
    Failed,
    /// The backend gave up.
    Exhausted,
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fixing => "fixing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Overall state of a project's execution, derived from [`FixStatus`] and
/// raw execution signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Nothing has run yet.
    #[default]
    Pending,
    /// The container is starting or running.
    Running,
    /// The preview server came up.
    Success,
    /// Execution or a fix failed.
    Failed,
    /// A fix is in progress.
    Fixing,
    /// A fix succeeded.
    Fixed,
    /// Fix attempts are used up.
    Exhausted,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Fixing => "fixing",
            Self::Fixed => "fixed",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}
