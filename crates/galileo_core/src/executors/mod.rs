pub mod python;
pub mod webhook;

use serde::{Deserialize, Serialize};

/// Normalized outcome of one execution dispatch, regardless of backend.
/// Exactly one of `image_data` / `error` may be set; stdout rides along.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionResult {
    /// Base64-encoded PNG produced by the snippet, if any.
    pub image_data: Option<String>,
    /// Captured printed output.
    pub stdout: Option<String>,
    /// Fault text: a snippet runtime error, a transport failure, or a timeout.
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn from_error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
