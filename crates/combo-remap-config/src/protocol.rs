//! Control socket messages
//!
//! One JSON object per line, discriminated by a `type` field:
//! - `{"type": "status"}`
//! - `{"type": "reload"}`
//! - `{"type": "toggle"}`

use serde::{Deserialize, Serialize};

/// Lifecycle state of the remap service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Starting,
    Running,
    Reloading,
    Stopped,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Reloading => "reloading",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request messages sent from the CLI to the daemon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Status,
    Start,
    Stop,
    Reload,
    Enable,
    Disable,
    Toggle,
}

/// Response messages sent from the daemon back to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Operation completed successfully
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Status {
        state: ServiceState,
        enabled: bool,
        /// Human-readable label, e.g. `running (disabled)`
        label: String,
    },
    Error {
        message: String,
    },
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
