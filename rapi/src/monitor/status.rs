use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// Lifecycle of a server-side background task. `Cancelled` is never reported
/// by the server, it only exists on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Maps a wire status (case-insensitive) to a state. Unrecognized values
    /// are an error rather than a guess.
    pub fn from_wire(status: &str) -> Result<Self, MonitorError> {
        match status.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => Ok(TaskState::Queued),
            "processing" | "running" => Ok(TaskState::Running),
            "completed" | "success" => Ok(TaskState::Completed),
            "failed" | "error" => Ok(TaskState::Failed),
            _ => Err(MonitorError::UnknownStatus(status.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Staying in the same state is always allowed; otherwise states only
    /// move forward and terminal states are final.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Queued, Running | Completed | Failed | Cancelled) => true,
            (Running, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s)
    }
}

/// Status document as returned by the task status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusDocument {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Either a plain string or an `{ "message": ... }` object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl TaskStatusDocument {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn state(&self) -> Result<TaskState, MonitorError> {
        TaskState::from_wire(&self.status)
    }

    /// Best available explanation of a failure.
    pub fn failure_reason(&self) -> String {
        let from_error = match &self.error {
            Some(Value::String(reason)) if !reason.is_empty() => Some(reason.clone()),
            Some(Value::Object(error)) => error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        from_error
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Task failed".to_string())
    }
}

/// What progress callbacks see. Two polls returning equal snapshots report
/// progress only once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub state: TaskState,
    pub progress_percentage: Option<f64>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub step_name: Option<String>,
    pub message: Option<String>,
}

impl TaskSnapshot {
    pub fn new(task_id: &str, state: TaskState, document: &TaskStatusDocument) -> Self {
        Self {
            task_id: task_id.to_string(),
            state,
            progress_percentage: document.progress_percentage,
            current_step: document.current_step,
            total_steps: document.total_steps,
            step_name: document.step_name.clone(),
            message: document.message.clone(),
        }
    }
}
