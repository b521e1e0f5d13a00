pub mod client;
pub mod request;
pub mod transport;
mod wire;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{ApiKey, RemoteEndpoints, RemoteTaskClient, DEFAULT_API_BASE};
pub use request::{
    ImageSize, OutpaintingParameters, OutpaintingRequest, TaskRequest, TextToImageRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Outpainting,
    TextToImage,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outpainting => "outpainting",
            Self::TextToImage => "text_to_image",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "outpainting" => Ok(Self::Outpainting),
            "text_to_image" => Ok(Self::TextToImage),
            other => Err(format!("unknown task kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Maps a provider `task_status` value. Unrecognised values read as still pending.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "SUSPENDED" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" | "CANCELED" | "UNKNOWN" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    Succeeded { image_urls: Vec<String> },
    Failed { code: String, message: String },
}

impl TaskResult {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Succeeded { .. } => TaskStatus::Succeeded,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn image_urls(&self) -> &[String] {
        match self {
            Self::Succeeded { image_urls } => image_urls.as_slice(),
            Self::Failed { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTaskHandle")]
pub struct TaskHandle {
    task_id: String,
    submitted_at: DateTime<Utc>,
    kind: TaskKind,
}

#[derive(Deserialize)]
struct RawTaskHandle {
    task_id: String,
    submitted_at: DateTime<Utc>,
    kind: TaskKind,
}

impl TryFrom<RawTaskHandle> for TaskHandle {
    type Error = RemoteError;

    fn try_from(raw: RawTaskHandle) -> Result<Self, Self::Error> {
        Self::new(raw.task_id, raw.kind, raw.submitted_at)
    }
}

impl TaskHandle {
    /// Rebuilds a handle for a job that already exists remotely (e.g. loaded from the task store).
    pub fn new(
        task_id: impl Into<String>,
        kind: TaskKind,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, RemoteError> {
        let task_id = task_id.into().trim().to_string();
        if task_id.is_empty() {
            return Err(RemoteError::InvalidTaskId);
        }
        Ok(Self {
            task_id,
            submitted_at,
            kind,
        })
    }

    pub fn task_id(&self) -> &str {
        self.task_id.as_str()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusReport {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("invalid task request: {0}")]
    InvalidRequest(String),
    #[error("task id must not be blank")]
    InvalidTaskId,
    #[error("{message}")]
    TransportFailure {
        status: Option<u16>,
        message: String,
    },
    #[error("provider rejected request ({code}): {message}")]
    RemoteRejected { code: String, message: String },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_states_map_to_local_status() {
        assert_eq!(TaskStatus::from_provider("PENDING"), TaskStatus::Pending);
        assert_eq!(TaskStatus::from_provider("running"), TaskStatus::Running);
        assert_eq!(TaskStatus::from_provider("SUSPENDED"), TaskStatus::Running);
        assert_eq!(TaskStatus::from_provider("SUCCEEDED"), TaskStatus::Succeeded);
        assert_eq!(TaskStatus::from_provider("FAILED"), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_provider("CANCELED"), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_provider("UNKNOWN"), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_provider(""), TaskStatus::Pending);
    }

    #[test]
    fn deserialized_handles_are_validated() {
        let handle: TaskHandle = serde_json::from_value(serde_json::json!({
            "task_id": " task-9 ",
            "submitted_at": "2025-03-01T08:00:00Z",
            "kind": "text_to_image"
        }))
        .expect("valid handle");
        assert_eq!(handle.task_id(), "task-9");
        assert_eq!(handle.kind(), TaskKind::TextToImage);

        let blank = serde_json::from_value::<TaskHandle>(serde_json::json!({
            "task_id": "   ",
            "submitted_at": "2025-03-01T08:00:00Z",
            "kind": "outpainting"
        }));
        assert!(blank.is_err(), "blank task id must not deserialize");
    }

    #[test]
    fn handle_rejects_blank_task_id() {
        let err = TaskHandle::new("   ", TaskKind::Outpainting, Utc::now())
            .expect_err("blank id should fail");
        assert_eq!(err, RemoteError::InvalidTaskId);
    }

    #[test]
    fn task_result_serializes_with_outcome_tag() {
        let value = serde_json::to_value(TaskResult::Failed {
            code: String::from("InvalidParameter"),
            message: String::from("bad size"),
        })
        .expect("result should serialize");
        assert_eq!(value["outcome"], serde_json::json!("failed"));
        assert_eq!(value["code"], serde_json::json!("InvalidParameter"));
    }
}
