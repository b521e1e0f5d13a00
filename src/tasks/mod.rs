pub mod schedule;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::remote::transport::HttpTransport;
use crate::remote::{
    RemoteError, RemoteTaskClient, TaskHandle, TaskRequest, TaskResult, TaskStatus,
};

/// Local lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl TaskPhase {
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskPhase::{Failed, Polling, Submitted, Succeeded};

        matches!(
            (self, next),
            (Submitted, Polling)
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Polling, Polling)
                | (Polling, Succeeded)
                | (Polling, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn after_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending | TaskStatus::Running => Self::Polling,
            TaskStatus::Succeeded => Self::Succeeded,
            TaskStatus::Failed => Self::Failed,
        }
    }
}

/// Receives task lifecycle events, e.g. to associate results with a picture record.
pub trait TaskSink: Send + Sync + 'static {
    fn task_submitted(&self, handle: &TaskHandle) -> Result<(), String>;
    fn task_finished(&self, handle: &TaskHandle, result: &TaskResult) -> Result<(), String>;
}

pub type SharedTaskSink = Arc<dyn TaskSink>;

#[derive(Debug, Default, Clone)]
pub struct NoopTaskSink;

impl TaskSink for NoopTaskSink {
    fn task_submitted(&self, _handle: &TaskHandle) -> Result<(), String> {
        Ok(())
    }

    fn task_finished(&self, _handle: &TaskHandle, _result: &TaskResult) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPoll {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    pub cached: bool,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("task '{0}' is not tracked by this orchestrator")]
    UnknownTask(String),
    #[error("task sink failed for task '{task_id}': {message}")]
    Sink { task_id: String, message: String },
}

#[derive(Debug, Clone)]
struct TrackedTask {
    phase: TaskPhase,
    terminal: Option<TaskResult>,
    finalizing: bool,
}

impl TrackedTask {
    fn submitted() -> Self {
        Self {
            phase: TaskPhase::Submitted,
            terminal: None,
            finalizing: false,
        }
    }
}

enum Finalization {
    Claimed,
    InProgress,
    Done(TaskResult),
}

pub struct TaskOrchestrator<T> {
    client: RemoteTaskClient<T>,
    sink: SharedTaskSink,
    tasks: Mutex<HashMap<String, TrackedTask>>,
}

impl<T> TaskOrchestrator<T>
where
    T: HttpTransport,
{
    pub fn new(client: RemoteTaskClient<T>, sink: SharedTaskSink) -> Self {
        Self {
            client,
            sink,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &RemoteTaskClient<T> {
        &self.client
    }

    /// Submits once. A failed submission leaves no tracked task behind.
    ///
    /// Once the provider has accepted the job the handle is always returned
    /// and a sink failure is only logged.
    pub fn submit(&self, request: &TaskRequest) -> Result<TaskHandle, TaskError> {
        let handle = self.client.create_task(request)?;
        self.lock_tasks()
            .insert(handle.task_id().to_string(), TrackedTask::submitted());
        if let Err(message) = self.sink.task_submitted(&handle) {
            warn!(
                task_id = %handle.task_id(),
                error = %message,
                "task sink rejected submission; task stays tracked"
            );
        }
        Ok(handle)
    }

    /// Starts tracking a handle obtained earlier, without contacting the provider.
    pub fn resume(&self, handle: &TaskHandle) {
        self.lock_tasks()
            .entry(handle.task_id().to_string())
            .or_insert_with(TrackedTask::submitted);
    }

    pub fn phase(&self, handle: &TaskHandle) -> Option<TaskPhase> {
        self.lock_tasks()
            .get(handle.task_id())
            .map(|tracked| tracked.phase)
    }

    pub fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, TaskError> {
        let task_id = handle.task_id();
        {
            let tasks = self.lock_tasks();
            let tracked = tasks
                .get(task_id)
                .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))?;
            if let Some(result) = tracked.terminal.as_ref() {
                return Ok(TaskPoll {
                    status: result.status(),
                    result: Some(result.clone()),
                    cached: true,
                });
            }
        }

        let (status, result) = match self.client.get_task_status(task_id) {
            Ok(report) => (report.status, report.result),
            Err(RemoteError::RemoteRejected { code, message })
                if is_terminal_provider_code(code.as_str()) =>
            {
                warn!(task_id, code = %code, "provider rejected status query; marking task failed");
                (TaskStatus::Failed, Some(TaskResult::Failed { code, message }))
            }
            Err(error) => return Err(error.into()),
        };

        let next = TaskPhase::after_status(status);
        let Some(result) = result.filter(|_| next.is_terminal()) else {
            self.advance(task_id, next, None);
            return Ok(TaskPoll {
                status,
                result: None,
                cached: false,
            });
        };

        match self.claim_finalization(task_id) {
            Finalization::Done(cached) => {
                return Ok(TaskPoll {
                    status: cached.status(),
                    result: Some(cached),
                    cached: true,
                });
            }
            // Another poller is notifying the sink for this transition.
            Finalization::InProgress => {
                return Ok(TaskPoll {
                    status,
                    result: Some(result),
                    cached: false,
                });
            }
            Finalization::Claimed => {}
        }

        if let Err(message) = self.sink.task_finished(handle, &result) {
            self.release_finalization(task_id);
            return Err(TaskError::Sink {
                task_id: task_id.to_string(),
                message,
            });
        }
        self.advance(task_id, next, Some(result.clone()));
        info!(
            task_id,
            status = status.as_str(),
            images = result.image_urls().len(),
            "task reached terminal state"
        );
        Ok(TaskPoll {
            status,
            result: Some(result),
            cached: false,
        })
    }

    fn advance(&self, task_id: &str, next: TaskPhase, terminal: Option<TaskResult>) {
        let mut tasks = self.lock_tasks();
        let Some(tracked) = tasks.get_mut(task_id) else {
            return;
        };
        if !tracked.phase.can_transition_to(next) {
            return;
        }
        tracked.phase = next;
        if terminal.is_some() {
            tracked.terminal = terminal;
            tracked.finalizing = false;
        }
    }

    fn claim_finalization(&self, task_id: &str) -> Finalization {
        let mut tasks = self.lock_tasks();
        let Some(tracked) = tasks.get_mut(task_id) else {
            return Finalization::Claimed;
        };
        if let Some(result) = tracked.terminal.as_ref() {
            return Finalization::Done(result.clone());
        }
        if tracked.finalizing {
            return Finalization::InProgress;
        }
        tracked.finalizing = true;
        Finalization::Claimed
    }

    fn release_finalization(&self, task_id: &str) {
        if let Some(tracked) = self.lock_tasks().get_mut(task_id) {
            tracked.finalizing = false;
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, TrackedTask>> {
        // A poisoned map is still consistent: every write is a single assignment.
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Provider codes that will not change on a retry of the same status query.
pub fn is_terminal_provider_code(code: &str) -> bool {
    let code = code.trim();
    if code.starts_with("Throttling") || code.starts_with("InternalError") {
        return false;
    }
    !matches!(
        code,
        "SystemError" | "ServiceUnavailable" | "RequestTimeOut" | ""
    )
}
