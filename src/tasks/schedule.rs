//! Fixed-delay polling loop for callers that want to block until a task settles.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::{TaskError, TaskOrchestrator, TaskPoll};
use crate::remote::transport::HttpTransport;
use crate::remote::{RemoteError, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_duration: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_duration: Duration::from_secs(300),
            max_consecutive_failures: 3,
        }
    }
}

impl PollSchedule {
    pub fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("task '{task_id}' did not finish within {waited:?}")]
    TimedOut { task_id: String, waited: Duration },
}

pub fn thread_sleeper(delay: Duration) {
    thread::sleep(delay);
}

/// Polls until the task is terminal. Transient failures are retried up to the
/// schedule's limit; everything else is returned to the caller.
pub fn wait_for_terminal<T, S>(
    orchestrator: &TaskOrchestrator<T>,
    handle: &TaskHandle,
    schedule: &PollSchedule,
    mut sleep: S,
) -> Result<TaskPoll, WaitError>
where
    T: HttpTransport,
    S: FnMut(Duration),
{
    let started = Instant::now();
    let mut consecutive_failures = 0u32;
    loop {
        match orchestrator.poll(handle) {
            Ok(poll) if poll.status.is_terminal() => return Ok(poll),
            Ok(poll) => {
                consecutive_failures = 0;
                debug!(task_id = %handle.task_id(), status = poll.status.as_str(), "task still in progress");
            }
            Err(error) if is_transient(&error) => {
                consecutive_failures += 1;
                if consecutive_failures > schedule.max_consecutive_failures {
                    return Err(error.into());
                }
                warn!(
                    task_id = %handle.task_id(),
                    attempt = consecutive_failures,
                    error = %error,
                    "transient poll failure; retrying"
                );
            }
            Err(error) => return Err(error.into()),
        }

        if started.elapsed() >= schedule.max_duration {
            return Err(WaitError::TimedOut {
                task_id: handle.task_id().to_string(),
                waited: started.elapsed(),
            });
        }
        sleep(schedule.interval);
    }
}

fn is_transient(error: &TaskError) -> bool {
    match error {
        TaskError::Remote(RemoteError::TransportFailure { .. }) => true,
        TaskError::Remote(RemoteError::RemoteRejected { code, .. }) => {
            !super::is_terminal_provider_code(code.as_str())
        }
        _ => false,
    }
}
