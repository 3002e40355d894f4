//! Out-of-band commands for a running task.
//!
//! The coordinator is the only code that may touch the queue and the in-flight
//! set. Anything else that wants a checkpoint or a stop goes through a
//! [`TaskHandle`], which puts a [`Command`] on the task's control channel; the
//! coordinator picks it up between two completions and answers on a oneshot.

use crate::error::SpiderError;
use kanal::AsyncSender;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::oneshot;

pub(crate) enum Command {
    Stash {
        dir: PathBuf,
        reply: oneshot::Sender<Result<(), SpiderError>>,
    },
    Shutdown,
}

/// Cloneable remote control for an `AsyncTask` or one of its decorators.
///
/// Commands sent while no run is in progress wait for the next run. Whatever is
/// still unanswered when a run ends is rejected with an error.
#[derive(Clone)]
pub struct TaskHandle {
    tx: AsyncSender<Command>,
}

impl TaskHandle {
    pub(crate) fn new(tx: AsyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Asks the running task to checkpoint into `dir` and waits for the result.
    pub async fn stash(&self, dir: impl Into<PathBuf>) -> Result<(), SpiderError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Stash {
                dir: dir.into(),
                reply,
            })
            .await
            .map_err(|_| SpiderError::GeneralError("task has been dropped".into()))?;
        response
            .await
            .map_err(|_| SpiderError::GeneralError("task dropped the stash request".into()))?
    }

    /// Asks the running task to stop dispatching.
    ///
    /// Requests already handed to a worker finish first; the run then returns
    /// `RunOutcome::Interrupted` with the rest still queued.
    pub async fn shutdown(&self) -> Result<(), SpiderError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| SpiderError::GeneralError("task has been dropped".into()))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}
