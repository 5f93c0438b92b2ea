use crate::{Error, Outcome, Result};
use std::future::Future;
use tokio::{sync::watch, task::JoinHandle};

/// Observable lifecycle of a submitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
}

/// Handle to an action running on the engine's runtime.
///
/// The handle can observe progress, cancel the task or await its outcome.
/// Dropping the handle detaches the task without stopping it.
pub struct TaskHandle {
    handle: JoinHandle<Result<Outcome>>,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub(crate) fn spawn<F>(future: F) -> TaskHandle
    where
        F: Future<Output = Result<Outcome>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(TaskState::Pending);
        let handle = tokio::spawn(async move {
            let _ = tx.send(TaskState::Running);
            let result = future.await;
            let _ = tx.send(TaskState::Completed);
            result
        });
        TaskHandle { handle, state: rx }
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Request cancellation. The task stops at its next await point; a lease
    /// holding an open transaction is discarded, which rolls it back.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub async fn await_result(self) -> Result<Outcome> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::execution(format!("task panicked: {e}"))),
        }
    }
}
