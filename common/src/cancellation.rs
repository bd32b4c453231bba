//! A single cancellation handle threaded through the entire ingestion call
//! tree. Two distinct roots exist: the worker-wide shutdown controller and a
//! per-task caller cancellation; the processor tells them apart to decide
//! whether an interrupted task should be reset to `Pending` (shutdown) or
//! marked `Failed` (caller policy).

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct CancellationRoots {
    shutdown: CancellationToken,
}

impl CancellationRoots {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Builds a per-task handle that is cancelled either by worker shutdown
    /// or by an explicit caller cancellation, whichever comes first.
    pub fn task_handle(&self) -> TaskCancellation {
        TaskCancellation {
            shutdown: self.shutdown.clone(),
            caller: CancellationToken::new(),
        }
    }
}

impl Default for CancellationRoots {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct TaskCancellation {
    shutdown: CancellationToken,
    caller: CancellationToken,
}

impl TaskCancellation {
    pub fn cancel(&self) {
        self.caller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.caller.is_cancelled()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn cancelled(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {},
            () = self.caller.cancelled() => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_is_distinguishable_from_caller_cancel() {
        let roots = CancellationRoots::new();
        let handle = roots.task_handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(!handle.is_shutdown());

        let roots2 = CancellationRoots::new();
        let handle2 = roots2.task_handle();
        roots2.trigger_shutdown();
        assert!(handle2.is_cancelled());
        assert!(handle2.is_shutdown());
    }
}
