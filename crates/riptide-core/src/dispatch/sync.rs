//! Dispatcher that runs tasks on the submitting thread.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{run_task, DispatchError, Dispatcher, DispatcherKind, Task};

/// Executes every task immediately, on the caller's thread.
#[derive(Debug)]
pub struct SynchronousDispatcher {
    name: String,
    alive: AtomicBool,
}

impl SynchronousDispatcher {
    /// Creates a synchronous dispatcher.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alive: AtomicBool::new(true),
        }
    }
}

impl Default for SynchronousDispatcher {
    fn default() -> Self {
        Self::new("sync")
    }
}

impl Dispatcher for SynchronousDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Synchronous
    }

    fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown {
                name: self.name.clone(),
            });
        }
        run_task(&self.name, task);
        Ok(())
    }

    fn in_context(&self) -> bool {
        true
    }

    fn backlog(&self) -> usize {
        0
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
    }
}
