//! Command queues and fence tracking
//!
//! Each of the three hardware queues signals a monotonically increasing
//! fence value when submitted work finishes. Work on one queue executes in
//! submission order; ordering across queues exists only where a caller waits
//! on another queue's fence.
//!
//! [`CommandQueues::flush_all`] is the only drain primitive. Anything the GPU
//! may still reference must not be released before it returns.

use crate::backend::{BackendError, BackendResult, CommandList, FenceValue, GraphicsBackend, QueueType};

/// Status of a fence value on its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has not reached the value yet
    Pending,
    /// Every piece of work up to the value has executed
    Complete,
}

#[derive(Debug, Clone, Copy)]
struct QueueState {
    last_signalled: FenceValue,
    last_completed: FenceValue,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            last_signalled: FenceValue(0),
            last_completed: FenceValue(0),
        }
    }
}

/// Fence bookkeeping for the direct, compute and copy queues
#[derive(Debug, Default)]
pub struct CommandQueues {
    states: [QueueState; 3],
}

fn slot(queue: QueueType) -> usize {
    match queue {
        QueueType::Direct => 0,
        QueueType::Compute => 1,
        QueueType::Copy => 2,
    }
}

impl CommandQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value the next signal on `queue` will carry. Starts at 1.
    pub fn next_fence_value(&self, queue: QueueType) -> FenceValue {
        FenceValue(self.states[slot(queue)].last_signalled.0 + 1)
    }

    pub fn last_signalled(&self, queue: QueueType) -> FenceValue {
        self.states[slot(queue)].last_signalled
    }

    /// Close `cmd` and execute it on `queue`, returning its completion fence.
    ///
    /// `queue` must be the queue the list was begun on; the fence belongs to
    /// that queue's timeline.
    pub fn execute<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queue: QueueType,
        cmd: CommandList,
    ) -> BackendResult<FenceValue> {
        match backend.command_list_queue(cmd) {
            Some(recorded) if recorded == queue => {}
            Some(recorded) => {
                return Err(BackendError::SubmitFailed(format!(
                    "command list was begun on {:?} but executed on {:?}",
                    recorded, queue
                )))
            }
            None => return Err(BackendError::InvalidHandle("command list")),
        }
        let fence = backend.submit(cmd)?;
        self.record_signal(queue, fence);
        log::trace!("Executed command list on {:?}, fence {}", queue, fence.0);
        Ok(fence)
    }

    /// Signal the next fence value on `queue` without submitting work
    pub fn signal<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queue: QueueType,
    ) -> BackendResult<FenceValue> {
        let fence = backend.signal(queue)?;
        self.record_signal(queue, fence);
        log::trace!("Signalled {:?} fence {}", queue, fence.0);
        Ok(fence)
    }

    fn record_signal(&mut self, queue: QueueType, fence: FenceValue) {
        let state = &mut self.states[slot(queue)];
        state.last_signalled = state.last_signalled.max(fence);
    }

    pub fn fence_status<B: GraphicsBackend>(
        &mut self,
        backend: &B,
        queue: QueueType,
        value: FenceValue,
    ) -> FenceStatus {
        let state = &mut self.states[slot(queue)];
        if value > state.last_completed {
            state.last_completed = state.last_completed.max(backend.completed_fence_value(queue));
        }
        if value <= state.last_completed {
            FenceStatus::Complete
        } else {
            FenceStatus::Pending
        }
    }

    pub fn is_fence_complete<B: GraphicsBackend>(
        &mut self,
        backend: &B,
        queue: QueueType,
        value: FenceValue,
    ) -> bool {
        self.fence_status(backend, queue, value) == FenceStatus::Complete
    }

    /// Block until `queue` has executed everything up to `value`
    pub fn wait_for_fence<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queue: QueueType,
        value: FenceValue,
    ) -> BackendResult<()> {
        if self.is_fence_complete(backend, queue, value) {
            return Ok(());
        }
        backend.wait_for_fence(queue, value)?;
        let state = &mut self.states[slot(queue)];
        state.last_completed = state.last_completed.max(value);
        Ok(())
    }

    /// Signal `queue` and wait for the signal, draining all its work
    pub fn flush<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queue: QueueType,
    ) -> BackendResult<FenceValue> {
        let fence = self.signal(backend, queue)?;
        self.wait_for_fence(backend, queue, fence)?;
        Ok(fence)
    }

    /// Drain the direct, compute and copy queues
    pub fn flush_all<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        for queue in QueueType::ALL {
            self.flush(backend, queue)?;
        }
        log::debug!("Flushed all command queues");
        Ok(())
    }

    /// Latest fence value known complete on `queue`
    pub fn last_completed(&self, queue: QueueType) -> FenceValue {
        self.states[slot(queue)].last_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_fence_values_start_at_one_and_increase() {
        let mut backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        assert_eq!(queues.next_fence_value(QueueType::Direct), FenceValue(1));

        let cmd = backend.begin_command_list(QueueType::Direct, "frame").unwrap();
        let first = queues.execute(&mut backend, QueueType::Direct, cmd).unwrap();
        let second = queues.signal(&mut backend, QueueType::Direct).unwrap();

        assert_eq!(first, FenceValue(1));
        assert_eq!(second, FenceValue(2));
        assert_eq!(queues.next_fence_value(QueueType::Direct), FenceValue(3));
        // Queues count independently
        assert_eq!(queues.next_fence_value(QueueType::Copy), FenceValue(1));
    }

    #[test]
    fn test_list_executed_on_another_queue_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        let cmd = backend.begin_command_list(QueueType::Copy, "upload").unwrap();
        let err = queues
            .execute(&mut backend, QueueType::Direct, cmd)
            .unwrap_err();
        assert!(matches!(err, BackendError::SubmitFailed(_)));
        assert_eq!(queues.last_signalled(QueueType::Direct), FenceValue(0));
        assert!(backend.submitted().is_empty());

        // Still open, so the right queue can take it
        let fence = queues.execute(&mut backend, QueueType::Copy, cmd).unwrap();
        assert_eq!(fence, FenceValue(1));
        assert_eq!(queues.last_signalled(QueueType::Copy), FenceValue(1));
        assert_eq!(backend.submitted()[0].queue, QueueType::Copy);
    }

    #[test]
    fn test_unknown_list_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        let cmd = backend.begin_command_list(QueueType::Direct, "frame").unwrap();
        queues.execute(&mut backend, QueueType::Direct, cmd).unwrap();
        assert_eq!(
            queues.execute(&mut backend, QueueType::Direct, cmd),
            Err(BackendError::InvalidHandle("command list"))
        );
    }

    #[test]
    fn test_unsignalled_value_is_pending() {
        let backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        assert_eq!(
            queues.fence_status(&backend, QueueType::Compute, FenceValue(1)),
            FenceStatus::Pending
        );
        assert!(queues.is_fence_complete(&backend, QueueType::Compute, FenceValue(0)));
    }

    #[test]
    fn test_flush_all_drains_every_queue() {
        let mut backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        queues.flush_all(&mut backend).unwrap();
        for queue in QueueType::ALL {
            assert_eq!(queues.last_completed(queue), FenceValue(1));
            assert_eq!(queues.last_signalled(queue), FenceValue(1));
        }
    }

    #[test]
    fn test_waiting_on_future_value_fails() {
        let mut backend = DummyBackend::new();
        let mut queues = CommandQueues::new();

        assert!(queues
            .wait_for_fence(&mut backend, QueueType::Direct, FenceValue(5))
            .is_err());
    }
}
