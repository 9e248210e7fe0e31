use std::collections::VecDeque;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

/// Work the proxy defers to a later turn of the embedder's main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyTask {
    BeginMainFrame,
    RequestNewOutputSurface,
}

/// FIFO of posted [`ProxyTask`]s. The embedder drains it through
/// `SingleThreadProxy::run_pending_tasks`.
#[derive(Debug, Default)]
pub struct MainTaskQueue {
    next_id: u64,
    tasks: VecDeque<(TaskId, ProxyTask)>,
}

impl MainTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, task: ProxyTask) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push_back((id, task));
        tracing::trace!(id = id.0, ?task, "posted task");
        id
    }

    /// Drop a posted task before it runs. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|(task_id, _)| *task_id != id);
        before != self.tasks.len()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|(task_id, _)| *task_id == id)
    }

    pub fn pop(&mut self) -> Option<(TaskId, ProxyTask)> {
        self.tasks.pop_front()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
