use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle notifications published by the cluster.
///
/// Events are fire-and-forget: publishing never blocks, and a receiver that
/// falls more than the channel capacity behind loses the oldest events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// `init()` finished with at least one live worker.
    Initialized { workers: usize },
    WorkerCreated { worker_id: usize },
    /// A single worker failed to launch. Not fatal on its own.
    WorkerError { worker_id: usize, error: String },
    /// A job was accepted onto the queue.
    Execute { job_id: Uuid, queued: usize },
    Completed {
        job_id: Uuid,
        worker_id: usize,
        elapsed: Duration,
        bytes: usize,
    },
    /// A job failed, or a lifecycle operation failed (no `job_id`).
    Error {
        job_id: Option<Uuid>,
        worker_id: Option<usize>,
        kind: &'static str,
        error: String,
    },
    /// The dispatcher found an empty queue.
    Idle,
    Close { workers: usize, pending_jobs: usize },
}

impl ClusterEvent {
    /// Stable event name used in logs and by subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterEvent::Initialized { .. } => "initialized",
            ClusterEvent::WorkerCreated { .. } => "worker-created",
            ClusterEvent::WorkerError { .. } => "worker-error",
            ClusterEvent::Execute { .. } => "execute",
            ClusterEvent::Completed { .. } => "completed",
            ClusterEvent::Error { .. } => "error",
            ClusterEvent::Idle => "idle",
            ClusterEvent::Close { .. } => "close",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn publish(&self, event: ClusterEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }
}
