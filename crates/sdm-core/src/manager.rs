//! Thin owner of the queue collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::queue::{Queue, QueueConfig};

/// Owns an ordered set of queues; each queue gets a stable handle at
/// creation. Holds no business logic beyond queue lifecycle.
#[derive(Default)]
pub struct Manager {
    queues: RwLock<Vec<Arc<Queue>>>,
    next_id: AtomicU64,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue and start its scheduler.
    pub fn create_queue(&self, config: QueueConfig) -> Arc<Queue> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(Queue::new(id, config));
        queue.start();
        self.queues.write().unwrap().push(Arc::clone(&queue));
        tracing::info!(queue = %queue.name(), id, "queue created");
        queue
    }

    /// Read-only snapshot of the queues in creation order.
    pub fn queues(&self) -> Vec<Arc<Queue>> {
        self.queues.read().unwrap().clone()
    }

    pub fn get_queue(&self, id: u64) -> Option<Arc<Queue>> {
        self.queues
            .read()
            .unwrap()
            .iter()
            .find(|q| q.id() == id)
            .cloned()
    }

    /// Stop and remove a queue. Returns false when the id is unknown.
    pub fn delete_queue(&self, id: u64) -> bool {
        let removed = {
            let mut queues = self.queues.write().unwrap();
            match queues.iter().position(|q| q.id() == id) {
                Some(index) => Some(queues.remove(index)),
                None => None,
            }
        };
        match removed {
            Some(queue) => {
                queue.stop();
                tracing::info!(queue = %queue.name(), id, "queue deleted");
                true
            }
            None => false,
        }
    }
}
