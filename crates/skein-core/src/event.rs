use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::traits::EventSink;
use crate::types::{ExecutionEvent, ExecutionId};

/// Per-execution event fan-out.
///
/// Subscribers register for one execution id and receive every event the
/// scheduler publishes for it; events for executions without subscribers
/// are dropped. Transports (WebSocket hubs, loggers) sit behind this.
pub struct ExecutionHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<ExecutionEvent>>>,
}

impl ExecutionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to one execution's event stream, creating it if needed.
    pub fn subscribe(&self, execution_id: &ExecutionId) -> broadcast::Receiver<ExecutionEvent> {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(execution_id.0.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Tear down one execution's channel once the run is over.
    pub fn release(&self, execution_id: &ExecutionId) {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if channels.remove(&execution_id.0).is_some() {
            debug!(execution_id = %execution_id, "Released execution channel");
        }
    }
}

impl Default for ExecutionHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for ExecutionHub {
    fn publish(&self, execution_id: &ExecutionId, event: &ExecutionEvent) {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(&execution_id.0) {
            // Ignore error if all receivers are gone
            let _ = tx.send(event.clone());
        }
    }
}
