//! Bounded webhook dispatch.
//!
//! Webhooks are handed to a fixed set of worker tasks through a bounded
//! queue. Workers forward the webhook and report the outcome, so a slow
//! destination never stalls the socket. When the queue is full the producer
//! waits for a free slot.

use crate::{RelayError, RelayResult, StatusSink};
use relay_protocol_types::Event;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webhook_forwarder::Forwarder;

/// Dispatch pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Concurrent deliveries.
    pub workers: usize,
    /// Webhooks that may wait for a worker before dispatch blocks.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 256,
            queue_capacity: 1,
        }
    }
}

/// Fixed-size pool of forwarding workers.
pub struct DispatchPool {
    queue: mpsc::Sender<Event>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Spawn the workers. Zero sizes are raised to one.
    pub fn start(
        config: &DispatchConfig,
        forwarder: Arc<dyn Forwarder>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (queue, receiver) = mpsc::channel::<Event>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let forwarder = forwarder.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else {
                            break;
                        };
                        trace!(worker, event_id = %event.meta.id, "Forwarding webhook");
                        let status = forwarder.forward(event).await;
                        sink.report(&status).await;
                    }
                    trace!(worker, "Dispatch worker stopped");
                })
            })
            .collect::<Vec<_>>();

        debug!(workers = workers.len(), queue = config.queue_capacity.max(1), "Dispatch pool started");
        Self { queue, workers }
    }

    /// Queue a webhook, waiting while the queue is full.
    pub async fn dispatch(&self, event: Event) -> RelayResult<()> {
        self.queue
            .send(event)
            .await
            .map_err(|_| RelayError::DispatchClosed)
    }

    /// Wait for a free queue slot without committing a webhook to it.
    ///
    /// Cancel-safe, so the wait can sit in `select!` next to socket reads.
    pub async fn reserve(&self) -> RelayResult<mpsc::Permit<'_, Event>> {
        self.queue.reserve().await.map_err(|_| RelayError::DispatchClosed)
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting webhooks and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
