//! Trigger fed by the embedding application.

use super::{spawn_dispatch_loop, DEFAULT_WORKER_POOL_SIZE};
use crate::cancellation::CancellationToken;
use crate::messaging::MessageEnvelope;
use crate::pipeline::{OutputHandler, PipelineRouter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Routes envelopes pushed into a channel.
///
/// The application keeps the returned sender and decides topics and
/// correlation ids itself. Dropping every sender stops the trigger.
#[derive(Debug)]
pub struct CustomTrigger {
    router: PipelineRouter,
    handler: Option<Arc<dyn OutputHandler>>,
    capacity: usize,
    worker_pool_size: usize,
}

impl CustomTrigger {
    /// Creates a trigger with a channel of `capacity` envelopes.
    #[must_use]
    pub fn new(router: PipelineRouter, capacity: usize) -> Self {
        Self {
            router,
            handler: None,
            capacity: capacity.max(1),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }

    /// Runs `handler` after each successful pipeline.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn OutputHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the number of messages processed concurrently.
    #[must_use]
    pub const fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Starts dispatching and returns the input sender.
    pub fn start(
        self,
        shutdown: Arc<CancellationToken>,
    ) -> (mpsc::Sender<MessageEnvelope>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let handle = spawn_dispatch_loop(
            "custom",
            receiver,
            self.router,
            self.handler,
            self.worker_pool_size,
            shutdown,
        );
        (sender, handle)
    }
}
