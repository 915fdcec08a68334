//! Inbound triggers.
//!
//! A trigger turns transport-level input into envelopes and hands them to
//! the [`PipelineRouter`]:
//! - [`MessageBusTrigger`] subscribes to broker topics and publishes responses
//! - [`HttpTrigger`] answers synchronous requests with the response data
//! - [`CustomTrigger`] accepts envelopes pushed by the embedding application

mod custom;
mod http;
mod messagebus;

pub use custom::CustomTrigger;
pub use http::{HttpRequest, HttpResponse, HttpTrigger, CORRELATION_HEADER};
pub use messagebus::{MessageBusResponder, MessageBusTrigger};

use crate::cancellation::CancellationToken;
use crate::messaging::MessageEnvelope;
use crate::pipeline::{OutputHandler, PipelineRouter};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of messages dispatched concurrently.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 16;

/// Consumes `receiver` until it closes or `shutdown` fires, routing each
/// envelope on a task bounded by a pool of `worker_pool_size` permits.
pub(crate) fn spawn_dispatch_loop(
    name: &'static str,
    mut receiver: mpsc::Receiver<MessageEnvelope>,
    router: PipelineRouter,
    handler: Option<Arc<dyn OutputHandler>>,
    worker_pool_size: usize,
    shutdown: Arc<CancellationToken>,
) -> JoinHandle<()> {
    let workers = Arc::new(Semaphore::new(worker_pool_size.max(1)));
    tokio::spawn(async move {
        info!(trigger = name, worker_pool_size, "trigger dispatch loop started");
        loop {
            let envelope = tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(envelope) => envelope,
                    None => {
                        debug!(trigger = name, "trigger input closed");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                permit = Arc::clone(&workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let router = router.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = router.route(&envelope, handler).await {
                    warn!(
                        trigger = name,
                        topic = %envelope.received_topic,
                        correlation_id = %envelope.correlation_id,
                        error = %e,
                        "message not processed"
                    );
                }
                drop(permit);
            });
        }
        info!(trigger = name, "trigger dispatch loop stopped");
    })
}
