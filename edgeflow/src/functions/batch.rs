//! Batching of messages by count, by time, or by whichever comes first.

use super::AppFunction;
use crate::cancellation::CancellationToken;
use crate::context::FunctionContext;
use crate::core::{Event, FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// When a batch is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Release once `threshold` items are buffered.
    ByCount {
        /// Number of items per batch.
        threshold: usize,
    },
    /// Release everything buffered when `interval` elapses.
    ByTime {
        /// Time window.
        interval: Duration,
    },
    /// Release at `threshold` items or after `interval`, whichever is first.
    ByTimeAndCount {
        /// Time window.
        interval: Duration,
        /// Number of items per batch.
        threshold: usize,
    },
}

#[derive(Debug, Default)]
struct BatchState {
    buffer: Vec<Vec<u8>>,
    timer_active: bool,
}

/// Accumulates pipeline data and forwards it in batches.
///
/// Callers whose item does not complete a batch halt the pipeline without
/// error. In the time-based modes the first caller of a window waits for the
/// window to close and forwards the whole batch; in the combined mode the
/// caller that fills the batch forwards it at once and wakes the waiter.
#[derive(Debug)]
pub struct Batch {
    mode: BatchMode,
    is_event_data: bool,
    merge_on_send: bool,
    state: Mutex<BatchState>,
    released: Notify,
    shutdown: Option<Arc<CancellationToken>>,
}

impl Batch {
    /// Creates a batch function.
    #[must_use]
    pub fn new(mode: BatchMode) -> Self {
        Self {
            mode,
            is_event_data: false,
            merge_on_send: false,
            state: Mutex::new(BatchState::default()),
            released: Notify::new(),
            shutdown: None,
        }
    }

    /// Batches by count.
    #[must_use]
    pub fn by_count(threshold: usize) -> Self {
        Self::new(BatchMode::ByCount { threshold })
    }

    /// Batches by time.
    #[must_use]
    pub fn by_time(interval: Duration) -> Self {
        Self::new(BatchMode::ByTime { interval })
    }

    /// Batches by time and count.
    #[must_use]
    pub fn by_time_and_count(interval: Duration, threshold: usize) -> Self {
        Self::new(BatchMode::ByTimeAndCount {
            interval,
            threshold,
        })
    }

    /// Decodes each buffered item as an event and forwards a list of events.
    #[must_use]
    pub const fn with_event_data(mut self, is_event_data: bool) -> Self {
        self.is_event_data = is_event_data;
        self
    }

    /// Forwards the batch as one concatenated byte payload.
    #[must_use]
    pub const fn with_merge_on_send(mut self, merge_on_send: bool) -> Self {
        self.merge_on_send = merge_on_send;
        self
    }

    /// Releases pending time windows early when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: Arc<CancellationToken>) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Returns the batch mode.
    #[must_use]
    pub const fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn by_count_apply(&self, item: Vec<u8>, threshold: usize) -> Option<Vec<Vec<u8>>> {
        let mut state = self.state.lock();
        state.buffer.push(item);
        if state.buffer.len() < threshold {
            return None;
        }
        Some(std::mem::take(&mut state.buffer))
    }

    async fn time_window_apply(
        &self,
        item: Vec<u8>,
        interval: Duration,
        threshold: Option<usize>,
    ) -> Option<Vec<Vec<u8>>> {
        let released = self.released.notified();
        tokio::pin!(released);
        {
            let mut state = self.state.lock();
            state.buffer.push(item);

            if let Some(threshold) = threshold {
                if state.buffer.len() >= threshold {
                    if state.timer_active {
                        self.released.notify_waiters();
                    }
                    return Some(std::mem::take(&mut state.buffer));
                }
            }
            if state.timer_active {
                return None;
            }
            state.timer_active = true;
            released.as_mut().enable();
        }

        debug!(interval_ms = interval.as_millis(), "Batch window opened");
        match &self.shutdown {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = &mut released => {}
                    () = token.cancelled() => {}
                }
            }
            None => {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = &mut released => {}
                }
            }
        }

        let mut state = self.state.lock();
        state.timer_active = false;
        if state.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut state.buffer))
        }
    }

    fn output(&self, batch: Vec<Vec<u8>>, pipeline_id: &str) -> FunctionOutput {
        if self.is_event_data {
            let events: Result<Vec<Event>, _> =
                batch.iter().map(|b| serde_json::from_slice::<Event>(b)).collect();
            return match events {
                Ok(events) => FunctionOutput::proceed_with(Some(PipelineData::Events(events))),
                Err(e) => FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "function Batch in pipeline '{pipeline_id}': unable to decode batched event: {e}"
                ))),
            };
        }
        if self.merge_on_send {
            return FunctionOutput::proceed(batch.concat());
        }
        FunctionOutput::proceed_with(Some(PipelineData::Batch(batch)))
    }
}

#[async_trait]
impl AppFunction for Batch {
    fn name(&self) -> &str {
        "Batch"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let pipeline_id = ctx.pipeline_id().to_string();
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::no_data(self.name(), &pipeline_id));
        };
        let item = match data.to_bytes() {
            Ok(item) => item,
            Err(e) => {
                return FunctionOutput::fail(FunctionError::server_error(format!(
                    "function Batch in pipeline '{pipeline_id}': unable to encode data: {e}"
                )))
            }
        };

        let released = match self.mode {
            BatchMode::ByCount { threshold } => self.by_count_apply(item, threshold),
            BatchMode::ByTime { interval } => self.time_window_apply(item, interval, None).await,
            BatchMode::ByTimeAndCount {
                interval,
                threshold,
            } => self.time_window_apply(item, interval, Some(threshold)).await,
        };

        match released {
            Some(batch) => {
                debug!(pipeline_id = %pipeline_id, items = batch.len(), "Batch released");
                self.output(batch, &pipeline_id)
            }
            None => FunctionOutput::halt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> FunctionContext {
        FunctionContext::new("c", "")
    }

    #[tokio::test]
    async fn test_no_data_fails() {
        let batch = Batch::by_count(2);
        let output = batch.apply(&mut ctx(), None).await;
        assert!(output.is_failure());
        assert!(output.error.unwrap().message.contains("No Data Received"));
    }

    #[tokio::test]
    async fn test_by_count_releases_at_threshold_and_clears() {
        let batch = Batch::by_count(3);
        let mut ctx = ctx();

        let first = batch.apply(&mut ctx, Some("item1".into())).await;
        assert!(!first.should_continue() && !first.is_failure());
        let second = batch.apply(&mut ctx, Some("item2".into())).await;
        assert!(!second.should_continue() && !second.is_failure());

        let third = batch.apply(&mut ctx, Some("item3".into())).await;
        assert!(third.should_continue());
        assert_eq!(
            third.data,
            Some(PipelineData::Batch(vec![
                b"item1".to_vec(),
                b"item2".to_vec(),
                b"item3".to_vec()
            ]))
        );

        let fourth = batch.apply(&mut ctx, Some("item4".into())).await;
        assert!(!fourth.should_continue());
        assert_eq!(batch.pending(), 1);
    }

    #[tokio::test]
    async fn test_merge_on_send() {
        let batch = Batch::by_count(2).with_merge_on_send(true);
        let mut ctx = ctx();
        batch.apply(&mut ctx, Some("ab".into())).await;
        let output = batch.apply(&mut ctx, Some("cd".into())).await;
        assert_eq!(output.data, Some(PipelineData::Bytes(b"abcd".to_vec())));
    }

    #[tokio::test]
    async fn test_event_data_output() {
        let batch = Batch::by_count(2).with_event_data(true);
        let mut ctx = ctx();
        let e1 = Event::new("p", "d1", "s");
        let e2 = Event::new("p", "d2", "s");
        batch.apply(&mut ctx, Some(e1.clone().into())).await;
        let output = batch.apply(&mut ctx, Some(e2.clone().into())).await;
        assert_eq!(output.data, Some(PipelineData::Events(vec![e1, e2])));
    }

    #[tokio::test]
    async fn test_event_data_rejects_non_events() {
        let batch = Batch::by_count(1).with_event_data(true);
        let output = batch.apply(&mut ctx(), Some("not json".into())).await;
        assert!(output.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_by_time_waiter_forwards_window() {
        let batch = Arc::new(Batch::by_time(Duration::from_secs(5)));

        let waiter = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.apply(&mut ctx(), Some("a".into())).await })
        };
        tokio::task::yield_now().await;

        let other = batch.apply(&mut ctx(), Some("b".into())).await;
        assert!(!other.should_continue());

        let released = waiter.await.unwrap();
        assert_eq!(
            released.data,
            Some(PipelineData::Batch(vec![b"a".to_vec(), b"b".to_vec()]))
        );
        assert_eq!(batch.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_by_time_and_count_releases_early() {
        let batch = Arc::new(Batch::by_time_and_count(Duration::from_secs(60), 2));

        let waiter = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.apply(&mut ctx(), Some("a".into())).await })
        };
        tokio::task::yield_now().await;

        let filler = batch.apply(&mut ctx(), Some("b".into())).await;
        assert!(filler.should_continue());
        assert_eq!(
            filler.data,
            Some(PipelineData::Batch(vec![b"a".to_vec(), b"b".to_vec()]))
        );

        let waiter_output = waiter.await.unwrap();
        assert!(!waiter_output.should_continue());
        assert!(!waiter_output.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_window() {
        let token = Arc::new(CancellationToken::new());
        let batch =
            Arc::new(Batch::by_time(Duration::from_secs(3600)).with_shutdown(token.clone()));

        let waiter = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.apply(&mut ctx(), Some("a".into())).await })
        };
        tokio::task::yield_now().await;
        token.cancel("shutdown");

        let output = waiter.await.unwrap();
        assert_eq!(output.data, Some(PipelineData::Batch(vec![b"a".to_vec()])));
    }
}
