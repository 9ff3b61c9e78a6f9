//! Per-node tokio task with exclusive ownership of its lookup source.
//!
//! The task attaches the node's source from the [`LookupRegistry`], builds
//! the cache (if enabled), then loops on two wake conditions: the next input
//! item, or cancellation. Items are processed one at a time; an in-flight
//! lookup always runs to completion before cancellation is observed. A send
//! blocked on a full downstream channel is abandoned on cancellation.
//!
//! Startup failures and panics are reported on the fatal error channel.
//! Per-item failures are emitted downstream as [`NodeOutput::Error`] and the
//! loop carries on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::emitter::Emitter;
use super::item::{InputItem, NodeOutput};
use super::metrics::LookupNodeMetrics;
use super::LookupJoinNode;
use crate::error::LookupJoinError;
use crate::lookup::cache::LookupCache;
use crate::lookup::registry::LookupRegistry;
use crate::lookup::source::{LookupContext, LookupSource};
use crate::tuple::{JoinTuples, WindowTuples};

/// Handle returned when a lookup node task is spawned.
pub struct LookupNodeHandle {
    /// Task join handle.
    pub join: JoinHandle<()>,
    /// Cancels the task.
    pub cancel: CancellationToken,
    /// Per-node metrics (lock-free atomic reads).
    pub metrics: Arc<LookupNodeMetrics>,
}

impl LookupNodeHandle {
    /// Requests shutdown. The task stops before the next input item.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Requests shutdown and waits for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Lookup node task did not exit cleanly");
        }
    }
}

/// A started node together with the channels wired to it.
pub struct RunningNode {
    /// Upstream side: push input items here.
    pub input: mpsc::Sender<InputItem>,
    /// Downstream side: batches and per-item errors.
    pub output: mpsc::Receiver<NodeOutput>,
    /// Fatal errors (startup failures, panics).
    pub errors: mpsc::Receiver<LookupJoinError>,
    /// Task handle.
    pub handle: LookupNodeHandle,
}

impl LookupJoinNode {
    /// Spawns the node task with channels sized by
    /// [`NodeOptions::buffer_length`](crate::config::NodeOptions::buffer_length).
    #[must_use]
    pub fn start(self, registry: LookupRegistry, cancel: CancellationToken) -> RunningNode {
        let capacity = self.options.buffer_length.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (emitter, output) = Emitter::channel(capacity);
        let (err_tx, errors) = mpsc::channel(1);
        let handle = self.spawn(registry, input_rx, emitter, err_tx, cancel);
        RunningNode {
            input: input_tx,
            output,
            errors,
            handle,
        }
    }

    /// Spawns the node task on the current tokio runtime.
    ///
    /// The task ends when `cancel` fires, when `input` is closed, or on a
    /// fatal error (sent to `errors`).
    #[must_use]
    pub fn spawn(
        self,
        registry: LookupRegistry,
        input: mpsc::Receiver<InputItem>,
        emitter: Emitter,
        errors: mpsc::Sender<LookupJoinError>,
        cancel: CancellationToken,
    ) -> LookupNodeHandle {
        let metrics = Arc::new(LookupNodeMetrics::default());
        let task_metrics = Arc::clone(&metrics);
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let name = self.name.clone();
            tracing::debug!(node = %name, "Lookup node task started");

            let outcome = AssertUnwindSafe(self.run(
                &registry,
                input,
                emitter,
                &task_metrics,
                &task_cancel,
            ))
            .catch_unwind()
            .await;

            let err = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(node = %name, "Lookup node task stopped");
                    return;
                }
                Ok(Err(e)) => e,
                Err(payload) => LookupJoinError::Panic(panic_message(payload.as_ref())),
            };
            tracing::error!(node = %name, error = %err, "Lookup node terminated");
            drain_error(err, &errors, &task_cancel).await;
        });

        LookupNodeHandle {
            join,
            cancel,
            metrics,
        }
    }

    async fn run(
        &self,
        registry: &LookupRegistry,
        mut input: mpsc::Receiver<InputItem>,
        mut emitter: Emitter,
        metrics: &LookupNodeMetrics,
        cancel: &CancellationToken,
    ) -> Result<(), LookupJoinError> {
        // Detached when dropped, on every exit path.
        let attached = registry.attach(&self.name)?;
        let cache = self
            .conf
            .cache
            .then(|| LookupCache::new(self.conf.ttl(), self.conf.cache_missing_key));
        let ctx = LookupContext::new(self.name.clone(), cancel.clone());

        loop {
            tracing::trace!(node = %self.name, "Lookup node is looping");
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!(node = %self.name, "Cancelling lookup node");
                    break;
                }

                item = input.recv() => {
                    let Some(item) = item else {
                        tracing::debug!(node = %self.name, "Lookup node input closed");
                        break;
                    };
                    let started = Instant::now();
                    let output = self
                        .process(&ctx, item, attached.source(), cache.as_ref(), metrics)
                        .await;
                    match &output {
                        NodeOutput::Batch(batch) => metrics.record_out(batch.len() as u64),
                        NodeOutput::Error(e) => metrics.record_exception(e.to_string()),
                    }
                    let delivered = emitter.broadcast(output, cancel).await;
                    #[allow(clippy::cast_possible_truncation)]
                    let latency_ns = started.elapsed().as_nanos() as u64;
                    metrics.record_process(latency_ns, input.len() as u64);
                    if !delivered {
                        tracing::info!(node = %self.name, "Cancelling lookup node while blocked on downstream");
                        break;
                    }
                }
            }
        }

        if let Some(cache) = &cache {
            cache.close();
        }
        drop(attached);
        Ok(())
    }

    async fn process(
        &self,
        ctx: &LookupContext,
        item: InputItem,
        source: &dyn LookupSource,
        cache: Option<&LookupCache>,
        metrics: &LookupNodeMetrics,
    ) -> NodeOutput {
        match item {
            InputItem::Error(e) => {
                tracing::debug!(node = %self.name, error = %e, "Lookup node forwarding upstream error");
                NodeOutput::Error(e)
            }
            InputItem::Row(row) => {
                metrics.record_in();
                tracing::debug!(node = %self.name, emitter = %row.emitter, "Lookup node receive tuple input");
                let mut batch = JoinTuples::new();
                match self.lookup_row(ctx, &row, source, cache, &mut batch).await {
                    Ok(()) => NodeOutput::Batch(batch),
                    Err(e) => NodeOutput::Error(e),
                }
            }
            InputItem::Window(window) => {
                metrics.record_in();
                tracing::debug!(
                    node = %self.name,
                    rows = window.len(),
                    start = window.range.start,
                    end = window.range.end,
                    "Lookup node receive window input"
                );
                match self.lookup_window(ctx, &window, source, cache).await {
                    Ok(batch) => NodeOutput::Batch(batch),
                    Err(e) => NodeOutput::Error(e),
                }
            }
            other @ InputItem::Joined(_) => {
                metrics.record_in();
                NodeOutput::Error(LookupJoinError::InvalidInput(other.to_string()))
            }
        }
    }

    /// Looks up every row of `window` in order. The first failure aborts the
    /// window and discards the rows already joined.
    async fn lookup_window(
        &self,
        ctx: &LookupContext,
        window: &WindowTuples,
        source: &dyn LookupSource,
        cache: Option<&LookupCache>,
    ) -> Result<JoinTuples, LookupJoinError> {
        let mut batch = JoinTuples::for_window(window.range);
        for row in &window.rows {
            self.lookup_row(ctx, row, source, cache, &mut batch).await?;
        }
        Ok(batch)
    }
}

/// Reports a fatal error unless the node is already cancelled.
async fn drain_error(
    err: LookupJoinError,
    errors: &mpsc::Sender<LookupJoinError>,
    cancel: &CancellationToken,
) {
    tokio::select! {
        biased;

        sent = errors.send(err) => {
            if sent.is_err() {
                tracing::warn!("Fatal error channel closed, lookup node error dropped");
            }
        }
        () = cancel.cancelled() => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
