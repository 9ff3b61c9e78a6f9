//! Fan-out of node output to downstream stages.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::item::NodeOutput;

/// Broadcasts [`NodeOutput`] to every connected downstream channel.
///
/// Sends are awaited, so a full downstream channel applies backpressure to
/// the node until it is cancelled. Channels whose receiver was dropped are
/// removed.
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    outputs: Vec<mpsc::Sender<NodeOutput>>,
}

impl Emitter {
    /// An emitter with no outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An emitter with one bounded output, plus its receiver.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NodeOutput>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { outputs: vec![tx] }, rx)
    }

    /// Connects another downstream channel.
    pub fn connect(&mut self, tx: mpsc::Sender<NodeOutput>) {
        self.outputs.push(tx);
    }

    /// Number of connected outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether no output is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Sends `item` to every output, in connection order.
    ///
    /// Returns `false` if `cancel` fired while waiting on a full output; the
    /// item is dropped for that output and the remaining ones.
    pub async fn broadcast(&mut self, item: NodeOutput, cancel: &CancellationToken) -> bool {
        let Some(last) = self.outputs.len().checked_sub(1) else {
            return true;
        };
        let mut closed = Vec::new();
        for (i, tx) in self.outputs[..last].iter().enumerate() {
            match send_or_cancel(tx, item.clone(), cancel).await {
                Some(true) => {}
                Some(false) => closed.push(i),
                None => return false,
            }
        }
        match send_or_cancel(&self.outputs[last], item, cancel).await {
            Some(true) => {}
            Some(false) => closed.push(last),
            None => return false,
        }
        for i in closed.into_iter().rev() {
            tracing::debug!(output = i, "Downstream receiver dropped, disconnecting");
            self.outputs.remove(i);
        }
        true
    }
}

/// `Some(delivered)`, or `None` if cancelled while the channel was full.
/// A send that fits is always made, even after cancellation.
async fn send_or_cancel(
    tx: &mpsc::Sender<NodeOutput>,
    item: NodeOutput,
    cancel: &CancellationToken,
) -> Option<bool> {
    tokio::select! {
        biased;

        sent = tx.send(item) => Some(sent.is_ok()),
        () = cancel.cancelled() => None,
    }
}
