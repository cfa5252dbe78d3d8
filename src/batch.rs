//! Batch collection window for batch-mode response delivery.
//!
//! A window opens when a batch-mode request cycle begins and accumulates the
//! dispatcher's responses until either the configured deadline elapses or
//! every awaited request id has resolved, whichever comes first. The flush
//! is atomic: the buffer is drained exactly once, and anything arriving
//! afterwards is a late delivery the caller must reject.
//!
//! The window itself holds no timer. The HTTP handler that opened the cycle
//! awaits the completion channel under `tokio::time::timeout` and performs
//! the deadline flush itself, so cancellation (session teardown) simply
//! drops the window and wakes the waiter with a channel error.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

use crate::codec::{JsonRpcId, Message};

/// Outcome of pushing one message into a window.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Message buffered; the window remains open.
    Buffered,
    /// The push completed the window. The buffer has been handed to the
    /// waiter and the caller must discard the window.
    Flushed,
    /// A response whose id is not awaited by this window: it belongs to an
    /// earlier, already-flushed cycle and must be rejected, not appended.
    Late,
}

/// An open batch collection window for one request cycle.
///
/// Owned by the session (behind its lock); all mutation is serialized by
/// the session's mutex.
#[derive(Debug)]
pub struct BatchWindow {
    /// Request ids still awaiting a response from the dispatcher
    awaited: HashSet<JsonRpcId>,
    /// Responses (and any server-originated messages) collected so far
    buffered: Vec<Message>,
    /// Flush as soon as the first message arrives (batch timeout of zero)
    flush_on_first: bool,
    /// Completion channel to the HTTP handler awaiting the flush
    completion: Option<oneshot::Sender<Vec<Message>>>,
    /// When the window opened
    opened_at: Instant,
}

impl BatchWindow {
    /// Open a window for a request cycle.
    ///
    /// # Arguments
    ///
    /// * `awaited` - ids of the client requests in this cycle (non-empty)
    /// * `flush_on_first` - flush on the first delivered message instead of
    ///   waiting for all awaited ids
    ///
    /// # Returns
    ///
    /// The window and the receiver the HTTP handler awaits for the flushed
    /// array.
    pub fn open(
        awaited: HashSet<JsonRpcId>,
        flush_on_first: bool,
    ) -> (Self, oneshot::Receiver<Vec<Message>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                awaited,
                buffered: Vec::new(),
                flush_on_first,
                completion: Some(tx),
                opened_at: Instant::now(),
            },
            rx,
        )
    }

    /// Push one message into the window.
    ///
    /// A response whose id is awaited resolves that id; one whose id is not
    /// awaited belongs to an earlier cycle and is rejected as `Late`. When
    /// the last awaited id resolves (or on the first message with
    /// `flush_on_first`), the buffer is flushed to the waiter and `Flushed`
    /// is returned; the caller must then drop the window so later messages
    /// surface as late deliveries.
    pub fn push(&mut self, message: Message) -> PushOutcome {
        if let Message::Response(resp) = &message {
            if !self.awaited.remove(&resp.id) {
                return PushOutcome::Late;
            }
        }
        self.buffered.push(message);

        if self.awaited.is_empty() || self.flush_on_first {
            self.fire();
            PushOutcome::Flushed
        } else {
            PushOutcome::Buffered
        }
    }

    /// Flush the window unconditionally, returning everything buffered.
    ///
    /// Used on the deadline path. The completion channel is also fired in
    /// case the waiter raced the deadline.
    pub fn flush(mut self) -> Vec<Message> {
        let buffered = std::mem::take(&mut self.buffered);
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(buffered.clone());
        }
        debug!(
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            count = buffered.len(),
            "batch window flushed on deadline"
        );
        buffered
    }

    /// Number of awaited request ids still unresolved.
    pub fn awaited_len(&self) -> usize {
        self.awaited.len()
    }

    fn fire(&mut self) {
        let buffered = std::mem::take(&mut self.buffered);
        debug!(
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            count = buffered.len(),
            "batch window complete"
        );
        if let Some(tx) = self.completion.take() {
            // The waiter may have gone away (client disconnect); the
            // messages are discarded with it.
            let _ = tx.send(buffered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Response;
    use serde_json::json;

    fn response(id: i64) -> Message {
        Message::Response(Response::success(JsonRpcId::Number(id), json!({})))
    }

    #[test]
    fn test_flushes_when_all_awaited_resolve() {
        let awaited: HashSet<_> = [JsonRpcId::Number(1), JsonRpcId::Number(2)]
            .into_iter()
            .collect();
        let (mut window, mut rx) = BatchWindow::open(awaited, false);

        assert_eq!(window.push(response(1)), PushOutcome::Buffered);
        assert!(rx.try_recv().is_err());

        assert_eq!(window.push(response(2)), PushOutcome::Flushed);
        let flushed = rx.try_recv().expect("completion should fire");
        assert_eq!(flushed.len(), 2);
    }

    #[test]
    fn test_flush_on_first_message() {
        let awaited: HashSet<_> = [JsonRpcId::Number(1), JsonRpcId::Number(2)]
            .into_iter()
            .collect();
        let (mut window, mut rx) = BatchWindow::open(awaited, true);

        assert_eq!(window.push(response(1)), PushOutcome::Flushed);
        assert_eq!(rx.try_recv().expect("completion should fire").len(), 1);
    }

    #[test]
    fn test_unawaited_response_rejected_as_late() {
        let awaited: HashSet<_> = [JsonRpcId::Number(1)].into_iter().collect();
        let (mut window, _rx) = BatchWindow::open(awaited, false);

        assert_eq!(window.push(response(99)), PushOutcome::Late);
        assert_eq!(window.awaited_len(), 1);
    }

    #[test]
    fn test_deadline_flush_returns_partial_buffer() {
        let awaited: HashSet<_> = [JsonRpcId::Number(1), JsonRpcId::Number(2)]
            .into_iter()
            .collect();
        let (mut window, _rx) = BatchWindow::open(awaited, false);
        window.push(response(1));

        let flushed = window.flush();
        assert_eq!(flushed.len(), 1);
    }

    #[test]
    fn test_each_message_flushes_exactly_once() {
        let awaited: HashSet<_> = [JsonRpcId::Number(1)].into_iter().collect();
        let (mut window, mut rx) = BatchWindow::open(awaited, false);

        window.push(response(1));
        let first = rx.try_recv().expect("completion should fire");
        assert_eq!(first.len(), 1);

        // Deadline flush after completion must not re-emit the message.
        assert!(window.flush().is_empty());
    }
}
