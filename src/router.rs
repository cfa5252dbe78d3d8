//! Outbound message routing.
//!
//! `deliver` is the single entry point through which dispatcher results (and
//! liveness probes) reach a client. Behavior depends on the target session's
//! delivery mode:
//!
//! - **Stream**: encode and push onto the attached stream handle, in strict
//!   per-session FIFO (no ordering guarantee across sessions). The push is
//!   non-blocking: a full channel means the client is not draining, so the
//!   handle is detached (closing the connection once buffered frames drain)
//!   and the frame joins the pending queue. With no handle attached, the
//!   frame joins a bounded pending queue drained by the next handle; on
//!   overflow the oldest frame is dropped and the caller sees
//!   `Backpressure` — the transport never retries silently.
//! - **Batch**: append to the session's open batch window. Delivery after
//!   the window flushed is `LateDelivery`, surfaced to the caller and never
//!   appended to a later window.
//!
//! Every successful delivery refreshes the session's last-activity
//! timestamp.

use std::sync::Arc;

use bytes::Bytes;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::batch::PushOutcome;
use crate::codec::{encode, Message};
use crate::config::ResponseMode;
use crate::error::TransportError;
use crate::session::{SessionRegistry, SessionState};

/// Routes outbound messages to stream handles or batch windows.
#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<SessionRegistry>,
    pending_capacity: usize,
}

impl DeliveryRouter {
    /// Create a router over the given registry.
    ///
    /// # Arguments
    ///
    /// * `registry` - the shared session registry
    /// * `pending_capacity` - bound on each session's pending queue
    pub fn new(registry: Arc<SessionRegistry>, pending_capacity: usize) -> Self {
        Self {
            registry,
            pending_capacity,
        }
    }

    /// Deliver one message to a session.
    ///
    /// # Errors
    ///
    /// * `SessionNotFound` - the session id is not registered
    /// * `Backpressure` - the pending queue overflowed (oldest dropped)
    /// * `LateDelivery` - batch mode with no open window
    pub async fn deliver(&self, session_id: &str, message: Message) -> Result<(), TransportError> {
        let session =
            self.registry
                .get(session_id)
                .ok_or_else(|| TransportError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;

        // The session lock is held for the whole delivery, which makes
        // per-session delivery FIFO. Nothing awaits under it: the channel
        // push is try_send, so a stalled client never blocks delivery to
        // other sessions or the liveness sweep.
        let mut state = session.state.lock().await;
        match session.mode() {
            ResponseMode::Stream => {
                let frame = encode(&message);
                if let Some(tx) = &state.stream {
                    match tx.try_send(frame) {
                        Ok(()) => {
                            state.last_activity = Instant::now();
                            Ok(())
                        }
                        Err(err) => {
                            // Full: the client is not draining. Closed: it
                            // disconnected without a DELETE. Either way,
                            // detach and queue for the next handle.
                            debug!(session_id, "stream handle lost, queueing frame");
                            state.stream = None;
                            let frame = match err {
                                mpsc::error::TrySendError::Full(frame)
                                | mpsc::error::TrySendError::Closed(frame) => frame,
                            };
                            self.enqueue(&mut state, session_id, frame)
                        }
                    }
                } else {
                    self.enqueue(&mut state, session_id, frame)
                }
            }
            ResponseMode::Batch => match state.batch.as_mut() {
                Some(window) => match window.push(message) {
                    PushOutcome::Buffered => {
                        state.last_activity = Instant::now();
                        Ok(())
                    }
                    PushOutcome::Flushed => {
                        state.batch = None;
                        state.last_activity = Instant::now();
                        Ok(())
                    }
                    PushOutcome::Late => {
                        warn!(session_id, "late delivery dropped: response from a prior cycle");
                        Err(TransportError::LateDelivery {
                            session_id: session_id.to_string(),
                        })
                    }
                },
                None => {
                    warn!(session_id, "late delivery dropped: no open batch window");
                    Err(TransportError::LateDelivery {
                        session_id: session_id.to_string(),
                    })
                }
            },
        }
    }

    fn enqueue(
        &self,
        state: &mut SessionState,
        session_id: &str,
        frame: Bytes,
    ) -> Result<(), TransportError> {
        state.pending.push_back(frame);
        state.last_activity = Instant::now();
        if state.pending.len() > self.pending_capacity {
            state.pending.pop_front();
            warn!(
                session_id,
                capacity = self.pending_capacity,
                "pending queue overflow, dropped oldest frame"
            );
            return Err(TransportError::Backpressure {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }
}
