//! Ping/liveness monitoring.
//!
//! A single background task sweeps the session registry on a fixed cadence.
//! Sessions that have been idle longer than the configured ping frequency
//! receive a `ping` request pushed through their stream handle; the client
//! acks by POSTing the correlated response. A probe that is not acked within
//! the ping timeout evicts the session: it is removed from the registry, its
//! stream handle closes, and any pending queue or batch window is discarded.
//! Eviction is fatal for that session only; other sessions and the transport
//! itself are unaffected.
//!
//! A probe needs a server-to-client channel, so sessions without an attached
//! stream handle (batch sessions, detached streams) are instead evicted once
//! idle longer than frequency + timeout — the same observable bound as an
//! unacknowledged probe.
//!
//! A frequency of zero disables the monitor entirely; sessions then persist
//! until explicitly closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{encode, JsonRpcId, Message, Request};
use crate::error::TransportError;
use crate::session::{LivenessState, Session, SessionRegistry};

/// Method name of the liveness probe request.
pub const PING_METHOD: &str = "ping";

/// What the sweep decided for one session.
#[derive(Debug, PartialEq, Eq)]
enum SweepAction {
    /// Session is healthy or a probe is still within its timeout.
    Keep,
    /// Probe timed out or the session exceeded the unprobed idle bound.
    Evict,
}

/// Background liveness monitor.
///
/// Owns no session state; it only reads/updates the per-session liveness
/// machine under the session's own lock and removes evicted sessions from
/// the registry.
pub struct PingMonitor {
    registry: Arc<SessionRegistry>,
    frequency: Duration,
    timeout: Duration,
}

impl PingMonitor {
    /// Create a monitor.
    ///
    /// # Arguments
    ///
    /// * `frequency` - interval between probes per session (must be
    ///   non-zero; a zero frequency means the monitor is never spawned)
    /// * `timeout` - how long to wait for a probe ack
    pub fn new(registry: Arc<SessionRegistry>, frequency: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            frequency,
            timeout,
        }
    }

    /// Spawn the sweep loop.
    ///
    /// The task runs until `cancel` is triggered. The sweep cadence is a
    /// fraction of the smaller of frequency and timeout so eviction lands
    /// close to the configured bounds.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let tick = (self.frequency.min(self.timeout) / 2).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                frequency_ms = self.frequency.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "liveness monitor started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("liveness monitor stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }

    /// One pass over every active session.
    async fn sweep(&self) {
        for session in self.registry.snapshot() {
            if self.check_session(&session).await == SweepAction::Evict {
                let err = TransportError::TimedOut {
                    session_id: session.id().to_string(),
                };
                warn!(%err, "session evicted");
                self.registry.remove(session.id());
            }
        }
    }

    /// Evaluate one session's liveness, sending a probe if it is due.
    async fn check_session(&self, session: &Arc<Session>) -> SweepAction {
        let mut state = session.state.lock().await;

        match &state.liveness {
            LivenessState::ProbeSent { id, sent_at } => {
                if sent_at.elapsed() >= self.timeout {
                    debug!(session_id = %session.id(), probe_id = %id, "probe ack timed out");
                    SweepAction::Evict
                } else {
                    SweepAction::Keep
                }
            }
            LivenessState::Idle => {
                if state.last_activity.elapsed() < self.frequency {
                    return SweepAction::Keep;
                }

                if let Some(tx) = state.stream.clone() {
                    let probe_id = JsonRpcId::String(format!("ping-{}", Uuid::new_v4()));
                    let probe = Message::Request(Request::new(probe_id.clone(), PING_METHOD, None));
                    // try_send so a slow client never stalls the sweep; a
                    // full channel means the client is not draining, and the
                    // unprobed idle bound below takes over.
                    match tx.try_send(encode(&probe)) {
                        Ok(()) => {
                            debug!(session_id = %session.id(), probe_id = %probe_id, "probe sent");
                            state.awaited.insert(probe_id.clone());
                            state.liveness = LivenessState::ProbeSent {
                                id: probe_id,
                                sent_at: Instant::now(),
                            };
                            return SweepAction::Keep;
                        }
                        Err(_) => {
                            state.stream = None;
                        }
                    }
                }

                // No way to probe: apply the combined idle bound.
                if state.last_activity.elapsed() >= self.frequency + self.timeout {
                    SweepAction::Evict
                } else {
                    SweepAction::Keep
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Payload};
    use crate::config::ResponseMode;
    use tokio::time::sleep;

    fn monitor(registry: &Arc<SessionRegistry>, freq_ms: u64, timeout_ms: u64) -> PingMonitor {
        PingMonitor::new(
            registry.clone(),
            Duration::from_millis(freq_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_unacked_probe_evicts_and_closes_stream() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(ResponseMode::Stream);
        let mut rx = session.attach_stream(8).await;

        let cancel = CancellationToken::new();
        let handle = monitor(&registry, 100, 50).spawn(cancel.clone());

        // Probe arrives once the session has idled past the frequency.
        let frame = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("probe should be sent")
            .expect("stream should be open");
        let payload = decode(&frame, usize::MAX).unwrap();
        assert!(matches!(
            payload,
            Payload::Single(Message::Request(ref req)) if req.method == PING_METHOD
        ));

        // Never ack: eviction at roughly frequency + timeout.
        sleep(Duration::from_millis(120)).await;
        assert!(registry.get(session.id()).is_none());

        // Eviction dropped the stream sender; hold our Arc release first.
        drop(session);
        assert!(rx.recv().await.is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_acked_probe_keeps_session() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(ResponseMode::Stream);
        let mut rx = session.attach_stream(8).await;

        let cancel = CancellationToken::new();
        let handle = monitor(&registry, 60, 60).spawn(cancel.clone());

        // Ack every probe as it arrives, for several cycles.
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_millis(400), rx.recv())
                .await
                .expect("probe should be sent")
                .expect("stream should be open");
            let payload = decode(&frame, usize::MAX).unwrap();
            let probe_id = match payload {
                Payload::Single(Message::Request(req)) => req.id,
                other => panic!("expected probe request, got {other:?}"),
            };
            assert!(session.correlate_response(&probe_id).await);
        }

        assert!(registry.get(session.id()).is_some());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unprobed_session_evicted_on_idle_bound() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(ResponseMode::Batch);

        let cancel = CancellationToken::new();
        let handle = monitor(&registry, 50, 50).spawn(cancel.clone());

        // No stream handle to probe; eviction after frequency + timeout.
        sleep(Duration::from_millis(250)).await;
        assert!(registry.get(session.id()).is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_session_despite_stalled_peer() {
        let registry = Arc::new(SessionRegistry::new());
        let stalled = registry.create(ResponseMode::Stream);
        let _rx = stalled.attach_stream(1).await;
        let idle = registry.create(ResponseMode::Batch);

        // Hammer the stalled session with deliveries its client never
        // drains; this must not hold up the sweep's pass over other
        // sessions.
        let router = crate::router::DeliveryRouter::new(registry.clone(), 2);
        let stalled_id = stalled.id().to_string();
        let feeder = tokio::spawn(async move {
            loop {
                let msg = Message::Request(Request::new(JsonRpcId::Number(0), PING_METHOD, None));
                let _ = router.deliver(&stalled_id, msg).await;
                sleep(Duration::from_millis(5)).await;
            }
        });

        let cancel = CancellationToken::new();
        let handle = monitor(&registry, 50, 50).spawn(cancel.clone());

        sleep(Duration::from_millis(300)).await;
        assert!(
            registry.get(idle.id()).is_none(),
            "idle session should be evicted while a peer is stalled"
        );

        feeder.abort();
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_activity_defers_probe() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(ResponseMode::Stream);
        let _rx = session.attach_stream(8).await;

        let cancel = CancellationToken::new();
        let handle = monitor(&registry, 200, 100).spawn(cancel.clone());

        // Keep touching before the frequency elapses; no probe, no eviction.
        for _ in 0..4 {
            sleep(Duration::from_millis(80)).await;
            session.touch().await;
        }
        assert!(registry.get(session.id()).is_some());
        assert_eq!(
            session.state.lock().await.liveness,
            LivenessState::Idle,
            "no probe should have been sent"
        );

        cancel.cancel();
        handle.await.unwrap();
    }
}
