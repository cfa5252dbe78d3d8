//! Session registry and per-session state.
//!
//! A session is the logical client connection context spanning possibly
//! multiple physical HTTP connections, identified by an opaque token carried
//! in the `Mcp-Session-Id` header. The registry is the only cross-cutting
//! shared structure in the transport; it is a concurrent map with per-entry
//! locking, so operating on one session never blocks another.
//!
//! # Locking Contract
//!
//! All mutation of a session's queue, stream handle, batch window, or
//! liveness state happens while holding that session's `tokio::sync::Mutex`.
//! The registry map itself (`DashMap`) is only touched for insert, lookup,
//! and removal.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::BatchWindow;
use crate::codec::JsonRpcId;
use crate::config::ResponseMode;

/// Opaque session token.
pub type SessionId = String;

/// Per-session liveness state machine.
///
/// `Idle → ProbeSent → (acked → Idle) | (timed out → session removed)`.
/// The probe record exists only between send and ack/timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum LivenessState {
    /// No probe outstanding.
    Idle,
    /// A probe was sent and its ack is awaited.
    ProbeSent {
        /// The probe's request id
        id: JsonRpcId,
        /// When the probe was pushed
        sent_at: Instant,
    },
}

/// Mutable session state, guarded by the session's mutex.
#[derive(Debug)]
pub struct SessionState {
    /// Last successful activity (request handled or message delivered)
    pub last_activity: Instant,
    /// The single attached stream handle, when one exists
    pub stream: Option<mpsc::Sender<Bytes>>,
    /// Encoded frames awaiting the next stream handle (bounded)
    pub pending: VecDeque<Bytes>,
    /// Open batch window for the current request cycle, if any
    pub batch: Option<BatchWindow>,
    /// Liveness probe state
    pub liveness: LivenessState,
    /// Ids of server-issued requests awaiting a client response
    pub awaited: HashSet<JsonRpcId>,
}

/// One active session.
///
/// Identity and mode are immutable after creation; everything mutable lives
/// behind [`Session::state`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    mode: ResponseMode,
    pub(crate) state: Mutex<SessionState>,
}

impl Session {
    fn new(id: SessionId, mode: ResponseMode) -> Self {
        let now = Instant::now();
        Self {
            id,
            mode,
            state: Mutex::new(SessionState {
                last_activity: now,
                stream: None,
                pending: VecDeque::new(),
                batch: None,
                liveness: LivenessState::Idle,
                awaited: HashSet::new(),
            }),
        }
    }

    /// The session token.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The delivery mode fixed at creation.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Update the last-activity timestamp.
    pub async fn touch(&self) {
        self.state.lock().await.last_activity = Instant::now();
    }

    /// Attach a new stream handle, replacing (and thereby closing) any
    /// prior one.
    ///
    /// Queued frames are drained into the new channel first so the client
    /// observes them before anything delivered later; at-least-once intent
    /// across a reconnect.
    ///
    /// # Returns
    ///
    /// The receiver side for the connection handler to drive.
    pub async fn attach_stream(&self, capacity: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut state = self.state.lock().await;

        while let Some(frame) = state.pending.pop_front() {
            if let Err(e) = tx.try_send(frame) {
                // Channel capacity equals queue capacity, so this only
                // happens if capacity shrank between config changes; keep
                // the frame for the next handle.
                match e {
                    mpsc::error::TrySendError::Full(frame)
                    | mpsc::error::TrySendError::Closed(frame) => {
                        state.pending.push_front(frame);
                    }
                }
                break;
            }
        }

        // Dropping the old sender ends the old receiver's stream, closing
        // the prior connection.
        let replaced = state.stream.replace(tx).is_some();
        state.last_activity = Instant::now();
        if replaced {
            debug!(session_id = %self.id, "stream handle replaced");
        }
        rx
    }

    /// Correlate a client-sent response id against server-issued requests.
    ///
    /// A matching ping probe transitions the liveness machine back to
    /// `Idle`. Returns `false` for orphaned ids (never issued to this
    /// session), which the front door rejects.
    pub async fn correlate_response(&self, id: &JsonRpcId) -> bool {
        let mut state = self.state.lock().await;
        if !state.awaited.remove(id) {
            return false;
        }
        if matches!(&state.liveness, LivenessState::ProbeSent { id: probe, .. } if probe == id) {
            state.liveness = LivenessState::Idle;
            debug!(session_id = %self.id, probe_id = %id, "ping acked");
        }
        state.last_activity = Instant::now();
        true
    }
}

/// Tracks active sessions keyed by session id.
///
/// Creation is serialized per id by the map's entry API; ids are generated
/// with UUID v4 so collisions are negligible, and a collision simply retries
/// generation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session with the given delivery mode.
    pub fn create(&self, mode: ResponseMode) -> Arc<Session> {
        loop {
            let id = Uuid::new_v4().to_string();
            match self.sessions.entry(id.clone()) {
                Entry::Vacant(entry) => {
                    let session = Arc::new(Session::new(id.clone(), mode));
                    entry.insert(session.clone());
                    info!(session_id = %id, %mode, "session created");
                    return session;
                }
                // 122 bits of entropy collided; regenerate.
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Update a session's last-activity timestamp.
    ///
    /// Returns `false` if the session does not exist.
    pub async fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch().await;
                true
            }
            None => false,
        }
    }

    /// Remove a session.
    ///
    /// The stream sender and any open batch window are dropped eagerly,
    /// even while handlers still hold an `Arc` to the session: dropping
    /// the sender ends the attached stream, and dropping the window wakes
    /// its waiter with a channel error. Pending queues are discarded with
    /// the state.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if let Some(session) = &removed {
            info!(session_id = %id, "session removed");
            let session = session.clone();
            tokio::spawn(async move {
                let mut state = session.state.lock().await;
                state.stream = None;
                state.batch = None;
                state.pending.clear();
            });
        }
        removed
    }

    /// Snapshot of the active session handles (for the liveness sweep).
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session (transport shutdown).
    pub fn clear(&self) {
        self.sessions.clear();
    }
}
