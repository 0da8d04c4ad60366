//! The session object.

use {
    crate::{
        ActionOutput,
        error::{Error, Result},
    },
    botway_common::{Flag, TwinFlag, twin_flags},
    botway_protocol::Event,
    serde_json::Value,
    std::{
        collections::HashMap,
        fmt,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Instant,
    },
};

/// Opaque token naming the handler space a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceKey(u64);

impl SpaceKey {
    pub fn next() -> Self {
        Self(botway_common::id::next_u64())
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space:{}", self.0)
    }
}

#[derive(Default)]
struct SessionState {
    /// Oldest first; the `event` accessor returns the newest.
    events: Vec<Arc<Event>>,
    store: HashMap<String, Value>,
    hup_times: Vec<Instant>,
}

/// Per-conversation state. Three live states — free, working, suspended —
/// plus the terminal expired.
///
/// Signal invariant for a non-expired session: exactly one of `free` and
/// `hup` is set; `hup` and `awake` are twins and always opposite.
pub struct Session {
    state: Mutex<SessionState>,
    expired: AtomicBool,
    /// Set iff no callback is currently running on this session.
    pub(crate) free: Flag,
    /// Set iff the session is suspended.
    pub(crate) hup_signal: TwinFlag,
    pub(crate) awake_signal: TwinFlag,
    /// `None` marks a one-shot or empty session.
    space: Option<SpaceKey>,
    responder: Arc<dyn ActionOutput>,
}

impl Session {
    pub(crate) fn new(responder: Arc<dyn ActionOutput>, space: Option<SpaceKey>) -> Arc<Self> {
        let (hup_signal, awake_signal) = twin_flags();
        Arc::new(Self {
            state: Mutex::new(SessionState::default()),
            expired: AtomicBool::new(false),
            free: Flag::new(true),
            hup_signal,
            awake_signal,
            space,
            responder,
        })
    }

    pub fn space(&self) -> Option<SpaceKey> {
        self.space
    }

    pub(crate) fn responder(&self) -> Arc<dyn ActionOutput> {
        Arc::clone(&self.responder)
    }

    /// The newest event of this session.
    pub fn event(&self) -> Result<Arc<Event>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .last()
            .cloned()
            .ok_or(Error::NoEvent)
    }

    /// Snapshot of all events, oldest first.
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clone()
    }

    pub fn event_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .len()
    }

    pub(crate) fn push_event(&self, event: Arc<Event>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .push(event);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.hup_signal.is_set()
    }

    pub fn is_free(&self) -> bool {
        self.free.is_set()
    }

    pub fn last_hup(&self) -> Option<Instant> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .hup_times
            .last()
            .copied()
    }

    pub(crate) fn record_hup(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .hup_times
            .push(Instant::now());
    }

    /// Mark expired and drop all carried state. Space-set removal is the
    /// manager's job.
    pub(crate) fn mark_expired(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.events.clear();
        state.store.clear();
        state.hup_times.clear();
        drop(state);
        self.expired.store(true, Ordering::SeqCst);
    }

    // ── Store ───────────────────────────────────────────────────────────────

    pub fn store_get(&self, key: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .get(key)
            .cloned()
    }

    pub fn store_put(&self, key: impl Into<String>, val: Value) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .insert(key.into(), val);
    }

    pub fn store_remove(&self, key: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .remove(key)
    }

    pub fn store_clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("space", &self.space)
            .field("expired", &self.is_expired())
            .field("free", &self.free.is_set())
            .field("suspended", &self.hup_signal.is_set())
            .field("events", &self.event_count())
            .finish()
    }
}
