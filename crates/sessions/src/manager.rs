//! Session ownership: live/suspended sets, attach, get, suspend, wake, expiry.

use {
    crate::{
        ActionOutput,
        error::{Error, Result},
        rule::SessionRule,
        session::{Session, SpaceKey},
    },
    botway_common::Flag,
    botway_protocol::Event,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex, RwLock},
        time::Duration,
    },
    tracing::debug,
};

/// How a handler wants its sessions managed.
#[derive(Clone)]
pub struct SessionPolicy {
    /// `None` means a fresh one-shot session per event, never reused.
    pub rule: Option<Arc<dyn SessionRule>>,
    /// On conflict with a working session: wait for it (`true`) or drop.
    pub wait: bool,
    /// Keep the session alive after the callback returns.
    pub keep: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            rule: None,
            wait: false,
            keep: false,
        }
    }
}

/// The two session sets of one space. A session is in `storage` xor in
/// `hup`, and the suspended-signal flip happens under the same lock as the
/// move between them, so set membership and signal state never disagree.
#[derive(Default)]
struct SpaceSets {
    /// Live (free or working) sessions.
    storage: Vec<Arc<Session>>,
    /// Suspended sessions.
    hup: Vec<Arc<Session>>,
}

impl SpaceSets {
    fn remove_live(&mut self, session: &Arc<Session>) {
        if let Some(i) = self.storage.iter().position(|s| Arc::ptr_eq(s, session)) {
            self.storage.remove(i);
        }
    }

    fn remove_suspended(&mut self, session: &Arc<Session>) {
        if let Some(i) = self.hup.iter().position(|s| Arc::ptr_eq(s, session)) {
            self.hup.remove(i);
        }
    }

    /// Move back to the live set and wake the suspended callback.
    fn rouse(&mut self, session: &Arc<Session>) {
        self.remove_suspended(session);
        self.storage.push(Arc::clone(session));
        session.awake_signal.set();
    }
}

/// Per-handler session space.
struct Space {
    sets: Mutex<SpaceSets>,
    /// Serializes candidate selection, held across the blocking wait in `get`.
    work_lock: tokio::sync::Mutex<()>,
    /// Serializes attach attempts.
    attach_lock: tokio::sync::Mutex<()>,
    /// Raised by a `get` parked on a suspended session so a concurrent
    /// attach may proceed even though `work_lock` is held.
    deadlock_flag: Flag,
}

impl Space {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sets: Mutex::new(SpaceSets::default()),
            work_lock: tokio::sync::Mutex::new(()),
            attach_lock: tokio::sync::Mutex::new(()),
            deadlock_flag: Flag::new(false),
        })
    }

    fn sets(&self) -> std::sync::MutexGuard<'_, SpaceSets> {
        self.sets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns every handler's session space.
pub struct SessionManager {
    spaces: RwLock<HashMap<SpaceKey, Arc<Space>>>,
    responder: Arc<dyn ActionOutput>,
}

impl SessionManager {
    pub fn new(responder: Arc<dyn ActionOutput>) -> Arc<Self> {
        Arc::new(Self {
            spaces: RwLock::new(HashMap::new()),
            responder,
        })
    }

    /// Create the session space for a handler. Called once per registration.
    pub fn register(&self, key: SpaceKey) {
        self.spaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Space::new());
    }

    fn space(&self, key: SpaceKey) -> Result<Arc<Space>> {
        self.spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Message(format!("unregistered session space {key}")))
    }

    fn make_session(&self, event: Arc<Event>, space: Option<(SpaceKey, &Space)>) -> Arc<Session> {
        let session = Session::new(Arc::clone(&self.responder), space.map(|(k, _)| k));
        session.push_event(event);
        if let Some((_, sp)) = space {
            sp.sets().storage.push(Arc::clone(&session));
        }
        session
    }

    /// A one-shot session for a single event, outside any space.
    pub fn make_temp(&self, event: Arc<Event>) -> Arc<Session> {
        self.make_session(event, None)
    }

    /// A session with no event and no space, for hook callbacks.
    pub fn make_empty(&self) -> Arc<Session> {
        Session::new(Arc::clone(&self.responder), None)
    }

    // ── Attach ──────────────────────────────────────────────────────────────

    /// Fast path: feed `event` to an already-suspended matching session and
    /// wake it. Returns whether an attach happened.
    pub async fn try_attach(
        &self,
        event: &Arc<Event>,
        key: SpaceKey,
        rule: &dyn SessionRule,
    ) -> Result<bool> {
        let space = self.space(key)?;
        let _attach_guard = space.attach_lock.lock().await;

        // Race the deadlock flag against the work lock; the losing future is
        // dropped, which releases or abandons its claim.
        let attached = tokio::select! {
            _ = space.deadlock_flag.wait() => {
                let res = Self::attach_step(&space, event, rule);
                space.deadlock_flag.clear();
                res
            }
            _work_guard = space.work_lock.lock() => {
                Self::attach_step(&space, event, rule)
            }
        };
        if attached {
            debug!(space = %key, event = event.id(), "event attached to suspended session");
        }
        Ok(attached)
    }

    /// Critical section: scan the suspended set, append and rouse on the
    /// first rule match. Holds the sets lock throughout, no awaits.
    fn attach_step(space: &Space, event: &Arc<Event>, rule: &dyn SessionRule) -> bool {
        let mut sets = space.sets();
        // Suspended sessions are never expired, so no expiry check here.
        let found = sets
            .hup
            .iter()
            .find(|s| Self::same_conversation(rule, s, event))
            .cloned();
        match found {
            Some(session) => {
                session.push_event(Arc::clone(event));
                sets.rouse(&session);
                true
            },
            None => false,
        }
    }

    // ── Get ─────────────────────────────────────────────────────────────────

    /// Acquire the session for `event`. Returns `None` only on a
    /// conflict-no-wait. The returned session has its free signal cleared.
    pub async fn get(
        &self,
        event: Arc<Event>,
        key: SpaceKey,
        policy: &SessionPolicy,
    ) -> Result<Option<Arc<Session>>> {
        let Some(rule) = policy.rule.as_deref() else {
            let session = self.make_temp(event);
            session.free.clear();
            return Ok(Some(session));
        };

        let space = self.space(key)?;
        // The free signal may only flip while the work lock is held.
        let _work_guard = space.work_lock.lock().await;
        let session = self.get_on_rule(&space, key, event, rule, policy.wait).await;
        if let Some(s) = &session {
            s.free.clear();
        }
        Ok(session)
    }

    async fn get_on_rule(
        &self,
        space: &Arc<Space>,
        key: SpaceKey,
        event: Arc<Event>,
        rule: &dyn SessionRule,
        wait: bool,
    ) -> Option<Arc<Session>> {
        let found = space
            .sets()
            .storage
            .iter()
            .find(|s| !s.is_expired() && Self::same_conversation(rule, s, &event))
            .cloned();
        let Some(session) = found else {
            return Some(self.make_session(event, Some((key, space.as_ref()))));
        };

        if session.free.is_set() {
            session.push_event(event);
            return Some(session);
        }
        if !wait {
            return None;
        }

        // The session is working. Wait for it to become free or suspended.
        tokio::select! {
            _ = session.free.wait() => {}
            _ = session.hup_signal.wait() => {}
        }
        if session.hup_signal.is_set() {
            // It suspended while we held the work lock. Let attaches through,
            // one of them is the only thing that can free it.
            space.deadlock_flag.set();
            debug!(space = %key, "get parked on a suspended session, deadlock flag raised");
            session.free.wait().await;
        }

        // Back on this task the session is free and not suspended, but it may
        // have expired; it still exists because we hold a reference.
        if session.is_expired() {
            Some(self.make_session(event, Some((key, space.as_ref()))))
        } else {
            session.push_event(event);
            Some(session)
        }
    }

    fn same_conversation(rule: &dyn SessionRule, session: &Session, event: &Event) -> bool {
        session
            .event()
            .map(|anchor| rule.compare(&anchor, event))
            .unwrap_or(false)
    }

    // ── Suspend / wake ──────────────────────────────────────────────────────

    /// Suspend `session` until a matching event attaches, or until `timeout`
    /// elapses, in which case the session is forcibly roused and
    /// [`Error::SuspendTimeout`] is returned.
    pub async fn hup(&self, session: &Arc<Session>, timeout: Option<Duration>) -> Result<()> {
        let key = session.space().ok_or(Error::NoSpace)?;
        if session.is_expired() {
            return Err(Error::Expired);
        }
        if timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::BadTimeout);
        }
        let space = self.space(key)?;

        session.record_hup();
        {
            let mut sets = space.sets();
            sets.remove_live(session);
            sets.hup.push(Arc::clone(session));
            session.awake_signal.clear();
        }
        debug!(space = %key, "session suspended");

        match timeout {
            None => {
                session.awake_signal.wait().await;
                Ok(())
            },
            Some(limit) => {
                tokio::select! {
                    _ = session.awake_signal.wait() => {}
                    _ = tokio::time::sleep(limit) => {}
                }
                if session.awake_signal.is_set() {
                    return Ok(());
                }
                space.sets().rouse(session);
                Err(Error::SuspendTimeout)
            },
        }
    }

    /// Force-rouse a session that is still suspended when its callback is
    /// unwinding (e.g. shutdown).
    pub fn rouse_if_suspended(&self, session: &Arc<Session>) {
        if let Some(key) = session.space()
            && let Ok(space) = self.space(key)
        {
            let mut sets = space.sets();
            if session.is_suspended() {
                sets.rouse(session);
            }
        }
    }

    /// Force-wake every suspended session so callbacks can unwind.
    pub fn rouse_all(&self) {
        let spaces: Vec<Arc<Space>> = self
            .spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for space in spaces {
            let mut sets = space.sets();
            let suspended: Vec<Arc<Session>> = sets.hup.clone();
            for session in suspended {
                sets.rouse(&session);
            }
        }
    }

    // ── Recycle / expire ────────────────────────────────────────────────────

    /// Release a session after its callback returned. Unless `alive`, the
    /// session is expired. A returning callback has been resumed, so the
    /// session cannot be suspended here.
    pub fn recycle(&self, session: &Arc<Session>, alive: bool) {
        session.free.set();
        if !alive {
            self.expire(session);
        }
    }

    /// Expire immediately, e.g. from `finish()`.
    pub fn destroy(&self, session: &Arc<Session>) {
        self.expire(session);
    }

    fn expire(&self, session: &Arc<Session>) {
        if session.is_expired() {
            return;
        }
        session.mark_expired();
        if let Some(key) = session.space()
            && let Ok(space) = self.space(key)
        {
            space.sets().remove_live(session);
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn live_count(&self, key: SpaceKey) -> usize {
        self.space(key).map(|s| s.sets().storage.len()).unwrap_or(0)
    }

    pub fn suspended_count(&self, key: SpaceKey) -> usize {
        self.space(key).map(|s| s.sets().hup.len()).unwrap_or(0)
    }
}
