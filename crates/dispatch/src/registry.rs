//! Handler registration records and the registry that validates and builds
//! them.

use {
    crate::{
        error::{Error, Result},
        handler::{Callback, EventHandler},
        matching::{Checker, Matcher, Parser},
    },
    botway_protocol::EventKind,
    botway_sessions::{SessionManager, SessionRule, SpaceKey},
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    },
};

/// Configuration record for one handler registration. The engine builds one
/// [`EventHandler`] per record; there is no implicit discovery.
pub struct HandlerSetup {
    pub(crate) name: String,
    pub(crate) kind: EventKind,
    pub(crate) callback: Callback,
    pub(crate) priority: i32,
    pub(crate) block: bool,
    pub(crate) temp: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) checker: Option<Arc<dyn Checker>>,
    pub(crate) matcher: Option<Arc<dyn Matcher>>,
    pub(crate) parser: Option<Arc<dyn Parser>>,
    pub(crate) session_rule: Option<Arc<dyn SessionRule>>,
    pub(crate) session_wait: bool,
    pub(crate) session_keep: bool,
    pub(crate) direct_rouse: bool,
    pub(crate) conflict_cb: Option<Callback>,
    pub(crate) overtime_cb: Option<Callback>,
}

impl HandlerSetup {
    pub fn new(name: impl Into<String>, kind: EventKind, callback: Callback) -> Self {
        Self {
            name: name.into(),
            kind,
            callback,
            priority: 0,
            block: false,
            temp: false,
            timeout: None,
            checker: None,
            matcher: None,
            parser: None,
            session_rule: None,
            session_wait: false,
            session_keep: false,
            direct_rouse: false,
            conflict_cb: None,
            overtime_cb: None,
        }
    }

    /// Higher runs first; ties run in registration order.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A successful evoke blocks strictly lower priorities for the event.
    #[must_use]
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// One-shot: the handler invalidates after its first successful evoke.
    #[must_use]
    pub fn temp(mut self, temp: bool) -> Self {
        self.temp = temp;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    #[must_use]
    pub fn session_rule(mut self, rule: Arc<dyn SessionRule>) -> Self {
        self.session_rule = Some(rule);
        self
    }

    /// On conflict with a working session, wait for it instead of dropping.
    #[must_use]
    pub fn session_wait(mut self, wait: bool) -> Self {
        self.session_wait = wait;
        self
    }

    /// Keep the session alive after the callback returns.
    #[must_use]
    pub fn session_keep(mut self, keep: bool) -> Self {
        self.session_keep = keep;
        self
    }

    /// Try attaching to a suspended session already during evoke.
    #[must_use]
    pub fn direct_rouse(mut self, rouse: bool) -> Self {
        self.direct_rouse = rouse;
        self
    }

    /// Run in a temporary session when a conflict is dropped.
    #[must_use]
    pub fn on_conflict(mut self, cb: Callback) -> Self {
        self.conflict_cb = Some(cb);
        self
    }

    /// Run when the callback exceeds its timeout.
    #[must_use]
    pub fn on_overtime(mut self, cb: Callback) -> Self {
        self.overtime_cb = Some(cb);
        self
    }
}

/// Holds every built handler, grouped by event kind.
pub struct HandlerRegistry {
    manager: Arc<SessionManager>,
    handlers: Mutex<Vec<Arc<EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Validate and build one handler, registering its session space.
    pub fn register(&self, setup: HandlerSetup) -> Result<Arc<EventHandler>> {
        if setup.session_rule.is_none()
            && (setup.session_wait
                || setup.session_keep
                || setup.direct_rouse
                || setup.conflict_cb.is_some())
        {
            return Err(Error::Registration(format!(
                "handler {}: session_wait/session_keep/direct_rouse/conflict callback need a session rule",
                setup.name
            )));
        }
        if setup.session_wait && setup.conflict_cb.is_some() {
            return Err(Error::Registration(format!(
                "handler {}: a waiting handler never runs its conflict callback",
                setup.name
            )));
        }
        if setup.matcher.is_some() && setup.parser.is_some() {
            return Err(Error::Registration(format!(
                "handler {}: matcher and parser are mutually exclusive",
                setup.name
            )));
        }
        if (setup.matcher.is_some() || setup.parser.is_some()) && setup.kind != EventKind::Message
        {
            return Err(Error::Registration(format!(
                "handler {}: matchers and parsers only apply to message handlers",
                setup.name
            )));
        }

        let space = SpaceKey::next();
        self.manager.register(space);
        let handler = EventHandler::from_setup(setup, space, Arc::clone(&self.manager));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&handler));
        Ok(handler)
    }

    /// All handlers grouped by kind, in registration order.
    pub fn grouped(&self) -> HashMap<EventKind, Vec<Arc<EventHandler>>> {
        let mut grouped: HashMap<EventKind, Vec<Arc<EventHandler>>> = HashMap::new();
        for handler in self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            grouped
                .entry(handler.kind())
                .or_default()
                .push(Arc::clone(handler));
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
