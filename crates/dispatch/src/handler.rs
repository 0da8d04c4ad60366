//! One registered user callback and its evoke/run machinery.

use {
    crate::matching::{Checker, Matcher, Parser},
    botway_protocol::{Event, EventKind},
    botway_sessions::{
        Error as SessionError, Session, SessionManager, SessionPolicy, SpaceKey,
        context::{self, CurrentSession},
    },
    futures::future::BoxFuture,
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
    tracing::{debug, error, warn},
};

/// A user callback. Runs with the current session installed, so the
/// context helpers in `botway_sessions::context` resolve.
pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async fn into a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f()) })
}

/// A registered handler: the callback plus its matching pieces and session
/// policy. Built by the registry, driven by the dispatcher.
pub struct EventHandler {
    pub(crate) name: String,
    pub(crate) kind: EventKind,
    callback: Callback,
    checker: Option<Arc<dyn Checker>>,
    matcher: Option<Arc<dyn Matcher>>,
    parser: Option<Arc<dyn Parser>>,
    priority: i32,
    block: bool,
    temp: bool,
    timeout: Option<Duration>,
    policy: SessionPolicy,
    direct_rouse: bool,
    conflict_cb: Option<Callback>,
    overtime_cb: Option<Callback>,
    valid: AtomicBool,
    /// Gates the valid→invalid transition of a `temp` handler.
    run_lock: tokio::sync::Mutex<()>,
    space: SpaceKey,
    manager: Arc<SessionManager>,
}

impl EventHandler {
    pub(crate) fn from_setup(
        setup: crate::registry::HandlerSetup,
        space: SpaceKey,
        manager: Arc<SessionManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: setup.name,
            kind: setup.kind,
            callback: setup.callback,
            checker: setup.checker,
            matcher: setup.matcher,
            parser: setup.parser,
            priority: setup.priority,
            block: setup.block,
            temp: setup.temp,
            timeout: setup.timeout,
            policy: SessionPolicy {
                rule: setup.session_rule,
                wait: setup.session_wait,
                keep: setup.session_keep,
            },
            direct_rouse: setup.direct_rouse,
            conflict_cb: setup.conflict_cb,
            overtime_cb: setup.overtime_cb,
            valid: AtomicBool::new(true),
            run_lock: tokio::sync::Mutex::new(()),
            space,
            manager,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn blocks(&self) -> bool {
        self.block
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Decide whether this handler accepts `event`. Acceptance means a
    /// callback task has been scheduled (or a suspended session was woken),
    /// not that it has completed. The dispatcher uses the return value for
    /// priority blocking.
    pub async fn evoke(self: &Arc<Self>, event: Arc<Event>) -> bool {
        if !self.valid.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(checker) = &self.checker
            && !checker.check(&event)
        {
            return false;
        }
        if !self.match_or_parse(&event) {
            return false;
        }

        if self.direct_rouse
            && let Some(rule) = self.policy.rule.as_deref()
        {
            match self.manager.try_attach(&event, self.space, rule).await {
                Ok(true) => return true,
                Ok(false) => {},
                Err(e) => {
                    error!(handler = %self.name, event = event.id(), error = %e, "attach failed");
                    return false;
                },
            }
        }

        if !self.temp {
            tokio::spawn(Arc::clone(self).run(event));
            return true;
        }

        let _gate = self.run_lock.lock().await;
        if self.valid.load(Ordering::SeqCst) {
            self.valid.store(false, Ordering::SeqCst);
            tokio::spawn(Arc::clone(self).run(event));
            true
        } else {
            false
        }
    }

    /// Matcher / parser apply to message events only; other kinds pass.
    fn match_or_parse(&self, event: &Arc<Event>) -> bool {
        let Some(msg) = event.as_message() else {
            return true;
        };
        if let Some(matcher) = &self.matcher {
            return matcher.matches(&msg.text);
        }
        if let Some(parser) = &self.parser {
            let group = match msg.cached_args(parser.id()) {
                Some(cached) => cached,
                None => {
                    let parsed = parser.parse(&msg.text);
                    msg.store_args(parser.id(), parsed.clone());
                    parsed
                },
            };
            return group.map(|g| parser.test(&g)).unwrap_or(false);
        }
        true
    }

    async fn run(self: Arc<Self>, event: Arc<Event>) {
        // Attach here when evoke did not already try.
        if !self.direct_rouse
            && let Some(rule) = self.policy.rule.as_deref()
        {
            match self.manager.try_attach(&event, self.space, rule).await {
                Ok(true) => return,
                Ok(false) => {},
                Err(e) => {
                    error!(handler = %self.name, event = event.id(), error = %e, "attach failed");
                    return;
                },
            }
        }

        let session = match self
            .manager
            .get(Arc::clone(&event), self.space, &self.policy)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(handler = %self.name, event = event.id(), error = %e, "session acquisition failed");
                return;
            },
        };

        let Some(session) = session else {
            // Conflict with a working session and this handler does not wait.
            debug!(handler = %self.name, event = event.id(), "session conflict, not waiting");
            if let Some(conflict_cb) = &self.conflict_cb {
                let temp = self.manager.make_temp(Arc::clone(&event));
                self.run_on_ctx(conflict_cb, &temp, None, &event).await;
            }
            return;
        };

        let timed_out = self
            .run_on_ctx(&self.callback, &session, self.timeout, &event)
            .await;
        if timed_out && let Some(overtime_cb) = &self.overtime_cb {
            self.run_on_ctx(overtime_cb, &session, None, &event).await;
        }

        self.manager.recycle(&session, self.policy.keep);
    }

    /// Run `cb` with `session` installed as the task's current session.
    /// Returns whether the callback timed out. All callback errors are
    /// handled here; nothing propagates.
    async fn run_on_ctx(
        &self,
        cb: &Callback,
        session: &Arc<Session>,
        timeout: Option<Duration>,
        event: &Arc<Event>,
    ) -> bool {
        let current = CurrentSession {
            session: Arc::clone(session),
            manager: Arc::clone(&self.manager),
            parser: self.parser.as_ref().map(|p| p.id()),
        };
        let fut = context::scope(current, (cb)());

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(handler = %self.name, event = event.id(), "handler callback timed out");
                    // The dropped callback may have been parked in a suspend.
                    self.manager.rouse_if_suspended(session);
                    return true;
                },
            },
            None => fut.await,
        };

        // Shutdown can unwind the callback while the session is suspended.
        self.manager.rouse_if_suspended(session);

        if let Err(e) = result {
            if matches!(e.downcast_ref::<SessionError>(), Some(SessionError::Finished)) {
                debug!(handler = %self.name, event = event.id(), "handler finished early");
            } else {
                error!(handler = %self.name, event = event.id(), error = %e, "handler callback failed");
            }
        }
        false
    }
}
