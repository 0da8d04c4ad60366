//! Lifecycle hook bus.
//!
//! Components emit typed lifecycle payloads; user code subscribes with async
//! runners. Waited emission runs runners sequentially and collects a verdict
//! (continue / modify / drop) the emitter applies; detached emission is
//! fire-and-forget. Every runner executes under a fresh empty session
//! context so the action helpers do not leak state from the triggering
//! event. Runner errors are logged and swallowed, never propagated.

use {
    botway_protocol::{Action, Event},
    botway_sessions::{SessionManager, context},
    futures::future::BoxFuture,
    serde_json::Value,
    std::{
        collections::HashMap,
        fmt,
        sync::{Arc, Mutex, OnceLock},
    },
    tracing::{debug, info, warn},
};

// ── Lifecycle points ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotLife {
    Loaded,
    Connected,
    BeforeClose,
    BeforeStop,
    EventBuilt,
    ActionPresend,
}

impl BotLife {
    /// All variants, for iteration.
    pub const ALL: &'static [BotLife] = &[
        Self::Loaded,
        Self::Connected,
        Self::BeforeClose,
        Self::BeforeStop,
        Self::EventBuilt,
        Self::ActionPresend,
    ];
}

impl fmt::Display for BotLife {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Typed payload carried with each lifecycle point.
#[derive(Debug, Clone)]
pub enum HookPayload {
    Loaded,
    Connected,
    BeforeClose,
    BeforeStop,
    EventBuilt(Arc<Event>),
    ActionPresend(Action),
}

impl HookPayload {
    pub fn life(&self) -> BotLife {
        match self {
            Self::Loaded => BotLife::Loaded,
            Self::Connected => BotLife::Connected,
            Self::BeforeClose => BotLife::BeforeClose,
            Self::BeforeStop => BotLife::BeforeStop,
            Self::EventBuilt(_) => BotLife::EventBuilt,
            Self::ActionPresend(_) => BotLife::ActionPresend,
        }
    }
}

/// The outcome a runner returns on a waited emission.
#[derive(Debug, Default)]
pub enum HookVerdict {
    /// Let the event or action proceed unchanged.
    #[default]
    Continue,
    /// Replace the payload's parameters.
    Modify(Value),
    /// Drop the event or action, with a reason.
    Drop(String),
}

// ── Runners ─────────────────────────────────────────────────────────────────

type RunnerFn = dyn Fn(HookPayload) -> BoxFuture<'static, anyhow::Result<HookVerdict>> + Send + Sync;

#[derive(Clone)]
struct HookRunner {
    name: Arc<str>,
    cb: Arc<RunnerFn>,
}

// ── Bus ─────────────────────────────────────────────────────────────────────

/// Registry plus emitter for lifecycle hooks. Registration may happen at
/// build time or dynamically while the bot runs.
pub struct HookBus {
    runners: Mutex<HashMap<BotLife, Vec<HookRunner>>>,
    manager: OnceLock<Arc<SessionManager>>,
}

impl HookBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runners: Mutex::new(HashMap::new()),
            manager: OnceLock::new(),
        })
    }

    /// Late-bind the session manager so runners get an empty session scope.
    pub fn bind(&self, manager: Arc<SessionManager>) {
        let _ = self.manager.set(manager);
    }

    /// Subscribe `runner` to one lifecycle point.
    pub fn on<F, Fut>(&self, life: BotLife, name: impl Into<String>, runner: F)
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookVerdict>> + Send + 'static,
    {
        let name: Arc<str> = name.into().into();
        let entry = HookRunner {
            name: Arc::clone(&name),
            cb: Arc::new(move |payload| -> BoxFuture<'static, anyhow::Result<HookVerdict>> {
                Box::pin(runner(payload))
            }),
        };
        self.runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(life)
            .or_default()
            .push(entry);
        info!(hook = %name, life = %life, "hook runner registered");
    }

    fn runners_for(&self, life: BotLife) -> Vec<HookRunner> {
        self.runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&life)
            .cloned()
            .unwrap_or_default()
    }

    /// Run one runner under a fresh empty session context.
    async fn run_one(self: &Arc<Self>, runner: HookRunner, payload: HookPayload) -> HookVerdict {
        let life = payload.life();
        let fut = (runner.cb)(payload);
        let result = match self.manager.get() {
            Some(manager) => {
                let current = context::CurrentSession {
                    session: manager.make_empty(),
                    manager: Arc::clone(manager),
                    parser: None,
                };
                context::scope(current, fut).await
            },
            None => fut.await,
        };
        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(hook = %runner.name, life = %life, error = %e, "hook runner failed");
                HookVerdict::Continue
            },
        }
    }

    /// Waited emission: run runners sequentially, awaiting each.
    /// The first [`HookVerdict::Drop`] short-circuits; otherwise the last
    /// [`HookVerdict::Modify`] wins.
    pub async fn emit_wait(self: &Arc<Self>, payload: HookPayload) -> HookVerdict {
        let life = payload.life();
        let runners = self.runners_for(life);
        if runners.is_empty() {
            return HookVerdict::Continue;
        }
        debug!(life = %life, count = runners.len(), "emitting lifecycle hook");

        let mut last_modify: Option<Value> = None;
        for runner in runners {
            let name = Arc::clone(&runner.name);
            match self.run_one(runner, payload.clone()).await {
                HookVerdict::Continue => {},
                HookVerdict::Modify(v) => {
                    debug!(hook = %name, life = %life, "hook modified payload");
                    last_modify = Some(v);
                },
                HookVerdict::Drop(reason) => {
                    info!(hook = %name, life = %life, reason = %reason, "hook dropped payload");
                    return HookVerdict::Drop(reason);
                },
            }
        }
        match last_modify {
            Some(v) => HookVerdict::Modify(v),
            None => HookVerdict::Continue,
        }
    }

    /// Detached emission: schedule every runner and return immediately.
    /// Verdicts are ignored.
    pub fn emit(self: &Arc<Self>, payload: HookPayload) {
        for runner in self.runners_for(payload.life()) {
            let bus = Arc::clone(self);
            let payload = payload.clone();
            tokio::spawn(async move {
                bus.run_one(runner, payload).await;
            });
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        botway_sessions::{ActionOutput, EchoReceiver},
        std::{
            sync::atomic::{AtomicUsize, Ordering},
            time::Duration,
        },
    };

    struct NullOutput;

    #[async_trait::async_trait]
    impl ActionOutput for NullOutput {
        async fn take_action(&self, _action: Action) -> anyhow::Result<()> {
            Ok(())
        }

        async fn take_action_wait(&self, _action: Action) -> anyhow::Result<EchoReceiver> {
            let (_tx, rx) = tokio::sync::oneshot::channel();
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn waited_emission_is_sequential_and_last_modify_wins() {
        let bus = HookBus::new();
        bus.on(BotLife::ActionPresend, "first", |_p| async {
            Ok(HookVerdict::Modify(serde_json::json!({"n": 1})))
        });
        bus.on(BotLife::ActionPresend, "second", |_p| async {
            Ok(HookVerdict::Modify(serde_json::json!({"n": 2})))
        });

        let action = Action::new("send_msg", serde_json::json!({}));
        match bus.emit_wait(HookPayload::ActionPresend(action)).await {
            HookVerdict::Modify(v) => assert_eq!(v["n"], 2),
            other => panic!("expected modify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_short_circuits() {
        let bus = HookBus::new();
        let later = Arc::new(AtomicUsize::new(0));
        bus.on(BotLife::ActionPresend, "dropper", |_p| async {
            Ok(HookVerdict::Drop("no".into()))
        });
        let counter = Arc::clone(&later);
        bus.on(BotLife::ActionPresend, "after", move |_p| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(HookVerdict::Continue)
            }
        });

        let action = Action::new("send_msg", serde_json::json!({}));
        let verdict = bus.emit_wait(HookPayload::ActionPresend(action)).await;
        assert!(matches!(verdict, HookVerdict::Drop(_)));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runner_errors_are_swallowed() {
        let bus = HookBus::new();
        bus.on(BotLife::Loaded, "failer", |_p| async {
            anyhow::bail!("always fails")
        });
        bus.on(BotLife::Loaded, "ok", |_p| async { Ok(HookVerdict::Continue) });
        let verdict = bus.emit_wait(HookPayload::Loaded).await;
        assert!(matches!(verdict, HookVerdict::Continue));
    }

    #[tokio::test]
    async fn detached_emission_runs_eventually() {
        let bus = HookBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on(BotLife::Connected, "counter", move |_p| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(HookVerdict::Continue)
            }
        });

        bus.emit(HookPayload::Connected);
        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn runners_get_an_empty_session_scope() {
        let bus = HookBus::new();
        let manager = SessionManager::new(Arc::new(NullOutput));
        bus.bind(manager);

        bus.on(BotLife::Loaded, "scoped", |_p| async {
            let current = context::try_current()?;
            assert!(current.session.event().is_err());
            assert!(current.session.space().is_none());
            Ok(HookVerdict::Continue)
        });
        let ok = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ok);
        bus.on(BotLife::Loaded, "confirm", move |_p| {
            let counter = Arc::clone(&counter);
            async move {
                if context::try_current().is_ok() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(HookVerdict::Continue)
            }
        });

        bus.emit_wait(HookPayload::Loaded).await;
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }
}
