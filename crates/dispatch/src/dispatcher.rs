//! Priority dispatch with blocking.

use {
    crate::handler::EventHandler,
    botway_common::Flag,
    botway_hooks::{HookBus, HookPayload, HookVerdict},
    botway_protocol::{Event, EventKind},
    std::{
        collections::HashMap,
        sync::{Arc, RwLock},
    },
    tracing::debug,
};

/// The permit floor: nothing blocks below it.
pub const MIN_PRIORITY: i32 = i32::MIN;

/// Routes events to the priority-sorted handler list of their kind.
///
/// Echo events never reach the dispatcher; the connector routes them to the
/// responder directly.
pub struct Dispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<EventHandler>>>>,
    /// Cleared while the handler lists are being (re)built.
    ready: Flag,
    hooks: Arc<HookBus>,
}

impl Dispatcher {
    pub fn new(hooks: Arc<HookBus>) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            ready: Flag::new(false),
            hooks,
        })
    }

    /// Install handler lists. Sorting is stable, so equal priorities keep
    /// their registration order.
    pub fn add_handlers(&self, grouped: HashMap<EventKind, Vec<Arc<EventHandler>>>) {
        self.ready.clear();
        {
            let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
            for (kind, list) in grouped {
                let entry = handlers.entry(kind).or_default();
                entry.extend(list);
                entry.sort_by_key(|h| std::cmp::Reverse(h.priority()));
            }
        }
        self.ready.set();
    }

    /// Walk the handler list for `event`'s kind, highest priority first. A
    /// successful blocking handler at priority `p` skips all handlers with
    /// strictly lower priority; equal priorities still run.
    pub async fn dispatch(&self, event: Arc<Event>) {
        self.ready.wait().await;

        if let HookVerdict::Drop(reason) = self
            .hooks
            .emit_wait(HookPayload::EventBuilt(Arc::clone(&event)))
            .await
        {
            debug!(event = event.id(), reason = %reason, "event dropped by hook");
            return;
        }

        let list = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };

        let mut permit = MIN_PRIORITY;
        for handler in &list {
            if handler.priority() < permit {
                continue;
            }
            if !handler.evoke(Arc::clone(&event)).await {
                continue;
            }
            if handler.blocks() && handler.priority() > permit {
                permit = handler.priority();
                debug!(
                    event = event.id(),
                    handler = handler.name(),
                    permit,
                    "priority block raised"
                );
            }
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            handler::callback,
            matching::{CmdParser, FullMatcher, SenderChecker},
            registry::{HandlerRegistry, HandlerSetup},
        },
        botway_hooks::BotLife,
        botway_protocol::{Action, EventBuilder},
        botway_sessions::{ActionOutput, EchoReceiver, SenderRule, SessionManager, context},
        serde_json::json,
        std::{
            collections::HashSet,
            sync::{
                Mutex,
                atomic::{AtomicUsize, Ordering},
            },
            time::Duration,
        },
        tokio::time::sleep,
    };

    struct CaptureOutput {
        sent: Mutex<Vec<Action>>,
    }

    #[async_trait::async_trait]
    impl ActionOutput for CaptureOutput {
        async fn take_action(&self, action: Action) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(action);
            Ok(())
        }

        async fn take_action_wait(&self, action: Action) -> anyhow::Result<EchoReceiver> {
            self.sent.lock().unwrap().push(action);
            let (_tx, rx) = tokio::sync::oneshot::channel();
            Ok(rx)
        }
    }

    struct Harness {
        output: Arc<CaptureOutput>,
        registry: HandlerRegistry,
        dispatcher: Arc<Dispatcher>,
    }

    fn harness() -> Harness {
        let output = Arc::new(CaptureOutput {
            sent: Mutex::new(Vec::new()),
        });
        let manager = SessionManager::new(Arc::clone(&output) as Arc<dyn ActionOutput>);
        let hooks = HookBus::new();
        hooks.bind(Arc::clone(&manager));
        Harness {
            output,
            registry: HandlerRegistry::new(manager),
            dispatcher: Dispatcher::new(hooks),
        }
    }

    impl Harness {
        fn install(&self) {
            self.dispatcher.add_handlers(self.registry.grouped());
        }

        fn sent(&self) -> Vec<Action> {
            self.output.sent.lock().unwrap().clone()
        }
    }

    fn msg(user: i64, id: &str, text: &str) -> Arc<Event> {
        Arc::new(
            EventBuilder::build_value(json!({
                "post_type": "message", "message_type": "private",
                "message_id": id, "user_id": user, "raw_message": text,
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn simple_dispatch_replies_to_the_trigger() {
        let h = harness();
        h.registry
            .register(
                HandlerSetup::new(
                    "ping",
                    EventKind::Message,
                    callback(|| async {
                        context::send("pong").await?;
                        Ok(())
                    }),
                )
                .priority(10)
                .matcher(Arc::new(FullMatcher("ping".into()))),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", "ping")).await;
        sleep(Duration::from_millis(50)).await;

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params["message"], "pong");
        assert_eq!(sent[0].trigger.as_ref().unwrap().id(), "m1");

        // Non-matching text never evokes.
        h.dispatcher.dispatch(msg(5, "m2", "pong")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn priority_block_skips_lower_handlers() {
        let h = harness();
        let low_hits = Arc::new(AtomicUsize::new(0));

        h.registry
            .register(
                HandlerSetup::new("high", EventKind::Message, callback(|| async { Ok(()) }))
                    .priority(20)
                    .block(true)
                    .matcher(Arc::new(FullMatcher("x".into()))),
            )
            .unwrap();
        let hits = Arc::clone(&low_hits);
        h.registry
            .register(
                HandlerSetup::new(
                    "low",
                    EventKind::Message,
                    callback(move || {
                        let hits = Arc::clone(&hits);
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .priority(10)
                .matcher(Arc::new(FullMatcher("x".into()))),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", "x")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(low_hits.load(Ordering::SeqCst), 0);

        // A non-matching event leaves the block unset for lower handlers.
        h.dispatcher.dispatch(msg(5, "m2", "y")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(low_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_priority_still_runs_after_a_block() {
        let h = harness();
        let peer_hits = Arc::new(AtomicUsize::new(0));

        h.registry
            .register(
                HandlerSetup::new("blocker", EventKind::Message, callback(|| async { Ok(()) }))
                    .priority(10)
                    .block(true),
            )
            .unwrap();
        let hits = Arc::clone(&peer_hits);
        h.registry
            .register(
                HandlerSetup::new(
                    "peer",
                    EventKind::Message,
                    callback(move || {
                        let hits = Arc::clone(&hits);
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .priority(10),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", "anything")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(peer_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn temp_handler_fires_once() {
        let h = harness();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        h.registry
            .register(
                HandlerSetup::new(
                    "once",
                    EventKind::Message,
                    callback(move || {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .temp(true),
            )
            .unwrap();
        h.install();

        for i in 0..3 {
            h.dispatcher.dispatch(msg(5, &format!("m{i}"), "hi")).await;
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn checker_gates_events() {
        let h = harness();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        h.registry
            .register(
                HandlerSetup::new(
                    "gated",
                    EventKind::Message,
                    callback(move || {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .checker(Arc::new(SenderChecker {
                    block: HashSet::from([666]),
                    ..Default::default()
                })),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(666, "m1", "hi")).await;
        h.dispatcher.dispatch(msg(5, "m2", "hi")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parser_args_reach_the_callback() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        h.registry
            .register(
                HandlerSetup::new(
                    "echo-cmd",
                    EventKind::Message,
                    callback(move || {
                        let sink = Arc::clone(&sink);
                        async move {
                            let group = context::args()?.ok_or_else(|| anyhow::anyhow!("no args"))?;
                            let args = &group["echo"];
                            sink.lock().unwrap().extend(args.vals.clone());
                            Ok(())
                        }
                    }),
                )
                .parser(Arc::new(CmdParser::new(".", " "))),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", ".echo a b")).await;
        h.dispatcher.dispatch(msg(5, "m2", "plain text")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".into()]);
    }

    #[tokio::test]
    async fn conflict_without_wait_runs_the_conflict_callback() {
        let h = harness();
        h.registry
            .register(
                HandlerSetup::new(
                    "slow",
                    EventKind::Message,
                    callback(|| async {
                        context::send("working").await?;
                        sleep(Duration::from_millis(200)).await;
                        Ok(())
                    }),
                )
                .session_rule(Arc::new(SenderRule))
                .on_conflict(callback(|| async {
                    context::send("busy").await?;
                    Ok(())
                })),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", "go")).await;
        sleep(Duration::from_millis(50)).await;
        h.dispatcher.dispatch(msg(5, "m2", "go")).await;
        sleep(Duration::from_millis(50)).await;

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].params["message"], "working");
        assert_eq!(sent[1].params["message"], "busy");
        assert_eq!(sent[1].trigger.as_ref().unwrap().id(), "m2");
    }

    #[tokio::test]
    async fn overtime_callback_runs_on_timeout() {
        let h = harness();
        h.registry
            .register(
                HandlerSetup::new(
                    "slow",
                    EventKind::Message,
                    callback(|| async {
                        sleep(Duration::from_secs(30)).await;
                        Ok(())
                    }),
                )
                .timeout(Duration::from_millis(50))
                .on_overtime(callback(|| async {
                    context::send("took too long").await?;
                    Ok(())
                })),
            )
            .unwrap();
        h.install();

        h.dispatcher.dispatch(msg(5, "m1", "go")).await;
        sleep(Duration::from_millis(200)).await;
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params["message"], "took too long");
    }

    #[tokio::test]
    async fn event_built_hook_can_drop_events() {
        let h = harness();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        h.registry
            .register(HandlerSetup::new(
                "all",
                EventKind::Message,
                callback(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ))
            .unwrap();
        h.install();

        let hooks = HookBus::new();
        let dispatcher = Dispatcher::new(Arc::clone(&hooks));
        dispatcher.add_handlers(h.registry.grouped());
        hooks.on(BotLife::EventBuilt, "drop-777", |payload| async move {
            if let HookPayload::EventBuilt(event) = payload
                && event.sender_id() == Some(777)
            {
                return Ok(HookVerdict::Drop("filtered sender".into()));
            }
            Ok(HookVerdict::Continue)
        });

        dispatcher.dispatch(msg(777, "m1", "hi")).await;
        dispatcher.dispatch(msg(5, "m2", "hi")).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_validation() {
        let h = harness();
        // Session options without a rule.
        assert!(
            h.registry
                .register(
                    HandlerSetup::new("bad", EventKind::Message, callback(|| async { Ok(()) }))
                        .session_keep(true),
                )
                .is_err()
        );
        // Waiting and a conflict callback are mutually exclusive.
        assert!(
            h.registry
                .register(
                    HandlerSetup::new("bad", EventKind::Message, callback(|| async { Ok(()) }))
                        .session_rule(Arc::new(SenderRule))
                        .session_wait(true)
                        .on_conflict(callback(|| async { Ok(()) })),
                )
                .is_err()
        );
        // Matchers on non-message handlers.
        assert!(
            h.registry
                .register(
                    HandlerSetup::new("bad", EventKind::Notice, callback(|| async { Ok(()) }))
                        .matcher(Arc::new(FullMatcher("x".into()))),
                )
                .is_err()
        );
    }
}
