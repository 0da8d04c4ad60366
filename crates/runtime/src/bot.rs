//! The bot: construction, registration, lifecycle.

use {
    botway_common::meta::{self, EXIT_CLOSE, EXIT_ERROR, EXIT_RESTART},
    botway_config::BotConfig,
    botway_connector::{Connector, ConnectorConfig},
    botway_dispatch::{Dispatcher, HandlerRegistry, HandlerSetup},
    botway_hooks::{BotLife, HookBus, HookPayload, HookVerdict},
    botway_protocol::{Event, FrameSink},
    botway_responder::Responder,
    botway_sessions::{ActionOutput, SessionManager},
    std::{
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::Duration,
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

const EVENT_QUEUE_DEPTH: usize = 1024;
const PRIOR_QUEUE_DEPTH: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The assembled engine. Register handlers and hooks, then [`Bot::run`].
pub struct Bot {
    config: BotConfig,
    manager: Arc<SessionManager>,
    hooks: Arc<HookBus>,
    responder: Arc<Responder>,
    registry: HandlerRegistry,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    exit_code: Arc<AtomicU8>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        let responder = Responder::new(config.cooldown());
        let manager = SessionManager::new(Arc::clone(&responder) as Arc<dyn ActionOutput>);
        let hooks = HookBus::new();
        hooks.bind(Arc::clone(&manager));
        let dispatcher = Dispatcher::new(Arc::clone(&hooks));
        let registry = HandlerRegistry::new(Arc::clone(&manager));

        Self {
            config,
            manager,
            hooks,
            responder,
            registry,
            dispatcher,
            shutdown: CancellationToken::new(),
            exit_code: Arc::new(AtomicU8::new(EXIT_CLOSE)),
        }
    }

    /// Register one handler.
    pub fn register(&self, setup: HandlerSetup) -> botway_dispatch::Result<()> {
        self.registry.register(setup)?;
        Ok(())
    }

    /// Subscribe a lifecycle hook runner.
    pub fn on<F, Fut>(&self, life: BotLife, name: impl Into<String>, runner: F)
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookVerdict>> + Send + 'static,
    {
        self.hooks.on(life, name, runner);
    }

    /// A clonable control handle usable from inside callbacks.
    pub fn handle(&self) -> BotHandle {
        BotHandle {
            shutdown: self.shutdown.clone(),
            exit_code: Arc::clone(&self.exit_code),
            responder: Arc::clone(&self.responder),
        }
    }

    /// Run until closed. Returns the process exit code to report.
    pub async fn run(&self) -> u8 {
        if self.registry.is_empty() {
            warn!("no handlers registered, the bot will not react to anything");
        }
        self.dispatcher.add_handlers(self.registry.grouped());
        self.hooks.emit_wait(HookPayload::Loaded).await;

        let (event_tx, event_rx) = mpsc::channel::<Arc<Event>>(EVENT_QUEUE_DEPTH);
        let (prior_tx, prior_rx) = mpsc::channel::<Arc<Event>>(PRIOR_QUEUE_DEPTH);

        // The worker pool: N cooperative consumers on the main queue and a
        // quarter of that on the priority queue.
        let mut tasks = Vec::new();
        let worker_count = self.config.event_handler_num.max(1);
        let event_rx = Arc::new(tokio::sync::Mutex::new(event_rx));
        for n in 0..worker_count {
            tasks.push(tokio::spawn(worker_loop(
                format!("h{}", n + 1),
                Arc::clone(&self.dispatcher),
                Arc::clone(&event_rx),
                self.shutdown.clone(),
            )));
        }
        let prior_rx = Arc::new(tokio::sync::Mutex::new(prior_rx));
        for n in 0..(worker_count / 4).max(1) {
            tasks.push(tokio::spawn(worker_loop(
                format!("ph{}", n + 1),
                Arc::clone(&self.dispatcher),
                Arc::clone(&prior_rx),
                self.shutdown.clone(),
            )));
        }

        let connector = Connector::new(
            ConnectorConfig {
                url: self.config.url(),
                max_conn_try: self.config.max_conn_try,
                conn_try_interval: self.config.conn_try_interval(),
                kernel_timeout: self.config.kernel_timeout(),
            },
            Arc::clone(&self.hooks),
            Arc::clone(&self.responder),
            event_tx,
            prior_tx,
        );
        self.responder.bind(
            Arc::new(connector.handle()) as Arc<dyn FrameSink>,
            Arc::clone(&self.hooks),
        );
        tasks.push(tokio::spawn(
            Arc::clone(&self.responder).run(self.shutdown.clone()),
        ));
        let mut connector_task = tokio::spawn(connector.run(self.shutdown.clone()));

        let mut connector_done = false;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
            }
            _ = self.shutdown.cancelled() => {}
            result = &mut connector_task => {
                connector_done = true;
                match result {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        error!(error = %e, "connector gave up");
                        self.exit_code.store(EXIT_ERROR, Ordering::SeqCst);
                    },
                    Err(e) => {
                        error!(error = %e, "connector task failed");
                        self.exit_code.store(EXIT_ERROR, Ordering::SeqCst);
                    },
                }
            }
        }

        // Shutdown sequence: announce, cancel, wake every suspended session
        // so callbacks can unwind, then let the transport close.
        self.hooks.emit_wait(HookPayload::BeforeStop).await;
        self.shutdown.cancel();
        self.manager.rouse_all();
        self.hooks.emit_wait(HookPayload::BeforeClose).await;

        if !connector_done {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, connector_task).await;
        }
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks)).await;

        info!("bot stopped");
        self.exit_code.load(Ordering::SeqCst)
    }
}

/// One cooperative queue consumer.
async fn worker_loop(
    name: String,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = async { queue.lock().await.recv().await } => match event {
                Some(event) => event,
                None => break,
            },
        };
        dispatcher.dispatch(event).await;
    }
    debug!(worker = %name, "event worker stopped");
}

/// Control surface for running callbacks and embedders.
#[derive(Clone)]
pub struct BotHandle {
    shutdown: CancellationToken,
    exit_code: Arc<AtomicU8>,
    responder: Arc<Responder>,
}

impl BotHandle {
    /// Stop the bot; the process reports [`EXIT_CLOSE`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`BotHandle::restart`] is permitted, i.e. the process runs
    /// under the module-mode supervisor.
    pub fn can_restart(&self) -> bool {
        meta::module_mode()
    }

    /// Stop the bot with the restart exit code so the supervisor re-runs it.
    pub fn restart(&self) -> anyhow::Result<()> {
        if !self.can_restart() {
            anyhow::bail!(
                "restart needs the module-mode supervisor ({}={})",
                meta::MODULE_MODE_ENV,
                meta::MODULE_MODE_SET
            );
        }
        self.exit_code.store(EXIT_RESTART, Ordering::SeqCst);
        self.shutdown.cancel();
        Ok(())
    }

    /// While silenced the bot emits presend hooks but sends nothing.
    pub fn silence(&self, on: bool) {
        self.responder.silence(on);
    }

    pub fn is_silenced(&self) -> bool {
        self.responder.is_silenced()
    }
}
