//! The outbound pipeline: a single action queue drained by one sender task
//! under the cooldown spacing, plus the echo correlation table.
//!
//! Actions enter through the [`ActionOutput`] seam the sessions crate
//! defines. An action that awaits an echo registers its oneshot slot in the
//! table *before* it is enqueued, so the echo can never race past it. The
//! echo table is only touched from `take_action_wait` and
//! [`Responder::dispatch_echo`], both of which hold the table mutex without
//! awaiting.

pub mod error;

pub use error::{Error, Result};

use {
    botway_common::Flag,
    botway_hooks::{HookBus, HookPayload, HookVerdict},
    botway_protocol::{Action, EchoEvent, FrameSink},
    botway_sessions::{ActionOutput, EchoReceiver},
    std::{
        collections::HashMap,
        sync::{
            Arc, Mutex, OnceLock,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    },
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

const QUEUE_DEPTH: usize = 1024;

/// Owns the outbound queue and the echo table.
pub struct Responder {
    queue_tx: mpsc::Sender<Action>,
    queue_rx: Mutex<Option<mpsc::Receiver<Action>>>,
    echo_table: Mutex<HashMap<String, oneshot::Sender<EchoEvent>>>,
    cooldown: Duration,
    /// While set, actions are dropped after the presend hook.
    silenced: AtomicBool,
    sink: OnceLock<Arc<dyn FrameSink>>,
    hooks: OnceLock<Arc<HookBus>>,
    ready: Flag,
}

impl Responder {
    /// `cooldown` is the minimum spacing between two sends.
    pub fn new(cooldown: Duration) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        Arc::new(Self {
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            echo_table: Mutex::new(HashMap::new()),
            cooldown,
            silenced: AtomicBool::new(false),
            sink: OnceLock::new(),
            hooks: OnceLock::new(),
            ready: Flag::new(false),
        })
    }

    /// Late-bind the transport and hook bus; unblocks queued callers.
    pub fn bind(&self, sink: Arc<dyn FrameSink>, hooks: Arc<HookBus>) {
        let _ = self.sink.set(sink);
        let _ = self.hooks.set(hooks);
        self.ready.set();
    }

    pub fn silence(&self, on: bool) {
        self.silenced.store(on, Ordering::SeqCst);
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }

    pub fn pending_echoes(&self) -> usize {
        self.echo_table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// The sender task. Drains the queue until `shutdown` fires or the
    /// transport closes; remaining actions are dropped on the way out.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.ready.wait().await;
        let Some(mut queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            warn!("responder sender task started twice");
            return;
        };
        let (Some(sink), Some(hooks)) = (self.sink.get().cloned(), self.hooks.get().cloned())
        else {
            return;
        };

        let mut last_send: Option<Instant> = None;
        loop {
            let action = tokio::select! {
                _ = shutdown.cancelled() => break,
                action = queue_rx.recv() => match action {
                    Some(action) => action,
                    None => break,
                },
            };

            let mut action = action;
            match hooks
                .emit_wait(HookPayload::ActionPresend(action.clone()))
                .await
            {
                HookVerdict::Continue => {},
                HookVerdict::Modify(params) => action.params = params,
                HookVerdict::Drop(reason) => {
                    debug!(action = %action.kind, reason = %reason, "action dropped by hook");
                    self.forget_echo(&action);
                    continue;
                },
            }
            if self.silenced.load(Ordering::SeqCst) {
                debug!(action = %action.kind, "bot silenced, action dropped");
                self.forget_echo(&action);
                continue;
            }

            if let Some(prev) = last_send {
                let elapsed = prev.elapsed();
                if elapsed < self.cooldown {
                    tokio::time::sleep(self.cooldown - elapsed).await;
                }
            }

            match sink.send_frame(action.flatten()).await {
                Ok(()) => {
                    last_send = Some(Instant::now());
                },
                Err(botway_protocol::Error::TransportClosed) => {
                    error!("transport closed, outbound pipeline stopping");
                    self.forget_echo(&action);
                    break;
                },
                Err(e) => {
                    error!(action = %action.kind, error = %e, "frame send failed");
                    self.forget_echo(&action);
                },
            }
        }

        let mut dropped = 0usize;
        while queue_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "pending actions dropped at shutdown");
        }
        debug!("responder sender task stopped");
    }

    /// Complete the pending future for an inbound echo.
    pub fn dispatch_echo(&self, echo: EchoEvent) {
        let slot = self
            .echo_table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&echo.echo_id);
        match slot {
            Some(tx) => {
                if let Err(echo) = tx.send(echo) {
                    warn!(
                        echo = %echo.echo_id,
                        "echo awaiter was cancelled before its echo arrived"
                    );
                }
            },
            None => warn!(echo = %echo.echo_id, "echo with no pending action"),
        }
    }

    /// Drop the echo slot of an action that will never be sent, so its
    /// awaiter fails fast instead of hanging.
    fn forget_echo(&self, action: &Action) {
        if let Some(id) = &action.resp_id {
            self.echo_table
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(id);
        }
    }
}

#[async_trait::async_trait]
impl ActionOutput for Responder {
    async fn take_action(&self, action: Action) -> anyhow::Result<()> {
        self.ready.wait().await;
        self.queue_tx
            .send(action)
            .await
            .map_err(|_| Error::QueueClosed)?;
        Ok(())
    }

    async fn take_action_wait(&self, action: Action) -> anyhow::Result<EchoReceiver> {
        self.ready.wait().await;
        let mut action = action;
        if action.resp_id.is_none() {
            action = action.with_echo();
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.echo_table.lock().unwrap_or_else(|e| e.into_inner());
            // resp_id checked non-empty above
            if let Some(id) = &action.resp_id {
                table.insert(id.clone(), tx);
            }
        }
        if let Err(send_err) = self.queue_tx.send(action).await {
            self.forget_echo(&send_err.0);
            return Err(Error::QueueClosed.into());
        }
        Ok(rx)
    }
}
