//! The connector: one duplex WebSocket transport to the upstream system.
//!
//! Owns connect/reconnect, the read loop (frames → events → the right
//! consumer), and the write loop (queued [`OutPacket`]s → frames). Echo
//! frames go straight to the responder; meta events go to the priority
//! queue; everything else goes to the main event queue.

pub mod error;

pub use error::{Error, Result};

use {
    botway_hooks::{HookBus, HookPayload},
    botway_protocol::{Event, EventBuilder, FrameSink, OutPacket},
    botway_responder::Responder,
    futures::{SinkExt, StreamExt},
    std::{sync::Arc, time::Duration},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc},
        time::{sleep, timeout},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

const WRITE_DEPTH: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Full ws url, e.g. `ws://localhost:8080`.
    pub url: String,
    /// Reconnect attempts before giving up; `-1` retries forever.
    pub max_conn_try: i64,
    pub conn_try_interval: Duration,
    /// Bound on placing one outbound frame into the write queue.
    pub kernel_timeout: Duration,
}

impl ConnectorConfig {
    pub fn for_host(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            max_conn_try: -1,
            conn_try_interval: Duration::from_secs(2),
            kernel_timeout: Duration::from_secs(5),
        }
    }
}

/// The transport task plus the routing of inbound frames.
pub struct Connector {
    config: ConnectorConfig,
    hooks: Arc<HookBus>,
    responder: Arc<Responder>,
    event_tx: mpsc::Sender<Arc<Event>>,
    prior_tx: mpsc::Sender<Arc<Event>>,
    write_tx: mpsc::Sender<OutPacket>,
    write_rx: Mutex<Option<mpsc::Receiver<OutPacket>>>,
}

impl Connector {
    pub fn new(
        config: ConnectorConfig,
        hooks: Arc<HookBus>,
        responder: Arc<Responder>,
        event_tx: mpsc::Sender<Arc<Event>>,
        prior_tx: mpsc::Sender<Arc<Event>>,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::channel(WRITE_DEPTH);
        Arc::new(Self {
            config,
            hooks,
            responder,
            event_tx,
            prior_tx,
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
        })
    }

    /// The write half other components send frames through.
    pub fn handle(&self) -> ConnectorHandle {
        ConnectorHandle {
            write_tx: self.write_tx.clone(),
            kernel_timeout: self.config.kernel_timeout,
        }
    }

    /// Connect-and-listen loop with reconnect. Returns `Ok` on shutdown and
    /// `Err` when the retry budget is exhausted.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let Some(mut write_rx) = self.write_rx.lock().await.take() else {
            warn!("connector task started twice");
            return Ok(());
        };

        let mut attempts: i64 = 0;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            match connect_async(&self.config.url).await {
                Ok((ws, _response)) => {
                    attempts = 0;
                    info!(url = %self.config.url, "connected to the upstream connector");
                    self.hooks.emit(HookPayload::Connected);
                    match self.drive(ws, &mut write_rx, &shutdown).await {
                        Ok(()) => {
                            if shutdown.is_cancelled() {
                                return Ok(());
                            }
                            warn!("connection closed by peer, reconnecting");
                        },
                        Err(e) => {
                            error!(error = %e, "connection failed, reconnecting");
                        },
                    }
                },
                Err(e) => {
                    attempts += 1;
                    if self.config.max_conn_try >= 0 && attempts > self.config.max_conn_try {
                        return Err(Error::ConnectFailed { attempts });
                    }
                    warn!(
                        error = %e,
                        attempt = attempts,
                        delay_s = self.config.conn_try_interval.as_secs_f64(),
                        "connect failed, retrying"
                    );
                },
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(self.config.conn_try_interval) => {}
            }
        }
    }

    /// One live connection: forward frames both ways until close.
    async fn drive(
        &self,
        ws: WsStream,
        write_rx: &mut mpsc::Receiver<OutPacket>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let (mut sink, mut reader) = ws.split();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Err(Error::WebSocket(e)),
                },
                packet = write_rx.recv() => match packet {
                    Some(packet) => {
                        let text = packet
                            .to_wire()
                            .map_err(|e| Error::Message(format!("unserializable packet: {e}")))?;
                        sink.send(Message::Text(text.into())).await?;
                    },
                    None => return Ok(()),
                },
            }
        }
    }

    /// Build and route one inbound frame. Protocol errors are logged with
    /// the raw frame; the loop continues.
    async fn handle_frame(&self, frame: &str) {
        if frame.is_empty() {
            return;
        }
        let event = match EventBuilder::build(frame) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                warn!(error = %e, frame, "unparseable frame");
                return;
            },
        };
        match event.as_ref() {
            Event::Echo(echo) => self.responder.dispatch_echo(echo.clone()),
            Event::Meta(_) => {
                if self.prior_tx.send(event).await.is_err() {
                    debug!("priority event queue closed");
                }
            },
            _ => {
                if self.event_tx.send(event).await.is_err() {
                    debug!("event queue closed");
                }
            },
        }
    }
}

/// Clonable write half implementing [`FrameSink`].
///
/// Placement is bounded by `kernel_timeout` and retried once on the timeout;
/// task cancellation simply drops the future and is never masked by a retry.
#[derive(Clone)]
pub struct ConnectorHandle {
    write_tx: mpsc::Sender<OutPacket>,
    kernel_timeout: Duration,
}

#[async_trait::async_trait]
impl FrameSink for ConnectorHandle {
    async fn send_frame(&self, packet: OutPacket) -> botway_protocol::Result<()> {
        match timeout(self.kernel_timeout, self.write_tx.send(packet.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(botway_protocol::Error::TransportClosed),
            Err(_) => {
                warn!("frame placement timed out, retrying once");
                match timeout(self.kernel_timeout, self.write_tx.send(packet)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(botway_protocol::Error::TransportClosed),
                    Err(_) => Err(botway_protocol::Error::Message(
                        "frame placement timed out twice".into(),
                    )),
                }
            },
        }
    }
}
