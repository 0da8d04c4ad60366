#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the connector over a loopback WebSocket server.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    botway_connector::{Connector, ConnectorConfig},
    botway_hooks::{BotLife, HookBus, HookVerdict},
    botway_protocol::{Action, Event, FrameSink},
    botway_responder::Responder,
    botway_sessions::ActionOutput,
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
        time::timeout,
    },
    tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
};

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    responder: Arc<Responder>,
    event_rx: mpsc::Receiver<Arc<Event>>,
    prior_rx: mpsc::Receiver<Arc<Event>>,
    shutdown: CancellationToken,
    connected: Arc<AtomicUsize>,
}

/// Wire a connector at `addr` with a real responder and hook bus.
fn start_connector(addr: SocketAddr, max_conn_try: i64) -> Rig {
    let hooks = HookBus::new();
    let connected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connected);
    hooks.on(BotLife::Connected, "count-connects", move |_p| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HookVerdict::Continue)
        }
    });

    let responder = Responder::new(Duration::ZERO);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (prior_tx, prior_rx) = mpsc::channel(64);
    let config = ConnectorConfig {
        url: format!("ws://{addr}"),
        max_conn_try,
        conn_try_interval: Duration::from_millis(100),
        kernel_timeout: Duration::from_secs(1),
    };
    let connector = Connector::new(
        config,
        Arc::clone(&hooks),
        Arc::clone(&responder),
        event_tx,
        prior_tx,
    );
    responder.bind(Arc::new(connector.handle()) as Arc<dyn FrameSink>, hooks);

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::clone(&responder).run(shutdown.clone()));
    tokio::spawn(connector.run(shutdown.clone()));

    Rig {
        responder,
        event_rx,
        prior_rx,
        shutdown,
        connected,
    }
}

async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    timeout(WAIT, accept_async(stream)).await.unwrap().unwrap()
}

#[tokio::test]
async fn frames_route_to_the_right_consumer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut rig = start_connector(addr, -1);
    let mut server = accept_one(&listener).await;

    // A chat message lands on the main event queue.
    let frame = json!({
        "post_type": "message", "message_type": "private",
        "message_id": 1, "user_id": 5, "raw_message": "hello",
    });
    server
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
    let event = timeout(WAIT, rig.event_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.text(), Some("hello"));

    // A meta event lands on the priority queue.
    let frame = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
    server
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
    let event = timeout(WAIT, rig.prior_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event.as_ref(), Event::Meta(_)));

    rig.shutdown.cancel();
}

#[tokio::test]
async fn actions_reach_the_wire_and_echoes_come_back() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rig = start_connector(addr, -1);
    let mut server = accept_one(&listener).await;

    let action = Action::new("send_msg", json!({"message": "hi"})).with_echo();
    let echo_id = action.resp_id.clone().unwrap();
    let echo_rx = rig.responder.take_action_wait(action).await.unwrap();

    // The server sees the flattened frame …
    let frame = loop {
        match timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    let wire: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
    assert_eq!(wire["action"], "send_msg");
    assert_eq!(wire["echo"], echo_id.as_str());

    // … and answers with the echo, which resolves the awaiter.
    let reply = json!({
        "status": "ok", "retcode": 0,
        "data": {"message_id": 42},
        "echo": echo_id,
    });
    server
        .send(Message::Text(reply.to_string().into()))
        .await
        .unwrap();

    let echo = timeout(WAIT, echo_rx).await.unwrap().unwrap();
    assert_eq!(echo.echo_id, echo_id);
    assert_eq!(echo.data["message_id"], 42);
    assert_eq!(rig.responder.pending_echoes(), 0);

    rig.shutdown.cancel();
}

#[tokio::test]
async fn reconnects_after_the_peer_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut rig = start_connector(addr, -1);

    let mut server = accept_one(&listener).await;
    server.close(None).await.unwrap();
    drop(server);

    // The connector retries and lands on the same listener again.
    let mut server = accept_one(&listener).await;
    timeout(WAIT, async {
        while rig.connected.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let frame = json!({
        "post_type": "message", "message_type": "private",
        "message_id": 2, "user_id": 5, "raw_message": "still here",
    });
    server
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
    let event = timeout(WAIT, rig.event_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.text(), Some("still here"));

    rig.shutdown.cancel();
}

#[tokio::test]
async fn junk_frames_are_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut rig = start_connector(addr, -1);
    let mut server = accept_one(&listener).await;

    server.send(Message::Text("".into())).await.unwrap();
    server.send(Message::Text("not json".into())).await.unwrap();
    server
        .send(Message::Text(json!({"post_type": "banana"}).to_string().into()))
        .await
        .unwrap();
    let frame = json!({
        "post_type": "message", "message_type": "private",
        "message_id": 3, "user_id": 5, "raw_message": "good",
    });
    server
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = timeout(WAIT, rig.event_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.text(), Some("good"));

    rig.shutdown.cancel();
}

#[tokio::test]
async fn gives_up_when_the_retry_budget_runs_out() {
    // Grab an address nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let hooks = HookBus::new();
    let responder = Responder::new(Duration::ZERO);
    let (event_tx, _event_rx) = mpsc::channel(4);
    let (prior_tx, _prior_rx) = mpsc::channel(4);
    let connector = Connector::new(
        ConnectorConfig {
            url: format!("ws://{addr}"),
            max_conn_try: 1,
            conn_try_interval: Duration::from_millis(50),
            kernel_timeout: Duration::from_secs(1),
        },
        hooks,
        responder,
        event_tx,
        prior_tx,
    );

    let result = timeout(WAIT, connector.run(CancellationToken::new()))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(botway_connector::Error::ConnectFailed { attempts: 2 })
    ));
}
