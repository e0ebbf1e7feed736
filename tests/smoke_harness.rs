use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chat_relay::transport::TransportError;
use chat_relay::{
    ChatConfig, ChatError, ChatSession, Delivery, MessageHistory, SessionState,
    SocketIoTransport, User,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

const OPEN_PACKET: &str = r#"0{"sid":"mock-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const QUIET_OPEN_PACKET: &str =
    r#"0{"sid":"quiet-sid","upgrades":[],"pingInterval":100,"pingTimeout":100,"maxPayload":1000000}"#;
const CONNECT_ACK: &str = r#"40{"sid":"mock-socket"}"#;
const CONNECT_ERROR: &str = r#"44{"message":"Not authorized"}"#;
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Observed {
    events: Vec<(String, Value)>,
    saw_pong: bool,
    saw_close: bool,
}

/// How the mock server behaves after the websocket upgrade.
#[derive(Clone, Copy, Debug)]
enum MockMode {
    /// Full chat exchange, including a few unreadable frames.
    Chat,
    /// Refuses the namespace connect.
    Reject,
    /// Acknowledges the connect and then never sends another frame.
    Silent,
}

type ObservedTx = Arc<Mutex<Option<oneshot::Sender<Result<Observed, String>>>>>;

#[derive(Clone)]
struct MockState {
    mode: MockMode,
    observed_tx: ObservedTx,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_round_trip_against_mock_socketio_server() {
    run_round_trip().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_frame_arrives_across_repeated_sessions() {
    for _ in 0..20 {
        run_round_trip().await;
    }
}

async fn run_round_trip() {
    let (observed_rx, addr, shutdown_tx, server_task) = start_mock(MockMode::Chat).await;

    let history = MessageHistory::new();
    let session = ChatSession::new(
        SocketIoTransport::new(ChatConfig::new().with_endpoint(format!("ws://{addr}"))),
        User::new("alice").expect("valid user"),
        history.clone(),
    );

    timeout(STEP_TIMEOUT, session.connect())
        .await
        .expect("timed out connecting")
        .expect("connect to mock socket.io server");
    assert_eq!(session.state(), SessionState::Connected);

    wait_for(|| history.len() == 1).await;

    assert_eq!(session.send_message("hello bob").await, Delivery::Sent);
    assert_eq!(
        session.send_private_message("bob", "just you").await,
        Delivery::Sent
    );
    timeout(STEP_TIMEOUT, session.disconnect())
        .await
        .expect("timed out disconnecting");
    assert_eq!(session.state(), SessionState::Disconnected);

    let observed = timeout(STEP_TIMEOUT, observed_rx)
        .await
        .expect("timed out waiting for mock server observations")
        .expect("observation channel closed")
        .expect("mock protocol assertions failed");

    assert!(observed.saw_pong, "client must answer engine pings");
    assert!(observed.saw_close, "client must finish the close handshake");
    let names: Vec<&str> = observed
        .events
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "join",
            "chat_join",
            "message",
            "chat_message",
            "private_message",
            "leave",
            "chat_leave"
        ]
    );
    assert_eq!(observed.events[0].1, json!({"username": "alice"}));
    assert_eq!(observed.events[1].1, json!({"username": "alice"}));
    assert_eq!(
        observed.events[3].1,
        json!({"username": "alice", "message": "hello bob"})
    );
    assert_eq!(
        observed.events[4].1,
        json!({"from": "alice", "to": "bob", "message": "just you"})
    );

    // The unreadable frames sent ahead of bob's line did not end the session.
    let history = history.snapshot();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].sender(), "bob");
    assert_eq!(history[0].text(), "hi alice");
    assert_eq!(history[1].sender(), "alice");
    assert_eq!(history[1].text(), "hello bob");
    assert_eq!(history[2].recipient(), Some("bob"));

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_namespace_connect_surfaces_as_error() {
    let (observed_rx, addr, shutdown_tx, server_task) = start_mock(MockMode::Reject).await;

    let history = MessageHistory::new();
    let session = ChatSession::new(
        SocketIoTransport::new(ChatConfig::new().with_endpoint(format!("ws://{addr}"))),
        User::new("alice").expect("valid user"),
        history.clone(),
    );

    let result = timeout(STEP_TIMEOUT, session.connect())
        .await
        .expect("timed out connecting");
    match result {
        Err(ChatError::Connect(TransportError::Rejected(reason))) => {
            assert_eq!(reason, "Not authorized");
        }
        other => panic!("expected rejected connect, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(history.is_empty());

    let observed = timeout(STEP_TIMEOUT, observed_rx)
        .await
        .expect("timed out waiting for mock server observations")
        .expect("observation channel closed")
        .expect("mock protocol assertions failed");
    assert!(observed.events.is_empty());

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_server_is_reported_as_disconnected() {
    let (observed_rx, addr, shutdown_tx, server_task) = start_mock(MockMode::Silent).await;

    let session = ChatSession::new(
        SocketIoTransport::new(ChatConfig::new().with_endpoint(format!("ws://{addr}"))),
        User::new("alice").expect("valid user"),
        MessageHistory::new(),
    );

    timeout(STEP_TIMEOUT, session.connect())
        .await
        .expect("timed out connecting")
        .expect("connect to mock socket.io server");
    wait_for(|| session.state() == SessionState::Disconnected).await;

    let observed = timeout(STEP_TIMEOUT, observed_rx)
        .await
        .expect("timed out waiting for mock server observations")
        .expect("observation channel closed")
        .expect("mock protocol assertions failed");
    let names: Vec<&str> = observed
        .events
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(names, vec!["join", "chat_join"]);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock server task should join");
}

#[tokio::test]
async fn unreachable_server_surfaces_as_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind scratch listener");
    let addr = listener.local_addr().expect("scratch listener address");
    drop(listener);

    let session = ChatSession::new(
        SocketIoTransport::new(ChatConfig::new().with_endpoint(format!("ws://{addr}"))),
        User::new("alice").expect("valid user"),
        MessageHistory::new(),
    );

    let result = timeout(STEP_TIMEOUT, session.connect())
        .await
        .expect("timed out connecting");
    assert!(matches!(result, Err(ChatError::Connect(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
}

async fn ws_handler(State(state): State<MockState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let result = run_mock_protocol(socket, state.mode).await;
        if let Some(tx) = state.observed_tx.lock().await.take() {
            let _ = tx.send(result);
        }
    })
}

async fn run_mock_protocol(mut socket: WebSocket, mode: MockMode) -> Result<Observed, String> {
    let mut observed = Observed::default();

    let open = match mode {
        MockMode::Silent => QUIET_OPEN_PACKET,
        MockMode::Chat | MockMode::Reject => OPEN_PACKET,
    };
    send_text(&mut socket, open).await?;
    let connect = recv_text(&mut socket).await?;
    if connect != "40" {
        return Err(format!("expected namespace connect, got {connect}"));
    }
    match mode {
        MockMode::Reject => {
            send_text(&mut socket, CONNECT_ERROR).await?;
            return Ok(observed);
        }
        MockMode::Silent => {
            send_text(&mut socket, CONNECT_ACK).await?;
            record_until_gone(&mut socket, &mut observed).await;
            return Ok(observed);
        }
        MockMode::Chat => {}
    }
    send_text(&mut socket, CONNECT_ACK).await?;
    send_text(&mut socket, "2").await?;

    let mut pushed = false;
    loop {
        let frame = recv_text(&mut socket).await?;
        match frame.as_str() {
            "3" => {
                observed.saw_pong = true;
                continue;
            }
            "41" => {
                wait_for_close(&mut socket).await?;
                observed.saw_close = true;
                break;
            }
            _ => {}
        }

        let body = frame
            .strip_prefix("42")
            .ok_or_else(|| format!("unexpected client frame {frame}"))?;
        let items: Vec<Value> =
            serde_json::from_str(body).map_err(|err| format!("bad event json {body}: {err}"))?;
        let name = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| format!("event without a name: {body}"))?
            .to_string();
        let payload = items.get(1).cloned().unwrap_or(Value::Null);
        observed.events.push((name.clone(), payload));

        if name == "chat_join" && !pushed {
            pushed = true;
            for garbage in ["42not-json", "9oops", r#"42["message""#, "4"] {
                send_text(&mut socket, garbage).await?;
            }
            send_text(
                &mut socket,
                r#"42["message",{"username":"bob","message":"hi alice","time":"10:00"}]"#,
            )
            .await?;
            send_text(&mut socket, r#"42["user_joined","carol"]"#).await?;
            send_text(&mut socket, r#"42["typing",{"username":"bob"}]"#).await?;
        }
    }

    Ok(observed)
}

async fn recv_text(socket: &mut WebSocket) -> Result<String, String> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err("websocket closed before expected client frame".to_string());
            }
            Some(Ok(_)) => return Err("received unexpected non-text websocket frame".to_string()),
            Some(Err(err)) => return Err(format!("websocket receive error: {err}")),
            None => return Err("websocket stream ended unexpectedly".to_string()),
        }
    }
}

/// Reads until the client's websocket Close frame, then lets the reply flush.
async fn wait_for_close(socket: &mut WebSocket) -> Result<(), String> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Text(text))) => {
                return Err(format!("unexpected frame after disconnect: {text}"));
            }
            Some(Ok(_)) => return Err("unexpected binary frame after disconnect".to_string()),
            Some(Err(err)) => return Err(format!("websocket receive error before close: {err}")),
            None => return Err("websocket ended without a close frame".to_string()),
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
    Ok(())
}

/// Records client events until the client goes away, answering nothing.
async fn record_until_gone(socket: &mut WebSocket, observed: &mut Observed) {
    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Some(body) = text.as_str().strip_prefix("42") else {
            continue;
        };
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(body) {
            if let Some(name) = items.first().and_then(Value::as_str) {
                let payload = items.get(1).cloned().unwrap_or(Value::Null);
                observed.events.push((name.to_string(), payload));
            }
        }
    }
}

async fn send_text(socket: &mut WebSocket, text: &str) -> Result<(), String> {
    socket
        .send(Message::Text(text.to_string().into()))
        .await
        .map_err(|err| format!("failed to send server frame: {err}"))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn start_mock(
    mode: MockMode,
) -> (
    oneshot::Receiver<Result<Observed, String>>,
    SocketAddr,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let (observed_tx, observed_rx) = oneshot::channel();
    let state = MockState {
        mode,
        observed_tx: Arc::new(Mutex::new(Some(observed_tx))),
    };
    let app = Router::new()
        .route("/sys25d/", get(ws_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;
    (observed_rx, addr, shutdown_tx, server_task)
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
