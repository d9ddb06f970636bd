//! End-to-end tests using a real WebSocket client against a bound server.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mockpilot_bus::{Bus, BufferedPublisher, BusStatus, LocalBus, SharedBus};
use mockpilot_core::SessionId;
use mockpilot_server::auth::issue_token;
use mockpilot_server::hub::liveness::LivenessMonitor;
use mockpilot_server::websocket::bridge::HubBridge;
use mockpilot_server::{Hub, HubConfig, JwtVerifier, RelayServer};
use mockpilot_settings::MockpilotSettings;
use mockpilot_trigger::TriggerService;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestRelay {
    addr: std::net::SocketAddr,
    settings: MockpilotSettings,
    local: Arc<LocalBus>,
    server: RelayServer,
    cancel: CancellationToken,
}

impl TestRelay {
    fn hub(&self) -> &Arc<Hub> {
        self.server.hub()
    }

    fn token(&self, session: &str) -> String {
        issue_token(
            &self.settings.auth,
            &SessionId::from(session),
            Duration::from_secs(600),
        )
        .unwrap()
    }

    fn ws_url(&self, session: &str, token: &str) -> String {
        format!("ws://{}/v1/ws/{session}?token={token}", self.addr)
    }

    async fn connect(&self, session: &str) -> WsStream {
        let before = self.hub().connection_count();
        let url = self.ws_url(session, &self.token(session));
        let (ws, _) = timeout(TIMEOUT, connect_async(url.as_str()))
            .await
            .unwrap()
            .unwrap();
        wait_until(|| self.hub().connection_count() > before).await;
        ws
    }

    async fn publish(&self, channel: &str, payload: &Value) {
        self.local
            .publish(channel, Bytes::from(payload.to_string()))
            .await
            .unwrap();
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.server.shutdown().shutdown();
    }
}

/// Boot a relay on an ephemeral port with the bus bridge running.
async fn boot() -> TestRelay {
    let mut settings = MockpilotSettings::default();
    settings.auth.jwt_secret = "integration-secret".into();

    let local = Arc::new(LocalBus::new(256));
    let bus: SharedBus = local.clone();
    let publisher = Arc::new(BufferedPublisher::new(Arc::clone(&bus), 16));
    let hub = Arc::new(Hub::new(HubConfig::from_settings(&settings), publisher));
    let verifier = Arc::new(JwtVerifier::from_settings(&settings.auth).unwrap());
    let server = RelayServer::new(&settings, Arc::clone(&hub), Arc::clone(&bus), verifier, None);

    let cancel = CancellationToken::new();
    let liveness = Arc::new(LivenessMonitor::new(
        settings.hub.liveness_interval(),
        settings.hub.liveness_max_missed,
        &settings.hub.expected_producers,
    ));
    let bridge = Arc::new(HubBridge::new(
        Arc::clone(&hub),
        liveness,
        settings.bus.channels.clone(),
    ));
    let (status_tx, mut status_rx) = watch::channel(BusStatus::Connecting);
    let _bridge = bridge.spawn(
        Arc::clone(&bus),
        settings.bus.backoff,
        status_tx,
        cancel.clone(),
    );
    let _ = timeout(TIMEOUT, status_rx.wait_for(BusStatus::is_up))
        .await
        .unwrap()
        .unwrap();

    let (addr, _handle) = server.listen("127.0.0.1:0").await.unwrap();
    TestRelay {
        addr,
        settings,
        local,
        server,
        cancel,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(t) => return serde_json::from_str(t.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Next frame of `kind`, skipping others.
async fn next_of_kind(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["kind"] == kind {
            return frame;
        }
    }
}

/// Close code the server ends the socket with.
async fn close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap();
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => {
                panic!("socket ended without a close code")
            }
            Some(Ok(_)) => {}
        }
    }
}

fn transcript(session: &str, text: &str, gap_ms: u64) -> Value {
    json!({
        "schema_version": "1.0",
        "session_id": session,
        "utterance_id": "u1",
        "text": text,
        "silence_gap_ms": gap_ms,
    })
}

fn intent(session: &str) -> Value {
    json!({
        "schema_version": "1.0",
        "session_id": session,
        "utterance_id": "u1",
        "component": "button",
        "styles": ["hover"],
        "brand_refs": ["Stripe"],
        "confidence": 0.83,
    })
}

#[tokio::test]
async fn transcript_reaches_session_client() {
    let relay = boot().await;
    let mut ws = relay.connect("room-1").await;

    relay
        .publish("transcripts", &transcript("room-1", "a pricing table", 200))
        .await;

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["kind"], "transcript");
    assert_eq!(frame["seq"], 1);
    assert_eq!(frame["session_id"], "room-1");
    assert_eq!(frame["data"]["text"], "a pricing table");
}

#[tokio::test]
async fn sessions_are_isolated() {
    let relay = boot().await;
    let mut a = relay.connect("room-a").await;
    let mut b = relay.connect("room-b").await;

    relay
        .publish("transcripts", &transcript("room-a", "only for a", 0))
        .await;
    relay
        .publish("transcripts", &transcript("room-b", "only for b", 0))
        .await;

    let fa = next_json(&mut a).await;
    let fb = next_json(&mut b).await;
    assert_eq!(fa["data"]["text"], "only for a");
    assert_eq!(fb["data"]["text"], "only for b");
    assert_eq!(fa["seq"], 1);
    assert_eq!(fb["seq"], 1);
}

#[tokio::test]
async fn every_connection_of_a_session_receives_events() {
    let relay = boot().await;
    let mut first = relay.connect("room-1").await;
    let mut second = relay.connect("room-1").await;
    assert_eq!(relay.hub().session_count(), 1);

    relay
        .publish("transcripts", &transcript("room-1", "shared", 0))
        .await;
    assert_eq!(next_json(&mut first).await["data"]["text"], "shared");
    assert_eq!(next_json(&mut second).await["data"]["text"], "shared");
}

#[tokio::test]
async fn invalid_token_closes_with_4401() {
    let relay = boot().await;
    let url = relay.ws_url("room-1", "not-a-token");
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4401);
    assert_eq!(relay.hub().session_count(), 0);
}

#[tokio::test]
async fn missing_token_closes_with_4401() {
    let relay = boot().await;
    let url = format!("ws://{}/v1/ws/room-1", relay.addr);
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4401);
}

#[tokio::test]
async fn token_for_other_session_closes_with_4403() {
    let relay = boot().await;
    let url = relay.ws_url("room-2", &relay.token("room-1"));
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4403);
}

#[tokio::test]
async fn malformed_session_id_closes_with_4400() {
    let relay = boot().await;
    let url = relay.ws_url("bad%20id", &relay.token("bad id"));
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(&mut ws).await, 4400);
}

#[tokio::test]
async fn audio_chunk_forwarded_to_bus() {
    let relay = boot().await;
    let mut audio = relay
        .local
        .subscribe(&["audio_chunks".to_string()])
        .await
        .unwrap();
    let mut ws = relay.connect("room-1").await;

    let chunk = json!({"kind": "audio_chunk", "seq": 7, "pcm": "AAEC"});
    ws.send(Message::Text(chunk.to_string().into())).await.unwrap();

    let msg = timeout(TIMEOUT, audio.next()).await.unwrap().unwrap().unwrap();
    let envelope: Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(envelope["kind"], "audio_chunk");
    assert_eq!(envelope["session_id"], "room-1");
    assert_eq!(envelope["frame"]["pcm"], "AAEC");
    assert!(envelope["connection_id"].is_string());
}

#[tokio::test]
async fn unknown_inbound_kind_answered_with_error_frame() {
    let relay = boot().await;
    let mut ws = relay.connect("room-1").await;

    ws.send(Message::Text(json!({"kind": "mystery"}).to_string().into()))
        .await
        .unwrap();
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["kind"], "error");
    assert_eq!(frame["data"]["error_code"], "unknown_kind");

    ws.send(Message::Text("{broken".into())).await.unwrap();
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["data"]["error_code"], "invalid_frame");

    // the connection stays usable
    relay
        .publish("transcripts", &transcript("room-1", "still here", 0))
        .await;
    assert_eq!(next_json(&mut ws).await["data"]["text"], "still here");
}

#[tokio::test]
async fn ingress_post_reaches_clients() {
    let relay = boot().await;
    let mut ws = relay.connect("room-1").await;

    let stream = tokio::net::TcpStream::connect(relay.addr).await.unwrap();
    let body = intent("room-1").to_string();
    let request = format!(
        "POST /v1/bus/intents HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        relay.addr,
        body.len()
    );
    let (mut reader, mut writer) = stream.into_split();
    tokio::io::AsyncWriteExt::write_all(&mut writer, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    let _ = timeout(
        TIMEOUT,
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut response),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(response.starts_with("HTTP/1.1 202"), "got {response}");

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["kind"], "intent");
    assert_eq!(frame["data"]["component"], "button");
}

#[tokio::test]
async fn drain_closes_clients_with_restart_code() {
    let relay = boot().await;
    let mut ws = relay.connect("room-1").await;

    let drained = relay
        .server
        .shutdown()
        .drain(relay.hub(), Duration::from_secs(2))
        .await;
    assert_eq!(close_code(&mut ws).await, 1012);
    assert!(drained);

    let url = relay.ws_url("room-1", &relay.token("room-1"));
    let (mut late, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(&mut late).await, 1012);
}

#[tokio::test]
async fn teardown_closes_session_connections() {
    let relay = boot().await;
    let mut ws = relay.connect("room-1").await;
    assert!(relay.hub().teardown(&SessionId::from("room-1")));
    assert_eq!(close_code(&mut ws).await, 1000);
}

#[tokio::test]
async fn trigger_request_delivered_end_to_end() {
    let relay = boot().await;
    let bus: SharedBus = relay.local.clone();
    let bus_settings = Arc::new(relay.settings.bus.clone());
    let publisher = Arc::new(BufferedPublisher::new(Arc::clone(&bus), 16));
    let trigger = Arc::new(TriggerService::spawn(
        &relay.settings.trigger,
        publisher,
        &bus_settings.channels,
        &relay.cancel,
    ));
    let (status_tx, mut status_rx) = watch::channel(BusStatus::Connecting);
    let _consumer = trigger.spawn_consumer(bus, bus_settings, status_tx, relay.cancel.clone());
    let _ = timeout(TIMEOUT, status_rx.wait_for(BusStatus::is_up))
        .await
        .unwrap()
        .unwrap();

    let mut ws = relay.connect("room-1").await;
    relay
        .publish(
            "transcripts",
            &transcript("room-1", "let's use a hover animation like Stripe", 2_000),
        )
        .await;
    relay.publish("intents", &intent("room-1")).await;

    let request = next_of_kind(&mut ws, "request").await;
    assert_eq!(request["session_id"], "room-1");
    assert_eq!(request["data"]["component"], "button");
    assert_eq!(request["data"]["source_event_ids"].as_array().unwrap().len(), 2);
}
