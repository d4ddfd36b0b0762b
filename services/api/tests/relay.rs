use anyhow::{Result, anyhow};
use async_trait::async_trait;
use empath_api::{
    config::{Config, DEFAULT_MAX_MESSAGE_BYTES},
    router::{cors_layer, create_router},
    state::AppState,
};
use empath_client::{ChannelEvent, ClientConfig, ConnectionState, RelayClient};
use empath_core::{
    dispatcher::Dispatcher,
    emotion::EmotionClassifier,
    llm_client::{CompletionClient, THERAPIST_SYSTEM_PROMPT},
    media::MediaPayload,
    message::{EmotionLabel, InboundMessage},
    protocol::ServerEvent,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{Mutex, broadcast},
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

const WAIT: Duration = Duration::from_secs(5);
const CLIENT_URL: &str = "http://localhost:3000";

/// Completion stub whose behaviour is chosen by the user turn.
#[derive(Default)]
struct ScriptedCompletion {
    turns: Mutex<Vec<(String, String)>>,
}

impl ScriptedCompletion {
    async fn turns(&self) -> Vec<String> {
        self.turns
            .lock()
            .await
            .iter()
            .map(|(_, turn)| turn.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, system_prompt: &str, user_turn: &str) -> Result<Option<String>> {
        self.turns
            .lock()
            .await
            .push((system_prompt.to_string(), user_turn.to_string()));
        match user_turn {
            "slow" => {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Ok(Some("reply: slow".to_string()))
            }
            "fail" => Err(anyhow!("completion exploded")),
            "empty" => Ok(None),
            "I feel anxious" => Ok(Some("You are not alone.".to_string())),
            other => Ok(Some(format!("reply: {}", other))),
        }
    }
}

struct FixedClassifier {
    emotion: &'static str,
    calls: AtomicUsize,
}

impl FixedClassifier {
    fn new(emotion: &'static str) -> Arc<Self> {
        Arc::new(Self {
            emotion,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmotionClassifier for FixedClassifier {
    async fn classify(&self, _media: MediaPayload) -> Result<EmotionLabel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmotionLabel {
            emotion: self.emotion.to_string(),
            confidence: Some(0.8),
        })
    }
}

struct Relay {
    addr: SocketAddr,
    completion: Arc<ScriptedCompletion>,
    voice: Arc<FixedClassifier>,
    face: Arc<FixedClassifier>,
}

impl Relay {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        client_url: CLIENT_URL.to_string(),
        openai_api_key: "test-key".to_string(),
        openai_api_base: "http://127.0.0.1:1/v1".to_string(),
        chat_model: "test-model".to_string(),
        ml_service_url: "http://127.0.0.1:1".to_string(),
        log_level: tracing::Level::INFO,
        max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
    }
}

async fn spawn_relay() -> Result<Relay> {
    let completion = Arc::new(ScriptedCompletion::default());
    let voice = FixedClassifier::new("sad");
    let face = FixedClassifier::new("happy");
    let dispatcher = Dispatcher::new(completion.clone(), voice.clone(), face.clone());

    let config = test_config();
    let state = Arc::new(AppState::new(dispatcher, config.clone()));
    let app = create_router(state).layer(cors_layer(&config.client_url)?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Ok(Relay {
        addr,
        completion,
        voice,
        face,
    })
}

async fn connected_client(relay: &Relay) -> Result<(RelayClient, broadcast::Receiver<ChannelEvent>)> {
    let client = RelayClient::new(ClientConfig::new(relay.ws_url()));
    let mut events = client.subscribe();
    client.connect()?;
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connect);
    assert_eq!(client.state(), ConnectionState::Connected);
    Ok((client, events))
}

async fn next_event(events: &mut broadcast::Receiver<ChannelEvent>) -> ChannelEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_server_event<S>(stream: &mut S) -> ServerEvent
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("unknown server event");
        }
    }
}

#[tokio::test]
async fn health_reports_ok_with_cors() -> Result<()> {
    let relay = spawn_relay().await?;

    let response = reqwest::Client::new()
        .get(format!("http://{}/health", relay.addr))
        .header("Origin", CLIENT_URL)
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some(CLIENT_URL)
    );
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn text_message_gets_completion_reply() -> Result<()> {
    let relay = spawn_relay().await?;
    let (client, mut events) = connected_client(&relay).await?;

    client.send_text("I feel anxious")?;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Response("You are not alone.".to_string())
    );

    let turns = relay.completion.turns.lock().await.clone();
    assert_eq!(
        turns,
        vec![(
            THERAPIST_SYSTEM_PROMPT.to_string(),
            "I feel anxious".to_string()
        )]
    );
    Ok(())
}

#[tokio::test]
async fn invalid_messages_error_without_provider_calls() -> Result<()> {
    let relay = spawn_relay().await?;
    let (ws, _) = connect_async(relay.ws_url()).await?;
    let (mut tx, mut rx) = ws.split();

    for (data, expected) in [
        (json!({"type": "text", "text": ""}), "Invalid text input"),
        (json!({"type": "bogus"}), "Invalid message type"),
        (json!({"type": "voice", "audio": ""}), "Invalid audio input"),
    ] {
        let frame = json!({"event": "message", "data": data}).to_string();
        tx.send(Message::Text(frame.into())).await?;
        assert_eq!(next_server_event(&mut rx).await, ServerEvent::error(expected));
    }

    assert!(relay.completion.turns().await.is_empty());
    assert_eq!(relay.voice.calls.load(Ordering::SeqCst), 0);
    assert_eq!(relay.face.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn voice_and_face_labels_reach_completion() -> Result<()> {
    let relay = spawn_relay().await?;
    let (client, mut events) = connected_client(&relay).await?;

    let clip = MediaPayload::new(b"RIFF....WAVE".to_vec(), Some("audio/wav".to_string()));
    client.send(&InboundMessage::Voice(clip))?;
    assert!(matches!(next_event(&mut events).await, ChannelEvent::Response(_)));

    let snapshot = MediaPayload::new(vec![0xffu8, 0xd8, 0xff], Some("image/jpeg".to_string()));
    client.send(&InboundMessage::Face(snapshot))?;
    assert!(matches!(next_event(&mut events).await, ChannelEvent::Response(_)));

    let turns = relay.completion.turns().await;
    assert_eq!(turns.len(), 2);
    assert!(turns[0].contains("feeling sad based on my voice tone"));
    assert!(turns[1].contains("feeling happy based on my facial expression"));
    assert_eq!(relay.voice.calls.load(Ordering::SeqCst), 1);
    assert_eq!(relay.face.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn provider_failure_is_reported_and_session_survives() -> Result<()> {
    let relay = spawn_relay().await?;
    let (client, mut events) = connected_client(&relay).await?;

    client.send_text("fail")?;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Error("completion exploded".to_string())
    );

    client.send_text("empty")?;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Error("No response generated from the language model".to_string())
    );

    client.send_text("still here")?;
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Response("reply: still here".to_string())
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn replies_follow_request_order_within_a_session() -> Result<()> {
    let relay = spawn_relay().await?;
    let (ws, _) = connect_async(relay.ws_url()).await?;
    let (mut tx, mut rx) = ws.split();

    for text in ["slow", "fast"] {
        let frame = json!({"event": "message", "data": {"type": "text", "text": text}}).to_string();
        tx.send(Message::Text(frame.into())).await?;
    }

    assert_eq!(next_server_event(&mut rx).await, ServerEvent::response("reply: slow"));
    assert_eq!(next_server_event(&mut rx).await, ServerEvent::response("reply: fast"));
    Ok(())
}

#[tokio::test]
async fn sessions_do_not_block_each_other() -> Result<()> {
    let relay = spawn_relay().await?;
    let (slow_client, mut slow_events) = connected_client(&relay).await?;
    let (fast_client, mut fast_events) = connected_client(&relay).await?;

    slow_client.send_text("slow")?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    fast_client.send_text("fast")?;

    assert_eq!(
        next_event(&mut fast_events).await,
        ChannelEvent::Response("reply: fast".to_string())
    );
    assert!(
        slow_events.try_recv().is_err(),
        "slow session answered before the fast one"
    );
    assert_eq!(
        next_event(&mut slow_events).await,
        ChannelEvent::Response("reply: slow".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn non_message_frames_get_no_reply() -> Result<()> {
    let relay = spawn_relay().await?;
    let (ws, _) = connect_async(relay.ws_url()).await?;
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text("not json".into())).await?;
    tx.send(Message::Text(r#"{"event":"typing","data":{}}"#.into()))
        .await?;
    tx.send(Message::Binary(vec![1u8, 2, 3].into())).await?;

    let frame = json!({"event": "message", "data": {"type": "text", "text": "hello"}}).to_string();
    tx.send(Message::Text(frame.into())).await?;

    // The first frame back answers the only real request.
    assert_eq!(next_server_event(&mut rx).await, ServerEvent::response("reply: hello"));
    assert_eq!(relay.completion.turns().await, vec!["hello".to_string()]);
    Ok(())
}
