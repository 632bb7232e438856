//! End-to-end session flows against a fake streaming session: fragments
//! in, exactly one transcript entry out, whatever the end-signal
//! interleaving, plus the lifecycle operations around them.

use avatar_kiosk_rs::config::{AvatarSettings, Language};
use avatar_kiosk_rs::events::SessionEvent;
use avatar_kiosk_rs::session::{
    Connector, SessionController, SessionError, StreamingAvatar, TaskMode, TaskType, TokenSource,
};
use avatar_kiosk_rs::token::TokenError;
use avatar_kiosk_rs::transcript::Role;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

struct StaticToken;

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn session_token(&self) -> Result<String, TokenError> {
        Ok("test-token".to_string())
    }
}

struct FailingToken;

#[async_trait::async_trait]
impl TokenSource for FailingToken {
    async fn session_token(&self) -> Result<String, TokenError> {
        Err(TokenError::ApiError {
            status: 500,
            message: "upstream sad".to_string(),
        })
    }
}

/// What the fake session observed
#[derive(Default)]
struct SessionLog {
    started: bool,
    stopped: bool,
    voice_chat_muted: Option<bool>,
    spoken: Vec<(String, TaskType, TaskMode)>,
}

struct FakeSession {
    events_tx: broadcast::Sender<SessionEvent>,
    log: Arc<Mutex<SessionLog>>,
}

#[async_trait::async_trait]
impl StreamingAvatar for FakeSession {
    async fn create_start_avatar(&mut self, _settings: &AvatarSettings) -> Result<(), SessionError> {
        self.log.lock().unwrap().started = true;
        Ok(())
    }

    async fn start_voice_chat(&mut self, is_input_audio_muted: bool) -> Result<(), SessionError> {
        self.log.lock().unwrap().voice_chat_muted = Some(is_input_audio_muted);
        Ok(())
    }

    async fn speak(
        &mut self,
        text: &str,
        task_type: TaskType,
        task_mode: TaskMode,
    ) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .spoken
            .push((text.to_string(), task_type, task_mode));
        Ok(())
    }

    async fn stop_avatar(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().stopped = true;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

struct FakeConnector {
    events_tx: broadcast::Sender<SessionEvent>,
    log: Arc<Mutex<SessionLog>>,
}

impl FakeConnector {
    fn new() -> (Self, broadcast::Sender<SessionEvent>, Arc<Mutex<SessionLog>>) {
        let (events_tx, _) = broadcast::channel(64);
        let log = Arc::new(Mutex::new(SessionLog::default()));
        let connector = Self {
            events_tx: events_tx.clone(),
            log: Arc::clone(&log),
        };
        (connector, events_tx, log)
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, token: &str) -> Result<FakeSession, SessionError> {
        assert_eq!(token, "test-token");
        Ok(FakeSession {
            events_tx: self.events_tx.clone(),
            log: Arc::clone(&self.log),
        })
    }
}

type TestController = SessionController<StaticToken, FakeConnector>;

async fn connected_controller() -> (
    TestController,
    broadcast::Sender<SessionEvent>,
    Arc<Mutex<SessionLog>>,
) {
    let (connector, events_tx, log) = FakeConnector::new();
    let mut controller =
        SessionController::new(StaticToken, connector, AvatarSettings::default());
    controller.connect().await;
    assert!(controller.is_connected());
    (controller, events_tx, log)
}

/// Wait for the dispatch task to catch up with injected events
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within one second");
}

#[tokio::test]
async fn test_fragment_stream_flushes_exactly_once() {
    let (controller, events_tx, _log) = connected_controller().await;
    let transcript = controller.transcript();

    for fragment in ["Wel", "come to", " the", " show,", " friend"] {
        events_tx
            .send(SessionEvent::AvatarTalkingFragment(json!(fragment)))
            .unwrap();
    }
    events_tx.send(SessionEvent::AvatarStopTalking).unwrap();
    events_tx.send(SessionEvent::AvatarEndMessage).unwrap();

    wait_until(|| transcript.lock().unwrap().len() == 1).await;
    // The duplicate end signal must not have produced a second entry
    tokio::time::sleep(Duration::from_millis(30)).await;

    let transcript = transcript.lock().unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.entries()[0].text, "Welcome to the show, friend");
    assert_eq!(transcript.entries()[0].role, Role::Avatar);
}

#[tokio::test]
async fn test_end_signals_arrive_in_reverse_order() {
    let (controller, events_tx, _log) = connected_controller().await;
    let transcript = controller.transcript();

    events_tx
        .send(SessionEvent::AvatarTalkingFragment(json!("first turn")))
        .unwrap();
    events_tx.send(SessionEvent::AvatarEndMessage).unwrap();
    events_tx.send(SessionEvent::AvatarStopTalking).unwrap();

    events_tx
        .send(SessionEvent::AvatarTalkingFragment(json!("second turn")))
        .unwrap();
    events_tx.send(SessionEvent::AvatarStopTalking).unwrap();

    wait_until(|| transcript.lock().unwrap().len() == 2).await;
    let transcript = transcript.lock().unwrap();
    assert_eq!(transcript.entries()[0].text, "first turn");
    assert_eq!(transcript.entries()[1].text, "second turn");
}

#[tokio::test]
async fn test_connect_is_idempotent_while_connected() {
    let (mut controller, _events_tx, log) = connected_controller().await;
    assert!(log.lock().unwrap().started);

    controller.connect().await;
    controller.connect().await;
    assert!(controller.is_connected());
    // Voice chat started muted: no microphone was initialized
    assert_eq!(log.lock().unwrap().voice_chat_muted, Some(true));
}

#[tokio::test]
async fn test_credential_failure_reports_and_aborts() {
    let (connector, _events_tx, log) = FakeConnector::new();
    let mut controller =
        SessionController::new(FailingToken, connector, AvatarSettings::default());
    let mut status_rx = controller.subscribe_status();

    controller.connect().await;

    assert!(!controller.is_connected());
    assert!(!log.lock().unwrap().started);
    let mut saw_error = false;
    while let Ok(message) = status_rx.try_recv() {
        if message.starts_with("Error:") {
            saw_error = true;
        }
    }
    assert!(saw_error, "credential failure must surface a status message");
}

#[tokio::test]
async fn test_disconnect_discards_partial_and_stops_avatar() {
    let (mut controller, events_tx, log) = connected_controller().await;
    let transcript = controller.transcript();
    let cancel = controller.frame_cancel_token();

    events_tx
        .send(SessionEvent::AvatarTalkingFragment(json!("never finished")))
        .unwrap();
    wait_until(|| !controller.partial_speech().is_empty()).await;

    controller.disconnect().await;

    assert!(!controller.is_connected());
    assert!(log.lock().unwrap().stopped);
    assert!(cancel.is_cancelled());
    assert!(transcript.lock().unwrap().is_empty());
    assert_eq!(controller.partial_speech(), "");
}

#[tokio::test]
async fn test_send_text_routes_through_speak() {
    let (mut controller, _events_tx, log) = connected_controller().await;
    let transcript = controller.transcript();

    controller.send_text("  How do I start?  ").await;
    controller.send_text("   ").await;

    let log = log.lock().unwrap();
    assert_eq!(log.spoken.len(), 1);
    assert_eq!(
        log.spoken[0],
        (
            "How do I start?".to_string(),
            TaskType::ConversationalQuery,
            TaskMode::Async
        )
    );
    // The user entry comes from the user-talking event, not the send path
    assert!(transcript.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_text_while_disconnected_is_reported() {
    let (connector, _events_tx, log) = FakeConnector::new();
    let mut controller =
        SessionController::new(StaticToken, connector, AvatarSettings::default());
    let mut status_rx = controller.subscribe_status();

    controller.send_text("hello?").await;

    assert!(log.lock().unwrap().spoken.is_empty());
    assert_eq!(status_rx.try_recv().unwrap(), "Connect to chat first");
}

#[tokio::test]
async fn test_greeting_spoken_verbatim_after_connect() {
    let (connector, _events_tx, log) = FakeConnector::new();
    let settings = AvatarSettings {
        greeting: Some("Welcome in!".to_string()),
        ..AvatarSettings::default()
    };
    let mut controller = SessionController::new(StaticToken, connector, settings);

    controller.connect().await;

    let log = log.lock().unwrap();
    assert_eq!(log.spoken.len(), 1);
    assert_eq!(
        log.spoken[0],
        (
            "Welcome in!".to_string(),
            TaskType::RepeatVerbatim,
            TaskMode::Async
        )
    );
}

#[tokio::test]
async fn test_language_gate() {
    let (connector, _events_tx, _log) = FakeConnector::new();
    let mut controller =
        SessionController::new(StaticToken, connector, AvatarSettings::default());

    controller.set_language(Language::French);
    assert_eq!(controller.settings().language, Language::French);

    controller.connect().await;
    controller.set_language(Language::German);
    // Connected: the change is refused
    assert_eq!(controller.settings().language, Language::French);

    controller.disconnect().await;
    controller.set_language(Language::German);
    assert_eq!(controller.settings().language, Language::German);
}

#[tokio::test]
async fn test_mute_toggle_updates_session() {
    let (mut controller, _events_tx, log) = connected_controller().await;
    // No microphone: connect left voice input muted
    assert!(controller.is_muted());

    controller.toggle_microphone().await;
    assert!(!controller.is_muted());
    assert_eq!(log.lock().unwrap().voice_chat_muted, Some(false));

    controller.toggle_microphone().await;
    assert!(controller.is_muted());
    assert_eq!(log.lock().unwrap().voice_chat_muted, Some(true));
}

#[tokio::test]
async fn test_user_speech_lands_in_transcript() {
    let (controller, events_tx, _log) = connected_controller().await;
    let transcript = controller.transcript();

    events_tx
        .send(SessionEvent::UserTalkingFragment(json!({
            "detail": { "message": "what can you do?" }
        })))
        .unwrap();

    wait_until(|| transcript.lock().unwrap().len() == 1).await;
    let transcript = transcript.lock().unwrap();
    assert_eq!(transcript.entries()[0].role, Role::User);
    assert_eq!(transcript.entries()[0].text, "what can you do?");
}
