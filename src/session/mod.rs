//! Session lifecycle and event dispatch.
//!
//! The controller owns the connection to the remote avatar service:
//! acquire credential, open the session, attach media, start voice
//! input, tear down. A single dispatch task consumes the session's
//! event feed and drives the utterance buffer and the transcript, so
//! both are only ever mutated from one callback context.

pub mod wire;

use crate::config::{AvatarSettings, Language};
use crate::events::{extract_text, SessionEvent};
use crate::media::MediaStream;
use crate::mic::MicCapture;
use crate::token::{TokenError, TokenProvider};
use crate::transcript::{Role, TranscriptEntry, TranscriptStore};
use crate::utterance::UtteranceBuffer;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Not connected")]
    NotConnected,
    #[error("Session channel closed")]
    ChannelClosed,
}

/// How the service should treat spoken text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskType {
    /// Say exactly this text
    #[serde(rename = "repeat")]
    RepeatVerbatim,
    /// Answer through the knowledge base
    #[serde(rename = "talk")]
    ConversationalQuery,
}

/// Speak tasks are fire-and-forget; the reply arrives on the event feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskMode {
    #[serde(rename = "async")]
    Async,
}

/// The remote streaming session, at its interface boundary.
///
/// The production implementation is [`wire::WireSession`]; tests plug
/// in a fake and feed events by hand.
#[async_trait::async_trait]
pub trait StreamingAvatar: Send + Sync {
    async fn create_start_avatar(&mut self, settings: &AvatarSettings) -> Result<(), SessionError>;
    async fn start_voice_chat(&mut self, is_input_audio_muted: bool) -> Result<(), SessionError>;
    async fn speak(
        &mut self,
        text: &str,
        task_type: TaskType,
        task_mode: TaskMode,
    ) -> Result<(), SessionError>;
    async fn stop_avatar(&mut self) -> Result<(), SessionError>;
    /// Subscribe to the session's event feed
    fn events(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Source of short-lived session credentials
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn session_token(&self) -> Result<String, TokenError>;
}

#[async_trait::async_trait]
impl TokenSource for TokenProvider {
    async fn session_token(&self) -> Result<String, TokenError> {
        self.fetch().await
    }
}

/// Builds a session object from a fetched token
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Session: StreamingAvatar + 'static;
    async fn open(&self, token: &str) -> Result<Self::Session, SessionError>;
}

/// Route one feed event into the two cores.
///
/// Avatar fragments accumulate in the utterance buffer; either end
/// signal flushes it (at most once) into the transcript; user fragments
/// append directly; a disconnect discards any partial utterance.
fn dispatch_event(
    event: SessionEvent,
    transcript: &Mutex<TranscriptStore>,
    utterance: &Mutex<UtteranceBuffer>,
    media: &watch::Sender<Option<MediaStream>>,
) {
    match event {
        SessionEvent::StreamReady(mut stream) => {
            stream.audio_muted = false;
            stream.volume = 1.0;
            log::info!("Media stream ready: {}", stream.id);
            media.send_replace(Some(stream));
        }
        SessionEvent::AvatarTalkingFragment(payload) => {
            let text = extract_text(&payload);
            utterance.lock().unwrap().on_fragment(&text);
        }
        SessionEvent::AvatarStopTalking | SessionEvent::AvatarEndMessage => {
            let flushed = utterance.lock().unwrap().on_utterance_end();
            if let Some(text) = flushed {
                transcript.lock().unwrap().append(Role::Avatar, text);
            }
        }
        SessionEvent::UserTalkingFragment(payload) => {
            let text = extract_text(&payload);
            let text = text.trim();
            if !text.is_empty() {
                transcript.lock().unwrap().append(Role::User, text);
            }
        }
        SessionEvent::ConnectionQualityChanged(quality) => {
            log::debug!("Connection quality: {}", quality);
        }
        SessionEvent::StreamDisconnected => {
            utterance.lock().unwrap().on_reset();
            media.send_replace(None);
            transcript
                .lock()
                .unwrap()
                .append(Role::System, "Stream disconnected");
        }
    }
}

/// Owns the session handle and everything whose lifetime follows it.
///
/// UI-facing operations never propagate errors: failures become one
/// human-readable message on the status channel and the session is left
/// in a state the user can retry from.
pub struct SessionController<T: TokenSource, C: Connector> {
    tokens: T,
    connector: C,
    settings: AvatarSettings,
    transcript: Arc<Mutex<TranscriptStore>>,
    utterance: Arc<Mutex<UtteranceBuffer>>,
    media: watch::Sender<Option<MediaStream>>,
    session: Option<C::Session>,
    dispatch: Option<tokio::task::JoinHandle<()>>,
    listeners_setup: bool,
    connecting: bool,
    muted: bool,
    mic: Option<MicCapture>,
    frame_cancel: CancellationToken,
}

impl<T: TokenSource, C: Connector> SessionController<T, C> {
    pub fn new(tokens: T, connector: C, settings: AvatarSettings) -> Self {
        let (media, _) = watch::channel(None);
        Self {
            tokens,
            connector,
            settings,
            transcript: Arc::new(Mutex::new(TranscriptStore::new())),
            utterance: Arc::new(Mutex::new(UtteranceBuffer::new())),
            media,
            session: None,
            dispatch: None,
            listeners_setup: false,
            connecting: false,
            muted: false,
            mic: None,
            frame_cancel: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn settings(&self) -> &AvatarSettings {
        &self.settings
    }

    pub fn transcript(&self) -> Arc<Mutex<TranscriptStore>> {
        Arc::clone(&self.transcript)
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.transcript.lock().unwrap().subscribe_updates()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.transcript.lock().unwrap().subscribe_status()
    }

    /// The currently attached media stream, if any
    pub fn media_stream(&self) -> watch::Receiver<Option<MediaStream>> {
        self.media.subscribe()
    }

    /// Token the compositor driver observes; cancelled on teardown
    pub fn frame_cancel_token(&self) -> CancellationToken {
        self.frame_cancel.clone()
    }

    /// In-progress avatar speech, for live rendering only
    pub fn partial_speech(&self) -> String {
        self.utterance.lock().unwrap().partial().to_string()
    }

    /// Acquire the local capture claim up front. Failure is reported
    /// and tolerated: connecting still works, voice input stays muted.
    pub fn init_microphone(&mut self) {
        match MicCapture::acquire() {
            Ok(mic) => {
                self.mic = Some(mic);
                self.status("Microphone ready");
            }
            Err(e) => {
                log::warn!("Microphone access denied or not available: {}", e);
                self.status("Microphone access not available");
            }
        }
    }

    /// Open a session. No-op while connected or mid-connect; failure is
    /// reported on the status channel and left for a manual retry.
    pub async fn connect(&mut self) {
        if self.session.is_some() || self.connecting {
            return;
        }
        self.connecting = true;
        let result = self.try_connect().await;
        self.connecting = false;
        if let Err(e) = result {
            log::error!("Failed to initialize avatar: {}", e);
            self.status(format!("Error: {}", e));
        }
    }

    async fn try_connect(&mut self) -> Result<(), SessionError> {
        let token = self.tokens.session_token().await?;
        let mut session = self.connector.open(&token).await?;
        self.setup_listeners(&session);

        session.create_start_avatar(&self.settings).await?;

        // Without a capture claim, voice chat starts muted instead of failing
        let muted = self.mic.is_none();
        session.start_voice_chat(muted).await?;
        self.muted = muted;
        if muted {
            self.status("Voice input muted: no microphone available");
        }

        self.session = Some(session);
        self.status("Avatar is ready to chat!");

        if let Some(greeting) = self.settings.greeting.clone() {
            // Give the stream a beat to settle before speaking
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Err(e) = self.speak_raw(&greeting, TaskType::RepeatVerbatim).await {
                log::error!("Failed to send greeting: {}", e);
            }
        }
        Ok(())
    }

    /// Register the dispatch task for a session's feed, exactly once.
    /// Re-invoking setup while registered is an allowed caller pattern.
    fn setup_listeners(&mut self, session: &C::Session) {
        if self.listeners_setup {
            return;
        }
        self.listeners_setup = true;

        let rx = session.events();
        let transcript = Arc::clone(&self.transcript);
        let utterance = Arc::clone(&self.utterance);
        let media = self.media.clone();

        let handle = tokio::spawn(async move {
            let mut stream = BroadcastStream::new(rx);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => dispatch_event(event, &transcript, &utterance, &media),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        log::warn!("Event feed lagged, skipped {} events", skipped);
                    }
                }
            }
            log::debug!("Event dispatch finished");
        });
        self.dispatch = Some(handle);
    }

    fn teardown_listeners(&mut self) {
        if !self.listeners_setup {
            return;
        }
        self.listeners_setup = false;
        if let Some(handle) = self.dispatch.take() {
            handle.abort();
        }
    }

    /// Tear the session down. Stop errors are swallowed: the user is
    /// already leaving.
    pub async fn disconnect(&mut self) {
        let was_connected = self.session.is_some();
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop_avatar().await {
                log::warn!("Error stopping avatar: {}", e);
            }
        }
        self.teardown_listeners();
        self.utterance.lock().unwrap().on_reset();
        self.frame_cancel.cancel();
        self.frame_cancel = CancellationToken::new();
        self.media.send_replace(None);
        self.muted = false;
        if was_connected {
            self.status("Disconnected from avatar");
        }
    }

    /// Full teardown: disconnect and release the capture claim
    pub async fn shutdown(&mut self) {
        self.disconnect().await;
        self.mic = None;
    }

    /// Flip the microphone mute. Session-side errors are swallowed; the
    /// local capture stream follows the flag.
    pub async fn toggle_microphone(&mut self) {
        let muted = !self.muted;
        self.muted = muted;
        self.status(if muted {
            "Your microphone is muted"
        } else {
            "Your microphone is unmuted"
        });

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.start_voice_chat(muted).await {
                log::warn!("Voice chat mute update failed: {}", e);
            }
        }

        match (&mut self.mic, muted) {
            (Some(mic), _) => {
                if let Err(e) = mic.set_enabled(!muted) {
                    log::warn!("Mic toggle failed: {}", e);
                    self.status("Error controlling microphone");
                }
            }
            (None, false) => {
                // Unmuting without a capture claim: try to acquire one now
                match MicCapture::acquire() {
                    Ok(mic) => self.mic = Some(mic),
                    Err(e) => {
                        log::warn!("Microphone unavailable: {}", e);
                        self.status("Error controlling microphone");
                    }
                }
            }
            (None, true) => {}
        }
    }

    /// Change the avatar language. Only permitted while disconnected:
    /// personas are provisioned per language at session start.
    pub fn set_language(&mut self, language: Language) {
        if self.session.is_some() || self.connecting {
            self.status("Language can only be changed while disconnected");
            return;
        }
        self.settings.language = language;
        self.status(format!("Language set to {}", language));
    }

    /// Send a typed message through the same speak path as voice. The
    /// user-side transcript entry arrives via the user-talking event;
    /// appending here would duplicate it.
    pub async fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.session.is_none() {
            self.status("Connect to chat first");
            return;
        }
        if let Err(e) = self.speak_raw(text, TaskType::ConversationalQuery).await {
            log::error!("Failed to send text message: {}", e);
            self.status("Error sending message");
        }
    }

    async fn speak_raw(&mut self, text: &str, task_type: TaskType) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotConnected)?;
        session.speak(text, task_type, TaskMode::Async).await
    }

    fn status(&self, text: impl Into<String>) {
        self.transcript.lock().unwrap().append(Role::System, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        transcript: Mutex<TranscriptStore>,
        utterance: Mutex<UtteranceBuffer>,
        media: watch::Sender<Option<MediaStream>>,
    }

    impl Fixture {
        fn new() -> Self {
            let (media, _) = watch::channel(None);
            Self {
                transcript: Mutex::new(TranscriptStore::new()),
                utterance: Mutex::new(UtteranceBuffer::new()),
                media,
            }
        }

        fn dispatch(&self, event: SessionEvent) {
            dispatch_event(event, &self.transcript, &self.utterance, &self.media);
        }

        fn texts(&self) -> Vec<String> {
            self.transcript
                .lock()
                .unwrap()
                .entries()
                .iter()
                .map(|e| e.text.clone())
                .collect()
        }
    }

    #[test]
    fn test_fragments_then_both_end_signals_yield_one_entry() {
        let fx = Fixture::new();
        for fragment in ["Wel", "come to", " the", " show,", " friend"] {
            fx.dispatch(SessionEvent::AvatarTalkingFragment(json!(fragment)));
        }
        fx.dispatch(SessionEvent::AvatarStopTalking);
        fx.dispatch(SessionEvent::AvatarEndMessage);

        assert_eq!(fx.texts(), vec!["Welcome to the show, friend"]);
    }

    #[test]
    fn test_end_signals_in_either_order() {
        let fx = Fixture::new();
        fx.dispatch(SessionEvent::AvatarTalkingFragment(json!("one")));
        fx.dispatch(SessionEvent::AvatarEndMessage);
        fx.dispatch(SessionEvent::AvatarStopTalking);

        fx.dispatch(SessionEvent::AvatarTalkingFragment(json!("two")));
        fx.dispatch(SessionEvent::AvatarStopTalking);

        assert_eq!(fx.texts(), vec!["one", "two"]);
    }

    #[test]
    fn test_end_signal_without_fragments_is_silent() {
        let fx = Fixture::new();
        fx.dispatch(SessionEvent::AvatarStopTalking);
        fx.dispatch(SessionEvent::AvatarEndMessage);
        assert!(fx.texts().is_empty());
    }

    #[test]
    fn test_disconnect_discards_partial_utterance() {
        let fx = Fixture::new();
        fx.dispatch(SessionEvent::AvatarTalkingFragment(json!("never finish")));
        fx.dispatch(SessionEvent::StreamDisconnected);
        fx.dispatch(SessionEvent::AvatarStopTalking);
        assert!(fx.texts().is_empty());
    }

    #[test]
    fn test_user_fragments_append_directly() {
        let fx = Fixture::new();
        fx.dispatch(SessionEvent::UserTalkingFragment(json!({
            "message": "  hello there  "
        })));
        fx.dispatch(SessionEvent::UserTalkingFragment(json!("")));
        assert_eq!(fx.texts(), vec!["hello there"]);
        assert_eq!(
            fx.transcript.lock().unwrap().entries()[0].role,
            Role::User
        );
    }

    #[test]
    fn test_malformed_fragment_payload_is_noop() {
        let fx = Fixture::new();
        fx.dispatch(SessionEvent::AvatarTalkingFragment(json!({
            "unexpected": { "shape": 1 }
        })));
        fx.dispatch(SessionEvent::AvatarEndMessage);
        assert!(fx.texts().is_empty());
    }

    #[test]
    fn test_stream_ready_attaches_unmuted_full_volume() {
        let fx = Fixture::new();
        let mut rx = fx.media.subscribe();
        fx.dispatch(SessionEvent::StreamReady(MediaStream::new("s-9")));

        let stream = rx.borrow_and_update().clone().expect("stream attached");
        assert_eq!(stream.id, "s-9");
        assert!(!stream.audio_muted);
        assert_eq!(stream.volume, 1.0);

        fx.dispatch(SessionEvent::StreamDisconnected);
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn test_task_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskType::RepeatVerbatim).unwrap(),
            "\"repeat\""
        );
        assert_eq!(
            serde_json::to_string(&TaskType::ConversationalQuery).unwrap(),
            "\"talk\""
        );
        assert_eq!(serde_json::to_string(&TaskMode::Async).unwrap(), "\"async\"");
    }
}
