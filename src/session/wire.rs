//! WebSocket transport for the streaming session.
//!
//! Commands are serialized JSON text frames pushed through a writer
//! task; the reader task parses each inbound frame into a
//! [`SessionEvent`] and fans it out on a broadcast channel. Unknown
//! event types are skipped, not errors: the service adds them freely.

use super::{Connector, SessionError, StreamingAvatar, TaskMode, TaskType};
use crate::config::AvatarSettings;
use crate::events::SessionEvent;
use crate::media::MediaStream;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Start {
        quality: String,
        avatar_name: String,
        knowledge_base_id: String,
        version: String,
        language: String,
    },
    VoiceChat {
        is_input_audio_muted: bool,
    },
    Speak {
        text: String,
        task_type: TaskType,
        task_mode: TaskMode,
    },
    Stop,
}

struct Conn {
    cmd_tx: mpsc::Sender<ClientCommand>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

/// Production session transport.
///
/// Constructed with a fetched token; the socket opens on
/// `create_start_avatar`, whose resolved handshake doubles as the
/// session-start acknowledgment.
pub struct WireSession {
    endpoint: String,
    token: String,
    events_tx: broadcast::Sender<SessionEvent>,
    conn: Option<Conn>,
}

impl WireSession {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            events_tx,
            conn: None,
        }
    }

    async fn open_socket(&mut self) -> Result<(), SessionError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("session_token", &self.token);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(32);

        let writer = tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                let last = matches!(command, ClientCommand::Stop);
                match serde_json::to_string(&command) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            log::error!("Failed to send command: {}", e);
                            break;
                        }
                    }
                    Err(e) => log::error!("Failed to serialize command: {}", e),
                }
                if last {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let events_tx = self.events_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        log::error!("Failed to read message: {}", e);
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        if let Some(event) = parse_event(text.as_str()) {
                            let _ = events_tx.send(event);
                        }
                    }
                    Message::Binary(bin) => {
                        log::warn!("Unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(frame) => {
                        log::info!("Connection closed: {:?}", frame);
                        break;
                    }
                    _ => {}
                }
            }
            let _ = events_tx.send(SessionEvent::StreamDisconnected);
        });

        self.conn = Some(Conn {
            cmd_tx,
            reader,
            writer,
        });
        Ok(())
    }

    async fn send(&self, command: ClientCommand) -> Result<(), SessionError> {
        let conn = self.conn.as_ref().ok_or(SessionError::NotConnected)?;
        conn.cmd_tx
            .send(command)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

#[async_trait::async_trait]
impl StreamingAvatar for WireSession {
    async fn create_start_avatar(&mut self, settings: &AvatarSettings) -> Result<(), SessionError> {
        if self.conn.is_some() {
            return Ok(());
        }
        self.open_socket().await?;
        self.send(ClientCommand::Start {
            quality: settings.quality.to_string(),
            avatar_name: settings.avatar_name.clone(),
            knowledge_base_id: settings.knowledge_base_id.clone(),
            version: settings.protocol_version.clone(),
            language: settings.language.to_string(),
        })
        .await
    }

    async fn start_voice_chat(&mut self, is_input_audio_muted: bool) -> Result<(), SessionError> {
        self.send(ClientCommand::VoiceChat {
            is_input_audio_muted,
        })
        .await
    }

    async fn speak(
        &mut self,
        text: &str,
        task_type: TaskType,
        task_mode: TaskMode,
    ) -> Result<(), SessionError> {
        self.send(ClientCommand::Speak {
            text: text.to_string(),
            task_type,
            task_mode,
        })
        .await
    }

    async fn stop_avatar(&mut self) -> Result<(), SessionError> {
        if let Some(conn) = self.conn.take() {
            // Best effort: the writer closes the socket after Stop and
            // both tasks wind down on their own
            let _ = conn.cmd_tx.send(ClientCommand::Stop).await;
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for WireSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}

fn parse_event(text: &str) -> Option<SessionEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Unparseable event frame: {}", e);
            return None;
        }
    };
    let event_type = match value.get("type").and_then(Value::as_str) {
        Some(event_type) => event_type,
        None => {
            log::debug!("Event frame without a type field");
            return None;
        }
    };

    match event_type {
        "stream_ready" => {
            let id = value
                .get("stream_id")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string();
            Some(SessionEvent::StreamReady(MediaStream::new(id)))
        }
        "avatar_talking_message" => Some(SessionEvent::AvatarTalkingFragment(value)),
        "avatar_stop_talking" => Some(SessionEvent::AvatarStopTalking),
        "avatar_end_message" => Some(SessionEvent::AvatarEndMessage),
        "user_talking_message" => Some(SessionEvent::UserTalkingFragment(value)),
        "connection_quality_changed" => {
            let quality = value
                .get("quality")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            Some(SessionEvent::ConnectionQualityChanged(quality))
        }
        "stream_disconnected" => Some(SessionEvent::StreamDisconnected),
        other => {
            log::debug!("Ignoring unknown event type: {}", other);
            None
        }
    }
}

/// Opens [`WireSession`]s against a fixed endpoint
pub struct WireConnector {
    endpoint: String,
}

impl WireConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl Connector for WireConnector {
    type Session = WireSession;

    async fn open(&self, token: &str) -> Result<WireSession, SessionError> {
        Ok(WireSession::new(self.endpoint.clone(), token))
    }
}
