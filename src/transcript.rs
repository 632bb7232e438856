//! Append-only conversation transcript plus the ephemeral status channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Avatar,
    User,
    /// Operational messages; routed to the status channel, never stored
    System,
}

/// One finalized line of conversation. Immutable once appended;
/// ordering is append order.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,
}

/// Ordered log of finalized avatar/user messages.
///
/// System-role appends are filtered out here and broadcast on a
/// separate status channel instead, so the persisted transcript only
/// ever holds conversation. Nothing outlives the session: state is
/// in-memory only.
pub struct TranscriptStore {
    entries: Vec<TranscriptEntry>,
    updates: broadcast::Sender<TranscriptEntry>,
    status: broadcast::Sender<String>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        let (status, _) = broadcast::channel(64);
        Self {
            entries: Vec::new(),
            updates,
            status,
        }
    }

    /// Append a message. System messages go to the status channel only.
    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        let text = text.into();
        if role == Role::System {
            log::debug!("status: {}", text);
            let _ = self.status.send(text);
            return;
        }

        let entry = TranscriptEntry {
            timestamp: Utc::now(),
            role,
            text,
        };
        let _ = self.updates.send(entry.clone());
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live feed of appended conversation entries
    pub fn subscribe_updates(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.updates.subscribe()
    }

    /// Live feed of system/status messages
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status.subscribe()
    }
}
