//! Events delivered by the streaming session's feed.
//!
//! The feed is a single ordered stream of callbacks from the remote
//! service. Fragment payloads arrive in several shapes depending on the
//! service's mood; `extract_text` resolves them with a fixed priority
//! and never fails.

use crate::media::MediaStream;
use serde_json::Value;

/// Everything the remote session can tell us
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Media is ready; carries the stream handle to attach
    StreamReady(MediaStream),
    /// A fragment of avatar speech, pre-transcribed by the service
    AvatarTalkingFragment(Value),
    /// The avatar's voice went quiet
    AvatarStopTalking,
    /// The avatar's logical message is complete
    AvatarEndMessage,
    /// A fragment of the user's speech, transcribed by the service
    UserTalkingFragment(Value),
    /// Transport quality report
    ConnectionQualityChanged(String),
    /// The session dropped
    StreamDisconnected,
}

/// Pull the text out of a fragment payload.
///
/// Tried in order: a bare string, `detail.message`, `message`, `text`,
/// `content`, a string-valued `data`. Anything else resolves to an empty
/// string, which downstream treats as a no-op fragment. Whitespace is
/// preserved: fragments carry their own word boundaries.
pub fn extract_text(payload: &Value) -> String {
    if let Value::String(s) = payload {
        return s.clone();
    }
    if let Some(s) = payload
        .get("detail")
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
    {
        return s.to_string();
    }
    for key in ["message", "text", "content"] {
        if let Some(s) = payload.get(key).and_then(Value::as_str) {
            return s.to_string();
        }
    }
    if let Some(s) = payload.get("data").and_then(Value::as_str) {
        return s.to_string();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_string_payload() {
        assert_eq!(extract_text(&json!("hello")), "hello");
    }

    #[test]
    fn test_nested_detail_message_wins() {
        let payload = json!({
            "detail": { "message": "from detail" },
            "message": "from message",
            "text": "from text",
        });
        assert_eq!(extract_text(&payload), "from detail");
    }

    #[test]
    fn test_priority_order() {
        let payload = json!({ "message": "m", "text": "t", "content": "c" });
        assert_eq!(extract_text(&payload), "m");

        let payload = json!({ "text": "t", "content": "c" });
        assert_eq!(extract_text(&payload), "t");

        let payload = json!({ "content": "c", "data": "d" });
        assert_eq!(extract_text(&payload), "c");

        let payload = json!({ "data": "d" });
        assert_eq!(extract_text(&payload), "d");
    }

    #[test]
    fn test_unrecognized_shapes_resolve_empty() {
        assert_eq!(extract_text(&json!(42)), "");
        assert_eq!(extract_text(&json!({ "data": { "nested": true } })), "");
        assert_eq!(extract_text(&json!(null)), "");
        assert_eq!(extract_text(&json!(["a", "b"])), "");
    }

    #[test]
    fn test_whitespace_is_preserved() {
        assert_eq!(extract_text(&json!(" the")), " the");
        assert_eq!(extract_text(&json!({ "message": " show," })), " show,");
    }
}
