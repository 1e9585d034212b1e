//! Chat session documents and the wire shapes derived from them.

use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender recorded on generated replies.
pub const AI_SENDER: &str = "ai";

/// Longest accepted session id.
const MAX_SESSION_KEY_LEN: usize = 256;

/// Identifier of a chat session, in the store's native representation.
///
/// A 24-digit hex string is an `ObjectId`; any other key is kept as a string.
/// Replies reference their session with the same value as the session's `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Bson", try_from = "Bson")]
pub enum SessionKey {
    ObjectId(ObjectId),
    Name(String),
}

impl SessionKey {
    /// Parse a caller-supplied id. Returns `None` for blank, oversized or
    /// control-character keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_SESSION_KEY_LEN || raw.chars().any(char::is_control) {
            return None;
        }

        Some(match ObjectId::parse_str(raw) {
            Ok(oid) => SessionKey::ObjectId(oid),
            Err(_) => SessionKey::Name(raw.to_string()),
        })
    }

    pub fn to_bson(&self) -> Bson {
        self.clone().into()
    }
}

impl From<ObjectId> for SessionKey {
    fn from(oid: ObjectId) -> Self {
        SessionKey::ObjectId(oid)
    }
}

impl From<SessionKey> for Bson {
    fn from(key: SessionKey) -> Self {
        match key {
            SessionKey::ObjectId(oid) => Bson::ObjectId(oid),
            SessionKey::Name(name) => Bson::String(name),
        }
    }
}

impl TryFrom<Bson> for SessionKey {
    type Error = String;

    fn try_from(value: Bson) -> Result<Self, Self::Error> {
        match value {
            Bson::ObjectId(oid) => Ok(SessionKey::ObjectId(oid)),
            Bson::String(name) => Ok(SessionKey::Name(name)),
            other => Err(format!("unsupported session id type: {:?}", other.element_type())),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::ObjectId(oid) => write!(f, "{}", oid.to_hex()),
            SessionKey::Name(name) => f.write_str(name),
        }
    }
}

/// One turn of a conversation, stored in the `chatdetails` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDetail {
    /// Store-assigned identifier; absent until inserted.
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Session this turn belongs to.
    #[serde(rename = "sessionId")]
    pub session_id: SessionKey,

    /// "user", "ai" or a system role.
    pub sender: String,

    /// Message text.
    pub message: String,

    /// When the turn was written.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl ChatDetail {
    /// A generated reply for `session_id`, stamped with the current time.
    pub fn ai_reply(session_id: SessionKey, message: String) -> Self {
        Self {
            id: None,
            session_id,
            sender: AI_SENDER.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Role/content pair handed to the completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl From<&ChatDetail> for CompletionMessage {
    fn from(detail: &ChatDetail) -> Self {
        Self::new(detail.sender.clone(), detail.message.clone())
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, Bson};

    #[test]
    fn ai_reply_serializes_with_store_field_names() {
        let oid = ObjectId::new();
        let detail = ChatDetail::ai_reply(oid.into(), "Hello!".to_string());

        let doc = bson::to_document(&detail).expect("serialize detail");

        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get("sessionId"), Some(&Bson::ObjectId(oid)));
        assert_eq!(doc.get_str("sender").unwrap(), "ai");
        assert_eq!(doc.get_str("message").unwrap(), "Hello!");
        assert!(matches!(doc.get("timestamp"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn detail_round_trips_through_bson_with_string_session_key() {
        let detail = ChatDetail::ai_reply(SessionKey::Name("abc123".to_string()), "Hi".to_string());

        let doc = bson::to_document(&detail).unwrap();
        assert_eq!(doc.get_str("sessionId").unwrap(), "abc123");

        let back: ChatDetail = bson::from_document(doc).unwrap();
        assert_eq!(back.session_id, detail.session_id);
        assert_eq!(back.timestamp.timestamp_millis(), detail.timestamp.timestamp_millis());
    }

    #[test]
    fn session_key_prefers_object_ids() {
        let oid = ObjectId::new();

        assert_eq!(SessionKey::parse(&oid.to_hex()), Some(SessionKey::ObjectId(oid)));
        assert_eq!(
            SessionKey::parse(" doesnotexist "),
            Some(SessionKey::Name("doesnotexist".to_string()))
        );
        assert_eq!(SessionKey::parse(&oid.to_hex()).unwrap().to_string(), oid.to_hex());
    }

    #[test]
    fn blank_or_control_session_keys_are_rejected() {
        assert_eq!(SessionKey::parse(""), None);
        assert_eq!(SessionKey::parse("   "), None);
        assert_eq!(SessionKey::parse("abc\u{0}def"), None);
        assert_eq!(SessionKey::parse(&"x".repeat(MAX_SESSION_KEY_LEN + 1)), None);
    }

    #[test]
    fn completion_message_copies_sender_and_text() {
        let detail = ChatDetail {
            id: None,
            session_id: ObjectId::new().into(),
            sender: "user".to_string(),
            message: "hi".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(CompletionMessage::from(&detail), CompletionMessage::new("user", "hi"));
    }

    #[test]
    fn query_request_reads_camel_case_session_id() {
        let req: QueryRequest = serde_json::from_str(r#"{"sessionId":"abc123"}"#).unwrap();
        assert_eq!(req.session_id, "abc123");
    }
}
