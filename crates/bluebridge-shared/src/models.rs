//! Native-side domain models exchanged with the companion process.
//!
//! Field names are the wire contract: every struct serializes with the
//! snake_case names the companion expects.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TAPBACK_REMOVE_OFFSET;

/// Free-form per-message metadata passed through untouched.
pub type MessageMetadata = serde_json::Map<String, serde_json::Value>;

/// Convert companion float seconds to a UTC timestamp.
pub fn timestamp_from_secs(secs: f64) -> DateTime<Utc> {
    let millis = (secs * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Convert a UTC timestamp to companion float seconds.
pub fn timestamp_to_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// A file attached to a message, stored on the companion's disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub guid: String,
    pub path_on_disk: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// URL preview data attached to an outgoing or incoming message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RichLink {
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub item_type: String,
}

// ---------------------------------------------------------------------------
// Tapbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapbackType {
    Love,
    Like,
    Dislike,
    Laugh,
    Emphasis,
    Question,
}

impl TapbackType {
    const BASE: i32 = 2000;

    pub fn code(self) -> i32 {
        Self::BASE
            + match self {
                Self::Love => 0,
                Self::Like => 1,
                Self::Dislike => 2,
                Self::Laugh => 3,
                Self::Emphasis => 4,
                Self::Question => 5,
            }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code.checked_sub(Self::BASE)? {
            0 => Some(Self::Love),
            1 => Some(Self::Like),
            2 => Some(Self::Dislike),
            3 => Some(Self::Laugh),
            4 => Some(Self::Emphasis),
            5 => Some(Self::Question),
            _ => None,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Love => "\u{2764}\u{fe0f}",
            Self::Like => "\u{1f44d}",
            Self::Dislike => "\u{1f44e}",
            Self::Laugh => "\u{1f602}",
            Self::Emphasis => "\u{203c}\u{fe0f}",
            Self::Question => "\u{2753}",
        }
    }
}

/// A tapback as carried on the wire: a single integer where removals are
/// offset by [`TAPBACK_REMOVE_OFFSET`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Tapback {
    pub kind: TapbackType,
    pub remove: bool,
}

impl TryFrom<i32> for Tapback {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        if let Some(kind) = TapbackType::from_code(code) {
            return Ok(Self { kind, remove: false });
        }
        code.checked_sub(TAPBACK_REMOVE_OFFSET)
            .and_then(TapbackType::from_code)
            .map(|kind| Self { kind, remove: true })
            .ok_or_else(|| format!("unknown tapback type {code}"))
    }
}

impl From<Tapback> for i32 {
    fn from(t: Tapback) -> Self {
        if t.remove {
            t.kind.code() + TAPBACK_REMOVE_OFFSET
        } else {
            t.kind.code()
        }
    }
}

// ---------------------------------------------------------------------------
// Contacts and chats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default, with = "opt_base64", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Vec<u8>>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub user_guid: String,
    #[serde(default)]
    pub primary_identifier: String,
}

impl Contact {
    /// Best human-readable name, falling back to the primary identifier.
    pub fn display_name(&self) -> String {
        if !self.nickname.is_empty() {
            return self.nickname.clone();
        }
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.primary_identifier.clone()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_guid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub no_create_room: bool,
}

// ---------------------------------------------------------------------------
// Companion events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub guid: String,
    pub chat_guid: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub sender_guid: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Native rich-text archive, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributed_body: Option<String>,
    #[serde(default)]
    pub reply_to_guid: String,
    #[serde(default)]
    pub reply_to_part: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tapback: Option<Tapback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_link: Option<RichLink>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn time(&self) -> DateTime<Utc> {
        timestamp_from_secs(self.timestamp)
    }

    /// Decode the embedded rich-text archive, if any.
    pub fn attributed_body_bytes(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.attributed_body
            .as_deref()
            .map(|b64| STANDARD.decode(b64))
            .transpose()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadReceipt {
    #[serde(default)]
    pub sender_guid: String,
    #[serde(default)]
    pub is_from_me: bool,
    pub chat_guid: String,
    pub read_up_to: String,
    #[serde(default)]
    pub read_at: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingNotification {
    pub chat_guid: String,
    pub typing: bool,
}

mod opt_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) if !s.is_empty() => STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
