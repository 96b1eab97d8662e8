//! Command catalogue for the companion channel.
//!
//! Every interaction is a [`Packet`] carrying a [`Command`] name, an optional
//! correlation id and a JSON payload. Requests the bridge issues implement
//! [`IpcRequest`], which binds the command name and the response shape
//! together at compile time. Companion-originated traffic is decoded into
//! [`Notification`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SharedError;
use crate::models::{
    Attachment, ChatInfo, Contact, Message, MessageMetadata, ReadReceipt, RichLink, Tapback,
    TypingNotification,
};
use crate::types::{EventId, RoomId};

// ---------------------------------------------------------------------------
// Command names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Content delivery
    SendMessage,
    SendMedia,
    SendTapback,
    SendReadReceipt,
    SetTyping,
    // Discovery
    GetChats,
    GetChat,
    GetChatAvatar,
    GetContact,
    GetContactList,
    ResolveIdentifier,
    PrepareDm,
    // History
    GetMessagesAfter,
    GetRecentMessages,
    GetMessage,
    // Lifecycle
    PreStartupSync,
    PostStartupSync,
    PingServer,
    UpcomingMessage,
    MessageBridgeResult,
    ChatBridgeResult,
    BackfillResult,
    // Companion events
    Message,
    ReadReceipt,
    Typing,
    Chat,
    Contact,
    // Replies
    Response,
    Error,
}

impl Command {
    pub const ALL: [Command; 29] = [
        Self::SendMessage,
        Self::SendMedia,
        Self::SendTapback,
        Self::SendReadReceipt,
        Self::SetTyping,
        Self::GetChats,
        Self::GetChat,
        Self::GetChatAvatar,
        Self::GetContact,
        Self::GetContactList,
        Self::ResolveIdentifier,
        Self::PrepareDm,
        Self::GetMessagesAfter,
        Self::GetRecentMessages,
        Self::GetMessage,
        Self::PreStartupSync,
        Self::PostStartupSync,
        Self::PingServer,
        Self::UpcomingMessage,
        Self::MessageBridgeResult,
        Self::ChatBridgeResult,
        Self::BackfillResult,
        Self::Message,
        Self::ReadReceipt,
        Self::Typing,
        Self::Chat,
        Self::Contact,
        Self::Response,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::SendMedia => "send_media",
            Self::SendTapback => "send_tapback",
            Self::SendReadReceipt => "send_read_receipt",
            Self::SetTyping => "set_typing",
            Self::GetChats => "get_chats",
            Self::GetChat => "get_chat",
            Self::GetChatAvatar => "get_chat_avatar",
            Self::GetContact => "get_contact",
            Self::GetContactList => "get_contact_list",
            Self::ResolveIdentifier => "resolve_identifier",
            Self::PrepareDm => "prepare_dm",
            Self::GetMessagesAfter => "get_messages_after",
            Self::GetRecentMessages => "get_recent_messages",
            Self::GetMessage => "get_message",
            Self::PreStartupSync => "pre_startup_sync",
            Self::PostStartupSync => "post_startup_sync",
            Self::PingServer => "ping_server",
            Self::UpcomingMessage => "upcoming_message",
            Self::MessageBridgeResult => "message_bridge_result",
            Self::ChatBridgeResult => "chat_bridge_result",
            Self::BackfillResult => "backfill_result",
            Self::Message => "message",
            Self::ReadReceipt => "read_receipt",
            Self::Typing => "typing",
            Self::Chat => "chat",
            Self::Contact => "contact",
            Self::Response => "response",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SharedError::UnknownCommand(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Framing-independent packet
// ---------------------------------------------------------------------------

/// One unit of traffic on the companion channel.
///
/// `command` stays a raw string so that traffic from a newer companion with
/// commands this build does not know can still be logged and skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

impl Packet {
    pub fn new(command: Command, id: Option<u64>, data: Value) -> Self {
        Self {
            command: command.as_str().to_string(),
            id,
            data,
        }
    }

    pub fn command(&self) -> Result<Command, SharedError> {
        self.command.parse()
    }
}

/// Payload of an `error` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Typed requests
// ---------------------------------------------------------------------------

/// A request the bridge sends and the companion answers exactly once.
pub trait IpcRequest: Serialize {
    const COMMAND: Command;
    type Response: DeserializeOwned;
}

/// A one-way packet the bridge sends without expecting a reply.
pub trait IpcNotification: Serialize {
    const COMMAND: Command;
}

/// Response for commands whose reply carries no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

impl<'de> Deserialize<'de> for Ack {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(d)?;
        Ok(Ack)
    }
}

macro_rules! ipc_request {
    ($req:ty, $cmd:ident, $resp:ty) => {
        impl IpcRequest for $req {
            const COMMAND: Command = Command::$cmd;
            type Response = $resp;
        }
    };
}

/// Outcome of a send command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendResponse {
    pub guid: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    pub chat_guid: String,
    pub text: String,
    pub reply_to: String,
    pub reply_to_part: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_link: Option<RichLink>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}
ipc_request!(SendMessageRequest, SendMessage, SendResponse);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendMediaRequest {
    pub chat_guid: String,
    pub text: String,
    #[serde(flatten)]
    pub attachment: Attachment,
    pub reply_to: String,
    pub reply_to_part: i32,
    pub is_audio_message: bool,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}
ipc_request!(SendMediaRequest, SendMedia, SendResponse);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendTapbackRequest {
    pub chat_guid: String,
    pub target_guid: String,
    pub target_part: i32,
    #[serde(rename = "type")]
    pub tapback: Tapback,
}
ipc_request!(SendTapbackRequest, SendTapback, SendResponse);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReadReceiptRequest {
    pub chat_guid: String,
    pub read_up_to: String,
}
ipc_request!(SendReadReceiptRequest, SendReadReceipt, Ack);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetTypingRequest {
    pub chat_guid: String,
    pub typing: bool,
}
ipc_request!(SetTypingRequest, SetTyping, Ack);

/// List chat guids with activity since `min_timestamp` (float seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetChatsRequest {
    pub min_timestamp: f64,
}
ipc_request!(GetChatsRequest, GetChats, Vec<String>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetChatRequest {
    pub chat_guid: String,
    #[serde(default)]
    pub thread_id: String,
}
ipc_request!(GetChatRequest, GetChat, Option<ChatInfo>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetChatAvatarRequest {
    pub chat_guid: String,
    #[serde(default)]
    pub thread_id: String,
}
ipc_request!(GetChatAvatarRequest, GetChatAvatar, Option<Attachment>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetContactRequest {
    pub user_guid: String,
}
ipc_request!(GetContactRequest, GetContact, Option<Contact>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetContactListRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetContactListResponse {
    #[serde(default)]
    pub contacts: Vec<Contact>,
}
ipc_request!(GetContactListRequest, GetContactList, GetContactListResponse);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveIdentifierRequest {
    pub identifier: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveIdentifierResponse {
    pub guid: String,
}
ipc_request!(ResolveIdentifierRequest, ResolveIdentifier, ResolveIdentifierResponse);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareDmRequest {
    pub guid: String,
}
ipc_request!(PrepareDmRequest, PrepareDm, Ack);

/// Messages newer than `timestamp`, optionally tagged with a backfill session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetMessagesAfterRequest {
    pub chat_guid: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backfill_id: String,
}
ipc_request!(GetMessagesAfterRequest, GetMessagesAfter, Vec<Message>);

/// The `limit` most recent messages, optionally tagged with a backfill session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetRecentMessagesRequest {
    pub chat_guid: String,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backfill_id: String,
}
ipc_request!(GetRecentMessagesRequest, GetRecentMessages, Vec<Message>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetMessageRequest {
    pub guid: String,
}
ipc_request!(GetMessageRequest, GetMessage, Option<Message>);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreStartupSyncRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupSyncResponse {
    #[serde(default)]
    pub skip_sync: bool,
}
ipc_request!(PreStartupSyncRequest, PreStartupSync, StartupSyncResponse);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostStartupSyncRequest {}
ipc_request!(PostStartupSyncRequest, PostStartupSync, Ack);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingServerRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PingServerResponse {
    #[serde(rename = "start_ts")]
    pub start: f64,
    #[serde(rename = "server_ts")]
    pub server: f64,
    #[serde(rename = "end_ts")]
    pub end: f64,
}
ipc_request!(PingServerRequest, PingServer, PingServerResponse);

/// Tells the companion a bridged event for an outgoing message is coming.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpcomingMessage {
    pub event_id: EventId,
}

impl IpcNotification for UpcomingMessage {
    const COMMAND: Command = Command::UpcomingMessage;
}

// ---------------------------------------------------------------------------
// Asynchronous completion notifications
// ---------------------------------------------------------------------------

/// Final outcome of a previously requested message send.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBridgeResult {
    pub chat_guid: String,
    #[serde(rename = "message_guid")]
    pub guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    pub success: bool,
}

/// A chat now has a federated room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatBridgeResult {
    pub chat_guid: String,
    pub mxid: RoomId,
}

/// Outcome of a backfill session. One native message may produce several
/// bridged events, so each message guid maps to a list of event ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillResult {
    pub chat_guid: String,
    pub backfill_id: String,
    pub success: bool,
    #[serde(default)]
    pub message_ids: HashMap<String, Vec<EventId>>,
}

impl BackfillResult {
    /// Total number of bridged events produced by the batch.
    pub fn event_count(&self) -> usize {
        self.message_ids.values().map(Vec::len).sum()
    }
}

/// Traffic initiated by the companion rather than answering a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Message(Message),
    ReadReceipt(ReadReceipt),
    Typing(TypingNotification),
    Chat(ChatInfo),
    Contact(Contact),
    MessageBridgeResult(MessageBridgeResult),
    ChatBridgeResult(ChatBridgeResult),
    BackfillResult(BackfillResult),
}

impl Notification {
    /// Decode `data` for a companion-originated command.
    ///
    /// Returns `Ok(None)` for commands that are never sent unprompted by the
    /// companion (requests, replies).
    pub fn parse(command: Command, data: Value) -> Result<Option<Self>, SharedError> {
        let parsed = match command {
            Command::Message => Self::Message(serde_json::from_value(data)?),
            Command::ReadReceipt => Self::ReadReceipt(serde_json::from_value(data)?),
            Command::Typing => Self::Typing(serde_json::from_value(data)?),
            Command::Chat => Self::Chat(serde_json::from_value(data)?),
            Command::Contact => Self::Contact(serde_json::from_value(data)?),
            Command::MessageBridgeResult => {
                Self::MessageBridgeResult(serde_json::from_value(data)?)
            }
            Command::ChatBridgeResult => Self::ChatBridgeResult(serde_json::from_value(data)?),
            Command::BackfillResult => Self::BackfillResult(serde_json::from_value(data)?),
            Command::SendMessage
            | Command::SendMedia
            | Command::SendTapback
            | Command::SendReadReceipt
            | Command::SetTyping
            | Command::GetChats
            | Command::GetChat
            | Command::GetChatAvatar
            | Command::GetContact
            | Command::GetContactList
            | Command::ResolveIdentifier
            | Command::PrepareDm
            | Command::GetMessagesAfter
            | Command::GetRecentMessages
            | Command::GetMessage
            | Command::PreStartupSync
            | Command::PostStartupSync
            | Command::PingServer
            | Command::UpcomingMessage
            | Command::Response
            | Command::Error => return Ok(None),
        };
        Ok(Some(parsed))
    }

    /// Chat the notification belongs to.
    pub fn chat_guid(&self) -> &str {
        match self {
            Self::Message(m) => &m.chat_guid,
            Self::ReadReceipt(r) => &r.chat_guid,
            Self::Typing(t) => &t.chat_guid,
            Self::Chat(c) => &c.chat_guid,
            Self::Contact(c) => &c.user_guid,
            Self::MessageBridgeResult(r) => &r.chat_guid,
            Self::ChatBridgeResult(r) => &r.chat_guid,
            Self::BackfillResult(r) => &r.chat_guid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TapbackType;

    #[test]
    fn test_command_names_are_unique_and_parse_back() {
        let mut seen = std::collections::HashSet::new();
        for cmd in Command::ALL {
            assert!(seen.insert(cmd.as_str()), "duplicate name {}", cmd);
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
        }
        assert!("launch_rockets".parse::<Command>().is_err());
    }

    #[test]
    fn test_send_media_flattens_attachment() {
        let req = SendMediaRequest {
            chat_guid: "iMessage;-;+15551234567".into(),
            attachment: Attachment {
                guid: "at_0".into(),
                path_on_disk: "/tmp/voice.caf".into(),
                file_name: "voice.caf".into(),
                mime_type: "audio/x-caf".into(),
            },
            is_audio_message: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["path_on_disk"], "/tmp/voice.caf");
        assert_eq!(value["mime_type"], "audio/x-caf");
        assert_eq!(value["is_audio_message"], true);
        assert!(value.get("attachment").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_tapback_request_wire_shape() {
        let req = SendTapbackRequest {
            chat_guid: "iMessage;+;chat1".into(),
            target_guid: "msg-1".into(),
            target_part: 1,
            tapback: Tapback {
                kind: TapbackType::Love,
                remove: true,
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], 3000);
        assert_eq!(value["target_part"], 1);
    }

    #[test]
    fn test_ack_accepts_any_payload() {
        assert!(serde_json::from_value::<Ack>(Value::Null).is_ok());
        assert!(serde_json::from_str::<Ack>(r#"{"ok":true}"#).is_ok());
    }

    #[test]
    fn test_parse_backfill_result() {
        let data = serde_json::json!({
            "chat_guid": "iMessage;-;+15551234567",
            "backfill_id": "bf-1",
            "success": true,
            "message_ids": {
                "msg-1": ["$a", "$b"],
                "msg-2": ["$c"]
            }
        });
        let parsed = Notification::parse(Command::BackfillResult, data)
            .unwrap()
            .unwrap();
        match parsed {
            Notification::BackfillResult(result) => {
                assert_eq!(result.event_count(), 3);
                assert_eq!(result.message_ids["msg-1"], vec!["$a", "$b"]);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn test_parse_message_bridge_result_failure_is_terminal_value() {
        let data = serde_json::json!({
            "chat_guid": "iMessage;-;+15551234567",
            "message_guid": "msg-9",
            "success": false
        });
        let parsed = Notification::parse(Command::MessageBridgeResult, data)
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed,
            Notification::MessageBridgeResult(MessageBridgeResult {
                chat_guid: "iMessage;-;+15551234567".into(),
                guid: "msg-9".into(),
                event_id: None,
                success: false,
            })
        );
    }

    #[test]
    fn test_requests_are_not_notifications() {
        assert!(Notification::parse(Command::GetChats, Value::Null)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_packet_omits_missing_id() {
        let packet = Packet::new(Command::UpcomingMessage, None, serde_json::json!({"event_id": "$x"}));
        let text = serde_json::to_string(&packet).unwrap();
        assert_eq!(text, r#"{"command":"upcoming_message","data":{"event_id":"$x"}}"#);
        let back: Packet = serde_json::from_str(&text).unwrap();
        assert_eq!(back.command().unwrap(), Command::UpcomingMessage);
    }
}
