//! Routes companion traffic onto portals.
//!
//! The router owns the portal store and a handle to the companion client.
//! Everything that reaches the federated side is logged at the point it
//! would be handed off.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use bluebridge_ipc::CompanionClient;
use bluebridge_richtext::Decoder;
use bluebridge_shared::models::{timestamp_to_secs, Attachment, ChatInfo, Message, Tapback};
use bluebridge_shared::protocol::{
    BackfillResult, ChatBridgeResult, GetChatAvatarRequest, GetChatRequest, GetChatsRequest,
    MessageBridgeResult, Notification, PostStartupSyncRequest, PreStartupSyncRequest,
    SendMessageRequest, SendResponse,
};
use bluebridge_shared::{Identifier, RoomId};
use bluebridge_store::{Database, Portal};

use crate::config::BridgeConfig;

/// A companion message ready to be posted into its room.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgedMessage {
    pub chat_id: String,
    pub guid: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub tapback: Option<Tapback>,
}

/// One line of the outgoing feed: `{"room_id": "...", "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutgoingText {
    pub room_id: RoomId,
    pub text: String,
}

impl OutgoingText {
    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

pub struct Router {
    db: Mutex<Database>,
    client: Arc<CompanionClient>,
    decoder: Option<Arc<Decoder>>,
    backfill_limit: u32,
    initial_sync_days: u32,
    result_timeout: Duration,
}

impl Router {
    pub fn new(
        db: Database,
        client: Arc<CompanionClient>,
        decoder: Option<Arc<Decoder>>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            db: Mutex::new(db),
            client,
            decoder,
            backfill_limit: config.backfill_limit,
            initial_sync_days: config.initial_sync_days,
            result_timeout: config.request_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Bring the portal table up to date with the companion's recent chats.
    pub async fn startup_sync(&self) -> anyhow::Result<()> {
        let sync = self.client.request(&PreStartupSyncRequest {}).await?;

        if sync.skip_sync {
            info!("Companion asked to skip startup sync");
        } else {
            let since = Utc::now() - chrono::Duration::days(i64::from(self.initial_sync_days));
            let chats = self
                .client
                .request(&GetChatsRequest {
                    min_timestamp: timestamp_to_secs(since),
                })
                .await?;
            info!(count = chats.len(), since = %since, "Syncing recent chats");

            for chat_guid in chats {
                if let Err(e) = self.sync_chat(&chat_guid).await {
                    warn!(chat_id = %chat_guid, error = %e, "Failed to sync chat");
                }
            }
        }

        self.client.request(&PostStartupSyncRequest {}).await?;
        let total = self.with_db(|db| db.count_portals())?;
        info!(portals = total, "Startup sync complete");
        Ok(())
    }

    async fn sync_chat(&self, chat_guid: &str) -> anyhow::Result<()> {
        let (mut portal, created) = self.ensure_portal(chat_guid)?;

        let info = self
            .client
            .request(&GetChatRequest {
                chat_guid: portal.chat_id.clone(),
                thread_id: portal.thread_id.clone(),
            })
            .await?;
        if let Some(info) = info {
            if info.no_create_room && !portal.has_room() {
                debug!(chat_id = %portal.chat_id, "Companion asked not to create a room");
                return Ok(());
            }
            self.apply_chat_info(&mut portal, &info);
        }

        if let Err(e) = self.sync_avatar(&mut portal).await {
            warn!(chat_id = %portal.chat_id, error = %e, "Failed to sync avatar");
        }

        if created || !portal.has_room() {
            self.backfill(&portal).await?;
        }
        Ok(())
    }

    async fn backfill(&self, portal: &Portal) -> anyhow::Result<()> {
        let session = self
            .client
            .backfill_recent(&portal.chat_id, self.backfill_limit)
            .await?;
        info!(
            chat_id = %portal.chat_id,
            backfill_id = %session.backfill_id,
            messages = session.messages.len(),
            "Fetched history for backfill"
        );

        let chat_id = portal.chat_id.clone();
        let timeout = self.result_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, session.result).await {
                Ok(Ok(result)) => log_backfill_result(&result),
                Ok(Err(_)) => debug!(chat_id = %chat_id, "Backfill result waiter dropped"),
                Err(_) => debug!(chat_id = %chat_id, "No backfill result before timeout"),
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Companion notifications
    // ------------------------------------------------------------------

    /// Handle one notification nobody explicitly waited for.
    pub async fn handle(&self, notification: Notification) {
        let chat_id = notification.chat_guid().to_string();
        let outcome = match notification {
            Notification::Message(message) => self.handle_message(message).await.map(|_| ()),
            Notification::Chat(info) => self.handle_chat(&info).map(|_| ()),
            Notification::ChatBridgeResult(result) => {
                self.bind_room(&result);
                Ok(())
            }
            Notification::BackfillResult(result) => {
                log_backfill_result(&result);
                Ok(())
            }
            Notification::MessageBridgeResult(result) => {
                log_message_result(&result);
                Ok(())
            }
            Notification::ReadReceipt(receipt) => {
                debug!(
                    chat_id = %receipt.chat_guid,
                    read_up_to = %receipt.read_up_to,
                    from_me = receipt.is_from_me,
                    "Read receipt"
                );
                Ok(())
            }
            Notification::Typing(typing) => {
                debug!(chat_id = %typing.chat_guid, typing = typing.typing, "Typing notification");
                Ok(())
            }
            Notification::Contact(contact) => {
                debug!(user = %contact.user_guid, name = %contact.display_name(), "Contact updated");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            warn!(chat_id = %chat_id, error = %e, "Failed to handle companion notification");
        }
    }

    /// Resolve the message's portal and prepare it for posting.
    ///
    /// Returns `None` when the chat identifier is not a valid native id.
    pub async fn handle_message(&self, message: Message) -> anyhow::Result<Option<BridgedMessage>> {
        if let Err(e) = Identifier::parse(&message.chat_guid) {
            warn!(chat_id = %message.chat_guid, error = %e, "Dropping message for invalid chat id");
            return Ok(None);
        }

        let (mut portal, _) = self.ensure_portal(&message.chat_guid)?;
        if portal.chat_id != message.chat_guid {
            debug!(from = %message.chat_guid, to = %portal.chat_id, "Message for merged chat");
        }

        if portal.is_private_chat()
            && !message.is_from_me
            && !message.sender_guid.is_empty()
            && portal.last_seen_handle != message.sender_guid
        {
            portal.last_seen_handle = message.sender_guid.clone();
            self.with_db(|db| db.update_portal(&portal, None));
        }

        let (text, attachments) = self.render_body(&message).await;
        let bridged = BridgedMessage {
            chat_id: portal.chat_id.clone(),
            guid: message.guid.clone(),
            text,
            attachments,
            tapback: message.tapback,
        };

        match (&portal.room_id, &bridged.tapback) {
            (Some(room), Some(tapback)) => info!(
                room_id = %room,
                guid = %bridged.guid,
                target = %message.reply_to_guid,
                reaction = tapback.kind.emoji(),
                remove = tapback.remove,
                "Bridging tapback"
            ),
            (Some(room), None) => info!(
                room_id = %room,
                guid = %bridged.guid,
                attachments = bridged.attachments.len(),
                "Bridging message"
            ),
            (None, _) => debug!(
                chat_id = %portal.chat_id,
                guid = %bridged.guid,
                "Portal has no room yet, message queued for room creation"
            ),
        }
        Ok(Some(bridged))
    }

    /// Text and ordered attachments of a message.
    ///
    /// Falls back to the plain fields whenever the rich-text body is absent
    /// or cannot be decoded.
    async fn render_body(&self, message: &Message) -> (String, Vec<Attachment>) {
        let fallback = || (message.text.clone(), message.attachments.clone());

        let Some(decoder) = self.decoder.clone() else {
            return fallback();
        };
        let blob = match message.attributed_body_bytes() {
            Ok(Some(blob)) => blob,
            Ok(None) => return fallback(),
            Err(e) => {
                warn!(guid = %message.guid, error = %e, "Attributed body is not valid base64");
                return fallback();
            }
        };

        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&blob)).await;
        match decoded {
            Ok(Ok(body)) => {
                let text = body.plain_text();
                let text = if text.is_empty() { message.text.clone() } else { text };
                let attachments = body
                    .sort_attachments(&message.attachments)
                    .into_iter()
                    .cloned()
                    .collect();
                (text, attachments)
            }
            Ok(Err(e)) => {
                warn!(guid = %message.guid, error = %e, "Failed to decode attributed body");
                fallback()
            }
            Err(e) => {
                warn!(guid = %message.guid, error = %e, "Decoder task failed");
                fallback()
            }
        }
    }

    /// Apply a `chat` event to its portal.
    pub fn handle_chat(&self, info: &ChatInfo) -> anyhow::Result<Portal> {
        let (mut portal, _) = self.ensure_portal(&info.chat_guid)?;
        self.apply_chat_info(&mut portal, info);
        Ok(portal)
    }

    fn apply_chat_info(&self, portal: &mut Portal, info: &ChatInfo) -> bool {
        let mut changed = false;
        if !info.title.is_empty() && portal.name != info.title {
            info!(chat_id = %portal.chat_id, name = %info.title, "Chat renamed");
            portal.name = info.title.clone();
            changed = true;
        }
        if !info.thread_id.is_empty() && portal.thread_id != info.thread_id {
            portal.thread_id = info.thread_id.clone();
            changed = true;
        }
        changed && self.with_db(|db| db.update_portal(portal, None))
    }

    /// Record the room the companion created for a chat.
    pub fn bind_room(&self, result: &ChatBridgeResult) -> bool {
        self.with_db(|db| {
            let mut portal = match db.get_portal(&result.chat_guid) {
                Ok(Some(portal)) => portal,
                Ok(None) => {
                    warn!(chat_id = %result.chat_guid, room_id = %result.mxid, "Room created for unknown chat");
                    return false;
                }
                Err(e) => {
                    warn!(chat_id = %result.chat_guid, error = %e, "Failed to load portal");
                    return false;
                }
            };

            if portal.room_id.as_ref() == Some(&result.mxid) {
                return true;
            }
            if let Some(previous) = &portal.room_id {
                info!(chat_id = %portal.chat_id, old = %previous, new = %result.mxid, "Portal moved to new room");
            }
            portal.room_id = Some(result.mxid.clone());
            db.update_portal(&portal, None)
        })
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Handle one line of the outgoing feed. Blank lines are skipped.
    pub async fn handle_outgoing(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let outgoing = match OutgoingText::parse_line(line) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed outgoing line");
                return;
            }
        };
        match self.send_text(&outgoing.room_id, &outgoing.text).await {
            Ok(Some(sent)) => {
                info!(room_id = %outgoing.room_id, guid = %sent.guid, "Sent outgoing text")
            }
            Ok(None) => {}
            Err(e) => warn!(room_id = %outgoing.room_id, error = %e, "Failed to send outgoing text"),
        }
    }

    /// Send a text from a room to its chat.
    ///
    /// Returns `None` when the room is not bridged.
    pub async fn send_text(
        &self,
        room_id: &RoomId,
        text: &str,
    ) -> anyhow::Result<Option<SendResponse>> {
        let Some(portal) = self.with_db(|db| db.get_portal_by_room_id(room_id))? else {
            debug!(room_id = %room_id, "Ignoring message for unbridged room");
            return Ok(None);
        };

        let response = self
            .client
            .request(&SendMessageRequest {
                chat_guid: portal.chat_id.clone(),
                text: text.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("sending to {}", portal.chat_id))?;

        let result = self.client.expect_message_result(&portal.chat_id, &response.guid);
        let timeout = self.result_timeout;
        tokio::spawn(async move {
            if let Ok(Ok(result)) = tokio::time::timeout(timeout, result).await {
                log_message_result(&result);
            }
        });
        Ok(Some(response))
    }

    // ------------------------------------------------------------------
    // Avatars
    // ------------------------------------------------------------------

    /// Refresh the portal's avatar hash from the companion.
    ///
    /// Returns whether the stored hash changed.
    pub async fn sync_avatar(&self, portal: &mut Portal) -> anyhow::Result<bool> {
        let avatar = self
            .client
            .request(&GetChatAvatarRequest {
                chat_guid: portal.chat_id.clone(),
                thread_id: portal.thread_id.clone(),
            })
            .await?;

        let changed = match avatar {
            Some(attachment) => {
                let bytes = tokio::fs::read(&attachment.path_on_disk)
                    .await
                    .with_context(|| format!("reading avatar {}", attachment.path_on_disk))?;
                apply_avatar(portal, Some(&bytes))
            }
            None => apply_avatar(portal, None),
        };

        if changed {
            self.with_db(|db| db.update_portal(portal, None));
            debug!(chat_id = %portal.chat_id, hash = ?portal.avatar_hash_hex(), "Avatar changed");
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Resolve a chat id, creating and inserting its portal on first contact.
    fn ensure_portal(&self, chat_id: &str) -> anyhow::Result<(Portal, bool)> {
        self.with_db(|db| -> anyhow::Result<(Portal, bool)> {
            if let Some(portal) = db.get_portal(chat_id)? {
                return Ok((portal, false));
            }
            let portal = Portal::new(chat_id);
            if !db.insert_portal(&portal, None) {
                anyhow::bail!("could not create portal for {chat_id}");
            }
            info!(chat_id = %chat_id, "Created portal");
            Ok((portal, true))
        })
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }
}

/// Update `portal.avatar_hash` from fetched avatar bytes.
///
/// Returns whether the hash changed.
pub fn apply_avatar(portal: &mut Portal, avatar: Option<&[u8]>) -> bool {
    let hash = avatar.map(|bytes| *blake3::hash(bytes).as_bytes());
    if portal.avatar_hash == hash {
        return false;
    }
    portal.avatar_hash = hash;
    if hash.is_none() {
        portal.avatar_url.clear();
    }
    true
}

fn log_message_result(result: &MessageBridgeResult) {
    if result.success {
        debug!(chat_id = %result.chat_guid, guid = %result.guid, "Message delivered");
    } else {
        warn!(chat_id = %result.chat_guid, guid = %result.guid, "Companion reported failed delivery");
    }
}

fn log_backfill_result(result: &BackfillResult) {
    if result.success {
        info!(
            chat_id = %result.chat_guid,
            backfill_id = %result.backfill_id,
            messages = result.message_ids.len(),
            events = result.event_count(),
            "Backfill finished"
        );
    } else {
        warn!(
            chat_id = %result.chat_guid,
            backfill_id = %result.backfill_id,
            "Companion reported failed backfill"
        );
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bluebridge_ipc::ClientConfig;
    use bluebridge_richtext::{ContextPool, NativeContext};
    use bluebridge_shared::protocol::{Command, Packet};
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;

    /// Echoes JSON archives and rejects everything else.
    struct EchoNative;

    impl NativeContext for EchoNative {
        fn decode_attributed_string(&mut self, encoded: &str) -> String {
            let bytes = STANDARD.decode(encoded).unwrap_or_default();
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if text.starts_with('{') {
                text
            } else {
                "unarchive failed".to_string()
            }
        }
    }

    /// Start a router whose companion answers with `reply(command, data)`.
    fn router_with(
        decoder: Option<Arc<Decoder>>,
        reply: impl Fn(Command, &Value) -> Value + Send + 'static,
    ) -> Router {
        let (bridge_end, companion_end) = tokio::io::duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_end);
        let (companion_read, mut companion_write) = tokio::io::split(companion_end);

        tokio::spawn(async move {
            let mut lines = BufReader::new(companion_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let packet: Packet = serde_json::from_str(&line).unwrap();
                let Ok(command) = packet.command() else { continue };
                if packet.id.is_none() {
                    continue;
                }
                let answer = Packet::new(Command::Response, packet.id, reply(command, &packet.data));
                let mut out = serde_json::to_vec(&answer).unwrap();
                out.push(b'\n');
                if companion_write.write_all(&out).await.is_err() {
                    break;
                }
            }
        });

        let (client, _events) =
            CompanionClient::start(bridge_read, bridge_write, ClientConfig::default());
        let db = Database::open_in_memory().unwrap();
        Router::new(db, client, decoder, &BridgeConfig::default())
    }

    fn router() -> Router {
        router_with(None, |_, _| Value::Null)
    }

    fn message(chat: &str, guid: &str) -> Message {
        Message {
            guid: guid.into(),
            chat_guid: chat.into(),
            text: "hello".into(),
            ..Default::default()
        }
    }

    fn attachment(guid: &str) -> Attachment {
        Attachment {
            guid: guid.into(),
            path_on_disk: format!("/tmp/{guid}.jpg"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_message_creates_portal_once() {
        let router = router();
        let chat = "iMessage;-;+15551234567";

        let first = router.handle_message(message(chat, "m1")).await.unwrap().unwrap();
        router.handle_message(message(chat, "m2")).await.unwrap();

        assert_eq!(first.chat_id, chat);
        assert_eq!(first.text, "hello");
        assert_eq!(router.with_db(|db| db.count_portals()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_chat_id_is_dropped() {
        let router = router();
        assert!(router
            .handle_message(message("not-a-chat", "m1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(router.with_db(|db| db.count_portals()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_for_merged_id_lands_in_target() {
        let router = router();
        router.with_db(|db| {
            assert!(db.insert_portal(&Portal::new("iMessage;-;user@example.com"), None));
            assert!(db.merge_chats("SMS;-;+15551234567", "iMessage;-;user@example.com", None));
        });

        let bridged = router
            .handle_message(message("SMS;-;+15551234567", "m1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bridged.chat_id, "iMessage;-;user@example.com");
        assert_eq!(router.with_db(|db| db.count_portals()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_private_chat_tracks_last_seen_handle() {
        let router = router();
        let mut msg = message("iMessage;-;+15551234567", "m1");
        msg.sender_guid = "iMessage;-;user@example.com".into();
        router.handle_message(msg).await.unwrap();

        let portal = router
            .with_db(|db| db.get_portal("iMessage;-;+15551234567"))
            .unwrap()
            .unwrap();
        assert_eq!(portal.last_seen_handle, "iMessage;-;user@example.com");
    }

    #[tokio::test]
    async fn test_attributed_body_orders_attachments() {
        let decoder = Arc::new(Decoder::new(ContextPool::single(EchoNative)));
        let router = router_with(Some(decoder), |_, _| Value::Null);

        let body = json!({
            "content": "\u{fffc}\u{fffc}caption",
            "attributes": [
                {"location": 0, "length": 1, "values": {"__kIMFileTransferGUIDAttributeName": "f2"}},
                {"location": 1, "length": 1, "values": {"__kIMFileTransferGUIDAttributeName": "f1"}}
            ]
        });
        let mut msg = message("iMessage;+;chat1", "m1");
        msg.attachments = vec![attachment("f1"), attachment("f2"), attachment("f3")];
        msg.attributed_body = Some(STANDARD.encode(body.to_string()));

        let bridged = router.handle_message(msg).await.unwrap().unwrap();
        let order: Vec<&str> = bridged.attachments.iter().map(|a| a.guid.as_str()).collect();
        assert_eq!(order, vec!["f2", "f1"]);
        assert_eq!(bridged.text, "caption");
    }

    #[tokio::test]
    async fn test_undecodable_body_falls_back_to_plain_fields() {
        let decoder = Arc::new(Decoder::new(ContextPool::single(EchoNative)));
        let router = router_with(Some(decoder), |_, _| Value::Null);

        let mut msg = message("iMessage;+;chat1", "m1");
        msg.attachments = vec![attachment("f1"), attachment("f2")];
        msg.attributed_body = Some(STANDARD.encode(b"bplist00"));

        let bridged = router.handle_message(msg).await.unwrap().unwrap();
        assert_eq!(bridged.text, "hello");
        assert_eq!(bridged.attachments.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_event_updates_portal() {
        let router = router();
        let info = ChatInfo {
            chat_guid: "iMessage;+;chat1".into(),
            title: "Climbing".into(),
            thread_id: "thread-9".into(),
            ..Default::default()
        };
        router.handle_chat(&info).unwrap();

        let stored = router
            .with_db(|db| db.get_portal("iMessage;+;chat1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "Climbing");
        assert_eq!(stored.thread_id, "thread-9");
    }

    #[tokio::test]
    async fn test_chat_bridge_result_binds_room() {
        let router = router();
        router.handle_chat(&ChatInfo {
            chat_guid: "iMessage;+;chat1".into(),
            ..Default::default()
        })
        .unwrap();

        let room = RoomId::new("!abc:example.org").unwrap();
        router
            .handle(Notification::ChatBridgeResult(ChatBridgeResult {
                chat_guid: "iMessage;+;chat1".into(),
                mxid: room.clone(),
            }))
            .await;

        let bound = router
            .with_db(|db| db.get_portal_by_room_id(&room))
            .unwrap()
            .unwrap();
        assert_eq!(bound.chat_id, "iMessage;+;chat1");

        // A room already bound elsewhere is refused.
        router.handle_chat(&ChatInfo {
            chat_guid: "iMessage;+;chat2".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(!router.bind_room(&ChatBridgeResult {
            chat_guid: "iMessage;+;chat2".into(),
            mxid: room,
        }));
    }

    #[tokio::test]
    async fn test_bind_room_for_unknown_chat() {
        let router = router();
        assert!(!router.bind_room(&ChatBridgeResult {
            chat_guid: "iMessage;+;ghost".into(),
            mxid: RoomId::new("!ghost:example.org").unwrap(),
        }));
    }

    #[test]
    fn test_apply_avatar() {
        let mut portal = Portal::new("iMessage;+;chat1");
        assert!(apply_avatar(&mut portal, Some(b"png bytes")));
        assert_eq!(portal.avatar_hash, Some(*blake3::hash(b"png bytes").as_bytes()));
        assert!(!apply_avatar(&mut portal, Some(b"png bytes")));
        assert!(apply_avatar(&mut portal, Some(b"other bytes")));
        assert!(apply_avatar(&mut portal, None));
        assert_eq!(portal.avatar_hash, None);
        assert!(!apply_avatar(&mut portal, None));
    }

    #[tokio::test]
    async fn test_sync_avatar_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        std::fs::write(&path, b"avatar").unwrap();
        let path = path.to_string_lossy().into_owned();

        let router = router_with(None, move |command, _| match command {
            Command::GetChatAvatar => json!({"guid": "av1", "path_on_disk": path}),
            _ => Value::Null,
        });
        let (mut portal, _) = router.ensure_portal("iMessage;+;chat1").unwrap();

        assert!(router.sync_avatar(&mut portal).await.unwrap());
        assert!(!router.sync_avatar(&mut portal).await.unwrap());
        let stored = router
            .with_db(|db| db.get_portal("iMessage;+;chat1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.avatar_hash, Some(*blake3::hash(b"avatar").as_bytes()));
    }

    #[tokio::test]
    async fn test_startup_sync_creates_portals() {
        let router = router_with(None, |command, data| match command {
            Command::PreStartupSync => json!({"skip_sync": false}),
            Command::GetChats => {
                assert!(data["min_timestamp"].as_f64().unwrap() > 0.0);
                json!(["iMessage;-;+15551234567", "iMessage;+;chat42"])
            }
            Command::GetChat if data["chat_guid"] == "iMessage;+;chat42" => {
                json!({"chat_guid": "iMessage;+;chat42", "title": "Book club"})
            }
            Command::GetRecentMessages => json!([]),
            Command::PostStartupSync => json!({}),
            _ => Value::Null,
        });

        router.startup_sync().await.unwrap();

        router.with_db(|db| {
            assert_eq!(db.count_portals().unwrap(), 2);
            let group = db.get_portal("iMessage;+;chat42").unwrap().unwrap();
            assert_eq!(group.name, "Book club");
            assert_eq!(db.list_private_chat_portals().unwrap().len(), 1);
        });
    }

    #[tokio::test]
    async fn test_startup_sync_can_be_skipped() {
        let router = router_with(None, |command, _| match command {
            Command::PreStartupSync => json!({"skip_sync": true}),
            Command::GetChats => panic!("chats requested despite skip_sync"),
            _ => json!({}),
        });
        router.startup_sync().await.unwrap();
        assert_eq!(router.with_db(|db| db.count_portals()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_text_resolves_room() {
        let router = router_with(None, |command, data| match command {
            Command::SendMessage => {
                assert_eq!(data["chat_guid"], "iMessage;+;chat1");
                json!({"guid": "sent-1", "service": "iMessage", "timestamp": 1700000000.0})
            }
            _ => Value::Null,
        });
        let room = RoomId::new("!room:example.org").unwrap();
        router.with_db(|db| {
            let mut portal = Portal::new("iMessage;+;chat1");
            portal.room_id = Some(room.clone());
            assert!(db.insert_portal(&portal, None));
        });

        let sent = router.send_text(&room, "hi").await.unwrap().unwrap();
        assert_eq!(sent.guid, "sent-1");

        let elsewhere = RoomId::new("!other:example.org").unwrap();
        assert!(router.send_text(&elsewhere, "hi").await.unwrap().is_none());
    }

    #[test]
    fn test_outgoing_line_parsing() {
        let parsed = OutgoingText::parse_line(r#"{"room_id": "!room:example.org", "text": "hi"}"#)
            .unwrap();
        assert_eq!(parsed.room_id.as_str(), "!room:example.org");
        assert_eq!(parsed.text, "hi");

        assert!(OutgoingText::parse_line(r#"{"room_id": "", "text": "hi"}"#).is_err());
        assert!(OutgoingText::parse_line(r#"{"room_id": "!room:example.org"}"#).is_err());
        assert!(OutgoingText::parse_line("hi").is_err());
    }

    #[tokio::test]
    async fn test_outgoing_feed_reaches_companion() {
        let (sent_tx, mut sent_rx) = tokio::sync::mpsc::unbounded_channel();
        let router = router_with(None, move |command, data| match command {
            Command::SendMessage => {
                let _ = sent_tx.send((data["chat_guid"].clone(), data["text"].clone()));
                json!({"guid": "sent-1", "service": "iMessage", "timestamp": 1700000000.0})
            }
            _ => Value::Null,
        });
        router.with_db(|db| {
            let mut portal = Portal::new("iMessage;+;chat1");
            portal.room_id = RoomId::new("!room:example.org");
            assert!(db.insert_portal(&portal, None));
        });

        router.handle_outgoing("").await;
        router.handle_outgoing("not json").await;
        router
            .handle_outgoing(r#"{"room_id": "!other:example.org", "text": "lost"}"#)
            .await;
        router
            .handle_outgoing(r#"{"room_id": "!room:example.org", "text": "hello"}"#)
            .await;

        let (chat, text) = sent_rx.recv().await.unwrap();
        assert_eq!(chat, "iMessage;+;chat1");
        assert_eq!(text, "hello");
        assert!(sent_rx.try_recv().is_err());
    }
}
