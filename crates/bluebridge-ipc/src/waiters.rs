//! Correlation of asynchronous completion notifications.
//!
//! `message_bridge_result`, `chat_bridge_result` and `backfill_result`
//! arrive unprompted, possibly long after the request that started the work
//! was answered. They are matched by the identifiers they embed, never by
//! request id. A result that arrives before anyone registered for it is
//! kept in a small bounded cache so a late `expect_*` still sees it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use bluebridge_shared::protocol::{
    BackfillResult, ChatBridgeResult, MessageBridgeResult, Notification,
};
use tokio::sync::oneshot;

/// Unclaimed results kept per kind.
const EARLY_RESULT_CAPACITY: usize = 128;

struct Table<K, V> {
    waiting: HashMap<K, oneshot::Sender<V>>,
    early: VecDeque<(K, V)>,
}

impl<K: Eq + Hash + Clone, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            early: VecDeque::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> Table<K, V> {
    fn register(&mut self, key: K) -> oneshot::Receiver<V> {
        let (tx, rx) = oneshot::channel();
        if let Some(pos) = self.early.iter().position(|(k, _)| *k == key) {
            if let Some((_, value)) = self.early.remove(pos) {
                let _ = tx.send(value);
                return rx;
            }
        }
        self.waiting.insert(key, tx);
        rx
    }

    /// Hand `value` to its waiter. Gives it back if nobody claimed it.
    fn complete(&mut self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        if let Some(tx) = self.waiting.remove(&key) {
            match tx.send(value) {
                Ok(()) => return None,
                // Receiver gave up waiting; treat as unclaimed.
                Err(value) => return Some(value),
            }
        }
        if self.early.len() == EARLY_RESULT_CAPACITY {
            self.early.pop_front();
        }
        self.early.push_back((key, value.clone()));
        Some(value)
    }

    fn len(&self) -> usize {
        self.waiting.len()
    }
}

#[derive(Default)]
pub(crate) struct ResultWaiters {
    messages: Table<(String, String), MessageBridgeResult>,
    chats: Table<String, ChatBridgeResult>,
    backfills: Table<String, BackfillResult>,
}

impl ResultWaiters {
    pub(crate) fn expect_message(
        &mut self,
        chat_guid: &str,
        message_guid: &str,
    ) -> oneshot::Receiver<MessageBridgeResult> {
        self.messages
            .register((chat_guid.to_string(), message_guid.to_string()))
    }

    pub(crate) fn expect_chat(&mut self, chat_guid: &str) -> oneshot::Receiver<ChatBridgeResult> {
        self.chats.register(chat_guid.to_string())
    }

    pub(crate) fn expect_backfill(&mut self, backfill_id: &str) -> oneshot::Receiver<BackfillResult> {
        self.backfills.register(backfill_id.to_string())
    }

    /// Deliver a completion notification to whoever waits for it.
    ///
    /// Returns the notification back when it was not claimed, including
    /// every notification that is not a completion result.
    pub(crate) fn route(&mut self, notification: Notification) -> Option<Notification> {
        match notification {
            Notification::MessageBridgeResult(result) => {
                let key = (result.chat_guid.clone(), result.guid.clone());
                self.messages
                    .complete(key, result)
                    .map(Notification::MessageBridgeResult)
            }
            Notification::ChatBridgeResult(result) => self
                .chats
                .complete(result.chat_guid.clone(), result)
                .map(Notification::ChatBridgeResult),
            Notification::BackfillResult(result) => self
                .backfills
                .complete(result.backfill_id.clone(), result)
                .map(Notification::BackfillResult),
            other => Some(other),
        }
    }

    pub(crate) fn waiting(&self) -> usize {
        self.messages.len() + self.chats.len() + self.backfills.len()
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use bluebridge_shared::RoomId;

    use super::*;

    fn chat_result(chat: &str) -> ChatBridgeResult {
        ChatBridgeResult {
            chat_guid: chat.to_string(),
            mxid: RoomId::new("!room:example.org").unwrap(),
        }
    }

    #[test]
    fn test_routes_to_registered_waiter() {
        let mut waiters = ResultWaiters::default();
        let mut rx = waiters.expect_chat("iMessage;+;chat1");

        let leftover = waiters.route(Notification::ChatBridgeResult(chat_result("iMessage;+;chat1")));
        assert!(leftover.is_none());
        assert_eq!(rx.try_recv().unwrap().chat_guid, "iMessage;+;chat1");
        assert_eq!(waiters.waiting(), 0);
    }

    #[test]
    fn test_early_result_claimed_later() {
        let mut waiters = ResultWaiters::default();
        let result = MessageBridgeResult {
            chat_guid: "iMessage;-;a".into(),
            guid: "msg-1".into(),
            event_id: Some("$ev".into()),
            success: true,
        };
        let leftover = waiters.route(Notification::MessageBridgeResult(result.clone()));
        assert!(leftover.is_some());

        let mut rx = waiters.expect_message("iMessage;-;a", "msg-1");
        assert_eq!(rx.try_recv().unwrap(), result);

        // Claimed once only.
        let mut again = waiters.expect_message("iMessage;-;a", "msg-1");
        assert!(again.try_recv().is_err());
    }

    #[test]
    fn test_mismatched_key_not_delivered() {
        let mut waiters = ResultWaiters::default();
        let mut rx = waiters.expect_backfill("bf-1");
        let other = BackfillResult {
            chat_guid: "iMessage;-;a".into(),
            backfill_id: "bf-2".into(),
            success: true,
            ..Default::default()
        };
        assert!(waiters.route(Notification::BackfillResult(other)).is_some());
        assert!(rx.try_recv().is_err());
        assert_eq!(waiters.waiting(), 1);
    }

    #[test]
    fn test_early_cache_is_bounded() {
        let mut waiters = ResultWaiters::default();
        for i in 0..(EARLY_RESULT_CAPACITY + 10) {
            waiters.route(Notification::ChatBridgeResult(chat_result(&format!("iMessage;+;c{i}"))));
        }
        assert_eq!(waiters.chats.early.len(), EARLY_RESULT_CAPACITY);

        let mut evicted = waiters.expect_chat("iMessage;+;c0");
        assert!(evicted.try_recv().is_err());
    }
}
