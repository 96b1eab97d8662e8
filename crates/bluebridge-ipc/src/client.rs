//! Request/response client for the companion process.
//!
//! The reader task runs in its own tokio task and is the only consumer of
//! the companion's output. Requests are written as one JSON packet per line
//! and correlated by a monotonically increasing id; each caller awaits its
//! own oneshot, so responses for different chats may complete in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use bluebridge_shared::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use bluebridge_shared::models::{timestamp_to_secs, Message};
use bluebridge_shared::protocol::{
    BackfillResult, ChatBridgeResult, Command, ErrorResponse, GetMessagesAfterRequest,
    GetRecentMessagesRequest, IpcNotification, IpcRequest, MessageBridgeResult, Notification,
    Packet,
};

use crate::error::IpcError;
use crate::waiters::ResultWaiters;

type Reply = Result<Value, IpcError>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Configuration for [`CompanionClient::start`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a request waits for its response.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// A caller-chosen tag grouping history requests into one backfill session.
pub fn new_backfill_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Messages fetched for a backfill session plus the pending outcome of
/// bridging them.
#[derive(Debug)]
pub struct BackfillSession {
    pub backfill_id: String,
    pub messages: Vec<Message>,
    pub result: oneshot::Receiver<BackfillResult>,
}

pub struct CompanionClient {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    waiters: Mutex<ResultWaiters>,
    next_id: AtomicU64,
    config: ClientConfig,
}

impl CompanionClient {
    /// Start a client over an already connected transport.
    ///
    /// Spawns the reader task and returns the client plus the stream of
    /// companion notifications nobody explicitly waited for. The stream is
    /// unbounded: the reader never waits on the consumer, so responses keep
    /// flowing while the bridge is busy with a startup sync.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        config: ClientConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            waiters: Mutex::new(ResultWaiters::default()),
            next_id: AtomicU64::new(1),
            config,
        });

        let this = Arc::clone(&client);
        tokio::spawn(async move {
            this.read_loop(reader, events_tx).await;
        });

        (client, events_rx)
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Issue a request and wait for its typed response.
    ///
    /// An `error` reply is [`IpcError::Remote`]. A response carrying a false
    /// success flag is returned as-is: retrying is the caller's decision.
    pub async fn request<Q: IpcRequest>(&self, request: &Q) -> Result<Q::Response, IpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let data = serde_json::to_value(request)?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        debug!(command = %Q::COMMAND, id, "Sending request to companion");
        if let Err(e) = self.write_packet(&Packet::new(Q::COMMAND, Some(id), data)).await {
            self.lock_pending().remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(IpcError::ChannelClosed),
            Err(_) => {
                self.lock_pending().remove(&id);
                warn!(command = %Q::COMMAND, id, "Companion request timed out");
                Err(IpcError::Timeout {
                    command: Q::COMMAND,
                    id,
                })
            }
        }?;

        Ok(serde_json::from_value(reply)?)
    }

    /// Send a one-way packet.
    pub async fn notify<N: IpcNotification>(&self, notification: &N) -> Result<(), IpcError> {
        let data = serde_json::to_value(notification)?;
        self.write_packet(&Packet::new(N::COMMAND, None, data)).await
    }

    // ------------------------------------------------------------------
    // Completion notifications
    // ------------------------------------------------------------------

    /// Wait for the `message_bridge_result` of one message.
    pub fn expect_message_result(
        &self,
        chat_guid: &str,
        message_guid: &str,
    ) -> oneshot::Receiver<MessageBridgeResult> {
        self.lock_waiters().expect_message(chat_guid, message_guid)
    }

    /// Wait for the `chat_bridge_result` of one chat.
    pub fn expect_chat_result(&self, chat_guid: &str) -> oneshot::Receiver<ChatBridgeResult> {
        self.lock_waiters().expect_chat(chat_guid)
    }

    /// Wait for the `backfill_result` of one backfill session.
    pub fn expect_backfill_result(&self, backfill_id: &str) -> oneshot::Receiver<BackfillResult> {
        self.lock_waiters().expect_backfill(backfill_id)
    }

    /// Fetch the `limit` most recent messages of a chat as a new backfill session.
    pub async fn backfill_recent(
        &self,
        chat_guid: &str,
        limit: u32,
    ) -> Result<BackfillSession, IpcError> {
        let backfill_id = new_backfill_id();
        let result = self.expect_backfill_result(&backfill_id);
        let messages = self
            .request(&GetRecentMessagesRequest {
                chat_guid: chat_guid.to_string(),
                limit,
                backfill_id: backfill_id.clone(),
            })
            .await?;
        Ok(BackfillSession {
            backfill_id,
            messages,
            result,
        })
    }

    /// Fetch every message of a chat newer than `after` as a new backfill session.
    pub async fn backfill_after(
        &self,
        chat_guid: &str,
        after: DateTime<Utc>,
    ) -> Result<BackfillSession, IpcError> {
        let backfill_id = new_backfill_id();
        let result = self.expect_backfill_result(&backfill_id);
        let messages = self
            .request(&GetMessagesAfterRequest {
                chat_guid: chat_guid.to_string(),
                timestamp: timestamp_to_secs(after),
                backfill_id: backfill_id.clone(),
            })
            .await?;
        Ok(BackfillSession {
            backfill_id,
            messages,
            result,
        })
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.lock_pending().len()
    }

    /// Completion notifications still being waited for.
    pub fn pending_results(&self) -> usize {
        self.lock_waiters().waiting()
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    async fn read_loop<R>(self: Arc<Self>, reader: R, events: mpsc::UnboundedSender<Notification>)
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<Packet>(trimmed) {
                        Ok(packet) => self.dispatch(packet, &events).await,
                        Err(e) => warn!(error = %e, line = %trimmed, "Invalid packet from companion"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Companion read error");
                    break;
                }
            }
        }

        info!("Companion channel closed");
        self.fail_all_pending();
    }

    async fn dispatch(&self, packet: Packet, events: &mpsc::UnboundedSender<Notification>) {
        let command = match packet.command() {
            Ok(command) => command,
            Err(_) => {
                warn!(command = %packet.command, "Ignoring unknown command from companion");
                return;
            }
        };

        match command {
            Command::Response => self.complete(packet.id, Ok(packet.data)),
            Command::Error => {
                let error: ErrorResponse = serde_json::from_value(packet.data).unwrap_or_default();
                self.complete(
                    packet.id,
                    Err(IpcError::Remote {
                        code: error.code,
                        message: error.message,
                    }),
                );
            }
            _ => match Notification::parse(command, packet.data) {
                Ok(Some(notification)) => {
                    if let Some(id) = packet.id {
                        self.acknowledge(id).await;
                    }
                    let unclaimed = self.lock_waiters().route(notification);
                    if let Some(notification) = unclaimed {
                        if events.send(notification).is_err() {
                            debug!(command = %command, "Notification receiver dropped");
                        }
                    }
                }
                Ok(None) => {
                    warn!(command = %command, "Companion sent a bridge-side command, ignoring");
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Malformed notification from companion");
                }
            },
        }
    }

    fn complete(&self, id: Option<u64>, reply: Reply) {
        let Some(id) = id else {
            warn!("Companion reply without id");
            return;
        };
        match self.lock_pending().remove(&id) {
            Some(tx) => {
                // The caller may have timed out in the meantime.
                let _ = tx.send(reply);
            }
            None => debug!(id, "Reply for unknown or expired request"),
        }
    }

    async fn acknowledge(&self, id: u64) {
        let ack = Packet::new(Command::Response, Some(id), Value::Object(Default::default()));
        if let Err(e) = self.write_packet(&ack).await {
            warn!(id, error = %e, "Failed to acknowledge companion packet");
        }
    }

    fn fail_all_pending(&self) {
        let pending: Vec<_> = self.lock_pending().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(IpcError::ChannelClosed));
        }
        self.lock_waiters().clear();
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), IpcError> {
        let mut line = serde_json::to_vec(packet)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_waiters(&self) -> MutexGuard<'_, ResultWaiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
