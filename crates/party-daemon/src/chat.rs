use async_trait::async_trait;
use party_proto::party::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::PartyError;

/// One inbound chat line as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub channel: String,
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    pub message_type: MessageType,
    pub text: String,
}

/// Who the bot is and where it listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub username: String,
    pub token: Option<String>,
    pub channel: String,
}

/// Connection to a chat network.  Implementations own protocol framing and
/// authentication; the party core only sees [`ChatMessage`]s and replies.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Join `identity.channel` and forward every received line to `inbox`.
    async fn connect(
        &self,
        identity: ChatIdentity,
        inbox: mpsc::Sender<ChatMessage>,
    ) -> Result<(), PartyError>;

    async fn say(&self, channel: &str, text: &str) -> Result<(), PartyError>;

    async fn disconnect(&self);
}

/// Reply waiting to be picked up by a chat bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub channel: String,
    pub text: String,
}

const OUTBOX_CAPACITY: usize = 100;

/// Transport for an external chat bridge talking to the HTTP API: the bridge
/// pushes lines in with [`BridgeTransport::deliver`] and polls replies with
/// [`BridgeTransport::take_replies`].
#[derive(Default)]
pub struct BridgeTransport {
    inner: Mutex<BridgeInner>,
}

#[derive(Default)]
struct BridgeInner {
    identity: Option<ChatIdentity>,
    inbox: Option<mpsc::Sender<ChatMessage>>,
    outbox: VecDeque<ChatReply>,
}

impl BridgeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a line to the connected party.  Returns `false` when no party is
    /// listening or the line is for another channel.
    pub async fn deliver(&self, message: ChatMessage) -> bool {
        let inbox = {
            let inner = self.inner.lock().await;
            match (&inner.identity, &inner.inbox) {
                (Some(identity), Some(inbox))
                    if channel_matches(&identity.channel, &message.channel) =>
                {
                    inbox.clone()
                }
                _ => return false,
            }
        };
        inbox.send(message).await.is_ok()
    }

    pub async fn take_replies(&self) -> Vec<ChatReply> {
        self.inner.lock().await.outbox.drain(..).collect()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.inbox.is_some()
    }
}

fn channel_matches(joined: &str, incoming: &str) -> bool {
    joined
        .trim_start_matches('#')
        .eq_ignore_ascii_case(incoming.trim_start_matches('#'))
}

#[async_trait]
impl ChatTransport for BridgeTransport {
    async fn connect(
        &self,
        identity: ChatIdentity,
        inbox: mpsc::Sender<ChatMessage>,
    ) -> Result<(), PartyError> {
        if identity.channel.trim().is_empty() {
            return Err(PartyError::ChatTransport("no party channel configured".into()));
        }
        info!(
            "chat bridge: joined #{} as {:?}",
            identity.channel.trim_start_matches('#'),
            identity.username
        );
        let mut inner = self.inner.lock().await;
        inner.identity = Some(identity);
        inner.inbox = Some(inbox);
        Ok(())
    }

    async fn say(&self, channel: &str, text: &str) -> Result<(), PartyError> {
        let mut inner = self.inner.lock().await;
        if inner.inbox.is_none() {
            return Err(PartyError::ChatTransport("not connected".into()));
        }
        debug!("chat bridge: say in {}: {}", channel, text);
        if inner.outbox.len() == OUTBOX_CAPACITY {
            inner.outbox.pop_front();
        }
        inner.outbox.push_back(ChatReply {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.inbox.take().is_some() {
            info!("chat bridge: disconnected");
        }
        inner.identity = None;
    }
}
