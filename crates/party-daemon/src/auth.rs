use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::PartyError;

/// Checks a bot credential against the chat network.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// `Err(PartyError::CredentialInvalid)` when the network rejects the
    /// token; other errors mean the check itself failed.
    async fn validate(&self, token: &str) -> Result<(), PartyError>;
}

/// Strip whitespace and an `oauth:` / `OAuth ` prefix pasted along with the
/// token.
pub fn normalize_token(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in ["oauth:", "OAuth "] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Leading-edge throttle: the first call goes through, calls within
/// `window` of the last accepted one are dropped.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}
