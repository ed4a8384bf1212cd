use crate::party::PartyConfig;
use crate::protocol::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything readers outside the controller may look at.  The controller
/// rebuilds and swaps the whole record after each mutation, so a reader never
/// observes a half-applied rotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyState {
    /// Monotonic revision counter, incremented on every publish.
    pub rev: u64,
    pub config: PartyConfig,
    pub session: SessionSnapshot,
    /// Candidates left after applying the configured filter.
    pub available_streams: usize,
}

pub struct StateManager {
    state: Arc<RwLock<PartyState>>,
}

impl StateManager {
    pub fn new(config: PartyConfig) -> Self {
        let state = PartyState {
            rev: 1,
            config,
            ..PartyState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> PartyState {
        self.state.read().await.clone()
    }

    pub async fn publish(
        &self,
        config: PartyConfig,
        session: SessionSnapshot,
        available_streams: usize,
    ) -> u64 {
        let mut state = self.state.write().await;
        let rev = state.rev + 1;
        *state = PartyState {
            rev,
            config,
            session,
            available_streams,
        };
        rev
    }
}
