//! Party configuration: the client-editable document that drives voting,
//! rotation and stream filtering.
//!
//! Clients send partial updates ([`ConfigPatch`]); the daemon folds them into
//! the current [`PartyConfig`] with [`PartyConfig::merged`], which produces a
//! new value field by field.  Fields that are not part of the schema are
//! dropped at deserialization time.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Kind of chat message as reported by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Chat,
    Action,
    Whisper,
}

/// How `filtered_streams` narrows the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Every candidate except the listed streams.
    #[default]
    Exclude,
    /// Only candidates that appear in the list.
    Include,
}

/// The three chat commands the audience can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    Next,
    Stay,
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} cannot be empty")]
    EmptyEntry { field: &'static str },
    #[error("{name} is already in the filtered stream list")]
    DuplicateEntry { name: String },
    #[error("{name} is not in the filtered stream list")]
    MissingEntry { name: String },
    #[error("{field} must be greater than zero")]
    NonPositiveDuration { field: &'static str },
    #[error("{field} cannot be negative")]
    NegativeDurationChange { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartyConfig {
    pub party_channel: String,
    pub bot_username: String,
    /// API client id for stream search; empty means "use the daemon default".
    pub client_id: String,
    pub next_command: String,
    pub stay_command: String,
    pub current_command: String,
    pub next_command_enabled: bool,
    pub stay_command_enabled: bool,
    pub current_command_enabled: bool,
    pub title_keyword: String,
    pub selected_message_types: Vec<MessageType>,
    pub vote_timeout_ms: u64,
    pub current_timeout_ms: u64,
    pub current_stream_initial_duration_ms: i64,
    pub next_command_duration_change_ms: i64,
    pub stay_command_duration_change_ms: i64,
    pub filtered_streams: Vec<String>,
    pub filter_mode: FilterMode,
    /// Derived from the credential store, never taken from a patch.
    pub has_token: bool,
    /// Live-session flag.  Always `false` in the persisted copy.
    pub is_partying: bool,
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            party_channel: String::new(),
            bot_username: String::new(),
            client_id: String::new(),
            next_command: "!next".to_string(),
            stay_command: "!stay".to_string(),
            current_command: "!currentStream".to_string(),
            next_command_enabled: true,
            stay_command_enabled: true,
            current_command_enabled: true,
            title_keyword: "#hackathon".to_string(),
            selected_message_types: vec![
                MessageType::Chat,
                MessageType::Action,
                MessageType::Whisper,
            ],
            vote_timeout_ms: 30_000,
            current_timeout_ms: 30_000,
            current_stream_initial_duration_ms: 30_000,
            next_command_duration_change_ms: 5_000,
            stay_command_duration_change_ms: 5_000,
            filtered_streams: Vec::new(),
            filter_mode: FilterMode::Exclude,
            has_token: false,
            is_partying: false,
        }
    }
}

/// Partial update of a [`PartyConfig`].  `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub party_channel: Option<String>,
    pub bot_username: Option<String>,
    pub client_id: Option<String>,
    pub next_command: Option<String>,
    pub stay_command: Option<String>,
    pub current_command: Option<String>,
    pub next_command_enabled: Option<bool>,
    pub stay_command_enabled: Option<bool>,
    pub current_command_enabled: Option<bool>,
    pub title_keyword: Option<String>,
    pub selected_message_types: Option<Vec<MessageType>>,
    pub vote_timeout_ms: Option<u64>,
    pub current_timeout_ms: Option<u64>,
    pub current_stream_initial_duration_ms: Option<i64>,
    pub next_command_duration_change_ms: Option<i64>,
    pub stay_command_duration_change_ms: Option<i64>,
    pub filtered_streams: Option<Vec<String>>,
    pub filter_mode: Option<FilterMode>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject values that would leave the config unusable.  Runs before any
    /// state is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let commands = [
            ("nextCommand", &self.next_command),
            ("stayCommand", &self.stay_command),
            ("currentCommand", &self.current_command),
        ];
        for (field, value) in commands {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(ConfigError::EmptyEntry { field });
            }
        }

        if matches!(self.current_stream_initial_duration_ms, Some(ms) if ms <= 0) {
            return Err(ConfigError::NonPositiveDuration {
                field: "currentStreamInitialDurationMs",
            });
        }
        let deltas = [
            ("nextCommandDurationChangeMs", self.next_command_duration_change_ms),
            ("stayCommandDurationChangeMs", self.stay_command_duration_change_ms),
        ];
        for (field, value) in deltas {
            if matches!(value, Some(ms) if ms < 0) {
                return Err(ConfigError::NegativeDurationChange { field });
            }
        }

        if let Some(streams) = &self.filtered_streams {
            let mut seen: Vec<String> = Vec::with_capacity(streams.len());
            for name in streams {
                let normalized = normalize_stream_name(name);
                if normalized.is_empty() {
                    return Err(ConfigError::EmptyEntry {
                        field: "filteredStreams",
                    });
                }
                if seen.contains(&normalized) {
                    return Err(ConfigError::DuplicateEntry { name: name.clone() });
                }
                seen.push(normalized);
            }
        }
        Ok(())
    }
}

fn normalize_stream_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PartyConfig {
    /// Fold `patch` into a copy of this config.
    pub fn merged(&self, patch: &ConfigPatch) -> PartyConfig {
        fn pick<T: Clone>(value: &Option<T>, current: &T) -> T {
            value.clone().unwrap_or_else(|| current.clone())
        }

        PartyConfig {
            party_channel: pick(&patch.party_channel, &self.party_channel),
            bot_username: pick(&patch.bot_username, &self.bot_username),
            client_id: pick(&patch.client_id, &self.client_id),
            next_command: pick(&patch.next_command, &self.next_command),
            stay_command: pick(&patch.stay_command, &self.stay_command),
            current_command: pick(&patch.current_command, &self.current_command),
            next_command_enabled: pick(&patch.next_command_enabled, &self.next_command_enabled),
            stay_command_enabled: pick(&patch.stay_command_enabled, &self.stay_command_enabled),
            current_command_enabled: pick(
                &patch.current_command_enabled,
                &self.current_command_enabled,
            ),
            title_keyword: pick(&patch.title_keyword, &self.title_keyword),
            selected_message_types: pick(
                &patch.selected_message_types,
                &self.selected_message_types,
            ),
            vote_timeout_ms: pick(&patch.vote_timeout_ms, &self.vote_timeout_ms),
            current_timeout_ms: pick(&patch.current_timeout_ms, &self.current_timeout_ms),
            current_stream_initial_duration_ms: pick(
                &patch.current_stream_initial_duration_ms,
                &self.current_stream_initial_duration_ms,
            ),
            next_command_duration_change_ms: pick(
                &patch.next_command_duration_change_ms,
                &self.next_command_duration_change_ms,
            ),
            stay_command_duration_change_ms: pick(
                &patch.stay_command_duration_change_ms,
                &self.stay_command_duration_change_ms,
            ),
            filtered_streams: pick(&patch.filtered_streams, &self.filtered_streams),
            filter_mode: pick(&patch.filter_mode, &self.filter_mode),
            has_token: self.has_token,
            is_partying: self.is_partying,
        }
    }

    /// Copy written to disk: live-session status never survives a restart.
    pub fn persisted(&self) -> PartyConfig {
        PartyConfig {
            is_partying: false,
            ..self.clone()
        }
    }

    /// Configured command string, or `None` when the command is disabled.
    pub fn command(&self, kind: CommandKind) -> Option<&str> {
        let (text, enabled) = match kind {
            CommandKind::Next => (&self.next_command, self.next_command_enabled),
            CommandKind::Stay => (&self.stay_command, self.stay_command_enabled),
            CommandKind::Current => (&self.current_command, self.current_command_enabled),
        };
        if enabled && !text.is_empty() {
            Some(text)
        } else {
            None
        }
    }

    pub fn accepts(&self, message_type: MessageType) -> bool {
        self.selected_message_types.contains(&message_type)
    }

    /// Signed change applied to the featured stream's duration for one
    /// accepted vote.  `Current` never changes the duration.
    pub fn duration_delta_ms(&self, kind: CommandKind) -> i64 {
        match kind {
            CommandKind::Next => self.next_command_duration_change_ms.saturating_neg(),
            CommandKind::Stay => self.stay_command_duration_change_ms,
            CommandKind::Current => 0,
        }
    }

    pub fn vote_cooldown(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn current_cooldown(&self) -> Duration {
        Duration::from_millis(self.current_timeout_ms)
    }

    /// Whether `stream` survives the configured filter list and mode.
    pub fn is_visible(&self, stream: &str) -> bool {
        let listed = self
            .filtered_streams
            .iter()
            .any(|f| f.trim().eq_ignore_ascii_case(stream.trim()));
        match self.filter_mode {
            FilterMode::Exclude => !listed,
            FilterMode::Include => listed,
        }
    }

    /// Patch that appends `name` to the filtered stream list.
    pub fn add_filtered_stream(&self, name: &str) -> Result<ConfigPatch, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyEntry {
                field: "filteredStreams",
            });
        }
        if self
            .filtered_streams
            .iter()
            .any(|f| normalize_stream_name(f) == normalize_stream_name(name))
        {
            return Err(ConfigError::DuplicateEntry {
                name: name.to_string(),
            });
        }
        let mut streams = self.filtered_streams.clone();
        streams.push(name.to_string());
        Ok(ConfigPatch {
            filtered_streams: Some(streams),
            ..ConfigPatch::default()
        })
    }

    /// Patch that removes `name` from the filtered stream list.
    pub fn remove_filtered_stream(&self, name: &str) -> Result<ConfigPatch, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyEntry {
                field: "filteredStreams",
            });
        }
        let before = self.filtered_streams.len();
        let streams: Vec<String> = self
            .filtered_streams
            .iter()
            .filter(|f| normalize_stream_name(f) != normalize_stream_name(name))
            .cloned()
            .collect();
        if streams.len() == before {
            return Err(ConfigError::MissingEntry {
                name: name.to_string(),
            });
        }
        Ok(ConfigPatch {
            filtered_streams: Some(streams),
            ..ConfigPatch::default()
        })
    }
}
