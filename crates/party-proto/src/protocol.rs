use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::party::{ConfigPatch, PartyConfig};

/// Wire frame exchanged with clients, one JSON object per WebSocket text
/// message: `{"eventName": "...", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Only set on `changeStream`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stream_start: Option<i64>,
}

impl Envelope {
    pub fn new(event_name: &str, payload: Value) -> Self {
        Self {
            event_name: event_name.to_string(),
            payload,
            current_stream_start: None,
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|source| ProtocolError::Malformed { source })
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {source}")]
    Malformed { source: serde_json::Error },
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        source: serde_json::Error,
    },
}

/// Requests sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    RequestConfig,
    ConfigChange(ConfigPatch),
    StartHostParty(Option<ConfigPatch>),
    StopHostParty,
    NextStream,
    RequestState,
    SaveToken(String),
    DeleteToken,
    ValidateToken,
    AddFilteredStream(String),
    RemoveFilteredStream(String),
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_envelope(Envelope::decode(text)?)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope {
            event_name,
            payload,
            ..
        } = envelope;

        fn parse<T: serde::de::DeserializeOwned>(
            event: &str,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
                event: event.to_string(),
                source,
            })
        }

        let event = match event_name.as_str() {
            "requestConfig" => ClientEvent::RequestConfig,
            "configChange" => ClientEvent::ConfigChange(parse(&event_name, payload)?),
            "startHostParty" => {
                let patch: Option<ConfigPatch> = parse(&event_name, payload)?;
                ClientEvent::StartHostParty(patch.filter(|p| !p.is_empty()))
            }
            "stopHostParty" => ClientEvent::StopHostParty,
            "nextStream" => ClientEvent::NextStream,
            "requestState" => ClientEvent::RequestState,
            // A bare `saveToken` without payload is treated as clearing the token.
            "saveToken" => {
                let token: Option<String> = parse(&event_name, payload)?;
                ClientEvent::SaveToken(token.unwrap_or_default())
            }
            "deleteToken" => ClientEvent::DeleteToken,
            "validateToken" => ClientEvent::ValidateToken,
            "addFilteredStream" => ClientEvent::AddFilteredStream(parse(&event_name, payload)?),
            "removeFilteredStream" => {
                ClientEvent::RemoveFilteredStream(parse(&event_name, payload)?)
            }
            _ => return Err(ProtocolError::UnknownEvent(event_name)),
        };
        Ok(event)
    }

    #[cfg(test)]
    fn to_envelope(&self) -> Envelope {
        match self {
            ClientEvent::RequestConfig => Envelope::new("requestConfig", Value::Null),
            ClientEvent::ConfigChange(patch) => {
                Envelope::new("configChange", to_value_or_null(patch))
            }
            ClientEvent::StartHostParty(patch) => {
                Envelope::new("startHostParty", to_value_or_null(patch))
            }
            ClientEvent::StopHostParty => Envelope::new("stopHostParty", Value::Null),
            ClientEvent::NextStream => Envelope::new("nextStream", Value::Null),
            ClientEvent::RequestState => Envelope::new("requestState", Value::Null),
            ClientEvent::SaveToken(token) => Envelope::new("saveToken", Value::from(token.as_str())),
            ClientEvent::DeleteToken => Envelope::new("deleteToken", Value::Null),
            ClientEvent::ValidateToken => Envelope::new("validateToken", Value::Null),
            ClientEvent::AddFilteredStream(name) => {
                Envelope::new("addFilteredStream", Value::from(name.as_str()))
            }
            ClientEvent::RemoveFilteredStream(name) => {
                Envelope::new("removeFilteredStream", Value::from(name.as_str()))
            }
        }
    }
}

/// Events pushed from the daemon to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Sent once to each client right after it connects.
    InitialConfig(PartyConfig),
    ConfigResponse(PartyConfig),
    ChangeStream {
        stream: Option<String>,
        started_at_ms: Option<i64>,
    },
    DurationChange(i64),
    VoteCountChange(u32),
    AvailableStreamsChange(usize),
    Error(String),
    StateResponse(SessionSnapshot),
    PartyStatusChange(bool),
    /// Daemon WARN/ERROR log line.
    Log(String),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::InitialConfig(_) => "initialConfig",
            ServerEvent::ConfigResponse(_) => "requestConfigResponse",
            ServerEvent::ChangeStream { .. } => "changeStream",
            ServerEvent::DurationChange(_) => "durationChange",
            ServerEvent::VoteCountChange(_) => "voteCountChange",
            ServerEvent::AvailableStreamsChange(_) => "availableStreamsChange",
            ServerEvent::Error(_) => "error",
            ServerEvent::StateResponse(_) => "requestStateResponse",
            ServerEvent::PartyStatusChange(_) => "partyStatusChange",
            ServerEvent::Log(_) => "log",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let name = self.event_name();
        match self {
            ServerEvent::InitialConfig(config) | ServerEvent::ConfigResponse(config) => {
                Envelope::new(name, to_value_or_null(config))
            }
            ServerEvent::ChangeStream {
                stream,
                started_at_ms,
            } => Envelope {
                current_stream_start: *started_at_ms,
                ..Envelope::new(name, to_value_or_null(stream))
            },
            ServerEvent::DurationChange(ms) => Envelope::new(name, Value::from(*ms)),
            ServerEvent::VoteCountChange(count) => Envelope::new(name, Value::from(*count)),
            ServerEvent::AvailableStreamsChange(count) => {
                Envelope::new(name, Value::from(*count as u64))
            }
            ServerEvent::Error(message) | ServerEvent::Log(message) => {
                Envelope::new(name, Value::from(message.as_str()))
            }
            ServerEvent::StateResponse(snapshot) => Envelope::new(name, to_value_or_null(snapshot)),
            ServerEvent::PartyStatusChange(active) => Envelope::new(name, Value::from(*active)),
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        self.to_envelope().encode()
    }
}

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Point-in-time view of the live session, served for `requestState`.
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub streams: Vec<String>,
    pub current_stream: Option<String>,
    pub current_stream_vote_count: u32,
    pub next_command_timestamps: BTreeMap<String, i64>,
    pub stay_command_timestamps: BTreeMap<String, i64>,
    pub current_command_timestamp: Option<i64>,
    pub is_partying: bool,
    pub current_stream_start: Option<i64>,
    pub current_stream_duration_ms: i64,
}
