use party_proto::party::ConfigError;
use thiserror::Error;

/// Recoverable failures of the party engine.  None of them stop the process;
/// the controller turns each into an `error` event for connected clients.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PartyError {
    #[error("Could not fetch streams. {0}")]
    UpstreamFetch(String),
    #[error("No other streams found.")]
    NoCandidates,
    #[error("Could not validate Twitch OAuth token.")]
    CredentialInvalid,
    #[error("Chat connection problem: {0}")]
    ChatTransport(String),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ConfigError),
    #[error("Could not save settings: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for PartyError {
    fn from(err: reqwest::Error) -> Self {
        PartyError::UpstreamFetch(err.to_string())
    }
}

impl From<std::io::Error> for PartyError {
    fn from(err: std::io::Error) -> Self {
        PartyError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PartyError {
    fn from(err: serde_json::Error) -> Self {
        PartyError::Storage(err.to_string())
    }
}
