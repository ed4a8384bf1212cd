use async_trait::async_trait;
use party_proto::party::PartyConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::PartyError;

/// Persistence of the party configuration document.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Option<PartyConfig>, PartyError>;
    async fn save(&self, config: &PartyConfig) -> Result<(), PartyError>;
}

/// Secure storage of bot credentials keyed by bot username.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<String>, PartyError>;
    async fn set(&self, username: &str, token: &str) -> Result<(), PartyError>;
    async fn delete(&self, username: &str) -> Result<(), PartyError>;
}

/// On-disk layout: `{ "config": { ...PartyConfig } }`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PartyDocument {
    #[serde(default)]
    config: Option<PartyConfig>,
}

pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load(&self) -> Result<Option<PartyConfig>, PartyError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let document: PartyDocument = serde_json::from_str(&content)?;
        Ok(document.config)
    }

    async fn save(&self, config: &PartyConfig) -> Result<(), PartyError> {
        let document = PartyDocument {
            config: Some(config.persisted()),
        };
        write_json(&self.path, &document).await?;
        debug!("party config saved to {:?}", self.path);
        Ok(())
    }
}

/// Credential file: a JSON map of username to token, readable only by the
/// owner on unix.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, PartyError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(BTreeMap::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_all(&self, tokens: &BTreeMap<String, String>) -> Result<(), PartyError> {
        write_json(&self.path, tokens).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, username: &str) -> Result<Option<String>, PartyError> {
        Ok(self.read_all().await?.get(username).cloned())
    }

    async fn set(&self, username: &str, token: &str) -> Result<(), PartyError> {
        let mut tokens = self.read_all().await?;
        tokens.insert(username.to_string(), token.to_string());
        self.write_all(&tokens).await
    }

    async fn delete(&self, username: &str) -> Result<(), PartyError> {
        let mut tokens = self.read_all().await?;
        if tokens.remove(username).is_some() {
            self.write_all(&tokens).await?;
        }
        Ok(())
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PartyError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
