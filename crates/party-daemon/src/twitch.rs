//! Twitch HTTP integrations: Helix channel search as the stream source and
//! the OAuth validation endpoint as the token validator.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::auth::TokenValidator;
use crate::catalog::{SearchQuery, StreamListing, StreamSource};
use crate::error::PartyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_SIZE: u32 = 100;

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("hostparty/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[derive(Debug, Deserialize)]
struct SearchChannelsResponse {
    #[serde(default)]
    data: Vec<ChannelResult>,
}

#[derive(Debug, Deserialize)]
struct ChannelResult {
    broadcaster_login: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    is_live: bool,
}

fn listings_from(response: SearchChannelsResponse) -> Vec<StreamListing> {
    response
        .data
        .into_iter()
        .filter(|c| c.is_live)
        .map(|c| StreamListing {
            name: c.broadcaster_login,
            title: c.title,
        })
        .collect()
}

pub struct TwitchStreamSource {
    client: reqwest::Client,
    api_base: String,
}

impl TwitchStreamSource {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl StreamSource for TwitchStreamSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<StreamListing>, PartyError> {
        let url = format!("{}/search/channels", self.api_base.trim_end_matches('/'));
        let first = PAGE_SIZE.to_string();
        let mut request = self
            .client
            .get(&url)
            .query(&[
                ("query", query.keyword.as_str()),
                ("live_only", "true"),
                ("first", first.as_str()),
            ])
            .header("Client-Id", &query.client_id);
        if let Some(token) = &query.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PartyError::UpstreamFetch(format!(
                "search returned HTTP {}",
                status
            )));
        }
        let body: SearchChannelsResponse = response.json().await?;
        let listings = listings_from(body);
        debug!("twitch: {} live channels for {:?}", listings.len(), query.keyword);
        Ok(listings)
    }
}

pub struct TwitchTokenValidator {
    client: reqwest::Client,
    validate_url: String,
}

impl TwitchTokenValidator {
    pub fn new(client: reqwest::Client, validate_url: impl Into<String>) -> Self {
        Self {
            client,
            validate_url: validate_url.into(),
        }
    }
}

#[async_trait]
impl TokenValidator for TwitchTokenValidator {
    async fn validate(&self, token: &str) -> Result<(), PartyError> {
        let response = self
            .client
            .get(&self.validate_url)
            .header("Authorization", format!("OAuth {}", token))
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PartyError::CredentialInvalid),
            other => Err(PartyError::UpstreamFetch(format!(
                "token validation returned HTTP {}",
                other
            ))),
        }
    }
}
