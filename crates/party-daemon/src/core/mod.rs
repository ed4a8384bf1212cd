//! PartyCore: single-owner event loop for the party session.
//!
//! Every producer (client requests, chat lines, the deadline ticker, the
//! catalog ticker, background HTTP calls) sends a `DaemonEvent` into this
//! loop.  PartyCore owns `PartyConfig`, `PartySession` and the vote ledger
//! exclusively; no other task touches them.
//!
//! Each start/stop bumps `run`.  Timer ticks, chat lines and fetch results
//! carry the `run` they were produced for and are dropped when it is no
//! longer current, so nothing queued before a `stop()` can mutate state
//! after it.
//!
//! After each mutation PartyCore emits the matching `ServerEvent`s on the
//! broadcast channel and publishes a fresh snapshot to the `StateManager`.
use std::sync::Arc;
use std::time::Duration;

use party_proto::config::Config;
use party_proto::party::{ConfigPatch, PartyConfig};
use party_proto::protocol::{ClientEvent, ServerEvent, SessionSnapshot};
use party_proto::state::StateManager;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{normalize_token, Debounce, TokenValidator};
use crate::catalog::{matching_names, FetchOutcome, SearchQuery, StreamCatalog, StreamListing, StreamSource};
use crate::chat::{ChatIdentity, ChatMessage, ChatTransport};
use crate::error::PartyError;
use crate::router;
use crate::scheduler::Ticker;
use crate::session::PartySession;
use crate::store::{ConfigStore, CredentialStore};
use crate::BroadcastMessage;

#[cfg(test)]
mod tests;

const VALIDATE_DEBOUNCE: Duration = Duration::from_millis(500);
const DELETE_DEBOUNCE: Duration = Duration::from_millis(300);

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PartyCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A request from a WebSocket or HTTP client.  `reply` receives the
    /// direct answer for `requestConfig` / `requestState`.
    ClientRequest {
        request: ClientEvent,
        reply: Option<oneshot::Sender<ServerEvent>>,
    },
    /// A client connected; re-check the stored credential.
    ClientConnected,
    Chat {
        run: u64,
        message: ChatMessage,
    },
    /// Deadline check for the featured stream.
    TimeoutTick {
        run: u64,
    },
    /// Time to refresh the stream catalog.
    RefreshTick {
        run: u64,
    },
    CatalogFetched {
        run: u64,
        result: Result<Vec<StreamListing>, PartyError>,
    },
    TokenChecked {
        token: String,
        result: Result<(), PartyError>,
    },
    /// A fire-and-forget call (chat connect / reply) failed.
    BackgroundFailed {
        run: u64,
        error: PartyError,
    },
    Shutdown,
}

/// External systems the core talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn StreamSource>,
    pub chat: Arc<dyn ChatTransport>,
    pub config_store: Arc<dyn ConfigStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub validator: Arc<dyn TokenValidator>,
}

#[derive(Debug, Clone)]
pub struct Tuning {
    pub timeout_check_interval: Duration,
    pub catalog_refresh_interval: Duration,
    pub discard_empty_fetch: bool,
    pub default_client_id: String,
    pub watch_base_url: String,
}

impl Tuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout_check_interval: config.schedule.timeout_check_interval(),
            catalog_refresh_interval: config.schedule.catalog_refresh_interval(),
            discard_empty_fetch: config.schedule.discard_empty_fetch,
            default_client_id: config.twitch.default_client_id.clone(),
            watch_base_url: config.twitch.watch_base_url.clone(),
        }
    }
}

// ── PartyCore ─────────────────────────────────────────────────────────────────

pub struct PartyCore {
    config: PartyConfig,
    /// Bot credential for `config.bot_username`, if one is stored.
    token: Option<String>,
    /// `Some` exactly while a party is running.
    session: Option<PartySession>,
    catalog: StreamCatalog,
    /// Bumped on every start and stop.
    run: u64,
    timeout_ticker: Option<Ticker>,
    refresh_ticker: Option<Ticker>,
    fetch_task: Option<AbortHandle>,
    /// Chat connect + inbox forwarder of the current run.
    chat_tasks: Vec<AbortHandle>,
    /// A deadline rotation already reported "no candidates" for this stream.
    stall_reported: bool,
    validate_debounce: Debounce,
    delete_debounce: Debounce,
    collab: Collaborators,
    tuning: Tuning,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl PartyCore {
    pub async fn new(
        tuning: Tuning,
        collab: Collaborators,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let mut config = match collab.config_store.load().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!("PartyCore: no saved party config, using defaults");
                PartyConfig::default()
            }
            Err(e) => {
                warn!("PartyCore: could not load party config, using defaults: {}", e);
                PartyConfig::default()
            }
        };
        config.is_partying = false;
        let token = load_token(collab.credentials.as_ref(), &config.bot_username).await;
        config.has_token = token.is_some();

        let state_manager = Arc::new(StateManager::new(config.clone()));

        Self {
            config,
            token,
            session: None,
            catalog: StreamCatalog::new(tuning.discard_empty_fetch),
            run: 0,
            timeout_ticker: None,
            refresh_ticker: None,
            fetch_task: None,
            chat_tasks: Vec::new(),
            stall_reported: false,
            validate_debounce: Debounce::new(VALIDATE_DEBOUNCE),
            delete_debounce: Debounce::new(DELETE_DEBOUNCE),
            collab,
            tuning,
            state_manager,
            broadcast_tx,
            event_tx,
        }
    }

    /// Borrow the state manager (for use by the HTTP / WebSocket server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("PartyCore: starting event loop");
        self.publish().await;

        while let Some(evt) = event_rx.recv().await {
            if matches!(evt, DaemonEvent::Shutdown) {
                info!("PartyCore: shutdown requested");
                break;
            }
            self.handle_event(evt).await;
        }

        self.stop().await;
        Ok(())
    }

    pub async fn handle_event(&mut self, evt: DaemonEvent) {
        match evt {
            DaemonEvent::ClientRequest { request, reply } => {
                debug!("PartyCore: request {:?}", request);
                if let Some(response) = self.handle_request(request).await {
                    if let Some(reply) = reply {
                        let _ = reply.send(response);
                    }
                }
            }
            DaemonEvent::ClientConnected => self.validate_token(),
            DaemonEvent::Chat { run, message } => {
                if self.is_current(run) {
                    self.on_chat_message(message).await;
                } else {
                    debug!("PartyCore: dropping chat line from stale run {}", run);
                }
            }
            DaemonEvent::TimeoutTick { run } => {
                if self.is_current(run) {
                    self.check_deadline().await;
                }
            }
            DaemonEvent::RefreshTick { run } => {
                if self.is_current(run) {
                    self.refresh_catalog();
                }
            }
            DaemonEvent::CatalogFetched { run, result } => {
                if self.is_current(run) {
                    self.on_catalog_fetched(result).await;
                } else {
                    debug!("PartyCore: dropping catalog result from stale run {}", run);
                }
            }
            DaemonEvent::TokenChecked { token, result } => {
                self.on_token_checked(token, result).await
            }
            DaemonEvent::BackgroundFailed { run, error } => {
                if self.is_current(run) {
                    self.report(&error);
                }
            }
            DaemonEvent::Shutdown => self.stop().await,
        }
    }

    fn is_current(&self, run: u64) -> bool {
        self.session.is_some() && run == self.run
    }

    // ── client requests ───────────────────────────────────────────────────────

    async fn handle_request(&mut self, request: ClientEvent) -> Option<ServerEvent> {
        match request {
            ClientEvent::RequestConfig => {
                return Some(ServerEvent::ConfigResponse(self.config.clone()))
            }
            ClientEvent::RequestState => return Some(ServerEvent::StateResponse(self.snapshot())),
            ClientEvent::ConfigChange(patch) => self.apply_config(patch).await,
            ClientEvent::StartHostParty(overrides) => self.start(overrides).await,
            ClientEvent::StopHostParty => self.stop().await,
            ClientEvent::NextStream => self.rotate(true).await,
            ClientEvent::SaveToken(raw) => self.save_token(&raw).await,
            ClientEvent::DeleteToken => self.delete_token(false).await,
            ClientEvent::ValidateToken => self.validate_token(),
            ClientEvent::AddFilteredStream(name) => {
                match self.config.add_filtered_stream(&name) {
                    Ok(patch) => self.apply_config(patch).await,
                    Err(e) => self.report(&e.into()),
                }
            }
            ClientEvent::RemoveFilteredStream(name) => {
                match self.config.remove_filtered_stream(&name) {
                    Ok(patch) => self.apply_config(patch).await,
                    Err(e) => self.report(&e.into()),
                }
            }
        }
        None
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    async fn start(&mut self, overrides: Option<ConfigPatch>) {
        if let Some(patch) = overrides {
            if let Err(e) = patch.validate() {
                self.report(&e.into());
                return;
            }
            self.config = self.config.merged(&patch);
        }
        if self.session.is_some() {
            info!("PartyCore: restarting running party");
            self.teardown().await;
        }

        self.run += 1;
        let run = self.run;
        info!(
            "PartyCore: starting party (run {}) in #{} for {:?}",
            run, self.config.party_channel, self.config.title_keyword
        );

        self.config.is_partying = true;
        self.catalog.clear();
        self.stall_reported = false;
        self.session = Some(PartySession::opening(
            &self.config,
            Instant::now(),
            wall_clock_ms(),
        ));

        self.timeout_ticker = Some(Ticker::spawn(
            "timeout",
            self.tuning.timeout_check_interval,
            self.event_tx.clone(),
            move || DaemonEvent::TimeoutTick { run },
        ));
        // First tick fires immediately and triggers the initial fetch.
        self.refresh_ticker = Some(Ticker::spawn(
            "catalog",
            self.tuning.catalog_refresh_interval,
            self.event_tx.clone(),
            move || DaemonEvent::RefreshTick { run },
        ));
        self.connect_chat(run);

        self.emit(ServerEvent::PartyStatusChange(true));
        self.publish().await;
    }

    async fn stop(&mut self) {
        if self.session.is_none() {
            debug!("PartyCore: stop while idle");
            return;
        }
        info!("PartyCore: stopping party (run {})", self.run);
        self.teardown().await;
        self.emit(ServerEvent::PartyStatusChange(false));
        self.publish().await;
    }

    /// Cancel everything belonging to the current run and drop the session.
    async fn teardown(&mut self) {
        self.run += 1;
        if let Some(ticker) = self.timeout_ticker.take() {
            ticker.cancel();
        }
        if let Some(ticker) = self.refresh_ticker.take() {
            ticker.cancel();
        }
        if let Some(fetch) = self.fetch_task.take() {
            fetch.abort();
        }
        for task in self.chat_tasks.drain(..) {
            task.abort();
        }
        self.collab.chat.disconnect().await;
        if let Some(session) = self.session.take() {
            debug!(
                "PartyCore: discarding session ({} votes, {} ledger entries)",
                session.vote_count,
                session.ledger.len()
            );
        }
        self.config.is_partying = false;
    }

    fn connect_chat(&mut self, run: u64) {
        let identity = ChatIdentity {
            username: self.config.bot_username.clone(),
            token: self.token.clone(),
            channel: self.config.party_channel.clone(),
        };

        // Single forwarder per run: inbox lines become run-tagged events.
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<ChatMessage>(256);
        let core_tx = self.event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = inbox_rx.recv().await {
                if core_tx.send(DaemonEvent::Chat { run, message }).await.is_err() {
                    break;
                }
            }
        });

        let chat = Arc::clone(&self.collab.chat);
        let error_tx = self.event_tx.clone();
        let connect = tokio::spawn(async move {
            if let Err(error) = chat.connect(identity, inbox_tx).await {
                warn!("PartyCore: chat connect failed: {}", error);
                let _ = error_tx.send(DaemonEvent::BackgroundFailed { run, error }).await;
            }
        });

        self.chat_tasks = vec![forwarder.abort_handle(), connect.abort_handle()];
    }

    async fn apply_config(&mut self, patch: ConfigPatch) {
        if let Err(e) = patch.validate() {
            self.report(&e.into());
            return;
        }

        // Restart so the chat connection picks up a new identity or channel
        // and the vote ledger starts empty.
        let was_partying = self.session.is_some();
        if was_partying {
            self.stop().await;
        }

        let previous_user = self.config.bot_username.clone();
        self.config = self.config.merged(&patch);
        if self.config.bot_username != previous_user {
            self.token = load_token(self.collab.credentials.as_ref(), &self.config.bot_username).await;
            self.config.has_token = self.token.is_some();
        }
        self.persist().await;

        if was_partying {
            self.start(None).await;
        } else {
            self.publish().await;
        }
    }

    // ── rotation ──────────────────────────────────────────────────────────────

    async fn rotate(&mut self, forced: bool) {
        let Some(session) = self.session.as_ref() else {
            debug!("PartyCore: rotate ignored, no party running");
            return;
        };

        let current = session.current_stream.as_deref();
        let picked = {
            let candidates: Vec<&str> = self
                .catalog
                .visible(&self.config)
                .into_iter()
                .filter(|s| Some(*s) != current)
                .collect();
            candidates
                .choose(&mut rand::thread_rng())
                .map(|s| s.to_string())
        };

        let Some(next) = picked else {
            // A deadline rotation keeps retrying every tick; say so once.
            if forced || !self.stall_reported {
                self.report(&PartyError::NoCandidates);
            }
            if !forced {
                self.stall_reported = true;
            }
            return;
        };

        let session = PartySession::featuring(next.clone(), &self.config, Instant::now(), wall_clock_ms());
        let started_at_ms = session.started_at_ms;
        let duration_ms = session.duration_ms;
        if let Some(previous) = self.session.replace(session) {
            debug!(
                "PartyCore: {:?} ended with {} votes",
                previous.current_stream, previous.vote_count
            );
        }
        self.stall_reported = false;
        info!(
            "PartyCore: now featuring {} ({})",
            next,
            if forced { "forced" } else { "timeout" }
        );

        self.emit(ServerEvent::ChangeStream {
            stream: Some(next),
            started_at_ms: Some(started_at_ms),
        });
        self.emit(ServerEvent::DurationChange(duration_ms));
        self.emit(ServerEvent::VoteCountChange(0));
        self.publish().await;
    }

    async fn check_deadline(&mut self) {
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| s.deadline_reached(Instant::now()));
        if due {
            self.rotate(false).await;
        }
    }

    // ── chat ──────────────────────────────────────────────────────────────────

    async fn on_chat_message(&mut self, message: ChatMessage) {
        let Some(classification) =
            router::classify(&self.config, message.message_type, &message.text)
        else {
            debug!(
                "chat: ignoring {:?} message from {}",
                message.message_type, message.user_id
            );
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let now = Instant::now();
        let outcome = router::route(session, &self.config, classification, &message.user_id, now);
        let duration_ms = session.duration_ms;
        let vote_count = session.vote_count;
        if !outcome.accepted.is_empty() {
            debug!(
                "chat: {} voted {:?}, {}ms left",
                message.user_id,
                outcome.accepted,
                session.remaining_ms(now)
            );
        }

        let announced = outcome.announce.is_some();
        if let Some(stream) = outcome.announce {
            self.say(router::announcement(&stream, &self.tuning.watch_base_url));
        }
        if outcome.had_vote {
            self.emit(ServerEvent::DurationChange(duration_ms));
            self.emit(ServerEvent::VoteCountChange(vote_count));
        }
        if outcome.had_vote || announced {
            self.publish().await;
        }
    }

    fn say(&self, text: String) {
        let chat = Arc::clone(&self.collab.chat);
        let channel = self.config.party_channel.clone();
        let error_tx = self.event_tx.clone();
        let run = self.run;
        tokio::spawn(async move {
            if let Err(error) = chat.say(&channel, &text).await {
                let _ = error_tx.send(DaemonEvent::BackgroundFailed { run, error }).await;
            }
        });
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    fn refresh_catalog(&mut self) {
        if self.fetch_task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("catalog: previous fetch still running, skipping tick");
            return;
        }

        let client_id = if self.config.client_id.trim().is_empty() {
            self.tuning.default_client_id.clone()
        } else {
            self.config.client_id.clone()
        };
        let query = SearchQuery {
            keyword: self.config.title_keyword.clone(),
            client_id,
            token: self.token.clone(),
        };
        let source = Arc::clone(&self.collab.source);
        let result_tx = self.event_tx.clone();
        let run = self.run;
        debug!("catalog: fetching streams for {:?}", query.keyword);
        let handle = tokio::spawn(async move {
            let result = source.search(&query).await;
            let _ = result_tx.send(DaemonEvent::CatalogFetched { run, result }).await;
        });
        self.fetch_task = Some(handle.abort_handle());
    }

    async fn on_catalog_fetched(&mut self, result: Result<Vec<StreamListing>, PartyError>) {
        self.fetch_task = None;
        let listings = match result {
            Ok(listings) => listings,
            Err(e) => {
                self.report(&e);
                return;
            }
        };

        let names = matching_names(listings, &self.config.title_keyword);
        if self.catalog.apply_fetch(names) == FetchOutcome::Discarded {
            return;
        }
        let available = self.catalog.visible(&self.config).len();
        self.emit(ServerEvent::AvailableStreamsChange(available));

        let needs_stream = self
            .session
            .as_ref()
            .is_some_and(|s| s.current_stream.is_none());
        if needs_stream {
            self.rotate(false).await;
        } else {
            self.publish().await;
        }
    }

    // ── credentials ───────────────────────────────────────────────────────────

    async fn save_token(&mut self, raw: &str) {
        let token = normalize_token(raw);
        let username = self.config.bot_username.clone();
        if username.is_empty() {
            warn!("PartyCore: no bot username set, token kept in memory only");
        } else {
            let result = if token.is_empty() {
                self.collab.credentials.delete(&username).await
            } else {
                self.collab.credentials.set(&username, &token).await
            };
            if let Err(e) = result {
                self.report(&e);
            }
        }

        self.token = (!token.is_empty()).then_some(token);
        self.config.has_token = self.token.is_some();
        self.emit(ServerEvent::ConfigResponse(self.config.clone()));
        self.publish().await;
    }

    async fn delete_token(&mut self, bypass_debounce: bool) {
        if !bypass_debounce && !self.delete_debounce.ready(Instant::now()) {
            debug!("PartyCore: deleteToken debounced");
            return;
        }
        let username = self.config.bot_username.clone();
        if !username.is_empty() {
            if let Err(e) = self.collab.credentials.delete(&username).await {
                self.report(&e);
            }
        }
        self.token = None;
        self.config.has_token = false;

        // No credential means no chat connection.
        self.stop().await;
        self.persist().await;
        self.emit(ServerEvent::ConfigResponse(self.config.clone()));
        self.publish().await;
    }

    fn validate_token(&mut self) {
        if !self.validate_debounce.ready(Instant::now()) {
            debug!("PartyCore: validateToken debounced");
            return;
        }
        let Some(token) = self.token.clone() else {
            return;
        };
        let validator = Arc::clone(&self.collab.validator);
        let result_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = validator.validate(&token).await;
            let _ = result_tx.send(DaemonEvent::TokenChecked { token, result }).await;
        });
    }

    async fn on_token_checked(&mut self, token: String, result: Result<(), PartyError>) {
        if self.token.as_deref() != Some(token.as_str()) {
            debug!("PartyCore: ignoring validation of a replaced token");
            return;
        }
        match result {
            Ok(()) => debug!("PartyCore: bot token is valid"),
            Err(PartyError::CredentialInvalid) => {
                self.report(&PartyError::CredentialInvalid);
                self.delete_token(true).await;
            }
            Err(e) => self.report(&e),
        }
    }

    // ── output ────────────────────────────────────────────────────────────────

    fn emit(&self, event: ServerEvent) {
        // No receivers is fine: nobody is connected.
        let _ = self.broadcast_tx.send(BroadcastMessage::Party(event));
    }

    fn report(&self, err: &PartyError) {
        warn!("PartyCore: {}", err);
        self.emit(ServerEvent::Error(err.to_string()));
    }

    async fn persist(&self) {
        if let Err(e) = self.collab.config_store.save(&self.config).await {
            self.report(&e);
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        match &self.session {
            Some(session) => session.snapshot(self.catalog.streams(), Instant::now(), wall_clock_ms()),
            None => SessionSnapshot {
                streams: self.catalog.streams().to_vec(),
                ..SessionSnapshot::default()
            },
        }
    }

    async fn publish(&self) {
        let available = self.catalog.visible(&self.config).len();
        self.state_manager
            .publish(self.config.clone(), self.snapshot(), available)
            .await;
    }
}

async fn load_token(credentials: &dyn CredentialStore, username: &str) -> Option<String> {
    if username.is_empty() {
        return None;
    }
    match credentials.get(username).await {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!("PartyCore: could not read credential for {}: {}", username, e);
            None
        }
    }
}

fn wall_clock_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
