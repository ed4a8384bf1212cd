use super::*;
use crate::chat::BridgeTransport;
use async_trait::async_trait;
use party_proto::party::{FilterMode, MessageType};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

// ── fakes ─────────────────────────────────────────────────────────────────────

/// Returns queued results in order, then `fallback` forever.
struct ScriptedSource {
    queued: Mutex<VecDeque<Result<Vec<StreamListing>, PartyError>>>,
    fallback: Vec<StreamListing>,
    delay: Duration,
}

impl ScriptedSource {
    fn always(names: &[&str]) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: listings(names),
            delay: Duration::ZERO,
        }
    }

    fn then(self, result: Result<Vec<StreamListing>, PartyError>) -> Self {
        self.queued.lock().unwrap().push_back(result);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<StreamListing>, PartyError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.queued.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[derive(Default)]
struct MemoryConfigStore {
    saved: Mutex<Option<PartyConfig>>,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Option<PartyConfig>, PartyError> {
        Ok(self.saved.lock().unwrap().clone())
    }

    async fn save(&self, config: &PartyConfig) -> Result<(), PartyError> {
        *self.saved.lock().unwrap() = Some(config.persisted());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryCredentials {
    tokens: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get(&self, username: &str) -> Result<Option<String>, PartyError> {
        Ok(self.tokens.lock().unwrap().get(username).cloned())
    }

    async fn set(&self, username: &str, token: &str) -> Result<(), PartyError> {
        self.tokens
            .lock()
            .unwrap()
            .insert(username.to_string(), token.to_string());
        Ok(())
    }

    async fn delete(&self, username: &str) -> Result<(), PartyError> {
        self.tokens.lock().unwrap().remove(username);
        Ok(())
    }
}

struct StaticValidator(Result<(), PartyError>);

#[async_trait]
impl TokenValidator for StaticValidator {
    async fn validate(&self, _token: &str) -> Result<(), PartyError> {
        self.0.clone()
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

fn listings(names: &[&str]) -> Vec<StreamListing> {
    names
        .iter()
        .map(|name| StreamListing {
            name: name.to_string(),
            title: format!("{} building things #hackathon", name),
        })
        .collect()
}

fn party_config() -> PartyConfig {
    PartyConfig {
        party_channel: "hostchannel".into(),
        bot_username: "partybot".into(),
        vote_timeout_ms: 1_000,
        current_timeout_ms: 10_000,
        current_stream_initial_duration_ms: 30_000,
        next_command_duration_change_ms: 5_000,
        stay_command_duration_change_ms: 5_000,
        ..PartyConfig::default()
    }
}

/// Featured streams outlive a catalog refresh.
fn long_streams() -> PartyConfig {
    PartyConfig {
        current_stream_initial_duration_ms: 600_000,
        ..party_config()
    }
}

fn tuning() -> Tuning {
    Tuning {
        timeout_check_interval: Duration::from_millis(100),
        catalog_refresh_interval: Duration::from_secs(30),
        discard_empty_fetch: true,
        default_client_id: "default-client".into(),
        watch_base_url: "https://twitch.tv".into(),
    }
}

struct Harness {
    core: PartyCore,
    events: mpsc::Receiver<DaemonEvent>,
    broadcasts: broadcast::Receiver<BroadcastMessage>,
    chat: Arc<BridgeTransport>,
    store: Arc<MemoryConfigStore>,
    credentials: Arc<MemoryCredentials>,
}

impl Harness {
    async fn new(config: PartyConfig, source: ScriptedSource) -> Self {
        Self::with_validator(config, source, Ok(()), None).await
    }

    async fn with_validator(
        config: PartyConfig,
        source: ScriptedSource,
        validation: Result<(), PartyError>,
        token: Option<&str>,
    ) -> Self {
        let store = Arc::new(MemoryConfigStore::default());
        *store.saved.lock().unwrap() = Some(config.clone());
        let credentials = Arc::new(MemoryCredentials::default());
        if let Some(token) = token {
            credentials
                .tokens
                .lock()
                .unwrap()
                .insert(config.bot_username.clone(), token.to_string());
        }
        let chat = Arc::new(BridgeTransport::new());

        let collab = Collaborators {
            source: Arc::new(source),
            chat: chat.clone(),
            config_store: store.clone(),
            credentials: credentials.clone(),
            validator: Arc::new(StaticValidator(validation)),
        };
        let (broadcast_tx, broadcasts) = broadcast::channel(256);
        let (event_tx, events) = mpsc::channel(256);
        let core = PartyCore::new(tuning(), collab, broadcast_tx, event_tx).await;

        Self {
            core,
            events,
            broadcasts,
            chat,
            store,
            credentials,
        }
    }

    /// Let spawned tasks run and feed whatever they produced back into the
    /// core, until nothing new arrives.
    async fn settle(&mut self) {
        for _ in 0..8 {
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            let mut fed = false;
            while let Ok(evt) = self.events.try_recv() {
                self.core.handle_event(evt).await;
                fed = true;
            }
            if !fed {
                break;
            }
        }
    }

    async fn request(&mut self, request: ClientEvent) {
        self.core
            .handle_event(DaemonEvent::ClientRequest {
                request,
                reply: None,
            })
            .await;
    }

    async fn ask(&mut self, request: ClientEvent) -> ServerEvent {
        let (tx, rx) = oneshot::channel();
        self.core
            .handle_event(DaemonEvent::ClientRequest {
                request,
                reply: Some(tx),
            })
            .await;
        rx.await.unwrap()
    }

    async fn start(&mut self) {
        self.request(ClientEvent::StartHostParty(None)).await;
        self.settle().await;
    }

    async fn chat(&mut self, user_id: &str, text: &str) {
        let delivered = self
            .chat
            .deliver(ChatMessage {
                channel: "#hostchannel".into(),
                user_id: user_id.into(),
                username: user_id.into(),
                message_type: MessageType::Chat,
                text: text.into(),
            })
            .await;
        assert!(delivered, "chat bridge not connected");
        self.settle().await;
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(msg) = self.broadcasts.try_recv() {
            if let BroadcastMessage::Party(event) = msg {
                out.push(event);
            }
        }
        out
    }

    fn current_stream(&self) -> Option<String> {
        self.core
            .session
            .as_ref()
            .and_then(|s| s.current_stream.clone())
    }

    fn feature(&mut self, stream: &str) {
        if let Some(session) = self.core.session.as_mut() {
            session.current_stream = Some(stream.to_string());
        }
    }
}

fn errors(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Error(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn durations(events: &[ServerEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::DurationChange(ms) => Some(*ms),
            _ => None,
        })
        .collect()
}

// ── lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_start_fetches_and_features_a_stream() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;

    assert!(h.core.config.is_partying);
    assert!(h.chat.is_connected().await);
    let featured = h.current_stream().expect("a stream is featured");
    assert!(featured == "a" || featured == "b");

    let events = h.drain();
    assert_eq!(events.first(), Some(&ServerEvent::PartyStatusChange(true)));
    assert!(events.contains(&ServerEvent::AvailableStreamsChange(2)));
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::ChangeStream { stream: Some(s), started_at_ms: Some(_) } if *s == featured
    )));
    assert!(errors(&events).is_empty());

    let state = h.core.state_manager().get_state().await;
    assert!(state.config.is_partying);
    assert_eq!(state.session.current_stream, Some(featured));
    assert_eq!(state.available_streams, 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_then_immediate_stop_is_quiet() {
    let source = ScriptedSource::always(&["a", "b"]).slow(Duration::from_secs(5));
    let mut h = Harness::new(party_config(), source).await;

    // Fetch is in flight when the party stops.
    h.start().await;
    assert!(h.core.fetch_task.is_some());
    assert!(h.current_stream().is_none());
    h.request(ClientEvent::StopHostParty).await;
    tokio::time::advance(Duration::from_secs(60)).await;
    h.settle().await;

    let events = h.drain();
    assert!(errors(&events).is_empty(), "unexpected errors: {:?}", events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::ChangeStream { .. })));
    assert!(h.chat.take_replies().await.is_empty());
    assert!(h.core.session.is_none());
    assert!(!h.chat.is_connected().await);

    let state = h.core.state_manager().get_state().await;
    assert!(!state.config.is_partying);
    assert!(!state.session.is_partying);
}

#[tokio::test(start_paused = true)]
async fn test_events_of_a_stopped_run_are_ignored() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    let old_run = h.core.run;
    h.request(ClientEvent::StopHostParty).await;
    h.drain();

    tokio::time::advance(Duration::from_secs(120)).await;
    h.core
        .handle_event(DaemonEvent::TimeoutTick { run: old_run })
        .await;
    h.core
        .handle_event(DaemonEvent::RefreshTick { run: old_run })
        .await;
    h.core
        .handle_event(DaemonEvent::CatalogFetched {
            run: old_run,
            result: Ok(listings(&["c"])),
        })
        .await;
    h.core
        .handle_event(DaemonEvent::Chat {
            run: old_run,
            message: ChatMessage {
                channel: "hostchannel".into(),
                user_id: "u1".into(),
                username: "u1".into(),
                message_type: MessageType::Chat,
                text: "!next".into(),
            },
        })
        .await;
    h.settle().await;

    assert!(h.core.session.is_none());
    assert!(h.drain().is_empty());
    assert!(h.core.fetch_task.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_restarts_with_fresh_ledger() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    h.chat("u1", "!next").await;
    let first_run = h.core.run;
    assert_eq!(h.core.session.as_ref().unwrap().ledger.len(), 1);

    h.start().await;
    assert!(h.core.run > first_run);
    let session = h.core.session.as_ref().unwrap();
    assert_eq!(session.ledger.len(), 0);
    assert_eq!(session.vote_count, 0);
}

// ── votes ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_vote_cooldown_per_user() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    h.drain();

    h.chat("userA", "!next").await;
    tokio::time::advance(Duration::from_millis(500)).await;
    h.chat("userA", "!next").await;
    tokio::time::advance(Duration::from_millis(1_000)).await;
    h.chat("userA", "!next").await;

    let events = h.drain();
    assert_eq!(durations(&events), vec![25_000, 25_000, 20_000]);
    let session = h.core.session.as_ref().unwrap();
    assert_eq!(session.duration_ms, 20_000);
    assert_eq!(session.vote_count, 2);

    let state = h.core.state_manager().get_state().await;
    assert_eq!(state.session.current_stream_duration_ms, 20_000);
    assert!(state.session.next_command_timestamps.contains_key("userA"));
}

#[tokio::test(start_paused = true)]
async fn test_current_command_replies_in_party_channel() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    let featured = h.current_stream().unwrap();
    h.drain();

    h.chat("userA", "what is this? !currentStream").await;
    h.chat("userB", "!currentstream").await;

    let replies = h.chat.take_replies().await;
    assert_eq!(replies.len(), 1, "second request is inside the cooldown");
    assert_eq!(replies[0].channel, "hostchannel");
    assert_eq!(
        replies[0].text,
        format!(
            "We are currently watching {0}. You can check it out here: https://twitch.tv/{0}",
            featured
        )
    );
    // Not a vote: nothing changes for clients.
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_announcement_is_visible_in_state() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    let before = h.core.state_manager().get_state().await;
    assert!(before.session.current_command_timestamp.is_none());

    h.chat("userA", "!currentStream").await;

    let after = h.core.state_manager().get_state().await;
    assert!(after.session.current_command_timestamp.is_some());
    assert!(after.rev > before.rev);
}

#[tokio::test(start_paused = true)]
async fn test_unselected_message_type_is_ignored() {
    let config = PartyConfig {
        selected_message_types: vec![MessageType::Chat],
        ..party_config()
    };
    let mut h = Harness::new(config, ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    h.drain();

    let delivered = h
        .chat
        .deliver(ChatMessage {
            channel: "hostchannel".into(),
            user_id: "u1".into(),
            username: "u1".into(),
            message_type: MessageType::Whisper,
            text: "!next".into(),
        })
        .await;
    assert!(delivered);
    h.settle().await;

    assert!(h.drain().is_empty());
    assert_eq!(h.core.session.as_ref().unwrap().vote_count, 0);
}

// ── rotation ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rotation_skips_current_and_excluded_streams() {
    let config = PartyConfig {
        filtered_streams: vec!["b".into()],
        filter_mode: FilterMode::Exclude,
        ..party_config()
    };
    let mut h = Harness::new(config, ScriptedSource::always(&["a", "b", "c"])).await;
    h.start().await;

    for _ in 0..20 {
        h.feature("a");
        h.request(ClientEvent::NextStream).await;
        assert_eq!(h.current_stream().as_deref(), Some("c"));
    }
    assert!(errors(&h.drain()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forced_rotation_without_candidates_reports_and_keeps_session() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    h.start().await;
    assert_eq!(h.current_stream().as_deref(), Some("a"));
    h.chat("u1", "!stay").await;
    let before = h.core.session.as_ref().map(|s| (s.started_at_ms, s.duration_ms, s.vote_count));
    h.drain();

    h.request(ClientEvent::NextStream).await;
    h.request(ClientEvent::NextStream).await;

    assert_eq!(
        errors(&h.drain()),
        vec!["No other streams found.", "No other streams found."]
    );
    let after = h.core.session.as_ref().map(|s| (s.started_at_ms, s.duration_ms, s.vote_count));
    assert_eq!(before, after);
    assert_eq!(h.current_stream().as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_rotates_to_another_stream() {
    let config = PartyConfig {
        current_stream_initial_duration_ms: 1_000,
        ..party_config()
    };
    let mut h = Harness::new(config, ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    let first = h.current_stream().unwrap();
    h.drain();

    tokio::time::advance(Duration::from_millis(1_100)).await;
    h.settle().await;

    let second = h.current_stream().unwrap();
    assert_ne!(first, second);
    let events = h.drain();
    assert!(events.contains(&ServerEvent::VoteCountChange(0)));
    assert!(events.contains(&ServerEvent::DurationChange(1_000)));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_deadline_reports_once() {
    let config = PartyConfig {
        current_stream_initial_duration_ms: 1_000,
        ..party_config()
    };
    let mut h = Harness::new(config, ScriptedSource::always(&["a"])).await;
    h.start().await;
    h.drain();

    for _ in 0..5 {
        tokio::time::advance(Duration::from_millis(500)).await;
        h.settle().await;
    }

    assert_eq!(errors(&h.drain()), vec!["No other streams found."]);
    assert_eq!(h.current_stream().as_deref(), Some("a"));
}

// ── catalog ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_empty_refresh_keeps_previous_candidates() {
    let source = ScriptedSource::always(&[]).then(Ok(listings(&["a", "b"])));
    let mut h = Harness::new(long_streams(), source).await;
    h.start().await;
    h.drain();

    tokio::time::advance(Duration::from_secs(30)).await;
    h.settle().await;

    assert_eq!(h.core.catalog.streams(), ["a".to_string(), "b".to_string()]);
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failure_is_reported_and_list_kept() {
    let source = ScriptedSource::always(&["a", "b"])
        .then(Ok(listings(&["a", "b"])))
        .then(Err(PartyError::UpstreamFetch("HTTP 503".into())));
    let mut h = Harness::new(long_streams(), source).await;
    h.start().await;
    h.drain();

    tokio::time::advance(Duration::from_secs(30)).await;
    h.settle().await;

    assert_eq!(errors(&h.drain()), vec!["Could not fetch streams. HTTP 503"]);
    assert_eq!(h.core.catalog.streams().len(), 2);
    assert!(h.current_stream().is_some());
}

// ── configuration ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_config_change_round_trip() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    let patch = ConfigPatch {
        title_keyword: Some("#gamejam".into()),
        vote_timeout_ms: Some(2_000),
        ..ConfigPatch::default()
    };
    h.request(ClientEvent::ConfigChange(patch)).await;

    let ServerEvent::ConfigResponse(config) = h.ask(ClientEvent::RequestConfig).await else {
        panic!("expected requestConfigResponse");
    };
    assert_eq!(config.title_keyword, "#gamejam");
    assert_eq!(config.vote_timeout_ms, 2_000);
    assert_eq!(config.party_channel, "hostchannel");

    let saved = h.store.saved.lock().unwrap().clone().unwrap();
    assert_eq!(saved.title_keyword, "#gamejam");
    assert!(!saved.is_partying);
}

#[tokio::test(start_paused = true)]
async fn test_config_change_while_partying_restarts_and_persists_idle() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    h.start().await;
    let run = h.core.run;
    h.drain();

    let patch = ConfigPatch {
        party_channel: Some("otherchannel".into()),
        ..ConfigPatch::default()
    };
    h.request(ClientEvent::ConfigChange(patch)).await;
    h.settle().await;

    assert!(h.core.run > run);
    assert!(h.core.config.is_partying);
    assert!(h.current_stream().is_some());
    let events = h.drain();
    assert!(events.contains(&ServerEvent::PartyStatusChange(false)));
    assert!(events.contains(&ServerEvent::PartyStatusChange(true)));

    let saved = h.store.saved.lock().unwrap().clone().unwrap();
    assert_eq!(saved.party_channel, "otherchannel");
    assert!(!saved.is_partying);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_patch_is_rejected() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    let patch = ConfigPatch {
        next_command: Some("  ".into()),
        ..ConfigPatch::default()
    };
    h.request(ClientEvent::ConfigChange(patch)).await;

    assert_eq!(errors(&h.drain()).len(), 1);
    assert_eq!(h.core.config.next_command, "!next");
}

#[tokio::test(start_paused = true)]
async fn test_unusable_durations_are_rejected() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a", "b"])).await;
    let patches = [
        ConfigPatch {
            next_command_duration_change_ms: Some(i64::MIN),
            ..ConfigPatch::default()
        },
        ConfigPatch {
            stay_command_duration_change_ms: Some(-5_000),
            ..ConfigPatch::default()
        },
        ConfigPatch {
            current_stream_initial_duration_ms: Some(-1),
            ..ConfigPatch::default()
        },
    ];
    for patch in patches {
        h.request(ClientEvent::ConfigChange(patch)).await;
    }

    assert_eq!(errors(&h.drain()).len(), 3);
    assert_eq!(h.core.config, party_config());
    assert_eq!(h.store.saved.lock().unwrap().clone(), Some(party_config()));

    // The engine keeps running on the old values.
    h.start().await;
    h.drain();
    h.chat("userA", "!next").await;
    assert_eq!(durations(&h.drain()), vec![25_000]);
}

#[tokio::test(start_paused = true)]
async fn test_filtered_stream_edits() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    h.request(ClientEvent::AddFilteredStream("spammer".into())).await;
    assert_eq!(h.core.config.filtered_streams, vec!["spammer".to_string()]);

    h.request(ClientEvent::AddFilteredStream("spammer".into())).await;
    assert_eq!(errors(&h.drain()).len(), 1);
    assert_eq!(h.core.config.filtered_streams.len(), 1);

    h.request(ClientEvent::RemoveFilteredStream("spammer".into())).await;
    assert!(h.core.config.filtered_streams.is_empty());
    let saved = h.store.saved.lock().unwrap().clone().unwrap();
    assert!(saved.filtered_streams.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_state_when_idle() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    let ServerEvent::StateResponse(snapshot) = h.ask(ClientEvent::RequestState).await else {
        panic!("expected requestStateResponse");
    };
    assert!(!snapshot.is_partying);
    assert!(snapshot.current_stream.is_none());
}

// ── credentials ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_save_token_strips_prefix() {
    let mut h = Harness::new(party_config(), ScriptedSource::always(&["a"])).await;
    assert!(!h.core.config.has_token);

    h.request(ClientEvent::SaveToken("oauth:abc123".into())).await;

    assert!(h.core.config.has_token);
    assert_eq!(
        h.credentials.tokens.lock().unwrap().get("partybot").cloned(),
        Some("abc123".to_string())
    );
    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::ConfigResponse(c) if c.has_token)));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_is_deleted() {
    let mut h = Harness::with_validator(
        party_config(),
        ScriptedSource::always(&["a"]),
        Err(PartyError::CredentialInvalid),
        Some("stale"),
    )
    .await;
    assert!(h.core.config.has_token);

    h.core.handle_event(DaemonEvent::ClientConnected).await;
    h.settle().await;

    assert!(!h.core.config.has_token);
    assert!(h.credentials.tokens.lock().unwrap().is_empty());
    let events = h.drain();
    assert_eq!(errors(&events), vec!["Could not validate Twitch OAuth token."]);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::ConfigResponse(c) if !c.has_token)));
}

#[tokio::test(start_paused = true)]
async fn test_validation_outage_keeps_token() {
    let mut h = Harness::with_validator(
        party_config(),
        ScriptedSource::always(&["a"]),
        Err(PartyError::UpstreamFetch("timed out".into())),
        Some("good"),
    )
    .await;

    h.request(ClientEvent::ValidateToken).await;
    h.settle().await;

    assert!(h.core.config.has_token);
    assert_eq!(errors(&h.drain()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_token_stops_party_and_is_debounced() {
    let mut h = Harness::with_validator(
        party_config(),
        ScriptedSource::always(&["a", "b"]),
        Ok(()),
        Some("good"),
    )
    .await;
    h.start().await;
    h.drain();

    h.request(ClientEvent::DeleteToken).await;
    assert!(h.core.session.is_none());
    assert!(!h.core.config.has_token);
    let events = h.drain();
    assert!(events.contains(&ServerEvent::PartyStatusChange(false)));

    // Second request inside the debounce window does nothing.
    h.request(ClientEvent::DeleteToken).await;
    assert!(h.drain().is_empty());
}
