mod auth;
mod catalog;
mod chat;
mod core;
mod error;
mod http;
mod ledger;
mod router;
mod scheduler;
mod session;
mod socket;
mod store;
mod twitch;

use party_proto::config::Config;
use party_proto::protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// Party event for every connected client.
    Party(ServerEvent),
    /// WARN/ERROR log line, shown by clients as a `log` event.
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so the log layer can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = party_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,hostparty_daemon=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let client = twitch::http_client()?;
    let bridge = Arc::new(chat::BridgeTransport::new());
    let collab = core::Collaborators {
        source: Arc::new(twitch::TwitchStreamSource::new(
            client.clone(),
            config.twitch.api_base.clone(),
        )),
        chat: bridge.clone(),
        config_store: Arc::new(store::JsonConfigStore::new(config.daemon.party_file.clone())),
        credentials: Arc::new(store::FileCredentialStore::new(
            config.daemon.credentials_file.clone(),
        )),
        validator: Arc::new(twitch::TwitchTokenValidator::new(
            client,
            config.twitch.validate_url.clone(),
        )),
    };

    // Event channel: all external inputs funnel into PartyCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let party_core = core::PartyCore::new(
        core::Tuning::from_config(&config),
        collab,
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await;

    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::AppState {
            state_manager: party_core.state_manager(),
            event_tx: event_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            bridge,
        },
    );

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            return;
        }
        let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
    });

    info!("Daemon initialised, running event loop");
    party_core.run(event_rx).await?;

    Ok(())
}
