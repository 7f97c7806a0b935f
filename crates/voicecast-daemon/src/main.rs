mod core;
mod mpv;
mod relay;
mod socket;
mod voice;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use voicecast_proto::catalog::load_catalog_from_toml;
use voicecast_proto::config::Config;
use voicecast_proto::protocol::RelayRequest;
use voicecast_proto::state::StateManager;
use voicecast_scheduler::{EventChannel, MemoryCatalog, VoiceConnector};

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StatusUpdated,
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
        // Only WARN and ERROR reach control clients
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

    let data_dir = voicecast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,voicecast_daemon=debug,voicecast_scheduler=debug",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let catalog = match load_catalog_from_toml(&config.catalog.catalog_toml) {
        Ok(entries) => MemoryCatalog::new(entries),
        Err(e) => {
            warn!(
                "No catalog at {:?} ({}), file and playlist commands will find nothing",
                config.catalog.catalog_toml, e
            );
            MemoryCatalog::new(Vec::new())
        }
    };
    info!("Catalog: {} songs", catalog.len());

    // Event channel — all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);

    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        config.player.default_volume,
    ));

    // Relay link: the scheduler writes requests, the link forwards events
    let (relay_tx, relay_rx) = mpsc::unbounded_channel::<RelayRequest>();
    let _relay_handle = relay::start_link(
        config.relay.address.clone(),
        Duration::from_secs(config.relay.reconnect_delay_secs),
        relay_rx,
        event_tx.clone(),
    );
    let events: Arc<dyn EventChannel> = Arc::new(relay_tx);

    let connector: Arc<dyn VoiceConnector> =
        Arc::new(voice::MpvConnector::new(state_manager.volume().await));

    let daemon_core = core::DaemonCore::new(
        config.clone(),
        state_manager.clone(),
        Arc::new(catalog),
        connector,
        events,
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await;

    let _socket_handle = socket::start_server(
        config.control.bind_address.clone(),
        config.control.port,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
