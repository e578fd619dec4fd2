//! Pokerroom - join a room from the terminal and follow it live.

use std::cell::RefCell;

use anyhow::Context;
use clap::Parser;
use futures_channel::oneshot;
use pokerroom_client::shared::{ServerEvent, SyncError};
use pokerroom_client::{ClientConfig, RoomClient, ANY};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pokerroom", about = "Follow a planning poker room in real time")]
struct Args {
    /// Room code to join
    room: String,

    /// Session endpoint base, e.g. wss://poker.example.com
    #[arg(long)]
    url: Option<String>,

    /// Bearer credential; omit to join anonymously
    #[arg(long, env = "POKERROOM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Introduce yourself under this name after joining anonymously
    #[arg(long)]
    guest_name: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pokerroom_client=debug")),
        )
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = args.url.clone() {
        config.base_url = url;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(args, config))
}

async fn run(args: Args, config: ClientConfig) -> anyhow::Result<()> {
    let (client, transport) = RoomClient::new(config);
    let transport = tokio::task::spawn_local(transport.run());

    client.watch(|snapshot| {
        let (voted, total) = snapshot.vote_progress();
        tracing::info!(
            room = snapshot.room.as_ref().map(|r| r.code.as_str()).unwrap_or("-"),
            status = ?snapshot.status(),
            voted,
            total,
            story = snapshot.story_title.as_deref().unwrap_or(""),
            "Room updated"
        );
        if let Some(stats) = &snapshot.statistics {
            tracing::info!(
                average = stats.average,
                min = stats.min,
                max = stats.max,
                consensus = stats.consensus,
                "Votes revealed"
            );
        }
    });
    let failed = terminal_failure(&client);
    client.subscribe(ANY, |event| {
        if let Some(error) = event.as_error() {
            tracing::error!(%error, "Room reported a problem");
        }
        if let ServerEvent::ChatMessage(chat) = event {
            tracing::info!(from = %chat.username, "{}", chat.message);
        }
    });
    client.timer().on_expired(|_| tracing::info!("Time is up"));

    client
        .connect(&args.room, args.token.as_deref())
        .await
        .with_context(|| format!("could not join room {}", args.room))?;

    if let (None, Some(name)) = (&args.token, &args.guest_name) {
        client.join_room(name)?;
    }

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("Leaving room");
            client.disconnect();
            Ok(())
        }
        Ok(error) = failed => Err(error),
    };

    // The loop drains the queued close before it notices the handle is gone.
    drop(client);
    transport.await.context("transport loop panicked")?;
    outcome.with_context(|| format!("lost room {}", args.room))
}

/// Resolves with the error once the session ends for good.
fn terminal_failure(client: &RoomClient) -> oneshot::Receiver<SyncError> {
    let (tx, rx) = oneshot::channel();
    let tx = RefCell::new(Some(tx));
    client.subscribe(ServerEvent::CONNECTION_FAILED, move |event| {
        if let (Some(error), Some(tx)) = (event.as_error(), tx.borrow_mut().take()) {
            let _ = tx.send(error);
        }
    });
    rx
}
