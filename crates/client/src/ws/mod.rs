//! Real-time room session over WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────┐  TransportOp  ┌───────────────┐
//! │  RoomClient  │────────────▶│  Connection  │──────────────▶│ TransportLoop │◀──▶ server
//! │  (handles)   │             │ (state mach.)│◀──────────────│ (socket, tick)│
//! └──────────────┘             └──────────────┘   callbacks   └───────────────┘
//!        ▲                            │ Deliver(event)
//!        │ snapshots                  ▼
//! ┌──────────────┐  apply      ┌──────────────┐
//! │  RoomStore   │◀────────────│   EventBus   │────▶ subscribers
//! │  TimerStore  │             └──────────────┘
//! └──────────────┘
//! ```
//!
//! Everything runs on one thread. Presentation code reads snapshots from the
//! store (or subscribes to raw events on the bus) and issues commands
//! through [`RoomClient`].
//!
//! ```rust,ignore
//! let (client, transport) = RoomClient::new(ClientConfig::from_env());
//! tokio::task::spawn_local(transport.run());
//!
//! client.watch(|snapshot| println!("{} voted", snapshot.vote_progress().0));
//! client.connect("QX7P", None).await?;
//! client.submit_vote("8")?;
//! ```

mod connection;
mod manager;

pub use connection::{
    Backoff, CloseCause, Connection, ConnectionAction, ConnectionState, ReconnectConfig,
    TransportLoop, TransportOp, AUTH_FAILED_REASON, CLOSE_AUTH_FAILED, CLOSE_GOING_AWAY,
    CLOSE_NORMAL, CLOSE_ROOM_NOT_FOUND, CONNECTION_LOST_REASON, ROOM_NOT_FOUND_REASON,
};
pub use manager::RoomClient;
