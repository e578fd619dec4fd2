//! Pokerroom client - real-time room synchronization
//!
//! Keeps a local view of a planning-poker room in step with the server:
//! one WebSocket session per room, a reducer folding server events into
//! immutable snapshots, a countdown derived from absolute server time, and
//! typed commands for the actions a participant or host can take.

pub mod bus;
pub mod commands;
pub mod config;
pub mod stores;
pub mod ws;

pub use bus::{EventBus, Subscription, ANY};
pub use config::{ClientConfig, RoomEndpoint};
pub use stores::{RoomSnapshot, RoomStore, TimerDisplay, TimerPhase, TimerStore};
pub use ws::{ConnectionState, ReconnectConfig, RoomClient, TransportLoop};

pub use pokerroom_shared as shared;
