//! Shared types for the pokerroom session client: wire protocol, room
//! models and the error taxonomy.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
