//! Stores holding the state presentation code reads.

pub mod room;
pub mod timer;

pub use room::{reduce, RoomSnapshot, RoomStore};
pub use timer::{Countdown, Sample, TimerDisplay, TimerPhase, TimerStore};
