//! User intents sent to the room.
//!
//! Every method fails with [`SyncError::NotConnected`] and sends nothing
//! unless the session is open. Commands are not buffered across a
//! reconnect; callers decide whether to retry.

use chrono::Utc;
use pokerroom_shared::{ClientCommand, ParticipantId, SyncError};

use crate::ws::RoomClient;

impl RoomClient {
    /// Cast (or change) this client's vote.
    pub fn submit_vote(&self, card_value: &str) -> Result<(), SyncError> {
        if !self.state().is_open() {
            return Err(SyncError::NotConnected);
        }
        if card_value.trim().is_empty() {
            return Err(SyncError::InvalidCommand("card value is required".to_string()));
        }
        self.send(&ClientCommand::SubmitVote {
            card_value: card_value.to_string(),
        })?;
        self.store().set_my_selection(Some(card_value.to_string()));
        Ok(())
    }

    pub fn reveal_cards(&self) -> Result<(), SyncError> {
        self.send(&ClientCommand::RevealCards)
    }

    pub fn reset_votes(&self) -> Result<(), SyncError> {
        self.send(&ClientCommand::ResetVotes)
    }

    /// Start a new round, optionally naming the story being estimated.
    pub fn start_round(&self, story_title: Option<&str>) -> Result<(), SyncError> {
        self.send(&ClientCommand::StartRound {
            story_title: story_title.map(str::to_string),
        })
    }

    pub fn skip_participant(&self, participant_id: ParticipantId) -> Result<(), SyncError> {
        self.send(&ClientCommand::SkipParticipant { participant_id })
    }

    /// Start the countdown; `None` uses the room's configured duration.
    pub fn start_timer(&self, duration: Option<u32>) -> Result<(), SyncError> {
        self.send(&ClientCommand::StartTimer { duration })
    }

    pub fn stop_timer(&self) -> Result<(), SyncError> {
        self.send(&ClientCommand::StopTimer)
    }

    pub fn pause_timer(&self) -> Result<(), SyncError> {
        self.send(&ClientCommand::PauseTimer)
    }

    /// Continue a paused countdown from the value it was paused at.
    pub fn resume_timer(&self) -> Result<(), SyncError> {
        if !self.state().is_open() {
            return Err(SyncError::NotConnected);
        }
        let remaining = self
            .timer()
            .paused_remaining()
            .ok_or_else(|| SyncError::InvalidState {
                state: "timer not paused".to_string(),
                operation: "resume timer",
            })?;
        let duration = u32::try_from(remaining).unwrap_or(u32::MAX);
        self.start_timer(Some(duration))?;
        self.timer().resume(Utc::now());
        Ok(())
    }

    pub fn send_chat(&self, message: &str) -> Result<(), SyncError> {
        self.send(&ClientCommand::ChatMessage {
            message: message.to_string(),
        })
    }

    /// Introduce an anonymous guest by name.
    pub fn join_room(&self, username: &str) -> Result<(), SyncError> {
        self.send(&ClientCommand::JoinRoom {
            username: username.to_string(),
        })
    }
}
