//! Wire protocol for the room session socket.
//!
//! Every frame, in both directions, is a JSON object whose `type` field is
//! the only dispatch key:
//!
//! ```text
//! {"type": "vote_submitted", "user_id": 4, "username": "ana", "has_voted": true}
//! {"type": "submit_vote", "card_value": "8"}
//! ```
//!
//! Decoding happens in two steps. [`Envelope::decode`] only checks structure
//! (a JSON object with a string tag); [`Envelope::into_event`] then maps the
//! tag onto a typed [`ServerEvent`]. Tags this client does not know decode to
//! [`ServerEvent::Unknown`] so newer servers stay compatible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::models::{Participant, ParticipantId, RoomInfo, TimerState, Viewer, VotingStatistics};

/// Structurally decoded frame: a type tag plus the remaining fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Parse a text frame. Anything that is not a tagged JSON object is a
    /// [`SyncError::MalformedFrame`].
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::MalformedFrame(e.to_string()))
    }

    /// Map the envelope onto a typed event.
    ///
    /// Fails with [`SyncError::MalformedFrame`] when a known tag carries
    /// fields of the wrong shape.
    pub fn into_event(self) -> Result<ServerEvent, SyncError> {
        let mut object = self.fields;
        object.insert("type".to_string(), Value::String(self.kind));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| SyncError::MalformedFrame(e.to_string()))
    }
}

// --- Server -> client ---

/// Full room snapshot sent on join (and whenever the server resyncs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatePayload {
    pub room: RoomInfo,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub card_values: Vec<String>,
    #[serde(default, alias = "timer")]
    pub timer_state: Option<TimerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<VotingStatistics>,
    #[serde(flatten)]
    pub viewer: Viewer,
}

/// Someone joined or left the room socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: String,
}

/// A participant's vote progress changed; the card itself stays hidden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteProgress {
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_true")]
    pub has_voted: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealPayload {
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub statistics: Option<VotingStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStart {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Why the client gave up on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    RoomNotFound,
    AuthenticationRejected,
    ReconnectLimitExceeded { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomState(RoomStatePayload),
    UserConnected(PresenceNotice),
    UserDisconnected(PresenceNotice),
    VoteSubmitted(VoteProgress),
    CardsRevealed(RevealPayload),
    VotesReset,
    RoundStarted {
        #[serde(default)]
        story_title: Option<String>,
    },
    ParticipantSkipped {
        participant_id: ParticipantId,
    },
    TimerStarted(TimerStart),
    TimerStopped,
    TimerPaused,
    TimerExpired,
    RoomAutoClosed {
        #[serde(default)]
        reason: Option<String>,
    },
    ChatMessage(ChatMessage),
    Error {
        message: String,
    },
    /// Generated locally when the connection gives up. Never sent by a
    /// server; frames carrying this tag are dropped.
    ConnectionFailed {
        reason: String,
        cause: FailureCause,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub const ROOM_STATE: &'static str = "room_state";
    pub const USER_CONNECTED: &'static str = "user_connected";
    pub const USER_DISCONNECTED: &'static str = "user_disconnected";
    pub const VOTE_SUBMITTED: &'static str = "vote_submitted";
    pub const CARDS_REVEALED: &'static str = "cards_revealed";
    pub const VOTES_RESET: &'static str = "votes_reset";
    pub const ROUND_STARTED: &'static str = "round_started";
    pub const PARTICIPANT_SKIPPED: &'static str = "participant_skipped";
    pub const TIMER_STARTED: &'static str = "timer_started";
    pub const TIMER_STOPPED: &'static str = "timer_stopped";
    pub const TIMER_PAUSED: &'static str = "timer_paused";
    pub const TIMER_EXPIRED: &'static str = "timer_expired";
    pub const ROOM_AUTO_CLOSED: &'static str = "room_auto_closed";
    pub const CHAT_MESSAGE: &'static str = "chat_message";
    pub const ERROR: &'static str = "error";
    pub const CONNECTION_FAILED: &'static str = "connection_failed";
    pub const UNKNOWN: &'static str = "unknown";

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomState(_) => Self::ROOM_STATE,
            ServerEvent::UserConnected(_) => Self::USER_CONNECTED,
            ServerEvent::UserDisconnected(_) => Self::USER_DISCONNECTED,
            ServerEvent::VoteSubmitted(_) => Self::VOTE_SUBMITTED,
            ServerEvent::CardsRevealed(_) => Self::CARDS_REVEALED,
            ServerEvent::VotesReset => Self::VOTES_RESET,
            ServerEvent::RoundStarted { .. } => Self::ROUND_STARTED,
            ServerEvent::ParticipantSkipped { .. } => Self::PARTICIPANT_SKIPPED,
            ServerEvent::TimerStarted(_) => Self::TIMER_STARTED,
            ServerEvent::TimerStopped => Self::TIMER_STOPPED,
            ServerEvent::TimerPaused => Self::TIMER_PAUSED,
            ServerEvent::TimerExpired => Self::TIMER_EXPIRED,
            ServerEvent::RoomAutoClosed { .. } => Self::ROOM_AUTO_CLOSED,
            ServerEvent::ChatMessage(_) => Self::CHAT_MESSAGE,
            ServerEvent::Error { .. } => Self::ERROR,
            ServerEvent::ConnectionFailed { .. } => Self::CONNECTION_FAILED,
            ServerEvent::Unknown => Self::UNKNOWN,
        }
    }

    /// The user-facing error this event reports, if any.
    pub fn as_error(&self) -> Option<SyncError> {
        match self {
            ServerEvent::Error { message } => Some(SyncError::ServerReportedError(message.clone())),
            ServerEvent::ConnectionFailed { reason, cause } => Some(match cause {
                FailureCause::RoomNotFound => SyncError::RoomNotFound(reason.clone()),
                FailureCause::AuthenticationRejected => {
                    SyncError::AuthenticationRejected(reason.clone())
                }
                FailureCause::ReconnectLimitExceeded { attempts } => {
                    SyncError::ReconnectLimitExceeded { attempts: *attempts }
                }
            }),
            _ => None,
        }
    }
}

// --- Client -> server ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubmitVote {
        card_value: String,
    },
    RevealCards,
    ResetVotes,
    StartRound {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        story_title: Option<String>,
    },
    SkipParticipant {
        participant_id: ParticipantId,
    },
    StartTimer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
    },
    StopTimer,
    PauseTimer,
    ChatMessage {
        message: String,
    },
    JoinRoom {
        username: String,
    },
}

impl ClientCommand {
    /// Serialize into a text frame.
    pub fn encode(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CardSelection, RoomStatus};
    use serde_json::json;

    fn decode(value: Value) -> ServerEvent {
        Envelope::decode(&value.to_string()).unwrap().into_event().unwrap()
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(SyncError::MalformedFrame(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"no_type": 1}"#),
            Err(SyncError::MalformedFrame(_))
        ));
        assert!(matches!(Envelope::decode("[1,2]"), Err(SyncError::MalformedFrame(_))));
    }

    #[test]
    fn unknown_tags_are_tolerated() {
        let envelope = Envelope::decode(r#"{"type":"confetti","amount":3}"#).unwrap();
        assert_eq!(envelope.kind, "confetti");
        assert_eq!(envelope.into_event().unwrap(), ServerEvent::Unknown);
    }

    #[test]
    fn known_tag_with_bad_shape_is_malformed() {
        let envelope = Envelope::decode(r#"{"type":"participant_skipped"}"#).unwrap();
        assert!(matches!(envelope.into_event(), Err(SyncError::MalformedFrame(_))));
    }

    #[test]
    fn room_state_decodes_viewer_and_room() {
        let event = decode(json!({
            "type": "room_state",
            "room": {
                "id": 12,
                "code": "QX7P",
                "status": "ACTIVE",
                "point_system": "t_shirt",
                "host_username": "maria",
                "enable_timer": true
            },
            "participants": [
                {"id": 1, "user_id": 9, "username": "maria", "card_selection": null, "has_voted": false}
            ],
            "card_values": ["S", "M"],
            "timer_state": null,
            "is_host": true,
            "user_role": "admin",
            "can_control": true,
            "is_anonymous": false
        }));

        let ServerEvent::RoomState(state) = event else {
            panic!("expected room_state");
        };
        assert_eq!(state.room.code, "QX7P");
        assert_eq!(state.room.status, RoomStatus::Active);
        assert!(state.viewer.is_host);
        assert!(state.viewer.can_control);
        assert_eq!(state.participants.len(), 1);
        assert_eq!(state.card_values, vec!["S", "M"]);
        assert!(state.timer_state.is_none());
    }

    #[test]
    fn vote_and_reveal_payloads() {
        let event = decode(json!({
            "type": "vote_submitted", "user_id": null, "username": "Guest", "has_voted": true
        }));
        assert_eq!(
            event,
            ServerEvent::VoteSubmitted(VoteProgress {
                participant_id: None,
                user_id: None,
                username: "Guest".to_string(),
                has_voted: true,
            })
        );

        let event = decode(json!({
            "type": "cards_revealed",
            "participants": [{"id": 1, "username": "a", "card_selection": "8"}],
            "statistics": {"average": 8, "min": 8, "max": 8, "consensus": true, "total_votes": 1}
        }));
        let ServerEvent::CardsRevealed(reveal) = event else {
            panic!("expected cards_revealed");
        };
        assert_eq!(
            reveal.participants[0].selection,
            Some(CardSelection::Value("8".to_string()))
        );
        assert_eq!(reveal.statistics.map(|s| s.total_votes), Some(1));
    }

    #[test]
    fn unit_events_ignore_extra_fields() {
        assert_eq!(decode(json!({"type": "votes_reset"})), ServerEvent::VotesReset);
        assert_eq!(
            decode(json!({"type": "timer_paused", "remaining": 42})),
            ServerEvent::TimerPaused
        );
    }

    #[test]
    fn error_events_surface_verbatim() {
        let event = decode(json!({"type": "error", "message": "Unknown message type"}));
        assert_eq!(
            event.as_error(),
            Some(SyncError::ServerReportedError("Unknown message type".to_string()))
        );
        assert_eq!(event.kind(), "error");
    }

    #[test]
    fn commands_encode_flat() {
        let frame = ClientCommand::SubmitVote {
            card_value: "13".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&frame).unwrap(),
            json!({"type": "submit_vote", "card_value": "13"})
        );

        let frame = ClientCommand::RevealCards.encode().unwrap();
        assert_eq!(frame, r#"{"type":"reveal_cards"}"#);

        let frame = ClientCommand::StartTimer { duration: None }.encode().unwrap();
        assert_eq!(frame, r#"{"type":"start_timer"}"#);

        let frame = ClientCommand::SkipParticipant { participant_id: 4 }.encode().unwrap();
        assert_eq!(frame, r#"{"type":"skip_participant","participant_id":4}"#);
    }
}
