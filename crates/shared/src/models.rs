//! Room, participant, timer and statistics models shared by the wire
//! protocol and the client-side room store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel card value the server stores for a skipped participant.
pub const SKIPPED: &str = "SKIPPED";

/// Stable participant identifier, unique within a room.
pub type ParticipantId = i64;

// --- Room ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    #[default]
    #[serde(alias = "PENDING")]
    Waiting,
    Active,
    Completed,
    Closed,
}

/// Estimation scale configured for a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointSystem {
    #[default]
    Fibonacci,
    ModifiedFibonacci,
    #[serde(rename = "powers_of_2")]
    PowersOf2,
    TShirt,
    /// A scale this client does not know; the server must send the deck.
    #[serde(other)]
    Custom,
}

impl PointSystem {
    /// The selectable cards for this scale, in display order.
    pub fn card_values(self) -> Vec<String> {
        let deck: &[&str] = match self {
            PointSystem::Fibonacci => &["1", "2", "3", "5", "8", "13", "21", "?", "☕"],
            PointSystem::ModifiedFibonacci => &[
                "0", "0.5", "1", "2", "3", "5", "8", "13", "20", "40", "100", "?", "☕",
            ],
            PointSystem::PowersOf2 => &["1", "2", "4", "8", "16", "32", "64", "?", "☕"],
            PointSystem::TShirt => &["XS", "S", "M", "L", "XL", "XXL", "?", "☕"],
            PointSystem::Custom => &[],
        };
        deck.iter().map(|c| c.to_string()).collect()
    }
}

/// Identity and configuration of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoomInfo {
    #[serde(default)]
    pub id: Option<i64>,
    pub code: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub point_system: PointSystem,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub host_username: String,
    #[serde(default)]
    pub enable_timer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_duration: Option<u32>,
}

// --- Viewer ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Participant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// The local client's own role within the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Viewer {
    #[serde(default)]
    pub is_host: bool,
    #[serde(default, rename = "user_role")]
    pub role: UserRole,
    #[serde(default)]
    pub can_control: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<CurrentUser>,
}

// --- Participants ---

/// What a participant has put on the table for the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardSelection {
    /// Voted, but the card is not revealed yet.
    Hidden,
    /// Skipped by a moderator; counts as voted, never as a number.
    Skipped,
    /// A revealed card.
    Value(String),
}

impl CardSelection {
    /// The card as it appears on the wire; `None` while hidden.
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            CardSelection::Hidden => None,
            CardSelection::Skipped => Some(SKIPPED),
            CardSelection::Value(v) => Some(v.as_str()),
        }
    }

    /// Numeric value of the card, if it has one.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            CardSelection::Value(v) => parse_numeric_card(v),
            _ => None,
        }
    }
}

/// Cards like "0.5" and "13" are numeric; "?", "☕" and t-shirt sizes are not.
pub fn parse_numeric_card(card: &str) -> Option<f64> {
    if card.is_empty() || !card.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    card.parse::<f64>().ok()
}

/// One voting member of a room.
///
/// `has_voted` is derived from the selection rather than stored, so a
/// participant can never claim a vote without a selection or the reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParticipantWire", into = "ParticipantWire")]
pub struct Participant {
    pub id: ParticipantId,
    pub user_id: Option<i64>,
    pub username: String,
    pub selection: Option<CardSelection>,
    pub is_anonymous: bool,
}

impl Participant {
    pub fn has_voted(&self) -> bool {
        self.selection.is_some()
    }

    /// The card value as the server would report it.
    pub fn card_selection(&self) -> Option<&str> {
        self.selection.as_ref().and_then(CardSelection::as_wire)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParticipantWire {
    id: ParticipantId,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    card_selection: Option<String>,
    #[serde(default)]
    has_voted: bool,
    #[serde(default)]
    is_anonymous: bool,
}

impl From<ParticipantWire> for Participant {
    fn from(wire: ParticipantWire) -> Self {
        let selection = match wire.card_selection {
            Some(card) if card == SKIPPED => Some(CardSelection::Skipped),
            Some(card) if !card.is_empty() => Some(CardSelection::Value(card)),
            _ if wire.has_voted => Some(CardSelection::Hidden),
            _ => None,
        };
        Self {
            id: wire.id,
            user_id: wire.user_id,
            username: wire.username,
            selection,
            is_anonymous: wire.is_anonymous,
        }
    }
}

impl From<Participant> for ParticipantWire {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            has_voted: p.has_voted(),
            card_selection: p.card_selection().map(str::to_string),
            username: p.username,
            is_anonymous: p.is_anonymous,
        }
    }
}

// --- Timer ---

/// A countdown anchored to absolute server time.
///
/// Remaining time is always `max(0, end_time - now)`; nothing stores a
/// ticking "seconds left" counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "duration")]
    pub duration_seconds: u32,
}

impl TimerState {
    /// A running timer of `duration_seconds` starting at `start`.
    pub fn started_at(start: DateTime<Utc>, duration_seconds: u32) -> Self {
        Self {
            is_active: true,
            start_time: Some(start),
            end_time: Some(start + Duration::seconds(i64::from(duration_seconds))),
            duration_seconds,
        }
    }

    /// Whole seconds left at `now`, never negative.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        match self.end_time {
            Some(end) => u64::try_from((end - now).num_seconds()).unwrap_or(0),
            None => 0,
        }
    }
}

// --- Statistics ---

/// Outcome of a reveal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingStatistics {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub consensus: bool,
    pub total_votes: u32,
}

impl VotingStatistics {
    /// Derive statistics from revealed participants.
    ///
    /// Only numeric cards feed average/min/max; every participant with a
    /// selection (skipped and "?" included) counts towards `total_votes`.
    pub fn from_participants(participants: &[Participant]) -> Self {
        let total_votes = participants.iter().filter(|p| p.has_voted()).count() as u32;
        let numeric: Vec<f64> = participants
            .iter()
            .filter_map(|p| p.selection.as_ref().and_then(CardSelection::numeric))
            .collect();

        if numeric.is_empty() {
            return Self {
                average: 0.0,
                min: 0.0,
                max: 0.0,
                consensus: false,
                total_votes,
            };
        }

        let sum: f64 = numeric.iter().sum();
        let average = round2(sum / numeric.len() as f64);
        let min = numeric.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numeric.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            average,
            min,
            max,
            consensus: min == max,
            total_votes,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn voter(id: ParticipantId, card: Option<&str>) -> Participant {
        Participant {
            id,
            user_id: Some(id),
            username: format!("user{id}"),
            selection: card.map(|c| match c {
                SKIPPED => CardSelection::Skipped,
                other => CardSelection::Value(other.to_string()),
            }),
            is_anonymous: false,
        }
    }

    #[test]
    fn statistics_for_split_reveal() {
        let stats = VotingStatistics::from_participants(&[
            voter(1, Some("5")),
            voter(2, Some("5")),
            voter(3, Some("3")),
        ]);
        assert_eq!(stats.average, 4.33);
        assert_eq!(stats.min, 3.0);
        assert_eq!(stats.max, 5.0);
        assert!(!stats.consensus);
        assert_eq!(stats.total_votes, 3);
    }

    #[test]
    fn non_numeric_cards_count_as_votes_but_not_numbers() {
        let stats = VotingStatistics::from_participants(&[
            voter(1, Some("8")),
            voter(2, Some("?")),
            voter(3, Some("☕")),
            voter(4, Some(SKIPPED)),
            voter(5, None),
        ]);
        assert_eq!(stats.average, 8.0);
        assert!(stats.consensus);
        assert_eq!(stats.total_votes, 4);
    }

    #[test]
    fn no_numeric_votes_reports_zeroes() {
        let stats = VotingStatistics::from_participants(&[voter(1, Some("XL")), voter(2, None)]);
        assert_eq!(stats.average, 0.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 0.0);
        assert!(!stats.consensus);
        assert_eq!(stats.total_votes, 1);
    }

    #[test]
    fn numeric_card_parsing() {
        assert_eq!(parse_numeric_card("0.5"), Some(0.5));
        assert_eq!(parse_numeric_card("100"), Some(100.0));
        assert_eq!(parse_numeric_card("?"), None);
        assert_eq!(parse_numeric_card("-1"), None);
        assert_eq!(parse_numeric_card(""), None);
        assert_eq!(parse_numeric_card("1.2.3"), None);
    }

    #[test]
    fn participant_wire_hidden_vote() {
        let p: Participant = serde_json::from_value(serde_json::json!({
            "id": 7,
            "user_id": 3,
            "username": "ana",
            "card_selection": null,
            "has_voted": true
        }))
        .unwrap();
        assert_eq!(p.selection, Some(CardSelection::Hidden));
        assert!(p.has_voted());
        assert_eq!(p.card_selection(), None);

        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["has_voted"], true);
        assert!(back["card_selection"].is_null());
    }

    #[test]
    fn participant_wire_flag_follows_card() {
        // A card without the flag still counts as a vote.
        let p: Participant = serde_json::from_value(serde_json::json!({
            "id": 1,
            "username": "bo",
            "card_selection": "SKIPPED",
            "has_voted": false
        }))
        .unwrap();
        assert_eq!(p.selection, Some(CardSelection::Skipped));

        let p: Participant = serde_json::from_value(serde_json::json!({
            "id": 2,
            "username": "cy",
            "card_selection": ""
        }))
        .unwrap();
        assert!(!p.has_voted());
    }

    #[test]
    fn decks_follow_point_system() {
        assert_eq!(PointSystem::TShirt.card_values().first().map(String::as_str), Some("XS"));
        assert_eq!(PointSystem::ModifiedFibonacci.card_values().len(), 13);
        assert!(PointSystem::Custom.card_values().is_empty());

        let parsed: PointSystem = serde_json::from_str("\"powers_of_2\"").unwrap();
        assert_eq!(parsed, PointSystem::PowersOf2);
        let parsed: PointSystem = serde_json::from_str("\"sizes_of_planets\"").unwrap();
        assert_eq!(parsed, PointSystem::Custom);
    }

    #[test]
    fn pending_is_waiting() {
        let status: RoomStatus = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(status, RoomStatus::Waiting);
        assert_eq!(serde_json::to_string(&RoomStatus::Completed).unwrap(), "\"COMPLETED\"");
    }

    proptest! {
        #[test]
        fn statistics_are_bounded_and_counted(
            cards in prop::collection::vec(
                prop::option::of(prop::sample::select(vec![
                    "0", "0.5", "1", "3", "8", "21", "100", "?", "☕", "XL", SKIPPED,
                ])),
                0..12,
            )
        ) {
            let participants: Vec<Participant> = cards
                .iter()
                .enumerate()
                .map(|(i, card)| voter(i as ParticipantId, *card))
                .collect();
            let stats = VotingStatistics::from_participants(&participants);

            let voted = cards.iter().filter(|c| c.is_some()).count() as u32;
            prop_assert_eq!(stats.total_votes, voted);
            prop_assert!(stats.min <= stats.max);
            prop_assert!(stats.average >= stats.min - 0.005);
            prop_assert!(stats.average <= stats.max + 0.005);
            if stats.consensus {
                prop_assert_eq!(stats.min, stats.max);
                prop_assert!(stats.total_votes > 0);
            }
        }
    }

    #[test]
    fn timer_remaining_is_clamped() {
        let start = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let timer = TimerState::started_at(start, 300);
        assert_eq!(timer.remaining_at(start + Duration::seconds(100)), 200);
        assert_eq!(timer.remaining_at(start + Duration::seconds(301)), 0);
    }
}
