//! Room snapshot store.
//!
//! [`reduce`] folds one [`ServerEvent`] into a [`RoomSnapshot`] and is the
//! only place room state changes. [`RoomStore`] holds the current snapshot,
//! applies every event published on the bus and hands an immutable
//! `Rc<RoomSnapshot>` to watchers whenever it changes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use chrono::Duration;
use pokerroom_shared::{
    CardSelection, Participant, ParticipantId, RoomInfo, RoomStatus, ServerEvent, TimerStart,
    TimerState, Viewer, VoteProgress, VotingStatistics,
};

use crate::bus::{EventBus, Subscription, ANY};

/// Locally cached view of one room session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomSnapshot {
    /// `None` until the first `room_state` arrives.
    pub room: Option<RoomInfo>,
    /// In arrival order, unique by id.
    pub participants: Vec<Participant>,
    pub card_values: Vec<String>,
    pub timer: Option<TimerState>,
    pub viewer: Viewer,
    pub statistics: Option<VotingStatistics>,
    pub story_title: Option<String>,
    /// The card this client last submitted in the current round.
    pub my_selection: Option<String>,
    /// Set when the server closed the room for inactivity.
    pub closed_reason: Option<String>,
}

impl RoomSnapshot {
    pub fn status(&self) -> Option<RoomStatus> {
        self.room.as_ref().map(|room| room.status)
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// `(voted, total)` for progress displays.
    pub fn vote_progress(&self) -> (usize, usize) {
        let voted = self.participants.iter().filter(|p| p.has_voted()).count();
        (voted, self.participants.len())
    }
}

/// Apply `event` to `snapshot`, producing the next snapshot.
///
/// Applying the same event twice yields the same snapshot as applying it
/// once. Events that carry no state (presence, chat, errors, unknown tags)
/// return the snapshot unchanged.
pub fn reduce(snapshot: &RoomSnapshot, event: &ServerEvent) -> RoomSnapshot {
    let mut next = snapshot.clone();
    match event {
        ServerEvent::RoomState(state) => {
            let mut room = state.room.clone();
            let participants = dedup_participants(&state.participants);
            let card_values = if state.card_values.is_empty() {
                room.point_system.card_values()
            } else {
                state.card_values.clone()
            };
            let statistics = state.statistics.clone().or_else(|| {
                (room.status == RoomStatus::Completed && !participants.is_empty())
                    .then(|| VotingStatistics::from_participants(&participants))
            });
            if room.status != RoomStatus::Closed {
                next.closed_reason = None;
            }
            if room.timer_duration.is_none() {
                room.timer_duration = state.timer_state.as_ref().map(|t| t.duration_seconds);
            }

            next.room = Some(room);
            next.participants = participants;
            next.card_values = card_values;
            next.timer = state.timer_state.clone();
            next.viewer = state.viewer.clone();
            next.statistics = statistics;
        }
        ServerEvent::VoteSubmitted(progress) => {
            if let Some(participant) = find_voter(&mut next.participants, progress) {
                if !progress.has_voted {
                    participant.selection = None;
                } else if participant.selection.is_none() {
                    participant.selection = Some(CardSelection::Hidden);
                }
            }
        }
        ServerEvent::CardsRevealed(reveal) => {
            next.participants = dedup_participants(&reveal.participants);
            next.statistics = Some(
                reveal
                    .statistics
                    .clone()
                    .unwrap_or_else(|| VotingStatistics::from_participants(&next.participants)),
            );
            set_status(&mut next, RoomStatus::Completed);
        }
        ServerEvent::VotesReset => start_fresh_round(&mut next),
        ServerEvent::RoundStarted { story_title } => {
            start_fresh_round(&mut next);
            next.story_title = story_title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
        }
        ServerEvent::ParticipantSkipped { participant_id } => {
            if let Some(participant) = next.participants.iter_mut().find(|p| p.id == *participant_id)
            {
                participant.selection = Some(CardSelection::Skipped);
            }
        }
        ServerEvent::TimerStarted(start) => {
            if let Some(timer) = timer_from_start(start) {
                next.timer = Some(timer);
            }
        }
        ServerEvent::TimerStopped => next.timer = None,
        ServerEvent::TimerPaused => {
            if let Some(timer) = next.timer.as_mut() {
                timer.is_active = false;
            }
        }
        ServerEvent::RoomAutoClosed { reason } => {
            set_status(&mut next, RoomStatus::Closed);
            next.closed_reason = Some(
                reason
                    .clone()
                    .unwrap_or_else(|| "Room closed due to inactivity".to_string()),
            );
        }
        ServerEvent::UserConnected(_)
        | ServerEvent::UserDisconnected(_)
        | ServerEvent::TimerExpired
        | ServerEvent::ChatMessage(_)
        | ServerEvent::Error { .. }
        | ServerEvent::ConnectionFailed { .. }
        | ServerEvent::Unknown => {}
    }
    next
}

fn dedup_participants(participants: &[Participant]) -> Vec<Participant> {
    let mut seen = HashSet::new();
    participants
        .iter()
        .filter(|p| seen.insert(p.id))
        .cloned()
        .collect()
}

/// Placeholder name the server uses for every anonymous voter.
const GUEST_USERNAME: &str = "Guest";

/// Match by participant id, then user id, then username. An anonymous
/// guest vote names no one in particular and matches nobody.
fn find_voter<'a>(
    participants: &'a mut [Participant],
    progress: &VoteProgress,
) -> Option<&'a mut Participant> {
    let index = progress
        .participant_id
        .and_then(|id| participants.iter().position(|p| p.id == id))
        .or_else(|| {
            progress
                .user_id
                .and_then(|uid| participants.iter().position(|p| p.user_id == Some(uid)))
        })
        .or_else(|| {
            let anonymous_guest =
                progress.user_id.is_none() && progress.username == GUEST_USERNAME;
            (!progress.username.is_empty() && !anonymous_guest)
                .then(|| {
                    participants
                        .iter()
                        .position(|p| p.username == progress.username)
                })
                .flatten()
        })?;
    participants.get_mut(index)
}

fn start_fresh_round(snapshot: &mut RoomSnapshot) {
    for participant in &mut snapshot.participants {
        participant.selection = None;
    }
    snapshot.statistics = None;
    snapshot.my_selection = None;
    if snapshot.status() != Some(RoomStatus::Closed) {
        set_status(snapshot, RoomStatus::Active);
    }
}

fn set_status(snapshot: &mut RoomSnapshot, status: RoomStatus) {
    if let Some(room) = snapshot.room.as_mut() {
        room.status = status;
    }
}

fn timer_from_start(start: &TimerStart) -> Option<TimerState> {
    let duration = Duration::seconds(i64::from(start.duration));
    let (start_time, end_time) = match (start.start_time, start.end_time) {
        (Some(s), Some(e)) => (s, e),
        (Some(s), None) => (s, s + duration),
        (None, Some(e)) => (e - duration, e),
        (None, None) => return None,
    };
    Some(TimerState {
        is_active: true,
        start_time: Some(start_time),
        end_time: Some(end_time),
        duration_seconds: start.duration,
    })
}

const SNAPSHOT: &str = "snapshot";

/// Shared holder of the current [`RoomSnapshot`].
#[derive(Clone)]
pub struct RoomStore {
    current: Rc<RefCell<Rc<RoomSnapshot>>>,
    watchers: EventBus<Rc<RoomSnapshot>>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            current: Rc::new(RefCell::new(Rc::new(RoomSnapshot::default()))),
            watchers: EventBus::new(),
        }
    }

    /// Apply every event published on `bus`.
    pub fn attach(&self, bus: &EventBus<ServerEvent>) -> Subscription {
        let store = self.clone();
        bus.subscribe(ANY, move |event| store.apply(event))
    }

    pub fn snapshot(&self) -> Rc<RoomSnapshot> {
        Rc::clone(&self.current.borrow())
    }

    pub fn apply(&self, event: &ServerEvent) {
        let next = reduce(&self.current.borrow(), event);
        self.replace(next);
    }

    /// Record the card this client just submitted.
    pub fn set_my_selection(&self, card: Option<String>) {
        let mut next = (*self.snapshot()).clone();
        next.my_selection = card;
        self.replace(next);
    }

    /// Forget the session; watchers see an empty snapshot.
    pub fn reset(&self) {
        self.replace(RoomSnapshot::default());
    }

    /// Called with each new snapshot after it has been stored.
    pub fn watch(&self, handler: impl Fn(&Rc<RoomSnapshot>) + 'static) -> Subscription {
        self.watchers.subscribe(SNAPSHOT, handler)
    }

    pub fn unwatch(&self, subscription: &Subscription) -> bool {
        self.watchers.unsubscribe(subscription)
    }

    fn replace(&self, next: RoomSnapshot) {
        if **self.current.borrow() == next {
            return;
        }
        let next = Rc::new(next);
        *self.current.borrow_mut() = Rc::clone(&next);
        self.watchers.publish(SNAPSHOT, &next);
    }
}
