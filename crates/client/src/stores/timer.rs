//! Countdown display derived from the room's absolute timer.
//!
//! The server owns time: a running timer is an `end_time`, and the value
//! shown is always `max(0, end_time - now)` resampled on every tick. While
//! paused the last sampled value is held. Resuming asks the server for a
//! new timer of the held length, which yields a fresh `end_time`.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use pokerroom_shared::TimerState;

use crate::bus::{EventBus, Subscription};
use crate::stores::RoomStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerPhase {
    #[default]
    Stopped,
    Running,
    Paused,
    Expired,
}

/// What a countdown widget should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerDisplay {
    pub remaining_secs: u64,
    pub phase: TimerPhase,
}

/// Result of sampling the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub display: TimerDisplay,
    /// True on the one sample where the countdown first reached zero.
    pub expired: bool,
}

#[derive(Debug, Default)]
pub struct Countdown {
    source: Option<TimerState>,
    end_time: Option<DateTime<Utc>>,
    phase: TimerPhase,
    remaining: u64,
    expiry_signalled: bool,
}

impl Countdown {
    pub fn display(&self) -> TimerDisplay {
        TimerDisplay {
            remaining_secs: self.remaining,
            phase: self.phase,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    /// Remaining seconds held while paused.
    pub fn paused_remaining(&self) -> Option<u64> {
        (self.phase == TimerPhase::Paused).then_some(self.remaining)
    }

    /// Follow the room's timer. Returns `None` when it has not changed
    /// since the last call.
    pub fn sync(&mut self, timer: Option<&TimerState>, now: DateTime<Utc>) -> Option<Sample> {
        if self.source.as_ref() == timer {
            return None;
        }
        self.source = timer.cloned();

        let Some(timer) = timer else {
            *self = Countdown::default();
            return Some(self.sample(false));
        };

        let same_countdown = timer.end_time.is_some() && timer.end_time == self.end_time;
        if !same_countdown {
            self.expiry_signalled = false;
        }
        let left = timer.remaining_at(now);

        if timer.is_active {
            if timer.end_time.is_none() {
                self.end_time = None;
                self.phase = TimerPhase::Stopped;
                self.remaining = 0;
                return Some(self.sample(false));
            }
            self.remaining = if same_countdown && self.phase == TimerPhase::Running {
                self.remaining.min(left)
            } else {
                left
            };
            self.end_time = timer.end_time;
            self.phase = TimerPhase::Running;
            return Some(self.settle());
        }

        // Paused: hold what was showing, or seed from the server's view
        // when this countdown was never seen running.
        let duration = u64::from(timer.duration_seconds);
        self.remaining = match (same_countdown, self.phase) {
            (true, TimerPhase::Running) => self.remaining.min(left),
            (true, TimerPhase::Paused | TimerPhase::Expired) => self.remaining,
            _ if timer.end_time.is_some() => duration.min(left),
            _ => duration,
        };
        self.end_time = timer.end_time;
        self.phase = TimerPhase::Paused;
        Some(self.sample(false))
    }

    /// Resample a running countdown. Never increases the value shown.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Sample {
        if self.phase != TimerPhase::Running {
            return self.sample(false);
        }
        let left = match self.end_time {
            Some(end) => u64::try_from((end - now).num_seconds()).unwrap_or(0),
            None => 0,
        };
        self.remaining = self.remaining.min(left);
        self.settle()
    }

    /// Restart a paused countdown locally from the held value and return
    /// that value, which is the duration to request from the server.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let remaining = self.paused_remaining()?;
        self.end_time = Some(now + Duration::seconds(remaining as i64));
        self.phase = TimerPhase::Running;
        self.expiry_signalled = false;
        Some(remaining)
    }

    fn settle(&mut self) -> Sample {
        if self.remaining > 0 {
            return self.sample(false);
        }
        self.phase = TimerPhase::Expired;
        let first = !std::mem::replace(&mut self.expiry_signalled, true);
        self.sample(first)
    }

    fn sample(&self, expired: bool) -> Sample {
        Sample {
            display: self.display(),
            expired,
        }
    }
}

const DISPLAY: &str = "display";
const EXPIRED: &str = "expired";

/// Shared countdown plus its display and expiry notifications.
#[derive(Clone, Default)]
pub struct TimerStore {
    countdown: Rc<RefCell<Countdown>>,
    events: EventBus<TimerDisplay>,
}

impl TimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the timer of every snapshot `store` produces.
    pub fn attach(&self, store: &RoomStore) -> Subscription {
        let timer = self.clone();
        store.watch(move |snapshot| timer.sync(snapshot.timer.as_ref(), Utc::now()))
    }

    pub fn sync(&self, timer: Option<&TimerState>, now: DateTime<Utc>) {
        let sample = self.countdown.borrow_mut().sync(timer, now);
        if let Some(sample) = sample {
            self.emit(sample);
        }
    }

    pub fn tick(&self, now: DateTime<Utc>) {
        let sample = self.countdown.borrow_mut().tick(now);
        self.emit(sample);
    }

    pub fn resume(&self, now: DateTime<Utc>) -> Option<u64> {
        let remaining = self.countdown.borrow_mut().resume(now)?;
        self.emit(Sample {
            display: self.display(),
            expired: false,
        });
        Some(remaining)
    }

    pub fn clear(&self) {
        self.sync(None, Utc::now());
    }

    pub fn display(&self) -> TimerDisplay {
        self.countdown.borrow().display()
    }

    pub fn paused_remaining(&self) -> Option<u64> {
        self.countdown.borrow().paused_remaining()
    }

    pub fn is_running(&self) -> bool {
        self.countdown.borrow().is_running()
    }

    /// Called with the display value on every sample.
    pub fn watch(&self, handler: impl Fn(&TimerDisplay) + 'static) -> Subscription {
        self.events.subscribe(DISPLAY, handler)
    }

    /// Called once each time a running countdown reaches zero.
    pub fn on_expired(&self, handler: impl Fn(&TimerDisplay) + 'static) -> Subscription {
        self.events.subscribe(EXPIRED, handler)
    }

    pub fn unwatch(&self, subscription: &Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    fn emit(&self, sample: Sample) {
        self.events.publish(DISPLAY, &sample.display);
        if sample.expired {
            tracing::debug!("Countdown expired");
            self.events.publish(EXPIRED, &sample.display);
        }
    }
}
