use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::countdown::model::Countdown;
use crate::countdown::remaining::{TimeRemaining, compute};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimerState {
    Active,
    Stopped,
}

#[derive(Debug, Clone)]
struct TrackedCountdown {
    target_utc: DateTime<Utc>,
    state: TimerState,
}

/// Receives one render per tracked countdown per tick, plus the single
/// terminal render when an entry expires.
pub type RenderCallback = Box<dyn FnMut(&str, TimeRemaining)>;

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub rendered: usize,
    pub expired: usize,
}

/// Tracked-set registry driving the once-per-second recompute cycle. One
/// shared tick iterates every active entry; there is never more than one
/// live timer slot per id. The owner supplies `now` on every call, so the
/// scheduler itself never reads the clock.
pub struct TickScheduler {
    tracked: BTreeMap<String, TrackedCountdown>,
    on_update: RenderCallback,
}

impl TickScheduler {
    pub fn new(on_update: RenderCallback) -> Self {
        Self {
            tracked: BTreeMap::new(),
            on_update,
        }
    }

    /// Arms a countdown. Re-registering an id replaces its previous slot, so
    /// a double register can never produce doubled renders. No render is
    /// delivered here; the first one arrives on the next tick.
    pub fn register(&mut self, id: &str, target_utc: DateTime<Utc>) {
        self.tracked.insert(
            id.to_string(),
            TrackedCountdown {
                target_utc,
                state: TimerState::Active,
            },
        );
    }

    /// Drops a countdown from the tracked set. Unknown ids are a no-op:
    /// a delete can race an entry that already expired and self-stopped.
    pub fn unregister(&mut self, id: &str) {
        self.tracked.remove(id);
    }

    /// Rebuilds the tracked set from a bulk load. Future targets are armed;
    /// already-past targets get exactly one immediate expired render and sit
    /// in the stopped state, still listed but never ticked.
    pub fn register_all(&mut self, countdowns: &[Countdown], now: DateTime<Utc>) {
        self.tracked.clear();
        for countdown in countdowns {
            if countdown.target_utc > now {
                self.register(&countdown.id, countdown.target_utc);
            } else {
                (self.on_update)(&countdown.id, TimeRemaining::EXPIRED);
                self.tracked.insert(
                    countdown.id.clone(),
                    TrackedCountdown {
                        target_utc: countdown.target_utc,
                        state: TimerState::Stopped,
                    },
                );
            }
        }
    }

    /// One recompute-and-render pass over every active entry. An entry whose
    /// result comes back expired receives that terminal render and stops, so
    /// its displayed state never changes again.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let Self { tracked, on_update } = self;
        for (id, entry) in tracked.iter_mut() {
            if entry.state != TimerState::Active {
                continue;
            }
            let remaining = compute(entry.target_utc, now);
            on_update(id, remaining);
            outcome.rendered += 1;
            if remaining.expired {
                entry.state = TimerState::Stopped;
                outcome.expired += 1;
            }
        }
        outcome
    }

    pub fn state_of(&self, id: &str) -> Option<TimerState> {
        self.tracked.get(id).map(|entry| entry.state)
    }

    pub fn active_len(&self) -> usize {
        self.tracked
            .values()
            .filter(|entry| entry.state == TimerState::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}
