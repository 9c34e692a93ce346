//! Process-wide logical clock
//!
//! The clock is a monotonically increasing tick counter advanced by exactly
//! one per configured interval. Time-windowed policy (token cool-downs) is
//! expressed in ticks rather than wall time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// One unit of the logical clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn add(self, other: Tick) -> Tick {
        Tick(self.0.saturating_add(other.0))
    }

    pub fn before(self, other: Tick) -> bool {
        self.0 < other.0
    }

    pub fn after(self, other: Tick) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct Clock {
    tick: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        Tick(self.tick.load(Ordering::Acquire))
    }

    /// Advances the clock by one tick and returns the new value.
    pub fn advance(&self) -> Tick {
        Tick(self.tick.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Spawns the ticker task. It runs until the runtime shuts down.
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let clock = Arc::clone(self);

        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // Skip the first tick since it fires immediately
            timer.tick().await;

            loop {
                timer.tick().await;
                clock.advance();
            }
        })
    }
}
