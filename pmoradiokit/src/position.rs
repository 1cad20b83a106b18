//! Playback position estimation.
//!
//! The channel only pushes metadata when it changes, so position is
//! extrapolated locally from the last update: `elapsed = now - updated_at`.
//! The estimate drifts if client and server clocks disagree; this is an
//! accepted approximation.
//!
//! # Invariants
//!
//! - At most one timer is live per estimator; arming clears the previous one
//! - Each arm cycle has its own generation, so a superseded timer never
//!   reports a position
//! - A timer stops on its own once `elapsed > duration`

use crate::metadata::MetadataUpdate;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Last known point of playback: track duration and when it was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub duration_ms: u64,
    pub updated_at_ms: i64,
}

/// Outcome of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Estimated position in milliseconds, within the track duration
    Position(i64),
    /// Elapsed time went past the duration; the estimate is no longer trusted
    Expired(i64),
}

impl Anchor {
    /// Build an anchor from an update carrying both a duration and a timestamp
    pub fn from_update(update: &MetadataUpdate) -> Option<Self> {
        Some(Self {
            duration_ms: update.duration_ms()?,
            updated_at_ms: update.updated_at_ms()?,
        })
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.updated_at_ms
    }

    pub fn tick(&self, now_ms: i64) -> Tick {
        let elapsed = self.elapsed_ms(now_ms);
        let duration = i64::try_from(self.duration_ms).unwrap_or(i64::MAX);
        if elapsed > duration {
            Tick::Expired(elapsed)
        } else {
            Tick::Position(elapsed)
        }
    }
}

struct ActiveTimer {
    generation: u64,
    anchor: Anchor,
    handle: JoinHandle<()>,
}

/// Owner of the single position timer.
#[derive(Default)]
pub(crate) struct PositionEstimator {
    active: Option<ActiveTimer>,
    generation: u64,
}

impl PositionEstimator {
    /// Start a repeating timer for `anchor`, replacing any previous one.
    ///
    /// The first tick fires one full `period` after arming. `on_tick`
    /// receives the arm generation and returns `false` to stop the timer.
    pub(crate) fn arm<F>(
        &mut self,
        runtime: &Handle,
        period: Duration,
        anchor: Anchor,
        clock: Arc<dyn Clock>,
        on_tick: F,
    ) -> u64
    where
        F: Fn(u64, Tick) -> bool + Send + 'static,
    {
        self.clear();
        self.generation += 1;
        let generation = self.generation;

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let tick = anchor.tick(clock.now_ms());
                if !on_tick(generation, tick) {
                    break;
                }
            }
        });

        self.active = Some(ActiveTimer {
            generation,
            anchor,
            handle,
        });
        generation
    }

    /// Cancel the live timer. Returns whether there was one.
    pub(crate) fn clear(&mut self) -> bool {
        match self.active.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Release the slot from inside the timer task itself.
    ///
    /// Does nothing if `generation` has been superseded.
    pub(crate) fn finish(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn anchor(&self) -> Option<Anchor> {
        self.active.as_ref().map(|timer| timer.anchor)
    }
}

impl Drop for PositionEstimator {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for PositionEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionEstimator")
            .field("generation", &self.generation)
            .field("anchor", &self.anchor())
            .finish()
    }
}
