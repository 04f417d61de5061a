use chronoverse_common::UniverseId;
use serde::{Deserialize, Serialize};

/// Default global simulation rate.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 20;

/// Errors from clock operations.
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    #[error("rate multiplier must be strictly positive and finite, got {0}")]
    InvalidRate(f64),
    #[error("elapsed real time must be non-negative and finite, got {0}")]
    InvalidElapsed(f64),
}

/// The one monotonic global counter every universe clock derives from.
///
/// Real elapsed seconds accumulate fractionally; the tick only ever moves
/// forward by whole steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalClock {
    tick: u64,
    ticks_per_second: u32,
    #[serde(skip)]
    fractional: f64,
}

impl GlobalClock {
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            tick: 0,
            ticks_per_second: ticks_per_second.max(1),
            fractional: 0.0,
        }
    }

    /// Resume a clock at a persisted tick.
    pub fn at_tick(tick: u64, ticks_per_second: u32) -> Self {
        Self {
            tick,
            ticks_per_second: ticks_per_second.max(1),
            fractional: 0.0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// Advance by real elapsed seconds. Returns the number of whole global
    /// ticks that elapsed.
    pub fn advance(&mut self, real_elapsed_seconds: f64) -> Result<u64, TimeError> {
        if !real_elapsed_seconds.is_finite() || real_elapsed_seconds < 0.0 {
            return Err(TimeError::InvalidElapsed(real_elapsed_seconds));
        }
        self.fractional += real_elapsed_seconds * f64::from(self.ticks_per_second);
        let whole = self.fractional.floor();
        self.fractional -= whole;
        let elapsed = whole as u64;
        self.tick += elapsed;
        Ok(elapsed)
    }

    /// Advance by a whole number of global ticks directly (tests, replay).
    pub fn advance_ticks(&mut self, ticks: u64) -> u64 {
        self.tick += ticks;
        ticks
    }
}

/// The recorded split point of a forked universe.
///
/// An immutable (parent id, parent tick, global tick) triple. It references a
/// historical tick, never the live parent object, which keeps the fork graph
/// acyclic by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPoint {
    pub parent: UniverseId,
    pub parent_tick: u64,
    pub global_tick: u64,
}

/// Per-universe clock state.
///
/// The relative tick is never stored; it is derived on read as
/// `anchor_tick + floor((global - anchor_global) * rate)`. Pausing, resuming,
/// and rate changes re-anchor at the currently derived tick, so the apparent
/// tick never decreases and conversions depend only on anchor snapshots,
/// never on another clock's current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    rate: f64,
    paused: bool,
    fork_point: Option<ForkPoint>,
    anchor_tick: u64,
    anchor_global: u64,
}

impl TimeRecord {
    /// Clock for a fresh universe: tick 0 at the current global tick.
    pub fn new_root(global_tick: u64, rate: f64) -> Result<Self, TimeError> {
        check_rate(rate)?;
        Ok(Self {
            rate,
            paused: false,
            fork_point: None,
            anchor_tick: 0,
            anchor_global: global_tick,
        })
    }

    /// Clock for a fork: starts at the parent's tick at the fork moment.
    pub fn new_fork(fork_point: ForkPoint, rate: f64) -> Result<Self, TimeError> {
        check_rate(rate)?;
        Ok(Self {
            rate,
            paused: false,
            anchor_tick: fork_point.parent_tick,
            anchor_global: fork_point.global_tick,
            fork_point: Some(fork_point),
        })
    }

    /// The universe's tick at the given global tick.
    pub fn tick_at(&self, global_tick: u64) -> u64 {
        if self.paused {
            return self.anchor_tick;
        }
        let elapsed = global_tick.saturating_sub(self.anchor_global);
        self.anchor_tick + ((elapsed as f64) * self.rate).floor() as u64
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn fork_point(&self) -> Option<&ForkPoint> {
        self.fork_point.as_ref()
    }

    /// Change the rate multiplier, re-anchoring at the current derived tick.
    pub fn set_rate(&mut self, global_tick: u64, rate: f64) -> Result<(), TimeError> {
        check_rate(rate)?;
        self.reanchor(global_tick);
        self.rate = rate;
        Ok(())
    }

    /// Freeze the derived tick at its current value.
    pub fn pause(&mut self, global_tick: u64) {
        self.reanchor(global_tick);
        self.paused = true;
    }

    /// Resume advancing from the frozen tick.
    pub fn resume(&mut self, global_tick: u64) {
        self.anchor_global = global_tick;
        self.paused = false;
    }

    /// Completed in-universe days at the given global tick.
    pub fn day(&self, global_tick: u64, day_length_ticks: u64) -> u64 {
        self.tick_at(global_tick) / day_length_ticks.max(1)
    }

    /// Fraction of the current in-universe day, in `[0, 1)`.
    pub fn time_of_day(&self, global_tick: u64, day_length_ticks: u64) -> f64 {
        let day_length = day_length_ticks.max(1);
        (self.tick_at(global_tick) % day_length) as f64 / day_length as f64
    }

    fn reanchor(&mut self, global_tick: u64) {
        self.anchor_tick = self.tick_at(global_tick);
        self.anchor_global = global_tick;
    }
}

fn check_rate(rate: f64) -> Result<(), TimeError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(TimeError::InvalidRate(rate));
    }
    Ok(())
}
