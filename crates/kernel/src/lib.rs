//! Multiverse kernel: universe state, time coordination, forking, merging,
//! and invariant checking.
//!
//! # Invariants
//! - A universe's relative tick is always derived from the global counter,
//!   its rate multiplier, and its anchor; it is never an independent counter
//!   that can drift.
//! - Fork points are immutable (parent id, tick) values, never live handles,
//!   so the fork graph is structurally acyclic.
//! - Fork creation and merge are transactional: no partial universe is ever
//!   registered, no partial merge is ever applied.

pub mod config;
pub mod forkrun;
pub mod invariant;
pub mod multiverse;
pub mod time;
pub mod universe;

pub use config::{EntitySeed, ForkConfig, ForkInjection, MultiverseConfig, UniverseConfig, WorldBounds};
pub use forkrun::ForkReport;
pub use invariant::{
    FinitePositions, InsideWorldBounds, InvariantCheck, InvariantChecker, RegisteredSchemas,
    Severity, Violation,
};
pub use multiverse::{
    CombineFn, ForkBase, MergeConflict, MergeOutcome, MergeReport, MergeStrategy, MergeVerdict,
    Multiverse, MultiverseError, StateDiff,
};
pub use time::{ForkPoint, GlobalClock, TimeError, TimeRecord};
pub use universe::{ComponentRecord, Entity, Universe, UniverseState};
