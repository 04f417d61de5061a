//! Shared types: entity identity and content-addressed identifiers.
//!
//! # Invariants
//! - Identical logical content always derives the identical address.
//! - Addresses are plain strings on the wire; parsing round-trips exactly.

pub mod address;
pub mod types;

pub use address::{Address, AddressError, ParsedAddress, Segment};
pub use types::{EntityId, UniverseId};
