use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an entity within a universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Content-addressed form of this entity id, for cross-universe references.
    pub fn address(&self) -> Address {
        Address::for_content("entity", self.0.as_bytes())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content-addressed identifier for a universe.
///
/// Derived from the universe's label, its creation tick, and (for forks) the
/// parent id, so re-deriving with the same inputs yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniverseId(Address);

impl UniverseId {
    /// Derive the id for a root universe.
    pub fn derive(label: &str, created_at_global_tick: u64) -> Self {
        let mut content = label.as_bytes().to_vec();
        content.extend_from_slice(&created_at_global_tick.to_le_bytes());
        Self(Address::for_content("universe", &content))
    }

    /// Derive the id for a fork of `parent` taken at the given global tick.
    /// The label participates so sibling forks taken at the same moment get
    /// distinct identities.
    pub fn derive_fork(parent: &UniverseId, label: &str, forked_at_global_tick: u64) -> Self {
        let mut content = parent.to_string().into_bytes();
        content.push(0);
        content.extend_from_slice(label.as_bytes());
        content.extend_from_slice(&forked_at_global_tick.to_le_bytes());
        Self(Address::for_content("universe", &content))
    }

    pub fn address(&self) -> &Address {
        &self.0
    }
}

impl fmt::Display for UniverseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
