use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only context a transform may consult while migrating one component.
///
/// Exposes the sibling components of the owning entity, keyed by data-kind.
/// Transforms never mutate siblings; they only read them to decide how to
/// reshape their own payload (e.g. split differently when the entity also
/// carries a particular component).
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    siblings: BTreeMap<String, Value>,
}

impl MigrationContext {
    /// Context with no sibling state (standalone migrations, tests).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context over the owning entity's other components.
    pub fn with_siblings(siblings: BTreeMap<String, Value>) -> Self {
        Self { siblings }
    }

    /// Payload of a sibling component, if the entity carries that kind.
    pub fn sibling(&self, kind: &str) -> Option<&Value> {
        self.siblings.get(kind)
    }

    /// Whether the owning entity carries a component of the given kind.
    pub fn has_sibling(&self, kind: &str) -> bool {
        self.siblings.contains_key(kind)
    }
}

/// What a single migration step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    /// The payload reshaped in place, still the same data-kind.
    Replaced(Value),
    /// The component split into multiple records, possibly of other kinds.
    /// Each record states the version its payload conforms to.
    Split(Vec<SplitRecord>),
}

/// One record produced by a splitting migration.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRecord {
    pub kind: String,
    pub version: u32,
    pub payload: Value,
}

impl SplitRecord {
    pub fn new(kind: impl Into<String>, version: u32, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            version,
            payload,
        }
    }
}

/// Final result of running a full migration chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Migrated {
    /// Single payload at the requested destination version.
    Replaced { version: u32, payload: Value },
    /// The chain split the component; every record is fully migrated to its
    /// own kind's requested/current version.
    Split(Vec<SplitRecord>),
}
