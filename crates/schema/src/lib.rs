//! Schema & migration registry: versioned component payloads and the ordered
//! version-to-version transforms that keep old saves loadable.
//!
//! # Invariants
//! - Migrations for a data-kind form a total order with no gaps; every
//!   registered step is `from -> from + 1`.
//! - `migrate` composes the unique chain of registered steps and fails loudly
//!   on a missing step. It never passes data through unchanged as a fallback.
//! - Every transform output is re-validated against the destination version
//!   before the next step runs.

pub mod migration;
pub mod registry;

pub use migration::{MigrationContext, Migrated, SplitRecord, TransformOutput};
pub use registry::{Schema, SchemaError, SchemaRegistry, require_number, require_string};
