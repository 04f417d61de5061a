//! Persistence: interchangeable storage backends and the versioned,
//! checksummed save-file codec.
//!
//! # Invariants
//! - A failed or cancelled save never clobbers the previously persisted bytes
//!   for a key (writes go to a temporary location, then atomically replace).
//! - The overall envelope checksum is computed with the checksum block zeroed
//!   and verified before anything else on load; mismatch is a hard failure.
//! - Loading migrates every component through registered chains; a missing
//!   step aborts the whole load. Partial state is never returned.

pub mod backend;
pub mod codec;
pub mod dir_store;
pub mod kv_store;

pub use backend::{SaveMetadata, StorageBackend, StorageError, StorageInfo};
pub use codec::{
    Checksums, CodecError, ComponentSnapshot, EntitySnapshot, MultiverseSnapshot, SaveEnvelope,
    SaveHeader, UniverseSnapshot, decode, encode, load_from_backend, save_to_backend,
    SAVE_FORMAT_VERSION, UNIVERSE_FORMAT_VERSION,
};
pub use dir_store::DirStore;
pub use kv_store::KvStore;

/// Errors from the combined save/load convenience paths.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
