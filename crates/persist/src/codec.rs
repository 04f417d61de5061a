//! The versioned save envelope and its codec.
//!
//! Encode walks every live universe and serializes components through the
//! registered serializers; decode verifies checksums first, then migrates
//! every component to the current version before any state is handed back.

use crate::backend::StorageBackend;
use crate::PersistError;
use chronoverse_common::{EntityId, UniverseId};
use chronoverse_kernel::{
    Entity, ForkBase, MultiverseConfig, Multiverse, TimeRecord, Universe, UniverseConfig,
    UniverseState,
};
use chronoverse_schema::{Migrated, MigrationContext, SchemaError, SchemaRegistry};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Current envelope format version.
pub const SAVE_FORMAT_VERSION: u32 = 1;
/// Current per-universe snapshot format version.
pub const UNIVERSE_FORMAT_VERSION: u32 = 1;

/// Errors from envelope encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("save file failed to compress: {0}")]
    Compress(String),
    #[error("save file failed to decompress: {0}")]
    Decompress(String),
    #[error("CBOR encode error: {0}")]
    CborEncode(String),
    #[error("save file is malformed: {0}")]
    Malformed(String),
    #[error("unsupported save-format v{found}; this producer reads up to v{supported}")]
    UnsupportedFormat { found: u32, supported: u32 },
    #[error(
        "universe {universe}: unsupported snapshot format v{found}; this producer reads up to v{supported}"
    )]
    UnsupportedUniverseFormat {
        universe: String,
        found: u32,
        supported: u32,
    },
    #[error("checksum mismatch for {scope}: file says {expected}, content hashes to {actual}")]
    ChecksumMismatch {
        scope: String,
        expected: String,
        actual: String,
    },
    #[error("universe {universe} has no recorded checksum")]
    MissingChecksum { universe: String },
    #[error("universe {universe}: entity {entity}: component {kind:?}: {source}")]
    Component {
        universe: String,
        entity: String,
        kind: String,
        source: SchemaError,
    },
}

/// Save-wide header metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveHeader {
    pub name: String,
    /// Unix seconds when the save was first created.
    pub created_at: u64,
    /// Unix seconds of this save.
    pub last_saved_at: u64,
    pub play_time_seconds: u64,
    pub producer_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
}

impl SaveHeader {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: 0,
            last_saved_at: 0,
            play_time_seconds: 0,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            screenshot: None,
        }
    }
}

/// Multiverse-level snapshot: the global clock and shared configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseSnapshot {
    pub global_tick: u64,
    pub config: MultiverseConfig,
}

/// One entity as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub components: Vec<ComponentSnapshot>,
}

/// One component record as persisted: the `{schemaId, version, payload}`
/// contract shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub schema_id: String,
    pub version: u32,
    pub payload: Value,
}

/// One universe as persisted. Carries its own format version so universes
/// written by different producer versions can coexist in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub format_version: u32,
    pub id: UniverseId,
    pub config: UniverseConfig,
    pub time: TimeRecord,
    pub entities: Vec<EntitySnapshot>,
    pub world_state: Value,
    /// Fork bookkeeping, present only for forks: the merge base and budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_base: Option<ForkBase>,
}

/// Checksum block. The overall hash is computed over the envelope with this
/// whole block zeroed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub overall: String,
    /// Universe id string -> SHA-256 hex of that universe's snapshot.
    pub universes: BTreeMap<String, String>,
}

/// The top-level persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveEnvelope {
    pub format_version: u32,
    pub header: SaveHeader,
    pub multiverse: MultiverseSnapshot,
    pub universes: Vec<UniverseSnapshot>,
    /// Cross-universe connection records; opaque to this layer.
    pub passages: Vec<Value>,
    /// Player state; opaque to this layer.
    pub player: Value,
    pub checksums: Checksums,
}

/// Serialize a multiverse into compressed envelope bytes.
pub fn encode(
    multiverse: &Multiverse,
    registry: &SchemaRegistry,
    header: SaveHeader,
) -> Result<Vec<u8>, CodecError> {
    let _span = tracing::info_span!("encode_save", name = %header.name).entered();
    let envelope = build_envelope(multiverse, registry, header)?;
    envelope_to_bytes(&envelope)
}

/// Parse and verify envelope bytes, migrating every component to the current
/// registered version. Returns the reconstructed multiverse and the header.
///
/// Corruption and migration errors abort the whole load; no partial state is
/// ever returned.
pub fn decode(
    bytes: &[u8],
    registry: &SchemaRegistry,
) -> Result<(Multiverse, SaveHeader), CodecError> {
    let _span = tracing::info_span!("decode_save").entered();
    let envelope = envelope_from_bytes(bytes)?;
    if envelope.format_version > SAVE_FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat {
            found: envelope.format_version,
            supported: SAVE_FORMAT_VERSION,
        });
    }
    verify_checksums(&envelope)?;

    let mut universes = BTreeMap::new();
    let mut forks = BTreeMap::new();
    for snap in &envelope.universes {
        if snap.format_version > UNIVERSE_FORMAT_VERSION {
            return Err(CodecError::UnsupportedUniverseFormat {
                universe: snap.id.to_string(),
                found: snap.format_version,
                supported: UNIVERSE_FORMAT_VERSION,
            });
        }
        let mut entities = BTreeMap::new();
        for entity_snap in &snap.entities {
            entities.insert(entity_snap.id, entity_from_snapshot(entity_snap));
        }
        let mut universe = Universe::new(snap.id.clone(), snap.config.clone(), snap.time.clone());
        universe.replace_state(UniverseState {
            entities: migrate_entities(registry, &snap.id, entities)?,
            world_state: snap.world_state.clone(),
        });
        if let Some(fork_base) = &snap.fork_base {
            // The merge base gets the same migrations, so a later three-way
            // compares like against like.
            forks.insert(
                snap.id.clone(),
                ForkBase {
                    base: UniverseState {
                        entities: migrate_entities(
                            registry,
                            &snap.id,
                            fork_base.base.entities.clone(),
                        )?,
                        world_state: fork_base.base.world_state.clone(),
                    },
                    tick_budget: fork_base.tick_budget,
                },
            );
        }
        universes.insert(snap.id.clone(), universe);
    }

    let multiverse = Multiverse::from_parts(
        envelope.multiverse.config.clone(),
        envelope.multiverse.global_tick,
        universes,
        forks,
        envelope.passages.clone(),
        envelope.player.clone(),
    );
    Ok((multiverse, envelope.header))
}

/// Encode and persist in one step.
pub fn save_to_backend(
    backend: &mut dyn StorageBackend,
    key: &str,
    multiverse: &Multiverse,
    registry: &SchemaRegistry,
    header: SaveHeader,
) -> Result<(), PersistError> {
    let bytes = encode(multiverse, registry, header)?;
    backend.save(key, &bytes)?;
    Ok(())
}

/// Load and decode in one step. A missing key is `Ok(None)`.
pub fn load_from_backend(
    backend: &dyn StorageBackend,
    key: &str,
    registry: &SchemaRegistry,
) -> Result<Option<(Multiverse, SaveHeader)>, PersistError> {
    match backend.load(key)? {
        None => Ok(None),
        Some(bytes) => Ok(Some(decode(&bytes, registry)?)),
    }
}

pub(crate) fn build_envelope(
    multiverse: &Multiverse,
    registry: &SchemaRegistry,
    header: SaveHeader,
) -> Result<SaveEnvelope, CodecError> {
    let mut universes = Vec::new();
    for (id, universe) in multiverse.universes() {
        let mut entities = Vec::new();
        for (entity_id, entity) in universe.entities() {
            let mut components = Vec::new();
            for (kind, record) in &entity.components {
                let persisted = registry
                    .serialize_payload(kind, record.version, &record.payload)
                    .map_err(|source| CodecError::Component {
                        universe: id.to_string(),
                        entity: entity_id.to_string(),
                        kind: kind.clone(),
                        source,
                    })?;
                components.push(ComponentSnapshot {
                    schema_id: kind.clone(),
                    version: record.version,
                    payload: persisted,
                });
            }
            entities.push(EntitySnapshot {
                id: *entity_id,
                position: entity.position,
                components,
            });
        }
        universes.push(UniverseSnapshot {
            format_version: UNIVERSE_FORMAT_VERSION,
            id: id.clone(),
            config: universe.config().clone(),
            time: universe.time().clone(),
            entities,
            world_state: universe.world_state().clone(),
            fork_base: multiverse.fork_base(id).cloned(),
        });
    }

    let mut envelope = SaveEnvelope {
        format_version: SAVE_FORMAT_VERSION,
        header,
        multiverse: MultiverseSnapshot {
            global_tick: multiverse.global_tick(),
            config: multiverse.config().clone(),
        },
        universes,
        passages: multiverse.passages().to_vec(),
        player: multiverse.player().clone(),
        checksums: Checksums::default(),
    };
    envelope.checksums = compute_checksums(&envelope)?;
    Ok(envelope)
}

pub(crate) fn envelope_to_bytes(envelope: &SaveEnvelope) -> Result<Vec<u8>, CodecError> {
    let cbor = cbor_bytes(envelope)?;
    let mut encoder =
        zstd::Encoder::new(Vec::new(), 3).map_err(|e| CodecError::Compress(e.to_string()))?;
    encoder
        .write_all(&cbor)
        .map_err(|e| CodecError::Compress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compress(e.to_string()))
}

pub(crate) fn envelope_from_bytes(bytes: &[u8]) -> Result<SaveEnvelope, CodecError> {
    let mut decoder =
        zstd::Decoder::new(bytes).map_err(|e| CodecError::Decompress(e.to_string()))?;
    let mut cbor = Vec::new();
    decoder
        .read_to_end(&mut cbor)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Verify the overall checksum first (any byte flip outside the checksum
/// block fails here), then each per-universe checksum.
pub(crate) fn verify_checksums(envelope: &SaveEnvelope) -> Result<(), CodecError> {
    let computed = compute_checksums(envelope)?;
    if computed.overall != envelope.checksums.overall {
        return Err(CodecError::ChecksumMismatch {
            scope: "envelope".to_string(),
            expected: envelope.checksums.overall.clone(),
            actual: computed.overall,
        });
    }
    for snap in &envelope.universes {
        let id = snap.id.to_string();
        let stored = envelope
            .checksums
            .universes
            .get(&id)
            .ok_or_else(|| CodecError::MissingChecksum {
                universe: id.clone(),
            })?;
        let actual = computed
            .universes
            .get(&id)
            .ok_or_else(|| CodecError::MissingChecksum {
                universe: id.clone(),
            })?;
        if stored != actual {
            return Err(CodecError::ChecksumMismatch {
                scope: format!("universe {id}"),
                expected: stored.clone(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}

fn compute_checksums(envelope: &SaveEnvelope) -> Result<Checksums, CodecError> {
    let mut universes = BTreeMap::new();
    for snap in &envelope.universes {
        universes.insert(snap.id.to_string(), sha256_hex(&cbor_bytes(snap)?));
    }
    let mut unsigned = envelope.clone();
    unsigned.checksums = Checksums::default();
    let overall = sha256_hex(&cbor_bytes(&unsigned)?);
    Ok(Checksums { overall, universes })
}

fn entity_from_snapshot(snap: &EntitySnapshot) -> Entity {
    let mut entity = Entity {
        id: snap.id,
        position: snap.position,
        components: BTreeMap::new(),
    };
    for component in &snap.components {
        entity.set_component(
            component.schema_id.clone(),
            component.version,
            component.payload.clone(),
        );
    }
    entity
}

/// Migrate every component of every entity to its kind's current version.
/// Split results expand into multiple components on the same entity; the
/// original combined record is dropped.
fn migrate_entities(
    registry: &SchemaRegistry,
    universe: &UniverseId,
    entities: BTreeMap<EntityId, Entity>,
) -> Result<BTreeMap<EntityId, Entity>, CodecError> {
    let mut migrated = BTreeMap::new();
    for (id, entity) in entities {
        let siblings: BTreeMap<String, Value> = entity
            .components
            .iter()
            .map(|(kind, record)| (kind.clone(), record.payload.clone()))
            .collect();
        let context = MigrationContext::with_siblings(siblings);

        let mut rebuilt = Entity {
            id: entity.id,
            position: entity.position,
            components: BTreeMap::new(),
        };
        for (kind, record) in &entity.components {
            let wrap = |source: SchemaError| CodecError::Component {
                universe: universe.to_string(),
                entity: id.to_string(),
                kind: kind.clone(),
                source,
            };
            let outcome = registry
                .migrate_to_current(kind, &record.payload, record.version, &context)
                .map_err(wrap)?;
            match outcome {
                Migrated::Replaced { version, payload } => {
                    let live = registry
                        .deserialize_payload(kind, version, &payload)
                        .map_err(wrap)?;
                    rebuilt.set_component(kind.clone(), version, live);
                }
                Migrated::Split(records) => {
                    for piece in records {
                        let live = registry
                            .deserialize_payload(&piece.kind, piece.version, &piece.payload)
                            .map_err(wrap)?;
                        rebuilt.set_component(piece.kind, piece.version, live);
                    }
                }
            }
        }
        migrated.insert(id, rebuilt);
    }
    Ok(migrated)
}

fn cbor_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir_store::DirStore;
    use chronoverse_kernel::{ForkConfig, MergeOutcome, MultiverseConfig};
    use chronoverse_schema::{Schema, SplitRecord, TransformOutput};
    use serde_json::json;

    fn v0_registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.register("person", 0, Schema::new(|_| Ok(()))).unwrap();
        reg.register("needs", 0, Schema::new(|_| Ok(()))).unwrap();
        reg
    }

    fn small_multiverse() -> (Multiverse, UniverseId, EntityId) {
        let mut mv = Multiverse::new(MultiverseConfig::default());
        let a = mv.create_universe(UniverseConfig::named("prime")).unwrap();
        let u = mv.universe_mut(&a).unwrap();
        let e = u.spawn(Vec3::new(1.0, 2.0, 3.0));
        u.entity_mut(e)
            .unwrap()
            .set_component("person", 0, json!({"name": "Alice", "age": 25}));
        u.entity_mut(e)
            .unwrap()
            .set_component("needs", 0, json!({"hunger": 0.4, "belonging": 0.9}));
        u.set_world_state(json!({"weather": "rain"}));
        mv.set_player(json!({"possessed": null}));
        (mv, a, e)
    }

    #[test]
    fn roundtrip_preserves_state() {
        let registry = v0_registry();
        let (mut mv, a, _e) = small_multiverse();
        mv.advance_ticks(7);
        let hash_before = mv.universe(&a).unwrap().state_hash();

        let bytes = encode(&mv, &registry, SaveHeader::named("slot")).unwrap();
        let (loaded, header) = decode(&bytes, &registry).unwrap();

        assert_eq!(header.name, "slot");
        assert_eq!(loaded.global_tick(), 7);
        assert_eq!(loaded.universe(&a).unwrap().state_hash(), hash_before);
        assert_eq!(loaded.player(), &json!({"possessed": null}));
        assert_eq!(
            loaded.universe(&a).unwrap().world_state(),
            &json!({"weather": "rain"})
        );
    }

    #[test]
    fn old_save_gains_migrated_fields_on_load() {
        let (mv, a, e) = small_multiverse();
        let bytes = encode(&mv, &v0_registry(), SaveHeader::named("old")).unwrap();

        // A newer producer registers v1 plus the bridging migration.
        let mut newer = v0_registry();
        newer.register("person", 1, Schema::new(|_| Ok(()))).unwrap();
        newer
            .register_migration("person", 0, 1, "add generation, default 0", |old, _| {
                let mut next = old.clone();
                next["generation"] = json!(0);
                Ok(TransformOutput::Replaced(next))
            })
            .unwrap();

        let (loaded, _) = decode(&bytes, &newer).unwrap();
        let record = loaded
            .universe(&a)
            .unwrap()
            .entity(e)
            .unwrap()
            .component("person")
            .unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(
            record.payload,
            json!({"name": "Alice", "age": 25, "generation": 0})
        );
    }

    #[test]
    fn split_migration_expands_components_on_the_entity() {
        let (mv, a, e) = small_multiverse();
        let bytes = encode(&mv, &v0_registry(), SaveHeader::named("old")).unwrap();

        let mut newer = v0_registry();
        newer.register("needs", 1, Schema::new(|_| Ok(()))).unwrap();
        newer
            .register("physical_needs", 0, Schema::new(|_| Ok(())))
            .unwrap();
        newer
            .register("social_needs", 0, Schema::new(|_| Ok(())))
            .unwrap();
        newer
            .register_migration("needs", 0, 1, "split physical/social", |old, _| {
                Ok(TransformOutput::Split(vec![
                    SplitRecord::new("physical_needs", 0, json!({"hunger": old["hunger"]})),
                    SplitRecord::new("social_needs", 0, json!({"belonging": old["belonging"]})),
                ]))
            })
            .unwrap();

        let (loaded, _) = decode(&bytes, &newer).unwrap();
        let entity = loaded.universe(&a).unwrap().entity(e).unwrap();
        assert!(entity.component("needs").is_none());
        assert_eq!(
            entity.component("physical_needs").unwrap().payload,
            json!({"hunger": 0.4})
        );
        assert_eq!(
            entity.component("social_needs").unwrap().payload,
            json!({"belonging": 0.9})
        );
    }

    #[test]
    fn missing_migration_aborts_the_whole_load() {
        let (mv, a, _e) = small_multiverse();
        let bytes = encode(&mv, &v0_registry(), SaveHeader::named("old")).unwrap();

        // v2 exists but the 0 -> 1 step was never registered.
        let mut broken = v0_registry();
        broken.register("person", 2, Schema::new(|_| Ok(()))).unwrap();

        let err = decode(&bytes, &broken).unwrap_err();
        match err {
            CodecError::Component {
                universe,
                kind,
                source,
                ..
            } => {
                assert_eq!(universe, a.to_string());
                assert_eq!(kind, "person");
                assert!(matches!(source, SchemaError::MissingMigration { .. }));
            }
            other => panic!("expected Component error, got: {other}"),
        }
    }

    #[test]
    fn tampered_checksum_string_fails_the_load() {
        let registry = v0_registry();
        let (mv, _a, _e) = small_multiverse();
        let mut envelope =
            build_envelope(&mv, &registry, SaveHeader::named("tamper")).unwrap();

        // Flip one hex character of the stored overall checksum.
        let mut chars: Vec<char> = envelope.checksums.overall.chars().collect();
        chars[0] = if chars[0] == 'a' { 'b' } else { 'a' };
        envelope.checksums.overall = chars.into_iter().collect();

        let bytes = envelope_to_bytes(&envelope).unwrap();
        match decode(&bytes, &registry).unwrap_err() {
            CodecError::ChecksumMismatch { scope, .. } => assert_eq!(scope, "envelope"),
            other => panic!("expected envelope mismatch, got: {other}"),
        }
    }

    #[test]
    fn tampered_content_fails_the_load() {
        let registry = v0_registry();
        let (mv, _a, _e) = small_multiverse();
        let mut envelope =
            build_envelope(&mv, &registry, SaveHeader::named("tamper")).unwrap();

        envelope.header.play_time_seconds += 1;

        let bytes = envelope_to_bytes(&envelope).unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn any_flipped_byte_in_the_payload_fails_the_load() {
        let registry = v0_registry();
        let (mv, _a, _e) = small_multiverse();
        let envelope = build_envelope(&mv, &registry, SaveHeader::named("flip")).unwrap();
        let plain = cbor_bytes(&envelope).unwrap();

        // Sample positions across the whole buffer, endpoints included.
        let stride = (plain.len() / 64).max(1);
        let positions: Vec<usize> = (0..plain.len())
            .step_by(stride)
            .chain(std::iter::once(plain.len() - 1))
            .collect();

        for pos in positions {
            let mut corrupted = plain.clone();
            corrupted[pos] ^= 0x01;
            let bytes = zstd::encode_all(&corrupted[..], 3).unwrap();

            assert!(
                decode(&bytes, &registry).is_err(),
                "flip at byte {pos} was not detected"
            );
        }
    }

    #[test]
    fn per_universe_tamper_is_caught() {
        let registry = v0_registry();
        let (mv, a, _e) = small_multiverse();
        let mut envelope =
            build_envelope(&mv, &registry, SaveHeader::named("tamper")).unwrap();

        // Re-sign the overall hash but leave the stale universe checksum, as
        // a targeted in-place edit would.
        envelope.universes[0].world_state = json!({"weather": "clear"});
        let resigned = {
            let mut unsigned = envelope.clone();
            unsigned.checksums = Checksums::default();
            sha256_hex(&cbor_bytes(&unsigned).unwrap())
        };
        envelope.checksums.overall = resigned;

        let bytes = envelope_to_bytes(&envelope).unwrap();
        let err = decode(&bytes, &registry).unwrap_err();
        match err {
            CodecError::ChecksumMismatch { scope, .. } => {
                assert_eq!(scope, format!("universe {a}"));
            }
            other => panic!("expected per-universe mismatch, got: {other}"),
        }
    }

    #[test]
    fn unsupported_format_version_is_rejected() {
        let registry = v0_registry();
        let (mv, _a, _e) = small_multiverse();
        let mut envelope =
            build_envelope(&mv, &registry, SaveHeader::named("future")).unwrap();
        envelope.format_version = SAVE_FORMAT_VERSION + 1;
        envelope.checksums = compute_checksums(&envelope).unwrap();

        let bytes = envelope_to_bytes(&envelope).unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(CodecError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn fork_bases_survive_the_roundtrip() {
        let registry = v0_registry();
        let (mut mv, a, e) = small_multiverse();
        let b = mv.fork_universe(&a, ForkConfig::default()).unwrap();
        mv.universe_mut(&b)
            .unwrap()
            .entity_mut(e)
            .unwrap()
            .set_component("needs", 0, json!({"hunger": 0.1, "belonging": 0.9}));

        let bytes = encode(&mv, &registry, SaveHeader::named("forked")).unwrap();
        let (mut loaded, _) = decode(&bytes, &registry).unwrap();

        assert!(loaded.fork_base(&b).is_some());
        match loaded.merge(&b).unwrap() {
            MergeOutcome::Merged { into } => assert_eq!(into, a),
            MergeOutcome::Conflicts(report) => panic!("unexpected conflicts: {report:?}"),
        }
    }

    #[test]
    fn backend_integration_roundtrip() {
        let registry = v0_registry();
        let (mv, a, _e) = small_multiverse();
        let tmp = tempfile::tempdir().unwrap();
        let mut backend = DirStore::open(tmp.path().join("saves")).unwrap();

        save_to_backend(&mut backend, "slot-1", &mv, &registry, SaveHeader::named("slot"))
            .unwrap();
        let (loaded, _) = load_from_backend(&backend, "slot-1", &registry)
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.universe(&a).unwrap().state_hash(),
            mv.universe(&a).unwrap().state_hash()
        );

        assert!(load_from_backend(&backend, "slot-2", &registry)
            .unwrap()
            .is_none());
    }
}
