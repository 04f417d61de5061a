use crate::config::UniverseConfig;
use crate::time::TimeRecord;
use chronoverse_common::{Address, EntityId, UniverseId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One versioned, tagged component record — the serialization contract shape
/// the simulation layer hands to this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub schema_id: String,
    pub version: u32,
    pub payload: Value,
}

/// Per-entity state owned by a universe.
///
/// Position is first-class (the world-bounds invariant reads it); everything
/// else lives in versioned component records keyed by data-kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub position: Vec3,
    pub components: BTreeMap<String, ComponentRecord>,
}

impl Entity {
    pub fn new(position: Vec3) -> Self {
        Self {
            id: EntityId::new(),
            position,
            components: BTreeMap::new(),
        }
    }

    /// Attach or replace a component record.
    pub fn set_component(&mut self, kind: impl Into<String>, version: u32, payload: Value) {
        let kind = kind.into();
        self.components.insert(
            kind.clone(),
            ComponentRecord {
                schema_id: kind,
                version,
                payload,
            },
        );
    }

    pub fn component(&self, kind: &str) -> Option<&ComponentRecord> {
        self.components.get(kind)
    }

    pub fn remove_component(&mut self, kind: &str) -> Option<ComponentRecord> {
        self.components.remove(kind)
    }
}

/// Copyable bundle of a universe's mutable state: the entity set plus the
/// opaque auxiliary world state. Fork-point snapshots and merge both move
/// whole `UniverseState` values so state swaps are atomic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseState {
    pub entities: BTreeMap<EntityId, Entity>,
    pub world_state: Value,
}

impl Default for UniverseState {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            world_state: Value::Null,
        }
    }
}

/// One independently-clocked simulated world instance.
///
/// Uses BTreeMap for deterministic iteration order across platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    id: UniverseId,
    config: UniverseConfig,
    time: TimeRecord,
    state: UniverseState,
}

impl Universe {
    pub fn new(id: UniverseId, config: UniverseConfig, time: TimeRecord) -> Self {
        Self {
            id,
            config,
            time,
            state: UniverseState::default(),
        }
    }

    pub fn id(&self) -> &UniverseId {
        &self.id
    }

    pub fn config(&self) -> &UniverseConfig {
        &self.config
    }

    pub fn time(&self) -> &TimeRecord {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut TimeRecord {
        &mut self.time
    }

    /// The universe's tick at the given global tick.
    pub fn tick_at(&self, global_tick: u64) -> u64 {
        self.time.tick_at(global_tick)
    }

    /// Completed in-universe days at the given global tick.
    pub fn day_at(&self, global_tick: u64) -> u64 {
        self.time.day(global_tick, self.config.day_length_ticks)
    }

    /// Fraction of the current in-universe day at the given global tick.
    pub fn time_of_day_at(&self, global_tick: u64) -> f64 {
        self.time
            .time_of_day(global_tick, self.config.day_length_ticks)
    }

    pub fn entity_count(&self) -> usize {
        self.state.entities.len()
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.state.entities
    }

    /// Spawn a new entity at the given position. Returns its id.
    pub fn spawn(&mut self, position: Vec3) -> EntityId {
        let entity = Entity::new(position);
        let id = entity.id;
        self.state.entities.insert(id, entity);
        id
    }

    /// Insert an entity with a specific identity (restore, injection, merge).
    pub fn insert_entity(&mut self, entity: Entity) {
        self.state.entities.insert(entity.id, entity);
    }

    /// Remove an entity. Returns its data if it existed.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.state.entities.remove(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.state.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.state.entities.get_mut(&id)
    }

    /// Opaque auxiliary world state (terrain, weather, ...).
    pub fn world_state(&self) -> &Value {
        &self.state.world_state
    }

    pub fn set_world_state(&mut self, world_state: Value) {
        self.state.world_state = world_state;
    }

    /// Deep copy of the mutable state, for fork-point snapshots.
    pub fn snapshot_state(&self) -> UniverseState {
        self.state.clone()
    }

    /// Atomically replace the mutable state (merge application, restore).
    pub fn replace_state(&mut self, state: UniverseState) {
        self.state = state;
    }

    /// Content-addressed reference for an entity in this universe.
    pub fn entity_address(&self, id: EntityId) -> Address {
        id.address().within(self.id.address())
    }

    /// Deterministic hash of the mutable state, for diff shortcuts and tests.
    /// Uses canonical (BTreeMap) iteration order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mut mix = |bytes: &[u8]| {
            for &b in bytes {
                h ^= u64::from(b);
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        for (id, entity) in &self.state.entities {
            mix(id.0.as_bytes());
            mix(&entity.position.x.to_le_bytes());
            mix(&entity.position.y.to_le_bytes());
            mix(&entity.position.z.to_le_bytes());
            for (kind, record) in &entity.components {
                mix(kind.as_bytes());
                mix(&record.version.to_le_bytes());
                mix(record.payload.to_string().as_bytes());
            }
        }
        mix(self.state.world_state.to_string().as_bytes());
        h
    }
}
