use crate::config::{ForkConfig, ForkInjection, MultiverseConfig, UniverseConfig};
use crate::time::{ForkPoint, GlobalClock, TimeError, TimeRecord};
use crate::universe::{ComponentRecord, Entity, Universe, UniverseState};
use chronoverse_common::{EntityId, UniverseId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Errors from universe lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum MultiverseError {
    #[error("universe {0} not found")]
    UniverseNotFound(UniverseId),
    #[error("universe {0} already exists")]
    UniverseExists(UniverseId),
    #[error("universe {0} is not a fork")]
    NotAFork(UniverseId),
    #[error("fork {fork}'s parent {parent} no longer exists")]
    ParentMissing { fork: UniverseId, parent: UniverseId },
    #[error("invalid universe config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Time(#[from] TimeError),
}

/// How a registered per-kind strategy resolves a both-sides-changed component.
pub enum MergeStrategy {
    /// The fork's record wins.
    TakeFork,
    /// The parent's record wins.
    TakeParent,
    /// Kind-specific combining function over (base, parent, fork) records.
    /// Returning `None` removes the component from the merged entity.
    Combine(CombineFn),
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::TakeFork => f.write_str("TakeFork"),
            MergeStrategy::TakeParent => f.write_str("TakeParent"),
            MergeStrategy::Combine(_) => f.write_str("Combine(..)"),
        }
    }
}

pub type CombineFn = Box<
    dyn Fn(
            Option<&ComponentRecord>,
            Option<&ComponentRecord>,
            Option<&ComponentRecord>,
        ) -> Result<Option<ComponentRecord>, String>
        + Send
        + Sync,
>;

/// One unresolvable difference found by a three-way merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub entity: Option<EntityId>,
    pub component: Option<String>,
    pub detail: String,
}

/// Structured report of a merge that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub fork: UniverseId,
    pub parent: UniverseId,
    pub conflicts: Vec<MergeConflict>,
}

/// Result of attempting a merge. Conflict is an expected outcome requiring a
/// decision, not a bug, so it is data rather than an error.
#[derive(Debug)]
pub enum MergeOutcome {
    /// The fork was folded into its parent and deleted.
    Merged { into: UniverseId },
    /// Nothing was applied; the report lists every conflict.
    Conflicts(MergeReport),
}

/// Dry-run mergeability verdict, carried in fork reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeVerdict {
    Clean,
    Conflicted(Vec<MergeConflict>),
}

/// Difference between a fork's current state and its fork-point snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub spawned: Vec<EntityId>,
    pub despawned: Vec<EntityId>,
    pub modified: Vec<EntityId>,
    pub world_state_changed: bool,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
            && self.despawned.is_empty()
            && self.modified.is_empty()
            && !self.world_state_changed
    }
}

/// Fork bookkeeping: the frozen copy of the parent state at the fork point
/// (the base of any later three-way merge) and the fork's tick budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkBase {
    pub base: UniverseState,
    pub tick_budget: u64,
}

/// Owner of the set of live universes and the global clock.
///
/// Held explicitly by the top-level simulation loop; there is no ambient
/// singleton reachable from arbitrary call sites.
#[derive(Debug)]
pub struct Multiverse {
    config: MultiverseConfig,
    clock: GlobalClock,
    universes: BTreeMap<UniverseId, Universe>,
    forks: BTreeMap<UniverseId, ForkBase>,
    strategies: BTreeMap<String, MergeStrategy>,
    /// Cross-universe connection records; opaque to this layer.
    passages: Vec<Value>,
    /// Player state blob; opaque to this layer.
    player: Value,
}

impl Multiverse {
    pub fn new(config: MultiverseConfig) -> Self {
        let clock = GlobalClock::new(config.ticks_per_second);
        Self {
            config,
            clock,
            universes: BTreeMap::new(),
            forks: BTreeMap::new(),
            strategies: BTreeMap::new(),
            passages: Vec::new(),
            player: Value::Null,
        }
    }

    /// Reassemble a multiverse from persisted parts (save-file codec).
    pub fn from_parts(
        config: MultiverseConfig,
        global_tick: u64,
        universes: BTreeMap<UniverseId, Universe>,
        forks: BTreeMap<UniverseId, ForkBase>,
        passages: Vec<Value>,
        player: Value,
    ) -> Self {
        let clock = GlobalClock::at_tick(global_tick, config.ticks_per_second);
        Self {
            config,
            clock,
            universes,
            forks,
            strategies: BTreeMap::new(),
            passages,
            player,
        }
    }

    pub fn passages(&self) -> &[Value] {
        &self.passages
    }

    pub fn add_passage(&mut self, passage: Value) {
        self.passages.push(passage);
    }

    pub fn player(&self) -> &Value {
        &self.player
    }

    pub fn set_player(&mut self, player: Value) {
        self.player = player;
    }

    pub fn config(&self) -> &MultiverseConfig {
        &self.config
    }

    pub fn global_tick(&self) -> u64 {
        self.clock.tick()
    }

    pub fn universes(&self) -> &BTreeMap<UniverseId, Universe> {
        &self.universes
    }

    pub fn universe(&self, id: &UniverseId) -> Option<&Universe> {
        self.universes.get(id)
    }

    pub fn universe_mut(&mut self, id: &UniverseId) -> Option<&mut Universe> {
        self.universes.get_mut(id)
    }

    pub fn fork_base(&self, id: &UniverseId) -> Option<&ForkBase> {
        self.forks.get(id)
    }

    /// Advance the global clock by real elapsed seconds, then expire any
    /// forks that ran past their tick budget. Every unpaused universe's
    /// relative tick advances implicitly, since ticks are derived.
    pub fn advance(&mut self, real_elapsed_seconds: f64) -> Result<u64, TimeError> {
        let elapsed = self.clock.advance(real_elapsed_seconds)?;
        if elapsed > 0 {
            tracing::trace!(elapsed, global = self.clock.tick(), "advanced global clock");
            self.expire_forks();
        }
        Ok(elapsed)
    }

    /// Advance by whole global ticks (tests, deterministic drivers).
    pub fn advance_ticks(&mut self, ticks: u64) -> u64 {
        let elapsed = self.clock.advance_ticks(ticks);
        self.expire_forks();
        elapsed
    }

    /// Create a fresh root universe at tick 0 with no fork point.
    pub fn create_universe(&mut self, config: UniverseConfig) -> Result<UniverseId, MultiverseError> {
        config.validate().map_err(MultiverseError::InvalidConfig)?;
        let global = self.clock.tick();
        let id = UniverseId::derive(&config.label, global);
        if self.universes.contains_key(&id) {
            return Err(MultiverseError::UniverseExists(id));
        }
        let time = TimeRecord::new_root(global, self.config.default_rate)?;
        tracing::info!(%id, label = %config.label, global, "created universe");
        self.universes.insert(id.clone(), Universe::new(id.clone(), config, time));
        Ok(id)
    }

    /// Fork a universe into an isolated copy.
    ///
    /// Transactional: config validation, clock setup, the deep copy, and the
    /// injection are all staged on a local value; nothing is registered until
    /// every step has succeeded.
    pub fn fork_universe(
        &mut self,
        source: &UniverseId,
        fork: ForkConfig,
    ) -> Result<UniverseId, MultiverseError> {
        let source_u = self
            .universes
            .get(source)
            .ok_or_else(|| MultiverseError::UniverseNotFound(source.clone()))?;

        let global = self.clock.tick();
        let parent_tick = source_u.tick_at(global);
        let label = fork
            .label
            .unwrap_or_else(|| format!("{}-fork", source_u.config().label));
        let rate = fork.rate.unwrap_or_else(|| source_u.time().rate());

        let mut config = source_u.config().clone();
        config.label = label.clone();
        if let Some(rules) = fork.rules_override {
            config.rules = rules;
        }
        config.validate().map_err(MultiverseError::InvalidConfig)?;

        let id = UniverseId::derive_fork(source, &label, global);
        if self.universes.contains_key(&id) {
            return Err(MultiverseError::UniverseExists(id));
        }

        let fork_point = ForkPoint {
            parent: source.clone(),
            parent_tick,
            global_tick: global,
        };
        let time = TimeRecord::new_fork(fork_point, rate)?;

        // Deep copy; this frozen state doubles as the merge base.
        let base = source_u.snapshot_state();
        let mut universe = Universe::new(id.clone(), config, time);
        universe.replace_state(base.clone());

        if let Some(injection) = fork.injection {
            apply_injection(&mut universe, injection)?;
        }

        let tick_budget = fork.tick_budget.unwrap_or(self.config.fork_tick_budget);
        tracing::info!(%id, parent = %source, parent_tick, global, rate, "forked universe");
        self.universes.insert(id.clone(), universe);
        self.forks.insert(id.clone(), ForkBase { base, tick_budget });
        Ok(id)
    }

    pub fn pause(&mut self, id: &UniverseId) -> Result<(), MultiverseError> {
        let global = self.clock.tick();
        let universe = self
            .universes
            .get_mut(id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(id.clone()))?;
        universe.time_mut().pause(global);
        Ok(())
    }

    pub fn resume(&mut self, id: &UniverseId) -> Result<(), MultiverseError> {
        let global = self.clock.tick();
        let universe = self
            .universes
            .get_mut(id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(id.clone()))?;
        universe.time_mut().resume(global);
        Ok(())
    }

    pub fn set_rate(&mut self, id: &UniverseId, rate: f64) -> Result<(), MultiverseError> {
        let global = self.clock.tick();
        let universe = self
            .universes
            .get_mut(id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(id.clone()))?;
        universe.time_mut().set_rate(global, rate)?;
        Ok(())
    }

    /// Delete a universe and any fork bookkeeping attached to it.
    pub fn delete(&mut self, id: &UniverseId) -> Result<(), MultiverseError> {
        if self.universes.remove(id).is_none() {
            return Err(MultiverseError::UniverseNotFound(id.clone()));
        }
        self.forks.remove(id);
        tracing::info!(%id, "deleted universe");
        Ok(())
    }

    /// Remove forks that have run past their tick budget. Returns the removed
    /// ids.
    pub fn expire_forks(&mut self) -> Vec<UniverseId> {
        let global = self.clock.tick();
        let mut expired = Vec::new();
        for (id, fork_base) in &self.forks {
            let Some(universe) = self.universes.get(id) else {
                continue;
            };
            let Some(fork_point) = universe.time().fork_point() else {
                continue;
            };
            let elapsed = universe.tick_at(global).saturating_sub(fork_point.parent_tick);
            if elapsed > fork_base.tick_budget {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            tracing::info!(%id, "fork expired past its tick budget");
            self.universes.remove(id);
            self.forks.remove(id);
        }
        expired
    }

    /// Register a kind-specific strategy consulted when a three-way merge
    /// finds a component changed on both sides.
    pub fn register_merge_strategy(&mut self, kind: impl Into<String>, strategy: MergeStrategy) {
        self.strategies.insert(kind.into(), strategy);
    }

    /// Diff a fork's current state against its fork-point snapshot.
    pub fn diff_from_fork_point(&self, fork_id: &UniverseId) -> Result<StateDiff, MultiverseError> {
        let fork_base = self
            .forks
            .get(fork_id)
            .ok_or_else(|| MultiverseError::NotAFork(fork_id.clone()))?;
        let fork = self
            .universes
            .get(fork_id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?;
        Ok(diff_states(&fork_base.base, &fork.snapshot_state()))
    }

    /// Dry-run the three-way merge and report mergeability.
    pub fn merge_preview(&self, fork_id: &UniverseId) -> Result<MergeVerdict, MultiverseError> {
        let (_, conflicts) = self.three_way(fork_id)?;
        Ok(if conflicts.is_empty() {
            MergeVerdict::Clean
        } else {
            MergeVerdict::Conflicted(conflicts)
        })
    }

    /// Experimental: fold a fork back into its parent.
    ///
    /// Performs a three-way comparison between the fork-point snapshot, the
    /// current parent state, and the current fork state. On success the
    /// parent's state is swapped wholesale and the fork is deleted; on
    /// conflict nothing is touched and the report is returned as data.
    pub fn merge(&mut self, fork_id: &UniverseId) -> Result<MergeOutcome, MultiverseError> {
        let _span = tracing::info_span!("merge", fork = %fork_id).entered();
        let (merged, conflicts) = self.three_way(fork_id)?;
        let parent_id = self.parent_of(fork_id)?;

        if !conflicts.is_empty() {
            tracing::info!(count = conflicts.len(), "merge found conflicts; nothing applied");
            return Ok(MergeOutcome::Conflicts(MergeReport {
                fork: fork_id.clone(),
                parent: parent_id,
                conflicts,
            }));
        }

        let parent = self
            .universes
            .get_mut(&parent_id)
            .ok_or_else(|| MultiverseError::ParentMissing {
                fork: fork_id.clone(),
                parent: parent_id.clone(),
            })?;
        parent.replace_state(merged);
        self.universes.remove(fork_id);
        self.forks.remove(fork_id);
        tracing::info!(into = %parent_id, "merge applied");
        Ok(MergeOutcome::Merged { into: parent_id })
    }

    fn parent_of(&self, fork_id: &UniverseId) -> Result<UniverseId, MultiverseError> {
        let fork = self
            .universes
            .get(fork_id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?;
        fork.time()
            .fork_point()
            .map(|fp| fp.parent.clone())
            .ok_or_else(|| MultiverseError::NotAFork(fork_id.clone()))
    }

    /// The full three-way comparison. Returns the merged state (meaningful
    /// only when the conflict list is empty) and every conflict found.
    fn three_way(
        &self,
        fork_id: &UniverseId,
    ) -> Result<(UniverseState, Vec<MergeConflict>), MultiverseError> {
        let fork_base = self
            .forks
            .get(fork_id)
            .ok_or_else(|| MultiverseError::NotAFork(fork_id.clone()))?;
        let fork = self
            .universes
            .get(fork_id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?;
        let parent_id = self.parent_of(fork_id)?;
        let parent = self
            .universes
            .get(&parent_id)
            .ok_or_else(|| MultiverseError::ParentMissing {
                fork: fork_id.clone(),
                parent: parent_id.clone(),
            })?;

        let base = &fork_base.base;
        let parent_state = parent.snapshot_state();
        let fork_state = fork.snapshot_state();

        let mut conflicts = Vec::new();
        let mut merged_entities = BTreeMap::new();

        let ids: BTreeSet<EntityId> = base
            .entities
            .keys()
            .chain(parent_state.entities.keys())
            .chain(fork_state.entities.keys())
            .copied()
            .collect();

        for id in ids {
            let b = base.entities.get(&id);
            let p = parent_state.entities.get(&id);
            let f = fork_state.entities.get(&id);
            if let Some(entity) = self.merge_entity(id, b, p, f, &mut conflicts) {
                merged_entities.insert(id, entity);
            }
        }

        let world_state = match three_way_value(
            Some(&base.world_state),
            Some(&parent_state.world_state),
            Some(&fork_state.world_state),
        ) {
            Ok(value) => value.cloned().unwrap_or(Value::Null),
            Err(()) => {
                conflicts.push(MergeConflict {
                    entity: None,
                    component: Some("world_state".to_string()),
                    detail: "auxiliary world state changed on both sides".to_string(),
                });
                Value::Null
            }
        };

        Ok((
            UniverseState {
                entities: merged_entities,
                world_state,
            },
            conflicts,
        ))
    }

    /// Three-way merge of one entity. Returns the merged entity, or `None`
    /// if the merged result is "entity absent".
    fn merge_entity(
        &self,
        id: EntityId,
        base: Option<&Entity>,
        parent: Option<&Entity>,
        fork: Option<&Entity>,
        conflicts: &mut Vec<MergeConflict>,
    ) -> Option<Entity> {
        match (base, parent, fork) {
            (_, None, None) => None,
            // Added on exactly one side since the fork point.
            (None, Some(p), None) => Some(p.clone()),
            (None, None, Some(f)) => Some(f.clone()),
            (None, Some(p), Some(f)) => {
                if p == f {
                    Some(p.clone())
                } else {
                    conflicts.push(MergeConflict {
                        entity: Some(id),
                        component: None,
                        detail: "entity added on both sides with different state".to_string(),
                    });
                    None
                }
            }
            // Removed on one side; kept only if the other side left it alone.
            (Some(b), None, Some(f)) => {
                if f == b {
                    None
                } else {
                    conflicts.push(MergeConflict {
                        entity: Some(id),
                        component: None,
                        detail: "removed in parent but modified in fork".to_string(),
                    });
                    None
                }
            }
            (Some(b), Some(p), None) => {
                if p == b {
                    None
                } else {
                    conflicts.push(MergeConflict {
                        entity: Some(id),
                        component: None,
                        detail: "removed in fork but modified in parent".to_string(),
                    });
                    None
                }
            }
            (Some(b), Some(p), Some(f)) => {
                if p == f {
                    return Some(p.clone());
                }
                if p == b {
                    return Some(f.clone());
                }
                if f == b {
                    return Some(p.clone());
                }
                Some(self.merge_entity_fields(id, b, p, f, conflicts))
            }
        }
    }

    /// Field-level merge when an entity changed on both sides.
    fn merge_entity_fields(
        &self,
        id: EntityId,
        base: &Entity,
        parent: &Entity,
        fork: &Entity,
        conflicts: &mut Vec<MergeConflict>,
    ) -> Entity {
        let position = if parent.position == fork.position || fork.position == base.position {
            parent.position
        } else if parent.position == base.position {
            fork.position
        } else {
            conflicts.push(MergeConflict {
                entity: Some(id),
                component: Some("position".to_string()),
                detail: "moved to different positions on both sides".to_string(),
            });
            base.position
        };

        let kinds: BTreeSet<&String> = base
            .components
            .keys()
            .chain(parent.components.keys())
            .chain(fork.components.keys())
            .collect();

        let mut components = BTreeMap::new();
        for kind in kinds {
            let b = base.components.get(kind);
            let p = parent.components.get(kind);
            let f = fork.components.get(kind);

            let resolved = match three_way_record(b, p, f) {
                Ok(record) => record.cloned(),
                Err(()) => match self.strategies.get(kind.as_str()) {
                    Some(MergeStrategy::TakeFork) => f.cloned(),
                    Some(MergeStrategy::TakeParent) => p.cloned(),
                    Some(MergeStrategy::Combine(combine)) => match combine(b, p, f) {
                        Ok(record) => record,
                        Err(message) => {
                            conflicts.push(MergeConflict {
                                entity: Some(id),
                                component: Some(kind.to_string()),
                                detail: format!("merge strategy failed: {message}"),
                            });
                            continue;
                        }
                    },
                    None => {
                        conflicts.push(MergeConflict {
                            entity: Some(id),
                            component: Some(kind.to_string()),
                            detail: "changed on both sides and no merge strategy is registered"
                                .to_string(),
                        });
                        continue;
                    }
                },
            };
            if let Some(record) = resolved {
                components.insert(kind.to_string(), record);
            }
        }

        Entity {
            id,
            position,
            components,
        }
    }
}

/// Generic three-way resolution over any comparable slot.
/// `Err(())` means both sides changed it differently.
fn three_way_slot<'a, T: PartialEq>(
    base: Option<&'a T>,
    parent: Option<&'a T>,
    fork: Option<&'a T>,
) -> Result<Option<&'a T>, ()> {
    if parent == fork {
        return Ok(parent);
    }
    if parent == base {
        return Ok(fork);
    }
    if fork == base {
        return Ok(parent);
    }
    Err(())
}

fn three_way_record<'a>(
    base: Option<&'a ComponentRecord>,
    parent: Option<&'a ComponentRecord>,
    fork: Option<&'a ComponentRecord>,
) -> Result<Option<&'a ComponentRecord>, ()> {
    three_way_slot(base, parent, fork)
}

fn three_way_value<'a>(
    base: Option<&'a Value>,
    parent: Option<&'a Value>,
    fork: Option<&'a Value>,
) -> Result<Option<&'a Value>, ()> {
    three_way_slot(base, parent, fork)
}

fn apply_injection(universe: &mut Universe, injection: ForkInjection) -> Result<(), MultiverseError> {
    match injection {
        ForkInjection::SpawnEntities(seeds) => {
            let bounds = universe.config().bounds;
            for seed in &seeds {
                if !seed.position.is_finite() || !bounds.contains(seed.position) {
                    return Err(MultiverseError::InvalidConfig(format!(
                        "injected entity position {:?} is outside world bounds",
                        seed.position
                    )));
                }
            }
            for seed in seeds {
                let id = universe.spawn(seed.position);
                if let Some(entity) = universe.entity_mut(id) {
                    for (kind, version, payload) in seed.components {
                        entity.set_component(kind, version, payload);
                    }
                }
            }
            Ok(())
        }
    }
}

fn diff_states(base: &UniverseState, current: &UniverseState) -> StateDiff {
    let mut spawned = Vec::new();
    let mut despawned = Vec::new();
    let mut modified = Vec::new();

    for (id, entity) in &current.entities {
        match base.entities.get(id) {
            None => spawned.push(*id),
            Some(before) if before != entity => modified.push(*id),
            Some(_) => {}
        }
    }
    for id in base.entities.keys() {
        if !current.entities.contains_key(id) {
            despawned.push(*id);
        }
    }

    StateDiff {
        spawned,
        despawned,
        modified,
        world_state_changed: base.world_state != current.world_state,
    }
}
