use crate::time::DEFAULT_TICKS_PER_SECOND;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Axis-aligned bounds a universe's entities must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl WorldBounds {
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min: Vec3::splat(-1024.0),
            max: Vec3::splat(1024.0),
        }
    }
}

/// Per-universe configuration. `rules` is opaque to this layer; the owning
/// simulation interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub label: String,
    pub bounds: WorldBounds,
    pub day_length_ticks: u64,
    #[serde(default)]
    pub rules: Value,
}

impl UniverseConfig {
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Check the config before a universe is registered with it.
    pub fn validate(&self) -> Result<(), String> {
        if self.label.is_empty() {
            return Err("label must not be empty".to_string());
        }
        if self.day_length_ticks == 0 {
            return Err("day_length_ticks must be positive".to_string());
        }
        let b = &self.bounds;
        if !(b.min.x < b.max.x && b.min.y < b.max.y && b.min.z < b.max.z) {
            return Err("bounds min must be strictly below max on every axis".to_string());
        }
        Ok(())
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            label: "universe".to_string(),
            bounds: WorldBounds::default(),
            day_length_ticks: 2400,
            rules: Value::Null,
        }
    }
}

/// Multiverse-level configuration carried in the save envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseConfig {
    pub ticks_per_second: u32,
    /// Rate multiplier for newly created root universes.
    pub default_rate: f64,
    /// Default tick budget after which an unattended fork expires.
    pub fork_tick_budget: u64,
}

impl Default for MultiverseConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            default_rate: 1.0,
            fork_tick_budget: 100_000,
        }
    }
}

/// Entity seeded into a fork at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeed {
    pub position: Vec3,
    /// (kind, version, payload) component records to attach.
    pub components: Vec<(String, u32, Value)>,
}

/// Optional mutation applied to a fork immediately after the deep copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForkInjection {
    /// Spawn extra entities into the fork.
    SpawnEntities(Vec<EntitySeed>),
}

/// Options for forking a universe.
#[derive(Debug, Clone, Default)]
pub struct ForkConfig {
    /// Label for the fork; defaults to `<parent label>-fork`.
    pub label: Option<String>,
    /// Rate multiplier override (e.g. 8.0 for fast-forward testing).
    pub rate: Option<f64>,
    /// Tick budget override before automatic expiry.
    pub tick_budget: Option<u64>,
    /// Replacement rules blob for the fork.
    pub rules_override: Option<Value>,
    /// Mutation applied after the copy, before the fork is registered.
    pub injection: Option<ForkInjection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(UniverseConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_names_the_problem() {
        let mut cfg = UniverseConfig::named("");
        assert!(cfg.validate().unwrap_err().contains("label"));

        cfg = UniverseConfig::named("ok");
        cfg.day_length_ticks = 0;
        assert!(cfg.validate().unwrap_err().contains("day_length_ticks"));

        cfg = UniverseConfig::named("ok");
        cfg.bounds.max = cfg.bounds.min;
        assert!(cfg.validate().unwrap_err().contains("bounds"));
    }

    #[test]
    fn bounds_containment() {
        let b = WorldBounds::default();
        assert!(b.contains(Vec3::ZERO));
        assert!(!b.contains(Vec3::splat(5000.0)));
    }
}
