use crate::universe::Universe;
use chronoverse_common::EntityId;
use chronoverse_schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How bad a detected violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// One detected invariant violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub check: String,
    pub entity: Option<EntityId>,
    pub component: Option<String>,
    pub message: String,
}

/// A pure, read-only predicate over universe state.
///
/// Forked universes run unattended at high speed; these checks are what turn
/// "the fork silently drifted into nonsense" into a structured, reportable
/// failure.
pub trait InvariantCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, universe: &Universe) -> Vec<Violation>;
}

/// Pluggable set of invariant checks.
pub struct InvariantChecker {
    checks: Vec<Box<dyn InvariantCheck>>,
}

impl InvariantChecker {
    /// An empty checker with no registered checks.
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// A checker preloaded with the built-in state-sanity checks.
    pub fn with_builtin_checks() -> Self {
        let mut checker = Self::new();
        checker.register(Box::new(FinitePositions));
        checker.register(Box::new(InsideWorldBounds));
        checker
    }

    pub fn register(&mut self, check: Box<dyn InvariantCheck>) {
        self.checks.push(check);
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Run every registered check against a universe.
    pub fn check_universe(&self, universe: &Universe) -> Vec<Violation> {
        let _span = tracing::debug_span!("invariant_check", universe = %universe.id()).entered();
        let mut violations = Vec::new();
        for check in &self.checks {
            let found = check.check(universe);
            if !found.is_empty() {
                tracing::debug!(check = check.name(), count = found.len(), "violations found");
            }
            violations.extend(found);
        }
        violations
    }
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::with_builtin_checks()
    }
}

/// No entity position may hold a non-finite coordinate.
pub struct FinitePositions;

impl InvariantCheck for FinitePositions {
    fn name(&self) -> &str {
        "finite-positions"
    }

    fn check(&self, universe: &Universe) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (id, entity) in universe.entities() {
            if !entity.position.is_finite() {
                violations.push(Violation {
                    severity: Severity::Critical,
                    check: self.name().to_string(),
                    entity: Some(*id),
                    component: None,
                    message: format!("position {:?} has a non-finite coordinate", entity.position),
                });
            }
        }
        violations
    }
}

/// No entity may sit outside the universe's configured world bounds.
pub struct InsideWorldBounds;

impl InvariantCheck for InsideWorldBounds {
    fn name(&self) -> &str {
        "world-bounds"
    }

    fn check(&self, universe: &Universe) -> Vec<Violation> {
        let bounds = universe.config().bounds;
        let mut violations = Vec::new();
        for (id, entity) in universe.entities() {
            if entity.position.is_finite() && !bounds.contains(entity.position) {
                violations.push(Violation {
                    severity: Severity::Error,
                    check: self.name().to_string(),
                    entity: Some(*id),
                    component: None,
                    message: format!(
                        "position {:?} is outside world bounds [{:?}, {:?}]",
                        entity.position, bounds.min, bounds.max
                    ),
                });
            }
        }
        violations
    }
}

/// Every component record must carry a kind and version the registry knows,
/// and its payload must pass that version's validator.
///
/// Catches version drift (a component written by a newer producer, or a kind
/// that lost its registration) and payload corruption before either reaches
/// a save file.
pub struct RegisteredSchemas {
    registry: Arc<SchemaRegistry>,
}

impl RegisteredSchemas {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }
}

impl InvariantCheck for RegisteredSchemas {
    fn name(&self) -> &str {
        "registered-schemas"
    }

    fn check(&self, universe: &Universe) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (id, entity) in universe.entities() {
            for (kind, record) in &entity.components {
                match self.registry.current_version(kind) {
                    Err(_) => violations.push(Violation {
                        severity: Severity::Error,
                        check: self.name().to_string(),
                        entity: Some(*id),
                        component: Some(kind.clone()),
                        message: format!("data-kind {kind:?} has no registered schema"),
                    }),
                    Ok(current) if record.version > current => violations.push(Violation {
                        severity: Severity::Error,
                        check: self.name().to_string(),
                        entity: Some(*id),
                        component: Some(kind.clone()),
                        message: format!(
                            "component is v{} but the registry only knows up to v{current}",
                            record.version
                        ),
                    }),
                    Ok(_) => {
                        if let Err(err) =
                            self.registry.validate(kind, record.version, &record.payload)
                        {
                            violations.push(Violation {
                                severity: Severity::Error,
                                check: self.name().to_string(),
                                entity: Some(*id),
                                component: Some(kind.clone()),
                                message: format!("payload fails its v{} schema: {err}", record.version),
                            });
                        }
                    }
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UniverseConfig;
    use crate::time::TimeRecord;
    use chronoverse_common::UniverseId;
    use chronoverse_schema::Schema;
    use glam::Vec3;
    use serde_json::json;

    fn test_universe() -> Universe {
        Universe::new(
            UniverseId::derive("test", 0),
            UniverseConfig::named("test"),
            TimeRecord::new_root(0, 1.0).unwrap(),
        )
    }

    #[test]
    fn clean_universe_has_no_violations() {
        let mut u = test_universe();
        u.spawn(Vec3::ZERO);
        let checker = InvariantChecker::with_builtin_checks();
        assert!(checker.check_universe(&u).is_empty());
    }

    #[test]
    fn non_finite_position_is_critical() {
        let mut u = test_universe();
        let id = u.spawn(Vec3::new(f32::NAN, 0.0, 0.0));
        let checker = InvariantChecker::with_builtin_checks();

        let violations = checker.check_universe(&u);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Critical);
        assert_eq!(violations[0].entity, Some(id));
    }

    #[test]
    fn out_of_bounds_position_is_error() {
        let mut u = test_universe();
        u.spawn(Vec3::splat(99_999.0));
        let checker = InvariantChecker::with_builtin_checks();

        let violations = checker.check_universe(&u);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
        assert!(violations[0].message.contains("world bounds"));
    }

    #[test]
    fn unregistered_schema_is_flagged() {
        let mut registry = SchemaRegistry::new();
        registry.register("needs", 0, Schema::new(|_| Ok(()))).unwrap();

        let mut u = test_universe();
        let id = u.spawn(Vec3::ZERO);
        u.entity_mut(id)
            .unwrap()
            .set_component("needs", 3, json!({}));
        u.entity_mut(id)
            .unwrap()
            .set_component("mystery", 0, json!({}));

        let mut checker = InvariantChecker::new();
        checker.register(Box::new(RegisteredSchemas::new(Arc::new(registry))));

        let violations = checker.check_universe(&u);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.component.as_deref() == Some("mystery")));
        assert!(violations.iter().any(|v| v.message.contains("v3")));
    }

    #[test]
    fn payload_failing_its_validator_is_flagged() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "needs",
                0,
                Schema::new(|payload| {
                    chronoverse_schema::require_number("needs", 0, payload, "hunger")?;
                    Ok(())
                }),
            )
            .unwrap();

        let mut u = test_universe();
        let id = u.spawn(Vec3::ZERO);
        u.entity_mut(id)
            .unwrap()
            .set_component("needs", 0, json!({"hunger": "starving"}));

        let mut checker = InvariantChecker::new();
        checker.register(Box::new(RegisteredSchemas::new(Arc::new(registry))));

        let violations = checker.check_universe(&u);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].component.as_deref(), Some("needs"));
        assert!(violations[0].message.contains("schema"));
    }

    #[test]
    fn custom_checks_can_be_registered() {
        struct AlwaysWarn;
        impl InvariantCheck for AlwaysWarn {
            fn name(&self) -> &str {
                "always-warn"
            }
            fn check(&self, _universe: &Universe) -> Vec<Violation> {
                vec![Violation {
                    severity: Severity::Warning,
                    check: "always-warn".to_string(),
                    entity: None,
                    component: None,
                    message: "warned".to_string(),
                }]
            }
        }

        let mut checker = InvariantChecker::new();
        checker.register(Box::new(AlwaysWarn));
        let violations = checker.check_universe(&test_universe());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Warning);
    }
}
