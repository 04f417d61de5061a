use crate::migration::{Migrated, MigrationContext, SplitRecord, TransformOutput};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Validates a payload against one schema version. Failures name the
/// offending field and constraint rather than returning a bare boolean.
pub type ValidateFn = Box<dyn Fn(&Value) -> Result<(), SchemaError> + Send + Sync>;

/// Converts between live and persisted payload shapes for one version.
pub type CodecFn = Box<dyn Fn(&Value) -> Result<Value, SchemaError> + Send + Sync>;

/// One version-to-version transform. Pure function of the old payload and the
/// read-only sibling context.
pub type TransformFn =
    Box<dyn Fn(&Value, &MigrationContext) -> Result<TransformOutput, SchemaError> + Send + Sync>;

/// Errors from schema registration, validation, and migration.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown data-kind {0:?}")]
    UnknownKind(String),
    #[error("data-kind {kind:?} has no registered schema v{version}")]
    UnknownVersion { kind: String, version: u32 },
    #[error("schema v{version} for data-kind {kind:?} is already registered")]
    DuplicateSchema { kind: String, version: u32 },
    #[error("migration v{from} -> v{to} for data-kind {kind:?} is already registered")]
    DuplicateMigration { kind: String, from: u32, to: u32 },
    #[error("migration v{from} -> v{to} for data-kind {kind:?} is not single-step")]
    NonConsecutiveMigration { kind: String, from: u32, to: u32 },
    #[error(
        "no migration registered for data-kind {kind:?} starting at v{missing_from} (requested v{from} -> v{to})"
    )]
    MissingMigration {
        kind: String,
        from: u32,
        to: u32,
        missing_from: u32,
    },
    #[error("cannot migrate data-kind {kind:?} backwards from v{from} to v{to}")]
    Backwards { kind: String, from: u32, to: u32 },
    #[error("validation failed for data-kind {kind:?} v{version}: {message}")]
    Validation {
        kind: String,
        version: u32,
        message: String,
    },
    #[error("transform failed for data-kind {kind:?} v{from} -> v{to}: {message}")]
    Transform {
        kind: String,
        from: u32,
        to: u32,
        message: String,
    },
    #[error("migration chains have gaps: {0}")]
    ChainGaps(String),
}

/// Serializer/deserializer/validator triple for one version of a data-kind.
pub struct Schema {
    serialize: CodecFn,
    deserialize: CodecFn,
    validate: ValidateFn,
}

impl Schema {
    /// Schema whose persisted shape equals the live shape.
    pub fn new<V>(validate: V) -> Self
    where
        V: Fn(&Value) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        Self {
            serialize: Box::new(|v| Ok(v.clone())),
            deserialize: Box::new(|v| Ok(v.clone())),
            validate: Box::new(validate),
        }
    }

    /// Schema with distinct live and persisted shapes.
    pub fn with_codec<S, D, V>(serialize: S, deserialize: D, validate: V) -> Self
    where
        S: Fn(&Value) -> Result<Value, SchemaError> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<Value, SchemaError> + Send + Sync + 'static,
        V: Fn(&Value) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        Self {
            serialize: Box::new(serialize),
            deserialize: Box::new(deserialize),
            validate: Box::new(validate),
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").finish_non_exhaustive()
    }
}

struct MigrationStep {
    to: u32,
    description: String,
    transform: TransformFn,
}

/// Registry of versioned schemas and the ordered migration steps between them.
///
/// Every schema change, however small, is registered as code here; loading
/// never infers a transform or branches on "is this field present".
pub struct SchemaRegistry {
    schemas: BTreeMap<String, BTreeMap<u32, Schema>>,
    migrations: BTreeMap<String, BTreeMap<u32, MigrationStep>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
            migrations: BTreeMap::new(),
        }
    }

    /// Register a schema version for a data-kind.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        version: u32,
        schema: Schema,
    ) -> Result<(), SchemaError> {
        let kind = kind.into();
        let versions = self.schemas.entry(kind.clone()).or_default();
        if versions.contains_key(&version) {
            return Err(SchemaError::DuplicateSchema { kind, version });
        }
        tracing::debug!(%kind, version, "registered schema");
        versions.insert(version, schema);
        Ok(())
    }

    /// Register a single-step migration for a data-kind.
    pub fn register_migration<T>(
        &mut self,
        kind: impl Into<String>,
        from: u32,
        to: u32,
        description: impl Into<String>,
        transform: T,
    ) -> Result<(), SchemaError>
    where
        T: Fn(&Value, &MigrationContext) -> Result<TransformOutput, SchemaError>
            + Send
            + Sync
            + 'static,
    {
        let kind = kind.into();
        if to != from + 1 {
            return Err(SchemaError::NonConsecutiveMigration { kind, from, to });
        }
        let steps = self.migrations.entry(kind.clone()).or_default();
        if steps.contains_key(&from) {
            return Err(SchemaError::DuplicateMigration { kind, from, to });
        }
        let description = description.into();
        tracing::debug!(%kind, from, to, %description, "registered migration");
        steps.insert(
            from,
            MigrationStep {
                to,
                description,
                transform: Box::new(transform),
            },
        );
        Ok(())
    }

    /// Highest registered schema version for a kind.
    pub fn current_version(&self, kind: &str) -> Result<u32, SchemaError> {
        self.schemas
            .get(kind)
            .and_then(|versions| versions.keys().next_back().copied())
            .ok_or_else(|| SchemaError::UnknownKind(kind.to_string()))
    }

    /// All registered data-kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    /// Human-readable description of a registered migration step.
    pub fn migration_description(&self, kind: &str, from: u32) -> Option<&str> {
        self.migrations
            .get(kind)?
            .get(&from)
            .map(|step| step.description.as_str())
    }

    /// Validate a payload against a registered schema version.
    pub fn validate(&self, kind: &str, version: u32, payload: &Value) -> Result<(), SchemaError> {
        let schema = self.schema(kind, version)?;
        (schema.validate)(payload)
    }

    /// Convert a live payload to its persisted shape, validating the result.
    pub fn serialize_payload(
        &self,
        kind: &str,
        version: u32,
        live: &Value,
    ) -> Result<Value, SchemaError> {
        let schema = self.schema(kind, version)?;
        let persisted = (schema.serialize)(live)?;
        (schema.validate)(&persisted)?;
        Ok(persisted)
    }

    /// Convert a persisted payload back to its live shape. The input is
    /// validated first so corruption surfaces here, not downstream.
    pub fn deserialize_payload(
        &self,
        kind: &str,
        version: u32,
        persisted: &Value,
    ) -> Result<Value, SchemaError> {
        let schema = self.schema(kind, version)?;
        (schema.validate)(persisted)?;
        (schema.deserialize)(persisted)
    }

    /// Migrate a payload along the unique chain of registered single-step
    /// migrations from `from` to `to`.
    ///
    /// Each step's output is validated against the destination version before
    /// the next step runs. A `Split` output ends the chain for the original
    /// payload; every produced record is then migrated to the requested
    /// version (same kind) or its own kind's current version (other kinds).
    pub fn migrate(
        &self,
        kind: &str,
        payload: &Value,
        from: u32,
        to: u32,
        context: &MigrationContext,
    ) -> Result<Migrated, SchemaError> {
        if from > to {
            return Err(SchemaError::Backwards {
                kind: kind.to_string(),
                from,
                to,
            });
        }
        if from == to {
            self.validate(kind, to, payload)?;
            return Ok(Migrated::Replaced {
                version: to,
                payload: payload.clone(),
            });
        }

        let mut current = payload.clone();
        let mut version = from;
        while version < to {
            let step = self
                .migrations
                .get(kind)
                .and_then(|steps| steps.get(&version))
                .ok_or_else(|| SchemaError::MissingMigration {
                    kind: kind.to_string(),
                    from,
                    to,
                    missing_from: version,
                })?;
            tracing::trace!(%kind, from = version, to = step.to, "applying migration step");
            match (step.transform)(&current, context)? {
                TransformOutput::Replaced(next) => {
                    self.validate(kind, step.to, &next)?;
                    current = next;
                    version = step.to;
                }
                TransformOutput::Split(records) => {
                    return self.finish_split(kind, to, records, context);
                }
            }
        }
        Ok(Migrated::Replaced {
            version: to,
            payload: current,
        })
    }

    /// Migrate a payload from a stored version to the kind's current version.
    pub fn migrate_to_current(
        &self,
        kind: &str,
        payload: &Value,
        from: u32,
        context: &MigrationContext,
    ) -> Result<Migrated, SchemaError> {
        let to = self.current_version(kind)?;
        self.migrate(kind, payload, from, to, context)
    }

    /// Verify migration-chain totality: every consecutive pair of registered
    /// schema versions must have exactly one migration step between them.
    pub fn verify_chains(&self) -> Result<(), SchemaError> {
        let mut gaps = Vec::new();
        for (kind, versions) in &self.schemas {
            let Some((&min, _)) = versions.first_key_value() else {
                continue;
            };
            let Some((&max, _)) = versions.last_key_value() else {
                continue;
            };
            for v in min..max {
                let present = self
                    .migrations
                    .get(kind)
                    .is_some_and(|steps| steps.contains_key(&v));
                if !present {
                    gaps.push(format!("{kind} v{v} -> v{}", v + 1));
                }
            }
        }
        if gaps.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ChainGaps(gaps.join(", ")))
        }
    }

    fn schema(&self, kind: &str, version: u32) -> Result<&Schema, SchemaError> {
        let versions = self
            .schemas
            .get(kind)
            .ok_or_else(|| SchemaError::UnknownKind(kind.to_string()))?;
        versions
            .get(&version)
            .ok_or_else(|| SchemaError::UnknownVersion {
                kind: kind.to_string(),
                version,
            })
    }

    fn finish_split(
        &self,
        kind: &str,
        to: u32,
        records: Vec<SplitRecord>,
        context: &MigrationContext,
    ) -> Result<Migrated, SchemaError> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            self.validate(&record.kind, record.version, &record.payload)?;
            let target = if record.kind == kind {
                to
            } else {
                self.current_version(&record.kind)?
            };
            match self.migrate(&record.kind, &record.payload, record.version, target, context)? {
                Migrated::Replaced { version, payload } => {
                    out.push(SplitRecord::new(record.kind, version, payload));
                }
                Migrated::Split(nested) => out.extend(nested),
            }
        }
        Ok(Migrated::Split(out))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("kinds", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validator helper: require an object with the given finite numeric field.
///
/// Shared by hand-written validators so error messages stay uniform.
pub fn require_number(
    kind: &str,
    version: u32,
    payload: &Value,
    field: &str,
) -> Result<f64, SchemaError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .ok_or_else(|| SchemaError::Validation {
            kind: kind.to_string(),
            version,
            message: format!("field {field:?} must be a finite number"),
        })
}

/// Validator helper: require a string field.
pub fn require_string<'a>(
    kind: &str,
    version: u32,
    payload: &'a Value,
    field: &str,
) -> Result<&'a str, SchemaError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::Validation {
            kind: kind.to_string(),
            version,
            message: format!("field {field:?} must be a string"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.register(
            "person",
            0,
            Schema::new(|v| {
                require_string("person", 0, v, "name")?;
                require_number("person", 0, v, "age")?;
                Ok(())
            }),
        )
        .unwrap();
        reg.register(
            "person",
            1,
            Schema::new(|v| {
                require_string("person", 1, v, "name")?;
                require_number("person", 1, v, "age")?;
                require_number("person", 1, v, "generation")?;
                Ok(())
            }),
        )
        .unwrap();
        reg.register_migration("person", 0, 1, "add generation, default 0", |old, _ctx| {
            let mut next = old.clone();
            next["generation"] = json!(0);
            Ok(TransformOutput::Replaced(next))
        })
        .unwrap();
        reg
    }

    #[test]
    fn migrate_adds_defaulted_field() {
        let reg = person_registry();
        let v0 = json!({"name": "Alice", "age": 25});
        let migrated = reg
            .migrate("person", &v0, 0, 1, &MigrationContext::empty())
            .unwrap();
        assert_eq!(
            migrated,
            Migrated::Replaced {
                version: 1,
                payload: json!({"name": "Alice", "age": 25, "generation": 0}),
            }
        );
    }

    #[test]
    fn migrate_same_version_validates_only() {
        let reg = person_registry();
        let ok = json!({"name": "Alice", "age": 25});
        assert!(reg.migrate("person", &ok, 0, 0, &MigrationContext::empty()).is_ok());

        let bad = json!({"name": "Alice"});
        assert!(reg.migrate("person", &bad, 0, 0, &MigrationContext::empty()).is_err());
    }

    #[test]
    fn missing_step_fails_loudly() {
        let mut reg = person_registry();
        reg.register(
            "person",
            3,
            Schema::new(|_| Ok(())),
        )
        .unwrap();

        let v0 = json!({"name": "Alice", "age": 25});
        let err = reg
            .migrate("person", &v0, 0, 3, &MigrationContext::empty())
            .unwrap_err();
        match err {
            SchemaError::MissingMigration {
                kind,
                from,
                to,
                missing_from,
            } => {
                assert_eq!(kind, "person");
                assert_eq!((from, to), (0, 3));
                assert_eq!(missing_from, 1);
            }
            other => panic!("expected MissingMigration, got: {other}"),
        }
    }

    #[test]
    fn backwards_migration_rejected() {
        let reg = person_registry();
        let v1 = json!({"name": "Alice", "age": 25, "generation": 0});
        assert!(matches!(
            reg.migrate("person", &v1, 1, 0, &MigrationContext::empty()),
            Err(SchemaError::Backwards { .. })
        ));
    }

    #[test]
    fn duplicate_schema_rejected() {
        let mut reg = person_registry();
        let err = reg.register("person", 0, Schema::new(|_| Ok(()))).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateSchema { .. }));
    }

    #[test]
    fn non_consecutive_migration_rejected() {
        let mut reg = SchemaRegistry::new();
        let err = reg
            .register_migration("person", 0, 2, "skip a version", |old, _| {
                Ok(TransformOutput::Replaced(old.clone()))
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::NonConsecutiveMigration { .. }));
    }

    #[test]
    fn transform_output_is_revalidated() {
        let mut reg = SchemaRegistry::new();
        reg.register("counter", 0, Schema::new(|_| Ok(()))).unwrap();
        reg.register(
            "counter",
            1,
            Schema::new(|v| {
                require_number("counter", 1, v, "count")?;
                Ok(())
            }),
        )
        .unwrap();
        // Buggy transform: forgets the field v1 requires.
        reg.register_migration("counter", 0, 1, "add count", |_, _| {
            Ok(TransformOutput::Replaced(json!({})))
        })
        .unwrap();

        let err = reg
            .migrate("counter", &json!({}), 0, 1, &MigrationContext::empty())
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation { .. }));
    }

    #[test]
    fn split_migration_expands_and_migrates_pieces() {
        let mut reg = SchemaRegistry::new();
        reg.register("needs", 0, Schema::new(|_| Ok(()))).unwrap();
        reg.register("needs", 1, Schema::new(|_| Ok(()))).unwrap();
        reg.register(
            "physical_needs",
            0,
            Schema::new(|v| {
                require_number("physical_needs", 0, v, "hunger")?;
                Ok(())
            }),
        )
        .unwrap();
        reg.register(
            "social_needs",
            0,
            Schema::new(|v| {
                require_number("social_needs", 0, v, "belonging")?;
                Ok(())
            }),
        )
        .unwrap();
        reg.register_migration("needs", 0, 1, "split physical/social", |old, _| {
            Ok(TransformOutput::Split(vec![
                SplitRecord::new("physical_needs", 0, json!({"hunger": old["hunger"]})),
                SplitRecord::new("social_needs", 0, json!({"belonging": old["belonging"]})),
            ]))
        })
        .unwrap();

        let v0 = json!({"hunger": 0.4, "belonging": 0.9});
        let migrated = reg
            .migrate("needs", &v0, 0, 1, &MigrationContext::empty())
            .unwrap();
        match migrated {
            Migrated::Split(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0].kind, "physical_needs");
                assert_eq!(records[0].payload, json!({"hunger": 0.4}));
                assert_eq!(records[1].kind, "social_needs");
                assert_eq!(records[1].payload, json!({"belonging": 0.9}));
            }
            other => panic!("expected Split, got: {other:?}"),
        }
    }

    #[test]
    fn conditional_transform_reads_sibling_context() {
        let mut reg = SchemaRegistry::new();
        reg.register("mood", 0, Schema::new(|_| Ok(()))).unwrap();
        reg.register("mood", 1, Schema::new(|_| Ok(()))).unwrap();
        reg.register_migration("mood", 0, 1, "seed baseline from body", |old, ctx| {
            let baseline = if ctx.has_sibling("body") { 0.8 } else { 0.5 };
            let mut next = old.clone();
            next["baseline"] = json!(baseline);
            Ok(TransformOutput::Replaced(next))
        })
        .unwrap();

        let with_body = MigrationContext::with_siblings(
            [("body".to_string(), json!({}))].into_iter().collect(),
        );
        let a = reg.migrate("mood", &json!({}), 0, 1, &with_body).unwrap();
        let b = reg
            .migrate("mood", &json!({}), 0, 1, &MigrationContext::empty())
            .unwrap();
        assert_eq!(
            a,
            Migrated::Replaced {
                version: 1,
                payload: json!({"baseline": 0.8})
            }
        );
        assert_eq!(
            b,
            Migrated::Replaced {
                version: 1,
                payload: json!({"baseline": 0.5})
            }
        );
    }

    #[test]
    fn verify_chains_reports_gaps() {
        let mut reg = person_registry();
        assert!(reg.verify_chains().is_ok());

        reg.register("person", 3, Schema::new(|_| Ok(()))).unwrap();
        let err = reg.verify_chains().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("person v1 -> v2"), "got: {msg}");
        assert!(msg.contains("person v2 -> v3"), "got: {msg}");
    }

    #[test]
    fn codec_roundtrip_through_persisted_shape() {
        let mut reg = SchemaRegistry::new();
        // Persisted shape stores meters; live shape stores centimeters.
        reg.register(
            "body",
            0,
            Schema::with_codec(
                |live| {
                    let cm = require_number("body", 0, live, "height_cm")?;
                    Ok(json!({"height_m": cm / 100.0}))
                },
                |persisted| {
                    let m = require_number("body", 0, persisted, "height_m")?;
                    Ok(json!({"height_cm": m * 100.0}))
                },
                |persisted| {
                    require_number("body", 0, persisted, "height_m")?;
                    Ok(())
                },
            ),
        )
        .unwrap();

        let live = json!({"height_cm": 180.0});
        let persisted = reg.serialize_payload("body", 0, &live).unwrap();
        assert_eq!(persisted, json!({"height_m": 1.8}));
        let back = reg.deserialize_payload("body", 0, &persisted).unwrap();
        assert_eq!(back, live);
    }
}
