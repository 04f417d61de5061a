use anyhow::Context;
use chronoverse_kernel::{
    ForkConfig, InvariantChecker, MergeVerdict, Multiverse, MultiverseConfig, RegisteredSchemas,
    UniverseConfig,
};
use chronoverse_persist::{
    DirStore, KvStore, SaveHeader, StorageBackend, load_from_backend, save_to_backend,
};
use chronoverse_schema::{Schema, SchemaRegistry, TransformOutput, require_number};
use clap::{Parser, Subcommand, ValueEnum};
use glam::Vec3;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chronoverse-cli", about = "CLI tool for chronoverse operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Directory of save files (desktop)
    Dir,
    /// Single packed key-value file (sandboxed)
    Kv,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and registered demo schema info
    Info,
    /// Build a small multiverse, fork it fast-forward, and print the report
    Demo {
        /// Fork simulation ticks to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Fork rate multiplier
        #[arg(short, long, default_value = "8.0")]
        rate: f64,
    },
    /// Build the demo multiverse and save it under a key
    Save {
        key: String,
        #[arg(long, value_enum, default_value_t = BackendKind::Dir)]
        backend: BackendKind,
        #[arg(long, default_value = "saves")]
        path: PathBuf,
        /// Optional YAML universe config for the root universe
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load a save and print what it contains
    Load {
        key: String,
        #[arg(long, value_enum, default_value_t = BackendKind::Dir)]
        backend: BackendKind,
        #[arg(long, default_value = "saves")]
        path: PathBuf,
    },
    /// List stored saves, most recent first
    Saves {
        #[arg(long, value_enum, default_value_t = BackendKind::Dir)]
        backend: BackendKind,
        #[arg(long, default_value = "saves")]
        path: PathBuf,
    },
    /// Load a save and run the full invariant sweep over every universe
    Verify {
        key: String,
        #[arg(long, value_enum, default_value_t = BackendKind::Dir)]
        backend: BackendKind,
        #[arg(long, default_value = "saves")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("chronoverse-cli v{}", env!("CARGO_PKG_VERSION"));
            let registry = demo_registry()?;
            for kind in registry.kinds() {
                println!(
                    "schema: {kind} (current v{})",
                    registry.current_version(kind)?
                );
            }
            registry.verify_chains()?;
            println!("migration chains: complete");
        }
        Commands::Demo { ticks, rate } => {
            let registry = Arc::new(demo_registry()?);
            let mut mv = demo_multiverse()?;
            let prime = mv
                .universes()
                .keys()
                .next()
                .cloned()
                .context("demo multiverse is empty")?;

            // Let the prime universe accumulate some history, then fork it.
            mv.advance(5.0)?;
            let fork = mv.fork_universe(
                &prime,
                ForkConfig {
                    label: Some("hypothesis".to_string()),
                    rate: Some(rate),
                    ..Default::default()
                },
            )?;
            println!("forked {prime} -> {fork} at rate {rate}");

            let mut checker = InvariantChecker::with_builtin_checks();
            checker.register(Box::new(RegisteredSchemas::new(Arc::clone(&registry))));

            let report = mv.run_fork(&fork, ticks, &checker, |universe, tick| {
                // A stand-in for real simulation rules: drift everyone and
                // burn a little hunger each tick.
                let ids: Vec<_> = universe.entities().keys().copied().collect();
                for id in ids {
                    if let Some(entity) = universe.entity_mut(id) {
                        entity.position += Vec3::new(0.1, 0.0, 0.0);
                        if let Some(record) = entity.components.get_mut("needs") {
                            if let Some(h) = record.payload["hunger"].as_f64() {
                                record.payload["hunger"] = json!((h + 0.001 * tick as f64).min(1.0));
                            }
                        }
                    }
                }
            })?;

            println!(
                "fork ran {}/{} ticks, crashed: {}",
                report.elapsed_ticks, report.requested_ticks, report.crashed
            );
            println!(
                "diff: {} spawned, {} despawned, {} modified",
                report.diff.spawned.len(),
                report.diff.despawned.len(),
                report.diff.modified.len()
            );
            println!("violations: {}", report.violations.len());
            for violation in &report.violations {
                println!("  [{:?}] {}", violation.severity, violation.message);
            }
            match &report.verdict {
                MergeVerdict::Clean => println!("mergeable: yes"),
                MergeVerdict::Conflicted(conflicts) => {
                    println!("mergeable: no ({} conflicts)", conflicts.len());
                    for conflict in conflicts {
                        println!("  {:?} {:?}: {}", conflict.entity, conflict.component, conflict.detail);
                    }
                }
            }
        }
        Commands::Save {
            key,
            backend,
            path,
            config,
        } => {
            let registry = demo_registry()?;
            let mut mv = match config {
                Some(config_path) => {
                    let text = std::fs::read_to_string(&config_path)
                        .with_context(|| format!("reading {}", config_path.display()))?;
                    let universe_config: UniverseConfig =
                        serde_yaml::from_str(&text).context("parsing universe config")?;
                    let mut mv = Multiverse::new(MultiverseConfig::default());
                    mv.create_universe(universe_config)?;
                    mv
                }
                None => demo_multiverse()?,
            };
            mv.advance(5.0)?;

            let mut backend = open_backend(backend, &path)?;
            let header = SaveHeader {
                created_at: now_unix(),
                last_saved_at: now_unix(),
                ..SaveHeader::named(&key)
            };
            save_to_backend(backend.as_mut(), &key, &mv, &registry, header)?;
            let info = backend.storage_info()?;
            println!("saved {key}: {} bytes used", info.used_bytes);
        }
        Commands::Load { key, backend, path } => {
            let registry = demo_registry()?;
            let backend = open_backend(backend, &path)?;
            let Some((mv, header)) = load_from_backend(backend.as_ref(), &key, &registry)? else {
                println!("no save under key {key:?}");
                return Ok(());
            };
            println!(
                "{}: produced by v{}, global tick {}",
                header.name,
                header.producer_version,
                mv.global_tick()
            );
            for (id, universe) in mv.universes() {
                println!(
                    "  {} ({}) tick={} day={} entities={}",
                    id,
                    universe.config().label,
                    universe.tick_at(mv.global_tick()),
                    universe.day_at(mv.global_tick()),
                    universe.entity_count()
                );
            }
        }
        Commands::Saves { backend, path } => {
            let backend = open_backend(backend, &path)?;
            let entries = backend.list()?;
            if entries.is_empty() {
                println!("no saves");
            }
            for meta in entries {
                println!(
                    "{}  saved_at={}  {} bytes",
                    meta.key, meta.last_saved_at, meta.size_bytes
                );
            }
        }
        Commands::Verify { key, backend, path } => {
            let registry = Arc::new(demo_registry()?);
            let backend = open_backend(backend, &path)?;
            let Some((mv, _)) = load_from_backend(backend.as_ref(), &key, &registry)? else {
                anyhow::bail!("no save under key {key:?}");
            };
            let mut checker = InvariantChecker::with_builtin_checks();
            checker.register(Box::new(RegisteredSchemas::new(Arc::clone(&registry))));

            let mut total = 0;
            for (id, universe) in mv.universes() {
                let violations = checker.check_universe(universe);
                total += violations.len();
                println!("{id}: {} violations", violations.len());
                for violation in violations {
                    println!("  [{:?}] {}", violation.severity, violation.message);
                }
            }
            if total > 0 {
                anyhow::bail!("{total} invariant violations found");
            }
            println!("all invariants hold");
        }
    }

    Ok(())
}

fn open_backend(kind: BackendKind, path: &std::path::Path) -> anyhow::Result<Box<dyn StorageBackend>> {
    Ok(match kind {
        BackendKind::Dir => Box::new(DirStore::open(path)?),
        BackendKind::Kv => Box::new(KvStore::open(path.join("saves.kv.cbor"))?),
    })
}

/// Demo data-kinds: a `person` with a v0 -> v1 history and simple `needs`.
fn demo_registry() -> anyhow::Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register(
        "person",
        0,
        Schema::new(|payload| {
            require_number("person", 0, payload, "age")?;
            Ok(())
        }),
    )?;
    registry.register(
        "person",
        1,
        Schema::new(|payload| {
            require_number("person", 1, payload, "age")?;
            require_number("person", 1, payload, "generation")?;
            Ok(())
        }),
    )?;
    registry.register_migration("person", 0, 1, "add generation, default 0", |old, _| {
        let mut next = old.clone();
        next["generation"] = json!(0);
        Ok(TransformOutput::Replaced(next))
    })?;
    registry.register(
        "needs",
        0,
        Schema::new(|payload| {
            require_number("needs", 0, payload, "hunger")?;
            Ok(())
        }),
    )?;
    Ok(registry)
}

fn demo_multiverse() -> anyhow::Result<Multiverse> {
    let mut mv = Multiverse::new(MultiverseConfig::default());
    let prime = mv.create_universe(UniverseConfig::named("prime"))?;
    let universe = mv
        .universe_mut(&prime)
        .context("freshly created universe is missing")?;
    for i in 0..5 {
        let id = universe.spawn(Vec3::new(i as f32 * 2.0, 0.0, 0.0));
        if let Some(entity) = universe.entity_mut(id) {
            entity.set_component("person", 1, json!({"age": 20 + i, "generation": 0}));
            entity.set_component("needs", 0, json!({"hunger": 0.2}));
        }
    }
    universe.set_world_state(json!({"weather": "clear", "season": "spring"}));
    Ok(mv)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
