use crate::invariant::{InvariantChecker, Violation};
use crate::multiverse::{MergeVerdict, Multiverse, MultiverseError, StateDiff};
use crate::universe::Universe;
use chronoverse_common::UniverseId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything learned from running a fork unattended for a batch of ticks.
///
/// This value is the only channel between a fork's execution context and the
/// coordinator; no mutable state is shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkReport {
    pub fork: UniverseId,
    pub requested_ticks: u64,
    pub elapsed_ticks: u64,
    pub crashed: bool,
    pub crash_message: Option<String>,
    pub violations: Vec<Violation>,
    pub diff: StateDiff,
    pub verdict: MergeVerdict,
}

impl ForkReport {
    /// A fork is worth considering for merge only if it survived, stayed
    /// within invariants, and previews clean.
    pub fn is_healthy(&self) -> bool {
        !self.crashed && self.violations.is_empty() && self.verdict == MergeVerdict::Clean
    }
}

impl Multiverse {
    /// Run a fork's simulation for up to `ticks` steps on an isolated thread.
    ///
    /// The step closure drives the owning simulation's per-tick logic; this
    /// layer only copies state in, counts completed steps, and copies state
    /// back out. A panic inside the step closure is contained: the stored
    /// fork keeps its pre-run state and the report comes back `crashed`.
    pub fn run_fork<F>(
        &mut self,
        fork_id: &UniverseId,
        ticks: u64,
        checker: &InvariantChecker,
        step: F,
    ) -> Result<ForkReport, MultiverseError>
    where
        F: FnMut(&mut Universe, u64) + Send,
    {
        let _span = tracing::info_span!("run_fork", fork = %fork_id, ticks).entered();
        // Must be a registered fork; the diff and verdict need its base.
        if self.fork_base(fork_id).is_none() {
            return Err(MultiverseError::NotAFork(fork_id.clone()));
        }
        let staged = self
            .universe(fork_id)
            .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?
            .clone();

        let completed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&completed);
        let outcome: Result<Universe, String> = std::thread::scope(|scope| {
            let handle = scope.spawn(move || {
                let mut universe = staged;
                let mut step = step;
                for tick in 0..ticks {
                    step(&mut universe, tick);
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                universe
            });
            handle.join().map_err(|payload| panic_message(payload.as_ref()))
        });
        let elapsed_ticks = completed.load(Ordering::Relaxed);

        match outcome {
            Ok(evolved) => {
                let stored = self
                    .universe_mut(fork_id)
                    .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?;
                stored.replace_state(evolved.snapshot_state());
                let violations = checker.check_universe(
                    self.universe(fork_id)
                        .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?,
                );
                let diff = self.diff_from_fork_point(fork_id)?;
                let verdict = self.merge_preview(fork_id)?;
                tracing::info!(
                    elapsed_ticks,
                    violations = violations.len(),
                    "fork run complete"
                );
                Ok(ForkReport {
                    fork: fork_id.clone(),
                    requested_ticks: ticks,
                    elapsed_ticks,
                    crashed: false,
                    crash_message: None,
                    violations,
                    diff,
                    verdict,
                })
            }
            Err(message) => {
                // The stored fork was never touched; report against it as-is.
                let violations = checker.check_universe(
                    self.universe(fork_id)
                        .ok_or_else(|| MultiverseError::UniverseNotFound(fork_id.clone()))?,
                );
                let diff = self.diff_from_fork_point(fork_id)?;
                let verdict = self.merge_preview(fork_id)?;
                tracing::warn!(elapsed_ticks, %message, "fork crashed");
                Ok(ForkReport {
                    fork: fork_id.clone(),
                    requested_ticks: ticks,
                    elapsed_ticks,
                    crashed: true,
                    crash_message: Some(message),
                    violations,
                    diff,
                    verdict,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "fork panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForkConfig, MultiverseConfig, UniverseConfig};
    use glam::Vec3;
    use serde_json::json;

    fn forked_multiverse() -> (Multiverse, UniverseId, UniverseId) {
        let mut mv = Multiverse::new(MultiverseConfig::default());
        let a = mv.create_universe(UniverseConfig::named("a")).unwrap();
        mv.universe_mut(&a).unwrap().spawn(Vec3::ZERO);
        let b = mv
            .fork_universe(
                &a,
                ForkConfig {
                    rate: Some(8.0),
                    ..Default::default()
                },
            )
            .unwrap();
        (mv, a, b)
    }

    #[test]
    fn run_fork_reports_elapsed_and_diff() {
        let (mut mv, _a, b) = forked_multiverse();
        let checker = InvariantChecker::with_builtin_checks();

        let report = mv
            .run_fork(&b, 50, &checker, |universe, tick| {
                if tick == 10 {
                    universe.spawn(Vec3::ONE);
                }
            })
            .unwrap();

        assert!(!report.crashed);
        assert_eq!(report.elapsed_ticks, 50);
        assert_eq!(report.diff.spawned.len(), 1);
        assert!(report.violations.is_empty());
        assert_eq!(report.verdict, MergeVerdict::Clean);
        assert!(report.is_healthy());
        // The evolved state was written back.
        assert_eq!(mv.universe(&b).unwrap().entity_count(), 2);
    }

    #[test]
    fn crashed_fork_leaves_state_untouched() {
        let (mut mv, _a, b) = forked_multiverse();
        let checker = InvariantChecker::with_builtin_checks();
        let hash_before = mv.universe(&b).unwrap().state_hash();

        let report = mv
            .run_fork(&b, 100, &checker, |universe, tick| {
                universe.spawn(Vec3::ONE);
                if tick == 7 {
                    panic!("simulated rule explosion");
                }
            })
            .unwrap();

        assert!(report.crashed);
        assert_eq!(report.elapsed_ticks, 7);
        assert_eq!(
            report.crash_message.as_deref(),
            Some("simulated rule explosion")
        );
        assert!(!report.is_healthy());
        assert_eq!(mv.universe(&b).unwrap().state_hash(), hash_before);
    }

    #[test]
    fn violations_surface_in_the_report() {
        let (mut mv, _a, b) = forked_multiverse();
        let checker = InvariantChecker::with_builtin_checks();

        let report = mv
            .run_fork(&b, 1, &checker, |universe, _tick| {
                universe.spawn(Vec3::splat(f32::NAN));
            })
            .unwrap();

        assert!(!report.crashed);
        assert_eq!(report.violations.len(), 1);
        assert!(!report.is_healthy());
    }

    #[test]
    fn conflicting_parent_edit_turns_verdict() {
        let (mut mv, a, b) = forked_multiverse();
        let checker = InvariantChecker::with_builtin_checks();
        let shared = *mv.universe(&a).unwrap().entities().keys().next().unwrap();

        // Both sides write the same component differently.
        mv.universe_mut(&a)
            .unwrap()
            .entity_mut(shared)
            .unwrap()
            .set_component("needs", 0, json!({"hunger": 0.9}));

        let report = mv
            .run_fork(&b, 1, &checker, move |universe, _tick| {
                if let Some(entity) = universe.entity_mut(shared) {
                    entity.set_component("needs", 0, json!({"hunger": 0.1}));
                }
            })
            .unwrap();

        match report.verdict {
            MergeVerdict::Conflicted(conflicts) => {
                assert_eq!(conflicts[0].component.as_deref(), Some("needs"));
            }
            MergeVerdict::Clean => panic!("expected a conflicted verdict"),
        }
    }

    #[test]
    fn run_fork_rejects_non_forks() {
        let (mut mv, a, _b) = forked_multiverse();
        let checker = InvariantChecker::with_builtin_checks();
        let result = mv.run_fork(&a, 10, &checker, |_universe, _tick| {});
        assert!(matches!(result, Err(MultiverseError::NotAFork(_))));
    }
}
