//! Phase controller
//!
//! The engine drives one property through its phases:
//!
//! ```text
//! REUSE → GENERATE → SHRINK → DONE
//! ```
//!
//! REUSE replays every database entry for the test, deleting entries that no
//! longer reproduce; an entry that is still interesting becomes the shrink
//! target and GENERATE is skipped. GENERATE searches for new candidates
//! until enough distinct valid examples have been seen, the candidate budget
//! or deadline runs out, or something interesting turns up. SHRINK minimizes
//! each distinct bug independently, persists the minimized sequences, and
//! reports the failures. A phase is never re-entered.
//!
//! Budgets hold in every phase: the hard run deadline is checked between
//! candidates (never inside the user predicate), `max_examples` counts
//! distinct VALID sequences only, and every candidate (duplicate or not)
//! counts against the iteration budget.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::{BugKey, DataSource, Status, StatusKind, TestResult};
use crate::database::{open_database, DatabaseKey, ExampleDatabase};
use crate::generator::{Feedback, ParameterPool};
use crate::health::{self, HealthCheckFailed};
use crate::report::{encode_blob, Failure, Reporter, RunStats, TracingReporter};
use crate::runner::{CaseAbort, Property, TestFunction};
use crate::settings::{Phase, Settings};
use crate::shrink::{ShrinkFailure, ShrinkHost, ShrinkStop, Shrinker};
use crate::strategy::{InvalidArgument, Strategy};
use crate::tracker::{PrefixTree, SeenSet};

// ============================================================================
// Errors and reports
// ============================================================================

/// Engine-facing failure taxonomy. Everything here aborts the test with an
/// *error*; an ordinary counterexample is a [`RunReport`] with failures (or
/// [`EngineError::Falsified`] through [`check`]).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A strategy factory was misused; surfaced before any generation.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    /// Generation produced no valid examples at all.
    #[error("unable to satisfy assumptions: {attempts} candidates produced no valid example")]
    Unsatisfiable {
        /// Candidates attempted before giving up.
        attempts: u64,
    },
    /// A health check fired.
    #[error(transparent)]
    HealthCheck(#[from] HealthCheckFailed),
    /// An interesting sequence stopped reproducing on re-evaluation.
    #[error("flaky test: `{expected}` re-evaluated as {reparsed:?}; not shrinking further")]
    Flaky {
        /// The bug observed first.
        expected: BugKey,
        /// What the exact same bytes produced the second time.
        reparsed: Status,
    },
    /// The host framework skipped the test from inside the predicate.
    #[error("test skipped: {reason}")]
    Skipped {
        /// Why.
        reason: String,
    },
    /// The property does not hold.
    #[error("property falsified: {} distinct bug(s)", .0.len())]
    Falsified(Vec<Failure>),
}

/// Outcome of a completed (non-aborted) run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Minimized failures, one per bug key, in key order. Empty means the
    /// property held.
    pub failures: Vec<Failure>,
    /// Aggregate statistics.
    pub stats: RunStats,
}

/// Internal control flow: the current phase must stop.
enum Stop {
    Skipped(String),
    Deadline,
}

// ============================================================================
// Engine
// ============================================================================

/// One engine instance drives one run of one property.
pub struct Engine {
    settings: Settings,
    database: Option<Box<dyn ExampleDatabase>>,
    rng: ChaCha8Rng,
    seen: SeenSet,
    tree: PrefixTree,
    pool: ParameterPool,
    stats: RunStats,
    best: BTreeMap<BugKey, TestResult>,
    deadline_at: Option<Instant>,
    test_id: String,
}

impl Engine {
    /// Engine configured by `settings`, opening the configured database
    /// (unless seeding disables it).
    pub fn new(settings: Settings) -> Engine {
        let database =
            if settings.database_disabled() { None } else { open_database(&settings.database) };
        Engine {
            settings,
            database,
            rng: ChaCha8Rng::seed_from_u64(0),
            seen: SeenSet::new(),
            tree: PrefixTree::new(),
            pool: ParameterPool::new(),
            stats: RunStats::default(),
            best: BTreeMap::new(),
            deadline_at: None,
            test_id: String::new(),
        }
    }

    /// Replace the database (for sharing one across runs, or injecting a
    /// test double). Ignored when settings disable persistence.
    pub fn with_database(mut self, database: Box<dyn ExampleDatabase>) -> Engine {
        if !self.settings.database_disabled() {
            self.database = Some(database);
        }
        self
    }

    fn seed_for(&self, test_id: &str) -> u64 {
        if let Some(seed) = self.settings.seed {
            return seed;
        }
        if self.settings.derandomize {
            let digest = blake3::hash(test_id.as_bytes());
            return u64::from_be_bytes(digest.as_bytes()[..8].try_into().expect("32-byte digest"));
        }
        rand::random()
    }

    fn deadline_exceeded(&self) -> bool {
        self.deadline_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Run the property to completion.
    pub fn run(
        &mut self,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport, EngineError> {
        test.validate()?;
        self.test_id = test.test_id().to_string();
        reporter.on_start(&self.test_id);
        if self.settings.seed.is_some() {
            tracing::warn!(
                test = %self.test_id,
                "fixed seed set: database reuse and persistence are disabled for this run"
            );
        }
        let seed = self.seed_for(&self.test_id.clone());
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.deadline_at = self.settings.run_deadline().map(|d| Instant::now() + d);

        // Explicit examples run before any engine phase and short-circuit.
        match test.run_explicit() {
            Ok(None) => {}
            Ok(Some(failure)) => {
                reporter.on_failure(&failure);
                reporter.on_statistics(&self.stats);
                return Ok(RunReport {
                    failures: vec![failure],
                    stats: std::mem::take(&mut self.stats),
                });
            }
            Err(CaseAbort::Skipped { reason }) => return Err(EngineError::Skipped { reason }),
        }

        self.run_phases(test, reporter)?;

        let failures: Vec<Failure> = self
            .best
            .iter()
            .map(|(key, result)| Failure {
                bug_key: key.clone(),
                minimal: result.bytes.clone(),
                repr: result.repr.clone(),
                blob: self.settings.print_blob.then(|| encode_blob(&result.bytes)),
            })
            .collect();
        for failure in &failures {
            reporter.on_failure(failure);
        }
        reporter.on_statistics(&self.stats);
        Ok(RunReport { failures, stats: std::mem::take(&mut self.stats) })
    }

    fn run_phases(
        &mut self,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EngineError> {
        if self.settings.phases.contains(&Phase::Reuse) {
            self.reuse(test, reporter)?;
        }
        if self.settings.phases.contains(&Phase::Generate) && self.best.is_empty() {
            self.generate(test, reporter)?;
        }
        if self.settings.phases.contains(&Phase::Shrink) && !self.best.is_empty() {
            self.shrink(test, reporter)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidate evaluation
    // ------------------------------------------------------------------

    /// Run one candidate to completion and fold it into every ledger: seen
    /// set, prefix tree, statistics, best-per-bug map, database.
    fn evaluate(
        &mut self,
        mut source: DataSource,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
        count_duplicates: bool,
    ) -> Result<(TestResult, bool), Stop> {
        // The hard deadline fires between candidates, never inside one.
        if self.deadline_exceeded() {
            return Err(Stop::Deadline);
        }
        let case = match test.run_case(&mut source) {
            Ok(case) => case,
            Err(CaseAbort::Skipped { reason }) => return Err(Stop::Skipped(reason)),
        };
        let mut result = source.into_result(case.status);
        result.repr = case.repr;

        self.stats.attempts += 1;
        self.stats.drawn_bytes += result.bytes.len() as u64;
        self.stats.generation_time += case.draw_time;
        self.stats.test_time += result.runtime.saturating_sub(case.draw_time);
        self.stats.returned_value |= case.returned_value;
        if let Some(deadline) = self.settings.example_deadline() {
            if result.runtime > deadline {
                self.stats.slow_examples += 1;
            }
        }
        self.stats.record_events(&result.events);

        let novel = self.seen.insert(&result.bytes);
        if !novel && count_duplicates {
            self.stats.duplicates += 1;
        }
        // Overruns are byte-starved prefixes; extensions of them are still
        // worth exploring, so they stay out of the tree.
        if result.status.kind() != StatusKind::Overrun {
            self.tree.record(&result.bytes, result.status.kind());
        }

        reporter.on_example_drawn(&result.bytes, &result.spans, result.repr.as_deref());

        match &result.status {
            Status::Valid if novel => self.stats.valid += 1,
            Status::Valid => {}
            Status::Invalid => self.stats.invalid += 1,
            Status::Overrun => self.stats.overrun += 1,
            Status::Interesting(key) => {
                self.stats.interesting += 1;
                if self.stats.base_example_len.is_none() {
                    self.stats.base_example_len = Some(result.bytes.len());
                }
                let old = self.best.get(key);
                let replace = old.map_or(true, |current| result < *current);
                if replace {
                    if let Some(db) = &self.database {
                        let db_key =
                            DatabaseKey { test_id: self.test_id.clone(), bug_key: key.clone() };
                        if let Some(old) = old {
                            db.delete(&db_key, &old.bytes);
                        }
                        db.save(&db_key, &result.bytes);
                    }
                    self.best.insert(key.clone(), result.clone());
                }
            }
        }
        Ok((result, novel))
    }

    // ------------------------------------------------------------------
    // REUSE
    // ------------------------------------------------------------------

    fn reuse(
        &mut self,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EngineError> {
        let entries = match &self.database {
            Some(db) => db.fetch_test(&self.test_id),
            None => return Ok(()),
        };
        for bytes in entries {
            if self.deadline_exceeded() {
                break;
            }
            let source = DataSource::from_recorded(bytes.clone());
            let (result, _novel) = match self.evaluate(source, test, reporter, false) {
                Ok(out) => out,
                Err(Stop::Skipped(reason)) => return Err(EngineError::Skipped { reason }),
                Err(Stop::Deadline) => break,
            };
            // Entries that replay as anything but interesting are stale, as
            // are entries whose consumed prefix no longer matches what was
            // stored (the strategy has changed shape underneath them).
            let keep = result.status.is_interesting() && result.bytes == bytes;
            if !keep {
                if let Some(db) = &self.database {
                    db.delete_for_test(&self.test_id, &bytes);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // GENERATE
    // ------------------------------------------------------------------

    fn generate(
        &mut self,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EngineError> {
        let budget = u64::from(self.settings.iteration_budget());
        let target_valid = u64::from(self.settings.max_examples);
        let start_attempts = self.stats.attempts;

        while self.stats.valid < target_valid && self.stats.attempts - start_attempts < budget {
            if self.deadline_exceeded() {
                break;
            }
            let prefix = match self.tree.novel_prefix(&mut self.rng) {
                Some(prefix) => prefix,
                // The whole decision space is explored; nothing novel left.
                None => break,
            };
            let (param, bias) = self.pool.select(&mut self.rng);
            let tail_rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
            let mut source = DataSource::with_prefix(prefix, tail_rng);
            source.set_bias(bias);

            let (result, novel) = match self.evaluate(source, test, reporter, true) {
                Ok(out) => out,
                Err(Stop::Skipped(reason)) => return Err(EngineError::Skipped { reason }),
                Err(Stop::Deadline) => break,
            };
            let feedback = match result.status.kind() {
                StatusKind::Valid | StatusKind::Interesting if novel => Feedback::NovelValid,
                StatusKind::Valid | StatusKind::Interesting => Feedback::Duplicate,
                StatusKind::Invalid | StatusKind::Overrun => Feedback::Wasted,
            };
            self.pool.feedback(param, feedback);

            if result.status.is_interesting() {
                break;
            }
        }

        if self.best.is_empty() {
            health::evaluate(&self.stats, &self.settings.suppress_health_check)?;
            if self.stats.valid == 0 && self.stats.attempts > start_attempts {
                return Err(EngineError::Unsatisfiable { attempts: self.stats.attempts });
            }
        } else {
            // With a counterexample in hand only the checks about the
            // counterexample itself still apply; aborting over filter or
            // speed trouble would discard a real failure.
            let mut suppressed = self.settings.suppress_health_check.clone();
            suppressed.insert(crate::health::HealthCheck::FilterTooMuch);
            suppressed.insert(crate::health::HealthCheck::TooSlow);
            suppressed.insert(crate::health::HealthCheck::DataTooLarge);
            health::evaluate(&self.stats, &suppressed)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // SHRINK
    // ------------------------------------------------------------------

    fn shrink(
        &mut self,
        test: &mut dyn TestFunction,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EngineError> {
        let keys: Vec<BugKey> = self.best.keys().cloned().collect();
        for key in keys {
            let target = self.best[&key].clone();
            let shrink_rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
            let outcome = {
                let mut host =
                    EngineHost { engine: &mut *self, test: &mut *test, reporter: &mut *reporter };
                Shrinker::new(&mut host, target.clone(), key.clone(), shrink_rng).run()
            };
            match outcome {
                Ok(report) => {
                    // Persistence already happened as each admissible shrink
                    // replaced the best entry; just pin the final target.
                    self.best.insert(key, report.minimized);
                }
                Err(ShrinkFailure::Flaky { expected, reparsed }) => {
                    return Err(EngineError::Flaky { expected, reparsed });
                }
                Err(ShrinkFailure::Stopped(ShrinkStop::Skipped { reason })) => {
                    return Err(EngineError::Skipped { reason });
                }
                // Out of time: keep the unshrunk (or partially shrunk via
                // the database) target and move on.
                Err(ShrinkFailure::Stopped(ShrinkStop::Deadline)) => {}
            }
        }
        Ok(())
    }
}

/// Adapter giving the shrinker access to engine evaluation.
struct EngineHost<'a> {
    engine: &'a mut Engine,
    test: &'a mut dyn TestFunction,
    reporter: &'a mut dyn Reporter,
}

impl ShrinkHost for EngineHost<'_> {
    fn reparse(&mut self, bytes: &[u8]) -> Result<TestResult, ShrinkStop> {
        let source = DataSource::from_recorded(bytes.to_vec());
        match self.engine.evaluate(source, self.test, self.reporter, false) {
            Ok((result, _)) => Ok(result),
            Err(Stop::Skipped(reason)) => Err(ShrinkStop::Skipped { reason }),
            Err(Stop::Deadline) => Err(ShrinkStop::Deadline),
        }
    }

    fn try_bytes(&mut self, bytes: &[u8]) -> Result<Option<TestResult>, ShrinkStop> {
        // Dedup on the proposed bytes: a candidate evaluated once is never
        // handed to the predicate again.
        if !self.engine.seen.insert(bytes) {
            return Ok(None);
        }
        if self.engine.tree.is_dead(bytes) {
            return Ok(None);
        }
        let source = DataSource::from_recorded(bytes.to_vec());
        match self.engine.evaluate(source, self.test, self.reporter, false) {
            Ok((result, _)) => Ok(Some(result)),
            Err(Stop::Skipped(reason)) => Err(ShrinkStop::Skipped { reason }),
            Err(Stop::Deadline) => Err(ShrinkStop::Deadline),
        }
    }

    fn notify_shrink(&mut self, from_len: usize, to_len: usize) {
        self.engine.stats.shrinks += 1;
        self.reporter.on_shrink(from_len, to_len);
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Run a property under `settings`: explicit examples, then the engine
/// phases. `Ok(())` means the property held; counterexamples surface as
/// [`EngineError::Falsified`] carrying the minimized failures.
pub fn check<S, F>(settings: Settings, mut property: Property<S, F>) -> Result<(), EngineError>
where
    S: Strategy,
    S::Value: Debug,
    F: FnMut(&S::Value) -> crate::runner::CaseResult,
{
    let mut reporter = TracingReporter::new(settings.verbosity);
    let mut engine = Engine::new(settings);
    let report = engine.run(&mut property, &mut reporter)?;
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Falsified(report.failures))
    }
}

// ============================================================================
// Tests
// ============================================================================
