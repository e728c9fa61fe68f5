//! Run configuration
//!
//! [`Settings`] collects everything an embedding framework can tune about a
//! run: budgets, deadlines, phases, database selection, seeding, health-check
//! suppression, and verbosity. All fields are public and the struct is plain
//! data with serde support; named profiles live in a process-wide registry so
//! frameworks can define e.g. `ci` and `dev` once and select by name.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::HealthCheck;

/// Default number of distinct VALID examples GENERATE aims for.
pub const DEFAULT_MAX_EXAMPLES: u32 = 100;

/// Default multiplier from `max_examples` to the total candidate budget.
const ITERATION_MULTIPLIER: u32 = 10;

/// An engine phase. The controller runs enabled phases in declaration order
/// and never revisits one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Replay database entries for this test.
    Reuse,
    /// Search for new failing candidates.
    Generate,
    /// Minimize any failures found.
    Shrink,
}

impl Phase {
    /// All phases, in controller order.
    pub fn all() -> BTreeSet<Phase> {
        [Phase::Reuse, Phase::Generate, Phase::Shrink].into()
    }
}

/// How chatty the reporter should be.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Failures only.
    Quiet,
    /// Failures plus a run summary.
    #[default]
    Normal,
    /// Every drawn example and accepted shrink.
    Verbose,
    /// Everything, including the structured statistics dump.
    Debug,
}

/// Which example database a run uses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// `.conject-db` under the current directory, falling back to memory if
    /// unwritable.
    #[default]
    Default,
    /// A specific directory.
    Directory(PathBuf),
    /// Process-local only; nothing persists.
    InMemory,
    /// No database at all: REUSE is a no-op and failures are not persisted.
    Disabled,
}

/// Configuration for one property run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Target count of distinct VALID examples in GENERATE.
    pub max_examples: u32,
    /// Upper bound on total candidates attempted (duplicates, rejections and
    /// overruns included). Clamped to at least `max_examples`.
    pub max_iterations: u32,
    /// Per-example soft deadline in milliseconds. A candidate exceeding it
    /// still completes; it only feeds the `too_slow` health check. The
    /// total-run hard timeout is derived from this.
    pub deadline_ms: Option<u64>,
    /// Which database backs REUSE and failure persistence.
    pub database: DatabaseConfig,
    /// Enabled phases.
    pub phases: BTreeSet<Phase>,
    /// Fixed seed. Setting this disables all database I/O for the run so
    /// reproduction is exact.
    pub seed: Option<u64>,
    /// Derive the seed deterministically from the test identity.
    pub derandomize: bool,
    /// Health checks to skip.
    pub suppress_health_check: BTreeSet<HealthCheck>,
    /// Reporter verbosity.
    pub verbosity: Verbosity,
    /// Emit a base64 blob of the minimized sequence with each failure.
    pub print_blob: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            max_examples: DEFAULT_MAX_EXAMPLES,
            max_iterations: DEFAULT_MAX_EXAMPLES * ITERATION_MULTIPLIER,
            deadline_ms: None,
            database: DatabaseConfig::Default,
            phases: Phase::all(),
            seed: None,
            derandomize: false,
            suppress_health_check: BTreeSet::new(),
            verbosity: Verbosity::Normal,
            print_blob: false,
        }
    }
}

impl Settings {
    /// Effective candidate budget: `max_iterations`, but never below
    /// `max_examples`.
    pub fn iteration_budget(&self) -> u32 {
        self.max_iterations.max(self.max_examples)
    }

    /// Per-example soft deadline.
    pub fn example_deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Hard wall-clock budget for the whole run, derived from the
    /// per-example deadline: enough for every candidate in the budget to be
    /// merely slow, rather than pathological.
    pub fn run_deadline(&self) -> Option<Duration> {
        self.example_deadline()
            .map(|d| d.saturating_mul(self.iteration_budget().max(1)))
    }

    /// True when database I/O is disabled, either explicitly or because a
    /// fixed seed was requested.
    pub fn database_disabled(&self) -> bool {
        self.seed.is_some() || self.database == DatabaseConfig::Disabled
    }

    /// Register (or replace) a named profile.
    pub fn register_profile(name: &str, settings: Settings) {
        profiles()
            .lock()
            .expect("profile registry poisoned")
            .insert(name.to_string(), settings);
    }

    /// Fetch a copy of a named profile.
    pub fn from_profile(name: &str) -> Option<Settings> {
        profiles().lock().expect("profile registry poisoned").get(name).cloned()
    }
}

fn profiles() -> &'static Mutex<HashMap<String, Settings>> {
    static PROFILES: OnceLock<Mutex<HashMap<String, Settings>>> = OnceLock::new();
    PROFILES.get_or_init(|| Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.max_examples, 100);
        assert_eq!(s.max_iterations, 1000);
        assert_eq!(s.phases, Phase::all());
        assert!(!s.database_disabled());
        assert!(s.run_deadline().is_none());
    }

    #[test]
    fn iteration_budget_never_undercuts_max_examples() {
        let s = Settings { max_examples: 500, max_iterations: 10, ..Settings::default() };
        assert_eq!(s.iteration_budget(), 500);
    }

    #[test]
    fn fixed_seed_disables_database_io() {
        let s = Settings { seed: Some(42), ..Settings::default() };
        assert!(s.database_disabled());
    }

    #[test]
    fn run_deadline_scales_with_budget() {
        let s = Settings {
            deadline_ms: Some(10),
            max_examples: 5,
            max_iterations: 50,
            ..Settings::default()
        };
        assert_eq!(s.run_deadline(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn profiles_round_trip() {
        let ci = Settings { max_examples: 1000, ..Settings::default() };
        Settings::register_profile("settings-test-ci", ci);
        let got = Settings::from_profile("settings-test-ci").unwrap();
        assert_eq!(got.max_examples, 1000);
        assert!(Settings::from_profile("settings-test-absent").is_none());
    }

    #[test]
    fn settings_serialize_round_trip() {
        let s = Settings {
            deadline_ms: Some(250),
            database: DatabaseConfig::InMemory,
            verbosity: Verbosity::Verbose,
            suppress_health_check: [HealthCheck::FilterTooMuch].into(),
            ..Settings::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.deadline_ms, Some(250));
        assert_eq!(back.database, DatabaseConfig::InMemory);
        assert!(back.suppress_health_check.contains(&HealthCheck::FilterTooMuch));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let back: Settings = serde_json::from_str(r#"{"max_examples": 7}"#).unwrap();
        assert_eq!(back.max_examples, 7);
        assert_eq!(back.max_iterations, 1000);
    }
}
