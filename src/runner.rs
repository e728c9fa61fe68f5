//! Property wrapper and test-case execution
//!
//! [`Property`] packages a strategy, a user predicate, and the hooks the
//! engine needs to run one candidate: the **executor** (a wrapper around
//! each invocation, for transactions or setup/teardown) and the **key
//! policy** (how a failure is bucketed into a [`BugKey`]).
//!
//! Classification of one invocation:
//!
//! - predicate returns `Ok(())`: VALID
//! - [`CaseError::Reject`]: INVALID
//! - [`CaseError::Fail`] or a panic: INTERESTING, keyed by the policy
//! - [`CaseError::Skip`]: the whole run aborts and the skip propagates
//! - [`CaseError::Returned`]: VALID, but flags the `return_value` health
//!   check (a returned value usually means a forgotten assertion)
//!
//! Panics are caught only around the user predicate. A panic inside a
//! strategy's `do_draw` is a strategy bug and propagates.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::data::{BugKey, DataSource, Halt, Status};
use crate::report::Failure;
use crate::strategy::{InvalidArgument, Strategy};

// ============================================================================
// Case results
// ============================================================================

/// Why a single invocation of the predicate did not pass.
#[derive(Clone, Debug)]
pub enum CaseError {
    /// The property does not hold for this input.
    Fail {
        /// What went wrong.
        message: String,
        /// `file:line` of the failing assertion, when captured.
        location: Option<String>,
    },
    /// This input does not satisfy the property's assumptions.
    Reject {
        /// Why the input was rejected.
        reason: String,
    },
    /// The host framework wants this whole test skipped.
    Skip {
        /// Why the test is being skipped.
        reason: String,
    },
    /// The wrapped function returned a value rather than asserting.
    Returned {
        /// Debug rendering of the returned value.
        repr: String,
    },
}

impl CaseError {
    /// Failure at the caller's location.
    #[track_caller]
    pub fn fail(message: impl Into<String>) -> CaseError {
        let loc = Location::caller();
        CaseError::Fail {
            message: message.into(),
            location: Some(format!("{}:{}", loc.file(), loc.line())),
        }
    }

    /// Reject this input (assumption failed).
    pub fn reject(reason: impl Into<String>) -> CaseError {
        CaseError::Reject { reason: reason.into() }
    }

    /// Skip the whole test.
    pub fn skip(reason: impl Into<String>) -> CaseError {
        CaseError::Skip { reason: reason.into() }
    }
}

/// Result of one predicate invocation.
pub type CaseResult = Result<(), CaseError>;

/// Early-return a [`CaseError::Reject`] when a test-case assumption fails.
#[macro_export]
macro_rules! assume {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::runner::CaseError::reject(concat!(
                "assumption failed: ",
                stringify!($cond)
            )));
        }
    };
}

// ============================================================================
// Executor hook and key policy
// ============================================================================

/// Wrapper around each predicate invocation. The default simply calls its
/// argument; frameworks substitute transaction scopes, subprocess forking,
/// or fixture setup/teardown.
pub type Executor = Arc<dyn Fn(&mut dyn FnMut() -> CaseResult) -> CaseResult>;

/// The executor used when none is configured.
pub fn default_executor() -> Executor {
    Arc::new(|call| call())
}

/// Everything the key policy may look at when bucketing a failure.
#[derive(Clone, Debug)]
pub struct FailureInfo {
    /// Coarse kind: `"assert"` for [`CaseError::Fail`], `"panic"` for an
    /// unwind.
    pub kind: String,
    /// The failure message.
    pub message: String,
    /// `file:line`, when captured.
    pub location: Option<String>,
}

/// Maps failure details to a bug key.
pub type KeyPolicy = fn(&FailureInfo) -> BugKey;

/// Default policy: kind plus location, falling back to the first message
/// line when no location was captured. Deliberately brittle in the same way
/// traceback-line bucketing is; replace it per-property if you need
/// something smarter.
pub fn default_key_policy(info: &FailureInfo) -> BugKey {
    let location = info
        .location
        .clone()
        .unwrap_or_else(|| info.message.lines().next().unwrap_or("<empty>").to_string());
    BugKey::new(info.kind.clone(), location)
}

// ============================================================================
// Test-function contract consumed by the engine
// ============================================================================

/// Everything the engine learns from one candidate.
#[derive(Clone, Debug)]
pub struct CaseRun {
    /// Classification of the evaluation.
    pub status: Status,
    /// Time spent drawing values (generation, not testing).
    pub draw_time: Duration,
    /// The predicate returned a value instead of asserting.
    pub returned_value: bool,
    /// Debug rendering of the drawn values.
    pub repr: Option<String>,
}

/// The run must stop entirely, outside the status taxonomy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseAbort {
    /// Host framework requested a skip.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// One runnable property, as the engine sees it.
pub trait TestFunction {
    /// Stable identity for database keys and reporting.
    fn test_id(&self) -> &str;
    /// Eagerly validate strategy arguments.
    fn validate(&self) -> Result<(), InvalidArgument>;
    /// Run the explicit examples, in definition order. Returns the first
    /// failure, rendered without a choice sequence.
    fn run_explicit(&mut self) -> Result<Option<Failure>, CaseAbort>;
    /// Evaluate one candidate against the given provider.
    fn run_case(&mut self, source: &mut DataSource) -> Result<CaseRun, CaseAbort>;
}

// ============================================================================
// Property
// ============================================================================

/// A strategy bound to a predicate, with hooks.
pub struct Property<S: Strategy, F> {
    test_id: String,
    strategy: S,
    predicate: F,
    executor: Executor,
    key_policy: KeyPolicy,
    examples: Vec<S::Value>,
}

impl<S, F> Property<S, F>
where
    S: Strategy,
    S::Value: Debug,
    F: FnMut(&S::Value) -> CaseResult,
{
    /// Bind `predicate` to `strategy` under the given test identity.
    pub fn new(test_id: impl Into<String>, strategy: S, predicate: F) -> Property<S, F> {
        Property {
            test_id: test_id.into(),
            strategy,
            predicate,
            executor: default_executor(),
            key_policy: default_key_policy,
            examples: Vec::new(),
        }
    }

    /// Add an explicit example evaluated before any generation.
    pub fn with_example(mut self, value: S::Value) -> Self {
        self.examples.push(value);
        self
    }

    /// Replace the executor hook.
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the bug-key policy.
    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    /// Invoke the predicate on one value through the executor, classifying
    /// the outcome. `Ok(None)` means the case passed.
    fn invoke(&mut self, value: &S::Value) -> Result<Invocation, CaseAbort> {
        let predicate = &mut self.predicate;
        let executor = Arc::clone(&self.executor);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut call = || predicate(value);
            executor(&mut call)
        }));
        match outcome {
            Ok(Ok(())) => Ok(Invocation::Pass { returned: false }),
            Ok(Err(CaseError::Returned { .. })) => Ok(Invocation::Pass { returned: true }),
            Ok(Err(CaseError::Reject { reason })) => Ok(Invocation::Reject { reason }),
            Ok(Err(CaseError::Skip { reason })) => Err(CaseAbort::Skipped { reason }),
            Ok(Err(CaseError::Fail { message, location })) => {
                let info = FailureInfo { kind: "assert".into(), message, location };
                Ok(Invocation::Fail { key: (self.key_policy)(&info), info })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let info = FailureInfo { kind: "panic".into(), message, location: None };
                Ok(Invocation::Fail { key: (self.key_policy)(&info), info })
            }
        }
    }
}

enum Invocation {
    Pass { returned: bool },
    Reject { reason: String },
    Fail { key: BugKey, info: FailureInfo },
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

impl<S, F> TestFunction for Property<S, F>
where
    S: Strategy,
    S::Value: Debug,
    F: FnMut(&S::Value) -> CaseResult,
{
    fn test_id(&self) -> &str {
        &self.test_id
    }

    fn validate(&self) -> Result<(), InvalidArgument> {
        self.strategy.validate()
    }

    fn run_explicit(&mut self) -> Result<Option<Failure>, CaseAbort> {
        let examples = std::mem::take(&mut self.examples);
        for value in &examples {
            if let Invocation::Fail { key, info } = self.invoke(value)? {
                tracing::debug!(bug = %key, message = %info.message, "explicit example failed");
                let failure = Failure {
                    bug_key: key,
                    minimal: Vec::new(),
                    repr: Some(format!("{value:?}")),
                    blob: None,
                };
                self.examples = examples;
                return Ok(Some(failure));
            }
        }
        self.examples = examples;
        Ok(None)
    }

    fn run_case(&mut self, source: &mut DataSource) -> Result<CaseRun, CaseAbort> {
        let draw_started = Instant::now();
        let drawn = self.strategy.do_draw(source);
        let draw_time = draw_started.elapsed();

        let value = match drawn {
            Ok(value) => value,
            Err(Halt::Overrun) => {
                return Ok(CaseRun {
                    status: Status::Overrun,
                    draw_time,
                    returned_value: false,
                    repr: None,
                })
            }
            Err(Halt::Reject) => {
                return Ok(CaseRun {
                    status: Status::Invalid,
                    draw_time,
                    returned_value: false,
                    repr: None,
                })
            }
        };
        let repr = Some(format!("{value:?}"));

        let (status, returned_value) = match self.invoke(&value)? {
            Invocation::Pass { returned } => (Status::Valid, returned),
            Invocation::Reject { reason } => {
                source.event(format!("reject: {reason}"));
                (Status::Invalid, false)
            }
            Invocation::Fail { key, .. } => (Status::Interesting(key), false),
        };
        Ok(CaseRun { status, draw_time, returned_value, repr })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StatusKind;
    use crate::strategy::{integers, Strategy};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn source(seed: u64) -> DataSource {
        DataSource::from_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    fn run_once<S, F>(property: &mut Property<S, F>, seed: u64) -> CaseRun
    where
        S: Strategy,
        S::Value: Debug,
        F: FnMut(&S::Value) -> CaseResult,
    {
        let mut src = source(seed);
        property.run_case(&mut src).expect("no skip requested")
    }

    #[test]
    fn passing_predicate_is_valid() {
        let mut p = Property::new("t", integers(0..=10), |_| Ok(()));
        assert_eq!(run_once(&mut p, 0).status, Status::Valid);
    }

    #[test]
    fn explicit_failure_is_interesting_with_assert_kind() {
        let mut p =
            Property::new("t", integers(0..=10), |_| Err(CaseError::fail("nope")));
        let run = run_once(&mut p, 0);
        let key = run.status.bug_key().expect("should be interesting").clone();
        assert_eq!(key.kind, "assert");
        assert!(key.location.contains("runner.rs"), "location was {}", key.location);
    }

    #[test]
    fn panic_is_interesting_with_panic_kind() {
        let mut p = Property::new("t", integers(0..=10), |_: &i64| -> CaseResult {
            panic!("boom: something broke")
        });
        let run = run_once(&mut p, 0);
        let key = run.status.bug_key().expect("should be interesting").clone();
        assert_eq!(key.kind, "panic");
        assert_eq!(key.location, "boom: something broke");
    }

    #[test]
    fn rejection_is_invalid_and_records_an_event() {
        let mut p = Property::new("t", integers(0..=10), |_| {
            Err(CaseError::reject("not this one"))
        });
        let mut src = source(0);
        let run = p.run_case(&mut src).unwrap();
        assert_eq!(run.status, Status::Invalid);
        let result = src.into_result(run.status);
        assert!(result.events.iter().any(|e| e.contains("not this one")));
    }

    #[test]
    fn skip_aborts_instead_of_classifying() {
        let mut p =
            Property::new("t", integers(0..=10), |_| Err(CaseError::skip("missing fixture")));
        let mut src = source(0);
        let abort = p.run_case(&mut src).unwrap_err();
        assert_eq!(abort, CaseAbort::Skipped { reason: "missing fixture".into() });
    }

    #[test]
    fn returned_value_passes_but_is_flagged() {
        let mut p = Property::new("t", integers(0..=10), |_| {
            Err(CaseError::Returned { repr: "true".into() })
        });
        let run = run_once(&mut p, 0);
        assert_eq!(run.status, Status::Valid);
        assert!(run.returned_value);
    }

    #[test]
    fn overrun_during_draw_classifies_without_calling_predicate() {
        let mut called = false;
        let mut p = Property::new("t", integers(0..=1000), |_| {
            called = true;
            Ok(())
        });
        let mut src = DataSource::from_recorded(vec![]);
        let run = p.run_case(&mut src).unwrap();
        assert_eq!(run.status.kind(), StatusKind::Overrun);
        drop(p);
        assert!(!called);
    }

    #[test]
    fn executor_wraps_each_invocation() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let wraps = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&wraps);
        let executor: Executor = Arc::new(move |call| {
            counter.fetch_add(1, Ordering::SeqCst);
            call()
        });
        let mut p =
            Property::new("t", integers(0..=10), |_| Ok(())).with_executor(executor);
        run_once(&mut p, 0);
        run_once(&mut p, 1);
        assert_eq!(wraps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_policy_is_replaceable() {
        fn constant_key(_: &FailureInfo) -> BugKey {
            BugKey::new("custom", "everywhere")
        }
        let mut p = Property::new("t", integers(0..=10), |_: &i64| -> CaseResult {
            panic!("whatever")
        })
        .with_key_policy(constant_key);
        let run = run_once(&mut p, 0);
        assert_eq!(run.status.bug_key().unwrap(), &BugKey::new("custom", "everywhere"));
    }

    #[test]
    fn explicit_examples_run_in_order_and_short_circuit() {
        let mut p = Property::new("t", integers(0..=100), |v: &i64| {
            if *v == 13 {
                return Err(CaseError::fail("unlucky"));
            }
            Ok(())
        })
        .with_example(1)
        .with_example(13)
        .with_example(99);
        let failure = p.run_explicit().unwrap().expect("13 fails");
        assert_eq!(failure.bug_key.kind, "assert");
        assert_eq!(failure.repr.as_deref(), Some("13"));
        assert!(failure.minimal.is_empty());
    }

    #[test]
    fn assume_macro_rejects() {
        let mut p = Property::new("t", integers(0..=100), |v: &i64| {
            assume!(*v % 2 == 0);
            Ok(())
        });
        let mut rejected = 0;
        for seed in 0..40 {
            if run_once(&mut p, seed).status == Status::Invalid {
                rejected += 1;
            }
        }
        assert!(rejected > 0, "odd draws should be rejected");
    }

    #[test]
    fn draw_values_replay_identically() {
        let mut captured = Vec::new();
        let mut p = Property::new("t", integers(-500..=500), |v: &i64| {
            // Record for comparison outside.
            let _ = v;
            Ok(())
        });
        let mut src = source(9);
        p.run_case(&mut src).unwrap();
        let result = src.into_result(Status::Valid);

        let mut replay = DataSource::from_recorded(result.bytes.clone());
        let run = p.run_case(&mut replay).unwrap();
        captured.push(run.repr.clone());
        let replayed = replay.into_result(run.status);
        assert_eq!(replayed.bytes, result.bytes);
    }
}
