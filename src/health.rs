//! Health checks
//!
//! Invariants asserted over the GENERATE phase to surface likely mistakes in
//! how a test is written. A failing health check aborts the test with an
//! engine error, never a counterexample, and each check can be individually
//! suppressed through settings.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::report::RunStats;

/// Minimum number of attempts before ratio-based checks apply.
const MIN_SAMPLE: u64 = 20;

/// Generation must dominate before `TooSlow` fires, and be absolutely slow.
const SLOW_GENERATION_FLOOR: Duration = Duration::from_secs(1);

/// Average choice-sequence length above which `DataTooLarge` fires.
const LARGE_DATA_THRESHOLD: f64 = 4096.0;

/// Unshrunk base example length above which `LargeBaseExample` fires.
const LARGE_BASE_THRESHOLD: usize = 2048;

/// Fraction of per-candidate soft-deadline misses that fails `TooSlow`.
const SLOW_EXAMPLE_RATIO: f64 = 0.5;

/// Individually suppressible health-check tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    /// Data generation dominates the run and is slow in absolute terms, or
    /// too many candidates miss the per-example soft deadline.
    TooSlow,
    /// More than half of all attempts were rejected.
    FilterTooMuch,
    /// Choice sequences are far larger than the engine works well with.
    DataTooLarge,
    /// The test function returned a value instead of asserting.
    ReturnValue,
    /// The first interesting example was already huge before shrinking.
    LargeBaseExample,
}

impl HealthCheck {
    /// Stable tag name used in settings and messages.
    pub fn as_str(self) -> &'static str {
        match self {
            HealthCheck::TooSlow => "too_slow",
            HealthCheck::FilterTooMuch => "filter_too_much",
            HealthCheck::DataTooLarge => "data_too_large",
            HealthCheck::ReturnValue => "return_value",
            HealthCheck::LargeBaseExample => "large_base_example",
        }
    }

    /// All tags, in evaluation order.
    pub fn all() -> [HealthCheck; 5] {
        [
            HealthCheck::ReturnValue,
            HealthCheck::FilterTooMuch,
            HealthCheck::TooSlow,
            HealthCheck::DataTooLarge,
            HealthCheck::LargeBaseExample,
        ]
    }
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "too_slow" => Ok(HealthCheck::TooSlow),
            "filter_too_much" => Ok(HealthCheck::FilterTooMuch),
            "data_too_large" => Ok(HealthCheck::DataTooLarge),
            "return_value" => Ok(HealthCheck::ReturnValue),
            "large_base_example" => Ok(HealthCheck::LargeBaseExample),
            other => Err(format!("unknown health check tag: {other}")),
        }
    }
}

/// A health check fired.
#[derive(Debug, Clone, thiserror::Error)]
#[error("health check `{tag}` failed: {message}")]
pub struct HealthCheckFailed {
    /// Which check fired.
    pub tag: HealthCheck,
    /// Human-readable diagnosis.
    pub message: String,
}

/// Evaluate one check against the run statistics.
fn check(tag: HealthCheck, stats: &RunStats) -> Result<(), HealthCheckFailed> {
    let fail = |message: String| Err(HealthCheckFailed { tag, message });
    match tag {
        HealthCheck::ReturnValue => {
            if stats.returned_value {
                return fail(
                    "the test function returned a value; did you forget an assertion?".into(),
                );
            }
        }
        HealthCheck::FilterTooMuch => {
            if stats.attempts >= MIN_SAMPLE {
                let ratio = stats.invalid as f64 / stats.attempts as f64;
                if ratio > 0.5 {
                    return fail(format!(
                        "{} of {} attempts were rejected; loosen filters or \
                         restructure the strategy so valid examples are common",
                        stats.invalid, stats.attempts
                    ));
                }
            }
        }
        HealthCheck::TooSlow => {
            let test_time = stats.test_time.max(Duration::from_nanos(1));
            let dominated = stats.generation_time.as_secs_f64() / test_time.as_secs_f64() > 0.5;
            if dominated && stats.generation_time >= SLOW_GENERATION_FLOOR {
                return fail(format!(
                    "spent {:?} generating data against {:?} running the test",
                    stats.generation_time, stats.test_time
                ));
            }
            if stats.attempts >= MIN_SAMPLE {
                let slow_ratio = stats.slow_examples as f64 / stats.attempts as f64;
                if slow_ratio > SLOW_EXAMPLE_RATIO {
                    return fail(format!(
                        "{} of {} candidates exceeded the per-example deadline",
                        stats.slow_examples, stats.attempts
                    ));
                }
            }
        }
        HealthCheck::DataTooLarge => {
            if stats.attempts >= MIN_SAMPLE {
                let avg = stats.drawn_bytes as f64 / stats.attempts as f64;
                if avg > LARGE_DATA_THRESHOLD {
                    return fail(format!(
                        "average choice sequence is {avg:.0} bytes; generate smaller examples"
                    ));
                }
            }
        }
        HealthCheck::LargeBaseExample => {
            if let Some(len) = stats.base_example_len {
                if len > LARGE_BASE_THRESHOLD {
                    return fail(format!(
                        "the unshrunk failing example is already {len} bytes"
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Run every non-suppressed check; the first failure wins.
pub fn evaluate(
    stats: &RunStats,
    suppressed: &std::collections::BTreeSet<HealthCheck>,
) -> Result<(), HealthCheckFailed> {
    for tag in HealthCheck::all() {
        if suppressed.contains(&tag) {
            continue;
        }
        check(tag, stats)?;
    }
    Ok(())
}
