//! Reporter callbacks and run statistics
//!
//! The engine narrates a run through the [`Reporter`] trait: start, drawn
//! examples, shrink progress, final failures, and a statistics summary.
//! Formatting is out of scope here; the default implementation routes events
//! to `tracing` at levels gated by the configured verbosity, and embedders
//! can substitute their own sink.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::data::{BugKey, ByteSeq, Span};
use crate::settings::Verbosity;

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate counters for one engine run. Serializable so embedding
/// frameworks can log the summary structurally.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Candidates handed to the test function.
    pub attempts: u64,
    /// Distinct VALID evaluations.
    pub valid: u64,
    /// INVALID evaluations (rejections).
    pub invalid: u64,
    /// OVERRUN evaluations.
    pub overrun: u64,
    /// INTERESTING evaluations (pre-dedup, including shrink probes).
    pub interesting: u64,
    /// Candidates discarded as duplicates without evaluation.
    pub duplicates: u64,
    /// Candidates that missed the per-example soft deadline.
    pub slow_examples: u64,
    /// Accepted shrinks across all bugs.
    pub shrinks: u64,
    /// Total bytes drawn across all candidates.
    pub drawn_bytes: u64,
    /// Length of the first interesting example before shrinking.
    pub base_example_len: Option<usize>,
    /// The test function returned a value instead of asserting.
    pub returned_value: bool,
    /// Time spent drawing values from strategies.
    #[serde(with = "duration_millis")]
    pub generation_time: Duration,
    /// Time spent inside the user predicate.
    #[serde(with = "duration_millis")]
    pub test_time: Duration,
    /// Occurrences of user-reported event tags.
    pub events: BTreeMap<String, u64>,
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl RunStats {
    /// Fold one event set into the counters.
    pub fn record_events<'a>(&mut self, events: impl IntoIterator<Item = &'a String>) {
        for event in events {
            *self.events.entry(event.clone()).or_insert(0) += 1;
        }
    }
}

// ============================================================================
// Reproduction blobs
// ============================================================================

/// Encode a minimized choice sequence for out-of-band reproduction.
pub fn encode_blob(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a reproduction blob back into a choice sequence.
pub fn decode_blob(blob: &str) -> Result<ByteSeq, BlobError> {
    base64::engine::general_purpose::STANDARD
        .decode(blob.trim())
        .map_err(|e| BlobError(e.to_string()))
}

/// A reproduction blob failed to decode.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed reproduction blob: {0}")]
pub struct BlobError(pub String);

// ============================================================================
// Reporter contract
// ============================================================================

/// One finalized failure, as delivered to [`Reporter::on_failure`].
#[derive(Clone, Debug)]
pub struct Failure {
    /// Which bug this is.
    pub bug_key: BugKey,
    /// The minimized choice sequence.
    pub minimal: ByteSeq,
    /// Debug rendering of the reified values, when available.
    pub repr: Option<String>,
    /// Base64 reproduction blob, when `print_blob` is enabled.
    pub blob: Option<String>,
}

/// Structured callbacks emitted by the engine.
///
/// Callbacks arrive in order: one `on_start`, any number of
/// `on_example_drawn` / `on_shrink`, then zero or more `on_failure` and a
/// final `on_statistics`.
pub trait Reporter {
    /// A run is beginning for the named test.
    fn on_start(&mut self, test_id: &str);
    /// A candidate was drawn and evaluated (gated to verbose levels by the
    /// default implementation).
    fn on_example_drawn(&mut self, bytes: &[u8], spans: &[Span], repr: Option<&str>);
    /// The shrinker accepted a smaller candidate.
    fn on_shrink(&mut self, from_len: usize, to_len: usize);
    /// A minimized failure is final.
    fn on_failure(&mut self, failure: &Failure);
    /// The run is over; here is the summary.
    fn on_statistics(&mut self, stats: &RunStats);
}

/// Reporter that drops every event.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_start(&mut self, _test_id: &str) {}
    fn on_example_drawn(&mut self, _bytes: &[u8], _spans: &[Span], _repr: Option<&str>) {}
    fn on_shrink(&mut self, _from_len: usize, _to_len: usize) {}
    fn on_failure(&mut self, _failure: &Failure) {}
    fn on_statistics(&mut self, _stats: &RunStats) {}
}

/// Default reporter: routes events to `tracing`, honoring verbosity.
#[derive(Debug)]
pub struct TracingReporter {
    verbosity: Verbosity,
    test_id: String,
}

impl TracingReporter {
    /// Reporter for the given verbosity level.
    pub fn new(verbosity: Verbosity) -> TracingReporter {
        TracingReporter { verbosity, test_id: String::new() }
    }
}

impl Reporter for TracingReporter {
    fn on_start(&mut self, test_id: &str) {
        self.test_id = test_id.to_string();
        if self.verbosity >= Verbosity::Normal {
            tracing::info!(test = %test_id, "starting property run");
        }
    }

    fn on_example_drawn(&mut self, bytes: &[u8], spans: &[Span], repr: Option<&str>) {
        if self.verbosity >= Verbosity::Verbose {
            tracing::debug!(
                test = %self.test_id,
                len = bytes.len(),
                spans = spans.len(),
                value = repr.unwrap_or("<unavailable>"),
                "drew example"
            );
        }
    }

    fn on_shrink(&mut self, from_len: usize, to_len: usize) {
        if self.verbosity >= Verbosity::Verbose {
            tracing::debug!(test = %self.test_id, from_len, to_len, "accepted shrink");
        }
    }

    fn on_failure(&mut self, failure: &Failure) {
        if self.verbosity >= Verbosity::Quiet {
            tracing::error!(
                test = %self.test_id,
                bug = %failure.bug_key,
                len = failure.minimal.len(),
                value = failure.repr.as_deref().unwrap_or("<unavailable>"),
                "minimized failing example"
            );
            if let Some(blob) = &failure.blob {
                tracing::error!(test = %self.test_id, blob = %blob, "reproduction blob");
            }
        }
    }

    fn on_statistics(&mut self, stats: &RunStats) {
        if self.verbosity >= Verbosity::Debug {
            match serde_json::to_string(stats) {
                Ok(json) => tracing::debug!(test = %self.test_id, stats = %json, "run statistics"),
                Err(e) => tracing::debug!(test = %self.test_id, error = %e, "run statistics"),
            }
        } else if self.verbosity >= Verbosity::Normal {
            tracing::info!(
                test = %self.test_id,
                attempts = stats.attempts,
                valid = stats.valid,
                invalid = stats.invalid,
                shrinks = stats.shrinks,
                "run finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let bytes = vec![0u8, 1, 2, 254, 255];
        let blob = encode_blob(&bytes);
        assert_eq!(decode_blob(&blob).unwrap(), bytes);
    }

    #[test]
    fn blob_decoding_rejects_garbage() {
        assert!(decode_blob("!!! not base64 !!!").is_err());
    }

    #[test]
    fn blob_decoding_tolerates_surrounding_whitespace() {
        let blob = format!("  {}\n", encode_blob(&[9, 9, 9]));
        assert_eq!(decode_blob(&blob).unwrap(), vec![9, 9, 9]);
    }

    #[test]
    fn tracing_reporter_handles_every_callback() {
        // Install a throwaway subscriber so the events have somewhere to go.
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("conject=debug")
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut reporter = TracingReporter::new(Verbosity::Debug);
            reporter.on_start("report::smoke");
            reporter.on_example_drawn(&[1, 2, 3], &[], Some("[1, 2, 3]"));
            reporter.on_shrink(3, 1);
            reporter.on_failure(&Failure {
                bug_key: BugKey::new("assert", "report.rs:1"),
                minimal: vec![1],
                repr: Some("1".into()),
                blob: Some(encode_blob(&[1])),
            });
            reporter.on_statistics(&RunStats::default());
        });
    }

    #[test]
    fn stats_serialize_to_json() {
        let mut stats = RunStats { attempts: 3, valid: 2, ..RunStats::default() };
        stats.record_events([&"filter.exhausted".to_string()]);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"attempts\":3"));
        let back: RunStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.valid, 2);
        assert_eq!(back.events.get("filter.exhausted"), Some(&1));
    }
}
