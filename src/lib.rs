//! Crate root: public surface, core aliases, and engine-wide invariants
//!
//! `conject` is a property-based testing engine organized around a single
//! idea: a test case is a **byte sequence**, and a strategy is a parser of
//! that sequence into a value. Generation, replay, shrinking, and failure
//! persistence are all uniform operations over bytes, which is what lets a
//! strategy-agnostic shrinker produce legible counterexamples.
//!
//! ## Invariants (engine-wide)
//!
//! - **Determinism under replay.** Replaying a recorded byte sequence
//!   through the same strategies yields the same values, spans, and status,
//!   every time. Nothing in the engine, swarm bias included, changes how
//!   recorded bytes decode.
//! - **Monotone shrinking.** Every accepted shrink strictly decreases the
//!   shortlex order (length, then lexicographic) on byte sequences, so the
//!   shrinker terminates, and the final counterexample still fails with the
//!   same bug key as the first one found.
//! - **No double evaluation.** A hash ledger and a decision-prefix tree
//!   ensure no candidate byte sequence is handed to the predicate twice
//!   within one run.
//! - **Phase monotonicity.** A run moves through REUSE → GENERATE → SHRINK →
//!   DONE and never revisits a phase.
//! - **No global state.** Randomness comes from an explicit per-run seed
//!   threaded through a ChaCha generator; nothing leaks across tests.
//!
//! Failure modes are precise errors (never panics from engine code): see
//! [`EngineError`].
//!
//! ## Quick start
//!
//! ```
//! use conject::{check, integers, vecs, CaseError, Property, Settings};
//!
//! let settings = Settings { seed: Some(42), ..Settings::default() };
//! let property = Property::new(
//!     "doc::sum_is_small",
//!     vecs(integers(0..=10), 0..=5),
//!     |items: &Vec<i64>| {
//!         if items.iter().sum::<i64>() > 100 {
//!             return Err(CaseError::fail("sum overflowed the budget"));
//!         }
//!         Ok(())
//!     },
//! );
//! // Sums of five digits never exceed 100, so this passes.
//! check(settings, property).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]

/// Choice sequences, spans, the data provider, and primitive draws.
pub mod data;
/// Example database: directory tree persistence with in-memory fallback.
pub mod database;
/// Phase controller driving REUSE → GENERATE → SHRINK.
pub mod engine;
/// Swarm parameter pool biasing candidate generation.
pub mod generator;
/// Health checks surfacing likely mistakes in how a test is written.
pub mod health;
/// Binary-search integer lowering used by the shrinker.
pub mod intminimize;
/// Reporter callbacks and run statistics.
pub mod report;
/// Property wrapper, executor hook, and outcome classification.
pub mod runner;
/// Run configuration and named profiles.
pub mod settings;
/// The byte-level multi-pass shrinker.
pub mod shrink;
/// Strategy contract, combinators, and the kernel strategies.
pub mod strategy;
/// Deduplication ledger and decision-prefix tree.
pub mod tracker;

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::data::{Bias, BugKey, ByteSeq, DataSource, Draw, Halt, Label, Span, Status};
pub use crate::database::{DatabaseKey, DirectoryDatabase, ExampleDatabase, InMemoryDatabase};
pub use crate::engine::{check, Engine, EngineError, RunReport};
pub use crate::health::{HealthCheck, HealthCheckFailed};
pub use crate::report::{decode_blob, encode_blob, Failure, NullReporter, Reporter, RunStats};
pub use crate::runner::{CaseError, CaseResult, Executor, Property};
pub use crate::settings::{DatabaseConfig, Phase, Settings, Verbosity};
pub use crate::strategy::{
    ascii_strings, booleans, bytes_of, integers, one_of, recursive, sampled_from, u64s,
    unique_vecs, vecs, BoxedStrategy, InvalidArgument, Just, SizeRange, Strategy,
};
