//! Multi-pass byte-level shrinker
//!
//! Given an interesting choice sequence, the shrinker searches for the
//! shortlex-least sequence that is still interesting **with the same bug
//! key**. It knows nothing about strategies: every pass proposes candidate
//! byte sequences derived from the current target's recorded span structure,
//! and the driver keeps whichever candidates are admissible.
//!
//! Admissibility: the candidate re-evaluates to INTERESTING with the same
//! key, and its consumed byte sequence is strictly smaller than the target
//! under shortlex (length first, then lexicographic). Passes are allowed to
//! be unsound: a candidate that fails to parse, changes bug, or grows is
//! simply discarded. Termination follows from every accepted shrink strictly
//! decreasing a well-founded order.
//!
//! The pass list is fixed. Each pass is driven to a greedy fixpoint before
//! the driver moves on, and when a full loop over all passes makes no
//! progress a small randomized perturbation of the target is tried before
//! giving up.

#![forbid(unsafe_code)]

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::data::{shortlex_less, BugKey, ByteSeq, Span, Status, TestResult};
use crate::intminimize::minimize_u64;

/// Perturbations attempted by the stuck-escape heuristic per stall.
const ESCAPE_ATTEMPTS: u32 = 10;

/// Widest block the integer-lowering passes will interpret.
const MAX_INT_BLOCK: usize = 8;

// ============================================================================
// Host contract
// ============================================================================

/// The run must stop for a reason unrelated to this shrink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShrinkStop {
    /// Host framework requested a skip mid-shrink.
    Skipped {
        /// Why.
        reason: String,
    },
    /// The run's hard deadline elapsed.
    Deadline,
}

/// Why a shrink did not complete normally.
#[derive(Clone, Debug)]
pub enum ShrinkFailure {
    /// The target itself no longer reproduces: re-evaluating the exact same
    /// bytes produced a different outcome. Reported specially; no further
    /// shrinking is attempted.
    Flaky {
        /// The bug the sequence produced the first time.
        expected: BugKey,
        /// What re-evaluation produced instead.
        reparsed: Status,
    },
    /// Stopped by the host.
    Stopped(ShrinkStop),
}

impl From<ShrinkStop> for ShrinkFailure {
    fn from(stop: ShrinkStop) -> ShrinkFailure {
        ShrinkFailure::Stopped(stop)
    }
}

/// Evaluation services the shrinker needs from the engine.
pub trait ShrinkHost {
    /// Strictly replay `bytes`, unconditionally (no dedup): used once to
    /// recover the target's span structure and detect flakiness.
    fn reparse(&mut self, bytes: &[u8]) -> Result<TestResult, ShrinkStop>;
    /// Evaluate a candidate. Returns `None` when the candidate was skipped
    /// without evaluation (already seen, or known-dead prefix).
    fn try_bytes(&mut self, bytes: &[u8]) -> Result<Option<TestResult>, ShrinkStop>;
    /// An admissible shrink was accepted.
    fn notify_shrink(&mut self, from_len: usize, to_len: usize);
}

/// Outcome of a completed shrink.
#[derive(Clone, Debug)]
pub struct ShrinkReport {
    /// The minimized result (bytes, spans, status).
    pub minimized: TestResult,
    /// Number of accepted shrinks.
    pub shrinks: u64,
}

// ============================================================================
// Candidate construction helpers
// ============================================================================

fn without_range(bytes: &[u8], start: usize, end: usize) -> ByteSeq {
    let mut out = Vec::with_capacity(bytes.len() - (end - start));
    out.extend_from_slice(&bytes[..start]);
    out.extend_from_slice(&bytes[end..]);
    out
}

fn with_replaced(bytes: &[u8], start: usize, end: usize, replacement: &[u8]) -> ByteSeq {
    let mut out = Vec::with_capacity(bytes.len() - (end - start) + replacement.len());
    out.extend_from_slice(&bytes[..start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&bytes[end..]);
    out
}

fn block_as_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn u64_as_block(value: u64, len: usize) -> ByteSeq {
    let mut out = vec![0u8; len];
    let mut v = value;
    for slot in out.iter_mut().rev() {
        *slot = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

// ============================================================================
// The shrinker
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pass {
    DeleteSpans,
    ZeroBlocks,
    ReduceBlocks,
    MergeAdjacent,
    SortSiblings,
    EqualizePairs,
    LowerDuplicates,
    ReorderSiblings,
}

impl Pass {
    const ALL: [Pass; 8] = [
        Pass::DeleteSpans,
        Pass::ZeroBlocks,
        Pass::ReduceBlocks,
        Pass::MergeAdjacent,
        Pass::SortSiblings,
        Pass::EqualizePairs,
        Pass::LowerDuplicates,
        Pass::ReorderSiblings,
    ];
}

/// Byte-level minimizer for one bug key.
pub struct Shrinker<'h> {
    host: &'h mut dyn ShrinkHost,
    key: BugKey,
    target: TestResult,
    shrinks: u64,
    rng: ChaCha8Rng,
}

impl<'h> Shrinker<'h> {
    /// Shrinker for `initial`, which must be interesting with `key`.
    pub fn new(
        host: &'h mut dyn ShrinkHost,
        initial: TestResult,
        key: BugKey,
        rng: ChaCha8Rng,
    ) -> Shrinker<'h> {
        debug_assert_eq!(initial.status, Status::Interesting(key.clone()));
        Shrinker { host, key, target: initial, shrinks: 0, rng }
    }

    /// Run to a fixpoint.
    pub fn run(mut self) -> Result<ShrinkReport, ShrinkFailure> {
        // Re-parse the target to recover fresh spans and to catch flaky
        // predicates before investing in a doomed search.
        let reparsed = self.host.reparse(&self.target.bytes)?;
        if reparsed.status != Status::Interesting(self.key.clone()) {
            return Err(ShrinkFailure::Flaky {
                expected: self.key,
                reparsed: reparsed.status,
            });
        }
        self.target = reparsed;

        loop {
            let before = self.shrinks;
            for pass in Pass::ALL {
                self.run_pass_to_fixpoint(pass)?;
            }
            if self.shrinks == before && !self.stuck_escape()? {
                break;
            }
        }
        tracing::debug!(
            bug = %self.key,
            len = self.target.bytes.len(),
            shrinks = self.shrinks,
            "shrink complete"
        );
        Ok(ShrinkReport { minimized: self.target, shrinks: self.shrinks })
    }

    fn run_pass_to_fixpoint(&mut self, pass: Pass) -> Result<(), ShrinkFailure> {
        loop {
            let changed = match pass {
                Pass::DeleteSpans => self.pass_delete_spans()?,
                Pass::ZeroBlocks => self.pass_zero_blocks()?,
                Pass::ReduceBlocks => self.pass_reduce_blocks()?,
                Pass::MergeAdjacent => self.pass_merge_adjacent()?,
                Pass::SortSiblings => self.pass_sort_siblings()?,
                Pass::EqualizePairs => self.pass_equalize_pairs()?,
                Pass::LowerDuplicates => self.pass_lower_duplicates()?,
                Pass::ReorderSiblings => self.pass_reorder_siblings()?,
            };
            if !changed {
                return Ok(());
            }
        }
    }

    /// Evaluate one candidate; adopt it when admissible. The adopted target
    /// is the *consumed prefix* of the candidate, so trailing bytes a
    /// shorter parse leaves unread are dropped for free.
    fn consider(&mut self, candidate: ByteSeq) -> Result<bool, ShrinkFailure> {
        if !shortlex_less(&candidate, &self.target.bytes) {
            return Ok(false);
        }
        if self.target.bytes.starts_with(&candidate) {
            // Strict replay of a proper prefix either overruns or retraces
            // the target; neither can be a new shrink.
            return Ok(false);
        }
        let result = match self.host.try_bytes(&candidate)? {
            Some(result) => result,
            None => return Ok(false),
        };
        if result.status == Status::Interesting(self.key.clone())
            && shortlex_less(&result.bytes, &self.target.bytes)
        {
            self.host.notify_shrink(self.target.bytes.len(), result.bytes.len());
            self.shrinks += 1;
            self.target = result;
            return Ok(true);
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Span groupings
    // ------------------------------------------------------------------

    fn spans(&self) -> Vec<Span> {
        self.target.spans.iter().copied().filter(|s| !s.is_empty()).collect()
    }

    fn leaf_blocks(&self) -> Vec<Span> {
        self.target.leaf_blocks()
    }

    /// Maximal runs of contiguous spans sharing a label and depth: the
    /// shrinker's stand-in for "same-label siblings under one parent".
    fn sibling_runs(&self) -> Vec<Vec<Span>> {
        let spans = self.spans();
        let mut runs: Vec<Vec<Span>> = Vec::new();
        for span in spans {
            match runs.last_mut() {
                Some(run) => {
                    let prev = run[run.len() - 1];
                    if prev.label == span.label && prev.depth == span.depth && prev.end == span.start
                    {
                        run.push(span);
                        continue;
                    }
                    runs.push(vec![span]);
                }
                None => runs.push(vec![span]),
            }
        }
        runs.retain(|run| run.len() > 1);
        runs
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    /// Try deleting each span, alone and paired with the next same-label
    /// span (which removes matched openers/closers of collections).
    fn pass_delete_spans(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let spans = self.spans();
            if i >= spans.len() {
                break;
            }
            let span = spans[i];
            if span.end <= self.target.bytes.len()
                && self.consider(without_range(&self.target.bytes, span.start, span.end))?
            {
                changed = true;
                continue;
            }
            // Paired deletion with the nearest disjoint same-label sibling.
            let pair = spans[i + 1..]
                .iter()
                .find(|s| s.label == span.label && s.depth == span.depth && s.start >= span.end)
                .copied();
            if let Some(other) = pair {
                if other.end <= self.target.bytes.len() {
                    let step1 = without_range(&self.target.bytes, other.start, other.end);
                    let candidate = without_range(&step1, span.start, span.end);
                    if self.consider(candidate)? {
                        changed = true;
                        continue;
                    }
                }
            }
            i += 1;
        }
        Ok(changed)
    }

    /// Overwrite each leaf block with zero bytes of the same length.
    fn pass_zero_blocks(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let blocks = self.leaf_blocks();
            if i >= blocks.len() {
                break;
            }
            let block = blocks[i];
            let all_zero = self.target.bytes[block.start..block.end].iter().all(|&b| b == 0);
            if !all_zero {
                let zeros = vec![0u8; block.len()];
                if self.consider(with_replaced(&self.target.bytes, block.start, block.end, &zeros))?
                {
                    changed = true;
                    continue;
                }
            }
            i += 1;
        }
        Ok(changed)
    }

    /// Interpret each leaf block as a big-endian integer and binary-search
    /// it downward.
    fn pass_reduce_blocks(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let blocks = self.leaf_blocks();
            if i >= blocks.len() {
                break;
            }
            let block = blocks[i];
            i += 1;
            if block.len() > MAX_INT_BLOCK {
                continue;
            }
            let value = block_as_u64(&self.target.bytes[block.start..block.end]);
            if value == 0 {
                continue;
            }
            let accepted_any = self.lower_block(block, value)?;
            changed |= accepted_any;
        }
        Ok(changed)
    }

    fn lower_block(&mut self, block: Span, value: u64) -> Result<bool, ShrinkFailure> {
        let before = self.shrinks;
        minimize_u64(value, |w| {
            // The target may have changed shape under us; out-of-range
            // coordinates just produce an unsound candidate, which the
            // admissibility check discards, but slicing must stay in bounds.
            if block.end > self.target.bytes.len() {
                return Ok(false);
            }
            let replacement = u64_as_block(w, block.len());
            self.consider(with_replaced(
                &self.target.bytes,
                block.start,
                block.end,
                &replacement,
            ))
        })?;
        Ok(self.shrinks > before)
    }

    /// Replace two adjacent same-label siblings with a single zeroed block
    /// of the shorter length. Collapses concatenated sub-examples.
    fn pass_merge_adjacent(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let runs = self.sibling_runs();
            let pairs: Vec<(Span, Span)> = runs
                .iter()
                .flat_map(|run| run.windows(2).map(|w| (w[0], w[1])))
                .collect();
            if i >= pairs.len() {
                break;
            }
            let (a, b) = pairs[i];
            if b.end <= self.target.bytes.len() {
                let zeros = vec![0u8; a.len().min(b.len())];
                if self.consider(with_replaced(&self.target.bytes, a.start, b.end, &zeros))? {
                    changed = true;
                    continue;
                }
            }
            i += 1;
        }
        Ok(changed)
    }

    /// Sort the contents of same-label sibling runs.
    fn pass_sort_siblings(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let runs = self.sibling_runs();
            if i >= runs.len() {
                break;
            }
            let run = &runs[i];
            i += 1;
            let (start, end) = (run[0].start, run[run.len() - 1].end);
            if end > self.target.bytes.len() {
                continue;
            }
            let mut chunks: Vec<&[u8]> =
                run.iter().map(|s| &self.target.bytes[s.start..s.end]).collect();
            chunks.sort();
            let sorted: ByteSeq = chunks.concat();
            if sorted != self.target.bytes[start..end] {
                changed |=
                    self.consider(with_replaced(&self.target.bytes, start, end, &sorted))?;
            }
        }
        Ok(changed)
    }

    /// For pairs of same-length leaf blocks, copy the lex-smaller over the
    /// lex-larger. Collapses accidental diversity between elements.
    fn pass_equalize_pairs(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let blocks = self.leaf_blocks();
            let pairs: Vec<(Span, Span)> = same_length_pairs(&blocks);
            if i >= pairs.len() {
                break;
            }
            let (a, b) = pairs[i];
            i += 1;
            if b.end > self.target.bytes.len() {
                continue;
            }
            let bytes_a = self.target.bytes[a.start..a.end].to_vec();
            let bytes_b = self.target.bytes[b.start..b.end].to_vec();
            if bytes_a == bytes_b {
                continue;
            }
            let (dst, src_bytes) =
                if bytes_a < bytes_b { (b, bytes_a) } else { (a, bytes_b) };
            changed |= self.consider(with_replaced(
                &self.target.bytes,
                dst.start,
                dst.end,
                &src_bytes,
            ))?;
        }
        Ok(changed)
    }

    /// Lower every group of identical blocks together, preserving their
    /// equality. Equal blocks are usually equal for a reason.
    fn pass_lower_duplicates(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut g = 0;
        loop {
            let groups = duplicate_groups(&self.leaf_blocks(), &self.target.bytes);
            if g >= groups.len() {
                break;
            }
            let group = groups[g].clone();
            g += 1;
            let value = block_as_u64(&self.target.bytes[group[0].start..group[0].end]);
            if value == 0 {
                continue;
            }
            let before = self.shrinks;
            minimize_u64(value, |w| {
                if group.iter().any(|b| b.end > self.target.bytes.len()) {
                    return Ok(false);
                }
                let mut candidate = self.target.bytes.clone();
                for block in &group {
                    let replacement = u64_as_block(w, block.len());
                    candidate[block.start..block.end].copy_from_slice(&replacement);
                }
                self.consider(candidate)
            })?;
            changed |= self.shrinks > before;
        }
        Ok(changed)
    }

    /// Swap adjacent same-label siblings when that lowers lex order.
    fn pass_reorder_siblings(&mut self) -> Result<bool, ShrinkFailure> {
        let mut changed = false;
        let mut i = 0;
        loop {
            let runs = self.sibling_runs();
            let pairs: Vec<(Span, Span)> = runs
                .iter()
                .flat_map(|run| run.windows(2).map(|w| (w[0], w[1])))
                .collect();
            if i >= pairs.len() {
                break;
            }
            let (a, b) = pairs[i];
            i += 1;
            if b.end > self.target.bytes.len() {
                continue;
            }
            let bytes_a = self.target.bytes[a.start..a.end].to_vec();
            let bytes_b = self.target.bytes[b.start..b.end].to_vec();
            let mut swapped = bytes_b.clone();
            swapped.extend_from_slice(&bytes_a);
            let original = &self.target.bytes[a.start..b.end];
            if swapped.as_slice() < original {
                changed |= self.consider(with_replaced(
                    &self.target.bytes,
                    a.start,
                    b.end,
                    &swapped,
                ))?;
            }
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Stuck escape
    // ------------------------------------------------------------------

    /// Randomized last resort when the pass loop stalls: lower a random
    /// byte, or chop a random small range, and see if anything sticks.
    fn stuck_escape(&mut self) -> Result<bool, ShrinkFailure> {
        for _ in 0..ESCAPE_ATTEMPTS {
            if self.target.bytes.is_empty() {
                return Ok(false);
            }
            let len = self.target.bytes.len();
            let candidate = if self.rng.gen_bool(0.5) {
                let at = self.rng.gen_range(0..len);
                let current = self.target.bytes[at];
                if current == 0 {
                    continue;
                }
                let mut bytes = self.target.bytes.clone();
                bytes[at] = self.rng.gen_range(0..current);
                bytes
            } else {
                let at = self.rng.gen_range(0..len);
                let span = self.rng.gen_range(1..=4.min(len - at));
                without_range(&self.target.bytes, at, at + span)
            };
            if self.consider(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn same_length_pairs(blocks: &[Span]) -> Vec<(Span, Span)> {
    let mut pairs = Vec::new();
    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            if a.len() == b.len() && a.label == b.label {
                pairs.push((*a, *b));
            }
        }
    }
    pairs
}

fn duplicate_groups(blocks: &[Span], bytes: &[u8]) -> Vec<Vec<Span>> {
    use std::collections::HashMap;
    let mut by_content: HashMap<&[u8], Vec<Span>> = HashMap::new();
    for block in blocks {
        if block.len() <= MAX_INT_BLOCK && block.end <= bytes.len() {
            by_content.entry(&bytes[block.start..block.end]).or_default().push(*block);
        }
    }
    let mut groups: Vec<Vec<Span>> =
        by_content.into_values().filter(|g| g.len() > 1).collect();
    groups.sort_by_key(|g| (std::cmp::Reverse(g.len()), g[0].start));
    groups
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataSource, Halt};
    use crate::strategy::{booleans, integers, vecs, Strategy};
    use crate::tracker::SeenSet;
    use rand::SeedableRng;

    /// Host that replays bytes against a classifier closure, with a local
    /// dedup ledger standing in for the engine's.
    struct LocalHost<F> {
        classify: F,
        seen: SeenSet,
        evaluations: u64,
    }

    impl<F> LocalHost<F>
    where
        F: FnMut(&mut DataSource) -> Status,
    {
        fn new(classify: F) -> LocalHost<F> {
            LocalHost { classify, seen: SeenSet::new(), evaluations: 0 }
        }

        fn run(&mut self, bytes: &[u8]) -> TestResult {
            self.evaluations += 1;
            let mut source = DataSource::from_recorded(bytes.to_vec());
            let status = (self.classify)(&mut source);
            source.into_result(status)
        }
    }

    impl<F> ShrinkHost for LocalHost<F>
    where
        F: FnMut(&mut DataSource) -> Status,
    {
        fn reparse(&mut self, bytes: &[u8]) -> Result<TestResult, ShrinkStop> {
            Ok(self.run(bytes))
        }
        fn try_bytes(&mut self, bytes: &[u8]) -> Result<Option<TestResult>, ShrinkStop> {
            if !self.seen.insert(bytes) {
                return Ok(None);
            }
            Ok(Some(self.run(bytes)))
        }
        fn notify_shrink(&mut self, _from: usize, _to: usize) {}
    }

    fn bug() -> BugKey {
        BugKey::new("assert", "shrink.rs:test")
    }

    /// Classify: interesting iff the drawn list of small ints sums past a
    /// threshold.
    fn sum_classifier(threshold: u64) -> impl FnMut(&mut DataSource) -> Status + Clone {
        move |source| {
            let strat = vecs(integers(0..=100), 0..=20);
            match strat.do_draw(source) {
                Ok(items) => {
                    let sum: i64 = items.iter().sum();
                    if sum as u64 >= threshold {
                        Status::Interesting(bug())
                    } else {
                        Status::Valid
                    }
                }
                Err(Halt::Overrun) => Status::Overrun,
                Err(Halt::Reject) => Status::Invalid,
            }
        }
    }

    fn find_interesting(
        classify: &mut impl FnMut(&mut DataSource) -> Status,
        seed: u64,
    ) -> TestResult {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..2000 {
            let mut source = DataSource::from_rng(rng.clone());
            let status = classify(&mut source);
            let result = source.into_result(status);
            if result.status.is_interesting() {
                return result;
            }
            rng = ChaCha8Rng::seed_from_u64(rng.gen());
        }
        panic!("no interesting example found");
    }

    fn shrink_with(
        mut classify: impl FnMut(&mut DataSource) -> Status + Clone,
        seed: u64,
    ) -> ShrinkReport {
        let initial = find_interesting(&mut classify, seed);
        let mut host = LocalHost::new(classify);
        let shrinker =
            Shrinker::new(&mut host, initial, bug(), ChaCha8Rng::seed_from_u64(0));
        shrinker.run().expect("shrink should complete")
    }

    #[test]
    fn shrinks_sum_property_to_near_minimal() {
        let report = shrink_with(sum_classifier(100), 5);
        let minimized = report.minimized;
        assert_eq!(minimized.status, Status::Interesting(bug()));
        // A near-minimal witness is one or two elements summing to ~100;
        // byte-wise that is a handful of bytes, not the original pile.
        assert!(
            minimized.bytes.len() <= 12,
            "expected a small witness, got {} bytes",
            minimized.bytes.len()
        );
        assert!(report.shrinks > 0);
    }

    #[test]
    fn shrink_is_idempotent() {
        let report = shrink_with(sum_classifier(50), 11);
        let first = report.minimized;

        let mut host = LocalHost::new(sum_classifier(50));
        let again = Shrinker::new(
            &mut host,
            first.clone(),
            bug(),
            ChaCha8Rng::seed_from_u64(1),
        )
        .run()
        .expect("second shrink completes");
        assert_eq!(again.minimized.bytes, first.bytes, "shrink(shrink(B)) == shrink(B)");
    }

    #[test]
    fn preserves_the_bug_key() {
        let other = BugKey::new("assert", "shrink.rs:other");
        // Two bugs: big sums are `bug()`, exactly-zero sums are `other`.
        let classify = move |source: &mut DataSource| {
            let strat = vecs(integers(0..=100), 0..=20);
            match strat.do_draw(source) {
                Ok(items) => {
                    let sum: i64 = items.iter().sum();
                    if sum >= 50 {
                        Status::Interesting(bug())
                    } else if sum == 0 && !items.is_empty() {
                        Status::Interesting(other.clone())
                    } else {
                        Status::Valid
                    }
                }
                Err(Halt::Overrun) => Status::Overrun,
                Err(Halt::Reject) => Status::Invalid,
            }
        };
        let report = shrink_with(classify, 3);
        // Shrinking toward zero would cross into `other` territory; the
        // admissibility rule must keep us on `bug()`.
        assert_eq!(report.minimized.status, Status::Interesting(bug()));
    }

    #[test]
    fn flaky_targets_are_detected() {
        let mut first = true;
        let classify = move |source: &mut DataSource| {
            let _ = source.draw_bits(8);
            if std::mem::take(&mut first) {
                Status::Interesting(bug())
            } else {
                Status::Valid
            }
        };
        let mut probe = classify;
        let initial = {
            let mut source = DataSource::from_recorded(vec![7]);
            let status = probe(&mut source);
            source.into_result(status)
        };
        assert!(initial.status.is_interesting());
        let mut host = LocalHost::new(probe);
        let outcome = Shrinker::new(&mut host, initial, bug(), ChaCha8Rng::seed_from_u64(0)).run();
        match outcome {
            Err(ShrinkFailure::Flaky { expected, reparsed }) => {
                assert_eq!(expected, bug());
                assert_eq!(reparsed, Status::Valid);
            }
            other => panic!("expected flaky detection, got {other:?}"),
        }
    }

    #[test]
    fn zeroing_reaches_all_zero_fixpoints() {
        // Interesting whenever the first boolean is drawn at all: the
        // minimal sequence is a single zero byte.
        let classify = |source: &mut DataSource| match booleans().do_draw(source) {
            Ok(_) => Status::Interesting(bug()),
            Err(_) => Status::Overrun,
        };
        let initial = {
            let mut source = DataSource::from_recorded(vec![0xAB, 0xCD]);
            let status = classify(&mut source);
            source.into_result(status)
        };
        let mut host = LocalHost::new(classify);
        let report = Shrinker::new(&mut host, initial, bug(), ChaCha8Rng::seed_from_u64(0))
            .run()
            .unwrap();
        assert_eq!(report.minimized.bytes, vec![0]);
    }

    #[test]
    fn deletion_strips_unneeded_elements() {
        // Interesting iff any element is >= 10: minimal witness is one
        // element.
        let classify = |source: &mut DataSource| {
            let strat = vecs(integers(0..=100), 0..=20);
            match strat.do_draw(source) {
                Ok(items) => {
                    if items.iter().any(|&v| v >= 10) {
                        Status::Interesting(bug())
                    } else {
                        Status::Valid
                    }
                }
                Err(Halt::Overrun) => Status::Overrun,
                Err(Halt::Reject) => Status::Invalid,
            }
        };
        let report = shrink_with(classify, 23);
        let replay = {
            let mut source = DataSource::from_recorded(report.minimized.bytes.clone());
            let strat = vecs(integers(0..=100), 0..=20);
            strat.do_draw(&mut source).expect("minimized bytes parse")
        };
        assert_eq!(replay.len(), 1, "one element suffices: {replay:?}");
    }

    #[test]
    fn no_candidate_is_evaluated_twice() {
        let classify = sum_classifier(60);
        let initial = find_interesting(&mut classify.clone(), 31);
        let mut host = LocalHost::new(classify);
        let _ = Shrinker::new(&mut host, initial, bug(), ChaCha8Rng::seed_from_u64(0))
            .run()
            .unwrap();
        // One reparse plus one evaluation per novel candidate; the ledger
        // holds every candidate evaluated through try_bytes.
        assert_eq!(host.evaluations as usize, host.seen.len() + 1);
    }
}
