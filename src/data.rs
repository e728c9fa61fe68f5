//! Choice sequences, spans, and the data provider
//!
//! The engine never manipulates typed values directly: every test case is a
//! finite **choice sequence** of bytes, and a strategy is a parser of that
//! sequence. This module owns the byte-level substrate:
//!
//! - [`DataSource`]: one live provider per evaluation. It answers the
//!   primitive draw calls, records **spans** (half-open intervals tagged with
//!   a label and nesting depth) as it goes, and appends entropy when a replay
//!   prefix runs out.
//! - [`Status`]: the classification of a completed evaluation, totally
//!   ordered as `Overrun < Invalid < Valid < Interesting`.
//! - [`TestResult`]: the immutable decay of a finished provider, bytes,
//!   spans, events, status, runtime. Ordered shortlex on the bytes.
//!
//! ## Invariants
//!
//! - The interpretation of bytes is **pure**: replaying a recorded sequence
//!   yields the same values, spans, and status every time. Swarm bias (see
//!   [`Bias`]) only shapes which bytes are *drawn* from entropy, never how
//!   bytes are decoded.
//! - Every primitive draw opens and closes a span around exactly the bytes it
//!   consumed. Once a provider has completed, its leaf spans partition
//!   `[0, len)` and the label structure is well nested.
//! - A completed provider's buffer is immutable; `TestResult` owns it.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// A choice sequence: the canonical serialized form of one test case.
pub type ByteSeq = Vec<u8>;

/// Hard cap on the byte buffer of a single evaluation. A draw that would grow
/// the buffer past this terminates the evaluation as [`Status::Overrun`].
pub const BUFFER_CAP: usize = 8 * 1024;

// ============================================================================
// Labels
// ============================================================================

/// Interned identifier for a nested scope of draws.
///
/// Labels mark structure the shrinker exploits: same-label sibling spans are
/// candidates for deletion, sorting, merging, and reordering. User-facing
/// labels are derived stably from a static name; a handful of small reserved
/// ids tag the primitive draws themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl Label {
    /// Span of a `draw_bits` call.
    pub const BITS: Label = Label(1);
    /// Span of a `draw_bytes` call.
    pub const BYTES: Label = Label(2);
    /// Span of a `weighted` coin flip.
    pub const COIN: Label = Label(3);
    /// Span of a `biased_u64` draw (wraps its length and value sub-draws).
    pub const BIASED: Label = Label(4);

    /// Derive a label from a static name. Stable across runs and processes:
    /// the id is the first four bytes of the BLAKE3 digest of the name, with
    /// the reserved low range avoided.
    pub fn new(name: &str) -> Label {
        let digest = blake3::hash(name.as_bytes());
        let raw = u32::from_be_bytes(digest.as_bytes()[..4].try_into().expect("digest is 32 bytes"));
        // Keep clear of the reserved primitive ids.
        Label(raw | 0x100)
    }

    /// Access the underlying id.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

// ============================================================================
// Spans
// ============================================================================

/// A half-open interval `[start, end)` of the choice sequence, tagged with
/// the label and nesting depth it was drawn under.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Span {
    /// Label of the scope or primitive that produced this span.
    pub label: Label,
    /// Nesting depth at open time (0 for top-level draws).
    pub depth: u32,
    /// First byte index covered.
    pub start: usize,
    /// One past the last byte index covered.
    pub end: usize,
}

impl Span {
    /// Byte length of the span.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True when the span covers no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `other` lies strictly inside this span.
    #[inline]
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end && self.len() > other.len()
    }
}

#[derive(Clone, Debug)]
struct OpenSpan {
    label: Label,
    depth: u32,
    start: usize,
    end: Option<usize>,
}

// ============================================================================
// Status and bug keys
// ============================================================================

/// Identifier grouping interesting outcomes believed to be the same bug.
///
/// The default policy keys on the failure kind plus the reporting location
/// (`file:line` of the failing assertion, or the first line of a panic
/// payload). The policy is deliberately replaceable at the runner level and
/// never guessed at beyond that.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BugKey {
    /// Coarse failure kind (e.g. `"panic"`, `"assert"`).
    pub kind: String,
    /// Canonicalized location or message line distinguishing this bug.
    pub location: String,
}

impl BugKey {
    /// Build a key from its two components.
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> BugKey {
        BugKey { kind: kind.into(), location: location.into() }
    }

    /// Stable canonical rendering used for database paths.
    pub fn canonical(&self) -> String {
        format!("{}\u{0}{}", self.kind, self.location)
    }
}

impl fmt::Display for BugKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)
    }
}

/// Classification of a completed evaluation.
///
/// The derived order is load-bearing: `Overrun < Invalid < Valid <
/// Interesting`, and interesting results order among themselves by bug key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    /// The provider ran off the end of a fixed prefix during strict replay,
    /// or exceeded [`BUFFER_CAP`].
    Overrun,
    /// The test rejected this example (assumption failed, filter exhausted).
    Invalid,
    /// The test ran to completion and the property held.
    Valid,
    /// The property failed; the key identifies which bug.
    Interesting(BugKey),
}

/// Copyable discriminant of [`Status`], used where the bug key is irrelevant
/// (tree tagging, statistics).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusKind {
    /// See [`Status::Overrun`].
    Overrun,
    /// See [`Status::Invalid`].
    Invalid,
    /// See [`Status::Valid`].
    Valid,
    /// See [`Status::Interesting`].
    Interesting,
}

impl Status {
    /// The copyable discriminant.
    pub fn kind(&self) -> StatusKind {
        match self {
            Status::Overrun => StatusKind::Overrun,
            Status::Invalid => StatusKind::Invalid,
            Status::Valid => StatusKind::Valid,
            Status::Interesting(_) => StatusKind::Interesting,
        }
    }

    /// True for [`Status::Interesting`] with any key.
    #[inline]
    pub fn is_interesting(&self) -> bool {
        matches!(self, Status::Interesting(_))
    }

    /// The bug key, when interesting.
    pub fn bug_key(&self) -> Option<&BugKey> {
        match self {
            Status::Interesting(key) => Some(key),
            _ => None,
        }
    }
}

// ============================================================================
// Halt: why a draw could not complete
// ============================================================================

/// Abnormal termination of a draw.
///
/// `Overrun` propagates out of primitives when the byte source is exhausted;
/// `Reject` is raised by strategies (`filter` exhaustion, explicit
/// assumption failure) and maps to [`Status::Invalid`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    /// The byte source could not supply the requested bytes.
    Overrun,
    /// The strategy rejected this example.
    Reject,
}

/// Result of a draw: the reified value, or the reason the evaluation stops.
pub type Draw<T> = Result<T, Halt>;

// ============================================================================
// Swarm bias
// ============================================================================

/// Distribution knobs decoded from a swarm parameter (see the generator).
///
/// Bias shapes only the *entropy source* in random mode: with probability
/// `zero_pull` a value draw emits all-zero bytes, and continuation coins are
/// flipped with scaled odds before the recorded byte is chosen to match the
/// outcome. Recorded bytes always decode the same way with or without bias.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bias {
    /// Probability in `[0, 1)` that a `draw_bits`/`draw_bytes` call emits
    /// all-zero bytes.
    pub zero_pull: f64,
    /// Multiplier on the success probability of `weighted` coins, clamped to
    /// keep the effective probability inside `[0, 0.999]`.
    pub coin_scale: f64,
}

impl Default for Bias {
    fn default() -> Self {
        Bias { zero_pull: 0.0, coin_scale: 1.0 }
    }
}

// ============================================================================
// Byte generator
// ============================================================================

#[derive(Debug)]
enum BitGenerator {
    /// Fresh generation from entropy.
    Random(Box<ChaCha8Rng>),
    /// Replay a prefix, then continue from entropy.
    Prefixed { prefix: ByteSeq, rng: Box<ChaCha8Rng> },
    /// Strict replay: exhaustion is an overrun.
    Recorded { bytes: ByteSeq },
}

// ============================================================================
// Data provider
// ============================================================================

/// The live data provider for one evaluation.
///
/// Created per candidate, used once, and decayed into a [`TestResult`] via
/// [`DataSource::into_result`].
#[derive(Debug)]
pub struct DataSource {
    source: BitGenerator,
    cursor: usize,
    buffer: ByteSeq,
    spans: Vec<OpenSpan>,
    stack: Vec<usize>,
    events: BTreeSet<String>,
    bias: Bias,
    cap: usize,
    started: Instant,
}

impl DataSource {
    fn new(source: BitGenerator) -> DataSource {
        DataSource {
            source,
            cursor: 0,
            buffer: ByteSeq::new(),
            spans: Vec::new(),
            stack: Vec::new(),
            events: BTreeSet::new(),
            bias: Bias::default(),
            cap: BUFFER_CAP,
            started: Instant::now(),
        }
    }

    /// Fresh generation from a seeded RNG.
    pub fn from_rng(rng: ChaCha8Rng) -> DataSource {
        DataSource::new(BitGenerator::Random(Box::new(rng)))
    }

    /// Replay `prefix`, then continue drawing from `rng`.
    pub fn with_prefix(prefix: ByteSeq, rng: ChaCha8Rng) -> DataSource {
        DataSource::new(BitGenerator::Prefixed { prefix, rng: Box::new(rng) })
    }

    /// Strict replay of `bytes`; running past the end overruns.
    pub fn from_recorded(bytes: ByteSeq) -> DataSource {
        DataSource::new(BitGenerator::Recorded { bytes })
    }

    /// Install swarm bias for this evaluation (random tail only).
    pub fn set_bias(&mut self, bias: Bias) {
        self.bias = bias;
    }

    /// Bytes emitted so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True before the first draw.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Record a user-facing event tag for statistics.
    pub fn event(&mut self, tag: impl Into<String>) {
        self.events.insert(tag.into());
    }

    // ------------------------------------------------------------------
    // Span discipline
    // ------------------------------------------------------------------

    /// Open a labeled scope. Must be balanced by [`DataSource::end_span`].
    pub fn begin_span(&mut self, label: Label) {
        let depth = self.stack.len() as u32;
        let idx = self.spans.len();
        self.spans.push(OpenSpan { label, depth, start: self.buffer.len(), end: None });
        self.stack.push(idx);
    }

    /// Close the innermost open scope.
    pub fn end_span(&mut self) {
        let idx = self.stack.pop().expect("span stack underflow: end_span without begin_span");
        self.spans[idx].end = Some(self.buffer.len());
    }

    /// Run `f` inside a labeled scope, closing it on both success and halt.
    pub fn scope<T>(&mut self, label: Label, f: impl FnOnce(&mut DataSource) -> Draw<T>) -> Draw<T> {
        self.begin_span(label);
        let out = f(self);
        self.end_span();
        out
    }

    // ------------------------------------------------------------------
    // Byte plumbing
    // ------------------------------------------------------------------

    /// Append `n` bytes from the source, honoring strict replay and the
    /// buffer cap. Returns the index range of the new bytes.
    fn fill(&mut self, n: usize, zero_ok: bool) -> Draw<(usize, usize)> {
        if self.buffer.len() + n > self.cap {
            return Err(Halt::Overrun);
        }
        let start = self.buffer.len();
        match &mut self.source {
            BitGenerator::Recorded { bytes } => {
                if self.cursor + n > bytes.len() {
                    return Err(Halt::Overrun);
                }
                self.buffer.extend_from_slice(&bytes[self.cursor..self.cursor + n]);
                self.cursor += n;
            }
            BitGenerator::Prefixed { prefix, rng } => {
                let from_prefix = n.min(prefix.len().saturating_sub(self.cursor));
                self.buffer.extend_from_slice(&prefix[self.cursor..self.cursor + from_prefix]);
                self.cursor += from_prefix;
                let tail = n - from_prefix;
                if tail > 0 {
                    if zero_ok && self.bias.zero_pull > 0.0 && rng.gen_bool(self.bias.zero_pull) {
                        self.buffer.resize(start + n, 0);
                    } else {
                        for _ in 0..tail {
                            self.buffer.push(rng.gen());
                        }
                    }
                }
            }
            BitGenerator::Random(rng) => {
                if zero_ok && self.bias.zero_pull > 0.0 && rng.gen_bool(self.bias.zero_pull) {
                    self.buffer.resize(start + n, 0);
                } else {
                    for _ in 0..n {
                        self.buffer.push(rng.gen());
                    }
                }
            }
        }
        Ok((start, start + n))
    }

    /// Fetch the single byte backing a `weighted(p)` coin with threshold `t`
    /// (true iff `byte < t`). When the byte comes from entropy and bias is
    /// active, the outcome is flipped with scaled odds first and a byte
    /// consistent with it is recorded, so replay decodes identically.
    fn coin_byte(&mut self, t: u16) -> Draw<u8> {
        let biased = (self.bias.coin_scale - 1.0).abs() > f64::EPSILON && t > 0 && t < 256;
        if biased {
            if self.buffer.len() >= self.cap {
                return Err(Halt::Overrun);
            }
            let p = f64::from(t) / 256.0;
            let scaled = (p * self.bias.coin_scale).clamp(0.0, 0.999);
            let cursor = self.cursor;
            let byte = match &mut self.source {
                BitGenerator::Random(rng) => Some(Self::biased_coin_byte(rng, scaled, t)),
                BitGenerator::Prefixed { prefix, rng } if cursor >= prefix.len() => {
                    Some(Self::biased_coin_byte(rng, scaled, t))
                }
                _ => None,
            };
            if let Some(byte) = byte {
                self.buffer.push(byte);
                return Ok(byte);
            }
        }
        let (start, _) = self.fill(1, false)?;
        Ok(self.buffer[start])
    }

    fn biased_coin_byte(rng: &mut ChaCha8Rng, scaled: f64, t: u16) -> u8 {
        if rng.gen_bool(scaled) {
            rng.gen_range(0..t) as u8
        } else {
            rng.gen_range(t..256) as u8
        }
    }

    // ------------------------------------------------------------------
    // Primitive draws
    // ------------------------------------------------------------------

    /// Draw an unsigned integer in `[0, 2^n)`, consuming `⌈n/8⌉` bytes.
    ///
    /// Bytes are interpreted big-endian with the excess high bits of the
    /// leading byte masked off, so all-zero bytes decode to zero.
    pub fn draw_bits(&mut self, n: u32) -> Draw<u64> {
        assert!(n <= 64, "draw_bits supports at most 64 bits (got {n})");
        if n == 0 {
            return Ok(0);
        }
        self.begin_span(Label::BITS);
        let n_bytes = ((n + 7) / 8) as usize;
        let out = self.fill(n_bytes, true).map(|(start, end)| {
            let mut value: u64 = 0;
            for &b in &self.buffer[start..end] {
                value = (value << 8) | u64::from(b);
            }
            if n < 64 {
                value &= (1u64 << n) - 1;
            }
            value
        });
        self.end_span();
        out
    }

    /// Draw `k` raw bytes.
    pub fn draw_bytes(&mut self, k: usize) -> Draw<Vec<u8>> {
        self.begin_span(Label::BYTES);
        let out = self.fill(k, true).map(|(start, end)| self.buffer[start..end].to_vec());
        self.end_span();
        out
    }

    /// Weighted coin: consumes one byte `b`, true iff `b < ⌈p·256⌉`.
    ///
    /// `p <= 0` is always false and `p >= 1` always true, but the byte is
    /// consumed either way so replay stays aligned.
    pub fn weighted(&mut self, p: f64) -> Draw<bool> {
        let t = if p <= 0.0 {
            0u16
        } else if p >= 1.0 {
            256u16
        } else {
            (p * 256.0).ceil() as u16
        };
        self.begin_span(Label::COIN);
        let out = self.coin_byte(t).map(|b| u16::from(b) < t);
        self.end_span();
        out
    }

    /// Variable-width unsigned draw for unbounded ranges: a 3-bit length
    /// prefix selects how many value bytes follow (0..=7), so small values
    /// occupy short, zero-heavy encodings.
    pub fn biased_u64(&mut self) -> Draw<u64> {
        self.scope(Label::BIASED, |src| {
            let len = src.draw_bits(3)?;
            src.draw_bits(8 * len as u32)
        })
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Decay into an immutable [`TestResult`]. Open spans (possible when the
    /// evaluation halted mid-draw) are closed at the buffer end so the span
    /// structure stays well nested.
    pub fn into_result(self, status: Status) -> TestResult {
        let len = self.buffer.len();
        let runtime = self.started.elapsed();
        let spans = self
            .spans
            .into_iter()
            .map(|s| Span { label: s.label, depth: s.depth, start: s.start, end: s.end.unwrap_or(len) })
            .collect();
        TestResult {
            bytes: self.buffer,
            status,
            spans,
            events: self.events,
            runtime,
            repr: None,
        }
    }
}

// ============================================================================
// Test results
// ============================================================================

/// The immutable record of one completed evaluation.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The full choice sequence.
    pub bytes: ByteSeq,
    /// Final classification.
    pub status: Status,
    /// All recorded spans, in open order (parents before children).
    pub spans: Vec<Span>,
    /// User-reported event tags.
    pub events: BTreeSet<String>,
    /// Wall-clock time of the evaluation.
    pub runtime: Duration,
    /// Debug rendering of the reified values, when captured by the runner.
    pub repr: Option<String>,
}

impl TestResult {
    /// Leaf spans (spans containing no other span), sorted by start. For a
    /// completed evaluation these partition `[0, len)` apart from
    /// zero-length spans, which are dropped. When a scope covers exactly one
    /// primitive, the two spans share an interval; only the innermost is
    /// kept.
    pub fn leaf_blocks(&self) -> Vec<Span> {
        let mut sorted: Vec<Span> = self.spans.iter().copied().filter(|s| !s.is_empty()).collect();
        sorted.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(b.depth.cmp(&a.depth))
        });
        let mut leaves: Vec<Span> = Vec::new();
        for (i, span) in sorted.iter().enumerate() {
            let has_child = sorted[i + 1..]
                .iter()
                .take_while(|next| next.start < span.end)
                .any(|next| span.contains(next));
            if !has_child {
                leaves.push(*span);
            }
        }
        // Equal intervals sort deepest-first; keep that one.
        leaves.dedup_by(|later, first| later.start == first.start && later.end == first.end);
        leaves
    }
}

impl PartialEq for TestResult {
    fn eq(&self, other: &TestResult) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for TestResult {}

impl PartialOrd for TestResult {
    fn partial_cmp(&self, other: &TestResult) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestResult {
    /// Shortlex: length first, then lexicographic.
    fn cmp(&self, other: &TestResult) -> std::cmp::Ordering {
        self.bytes.len().cmp(&other.bytes.len()).then_with(|| self.bytes.cmp(&other.bytes))
    }
}

/// Shortlex comparison on raw byte sequences.
pub fn shortlex_less(a: &[u8], b: &[u8]) -> bool {
    (a.len(), a) < (b.len(), b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    #[test]
    fn draw_bits_masks_to_requested_width() {
        let mut src = DataSource::from_recorded(vec![0xFF, 0xFF]);
        let v = src.draw_bits(10).unwrap();
        assert_eq!(v, 0x3FF);
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn strict_replay_overruns_at_end_of_prefix() {
        let mut src = DataSource::from_recorded(vec![1, 2]);
        assert_eq!(src.draw_bits(16).unwrap(), 0x0102);
        assert_eq!(src.draw_bits(8), Err(Halt::Overrun));
    }

    #[test]
    fn prefixed_source_extends_with_entropy() {
        let mut src = DataSource::with_prefix(vec![7], rng(1));
        assert_eq!(src.draw_bits(8).unwrap(), 7);
        // Past the prefix: still succeeds, bytes come from the RNG.
        src.draw_bits(32).unwrap();
        assert_eq!(src.len(), 5);
    }

    #[test]
    fn replay_is_deterministic() {
        let mut a = DataSource::from_rng(rng(42));
        let x = a.draw_bits(32).unwrap();
        let y = a.biased_u64().unwrap();
        let result = a.into_result(Status::Valid);

        let mut b = DataSource::from_recorded(result.bytes.clone());
        assert_eq!(b.draw_bits(32).unwrap(), x);
        assert_eq!(b.biased_u64().unwrap(), y);
        let replayed = b.into_result(Status::Valid);
        assert_eq!(replayed.bytes, result.bytes);
        assert_eq!(replayed.spans, result.spans);
    }

    #[test]
    fn weighted_interprets_byte_against_threshold() {
        let mut src = DataSource::from_recorded(vec![0, 255, 100]);
        assert!(src.weighted(0.5).unwrap());
        assert!(!src.weighted(0.5).unwrap());
        // 100 < ceil(0.5 * 256) = 128.
        assert!(src.weighted(0.5).unwrap());
    }

    #[test]
    fn weighted_extremes_still_consume_a_byte() {
        let mut src = DataSource::from_recorded(vec![0, 0]);
        assert!(!src.weighted(0.0).unwrap());
        assert!(src.weighted(1.0).unwrap());
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn leaf_blocks_partition_the_buffer() {
        let mut src = DataSource::from_rng(rng(3));
        let list_label = Label::new("list");
        src.begin_span(list_label);
        for _ in 0..3 {
            src.weighted(0.9).unwrap();
            src.draw_bits(16).unwrap();
        }
        src.end_span();
        src.draw_bits(8).unwrap();
        let result = src.into_result(Status::Valid);

        let leaves = result.leaf_blocks();
        let mut pos = 0;
        for leaf in &leaves {
            assert_eq!(leaf.start, pos, "leaves must be contiguous");
            pos = leaf.end;
        }
        assert_eq!(pos, result.bytes.len());
    }

    #[test]
    fn open_spans_are_closed_on_halt() {
        let mut src = DataSource::from_recorded(vec![1]);
        src.begin_span(Label::new("outer"));
        let _ = src.draw_bits(8);
        // Next draw overruns with the outer span still open.
        assert_eq!(src.draw_bits(8), Err(Halt::Overrun));
        let result = src.into_result(Status::Overrun);
        assert!(result.spans.iter().all(|s| s.end <= result.bytes.len()));
    }

    #[test]
    fn status_order_is_total_and_as_documented() {
        let bug = || Status::Interesting(BugKey::new("panic", "lib.rs:1"));
        assert!(Status::Overrun < Status::Invalid);
        assert!(Status::Invalid < Status::Valid);
        assert!(Status::Valid < bug());
    }

    #[test]
    fn test_results_order_shortlex() {
        let short = DataSource::from_recorded(vec![9, 9]);
        let mut s = short;
        s.draw_bits(16).unwrap();
        let short = s.into_result(Status::Valid);

        let mut l = DataSource::from_recorded(vec![0, 0, 0]);
        l.draw_bits(24).unwrap();
        let long = l.into_result(Status::Valid);

        assert!(short < long, "shorter beats lexicographically smaller");
        assert!(shortlex_less(&[9, 9], &[0, 0, 0]));
        assert!(shortlex_less(&[0, 1], &[0, 2]));
    }

    #[test]
    fn labels_are_stable_and_avoid_reserved_range() {
        assert_eq!(Label::new("collection"), Label::new("collection"));
        assert_ne!(Label::new("a"), Label::new("b"));
        assert!(Label::new("anything").as_u32() >= 0x100);
    }

    #[test]
    fn buffer_cap_halts_runaway_draws() {
        let mut src = DataSource::from_rng(rng(5));
        loop {
            match src.draw_bytes(1024) {
                Ok(_) => continue,
                Err(Halt::Overrun) => break,
                Err(other) => panic!("unexpected halt {other:?}"),
            }
        }
        assert!(src.len() <= BUFFER_CAP);
    }
}
