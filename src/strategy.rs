//! Strategy contract and combinators
//!
//! A strategy is a parser of the choice sequence: given a [`DataSource`] it
//! consumes bytes and produces a value. Generation, replay, and shrinking are
//! all uniform over bytes, so strategies carry **no shrinking logic** at all;
//! the shrinker works on spans and bytes alone.
//!
//! The contract is the single method [`Strategy::do_draw`], plus eager
//! argument validation ([`Strategy::validate`]) and a conservative emptiness
//! predicate ([`Strategy::is_empty`]). Everything else here is combinators
//! (`map`, `filter`, `flat_map`, `one_of`, tuples, collections, `recursive`)
//! and a small kernel of concrete strategies defined in terms of them.
//!
//! Strategies are cheaply clonable: closures are held behind `Arc`, and
//! [`BoxedStrategy`] is an `Arc`-backed erased handle.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::data::{DataSource, Draw, Halt, Label};

/// Number of fresh draws a `filter` (or uniqueness retry) attempts before
/// rejecting the whole example. Filters are not a search primitive.
pub const FILTER_RETRIES: u32 = 3;

/// A strategy factory received an argument outside its contract.
///
/// Surfaced to the user before any generation happens; this aborts the test
/// rather than failing it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid strategy argument: {0}")]
pub struct InvalidArgument(pub String);

// ============================================================================
// The contract
// ============================================================================

/// A parser of choice-sequence bytes into values of type `Value`.
pub trait Strategy {
    /// The type of value this strategy produces.
    type Value;

    /// Draw one value, consuming bytes from `source`. May halt with
    /// [`Halt::Overrun`] (byte source exhausted) or [`Halt::Reject`]
    /// (this example is unacceptable, evaluation becomes INVALID).
    fn do_draw(&self, source: &mut DataSource) -> Draw<Self::Value>;

    /// Eager argument validation. Called once before the first draw.
    fn validate(&self) -> Result<(), InvalidArgument> {
        Ok(())
    }

    /// Conservative emptiness: `true` only when the strategy provably
    /// produces no values.
    fn is_empty(&self) -> bool {
        false
    }

    /// Transform drawn values with a pure function.
    fn map<T, F>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Value) -> T,
    {
        Map { source: self, f: Arc::new(f) }
    }

    /// Keep only values satisfying `pred`, retrying a bounded number of
    /// times before rejecting the example.
    fn filter<F>(self, pred: F) -> Filter<Self, F>
    where
        Self: Sized,
        F: Fn(&Self::Value) -> bool,
    {
        Filter { source: self, pred: Arc::new(pred) }
    }

    /// Choose a second strategy from the drawn value and draw from it. The
    /// continuation's draws consume subsequent bytes of the same sequence,
    /// so shrinking the first draw may change what the continuation parses;
    /// shrink quality through `flat_map` is accordingly weaker.
    fn flat_map<K, F>(self, f: F) -> FlatMap<Self, F>
    where
        Self: Sized,
        K: Strategy,
        F: Fn(Self::Value) -> K,
    {
        FlatMap { source: self, f: Arc::new(f) }
    }

    /// Erase the concrete type behind a cheaply clonable handle.
    fn boxed(self) -> BoxedStrategy<Self::Value>
    where
        Self: Sized + 'static,
    {
        BoxedStrategy(Arc::new(self))
    }
}

// ============================================================================
// Boxed strategies
// ============================================================================

trait DynStrategy<T> {
    fn dyn_draw(&self, source: &mut DataSource) -> Draw<T>;
    fn dyn_validate(&self) -> Result<(), InvalidArgument>;
    fn dyn_is_empty(&self) -> bool;
}

impl<S: Strategy> DynStrategy<S::Value> for S {
    fn dyn_draw(&self, source: &mut DataSource) -> Draw<S::Value> {
        self.do_draw(source)
    }
    fn dyn_validate(&self) -> Result<(), InvalidArgument> {
        self.validate()
    }
    fn dyn_is_empty(&self) -> bool {
        self.is_empty()
    }
}

/// Type-erased, clonable strategy handle.
pub struct BoxedStrategy<T>(Arc<dyn DynStrategy<T>>);

impl<T> Clone for BoxedStrategy<T> {
    fn clone(&self) -> Self {
        BoxedStrategy(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for BoxedStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedStrategy")
    }
}

impl<T> Strategy for BoxedStrategy<T> {
    type Value = T;

    fn do_draw(&self, source: &mut DataSource) -> Draw<T> {
        self.0.dyn_draw(source)
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.0.dyn_validate()
    }
    fn is_empty(&self) -> bool {
        self.0.dyn_is_empty()
    }
}

// ============================================================================
// Index draws shared by choice-shaped strategies
// ============================================================================

/// Draw an index in `[0, n)`. Rejection-sampled over the smallest covering
/// bit width with a bounded retry budget, then reduced modulo `n`, so an
/// all-zero block decodes to index 0 and the shrinker's byte-minimization
/// prefers earlier alternatives.
pub(crate) fn draw_index(source: &mut DataSource, n: usize) -> Draw<usize> {
    debug_assert!(n > 0, "draw_index requires a non-empty choice set");
    if n == 1 {
        // Single alternative: consume nothing, structure stays replayable.
        return Ok(0);
    }
    let bits = usize::BITS - (n - 1).leading_zeros();
    let mut last = 0usize;
    for _ in 0..FILTER_RETRIES {
        last = source.draw_bits(bits)? as usize;
        if last < n {
            return Ok(last);
        }
    }
    Ok(last % n)
}

// ============================================================================
// Core combinators
// ============================================================================

/// Strategy producing exactly one value, consuming no bytes.
#[derive(Clone, Debug)]
pub struct Just<T: Clone>(pub T);

impl<T: Clone> Strategy for Just<T> {
    type Value = T;

    fn do_draw(&self, _source: &mut DataSource) -> Draw<T> {
        Ok(self.0.clone())
    }
}

/// See [`Strategy::map`].
pub struct Map<S, F: ?Sized> {
    source: S,
    f: Arc<F>,
}

impl<S: Clone, F: ?Sized> Clone for Map<S, F> {
    fn clone(&self) -> Self {
        Map { source: self.source.clone(), f: Arc::clone(&self.f) }
    }
}

impl<S, T, F> Strategy for Map<S, F>
where
    S: Strategy,
    F: Fn(S::Value) -> T,
{
    type Value = T;

    fn do_draw(&self, source: &mut DataSource) -> Draw<T> {
        self.source.do_draw(source).map(|v| (self.f)(v))
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.source.validate()
    }
    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

/// See [`Strategy::filter`].
pub struct Filter<S, F: ?Sized> {
    source: S,
    pred: Arc<F>,
}

impl<S: Clone, F: ?Sized> Clone for Filter<S, F> {
    fn clone(&self) -> Self {
        Filter { source: self.source.clone(), pred: Arc::clone(&self.pred) }
    }
}

impl<S, F> Strategy for Filter<S, F>
where
    S: Strategy,
    F: Fn(&S::Value) -> bool,
{
    type Value = S::Value;

    fn do_draw(&self, source: &mut DataSource) -> Draw<S::Value> {
        for _ in 0..=FILTER_RETRIES {
            let value = self.source.do_draw(source)?;
            if (self.pred)(&value) {
                return Ok(value);
            }
        }
        source.event("filter.exhausted");
        Err(Halt::Reject)
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.source.validate()
    }
    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

/// See [`Strategy::flat_map`].
pub struct FlatMap<S, F: ?Sized> {
    source: S,
    f: Arc<F>,
}

impl<S: Clone, F: ?Sized> Clone for FlatMap<S, F> {
    fn clone(&self) -> Self {
        FlatMap { source: self.source.clone(), f: Arc::clone(&self.f) }
    }
}

impl<S, K, F> Strategy for FlatMap<S, F>
where
    S: Strategy,
    K: Strategy,
    F: Fn(S::Value) -> K,
{
    type Value = K::Value;

    fn do_draw(&self, source: &mut DataSource) -> Draw<K::Value> {
        let first = self.source.do_draw(source)?;
        (self.f)(first).do_draw(source)
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.source.validate()
    }
    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

/// Uniform choice among alternative strategies of the same value type.
#[derive(Clone)]
pub struct OneOf<T> {
    options: Vec<BoxedStrategy<T>>,
    label: Label,
}

/// Choose among `options`, preferring earlier alternatives under shrinking.
pub fn one_of<T>(options: Vec<BoxedStrategy<T>>) -> OneOf<T> {
    OneOf { options, label: Label::new("one_of") }
}

impl<T> Strategy for OneOf<T> {
    type Value = T;

    fn do_draw(&self, source: &mut DataSource) -> Draw<T> {
        let live: Vec<&BoxedStrategy<T>> =
            self.options.iter().filter(|o| !o.is_empty()).collect();
        if live.is_empty() {
            return Err(Halt::Reject);
        }
        source.scope(self.label, |src| {
            let idx = draw_index(src, live.len())?;
            live[idx].do_draw(src)
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.options.is_empty() {
            return Err(InvalidArgument("one_of requires at least one alternative".into()));
        }
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
    fn is_empty(&self) -> bool {
        self.options.iter().all(Strategy::is_empty)
    }
}

// ============================================================================
// Tuples
// ============================================================================

macro_rules! tuple_strategy {
    ($($name:ident)+) => {
        impl<$($name: Strategy),+> Strategy for ($($name,)+) {
            type Value = ($($name::Value,)+);

            #[allow(non_snake_case)]
            fn do_draw(&self, source: &mut DataSource) -> Draw<Self::Value> {
                let ($($name,)+) = self;
                Ok(($($name.do_draw(source)?,)+))
            }
            #[allow(non_snake_case)]
            fn validate(&self) -> Result<(), InvalidArgument> {
                let ($($name,)+) = self;
                $($name.validate()?;)+
                Ok(())
            }
            #[allow(non_snake_case)]
            fn is_empty(&self) -> bool {
                let ($($name,)+) = self;
                false $(|| $name.is_empty())+
            }
        }
    };
}

tuple_strategy!(A);
tuple_strategy!(A B);
tuple_strategy!(A B C);
tuple_strategy!(A B C D);

// ============================================================================
// Collections
// ============================================================================

/// Inclusive size bounds for collection strategies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SizeRange {
    /// Minimum number of elements.
    pub min: usize,
    /// Maximum number of elements.
    pub max: usize,
}

impl From<usize> for SizeRange {
    fn from(n: usize) -> SizeRange {
        SizeRange { min: n, max: n }
    }
}

impl From<RangeInclusive<usize>> for SizeRange {
    fn from(r: RangeInclusive<usize>) -> SizeRange {
        SizeRange { min: *r.start(), max: *r.end() }
    }
}

impl SizeRange {
    fn default_average(&self) -> f64 {
        self.min as f64 + ((self.max - self.min).min(10) as f64) / 2.0
    }

    /// Continuation probability giving the requested expected size: after
    /// the mandatory `min` elements each extra element costs one geometric
    /// trial, so `E[extra] = p / (1 - p)`.
    fn p_continue(&self, average: f64) -> f64 {
        let extra = (average - self.min as f64).max(0.0);
        (extra / (1.0 + extra)).clamp(0.0, 0.99)
    }
}

/// Variable-length collection of draws from an element strategy.
///
/// Each optional element is guarded by a continuation coin, and the coin and
/// element share one labeled span, so the deletion pass removes an element
/// together with its guard in a single candidate.
#[derive(Clone)]
pub struct VecStrategy<S> {
    element: S,
    size: SizeRange,
    average: f64,
    label: Label,
}

/// Collection of `size` draws from `element`.
pub fn vecs<S: Strategy>(element: S, size: impl Into<SizeRange>) -> VecStrategy<S> {
    let size = size.into();
    VecStrategy { element, size, average: size.default_average(), label: Label::new("vec") }
}

impl<S> VecStrategy<S> {
    /// Override the expected (average) collection size.
    pub fn with_average(mut self, average: f64) -> Self {
        self.average = average;
        self
    }
}

impl<S: Strategy> Strategy for VecStrategy<S> {
    type Value = Vec<S::Value>;

    fn do_draw(&self, source: &mut DataSource) -> Draw<Vec<S::Value>> {
        let p = self.size.p_continue(self.average);
        source.scope(self.label, |src| {
            let mut out = Vec::with_capacity(self.size.min);
            for _ in 0..self.size.min {
                let v = src.scope(self.label, |s| self.element.do_draw(s))?;
                out.push(v);
            }
            while out.len() < self.size.max {
                let next = src.scope(self.label, |s| {
                    if !s.weighted(p)? {
                        return Ok(None);
                    }
                    self.element.do_draw(s).map(Some)
                })?;
                match next {
                    Some(v) => out.push(v),
                    None => break,
                }
            }
            Ok(out)
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.size.min > self.size.max {
            return Err(InvalidArgument(format!(
                "collection min size {} exceeds max size {}",
                self.size.min, self.size.max
            )));
        }
        self.element.validate()?;
        if self.size.min > 0 && self.element.is_empty() {
            return Err(InvalidArgument(
                "non-empty collection over a provably empty element strategy".into(),
            ));
        }
        Ok(())
    }
}

/// Collection whose elements must be pairwise distinct. A duplicate draw
/// gets one filter-style retry; a second duplicate ends the collection early
/// (or rejects, if still under the minimum size).
#[derive(Clone)]
pub struct UniqueVec<S> {
    inner: VecStrategy<S>,
}

/// Collection of distinct draws from `element`.
pub fn unique_vecs<S>(element: S, size: impl Into<SizeRange>) -> UniqueVec<S>
where
    S: Strategy,
    S::Value: Eq + Hash + Clone,
{
    UniqueVec { inner: vecs(element, size) }
}

impl<S> Strategy for UniqueVec<S>
where
    S: Strategy,
    S::Value: Eq + Hash + Clone,
{
    type Value = Vec<S::Value>;

    fn do_draw(&self, source: &mut DataSource) -> Draw<Vec<S::Value>> {
        let size = self.inner.size;
        let p = size.p_continue(self.inner.average);
        let label = self.inner.label;
        source.scope(label, |src| {
            let mut out = Vec::with_capacity(size.min);
            let mut seen: HashSet<S::Value> = HashSet::new();
            'outer: while out.len() < size.max {
                if out.len() >= size.min {
                    let more = src.scope(label, |s| s.weighted(p))?;
                    if !more {
                        break;
                    }
                }
                for retry in 0..=1 {
                    let v = src.scope(label, |s| self.inner.element.do_draw(s))?;
                    if seen.insert(v.clone()) {
                        out.push(v);
                        continue 'outer;
                    }
                    if retry == 1 {
                        if out.len() >= size.min {
                            break 'outer;
                        }
                        src.event("unique.exhausted");
                        return Err(Halt::Reject);
                    }
                }
            }
            Ok(out)
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.inner.validate()
    }
}

// ============================================================================
// Recursion
// ============================================================================

/// Recursive strategy with a bounded expansion depth.
#[derive(Clone)]
pub struct Recursive<T> {
    tower: BoxedStrategy<T>,
}

/// Build a recursive strategy: values are drawn from `base`, or from
/// `extend` applied to the strategy one level shallower, with earlier (and
/// therefore simpler) alternatives preferred under shrinking. The tower is
/// materialized up front, so draws never recurse past `max_depth`.
pub fn recursive<T, F>(base: BoxedStrategy<T>, extend: F, max_depth: u32) -> Recursive<T>
where
    T: 'static,
    F: Fn(BoxedStrategy<T>) -> BoxedStrategy<T>,
{
    let mut tower = base.clone();
    for _ in 0..max_depth {
        tower = one_of(vec![base.clone(), extend(tower)]).boxed();
    }
    Recursive { tower }
}

impl<T> Strategy for Recursive<T> {
    type Value = T;

    fn do_draw(&self, source: &mut DataSource) -> Draw<T> {
        self.tower.do_draw(source)
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        self.tower.validate()
    }
    fn is_empty(&self) -> bool {
        self.tower.is_empty()
    }
}

// ============================================================================
// Kernel strategies
// ============================================================================

/// Booleans, with `false` as the simplest value.
#[derive(Clone, Copy, Debug)]
pub struct Booleans;

/// Either boolean; an all-zero block decodes to `false`.
pub fn booleans() -> Booleans {
    Booleans
}

impl Strategy for Booleans {
    type Value = bool;

    fn do_draw(&self, source: &mut DataSource) -> Draw<bool> {
        Ok(source.draw_bits(1)? == 1)
    }
}

/// Bounded signed integers, shrinking toward zero when the range allows.
#[derive(Clone, Debug)]
pub struct Integers {
    lo: i64,
    hi: i64,
    label: Label,
}

/// Integers in the inclusive range.
pub fn integers(range: RangeInclusive<i64>) -> Integers {
    Integers { lo: *range.start(), hi: *range.end(), label: Label::new("integer") }
}

impl Integers {
    /// Shrink origin: zero when it lies inside the range, the nearer bound
    /// otherwise. Index 0 of the encoded draw decodes to this value.
    fn origin(&self) -> i64 {
        0i64.clamp(self.lo, self.hi)
    }

    /// Decode a draw index into a value, spiraling outward from the origin
    /// (`origin, +1, -1, +2, -2, …`) and continuing on the unexhausted side
    /// once one bound is reached.
    fn value_at(&self, index: u64) -> i64 {
        let origin = self.origin() as i128;
        let up = self.hi as i128 - origin;
        let down = origin - self.lo as i128;
        let both = 2 * up.min(down);
        let d = index as i128;
        let v = if d <= both {
            if d == 0 {
                origin
            } else if d % 2 == 1 {
                origin + (d + 1) / 2
            } else {
                origin - d / 2
            }
        } else {
            let rem = d - both;
            if up > down {
                origin + (up.min(down) + rem)
            } else {
                origin - (up.min(down) + rem)
            }
        };
        v as i64
    }

    fn span_size(&self) -> u128 {
        (self.hi as i128 - self.lo as i128 + 1) as u128
    }
}

impl Strategy for Integers {
    type Value = i64;

    fn do_draw(&self, source: &mut DataSource) -> Draw<i64> {
        source.scope(self.label, |src| {
            let size = self.span_size();
            let index = if size > u128::from(u64::MAX) {
                src.draw_bits(64)?
            } else {
                let size = size as u64;
                let bits = 64 - (size - 1).leading_zeros();
                let mut last = 0u64;
                let mut hit = false;
                for _ in 0..FILTER_RETRIES {
                    last = src.draw_bits(bits)?;
                    if last < size {
                        hit = true;
                        break;
                    }
                }
                if hit {
                    last
                } else {
                    last % size
                }
            };
            Ok(self.value_at(index))
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.lo > self.hi {
            return Err(InvalidArgument(format!(
                "integer range is empty: {}..={}",
                self.lo, self.hi
            )));
        }
        Ok(())
    }
}

/// Unbounded unsigned integers via the variable-width encoding, so small
/// values dominate and shrink cheaply.
#[derive(Clone, Copy, Debug)]
pub struct U64s;

/// Any `u64`; the byte encoding strongly favors small values.
pub fn u64s() -> U64s {
    U64s
}

impl Strategy for U64s {
    type Value = u64;

    fn do_draw(&self, source: &mut DataSource) -> Draw<u64> {
        source.biased_u64()
    }
}

/// Raw byte vectors with bounded length.
#[derive(Clone, Debug)]
pub struct BytesOf {
    size: SizeRange,
    label: Label,
}

/// Byte vectors with the given length bounds.
pub fn bytes_of(size: impl Into<SizeRange>) -> BytesOf {
    BytesOf { size: size.into(), label: Label::new("bytes") }
}

impl Strategy for BytesOf {
    type Value = Vec<u8>;

    fn do_draw(&self, source: &mut DataSource) -> Draw<Vec<u8>> {
        let p = self.size.p_continue(self.size.default_average());
        source.scope(self.label, |src| {
            let mut out = src.draw_bytes(self.size.min)?;
            while out.len() < self.size.max {
                let next = src.scope(self.label, |s| {
                    if !s.weighted(p)? {
                        return Ok(None);
                    }
                    s.draw_bytes(1).map(Some)
                })?;
                match next {
                    Some(byte) => out.extend_from_slice(&byte),
                    None => break,
                }
            }
            Ok(out)
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.size.min > self.size.max {
            return Err(InvalidArgument(format!(
                "byte vector min length {} exceeds max length {}",
                self.size.min, self.size.max
            )));
        }
        Ok(())
    }
}

/// Uniform choice from a fixed slice of values.
#[derive(Clone, Debug)]
pub struct SampledFrom<T> {
    options: Vec<T>,
    label: Label,
}

/// One of the given values, preferring earlier entries under shrinking.
pub fn sampled_from<T: Clone>(options: &[T]) -> SampledFrom<T> {
    SampledFrom { options: options.to_vec(), label: Label::new("sampled") }
}

impl<T: Clone> Strategy for SampledFrom<T> {
    type Value = T;

    fn do_draw(&self, source: &mut DataSource) -> Draw<T> {
        if self.options.is_empty() {
            return Err(Halt::Reject);
        }
        source.scope(self.label, |src| {
            let idx = draw_index(src, self.options.len())?;
            Ok(self.options[idx].clone())
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.options.is_empty() {
            return Err(InvalidArgument("sampled_from requires a non-empty slice".into()));
        }
        Ok(())
    }
    fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Printable-ASCII strings; the simplest character is a space.
#[derive(Clone, Debug)]
pub struct AsciiStrings {
    size: SizeRange,
    label: Label,
}

/// Printable-ASCII strings with the given length bounds.
pub fn ascii_strings(size: impl Into<SizeRange>) -> AsciiStrings {
    AsciiStrings { size: size.into(), label: Label::new("ascii") }
}

impl Strategy for AsciiStrings {
    type Value = String;

    fn do_draw(&self, source: &mut DataSource) -> Draw<String> {
        let p = self.size.p_continue(self.size.default_average());
        source.scope(self.label, |src| {
            let mut out = String::new();
            for _ in 0..self.size.min {
                let c = src.scope(self.label, |s| s.draw_bits(7))?;
                out.push((0x20 + (c % 0x5F)) as u8 as char);
            }
            while out.len() < self.size.max {
                let next = src.scope(self.label, |s| {
                    if !s.weighted(p)? {
                        return Ok(None);
                    }
                    s.draw_bits(7).map(Some)
                })?;
                match next {
                    Some(c) => out.push((0x20 + (c % 0x5F)) as u8 as char),
                    None => break,
                }
            }
            Ok(out)
        })
    }
    fn validate(&self) -> Result<(), InvalidArgument> {
        if self.size.min > self.size.max {
            return Err(InvalidArgument(format!(
                "string min length {} exceeds max length {}",
                self.size.min, self.size.max
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Status;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn source(seed: u64) -> DataSource {
        DataSource::from_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    fn zeros(n: usize) -> DataSource {
        DataSource::from_recorded(vec![0; n])
    }

    #[test]
    fn just_consumes_no_bytes() {
        let mut src = source(0);
        assert_eq!(Just(42).do_draw(&mut src).unwrap(), 42);
        assert_eq!(src.len(), 0);
    }

    #[test]
    fn zero_bytes_decode_to_simplest_values() {
        let mut src = zeros(64);
        assert!(!booleans().do_draw(&mut src).unwrap());
        assert_eq!(integers(-100..=100).do_draw(&mut src).unwrap(), 0);
        assert_eq!(integers(5..=9).do_draw(&mut src).unwrap(), 5);
        assert_eq!(integers(-9..=-5).do_draw(&mut src).unwrap(), -5);
        assert_eq!(sampled_from(&["a", "b", "c"]).do_draw(&mut src).unwrap(), "a");
    }

    #[test]
    fn integers_stay_in_bounds_and_cover_spread() {
        let strat = integers(-17..=23);
        let mut seen = HashSet::new();
        for seed in 0..200 {
            let mut src = source(seed);
            let v = strat.do_draw(&mut src).unwrap();
            assert!((-17..=23).contains(&v), "out of range: {v}");
            seen.insert(v);
        }
        assert!(seen.len() > 20, "poor coverage: {} distinct", seen.len());
    }

    #[test]
    fn integer_spiral_is_a_bijection_onto_the_range() {
        let strat = integers(-3..=5);
        let mut values: Vec<i64> = (0..9).map(|i| strat.value_at(i)).collect();
        values.sort_unstable();
        assert_eq!(values, vec![-3, -2, -1, 0, 1, 2, 3, 4, 5]);
        assert_eq!(strat.value_at(0), 0);
        assert_eq!(strat.value_at(1), 1);
        assert_eq!(strat.value_at(2), -1);
    }

    #[test]
    fn empty_integer_range_fails_validation() {
        assert!(integers(5..=4).validate().is_err());
    }

    #[test]
    fn filter_rejects_after_bounded_retries() {
        let strat = integers(0..=100).filter(|_| false);
        let mut src = source(1);
        assert_eq!(strat.do_draw(&mut src), Err(Halt::Reject));
        let result = src.into_result(Status::Invalid);
        assert!(result.events.contains("filter.exhausted"));
    }

    #[test]
    fn filter_passes_matching_values() {
        let strat = integers(0..=100).filter(|v| v % 2 == 0);
        for seed in 0..20 {
            let mut src = source(seed);
            if let Ok(v) = strat.do_draw(&mut src) {
                assert_eq!(v % 2, 0);
            }
        }
    }

    #[test]
    fn one_of_prefers_first_branch_on_zero_bytes() {
        let strat = one_of(vec![Just("first").boxed(), Just("second").boxed()]);
        let mut src = zeros(8);
        assert_eq!(strat.do_draw(&mut src).unwrap(), "first");
    }

    #[test]
    fn one_of_skips_provably_empty_branches() {
        let empty: SampledFrom<u8> = SampledFrom { options: vec![], label: Label::new("sampled") };
        let strat = one_of(vec![empty.boxed(), Just(9u8).boxed()]);
        for seed in 0..10 {
            let mut src = source(seed);
            assert_eq!(strat.do_draw(&mut src).unwrap(), 9);
        }
    }

    #[test]
    fn flat_map_draws_dependently() {
        // Second component always strictly less than the first.
        let strat = integers(1..=50).flat_map(|n| integers(0..=n - 1).map(move |m| (n, m)));
        for seed in 0..50 {
            let mut src = source(seed);
            let (n, m) = strat.do_draw(&mut src).unwrap();
            assert!(m < n, "({n}, {m})");
        }
    }

    #[test]
    fn vec_sizes_respect_bounds() {
        let strat = vecs(booleans(), 2..=6);
        for seed in 0..100 {
            let mut src = source(seed);
            let v = strat.do_draw(&mut src).unwrap();
            assert!((2..=6).contains(&v.len()), "len {}", v.len());
        }
    }

    #[test]
    fn vec_average_tracks_request() {
        let strat = vecs(booleans(), 0..=100).with_average(4.0);
        let mut total = 0usize;
        let runs = 300;
        for seed in 0..runs {
            let mut src = source(seed);
            total += strat.do_draw(&mut src).unwrap().len();
        }
        let mean = total as f64 / runs as f64;
        assert!((2.0..=6.5).contains(&mean), "observed mean {mean}");
    }

    #[test]
    fn unique_vec_has_no_duplicates() {
        let strat = unique_vecs(integers(0..=5), 0..=6);
        for seed in 0..100 {
            let mut src = source(seed);
            if let Ok(v) = strat.do_draw(&mut src) {
                let distinct: HashSet<_> = v.iter().collect();
                assert_eq!(distinct.len(), v.len(), "duplicates in {v:?}");
            }
        }
    }

    #[test]
    fn tuple_draws_components_in_order() {
        let strat = (integers(0..=9), booleans(), ascii_strings(1..=3));
        let mut src = source(7);
        let (n, _, s) = strat.do_draw(&mut src).unwrap();
        assert!((0..=9).contains(&n));
        assert!(!s.is_empty() && s.len() <= 3);
        assert!(s.bytes().all(|b| (0x20..0x7F).contains(&b)));
    }

    #[test]
    fn u64s_favor_small_values_and_decode_zero_to_zero() {
        let mut src = zeros(8);
        assert_eq!(u64s().do_draw(&mut src).unwrap(), 0);
        let mut small = 0usize;
        for seed in 0..200 {
            let mut src = source(seed);
            if u64s().do_draw(&mut src).unwrap() < 1 << 16 {
                small += 1;
            }
        }
        // 3-bit length prefix: ~3/8 of draws have at most two value bytes.
        assert!(small >= 40, "only {small}/200 draws were small");
    }

    #[test]
    fn bytes_of_respects_length_bounds() {
        let strat = bytes_of(2..=5);
        for seed in 0..50 {
            let mut src = source(seed);
            let v = strat.do_draw(&mut src).unwrap();
            assert!((2..=5).contains(&v.len()));
        }
        assert!(bytes_of(9..=3).validate().is_err());
    }

    #[test]
    fn recursive_terminates_within_depth() {
        #[derive(Clone, Debug)]
        enum Tree {
            Leaf(i64),
            Node(Vec<Tree>),
        }
        fn depth(t: &Tree) -> u32 {
            match t {
                Tree::Leaf(_) => 0,
                Tree::Node(children) => 1 + children.iter().map(depth).max().unwrap_or(0),
            }
        }
        let base = integers(0..=10).map(Tree::Leaf).boxed();
        let strat = recursive(base, |inner| vecs(inner, 0..=3).map(Tree::Node).boxed(), 4);
        for seed in 0..50 {
            let mut src = source(seed);
            let t = strat.do_draw(&mut src).unwrap();
            assert!(depth(&t) <= 5, "depth {} too deep", depth(&t));
        }
    }

    #[test]
    fn validation_propagates_through_combinators() {
        let bad = vecs(integers(3..=1), 0..=4).map(|v: Vec<i64>| v.len());
        assert!(bad.validate().is_err(), "element validation is eager");
        let bad = one_of::<i64>(vec![]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn collection_spans_share_one_label_per_element() {
        let strat = vecs(integers(0..=255), 3..=3);
        let mut src = source(11);
        strat.do_draw(&mut src).unwrap();
        let result = src.into_result(Status::Valid);
        let vec_label = Label::new("vec");
        let element_spans =
            result.spans.iter().filter(|s| s.label == vec_label && s.depth == 1).count();
        assert_eq!(element_spans, 3);
    }
}
