//! Swarm-style candidate generation
//!
//! New candidates are not drawn uniformly. Generation runs in two tiers:
//! first pick a **parameter**, a short byte sequence recording biasing
//! knobs decoded into a [`Bias`], then generate a full candidate under
//! that bias. Parameters that keep producing novel VALID examples are
//! reused, which makes the distribution clumpy: once a parameter biased
//! toward, say, mostly-empty collections finds something novel, the engine
//! leans into that corner of the space instead of re-diluting it.
//!
//! Each parameter carries a usefulness score updated as an exponential
//! moving average of rewards (+1 novel valid, 0 duplicate, −1 rejected or
//! overrun). Selection is UCB-flavored with an exploration bonus and an
//! epsilon of uniform choice, so every live parameter keeps non-zero
//! probability while consistently useless ones decay and are evicted.

#![forbid(unsafe_code)]

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::data::Bias;

/// EWMA smoothing for parameter scores.
const ALPHA: f64 = 0.8;

/// Parameters whose score falls below this (after a grace period) are
/// evicted from the pool.
const EVICT_BELOW: f64 = -0.5;

/// Selections a parameter gets before eviction applies.
const GRACE_SELECTIONS: u64 = 4;

/// Probability of minting a fresh parameter instead of reusing one.
const FRESH_PARAM_P: f64 = 0.2;

/// Probability of picking uniformly instead of by score (keeps every live
/// parameter reachable).
const EPSILON: f64 = 0.1;

/// Exploration weight in the UCB selection rule.
const UCB_C: f64 = 0.7;

/// Soft cap on pool size; minting stops (except for an empty pool) beyond
/// this.
const POOL_CAP: usize = 32;

/// Outcome of a candidate, as far as its parameter is concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Feedback {
    /// VALID and never seen before (or interesting, equally worth chasing).
    NovelValid,
    /// VALID but a duplicate sequence.
    Duplicate,
    /// INVALID or OVERRUN.
    Wasted,
}

impl Feedback {
    fn reward(self) -> f64 {
        match self {
            Feedback::NovelValid => 1.0,
            Feedback::Duplicate => 0.0,
            Feedback::Wasted => -1.0,
        }
    }
}

#[derive(Clone, Debug)]
struct SwarmParameter {
    knobs: [u8; 2],
    score: f64,
    selections: u64,
}

impl SwarmParameter {
    fn mint(rng: &mut ChaCha8Rng) -> SwarmParameter {
        SwarmParameter { knobs: [rng.gen(), rng.gen()], score: 0.0, selections: 0 }
    }

    /// Decode the knob bytes into provider bias: byte 0 sets how hard value
    /// draws are pulled toward zero, byte 1 scales continuation-coin odds
    /// log-uniformly in `[1/4, 4]`.
    fn bias(&self) -> Bias {
        let zero_pull = f64::from(self.knobs[0]) / 255.0 * 0.7;
        let exponent = (f64::from(self.knobs[1]) / 255.0) * 2.0 - 1.0;
        let coin_scale = 4.0_f64.powf(exponent);
        Bias { zero_pull, coin_scale }
    }
}

/// Handle returned by [`ParameterPool::select`], redeemed by
/// [`ParameterPool::feedback`] after the candidate completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParamId(usize);

/// The pool of live swarm parameters.
#[derive(Debug, Default)]
pub struct ParameterPool {
    params: Vec<SwarmParameter>,
    total_selections: u64,
}

impl ParameterPool {
    /// Empty pool.
    pub fn new() -> ParameterPool {
        ParameterPool::default()
    }

    /// Pick a parameter for the next candidate. At most one id is
    /// outstanding at a time; redeem it with [`ParameterPool::feedback`]
    /// before selecting again.
    pub fn select(&mut self, rng: &mut ChaCha8Rng) -> (ParamId, Bias) {
        let mint = self.params.is_empty()
            || (self.params.len() < POOL_CAP && rng.gen_bool(FRESH_PARAM_P));
        let idx = if mint {
            self.params.push(SwarmParameter::mint(rng));
            self.params.len() - 1
        } else if rng.gen_bool(EPSILON) {
            rng.gen_range(0..self.params.len())
        } else {
            self.best_by_ucb()
        };
        self.params[idx].selections += 1;
        self.total_selections += 1;
        (ParamId(idx), self.params[idx].bias())
    }

    fn best_by_ucb(&self) -> usize {
        let ln_total = ((self.total_selections + 1) as f64).ln();
        let mut best = 0usize;
        let mut best_value = f64::NEG_INFINITY;
        for (i, p) in self.params.iter().enumerate() {
            let bonus = UCB_C * (ln_total / (p.selections + 1) as f64).sqrt();
            let value = p.score + bonus;
            if value > best_value {
                best = i;
                best_value = value;
            }
        }
        best
    }

    /// Fold the candidate's outcome into the parameter's score and evict it
    /// if it has decayed past usefulness.
    pub fn feedback(&mut self, id: ParamId, feedback: Feedback) {
        let p = &mut self.params[id.0];
        p.score = ALPHA * p.score + (1.0 - ALPHA) * feedback.reward();
        if p.selections >= GRACE_SELECTIONS && p.score < EVICT_BELOW {
            self.params.swap_remove(id.0);
        }
    }

    /// Number of live parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when no parameter has been minted yet.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(17)
    }

    #[test]
    fn first_selection_mints_a_parameter() {
        let mut pool = ParameterPool::new();
        let mut rng = rng();
        assert!(pool.is_empty());
        let (_, bias) = pool.select(&mut rng);
        assert_eq!(pool.len(), 1);
        assert!((0.0..=0.7).contains(&bias.zero_pull));
        assert!((0.25..=4.0).contains(&bias.coin_scale));
    }

    #[test]
    fn wasteful_parameters_are_evicted() {
        let mut pool = ParameterPool::new();
        let mut rng = rng();
        let (id, _) = pool.select(&mut rng);
        pool.params[0].selections = GRACE_SELECTIONS;
        for _ in 0..20 {
            if pool.is_empty() {
                return;
            }
            pool.feedback(id, Feedback::Wasted);
        }
        panic!("persistently wasteful parameter was never evicted");
    }

    #[test]
    fn useful_parameters_survive_and_dominate() {
        let mut pool = ParameterPool::new();
        let mut rng = rng();
        // Seed the pool, reward everything as novel.
        for _ in 0..200 {
            let (id, _) = pool.select(&mut rng);
            pool.feedback(id, Feedback::NovelValid);
        }
        assert!(!pool.is_empty());
        assert!(pool.len() <= POOL_CAP);
        assert!(pool.params.iter().any(|p| p.score > 0.5));
    }

    #[test]
    fn score_follows_the_ewma_recurrence() {
        let mut pool = ParameterPool::new();
        let mut rng = rng();
        let (id, _) = pool.select(&mut rng);
        pool.feedback(id, Feedback::NovelValid);
        let after_one = pool.params[0].score;
        assert!((after_one - (1.0 - ALPHA)).abs() < 1e-9);
    }

    #[test]
    fn duplicate_feedback_decays_toward_zero() {
        let mut pool = ParameterPool::new();
        let mut rng = rng();
        let (id, _) = pool.select(&mut rng);
        pool.feedback(id, Feedback::NovelValid);
        let high = pool.params[0].score;
        let (id, _) = pool.select(&mut rng);
        if !pool.params.is_empty() && pool.len() == 1 {
            pool.feedback(id, Feedback::Duplicate);
            assert!(pool.params[0].score < high || high == 0.0);
        }
    }
}
