//! Deduplication ledger and decision-prefix tree
//!
//! Two structures keep the engine from wasting evaluations:
//!
//! - [`SeenSet`]: a hash ledger of every choice sequence already handed to
//!   the predicate. Short sequences are stored inline; longer ones as a
//!   BLAKE3 digest.
//! - [`PrefixTree`]: a 256-ary trie over observed byte decisions. Leaves
//!   carry the final status of the sequence that ended there; a node whose
//!   subtree is fully explored is marked dead. The tree is conservative:
//!   absence of a node means nothing, but a dead tag means "no sequence under
//!   this prefix will be novel or interesting", which is what lets the
//!   generator refuse saturated prefixes and the shrinker avoid cycles.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::data::{ByteSeq, StatusKind};

/// Sequences shorter than this are stored inline rather than hashed.
const INLINE_LIMIT: usize = 20;

// ============================================================================
// Seen ledger
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SeenKey {
    Inline(ByteSeq),
    Digest([u8; 32]),
}

impl SeenKey {
    fn of(bytes: &[u8]) -> SeenKey {
        if bytes.len() < INLINE_LIMIT {
            SeenKey::Inline(bytes.to_vec())
        } else {
            SeenKey::Digest(*blake3::hash(bytes).as_bytes())
        }
    }
}

/// Ledger of already-evaluated choice sequences.
#[derive(Debug, Default)]
pub struct SeenSet {
    set: HashSet<SeenKey>,
}

impl SeenSet {
    /// Empty ledger.
    pub fn new() -> SeenSet {
        SeenSet::default()
    }

    /// Record `bytes`; returns `true` when the sequence was novel.
    pub fn insert(&mut self, bytes: &[u8]) -> bool {
        self.set.insert(SeenKey::of(bytes))
    }

    /// True when `bytes` has been recorded before.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.set.contains(&SeenKey::of(bytes))
    }

    /// Number of distinct sequences recorded.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// True before any sequence is recorded.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

// ============================================================================
// Prefix tree
// ============================================================================

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<u8, usize>,
    /// Final status of a sequence that terminated exactly here.
    terminal: Option<StatusKind>,
    /// Nothing under this prefix can be novel or interesting.
    dead: bool,
}

/// 256-ary trie over observed decision prefixes.
#[derive(Debug)]
pub struct PrefixTree {
    nodes: Vec<Node>,
}

impl Default for PrefixTree {
    fn default() -> Self {
        PrefixTree::new()
    }
}

impl PrefixTree {
    /// A tree holding only the root.
    pub fn new() -> PrefixTree {
        PrefixTree { nodes: vec![Node::default()] }
    }

    fn child(&self, node: usize, byte: u8) -> Option<usize> {
        self.nodes[node].children.get(&byte).copied()
    }

    fn child_or_insert(&mut self, node: usize, byte: u8) -> usize {
        if let Some(idx) = self.child(node, byte) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node::default());
        self.nodes[node].children.insert(byte, idx);
        idx
    }

    /// Record a completed evaluation of `bytes` ending with `status`.
    pub fn record(&mut self, bytes: &[u8], status: StatusKind) {
        let mut path = Vec::with_capacity(bytes.len() + 1);
        let mut node = 0usize;
        path.push(node);
        for &b in bytes {
            node = self.child_or_insert(node, b);
            path.push(node);
        }
        self.nodes[node].terminal = Some(status);
        // A terminal node is exhausted outright: replaying the same sequence
        // (or any extension of it, which the provider would never read) can
        // produce nothing new.
        self.nodes[node].dead = true;
        self.propagate_exhaustion(&path);
    }

    /// Walk the recorded path bottom-up, marking nodes dead once every one
    /// of their 256 edges exists and is dead. Interior saturation is rare by
    /// construction; the common kill is the terminal tag above.
    fn propagate_exhaustion(&mut self, path: &[usize]) {
        for &node in path.iter().rev().skip(1) {
            if self.nodes[node].dead {
                continue;
            }
            let n = &self.nodes[node];
            let saturated = n.children.len() == 256
                && n.children.values().all(|&c| self.nodes[c].dead);
            if saturated {
                self.nodes[node].dead = true;
            } else {
                break;
            }
        }
    }

    /// True when evaluating `bytes` cannot produce anything novel: the walk
    /// hits a dead subtree, or passes through a node where a strictly
    /// shorter recorded sequence already terminated.
    pub fn is_dead(&self, bytes: &[u8]) -> bool {
        let mut node = 0usize;
        for &b in bytes {
            if self.nodes[node].dead {
                return true;
            }
            if self.nodes[node].terminal.is_some() {
                // A complete sequence is a strict prefix of this candidate;
                // the extra bytes would never be read.
                return true;
            }
            match self.child(node, b) {
                Some(next) => node = next,
                None => return false,
            }
        }
        self.nodes[node].dead
    }

    /// Produce a prefix that leaves the explored frontier: walk from the
    /// root taking random non-dead edges, and stop the moment an untaken
    /// edge is chosen. Returns `None` when the whole root is dead.
    pub fn novel_prefix(&self, rng: &mut ChaCha8Rng) -> Option<ByteSeq> {
        if self.nodes[0].dead {
            return None;
        }
        let mut prefix = ByteSeq::new();
        let mut node = 0usize;
        loop {
            let mut byte = rng.gen::<u8>();
            // Resample a bounded number of times to dodge dead edges, then
            // scan for any live one.
            for _ in 0..4 {
                match self.child(node, byte) {
                    Some(c) if self.nodes[c].dead => byte = rng.gen::<u8>(),
                    _ => break,
                }
            }
            if let Some(c) = self.child(node, byte) {
                if self.nodes[c].dead {
                    let live = self.nodes[node]
                        .children
                        .iter()
                        .find(|(_, &c)| !self.nodes[c].dead)
                        .map(|(&b, &c)| (b, c));
                    match live {
                        Some((b, c)) => {
                            prefix.push(b);
                            node = c;
                            continue;
                        }
                        // All existing edges dead but node not saturated:
                        // any untaken byte is novel.
                        None => {
                            let taken: Vec<u8> =
                                self.nodes[node].children.keys().copied().collect();
                            let fresh = (0..=255u8).find(|b| !taken.contains(b))?;
                            prefix.push(fresh);
                            return Some(prefix);
                        }
                    }
                }
                prefix.push(byte);
                node = c;
            } else {
                prefix.push(byte);
                return Some(prefix);
            }
        }
    }

    /// Number of allocated trie nodes (diagnostics).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn seen_set_detects_duplicates_at_both_representations() {
        let mut seen = SeenSet::new();
        let short = vec![1, 2, 3];
        let long = vec![7u8; 100];
        assert!(seen.insert(&short));
        assert!(seen.insert(&long));
        assert!(!seen.insert(&short));
        assert!(!seen.insert(&long));
        assert!(seen.contains(&short) && seen.contains(&long));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn prefixes_of_different_lengths_are_distinct() {
        let mut seen = SeenSet::new();
        assert!(seen.insert(&[0, 1]));
        assert!(seen.insert(&[0, 1, 0]));
    }

    #[test]
    fn recorded_sequences_are_dead() {
        let mut tree = PrefixTree::new();
        tree.record(&[5, 6, 7], StatusKind::Valid);
        assert!(tree.is_dead(&[5, 6, 7]));
        // Extensions of a complete sequence are dead too.
        assert!(tree.is_dead(&[5, 6, 7, 8]));
        // Siblings and strict prefixes are not.
        assert!(!tree.is_dead(&[5, 6, 8]));
        assert!(!tree.is_dead(&[5, 6]));
    }

    #[test]
    fn unknown_prefixes_are_not_dead() {
        let tree = PrefixTree::new();
        assert!(!tree.is_dead(&[1, 2, 3]));
    }

    #[test]
    fn novel_prefix_avoids_recorded_sequences() {
        let mut tree = PrefixTree::new();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        tree.record(&[0], StatusKind::Valid);
        tree.record(&[1], StatusKind::Valid);
        for _ in 0..50 {
            let prefix = tree.novel_prefix(&mut rng).expect("root is not dead");
            assert!(!tree.is_dead(&prefix), "dead prefix {prefix:?}");
        }
    }

    #[test]
    fn saturating_one_byte_space_kills_the_root_edgewise() {
        let mut tree = PrefixTree::new();
        for b in 0..=255u8 {
            tree.record(&[b], StatusKind::Valid);
        }
        // Every single-byte sequence is recorded, so the root saturates.
        assert!(tree.is_dead(&[42]));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(tree.novel_prefix(&mut rng).is_none());
    }
}
