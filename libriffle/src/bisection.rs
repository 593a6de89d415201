//! Recursive balanced bisection of a set of sections. Each distinct feature hash acts as a
//! hyperedge over the sections whose signatures contain it, weighted by inverse frequency so that
//! rare shared content counts for more than ubiquitous boilerplate. Every split divides a range
//! into halves whose sizes differ by at most one, then a bounded local search swaps nodes across
//! the boundary while doing so strictly reduces the weight of features straddling it. The
//! recursion depth and per-split iteration count are capped, so this is a heuristic: it produces
//! a good order, not a provably optimal one.
//!
//! There is no randomness. Initial sides come from the incoming order, candidate ties break on
//! position, and only strict improvements are applied, so a given input always produces the same
//! output. Symmetric stalemates (equal-gain candidates facing identical partners) are broken by
//! advancing the candidate pairing alignment by one each iteration.

use crate::hash::HashedFeatureMap;
use crate::signature::Signature;
use itertools::EitherOrBoth;
use itertools::Itertools;
use std::collections::hash_map::Entry;

#[derive(Debug, Clone)]
pub struct BisectParams {
    /// Maximum recursion depth. Ranges at this depth keep their incoming order.
    pub max_depth: u32,

    /// Upper bound on refinement iterations per split.
    pub iterations_per_split: u32,

    /// Ranges at least this large recurse on both halves in parallel.
    pub min_parallel_size: usize,
}

impl Default for BisectParams {
    fn default() -> Self {
        Self {
            max_depth: 18,
            iterations_per_split: 40,
            min_parallel_size: 512,
        }
    }
}

/// A section under partitioning. `slot` indexes the signature slice passed to [`bisect_order`]
/// and is the node's identity in the result.
#[derive(Default)]
struct SectionNode {
    slot: u32,
    /// Dense feature ids, sorted. Renumbered to range-local ids as the recursion descends.
    features: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Orders the nodes `0..signatures.len()` so that nodes with overlapping signatures end up close
/// together. Returns the slots in placement order. The incoming slot order is the stability
/// order: wherever the features express no preference, it is preserved.
#[tracing::instrument(skip_all, name = "Bisect sections")]
pub(crate) fn bisect_order(signatures: &[Signature], params: &BisectParams) -> Vec<u32> {
    let mut nodes = build_nodes(signatures);
    bisect(&mut nodes, 0, params);
    nodes.iter().map(|node| node.slot).collect()
}

/// Interns feature hashes to dense ids and drops features that cannot influence any split:
/// those held by a single node and those held by every node.
fn build_nodes(signatures: &[Signature]) -> Vec<SectionNode> {
    let mut feature_ids = HashedFeatureMap::<u32>::default();
    let mut degrees: Vec<u32> = Vec::new();

    let mut nodes: Vec<SectionNode> = signatures
        .iter()
        .enumerate()
        .map(|(slot, signature)| {
            let features = signature
                .features
                .iter()
                .map(|&hash| {
                    let id = match feature_ids.entry(hash) {
                        Entry::Occupied(entry) => *entry.get(),
                        Entry::Vacant(entry) => {
                            let id = u32::try_from(degrees.len())
                                .expect("feature ids overflowed 32 bits");
                            entry.insert(id);
                            degrees.push(0);
                            id
                        }
                    };
                    degrees[id as usize] += 1;
                    id
                })
                .collect();
            SectionNode {
                slot: u32::try_from(slot).expect("section slots overflowed 32 bits"),
                features,
            }
        })
        .collect();

    let node_count = nodes.len() as u32;
    for node in &mut nodes {
        node.features
            .retain(|&f| degrees[f as usize] >= 2 && degrees[f as usize] < node_count);
        node.features.sort_unstable();
    }
    nodes
}

fn bisect(nodes: &mut [SectionNode], depth: u32, params: &BisectParams) {
    let n = nodes.len();
    if n <= 1 || depth >= params.max_depth {
        return;
    }
    if !refine_range(nodes, params) {
        return;
    }

    let mid = n.div_ceil(2);
    let (left, right) = nodes.split_at_mut(mid);
    if n >= params.min_parallel_size {
        rayon::join(
            || bisect(left, depth + 1, params),
            || bisect(right, depth + 1, params),
        );
    } else {
        bisect(left, depth + 1, params);
        bisect(right, depth + 1, params);
    }
}

/// Runs the local search over one range, then stably partitions it so left-side nodes precede
/// right-side nodes with relative order within each side preserved. Returns false when no
/// feature survives range-local pruning, in which case the range is left untouched and further
/// splitting is pointless.
fn refine_range(nodes: &mut [SectionNode], params: &BisectParams) -> bool {
    let degrees = renumber_features(nodes);
    if degrees.is_empty() {
        return false;
    }
    let weights: Vec<u64> = degrees.iter().map(|&d| (1u64 << 32) / u64::from(d)).collect();

    let n = nodes.len();
    let mid = n.div_ceil(2);
    // side[i] tracks the node at entry position i. Nodes never physically move during
    // refinement, so entry positions stay valid as stability keys.
    let mut side: Vec<Side> = (0..n)
        .map(|i| if i < mid { Side::Left } else { Side::Right })
        .collect();

    let mut left_counts = vec![0u32; weights.len()];
    let mut right_counts = vec![0u32; weights.len()];
    for (node, &s) in nodes.iter().zip(&side) {
        let counts = match s {
            Side::Left => &mut left_counts,
            Side::Right => &mut right_counts,
        };
        for &f in &node.features {
            counts[f as usize] += 1;
        }
    }

    let mut quiet_iterations = 0;
    for iteration in 0..params.iterations_per_split {
        let swaps = run_iteration(
            nodes,
            &mut side,
            &mut left_counts,
            &mut right_counts,
            &weights,
            iteration,
        );
        if swaps == 0 {
            // Two consecutive alignments finding nothing means we're as good as stuck.
            quiet_iterations += 1;
            if quiet_iterations == 2 {
                break;
            }
        } else {
            quiet_iterations = 0;
        }
    }

    stable_partition(nodes, &side);
    true
}

/// Renumbers this range's features to a fresh dense id space, dropping features with no
/// splitting signal within the range. Returns the per-feature node counts ("degrees") indexed by
/// new id. Mutating feature lists in place is fine: sibling ranges are disjoint slices.
fn renumber_features(nodes: &mut [SectionNode]) -> Vec<u32> {
    let mut range_degrees: hashbrown::HashMap<u32, u32> = hashbrown::HashMap::new();
    for node in &*nodes {
        for &f in &node.features {
            *range_degrees.entry(f).or_insert(0) += 1;
        }
    }

    let node_count = nodes.len() as u32;
    let mut remap: hashbrown::HashMap<u32, u32> = hashbrown::HashMap::new();
    let mut degrees: Vec<u32> = Vec::new();
    for node in &mut *nodes {
        node.features
            .retain(|&f| range_degrees[&f] >= 2 && range_degrees[&f] < node_count);
        for f in &mut node.features {
            let old = *f;
            *f = *remap.entry(old).or_insert_with(|| {
                degrees.push(range_degrees[&old]);
                degrees.len() as u32 - 1
            });
        }
        node.features.sort_unstable();
    }
    degrees
}

/// One refinement iteration: estimate each node's move gain, pair the best left candidates with
/// the best right candidates, and apply each pair's swap if its exact cut-weight reduction is
/// strictly positive. Returns the number of swaps applied.
fn run_iteration(
    nodes: &[SectionNode],
    side: &mut [Side],
    left_counts: &mut [u32],
    right_counts: &mut [u32],
    weights: &[u64],
    iteration: u32,
) -> u32 {
    let mut left: Vec<(i64, usize)> = Vec::new();
    let mut right: Vec<(i64, usize)> = Vec::new();
    for (position, node) in nodes.iter().enumerate() {
        let gain = move_gain(node, side[position], left_counts, right_counts, weights);
        match side[position] {
            Side::Left => left.push((gain, position)),
            Side::Right => right.push((gain, position)),
        }
    }

    // Highest gain first; entry position breaks ties, which keeps the whole pass deterministic.
    let by_gain = |a: &(i64, usize), b: &(i64, usize)| b.0.cmp(&a.0).then(a.1.cmp(&b.1));
    left.sort_unstable_by(by_gain);
    right.sort_unstable_by(by_gain);

    // Pair each candidate on the smaller side with one on the larger side. The alignment
    // advances by one position every iteration, cycling through all of them, which both breaks
    // the stalemate where equal-gain candidates face identical twins and lets candidates beyond
    // the smaller side's length get paired eventually.
    let (short, long, short_is_left) = if left.len() <= right.len() {
        (&left, &right, true)
    } else {
        (&right, &left, false)
    };
    let pairs = short.len();
    if pairs == 0 {
        return 0;
    }

    let mut swaps = 0;
    for rank in 0..pairs {
        let (short_gain, short_position) = short[rank];
        let (long_gain, long_position) = long[(rank + iteration as usize) % long.len()];
        // The estimates sum to an upper bound on the exact delta, so a non-positive sum can't
        // yield an improvement. They do go stale as swaps are applied within the iteration;
        // anything missed because of that is picked up next iteration.
        if short_gain + long_gain <= 0 {
            continue;
        }
        let (left_position, right_position) = if short_is_left {
            (short_position, long_position)
        } else {
            (long_position, short_position)
        };
        let node_l = &nodes[left_position];
        let node_r = &nodes[right_position];
        if swap_delta(node_l, node_r, left_counts, right_counts, weights) > 0 {
            apply_swap(node_l, node_r, left_counts, right_counts);
            side[left_position] = Side::Right;
            side[right_position] = Side::Left;
            swaps += 1;
        }
    }
    swaps
}

/// Cut-weight reduction from moving `node` to the other side, using current counts. For each of
/// the node's features: the cut shrinks by the feature's weight if it stops straddling the
/// boundary (no other holder on this side) and grows by it if it starts (any holder opposite).
fn move_gain(
    node: &SectionNode,
    side: Side,
    left_counts: &[u32],
    right_counts: &[u32],
    weights: &[u64],
) -> i64 {
    let mut gain = 0i64;
    for &f in &node.features {
        let f = f as usize;
        let (same, opposite) = match side {
            Side::Left => (left_counts[f], right_counts[f]),
            Side::Right => (right_counts[f], left_counts[f]),
        };
        let weight = weights[f] as i64;
        if opposite > 0 {
            gain += weight;
        }
        if same > 1 {
            gain -= weight;
        }
    }
    gain
}

/// Exact cut-weight reduction of swapping `node_l` (on the left) with `node_r` (on the right).
/// Features the two nodes share leave both sides' counts unchanged, so only the set differences
/// contribute. Both feature lists are sorted, so a merge walk finds them.
fn swap_delta(
    node_l: &SectionNode,
    node_r: &SectionNode,
    left_counts: &[u32],
    right_counts: &[u32],
    weights: &[u64],
) -> i64 {
    let mut delta = 0i64;
    for pair in node_l
        .features
        .iter()
        .merge_join_by(&node_r.features, Ord::cmp)
    {
        match pair {
            EitherOrBoth::Left(&f) => {
                let f = f as usize;
                let weight = weights[f] as i64;
                if right_counts[f] > 0 {
                    delta += weight;
                }
                if left_counts[f] > 1 {
                    delta -= weight;
                }
            }
            EitherOrBoth::Right(&f) => {
                let f = f as usize;
                let weight = weights[f] as i64;
                if left_counts[f] > 0 {
                    delta += weight;
                }
                if right_counts[f] > 1 {
                    delta -= weight;
                }
            }
            EitherOrBoth::Both(..) => {}
        }
    }
    delta
}

fn apply_swap(
    node_l: &SectionNode,
    node_r: &SectionNode,
    left_counts: &mut [u32],
    right_counts: &mut [u32],
) {
    for pair in node_l
        .features
        .iter()
        .merge_join_by(&node_r.features, Ord::cmp)
    {
        match pair {
            EitherOrBoth::Left(&f) => {
                left_counts[f as usize] -= 1;
                right_counts[f as usize] += 1;
            }
            EitherOrBoth::Right(&f) => {
                right_counts[f as usize] -= 1;
                left_counts[f as usize] += 1;
            }
            EitherOrBoth::Both(..) => {}
        }
    }
}

fn stable_partition(nodes: &mut [SectionNode], side: &[Side]) {
    let mut reordered = Vec::with_capacity(nodes.len());
    for (node, &s) in nodes.iter_mut().zip(side) {
        if s == Side::Left {
            reordered.push(std::mem::take(node));
        }
    }
    for (node, &s) in nodes.iter_mut().zip(side) {
        if s == Side::Right {
            reordered.push(std::mem::take(node));
        }
    }
    for (dest, node) in nodes.iter_mut().zip(reordered) {
        *dest = node;
    }
}
