//! Forward evaluation of a single soft oblivious tree.
//!
//! Per level `d` the tree routes over its group's features, gathers one
//! value, and evaluates a soft split. Leaf probabilities are built by
//! doubling: after level `d` there are `2^(d+1)` partial products, with the
//! level-0 decision as the most significant bit of the leaf index.

use crate::repr::ObliviousTree;
use crate::soft::{self, SelectionFn, SplitEval, Temperature};

/// Intermediate values of one tree evaluation, kept for the backward pass.
///
/// A trace is sized for one tree shape and reused across rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeTrace {
    arity: usize,
    /// Router weights, `[depth * arity]`.
    pub(crate) weights: Vec<f32>,
    /// Gathered value per level.
    pub(crate) values: Vec<f32>,
    /// Split evaluation per level.
    pub(crate) splits: Vec<SplitEval>,
    /// Leaf probabilities, `[2^depth]`.
    pub(crate) leaf_probs: Vec<f32>,
}

impl TreeTrace {
    /// Allocate a trace for trees of this shape.
    pub fn new(arity: usize, depth: usize) -> Self {
        Self {
            arity,
            weights: vec![0.0; depth * arity],
            values: vec![0.0; depth],
            splits: vec![SplitEval { right: 0.0, logit: 0.0, scale: 0.0, saturated: true }; depth],
            leaf_probs: vec![0.0; 1 << depth],
        }
    }

    /// Allocate a trace matching `tree`.
    pub fn for_tree(tree: &ObliviousTree) -> Self {
        Self::new(tree.arity(), tree.depth())
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    /// Router weights of one level.
    #[inline]
    pub fn level_weights(&self, level: usize) -> &[f32] {
        &self.weights[level * self.arity..(level + 1) * self.arity]
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn splits(&self) -> &[SplitEval] {
        &self.splits
    }

    /// Probability of each leaf. Sums to 1.
    #[inline]
    pub fn leaf_probs(&self) -> &[f32] {
        &self.leaf_probs
    }
}

/// Evaluate `tree` on its group's gathered values and add the output to `out`.
///
/// `values` holds exactly the tree's group features (see
/// [`FeatureGroup::gather`](crate::repr::FeatureGroup::gather)); the tree
/// has no other access to the input row.
///
/// # Panics
///
/// Panics if `values.len()` differs from the tree's arity, or `out` from its
/// output width.
pub fn forward_tree(
    tree: &ObliviousTree,
    values: &[f32],
    selection: SelectionFn,
    temperature: Temperature,
    trace: &mut TreeTrace,
    out: &mut [f32],
) {
    assert_eq!(values.len(), tree.arity(), "gathered values must match tree arity");
    assert_eq!(out.len(), tree.n_outputs());
    let depth = tree.depth();
    let arity = tree.arity();
    if trace.depth() != depth || trace.arity != arity {
        *trace = TreeTrace::new(arity, depth);
    }

    trace.leaf_probs[0] = 1.0;
    for level in 0..depth {
        let weights = &mut trace.weights[level * arity..(level + 1) * arity];
        soft::route_into(selection, &tree.level_logits_slice(level), temperature, weights);
        let value = soft::gather(weights, values);
        let split = soft::soft_split(
            value,
            tree.thresholds()[level],
            tree.log_sharpness()[level],
            temperature,
        );
        trace.values[level] = value;
        trace.splits[level] = split;

        // Doubling: descend so each parent is read before it is overwritten.
        let (left, right) = (split.left(), split.right);
        for parent in (0..1usize << level).rev() {
            let p = trace.leaf_probs[parent];
            trace.leaf_probs[2 * parent + 1] = p * right;
            trace.leaf_probs[2 * parent] = p * left;
        }
    }

    let leaves = tree.leaves();
    for (leaf, &p) in trace.leaf_probs.iter().enumerate() {
        if p == 0.0 {
            continue;
        }
        for (o, &v) in out.iter_mut().zip(leaves.row(leaf)) {
            *o += p * v;
        }
    }
}

/// Leaf reached with hard routing and hard splits.
///
/// Each level reads the argmax-logit feature of `values` and goes right iff
/// `value >= threshold`.
pub fn hard_leaf(tree: &ObliviousTree, values: &[f32]) -> usize {
    debug_assert_eq!(values.len(), tree.arity());
    ObliviousTree::leaf_index((0..tree.depth()).map(|level| {
        let (feature, _) = soft::argmax(&tree.level_logits_slice(level));
        values[feature] >= tree.thresholds()[level]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious_tree;
    use approx::assert_abs_diff_eq;

    fn t(v: f32) -> Temperature {
        Temperature::new(v).unwrap()
    }

    fn eval(tree: &ObliviousTree, values: &[f32], temperature: Temperature) -> (f32, TreeTrace) {
        let mut trace = TreeTrace::for_tree(tree);
        let mut out = [0.0];
        forward_tree(tree, values, SelectionFn::Softmax, temperature, &mut trace, &mut out);
        (out[0], trace)
    }

    #[test]
    fn hard_depth_two_is_piecewise_constant() {
        let tree = oblivious_tree! {
            levels = [([0.0], -0.5, 0.0), ([0.0], 2.0, 0.0)];
            leaves = [[10.0], [20.0], [30.0], [40.0]];
        }
        .unwrap();
        for (x, leaf, expected) in [(-1.0, 0, 10.0), (0.0, 2, 30.0), (1.0, 2, 30.0), (5.0, 3, 40.0)] {
            let (y, trace) = eval(&tree, &[x], Temperature::HARD);
            assert_eq!(y, expected);
            assert_eq!(hard_leaf(&tree, &[x]), leaf);
            assert_eq!(trace.leaf_probs()[leaf], 1.0);
        }
    }

    #[test]
    fn leaf_probs_sum_to_one() {
        let tree = oblivious_tree! {
            levels = [([0.3, -0.2], 0.1, 0.5), ([1.0, 0.0], -0.4, -0.3), ([0.0, 0.2], 0.7, 1.0)];
            leaves = [[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        }
        .unwrap();
        let (_, trace) = eval(&tree, &[0.2, -0.6], t(0.8));
        assert_abs_diff_eq!(trace.leaf_probs().iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_eq!(trace.leaf_probs().len(), 8);
    }

    #[test]
    fn soft_matches_explicit_product() {
        let tree = oblivious_tree! {
            levels = [([0.0], 0.0, 0.0), ([0.0], 1.0, 0.0)];
            leaves = [[1.0], [2.0], [3.0], [4.0]];
        }
        .unwrap();
        let x = 0.5;
        let r0 = soft::stable_sigmoid(x - 0.0);
        let r1 = soft::stable_sigmoid(x - 1.0);
        let expected = (1.0 - r0) * (1.0 - r1) * 1.0
            + (1.0 - r0) * r1 * 2.0
            + r0 * (1.0 - r1) * 3.0
            + r0 * r1 * 4.0;
        let (y, _) = eval(&tree, &[x], t(1.0));
        assert_abs_diff_eq!(y, expected, epsilon = 1e-6);
    }

    #[test]
    fn depth_zero_returns_constant() {
        let tree = ObliviousTree::constant(1, &[2.5]).unwrap();
        let (y, trace) = eval(&tree, &[100.0], t(1.0));
        assert_eq!(y, 2.5);
        assert_eq!(trace.leaf_probs(), &[1.0]);
    }

    #[test]
    fn output_accumulates() {
        let tree = ObliviousTree::constant(1, &[1.0, 2.0]).unwrap();
        let mut trace = TreeTrace::for_tree(&tree);
        let mut out = [10.0, 20.0];
        forward_tree(&tree, &[0.0], SelectionFn::Softmax, t(1.0), &mut trace, &mut out);
        assert_eq!(out, [11.0, 22.0]);
    }

    #[test]
    fn hard_pair_routes_by_argmax() {
        let tree = oblivious_tree! {
            levels = [([0.0, 3.0], 0.0, 0.0)];
            leaves = [[-1.0], [1.0]];
        }
        .unwrap();
        // level reads the second feature
        assert_eq!(hard_leaf(&tree, &[5.0, -5.0]), 0);
        assert_eq!(hard_leaf(&tree, &[-5.0, 5.0]), 1);
    }
}
