//! Backward pass: gradients of the loss with respect to every parameter.
//!
//! For one tree with leaf probabilities `p_ℓ = Π_d s_d(bit_d(ℓ))`, the split
//! gradient `∂L/∂r_d` is `Σ_{nodes n at depth d} P(n) · (V(right(n)) - V(left(n)))`,
//! where `P` is the prefix probability of reaching `n` and `V` the expected
//! downstream leaf gradient. Both are computed level by level, so the pass
//! is `O(2^D)` per tree and needs no division by split probabilities.
//!
//! Batch gradients are reduced over fixed row chunks in chunk order, so the
//! result does not depend on the number of worker threads.
//!
//! With a [`GroupMask`], each row's prediction uses the masked and rescaled
//! contributions, while the output penalty still sees the unmasked ones.

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::dropout::GroupMask;
use super::objectives::{Objective, ObjectiveFn};
use crate::inference::aggregate::sum_groups_into;
use crate::inference::{ForwardScratch, TreeTrace};
use crate::repr::{Ensemble, GroupId, ObliviousTree};
use crate::soft::{self, SelectionFn, Temperature};
use crate::utils::Parallelism;

/// Rows per gradient chunk. Fixed so the reduction order is reproducible.
pub const GRADIENT_CHUNK_ROWS: usize = 32;

/// Where a non-finite value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonFinite {
    pub stage: &'static str,
    pub tree: Option<usize>,
    pub group: Option<GroupId>,
}

/// Gradient buffers shaped like an [`Ensemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleGrad {
    bias: Vec<f32>,
    trees: Vec<ObliviousTree>,
}

impl EnsembleGrad {
    pub fn zeros_like(ensemble: &Ensemble) -> Self {
        Self {
            bias: vec![0.0; ensemble.n_outputs()],
            trees: ensemble.trees().iter().map(ObliviousTree::zeros_like).collect(),
        }
    }

    #[inline]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    #[inline]
    pub fn trees(&self) -> &[ObliviousTree] {
        &self.trees
    }

    /// Gradients in [`Ensemble::params`] order.
    pub fn params(&self) -> impl Iterator<Item = &f32> {
        self.bias.iter().chain(self.trees.iter().flat_map(ObliviousTree::params))
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.bias.iter_mut().chain(self.trees.iter_mut().flat_map(ObliviousTree::params_mut))
    }

    pub fn add_assign(&mut self, other: &Self) {
        for (a, b) in self.params_mut().zip(other.params()) {
            *a += *b;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for g in self.params_mut() {
            *g *= factor;
        }
    }

    /// First tree (or the bias) holding a non-finite gradient.
    pub fn find_non_finite(&self, ensemble: &Ensemble) -> Option<NonFinite> {
        if self.bias.iter().any(|g| !g.is_finite()) {
            return Some(NonFinite { stage: "bias gradient", tree: None, group: None });
        }
        self.trees
            .iter()
            .position(|t| t.params().any(|g| !g.is_finite()))
            .map(|tree| NonFinite {
                stage: "gradient",
                tree: Some(tree),
                group: Some(ensemble.tree_groups()[tree]),
            })
    }
}

/// Reusable buffers for [`backward_tree`].
#[derive(Debug, Clone, Default)]
pub struct BackwardScratch {
    prefix: Vec<f32>,
    suffix: Vec<f32>,
    grad_weights: Vec<f32>,
}

/// Accumulate the gradient of one tree evaluation into `grad`.
///
/// `values` are the group values the forward pass gathered and `grad_out`
/// is `∂L/∂(tree output)`.
#[allow(clippy::too_many_arguments)]
pub fn backward_tree(
    tree: &ObliviousTree,
    trace: &TreeTrace,
    values: &[f32],
    grad_out: &[f32],
    selection: SelectionFn,
    temperature: Temperature,
    scratch: &mut BackwardScratch,
    grad: &mut ObliviousTree,
) {
    let depth = tree.depth();
    let n_leaves = tree.n_leaves();
    let leaves = tree.leaves();
    let leaf_probs = trace.leaf_probs();

    // leaves: ∂L/∂leaf[ℓ, k] = p_ℓ · grad_out[k]; suffix starts at G_ℓ = Σ_k leaf[ℓ, k] · grad_out[k]
    scratch.suffix.clear();
    scratch.suffix.resize(n_leaves, 0.0);
    {
        let mut leaf_grads = grad.leaves_mut();
        for leaf in 0..n_leaves {
            let p = leaf_probs[leaf];
            let mut g_leaf = 0.0;
            for ((lg, &v), &go) in leaf_grads.row_mut(leaf).iter_mut().zip(leaves.row(leaf)).zip(grad_out) {
                *lg += p * go;
                g_leaf += v * go;
            }
            scratch.suffix[leaf] = g_leaf;
        }
    }
    if depth == 0 {
        return;
    }

    // prefix[2^d - 1 + i]: probability of reaching node i at depth d
    scratch.prefix.clear();
    scratch.prefix.resize((1 << depth) - 1, 0.0);
    scratch.prefix[0] = 1.0;
    for level in 0..depth - 1 {
        let split = trace.splits()[level];
        let (base, next) = ((1 << level) - 1, (1 << (level + 1)) - 1);
        for node in 0..1usize << level {
            let p = scratch.prefix[base + node];
            scratch.prefix[next + 2 * node] = p * split.left();
            scratch.prefix[next + 2 * node + 1] = p * split.right;
        }
    }

    let arity = tree.arity();
    scratch.grad_weights.clear();
    scratch.grad_weights.resize(arity, 0.0);
    for level in (0..depth).rev() {
        let split = trace.splits()[level];
        let base = (1 << level) - 1;
        let mut grad_right = 0.0f32;
        for node in 0..1usize << level {
            let left = scratch.suffix[2 * node];
            let right = scratch.suffix[2 * node + 1];
            grad_right += scratch.prefix[base + node] * (right - left);
            scratch.suffix[node] = split.left() * left + split.right * right;
        }

        let log_sharpness = tree.log_sharpness()[level];
        let g = soft::soft_split_grad(&split, log_sharpness, grad_right);
        grad.thresholds_mut()[level] += g.threshold;
        grad.log_sharpness_mut()[level] += g.log_sharpness;

        // value = Σ_j w_j x_j, so ∂L/∂w_j = ∂L/∂value · x_j
        for (gw, &x) in scratch.grad_weights.iter_mut().zip(values) {
            *gw = g.value * x;
        }
        let mut logits_grad = grad.logits_mut();
        let mut row = logits_grad.row_mut(level);
        if let Some(row) = row.as_slice_mut() {
            soft::route_backward(selection, trace.level_weights(level), &scratch.grad_weights, temperature, row);
        } else {
            let mut owned = row.to_vec();
            soft::route_backward(selection, trace.level_weights(level), &scratch.grad_weights, temperature, &mut owned);
            row.assign(&ArrayView1::from(&owned[..]));
        }
    }
}

/// Per-row forward + backward over a whole ensemble.
#[derive(Debug, Clone, Copy)]
pub struct RowGradient<'a> {
    pub ensemble: &'a Ensemble,
    pub objective: &'a Objective,
    pub temperature: Temperature,
    /// `λ` in `λ · mean(contribution²)`.
    pub output_penalty: f32,
    /// Group dropout for the batch, indexed by position in `rows`.
    pub group_mask: Option<&'a GroupMask>,
}

/// Buffers reused across rows by [`RowGradient`].
#[derive(Debug, Clone)]
pub struct RowScratch {
    forward: ForwardScratch,
    backward: BackwardScratch,
    contributions: Array2<f32>,
    masked: Array2<f32>,
    total: Vec<f32>,
    grad_total: Vec<f32>,
    grad_out: Vec<f32>,
}

impl RowScratch {
    pub fn new(ensemble: &Ensemble) -> Self {
        Self {
            forward: ForwardScratch::new(ensemble),
            backward: BackwardScratch::default(),
            contributions: Array2::zeros((ensemble.n_groups(), ensemble.n_outputs())),
            masked: Array2::zeros((ensemble.n_groups(), ensemble.n_outputs())),
            total: vec![0.0; ensemble.n_outputs()],
            grad_total: vec![0.0; ensemble.n_outputs()],
            grad_out: vec![0.0; ensemble.n_outputs()],
        }
    }
}

impl RowGradient<'_> {
    /// Loss of one row (objective plus output penalty). Accumulates the
    /// unscaled gradient into `grad`.
    ///
    /// `keep` holds per-group scales for this row; `None` keeps every group.
    pub fn accumulate(
        &self,
        row: ArrayView1<'_, f32>,
        target: ArrayView1<'_, f32>,
        keep: Option<ArrayView1<'_, f32>>,
        scratch: &mut RowScratch,
        grad: &mut EnsembleGrad,
    ) -> Result<f64, NonFinite> {
        let e = self.ensemble;
        e.contributions_into(row, self.temperature, &mut scratch.forward, scratch.contributions.view_mut());
        if let Some(group) = scratch
            .contributions
            .outer_iter()
            .position(|c| c.iter().any(|v| !v.is_finite()))
        {
            let group = GroupId(group as u32);
            let tree = e.tree_groups().iter().position(|&g| g == group);
            return Err(NonFinite { stage: "forward", tree, group: Some(group) });
        }

        scratch.total.copy_from_slice(e.bias());
        match keep {
            None => sum_groups_into(scratch.contributions.view(), &mut scratch.total),
            Some(keep) => {
                scratch.masked.assign(&scratch.contributions);
                for (mut c, &s) in scratch.masked.outer_iter_mut().zip(keep) {
                    c.mapv_inplace(|v| v * s);
                }
                sum_groups_into(scratch.masked.view(), &mut scratch.total);
            }
        }
        let mut loss = self.objective.loss_and_grad(&scratch.total, target, &mut scratch.grad_total);

        let n_cells = scratch.contributions.len().max(1) as f32;
        let penalty_scale = 2.0 * self.output_penalty / n_cells;
        if self.output_penalty > 0.0 {
            let sq: f64 = scratch.contributions.iter().map(|&c| (c as f64) * (c as f64)).sum();
            loss += self.output_penalty as f64 * sq / n_cells as f64;
        }
        if !loss.is_finite() || scratch.grad_total.iter().any(|g| !g.is_finite()) {
            return Err(NonFinite { stage: "loss", tree: None, group: None });
        }

        for (b, &g) in grad.bias.iter_mut().zip(&scratch.grad_total) {
            *b += g;
        }

        let groups = e.groups();
        for (tree_idx, (tree, group)) in e.trees_with_groups().enumerate() {
            let contribution = scratch.contributions.row(group.index());
            let grad_scale = match keep {
                // dropped and unpenalized: no gradient reaches the tree
                Some(keep) if keep[group.index()] == 0.0 && self.output_penalty == 0.0 => continue,
                Some(keep) => keep[group.index()],
                None => 1.0,
            };
            for ((go, &gt), &c) in scratch.grad_out.iter_mut().zip(&scratch.grad_total).zip(contribution) {
                *go = grad_scale * gt + penalty_scale * c;
            }
            let values = groups[group.index()].gather(row);
            backward_tree(
                tree,
                scratch.forward.trace(tree_idx),
                values.as_slice(),
                &scratch.grad_out,
                e.selection(),
                self.temperature,
                &mut scratch.backward,
                &mut grad.trees[tree_idx],
            );
        }
        Ok(loss)
    }

    /// Mean loss and mean gradient over `rows` of a batch.
    ///
    /// Rows are split into chunks of [`GRADIENT_CHUNK_ROWS`]; chunks may run
    /// in parallel and are summed in chunk order.
    pub fn batch(
        &self,
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        rows: &[usize],
        parallelism: Parallelism,
    ) -> Result<(f64, EnsembleGrad), NonFinite> {
        debug_assert!(self.group_mask.map_or(true, |m| m.n_rows() == rows.len()));
        let chunks: Vec<(usize, &[usize])> = rows.chunks(GRADIENT_CHUNK_ROWS).enumerate().collect();
        let partials = parallelism.maybe_par_map(chunks, |(chunk_idx, chunk)| {
            let mut scratch = RowScratch::new(self.ensemble);
            let mut grad = EnsembleGrad::zeros_like(self.ensemble);
            let mut loss = 0.0f64;
            for (i, &r) in chunk.iter().enumerate() {
                let keep = self.group_mask.map(|m| m.row(chunk_idx * GRADIENT_CHUNK_ROWS + i));
                loss += self.accumulate(features.row(r), targets.row(r), keep, &mut scratch, &mut grad)?;
            }
            Ok::<_, NonFinite>((loss, grad))
        });

        let mut total_loss = 0.0f64;
        let mut total = EnsembleGrad::zeros_like(self.ensemble);
        for partial in partials {
            let (loss, grad) = partial?;
            total_loss += loss;
            total.add_assign(&grad);
        }
        let n = rows.len().max(1);
        total.scale(1.0 / n as f32);
        Ok((total_loss / n as f64, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::forward_tree;
    use crate::oblivious_tree;
    use crate::repr::FeatureGroup;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn tree_output(tree: &ObliviousTree, values: &[f32], sel: SelectionFn, t: Temperature) -> Vec<f32> {
        let mut trace = TreeTrace::for_tree(tree);
        let mut out = vec![0.0; tree.n_outputs()];
        forward_tree(tree, values, sel, t, &mut trace, &mut out);
        out
    }

    /// Compare analytic gradients of `Σ_k w_k · out_k` against central differences.
    fn check_tree_gradient(tree: &ObliviousTree, values: &[f32], sel: SelectionFn) {
        let t = Temperature::new(0.8).unwrap();
        let weights: Vec<f32> = (0..tree.n_outputs()).map(|k| 1.0 + k as f32 * 0.5).collect();
        let objective = |tree: &ObliviousTree| -> f64 {
            tree_output(tree, values, sel, t).iter().zip(&weights).map(|(o, w)| (o * w) as f64).sum()
        };

        let mut trace = TreeTrace::for_tree(tree);
        let mut out = vec![0.0; tree.n_outputs()];
        forward_tree(tree, values, sel, t, &mut trace, &mut out);
        let mut grad = tree.zeros_like();
        backward_tree(tree, &trace, values, &weights, sel, t, &mut BackwardScratch::default(), &mut grad);

        let analytic: Vec<f32> = grad.params().copied().collect();
        let eps = 1e-2f32;
        for (i, &a) in analytic.iter().enumerate() {
            let mut plus = tree.clone();
            *plus.params_mut().nth(i).unwrap() += eps;
            let mut minus = tree.clone();
            *minus.params_mut().nth(i).unwrap() -= eps;
            let fd = (objective(&plus) - objective(&minus)) / (2.0 * eps as f64);
            assert_abs_diff_eq!(a as f64, fd, epsilon = 2e-3);
        }
    }

    #[test]
    fn single_feature_tree_gradients() {
        let tree = oblivious_tree! {
            levels = [([0.0], 0.1, 0.2), ([0.0], -0.3, -0.1), ([0.0], 0.4, 0.3)];
            leaves = [[0.5, 1.0], [-0.2, 0.3], [0.7, -0.4], [0.1, 0.2], [-0.6, 0.9], [0.3, -0.1], [0.8, 0.0], [-0.5, 0.4]];
        }
        .unwrap();
        check_tree_gradient(&tree, &[0.25], SelectionFn::Softmax);
    }

    #[test]
    fn pair_tree_gradients() {
        let tree = oblivious_tree! {
            levels = [([0.3, -0.2], 0.1, 0.2), ([-0.5, 0.4], -0.3, -0.1)];
            leaves = [[0.5], [-0.2], [0.7], [0.1]];
        }
        .unwrap();
        check_tree_gradient(&tree, &[0.6, -0.4], SelectionFn::Softmax);
        check_tree_gradient(&tree, &[0.6, -0.4], SelectionFn::Sparsemax);
    }

    fn small_ensemble() -> Ensemble {
        let mut e = Ensemble::new(2, 1, vec![FeatureGroup::Single(0), FeatureGroup::Pair([0, 1])])
            .unwrap()
            .with_bias(vec![0.2])
            .unwrap();
        e.bind(
            oblivious_tree! { levels = [([0.0], 0.0, 0.0), ([0.0], 0.5, 0.1)]; leaves = [[0.1], [0.4], [-0.3], [0.2]] }
                .unwrap(),
            GroupId(0),
        )
        .unwrap();
        e.bind(
            oblivious_tree! { levels = [([0.2, -0.1], 0.3, 0.0)]; leaves = [[0.6], [-0.2]] }.unwrap(),
            GroupId(1),
        )
        .unwrap();
        e
    }

    #[test]
    fn ensemble_gradient_with_penalty_matches_finite_difference() {
        let e = small_ensemble();
        let objective = Objective::squared();
        let x = array![[0.3f32, -0.7], [-0.2, 0.9], [1.1, 0.1]];
        let y = array![[1.0f32], [-0.5], [0.3]];
        let rows = [0usize, 1, 2];
        let run = |e: &Ensemble| {
            let pass = RowGradient {
                ensemble: e,
                objective: &objective,
                temperature: Temperature::new(0.7).unwrap(),
                output_penalty: 0.3,
                group_mask: None,
            };
            pass.batch(x.view(), y.view(), &rows, Parallelism::Sequential).unwrap()
        };
        let (_, grad) = run(&e);

        let analytic: Vec<f32> = grad.params().copied().collect();
        let eps = 1e-2f32;
        for (i, &a) in analytic.iter().enumerate() {
            let mut plus = e.clone();
            *plus.params_mut().nth(i).unwrap() += eps;
            let mut minus = e.clone();
            *minus.params_mut().nth(i).unwrap() -= eps;
            let (lp, lm) = (run(&plus).0, run(&minus).0);
            assert_abs_diff_eq!(a as f64, (lp - lm) / (2.0 * eps as f64), epsilon = 2e-3);
        }
    }

    #[test]
    fn reduction_is_thread_independent() {
        let e = small_ensemble();
        let objective = Objective::squared();
        let n = 200;
        let x = Array2::from_shape_fn((n, 2), |(r, c)| ((r * 7 + c * 3) % 11) as f32 / 5.0 - 1.0);
        let y = Array2::from_shape_fn((n, 1), |(r, _)| (r % 5) as f32 / 4.0);
        let rows: Vec<usize> = (0..n).collect();
        let pass = RowGradient {
            ensemble: &e,
            objective: &objective,
            temperature: Temperature::new(0.5).unwrap(),
            output_penalty: 0.0,
            group_mask: None,
        };
        let seq = pass.batch(x.view(), y.view(), &rows, Parallelism::Sequential).unwrap();
        let par = pass.batch(x.view(), y.view(), &rows, Parallelism::Parallel).unwrap();
        assert_eq!(seq.0.to_bits(), par.0.to_bits());
        assert_eq!(seq.1, par.1);
    }

    #[test]
    fn hard_temperature_only_trains_leaves_and_bias() {
        let e = small_ensemble();
        let objective = Objective::squared();
        let x = array![[0.3f32, -0.7]];
        let y = array![[1.0f32]];
        let pass = RowGradient {
            ensemble: &e,
            objective: &objective,
            temperature: Temperature::HARD,
            output_penalty: 0.0,
            group_mask: None,
        };
        let (_, grad) = pass.batch(x.view(), y.view(), &[0], Parallelism::Sequential).unwrap();
        for tree in grad.trees() {
            assert!(tree.thresholds().iter().all(|&g| g == 0.0));
            assert!(tree.logits().iter().all(|&g| g == 0.0));
            assert!(tree.leaves().iter().any(|&g| g != 0.0));
        }
    }

    #[test]
    fn masked_gradient_matches_finite_difference() {
        use rand::SeedableRng;
        let e = small_ensemble();
        let objective = Objective::squared();
        let x = array![[0.3f32, -0.7], [-0.2, 0.9], [1.1, 0.1], [0.4, 0.4]];
        let y = array![[1.0f32], [-0.5], [0.3], [0.0]];
        let rows = [0usize, 1, 2, 3];
        let mask = GroupMask::sample(&mut rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(5), 4, 2, 0.5);
        assert!(mask.scales().iter().any(|&s| s == 0.0));
        for penalty in [0.0, 0.2] {
            let run = |e: &Ensemble| {
                let pass = RowGradient {
                    ensemble: e,
                    objective: &objective,
                    temperature: Temperature::new(0.6).unwrap(),
                    output_penalty: penalty,
                    group_mask: Some(&mask),
                };
                pass.batch(x.view(), y.view(), &rows, Parallelism::Sequential).unwrap()
            };
            let (_, grad) = run(&e);
            let analytic: Vec<f32> = grad.params().copied().collect();
            let eps = 1e-2f32;
            for (i, &a) in analytic.iter().enumerate() {
                let mut plus = e.clone();
                *plus.params_mut().nth(i).unwrap() += eps;
                let mut minus = e.clone();
                *minus.params_mut().nth(i).unwrap() -= eps;
                let (lp, lm) = (run(&plus).0, run(&minus).0);
                assert_abs_diff_eq!(a as f64, (lp - lm) / (2.0 * eps as f64), epsilon = 2e-3);
            }
        }
    }

    #[test]
    fn zero_rate_mask_matches_unmasked_bitwise() {
        use rand::SeedableRng;
        let e = small_ensemble();
        let objective = Objective::squared();
        let x = array![[0.3f32, -0.7], [-0.2, 0.9], [1.1, 0.1]];
        let y = array![[1.0f32], [-0.5], [0.3]];
        let mask = GroupMask::sample(&mut rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(1), 3, 2, 0.0);
        let run = |group_mask: Option<&GroupMask>| {
            let pass = RowGradient {
                ensemble: &e,
                objective: &objective,
                temperature: Temperature::new(0.6).unwrap(),
                output_penalty: 0.1,
                group_mask,
            };
            pass.batch(x.view(), y.view(), &[0, 1, 2], Parallelism::Sequential).unwrap()
        };
        let (plain, masked) = (run(None), run(Some(&mask)));
        assert_eq!(plain.0.to_bits(), masked.0.to_bits());
        assert_eq!(plain.1, masked.1);
    }

    #[test]
    fn fully_dropped_row_only_trains_bias() {
        let e = small_ensemble();
        let objective = Objective::squared();
        let x = array![[0.3f32, -0.7]];
        let y = array![[1.0f32]];
        let dropped = GroupMask::from_scales(Array2::zeros((1, 2)));
        let pass = RowGradient {
            ensemble: &e,
            objective: &objective,
            temperature: Temperature::new(0.5).unwrap(),
            output_penalty: 0.0,
            group_mask: Some(&dropped),
        };
        let (loss, grad) = pass.batch(x.view(), y.view(), &[0], Parallelism::Sequential).unwrap();
        // prediction is the bias alone
        assert_abs_diff_eq!(loss, 0.5 * (1.0 - 0.2f64).powi(2), epsilon = 1e-6);
        assert!(grad.bias()[0] != 0.0);
        assert!(grad.trees().iter().all(|t| t.params().all(|&g| g == 0.0)));
    }
}
