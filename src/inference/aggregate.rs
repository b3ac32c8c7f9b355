//! Additive aggregation of per-group contributions.
//!
//! Group contributions are computed in one grouped-reduction pass over the
//! tree arena: each tree's output is added to the row of its group id.
//! Totals are always formed the same way, starting from the bias and adding
//! group rows in ascending group order, so a [`Decomposition`] sums to the
//! prediction bit for bit.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use super::forward::{forward_tree, TreeTrace};
use crate::repr::{Ensemble, FeatureGroup, GroupId};
use crate::soft::Temperature;
use crate::utils::Parallelism;

/// Bias plus one contribution row per group.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    bias: Vec<f32>,
    /// `[n_groups, n_outputs]`.
    groups: Array2<f32>,
}

impl Decomposition {
    pub fn new(bias: Vec<f32>, groups: Array2<f32>) -> Self {
        debug_assert_eq!(bias.len(), groups.ncols());
        Self { bias, groups }
    }

    #[inline]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Contributions, shape `[n_groups, n_outputs]`.
    #[inline]
    pub fn contributions(&self) -> ArrayView2<'_, f32> {
        self.groups.view()
    }

    /// Contribution of one group.
    #[inline]
    pub fn group(&self, group: GroupId) -> ArrayView1<'_, f32> {
        self.groups.row(group.index())
    }

    /// `bias + Σ contributions`, summed in ascending group order.
    pub fn total(&self) -> Vec<f32> {
        let mut out = self.bias.clone();
        sum_groups_into(self.groups.view(), &mut out);
        out
    }

    /// Sum of singleton contributions and sum of pair contributions.
    ///
    /// `groups` must be the ensemble's group list.
    pub fn main_and_interactions(&self, groups: &[FeatureGroup]) -> (Vec<f32>, Vec<f32>) {
        let n_outputs = self.bias.len();
        let mut main = vec![0.0; n_outputs];
        let mut pairs = vec![0.0; n_outputs];
        for (group, row) in groups.iter().zip(self.groups.outer_iter()) {
            let target = if group.is_pair() { &mut pairs } else { &mut main };
            for (t, &c) in target.iter_mut().zip(row) {
                *t += c;
            }
        }
        (main, pairs)
    }
}

/// The single summation used everywhere a total is formed.
#[inline]
pub(crate) fn sum_groups_into(groups: ArrayView2<'_, f32>, out: &mut [f32]) {
    for row in groups.outer_iter() {
        for (o, &c) in out.iter_mut().zip(row) {
            *o += c;
        }
    }
}

/// Per-tree traces and a per-tree output buffer, reused across rows.
#[derive(Debug, Clone)]
pub struct ForwardScratch {
    pub(crate) traces: Vec<TreeTrace>,
    tree_out: Vec<f32>,
}

impl ForwardScratch {
    pub fn new(ensemble: &Ensemble) -> Self {
        Self {
            traces: ensemble.trees().iter().map(TreeTrace::for_tree).collect(),
            tree_out: vec![0.0; ensemble.n_outputs()],
        }
    }

    /// Trace of tree `tree` from the most recent forward call.
    #[inline]
    pub fn trace(&self, tree: usize) -> &TreeTrace {
        &self.traces[tree]
    }
}

impl Ensemble {
    /// Per-group contributions of one row at `temperature`, written into
    /// `contributions` (`[n_groups, n_outputs]`, overwritten).
    ///
    /// Each tree sees only its group's gathered feature values.
    ///
    /// # Panics
    ///
    /// If `row.len()` differs from `n_features` or `contributions` is not
    /// `[n_groups, n_outputs]`.
    pub fn contributions_into(
        &self,
        row: ArrayView1<'_, f32>,
        temperature: Temperature,
        scratch: &mut ForwardScratch,
        mut contributions: ArrayViewMut2<'_, f32>,
    ) {
        assert_eq!(row.len(), self.n_features(), "row.len() must equal n_features");
        assert_eq!(
            contributions.dim(),
            (self.n_groups(), self.n_outputs()),
            "contributions must be [n_groups, n_outputs]"
        );
        if scratch.traces.len() != self.n_trees() {
            *scratch = ForwardScratch::new(self);
        }
        contributions.fill(0.0);
        let groups = self.groups();
        for ((tree, group), trace) in self.trees_with_groups().zip(scratch.traces.iter_mut()) {
            let values = groups[group.index()].gather(row);
            scratch.tree_out.fill(0.0);
            forward_tree(tree, values.as_slice(), self.selection(), temperature, trace, &mut scratch.tree_out);
            for (c, &v) in contributions.row_mut(group.index()).iter_mut().zip(&scratch.tree_out) {
                *c += v;
            }
        }
    }

    /// Contribution of a single group for its gathered feature values.
    ///
    /// Evaluates only the trees bound to `group`, in arena order, so the
    /// result equals that group's row of [`Ensemble::forward`].
    pub fn group_contribution_into(
        &self,
        group: GroupId,
        values: &[f32],
        temperature: Temperature,
        trace: &mut TreeTrace,
        tree_out: &mut [f32],
        mut out: ArrayViewMut1<'_, f32>,
    ) {
        out.fill(0.0);
        for tree in self.trees_in_group(group) {
            tree_out.fill(0.0);
            forward_tree(tree, values, self.selection(), temperature, trace, tree_out);
            for (c, &v) in out.iter_mut().zip(tree_out.iter()) {
                *c += v;
            }
        }
    }

    /// Full decomposition of one row at the inference temperature.
    pub fn forward(&self, row: ArrayView1<'_, f32>) -> Decomposition {
        let mut scratch = ForwardScratch::new(self);
        self.forward_with(row, self.temperature(), &mut scratch)
    }

    /// Full decomposition of one row at an explicit temperature.
    pub fn forward_with(
        &self,
        row: ArrayView1<'_, f32>,
        temperature: Temperature,
        scratch: &mut ForwardScratch,
    ) -> Decomposition {
        let mut groups = Array2::zeros((self.n_groups(), self.n_outputs()));
        self.contributions_into(row, temperature, scratch, groups.view_mut());
        Decomposition::new(self.bias().to_vec(), groups)
    }

    /// `bias + Σ contributions` for one row at the inference temperature.
    pub fn forward_total(&self, row: ArrayView1<'_, f32>) -> Vec<f32> {
        self.forward(row).total()
    }
}

/// Batch prediction over a feature matrix.
///
/// Rows are processed in blocks; blocks run in parallel when allowed. Every
/// row goes through the same per-row code path as [`Ensemble::forward`], so
/// batch results equal single-row results exactly.
#[derive(Debug)]
pub struct Predictor<'e> {
    ensemble: &'e Ensemble,
    temperature: Temperature,
    block_size: usize,
}

/// Default number of rows per block.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

impl<'e> Predictor<'e> {
    pub fn new(ensemble: &'e Ensemble) -> Self {
        Self { ensemble, temperature: ensemble.temperature(), block_size: DEFAULT_BLOCK_SIZE }
    }

    /// Evaluate at a temperature other than the ensemble's inference one.
    pub fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Per-group contributions, shape `[n_rows, n_groups, n_outputs]`.
    pub fn predict_contributions(&self, features: ArrayView2<'_, f32>, parallelism: Parallelism) -> Array3<f32> {
        let e = self.ensemble;
        let n_rows = features.nrows();
        let mut out = Array3::zeros((n_rows, e.n_groups(), e.n_outputs()));
        let blocks = out
            .axis_chunks_iter_mut(Axis(0), self.block_size)
            .zip(features.axis_chunks_iter(Axis(0), self.block_size));
        parallelism.maybe_par_bridge_for_each_init(
            blocks,
            || ForwardScratch::new(e),
            |scratch, (mut out_block, feature_block)| {
                for (row, contrib) in feature_block.outer_iter().zip(out_block.outer_iter_mut()) {
                    e.contributions_into(row, self.temperature, scratch, contrib);
                }
            },
        );
        out
    }

    /// Raw scores (`bias + Σ contributions`), shape `[n_rows, n_outputs]`.
    pub fn predict_raw(&self, features: ArrayView2<'_, f32>, parallelism: Parallelism) -> Array2<f32> {
        let e = self.ensemble;
        let n_rows = features.nrows();
        let mut out = Array2::zeros((n_rows, e.n_outputs()));
        let blocks = out
            .axis_chunks_iter_mut(Axis(0), self.block_size)
            .zip(features.axis_chunks_iter(Axis(0), self.block_size));
        parallelism.maybe_par_bridge_for_each_init(
            blocks,
            || (ForwardScratch::new(e), Array2::zeros((e.n_groups(), e.n_outputs()))),
            |(scratch, contrib), (mut out_block, feature_block)| {
                for (row, mut total) in feature_block.outer_iter().zip(out_block.outer_iter_mut()) {
                    e.contributions_into(row, self.temperature, scratch, contrib.view_mut());
                    let mut acc = e.bias().to_vec();
                    sum_groups_into(contrib.view(), &mut acc);
                    total.assign(&ArrayView1::from(&acc[..]));
                }
            },
        );
        out
    }
}
