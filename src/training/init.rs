//! Data-aware parameter initialization.
//!
//! - thresholds: the routed group value of a randomly drawn training row
//! - log-sharpness: `-ln(median |value - threshold|)` over a row sample, so
//!   typical split logits start near ±1
//! - leaves: uniform in `±init_scale`
//! - logits: uniform in `±LOGIT_INIT_SCALE`
//! - bias: the objective's base score

use ndarray::{ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::objectives::{Objective, ObjectiveFn};
use crate::repr::{Ensemble, EnsembleError, FeatureGroup, GroupId, ObliviousTree};
use crate::soft::{self, threshold::MAX_LOG_SHARPNESS, SelectionFn, Temperature};

/// Initial selection logits are drawn from `±LOGIT_INIT_SCALE`.
pub const LOGIT_INIT_SCALE: f32 = 0.01;

/// Rows sampled to estimate the initial sharpness of each split.
pub const SHARPNESS_SAMPLE_ROWS: usize = 256;

/// Everything needed to build a freshly initialized ensemble.
#[derive(Debug, Clone)]
pub struct InitParams {
    pub groups: Vec<FeatureGroup>,
    /// Total number of trees, assigned to groups round-robin.
    pub n_trees: usize,
    pub depth: usize,
    pub selection: SelectionFn,
    pub init_scale: f32,
    pub seed: u64,
}

/// Group of the `tree`-th tree under round-robin assignment.
#[inline]
pub fn round_robin_group(tree: usize, n_groups: usize) -> GroupId {
    GroupId((tree % n_groups) as u32)
}

#[inline]
fn uniform(rng: &mut Xoshiro256PlusPlus, scale: f32) -> f32 {
    if scale > 0.0 {
        rng.gen_range(-scale..scale)
    } else {
        0.0
    }
}

/// Build and initialize an ensemble from training data.
pub fn init_ensemble(
    params: &InitParams,
    objective: &Objective,
    features: ArrayView2<'_, f32>,
    targets: ArrayView2<'_, f32>,
) -> Result<Ensemble, EnsembleError> {
    let n_rows = features.nrows();
    let mut ensemble = Ensemble::new(features.ncols(), objective.n_outputs(), params.groups.clone())?
        .with_selection(params.selection)
        .with_bias(objective.base_score(targets))?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
    let n_groups = params.groups.len();

    for t in 0..params.n_trees {
        let group_id = round_robin_group(t, n_groups);
        let group = params.groups[group_id.index()];
        let arity = group.arity();
        let mut tree = ObliviousTree::zeros(arity, params.depth, objective.n_outputs());

        for level in 0..params.depth {
            let logits: Vec<f32> = (0..arity).map(|_| uniform(&mut rng, LOGIT_INIT_SCALE)).collect();
            let weights = soft::route(params.selection, &logits, Temperature::default());
            let routed = |row: usize| soft::gather(&weights, group.gather(features.row(row)).as_slice());

            let threshold = if n_rows > 0 { routed(rng.gen_range(0..n_rows)) } else { 0.0 };
            let mut spread: Vec<f32> = (0..SHARPNESS_SAMPLE_ROWS.min(n_rows))
                .map(|_| (routed(rng.gen_range(0..n_rows)) - threshold).abs())
                .collect();
            let log_sharpness = if spread.is_empty() {
                0.0
            } else {
                let mid = spread.len() / 2;
                let (_, median, _) = spread.select_nth_unstable_by(mid, f32::total_cmp);
                -(median.max(1e-6)).ln()
            };

            tree.logits_mut().row_mut(level).assign(&ArrayView1::from(&logits[..]));
            tree.thresholds_mut()[level] = threshold;
            tree.log_sharpness_mut()[level] = log_sharpness.clamp(-MAX_LOG_SHARPNESS, MAX_LOG_SHARPNESS);
        }
        for leaf in tree.leaves_mut().iter_mut() {
            *leaf = uniform(&mut rng, params.init_scale);
        }
        ensemble.bind(tree, group_id)?;
    }
    debug_assert_eq!(ensemble.trees_per_group().iter().sum::<usize>(), params.n_trees);
    Ok(ensemble)
}
