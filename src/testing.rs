//! Testing utilities shared by unit tests, integration tests and benches.
//!
//! - assertion helpers for float slices
//! - hand-built and random trees and ensembles
//! - synthetic datasets with known additive structure ([`data`])

pub mod data;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::repr::{Ensemble, EnsembleError, FeatureGroup, GroupId, ObliviousTree, TreeError};
use crate::soft::{SelectionFn, Temperature};

/// Default tolerance for floating point comparisons of O(1) values.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// Assert that two slices of f32 values are approximately equal element-wise.
///
/// # Panics
///
/// Panics if lengths differ or any element differs by more than tolerance.
pub fn assert_slice_approx_eq(actual: &[f32], expected: &[f32], tolerance: f32, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: length mismatch - got {}, expected {}",
        actual.len(),
        expected.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        let diff = (a - e).abs();
        assert!(diff <= tolerance, "{context}[{i}]: {a} ≠ {e} (diff={diff}, tolerance={tolerance})");
    }
}

/// Depth-1 single-feature tree: `left` below `threshold`, `right` at or above.
pub fn step_tree(threshold: f32, left: f32, right: f32) -> Result<ObliviousTree, TreeError> {
    ObliviousTree::from_rows(&[(vec![0.0], threshold, 0.0)], &[vec![left], vec![right]])
}

/// Tree with parameters drawn uniformly: logits in `±1`, thresholds in
/// `±2`, log-sharpness in `[-1, 1]`, leaves in `±1`.
pub fn random_tree<R: Rng>(
    rng: &mut R,
    arity: usize,
    depth: usize,
    n_outputs: usize,
) -> Result<ObliviousTree, TreeError> {
    let levels: Vec<(Vec<f32>, f32, f32)> = (0..depth)
        .map(|_| {
            let logits = (0..arity).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (logits, rng.gen_range(-2.0..2.0), rng.gen_range(-1.0..1.0))
        })
        .collect();
    let leaves: Vec<Vec<f32>> = (0..1usize << depth)
        .map(|_| (0..n_outputs).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    if depth == 0 {
        return ObliviousTree::constant(arity, &leaves[0]);
    }
    ObliviousTree::from_rows(&levels, &leaves)
}

/// Shape of a random ensemble.
#[derive(Debug, Clone)]
pub struct RandomEnsembleParams {
    pub n_features: usize,
    pub pairs: Vec<[usize; 2]>,
    pub trees_per_group: usize,
    pub depth: usize,
    pub n_outputs: usize,
    pub selection: SelectionFn,
    pub temperature: Temperature,
    pub seed: u64,
}

impl Default for RandomEnsembleParams {
    fn default() -> Self {
        Self {
            n_features: 4,
            pairs: vec![[0, 1]],
            trees_per_group: 2,
            depth: 3,
            n_outputs: 1,
            selection: SelectionFn::Softmax,
            temperature: Temperature::default(),
            seed: 0,
        }
    }
}

/// Sealed ensemble with random trees, `trees_per_group` per group, bound
/// round-robin so groups interleave in the arena.
pub fn random_ensemble(params: &RandomEnsembleParams) -> Result<Ensemble, EnsembleError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
    let groups = FeatureGroup::enumerate(params.n_features, &params.pairs)?;
    let bias: Vec<f32> = (0..params.n_outputs).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut ensemble = Ensemble::new(params.n_features, params.n_outputs, groups.clone())?
        .with_selection(params.selection)
        .with_temperature(params.temperature)
        .with_bias(bias)?;
    for _ in 0..params.trees_per_group {
        for (g, group) in groups.iter().enumerate() {
            let tree = random_tree(&mut rng, group.arity(), params.depth, params.n_outputs)
                .map_err(|source| EnsembleError::InvalidTree { tree: ensemble.n_trees(), source })?;
            ensemble.bind(tree, GroupId(g as u32))?;
        }
    }
    ensemble.seal();
    Ok(ensemble)
}
