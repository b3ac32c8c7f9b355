//! Oblivious tree representation (struct-of-arrays).
//!
//! All nodes at depth `d` share one parameter triple: the feature-selection
//! logits `logits[d, ..]`, the threshold `thresholds[d]` and the log-space
//! sharpness `log_sharpness[d]`. A tree of depth `D` therefore has `O(D)`
//! routing parameters and a leaf table of `2^D × n_outputs` values.
//!
//! Leaf index convention: the decision at level 0 is the most significant
//! bit, and a set bit means "went right".

use std::borrow::Cow;

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

use super::group::MAX_GROUP_ARITY;

/// Deepest supported tree (bounds the `2^D` leaf table).
pub const MAX_DEPTH: usize = 12;

/// Structural validation errors for [`ObliviousTree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: usize, max: usize },
    #[error("tree reads {0} features per level; expected 1 or 2")]
    InvalidArity(usize),
    #[error("per-level arrays disagree: {logits} logit rows, {thresholds} thresholds, {sharpness} sharpness values")]
    LevelLenMismatch { logits: usize, thresholds: usize, sharpness: usize },
    #[error("leaf table has {got} rows, expected 2^{depth} = {expected}")]
    LeafTableShape { depth: usize, expected: usize, got: usize },
    #[error("leaf table needs at least one output column")]
    NoOutputs,
    #[error("tree holds a non-finite parameter")]
    NonFinite,
}

/// Soft oblivious decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTree {
    /// Feature-selection logits, shape `[depth, arity]`.
    logits: Array2<f32>,
    /// Split threshold per level.
    thresholds: Vec<f32>,
    /// Log-space split sharpness per level.
    log_sharpness: Vec<f32>,
    /// Leaf values, shape `[2^depth, n_outputs]`.
    leaves: Array2<f32>,
}

impl ObliviousTree {
    /// Create a tree from its per-level arrays and leaf table.
    pub fn new(
        logits: Array2<f32>,
        thresholds: Vec<f32>,
        log_sharpness: Vec<f32>,
        leaves: Array2<f32>,
    ) -> Result<Self, TreeError> {
        let tree = Self { logits, thresholds, log_sharpness, leaves };
        tree.validate()?;
        Ok(tree)
    }

    /// Depth-0 placeholder returning a constant leaf. Never trained.
    pub fn constant(arity: usize, leaf: &[f32]) -> Result<Self, TreeError> {
        let leaves = Array2::from_shape_vec((1, leaf.len()), leaf.to_vec())
            .map_err(|_| TreeError::NoOutputs)?;
        Self::new(Array2::zeros((0, arity)), Vec::new(), Vec::new(), leaves)
    }

    /// All-zero tree with the given shape. Used for gradient buffers and as an
    /// initialization target.
    pub fn zeros(arity: usize, depth: usize, n_outputs: usize) -> Self {
        Self {
            logits: Array2::zeros((depth, arity)),
            thresholds: vec![0.0; depth],
            log_sharpness: vec![0.0; depth],
            leaves: Array2::zeros((1 << depth, n_outputs)),
        }
    }

    /// All-zero tree with the same shape as `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.arity(), self.depth(), self.n_outputs())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), TreeError> {
        let depth = self.logits.nrows();
        if depth > MAX_DEPTH {
            return Err(TreeError::TooDeep { depth, max: MAX_DEPTH });
        }
        let arity = self.logits.ncols();
        if arity == 0 || arity > MAX_GROUP_ARITY {
            return Err(TreeError::InvalidArity(arity));
        }
        if self.thresholds.len() != depth || self.log_sharpness.len() != depth {
            return Err(TreeError::LevelLenMismatch {
                logits: depth,
                thresholds: self.thresholds.len(),
                sharpness: self.log_sharpness.len(),
            });
        }
        let expected = 1usize << depth;
        if self.leaves.nrows() != expected {
            return Err(TreeError::LeafTableShape { depth, expected, got: self.leaves.nrows() });
        }
        if self.leaves.ncols() == 0 {
            return Err(TreeError::NoOutputs);
        }
        if !self.params().all(|p| p.is_finite()) {
            return Err(TreeError::NonFinite);
        }
        Ok(())
    }

    // =========================================================================
    // Shape
    // =========================================================================

    #[inline]
    pub fn depth(&self) -> usize {
        self.thresholds.len()
    }

    /// Number of features each level selects from.
    #[inline]
    pub fn arity(&self) -> usize {
        self.logits.ncols()
    }

    #[inline]
    pub fn n_leaves(&self) -> usize {
        self.leaves.nrows()
    }

    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.leaves.ncols()
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Selection logits of one level.
    #[inline]
    pub fn level_logits(&self, level: usize) -> ArrayView1<'_, f32> {
        self.logits.row(level)
    }

    /// Selection logits of one level as a slice. Borrowed unless the
    /// logit table is not in standard layout.
    #[inline]
    pub fn level_logits_slice(&self, level: usize) -> Cow<'_, [f32]> {
        let row = self.logits.row(level);
        match row.to_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(row.to_vec()),
        }
    }

    #[inline]
    pub fn logits(&self) -> ArrayView2<'_, f32> {
        self.logits.view()
    }

    #[inline]
    pub fn logits_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.logits.view_mut()
    }

    #[inline]
    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    #[inline]
    pub fn thresholds_mut(&mut self) -> &mut [f32] {
        &mut self.thresholds
    }

    #[inline]
    pub fn log_sharpness(&self) -> &[f32] {
        &self.log_sharpness
    }

    #[inline]
    pub fn log_sharpness_mut(&mut self) -> &mut [f32] {
        &mut self.log_sharpness
    }

    #[inline]
    pub fn leaves(&self) -> ArrayView2<'_, f32> {
        self.leaves.view()
    }

    #[inline]
    pub fn leaves_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.leaves.view_mut()
    }

    /// Leaf values of one leaf.
    #[inline]
    pub fn leaf(&self, leaf: usize) -> ArrayView1<'_, f32> {
        self.leaves.row(leaf)
    }

    /// Total number of scalar parameters.
    pub fn n_params(&self) -> usize {
        self.logits.len() + self.thresholds.len() + self.log_sharpness.len() + self.leaves.len()
    }

    /// All parameters in a fixed order: logits, thresholds, sharpness, leaves.
    pub fn params(&self) -> impl Iterator<Item = &f32> {
        self.logits
            .iter()
            .chain(self.thresholds.iter())
            .chain(self.log_sharpness.iter())
            .chain(self.leaves.iter())
    }

    /// Mutable parameters in the same order as [`params`](Self::params).
    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.logits
            .iter_mut()
            .chain(self.thresholds.iter_mut())
            .chain(self.log_sharpness.iter_mut())
            .chain(self.leaves.iter_mut())
    }

    /// Elementwise `self += other` for same-shaped trees (gradient reduction).
    pub fn add_assign(&mut self, other: &Self) {
        debug_assert_eq!(self.n_params(), other.n_params());
        for (a, b) in self.params_mut().zip(other.params()) {
            *a += *b;
        }
    }

    /// Leaf index reached by a sequence of per-level right/left decisions.
    #[inline]
    pub fn leaf_index(went_right: impl IntoIterator<Item = bool>) -> usize {
        went_right.into_iter().fold(0, |idx, right| (idx << 1) | right as usize)
    }
}

/// Hand-build a tree: `oblivious_tree!(arity = 1; levels = [(logits, threshold, log_sharpness), ...]; leaves = [[..], ..])`.
///
/// Intended for tests and documentation.
#[macro_export]
macro_rules! oblivious_tree {
    (levels = [$(([$($logit:expr),+ $(,)?], $thr:expr, $ls:expr)),* $(,)?]; leaves = [$([$($leaf:expr),+ $(,)?]),+ $(,)?] $(;)?) => {{
        let levels: Vec<(Vec<f32>, f32, f32)> = vec![$((vec![$($logit as f32),+], $thr as f32, $ls as f32)),*];
        let leaves: Vec<Vec<f32>> = vec![$(vec![$($leaf as f32),+]),+];
        $crate::repr::ObliviousTree::from_rows(&levels, &leaves)
    }};
}

impl ObliviousTree {
    /// Build from per-level `(logits, threshold, log_sharpness)` rows and leaf rows.
    pub fn from_rows(levels: &[(Vec<f32>, f32, f32)], leaves: &[Vec<f32>]) -> Result<Self, TreeError> {
        let arity = levels.first().map_or(1, |(l, _, _)| l.len());
        if levels.iter().any(|(l, _, _)| l.len() != arity) {
            return Err(TreeError::InvalidArity(arity));
        }
        let logits = Array2::from_shape_vec(
            (levels.len(), arity),
            levels.iter().flat_map(|(l, _, _)| l.iter().copied()).collect(),
        )
        .map_err(|_| TreeError::InvalidArity(arity))?;
        let n_outputs = leaves.first().map_or(0, Vec::len);
        if n_outputs == 0 || leaves.iter().any(|l| l.len() != n_outputs) {
            return Err(TreeError::NoOutputs);
        }
        let leaves = Array2::from_shape_vec(
            (leaves.len(), n_outputs),
            leaves.iter().flatten().copied().collect(),
        )
        .map_err(|_| TreeError::NoOutputs)?;
        Self::new(
            logits,
            levels.iter().map(|(_, t, _)| *t).collect(),
            levels.iter().map(|(_, _, s)| *s).collect(),
            leaves,
        )
    }
}
