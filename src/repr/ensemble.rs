//! Constrained tree ensemble: an arena of trees plus a parallel array of
//! group ids.
//!
//! Trees are bound to groups with [`Ensemble::bind`] before training. Once
//! the ensemble is sealed (training started, or loaded as a snapshot) its
//! structure is immutable; only parameter values change.

use serde::{Deserialize, Serialize};

use super::group::{FeatureGroup, GroupError, GroupId};
use super::tree::{ObliviousTree, TreeError};
use crate::soft::{SelectionFn, Temperature};

/// Structural errors for [`Ensemble`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnsembleError {
    #[error("ensemble needs at least one output")]
    NoOutputs,
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error("group {group} {features} is listed more than once")]
    DuplicateGroup { group: GroupId, features: FeatureGroup },
    #[error("unknown group {group}; ensemble has {n_groups} groups")]
    UnknownGroup { group: GroupId, n_groups: usize },
    #[error("cannot bind tree to group {group}: ensemble structure is sealed once training starts")]
    Sealed { group: GroupId },
    #[error("tree {tree} routes over {arity} features but group {group} {features} has {expected}")]
    RoutingOutsideGroup {
        tree: usize,
        group: GroupId,
        features: FeatureGroup,
        arity: usize,
        expected: usize,
    },
    #[error("tree {tree} has {got} outputs, ensemble has {expected}")]
    OutputDimMismatch { tree: usize, expected: usize, got: usize },
    #[error("tree {tree} is invalid: {source}")]
    InvalidTree { tree: usize, source: TreeError },
    #[error("bias has {got} entries, expected {expected}")]
    BiasLenMismatch { expected: usize, got: usize },
    #[error("bias holds a non-finite value")]
    NonFiniteBias,
    #[error("tree group table has {got} entries for {n_trees} trees")]
    TreeGroupsLenMismatch { n_trees: usize, got: usize },
}

/// Ensemble of soft oblivious trees, each bound to one [`FeatureGroup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    n_features: usize,
    n_outputs: usize,
    groups: Vec<FeatureGroup>,
    trees: Vec<ObliviousTree>,
    tree_groups: Vec<GroupId>,
    bias: Vec<f32>,
    selection: SelectionFn,
    /// Temperature used for inference and shape extraction.
    temperature: Temperature,
    #[serde(skip)]
    sealed: bool,
}

impl Ensemble {
    /// Create an empty ensemble over the given groups.
    ///
    /// Validates each group against `n_features` and rejects repeated groups.
    pub fn new(
        n_features: usize,
        n_outputs: usize,
        groups: Vec<FeatureGroup>,
    ) -> Result<Self, EnsembleError> {
        if n_outputs == 0 {
            return Err(EnsembleError::NoOutputs);
        }
        Self::validate_groups(&groups, n_features)?;
        Ok(Self {
            n_features,
            n_outputs,
            groups,
            trees: Vec::new(),
            tree_groups: Vec::new(),
            bias: vec![0.0; n_outputs],
            selection: SelectionFn::default(),
            temperature: Temperature::HARD,
            sealed: false,
        })
    }

    fn validate_groups(groups: &[FeatureGroup], n_features: usize) -> Result<(), EnsembleError> {
        for (i, group) in groups.iter().enumerate() {
            group.validate(n_features)?;
            if groups[..i].iter().any(|g| g.same_features(group)) {
                return Err(EnsembleError::DuplicateGroup {
                    group: GroupId(i as u32),
                    features: *group,
                });
            }
        }
        Ok(())
    }

    pub fn with_selection(mut self, selection: SelectionFn) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_bias(mut self, bias: Vec<f32>) -> Result<Self, EnsembleError> {
        if bias.len() != self.n_outputs {
            return Err(EnsembleError::BiasLenMismatch { expected: self.n_outputs, got: bias.len() });
        }
        self.bias = bias;
        Ok(self)
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Bind a tree to a group. Returns the tree's index in the arena.
    ///
    /// Fails once the ensemble is sealed, for unknown groups, and for trees
    /// whose routing arity or output width does not match.
    pub fn bind(&mut self, tree: ObliviousTree, group: GroupId) -> Result<usize, EnsembleError> {
        let tree_idx = self.trees.len();
        if self.sealed {
            return Err(EnsembleError::Sealed { group });
        }
        let features = *self.group(group)?;
        tree.validate().map_err(|source| EnsembleError::InvalidTree { tree: tree_idx, source })?;
        Self::check_tree(tree_idx, &tree, group, &features, self.n_outputs)?;
        self.trees.push(tree);
        self.tree_groups.push(group);
        Ok(tree_idx)
    }

    fn check_tree(
        tree_idx: usize,
        tree: &ObliviousTree,
        group: GroupId,
        features: &FeatureGroup,
        n_outputs: usize,
    ) -> Result<(), EnsembleError> {
        if tree.arity() != features.arity() {
            return Err(EnsembleError::RoutingOutsideGroup {
                tree: tree_idx,
                group,
                features: *features,
                arity: tree.arity(),
                expected: features.arity(),
            });
        }
        if tree.n_outputs() != n_outputs {
            return Err(EnsembleError::OutputDimMismatch {
                tree: tree_idx,
                expected: n_outputs,
                got: tree.n_outputs(),
            });
        }
        Ok(())
    }

    /// Freeze the structure. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Re-check every structural invariant. Used after deserialization.
    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.n_outputs == 0 {
            return Err(EnsembleError::NoOutputs);
        }
        Self::validate_groups(&self.groups, self.n_features)?;
        if self.bias.len() != self.n_outputs {
            return Err(EnsembleError::BiasLenMismatch { expected: self.n_outputs, got: self.bias.len() });
        }
        if self.bias.iter().any(|b| !b.is_finite()) {
            return Err(EnsembleError::NonFiniteBias);
        }
        if self.tree_groups.len() != self.trees.len() {
            return Err(EnsembleError::TreeGroupsLenMismatch {
                n_trees: self.trees.len(),
                got: self.tree_groups.len(),
            });
        }
        for (tree_idx, (tree, &group)) in self.trees.iter().zip(&self.tree_groups).enumerate() {
            let features = *self.group(group)?;
            tree.validate().map_err(|source| EnsembleError::InvalidTree { tree: tree_idx, source })?;
            Self::check_tree(tree_idx, tree, group, &features, self.n_outputs)?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    #[inline]
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn groups(&self) -> &[FeatureGroup] {
        &self.groups
    }

    /// Look up a group by id.
    pub fn group(&self, group: GroupId) -> Result<&FeatureGroup, EnsembleError> {
        self.groups
            .get(group.index())
            .ok_or(EnsembleError::UnknownGroup { group, n_groups: self.groups.len() })
    }

    /// Find the id of a group with the same features (in any order).
    pub fn group_id(&self, features: &FeatureGroup) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.same_features(features))
            .map(|i| GroupId(i as u32))
    }

    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> {
        (0..self.groups.len() as u32).map(GroupId)
    }

    #[inline]
    pub fn trees(&self) -> &[ObliviousTree] {
        &self.trees
    }

    #[inline]
    pub fn tree_groups(&self) -> &[GroupId] {
        &self.tree_groups
    }

    /// Iterate over trees with their group assignments.
    pub fn trees_with_groups(&self) -> impl Iterator<Item = (&ObliviousTree, GroupId)> {
        self.trees.iter().zip(self.tree_groups.iter().copied())
    }

    /// Trees bound to `group`, in arena order.
    pub fn trees_in_group(&self, group: GroupId) -> impl Iterator<Item = &ObliviousTree> {
        self.trees_with_groups().filter(move |(_, g)| *g == group).map(|(t, _)| t)
    }

    /// Number of trees bound to each group.
    pub fn trees_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0; self.groups.len()];
        for g in &self.tree_groups {
            counts[g.index()] += 1;
        }
        counts
    }

    #[inline]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    #[inline]
    pub fn selection(&self) -> SelectionFn {
        self.selection
    }

    /// Temperature used for inference and extraction.
    #[inline]
    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    /// True when at least one pair group exists.
    pub fn has_pairs(&self) -> bool {
        self.groups.iter().any(FeatureGroup::is_pair)
    }

    // =========================================================================
    // Parameters (crate-internal; the optimizer is the only writer)
    // =========================================================================

    pub(crate) fn set_temperature(&mut self, temperature: Temperature) {
        self.temperature = temperature;
    }

    pub(crate) fn trees_mut(&mut self) -> &mut [ObliviousTree] {
        &mut self.trees
    }

    pub(crate) fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Total number of scalar parameters (bias + trees).
    pub fn n_params(&self) -> usize {
        self.bias.len() + self.trees.iter().map(ObliviousTree::n_params).sum::<usize>()
    }

    /// All parameters: bias first, then each tree in arena order.
    pub fn params(&self) -> impl Iterator<Item = &f32> {
        self.bias.iter().chain(self.trees.iter().flat_map(ObliviousTree::params))
    }

    pub(crate) fn params_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.bias.iter_mut().chain(self.trees.iter_mut().flat_map(ObliviousTree::params_mut))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious_tree;

    fn gam(n: usize) -> Ensemble {
        Ensemble::new(n, 1, (0..n).map(FeatureGroup::Single).collect()).unwrap()
    }

    fn stump(threshold: f32) -> ObliviousTree {
        oblivious_tree! { levels = [([0.0], threshold, 0.0)]; leaves = [[-1.0], [1.0]] }.unwrap()
    }

    #[test]
    fn bind_tracks_groups() {
        let mut e = gam(2);
        assert_eq!(e.bind(stump(0.0), GroupId(1)).unwrap(), 0);
        assert_eq!(e.bind(stump(1.0), GroupId(0)).unwrap(), 1);
        assert_eq!(e.tree_groups(), &[GroupId(1), GroupId(0)]);
        assert_eq!(e.trees_per_group(), vec![1, 1]);
        assert_eq!(e.trees_in_group(GroupId(1)).count(), 1);
    }

    #[test]
    fn bind_after_seal_fails() {
        let mut e = gam(1);
        e.seal();
        assert!(matches!(e.bind(stump(0.0), GroupId(0)), Err(EnsembleError::Sealed { .. })));
    }

    #[test]
    fn bind_rejects_arity_mismatch() {
        let mut e = Ensemble::new(2, 1, vec![FeatureGroup::Pair([0, 1])]).unwrap();
        let err = e.bind(stump(0.0), GroupId(0)).unwrap_err();
        assert!(matches!(err, EnsembleError::RoutingOutsideGroup { arity: 1, expected: 2, .. }));
    }

    #[test]
    fn bind_rejects_unknown_group_and_output_mismatch() {
        let mut e = gam(1);
        assert!(matches!(e.bind(stump(0.0), GroupId(3)), Err(EnsembleError::UnknownGroup { .. })));
        let wide = ObliviousTree::zeros(1, 1, 2);
        assert!(matches!(e.bind(wide, GroupId(0)), Err(EnsembleError::OutputDimMismatch { .. })));
    }

    #[test]
    fn new_rejects_bad_groups() {
        let err = Ensemble::new(2, 1, vec![FeatureGroup::Single(0), FeatureGroup::Single(0)]).unwrap_err();
        assert!(matches!(err, EnsembleError::DuplicateGroup { .. }));
        let err = Ensemble::new(2, 1, vec![FeatureGroup::Single(4)]).unwrap_err();
        assert!(matches!(err, EnsembleError::Group(GroupError::FeatureOutOfRange { .. })));
        assert!(matches!(Ensemble::new(2, 0, vec![]), Err(EnsembleError::NoOutputs)));
    }

    #[test]
    fn params_cover_bias_and_trees() {
        let mut e = gam(1);
        e.bind(stump(0.0), GroupId(0)).unwrap();
        assert_eq!(e.n_params(), 1 + (1 + 1 + 1 + 2));
        assert_eq!(e.params().count(), e.n_params());
        assert_eq!(e.params_mut().count(), e.n_params());
    }

    #[test]
    fn validate_catches_corrupt_snapshot() {
        let mut e = gam(1);
        e.bind(stump(0.0), GroupId(0)).unwrap();
        e.tree_groups[0] = GroupId(9);
        assert!(matches!(e.validate(), Err(EnsembleError::UnknownGroup { .. })));
    }
}
