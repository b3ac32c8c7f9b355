//! Feature groups: the unit of additivity.
//!
//! Every tree is bound to exactly one [`FeatureGroup`] and only ever sees
//! the values of that group's features (see [`FeatureGroup::gather`]).

use std::fmt;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Largest group arity (feature pairs).
pub const MAX_GROUP_ARITY: usize = 2;

/// Index of a group inside an ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Structural errors for feature groups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("feature group must contain 1 or 2 features, got {0}")]
    InvalidArity(usize),
    #[error("feature group repeats feature {0}")]
    RepeatedFeature(usize),
    #[error("feature group {group} reads feature {feature}, but the model has {n_features} features")]
    FeatureOutOfRange { group: FeatureGroup, feature: usize, n_features: usize },
    #[error("feature group {0} is listed more than once")]
    Duplicate(FeatureGroup),
}

/// An ordered tuple of one (GAM) or two (GA2M) feature indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Single(usize),
    Pair([usize; 2]),
}

impl FeatureGroup {
    /// Build a group from a feature list of length 1 or 2.
    pub fn new(features: &[usize]) -> Result<Self, GroupError> {
        match *features {
            [f] => Ok(Self::Single(f)),
            [a, b] if a == b => Err(GroupError::RepeatedFeature(a)),
            [a, b] => Ok(Self::Pair([a, b])),
            _ => Err(GroupError::InvalidArity(features.len())),
        }
    }

    #[inline]
    pub fn features(&self) -> &[usize] {
        match self {
            Self::Single(f) => std::slice::from_ref(f),
            Self::Pair(fs) => fs,
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.features().len()
    }

    #[inline]
    pub fn is_pair(&self) -> bool {
        matches!(self, Self::Pair(_))
    }

    #[inline]
    pub fn contains(&self, feature: usize) -> bool {
        self.features().contains(&feature)
    }

    /// Same features regardless of order.
    pub fn same_features(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> Self {
        match *self {
            Self::Pair([a, b]) if a > b => Self::Pair([b, a]),
            g => g,
        }
    }

    /// Check every feature index against the model's feature count.
    pub fn validate(&self, n_features: usize) -> Result<(), GroupError> {
        if let Self::Pair([a, b]) = *self {
            if a == b {
                return Err(GroupError::RepeatedFeature(a));
            }
        }
        match self.features().iter().find(|&&f| f >= n_features) {
            Some(&feature) => Err(GroupError::FeatureOutOfRange { group: *self, feature, n_features }),
            None => Ok(()),
        }
    }

    /// Read this group's feature values from a full input row.
    ///
    /// This is the only place a row is read on behalf of a tree, which is
    /// what makes a group's contribution independent of every other feature.
    #[inline]
    pub fn gather(&self, row: ArrayView1<'_, f32>) -> GroupValues {
        match *self {
            Self::Single(f) => GroupValues::single(row[f]),
            Self::Pair([a, b]) => GroupValues::pair(row[a], row[b]),
        }
    }

    /// Enumerate all singleton groups followed by the explicit pairs.
    pub fn enumerate(n_features: usize, pairs: &[[usize; 2]]) -> Result<Vec<Self>, GroupError> {
        let mut groups: Vec<Self> = (0..n_features).map(Self::Single).collect();
        for &pair in pairs {
            let group = Self::new(&pair)?;
            group.validate(n_features)?;
            if groups.iter().any(|g| g.same_features(&group)) {
                return Err(GroupError::Duplicate(group));
            }
            groups.push(group);
        }
        Ok(groups)
    }
}

impl fmt::Display for FeatureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(a) => write!(f, "(x{a})"),
            Self::Pair([a, b]) => write!(f, "(x{a}, x{b})"),
        }
    }
}

/// The gathered feature values of one group for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupValues {
    values: [f32; MAX_GROUP_ARITY],
    len: usize,
}

impl GroupValues {
    #[inline]
    pub fn single(x: f32) -> Self {
        Self { values: [x, 0.0], len: 1 }
    }

    #[inline]
    pub fn pair(x: f32, y: f32) -> Self {
        Self { values: [x, y], len: 2 }
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }
}

/// How groups are enumerated for a model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    /// One singleton group per feature.
    #[default]
    Gam,
    /// All singletons plus an explicit list of feature pairs, trained jointly.
    Ga2m { pairs: Vec<[usize; 2]> },
}

impl ModelMode {
    /// Pairs requested by this mode (empty for GAM).
    pub fn pairs(&self) -> &[[usize; 2]] {
        match self {
            Self::Gam => &[],
            Self::Ga2m { pairs } => pairs,
        }
    }

    /// Enumerate the groups for `n_features` inputs.
    pub fn groups(&self, n_features: usize) -> Result<Vec<FeatureGroup>, GroupError> {
        FeatureGroup::enumerate(n_features, self.pairs())
    }
}
