//! Shape functions: a group's contribution evaluated over its feature grid.
//!
//! Only the trees bound to the requested group are evaluated, at the
//! ensemble's inference temperature, on grid points recorded in the
//! [`FeatureSchema`]. Values are never interpolated or invented: every
//! grid point is a recorded value of the feature.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::data::{subsample, DataError, FeatureSchema};
use crate::inference::TreeTrace;
use crate::repr::{Ensemble, EnsembleError, FeatureGroup, GroupId, GroupValues};
use crate::utils::Parallelism;

/// Errors raised by [`ShapeExtractor`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Structure(#[from] EnsembleError),
    #[error(transparent)]
    Schema(#[from] DataError),
    #[error("schema describes {schema} features, ensemble reads {ensemble}")]
    SchemaMismatch { schema: usize, ensemble: usize },
    #[error("max_n_bins must be at least 1")]
    NoBins,
    #[error("group {group} has {expected} features, got {got} ranges")]
    RangeCountMismatch { group: GroupId, expected: usize, got: usize },
    #[error("invalid range [{lo}, {hi}] for feature {feature}")]
    InvalidRange { feature: usize, lo: f32, hi: f32 },
    #[error("range [{lo}, {hi}] for feature {feature} of group {group} lies outside its domain [{min}, {max}]")]
    OutOfDomain { group: GroupId, feature: usize, lo: f32, hi: f32, min: f32, max: f32 },
    #[error("no recorded grid values of feature {feature} fall in [{lo}, {hi}]")]
    EmptyGrid { feature: usize, lo: f32, hi: f32 },
}

/// Closed value range requested for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridRange {
    pub lo: f32,
    pub hi: f32,
}

impl GridRange {
    pub fn new(lo: f32, hi: f32) -> Self {
        Self { lo, hi }
    }
}

/// What to do with a requested range that leaves the recorded domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Intersect the range with the domain.
    #[default]
    Clamp,
    /// Fail with [`ExtractionError::OutOfDomain`].
    Strict,
}

// =============================================================================
// ShapeTable
// =============================================================================

/// Extracted shape function of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ShapeTable {
    /// Singleton group. `contributions` is `[values.len(), n_outputs]`.
    Curve {
        group: GroupId,
        feature: usize,
        values: Vec<f32>,
        contributions: Array2<f32>,
    },
    /// Pair group. `contributions` is `[x_values.len(), y_values.len(), n_outputs]`.
    Heatmap {
        group: GroupId,
        features: [usize; 2],
        x_values: Vec<f32>,
        y_values: Vec<f32>,
        contributions: Array3<f32>,
    },
}

impl ShapeTable {
    pub fn group(&self) -> GroupId {
        match self {
            Self::Curve { group, .. } | Self::Heatmap { group, .. } => *group,
        }
    }

    pub fn features(&self) -> &[usize] {
        match self {
            Self::Curve { feature, .. } => std::slice::from_ref(feature),
            Self::Heatmap { features, .. } => features,
        }
    }

    pub fn n_outputs(&self) -> usize {
        match self {
            Self::Curve { contributions, .. } => contributions.ncols(),
            Self::Heatmap { contributions, .. } => contributions.len_of(Axis(2)),
        }
    }

    /// Number of grid cells.
    pub fn len(&self) -> usize {
        match self {
            Self::Curve { values, .. } => values.len(),
            Self::Heatmap { x_values, y_values, .. } => x_values.len() * y_values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy with the mean over grid cells subtracted, per output.
    pub fn centered(&self) -> Self {
        let mut table = self.clone();
        match &mut table {
            Self::Curve { contributions, .. } => {
                if let Some(mean) = contributions.mean_axis(Axis(0)) {
                    *contributions -= &mean;
                }
            }
            Self::Heatmap { contributions, .. } => {
                let cells = contributions.len_of(Axis(0)) * contributions.len_of(Axis(1));
                if cells > 0 {
                    let sum = contributions.sum_axis(Axis(0)).sum_axis(Axis(0));
                    let mean = sum / cells as f32;
                    *contributions -= &mean;
                }
            }
        }
        table
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// ShapeExtractor
// =============================================================================

/// Read-only shape extraction against a frozen ensemble.
#[derive(Debug, Clone, Copy)]
pub struct ShapeExtractor<'a> {
    ensemble: &'a Ensemble,
    schema: &'a FeatureSchema,
    max_n_bins: usize,
    policy: RangePolicy,
}

impl<'a> ShapeExtractor<'a> {
    /// `max_n_bins` bounds the number of grid points per feature axis.
    pub fn new(ensemble: &'a Ensemble, schema: &'a FeatureSchema, max_n_bins: usize) -> Result<Self, ExtractionError> {
        if schema.n_features() != ensemble.n_features() {
            return Err(ExtractionError::SchemaMismatch {
                schema: schema.n_features(),
                ensemble: ensemble.n_features(),
            });
        }
        schema.validate()?;
        if max_n_bins == 0 {
            return Err(ExtractionError::NoBins);
        }
        Ok(Self { ensemble, schema, max_n_bins, policy: RangePolicy::default() })
    }

    pub fn with_policy(mut self, policy: RangePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shape function of `group` over each feature's full recorded grid.
    pub fn extract(&self, group: GroupId) -> Result<ShapeTable, ExtractionError> {
        let features = *self.ensemble.group(group)?;
        let grids = features
            .features()
            .iter()
            .map(|&f| self.grid(f, None, group))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.evaluate(group, features, grids))
    }

    /// Shape function of `group` restricted to one range per group feature.
    pub fn extract_with_range(&self, group: GroupId, ranges: &[GridRange]) -> Result<ShapeTable, ExtractionError> {
        let features = *self.ensemble.group(group)?;
        if ranges.len() != features.arity() {
            return Err(ExtractionError::RangeCountMismatch {
                group,
                expected: features.arity(),
                got: ranges.len(),
            });
        }
        let grids = features
            .features()
            .iter()
            .zip(ranges)
            .map(|(&f, &range)| self.grid(f, Some(range), group))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.evaluate(group, features, grids))
    }

    /// Shape functions of every group, keyed by group id.
    pub fn extract_all(&self, parallelism: Parallelism) -> Result<BTreeMap<GroupId, ShapeTable>, ExtractionError> {
        let ids: Vec<GroupId> = self.ensemble.group_ids().collect();
        parallelism
            .maybe_par_map(ids, |id| self.extract(id).map(|table| (id, table)))
            .into_iter()
            .collect()
    }

    /// Recorded grid of `feature`, restricted to `range` and bounded by `max_n_bins`.
    fn grid(&self, feature: usize, range: Option<GridRange>, group: GroupId) -> Result<Vec<f32>, ExtractionError> {
        let spec = self.schema.feature(feature).ok_or(ExtractionError::SchemaMismatch {
            schema: self.schema.n_features(),
            ensemble: self.ensemble.n_features(),
        })?;
        let Some(GridRange { lo, hi }) = range else {
            return Ok(spec.subsample_grid(self.max_n_bins));
        };
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(ExtractionError::InvalidRange { feature, lo, hi });
        }

        let (min, max) = spec.domain.bounds();
        let out_of_domain = ExtractionError::OutOfDomain { group, feature, lo, hi, min, max };
        let (lo, hi) = match self.policy {
            RangePolicy::Strict if lo < min || hi > max => return Err(out_of_domain),
            RangePolicy::Strict => (lo, hi),
            RangePolicy::Clamp => (lo.max(min), hi.min(max)),
        };
        if lo > hi {
            return Err(out_of_domain);
        }

        let inside: Vec<f32> = spec.grid.iter().copied().filter(|v| (lo..=hi).contains(v)).collect();
        if inside.is_empty() {
            return Err(ExtractionError::EmptyGrid { feature, lo, hi });
        }
        Ok(subsample(&inside, self.max_n_bins))
    }

    fn evaluate(&self, group: GroupId, features: FeatureGroup, grids: Vec<Vec<f32>>) -> ShapeTable {
        let e = self.ensemble;
        let n_outputs = e.n_outputs();
        let temperature = e.temperature();
        let mut trace = TreeTrace::new(features.arity(), 0);
        let mut tree_out = vec![0.0; n_outputs];

        match features {
            FeatureGroup::Single(feature) => {
                let values = grids.into_iter().next().unwrap_or_default();
                let mut contributions = Array2::zeros((values.len(), n_outputs));
                for (&x, out) in values.iter().zip(contributions.outer_iter_mut()) {
                    let gathered = GroupValues::single(x);
                    e.group_contribution_into(group, gathered.as_slice(), temperature, &mut trace, &mut tree_out, out);
                }
                ShapeTable::Curve { group, feature, values, contributions }
            }
            FeatureGroup::Pair(pair) => {
                let mut grids = grids.into_iter();
                let x_values = grids.next().unwrap_or_default();
                let y_values = grids.next().unwrap_or_default();
                let mut contributions = Array3::zeros((x_values.len(), y_values.len(), n_outputs));
                for (&x, mut plane) in x_values.iter().zip(contributions.outer_iter_mut()) {
                    for (&y, out) in y_values.iter().zip(plane.outer_iter_mut()) {
                        let gathered = GroupValues::pair(x, y);
                        e.group_contribution_into(group, gathered.as_slice(), temperature, &mut trace, &mut tree_out, out);
                    }
                }
                ShapeTable::Heatmap { group, features: pair, x_values, y_values, contributions }
            }
        }
    }
}
