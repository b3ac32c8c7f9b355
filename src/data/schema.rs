//! Per-feature domains and evaluation grids.
//!
//! A [`FeatureSchema`] is built once from training data. Shape extraction
//! evaluates each group on the grid of its features, so the grid is the
//! only place the schema influences model output.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::DataError;

/// Parameters controlling how feature grids are derived from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinningParams {
    /// Maximum number of grid points for continuous features.
    pub max_bins: usize,
    /// Features with at most this many unique values are treated as discrete.
    pub max_discrete_values: usize,
}

impl Default for BinningParams {
    fn default() -> Self {
        Self { max_bins: 256, max_discrete_values: 32 }
    }
}

impl BinningParams {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.max_bins < 2 {
            return Err(DataError::InvalidBinning { field: "max_bins", value: self.max_bins });
        }
        if self.max_discrete_values == 0 {
            return Err(DataError::InvalidBinning {
                field: "max_discrete_values",
                value: self.max_discrete_values,
            });
        }
        Ok(())
    }
}

/// Domain of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FeatureDomain {
    Continuous { min: f32, max: f32 },
    /// Sorted unique values.
    Discrete { values: Vec<f32> },
}

impl FeatureDomain {
    /// Smallest and largest value of the domain.
    pub fn bounds(&self) -> (f32, f32) {
        match self {
            Self::Continuous { min, max } => (*min, *max),
            Self::Discrete { values } => (
                values.first().copied().unwrap_or(0.0),
                values.last().copied().unwrap_or(0.0),
            ),
        }
    }

    /// Whether `value` lies in the domain's closed range.
    pub fn contains(&self, value: f32) -> bool {
        let (lo, hi) = self.bounds();
        value >= lo && value <= hi
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

/// Metadata for one input feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub index: usize,
    pub name: Option<String>,
    pub domain: FeatureDomain,
    /// Sorted, strictly increasing evaluation points.
    pub grid: Vec<f32>,
}

impl FeatureSpec {
    /// Display name, falling back to `x{index}`.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("x{}", self.index))
    }

    /// At most `max_points` grid values, evenly subsampled and always keeping
    /// both endpoints.
    pub fn subsample_grid(&self, max_points: usize) -> Vec<f32> {
        subsample(&self.grid, max_points)
    }
}

/// Schema for all input features of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self { features }
    }

    /// Derive one [`FeatureSpec`] per column of `data`.
    ///
    /// Columns with at most `max_discrete_values` unique values become
    /// discrete with every value on the grid. Other columns become continuous
    /// with a quantile grid of at most `max_bins` points.
    pub fn from_matrix(
        data: ArrayView2<'_, f32>,
        params: BinningParams,
        names: Option<Vec<String>>,
    ) -> Result<Self, DataError> {
        params.validate()?;
        super::validate_features(data, data.ncols())?;
        if let Some(names) = &names {
            if names.len() != data.ncols() {
                return Err(DataError::NameCountMismatch { expected: data.ncols(), got: names.len() });
            }
        }
        let mut names = names.map(Vec::into_iter);

        let features = data
            .columns()
            .into_iter()
            .enumerate()
            .map(|(index, column)| {
                let mut sorted: Vec<f32> = column.to_vec();
                sorted.sort_by(f32::total_cmp);
                let mut unique = sorted.clone();
                unique.dedup();

                let (domain, grid) = if unique.len() <= params.max_discrete_values {
                    (FeatureDomain::Discrete { values: unique.clone() }, unique)
                } else {
                    let grid = quantile_grid(&sorted, params.max_bins);
                    let min = sorted[0];
                    let max = sorted[sorted.len() - 1];
                    (FeatureDomain::Continuous { min, max }, grid)
                };
                FeatureSpec {
                    index,
                    name: names.as_mut().and_then(Iterator::next),
                    domain,
                    grid,
                }
            })
            .collect();
        Ok(Self { features })
    }

    /// Check every spec: indices in order, finite domains, and a
    /// non-empty, finite, strictly increasing grid.
    pub fn validate(&self) -> Result<(), DataError> {
        for (feature, spec) in self.features.iter().enumerate() {
            let invalid = |reason| Err(DataError::InvalidSchema { feature, reason });
            if spec.index != feature {
                return invalid("index does not match its position");
            }
            if spec.grid.is_empty() {
                return invalid("grid is empty");
            }
            if !spec.grid.iter().all(|v| v.is_finite()) {
                return invalid("grid holds a non-finite value");
            }
            if !spec.grid.windows(2).all(|w| w[0] < w[1]) {
                return invalid("grid is not strictly increasing");
            }
            let sorted_domain = match &spec.domain {
                FeatureDomain::Continuous { min, max } => min.is_finite() && max.is_finite() && min <= max,
                FeatureDomain::Discrete { values } => {
                    !values.is_empty()
                        && values.iter().all(|v| v.is_finite())
                        && values.windows(2).all(|w| w[0] < w[1])
                }
            };
            if !sorted_domain {
                return invalid("domain is empty, unsorted or non-finite");
            }
        }
        Ok(())
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn feature(&self, index: usize) -> Option<&FeatureSpec> {
        self.features.get(index)
    }

    #[inline]
    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }
}

/// Quantiles of sorted data at `max_points` evenly spaced ranks, deduplicated.
fn quantile_grid(sorted: &[f32], max_points: usize) -> Vec<f32> {
    let n = sorted.len();
    let mut grid: Vec<f32> = (0..max_points)
        .map(|k| {
            let rank = (k as f64 * (n - 1) as f64 / (max_points - 1) as f64).round() as usize;
            sorted[rank.min(n - 1)]
        })
        .collect();
    grid.dedup();
    grid
}

/// Evenly subsample a sorted grid to at most `max_points`, keeping both ends.
pub(crate) fn subsample(grid: &[f32], max_points: usize) -> Vec<f32> {
    if grid.len() <= max_points || max_points == 0 {
        return grid.to_vec();
    }
    if max_points == 1 {
        return vec![grid[0]];
    }
    let last = grid.len() - 1;
    let mut out: Vec<f32> = (0..max_points)
        .map(|k| grid[(k as f64 * last as f64 / (max_points - 1) as f64).round() as usize])
        .collect();
    out.dedup();
    out
}
