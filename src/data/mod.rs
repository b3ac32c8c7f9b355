//! Input data validation and feature schemas.
//!
//! Feature matrices are dense `ArrayView2<f32>` with shape
//! `[n_rows, n_features]`. Targets are `ArrayView2<f32>` with shape
//! `[n_rows, n_targets]`. Missing values are not supported: every value
//! must be finite.
//!
//! - [`FeatureSchema`]: per-feature domain and evaluation grid, used for
//!   shape extraction
//! - [`validate_features`] / [`validate_targets`]: shape and finiteness checks

mod schema;

pub use schema::{BinningParams, FeatureDomain, FeatureSchema, FeatureSpec};
pub(crate) use schema::subsample;

use ndarray::ArrayView2;

/// Errors raised for malformed input data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("input has no rows")]
    EmptyData,
    #[error("expected {expected} features, got {got}")]
    FeatureCountMismatch { expected: usize, got: usize },
    #[error("features have {features} rows but targets have {targets}")]
    RowCountMismatch { features: usize, targets: usize },
    #[error("non-finite value at row {row}, feature {feature}")]
    NonFinite { row: usize, feature: usize },
    #[error("non-finite target at row {row}")]
    NonFiniteTarget { row: usize },
    #[error("model has {n_outputs} outputs but targets have {n_targets} columns; expected {expected}")]
    OutputDimMismatch { n_outputs: usize, n_targets: usize, expected: usize },
    #[error("invalid label {value} at row {row}: {reason}")]
    InvalidLabel { row: usize, value: f32, reason: &'static str },
    #[error("invalid binning parameter {field} = {value}")]
    InvalidBinning { field: &'static str, value: usize },
    #[error("{got} feature names for {expected} features")]
    NameCountMismatch { expected: usize, got: usize },
    #[error("feature {feature}: {reason}")]
    InvalidSchema { feature: usize, reason: &'static str },
}

/// Check a feature matrix: at least one row, the expected column count,
/// and finite values everywhere.
pub fn validate_features(features: ArrayView2<'_, f32>, n_features: usize) -> Result<(), DataError> {
    if features.nrows() == 0 {
        return Err(DataError::EmptyData);
    }
    if features.ncols() != n_features {
        return Err(DataError::FeatureCountMismatch { expected: n_features, got: features.ncols() });
    }
    for (row, values) in features.outer_iter().enumerate() {
        if let Some(feature) = values.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFinite { row, feature });
        }
    }
    Ok(())
}

/// Check that targets line up with features and hold finite values.
///
/// Label semantics (class indices, {0, 1}) are checked by the objective.
pub fn validate_targets(
    features: ArrayView2<'_, f32>,
    targets: ArrayView2<'_, f32>,
) -> Result<(), DataError> {
    if targets.nrows() != features.nrows() {
        return Err(DataError::RowCountMismatch { features: features.nrows(), targets: targets.nrows() });
    }
    for (row, values) in targets.outer_iter().enumerate() {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteTarget { row });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn rejects_empty_and_wrong_width() {
        let empty = Array2::<f32>::zeros((0, 2));
        assert_eq!(validate_features(empty.view(), 2), Err(DataError::EmptyData));
        let x = array![[1.0f32, 2.0]];
        assert_eq!(
            validate_features(x.view(), 3),
            Err(DataError::FeatureCountMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn rejects_non_finite() {
        let x = array![[1.0f32, 2.0], [0.0, f32::NAN]];
        assert_eq!(validate_features(x.view(), 2), Err(DataError::NonFinite { row: 1, feature: 1 }));
        let y = array![[1.0f32], [f32::INFINITY]];
        assert_eq!(validate_targets(x.view(), y.view()), Err(DataError::NonFiniteTarget { row: 1 }));
    }

    #[test]
    fn rejects_row_mismatch() {
        let x = array![[1.0f32], [2.0]];
        let y = array![[1.0f32]];
        assert_eq!(
            validate_targets(x.view(), y.view()),
            Err(DataError::RowCountMismatch { features: 2, targets: 1 })
        );
    }
}
