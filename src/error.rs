//! Crate-level error type.
//!
//! Each module reports its own error enum; [`Error`] wraps them for the
//! high-level [`NodeGamModel`](crate::NodeGamModel) API.

use thiserror::Error;

use crate::data::DataError;
use crate::explainability::ExtractionError;
use crate::model::ConfigError;
use crate::persist::PersistError;
use crate::repr::{EnsembleError, GroupError, TreeError};
use crate::soft::ScheduleError;
use crate::training::TrainError;

/// Any error raised by this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid data: {0}")]
    Data(#[from] DataError),

    #[error("invalid feature group: {0}")]
    Group(#[from] GroupError),

    #[error("invalid tree: {0}")]
    Tree(#[from] TreeError),

    #[error("invalid ensemble: {0}")]
    Ensemble(#[from] EnsembleError),

    #[error("invalid annealing schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("training failed: {0}")]
    Training(#[from] TrainError),

    #[error("shape extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_module_errors() {
        let err: Error = DataError::EmptyData.into();
        assert!(matches!(err, Error::Data(DataError::EmptyData)));
        assert_eq!(err.to_string(), "invalid data: input has no rows");

        let err: Error = ConfigError::InvalidBatchSize.into();
        assert!(err.to_string().starts_with("invalid configuration"));
    }
}
