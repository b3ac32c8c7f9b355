//! NodeGam model implementation.
//!
//! High-level wrapper around [`Ensemble`] with training, prediction, shape
//! extraction and JSON persistence. Access components via
//! [`ensemble()`](NodeGamModel::ensemble), [`schema()`](NodeGamModel::schema),
//! [`meta()`](NodeGamModel::meta) and [`config()`](NodeGamModel::config).

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, ArrayView1, ArrayView2};

use super::{ModelMeta, NodeGamConfig};
use crate::data::{validate_features, validate_targets, DataError, FeatureSchema};
use crate::explainability::{ExtractionError, GridRange, RangePolicy, ShapeExtractor, ShapeTable};
use crate::inference::{Decomposition, Predictor};
use crate::persist::{self, PersistError};
use crate::repr::{Ensemble, GroupId};
use crate::training::{self, EvalSet, MetricValue, NodeGamTrainer, ObjectiveFn, TrainingReport};
use crate::utils::{run_with_threads, Parallelism};

/// High-level model: a trained ensemble plus everything needed to use it.
#[derive(Clone)]
pub struct NodeGamModel {
    ensemble: Ensemble,
    schema: FeatureSchema,
    meta: ModelMeta,
    /// Training configuration. Defaults for models loaded from JSON.
    config: NodeGamConfig,
    report: Option<TrainingReport>,
}

impl NodeGamModel {
    /// Assemble a model from its parts.
    ///
    /// The ensemble is sealed; its structure can no longer change.
    pub fn from_parts(mut ensemble: Ensemble, schema: FeatureSchema, meta: ModelMeta) -> Self {
        ensemble.seal();
        Self { ensemble, schema, meta, config: NodeGamConfig::default(), report: None }
    }

    pub(crate) fn with_report(mut self, report: Option<TrainingReport>) -> Self {
        self.report = report;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Feature domains and grids recorded from the training data.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn config(&self) -> &NodeGamConfig {
        &self.config
    }

    /// Training report, when the model was trained in this process or saved
    /// with one.
    pub fn report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }

    /// Attach feature names to the metadata and the schema.
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self, DataError> {
        if names.len() != self.meta.n_features {
            return Err(DataError::NameCountMismatch { expected: self.meta.n_features, got: names.len() });
        }
        let specs = self
            .schema
            .features()
            .iter()
            .cloned()
            .zip(&names)
            .map(|(mut spec, name)| {
                spec.name = Some(name.clone());
                spec
            })
            .collect();
        self.schema = FeatureSchema::new(specs);
        self.meta.feature_names = Some(names);
        Ok(self)
    }

    // =========================================================================
    // Training
    // =========================================================================

    /// Train a new model.
    ///
    /// * `features` - `[n_rows, n_features]`
    /// * `targets` - `[n_rows, n_targets]`, see [`Objective`](crate::training::Objective)
    /// * `eval_sets` - validation sets; the first one drives early stopping
    /// * `config` - training configuration, validated again here
    pub fn train(
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        eval_sets: &[EvalSet<'_>],
        config: NodeGamConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        run_with_threads(config.n_threads, |parallelism| {
            Self::train_inner(features, targets, eval_sets, config, parallelism)
        })
    }

    fn train_inner(
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        eval_sets: &[EvalSet<'_>],
        config: NodeGamConfig,
        parallelism: Parallelism,
    ) -> crate::Result<Self> {
        let schema = FeatureSchema::from_matrix(features, config.binning, None)?;
        let metric = config.effective_metric();
        let trainer = NodeGamTrainer::new(config.objective, metric, config.to_trainer_params());
        let (ensemble, report) = trainer.train(features, targets, eval_sets, parallelism)?;

        let mut meta = ModelMeta::for_ensemble(&ensemble, config.objective, metric, config.mode.clone());
        meta.best_epoch = report.best_epoch;
        Ok(Self { ensemble, schema, meta, config, report: Some(report) })
    }

    // =========================================================================
    // Prediction
    // =========================================================================

    /// Transformed predictions, shape `[n_rows, n_outputs]`.
    ///
    /// Probabilities for classification (sigmoid / softmax), values for
    /// regression.
    pub fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>, DataError> {
        let mut out = self.predict_raw(features)?;
        for row in out.outer_iter_mut() {
            self.meta.objective.transform_inplace(row);
        }
        Ok(out)
    }

    /// Raw scores (`bias + Σ contributions`), shape `[n_rows, n_outputs]`.
    pub fn predict_raw(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>, DataError> {
        self.check_features(features)?;
        Ok(run_with_threads(self.config.n_threads, |parallelism| {
            Predictor::new(&self.ensemble).predict_raw(features, parallelism)
        }))
    }

    /// Per-group contributions, shape `[n_rows, n_groups, n_outputs]`.
    ///
    /// Summing over groups and adding the bias gives
    /// [`predict_raw`](Self::predict_raw) exactly.
    pub fn predict_contributions(&self, features: ArrayView2<'_, f32>) -> Result<Array3<f32>, DataError> {
        self.check_features(features)?;
        Ok(run_with_threads(self.config.n_threads, |parallelism| {
            Predictor::new(&self.ensemble).predict_contributions(features, parallelism)
        }))
    }

    /// Full decomposition of one row.
    pub fn decompose_row(&self, row: ArrayView1<'_, f32>) -> Result<Decomposition, DataError> {
        self.check_features(row.insert_axis(ndarray::Axis(0)))?;
        Ok(self.ensemble.forward(row))
    }

    /// Evaluate the training metric on a labelled dataset.
    pub fn evaluate(
        &self,
        name: &str,
        features: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
    ) -> crate::Result<MetricValue> {
        validate_targets(features, targets)?;
        self.meta.objective.validate_targets(targets)?;
        let raw = self.predict_raw(features)?;
        Ok(training::evaluate(&self.meta.objective, &self.meta.metric, name, raw, targets))
    }

    fn check_features(&self, features: ArrayView2<'_, f32>) -> Result<(), DataError> {
        if features.nrows() == 0 && features.ncols() == self.meta.n_features {
            return Ok(());
        }
        validate_features(features, self.meta.n_features)
    }

    // =========================================================================
    // Shape functions
    // =========================================================================

    /// Shape function of every group, each axis bounded by `max_n_bins`.
    pub fn shape_functions(&self, max_n_bins: usize) -> Result<BTreeMap<GroupId, ShapeTable>, ExtractionError> {
        let extractor = ShapeExtractor::new(&self.ensemble, &self.schema, max_n_bins)?;
        run_with_threads(self.config.n_threads, |parallelism| extractor.extract_all(parallelism))
    }

    /// Shape function of one group, optionally restricted to value ranges.
    pub fn shape_function(
        &self,
        group: GroupId,
        max_n_bins: usize,
        ranges: Option<&[GridRange]>,
        policy: RangePolicy,
    ) -> Result<ShapeTable, ExtractionError> {
        let extractor = ShapeExtractor::new(&self.ensemble, &self.schema, max_n_bins)?.with_policy(policy);
        match ranges {
            Some(ranges) => extractor.extract_with_range(group, ranges),
            None => extractor.extract(group),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn to_json(&self) -> Result<String, PersistError> {
        persist::to_json(self)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        persist::from_json(json)
    }
}

impl std::fmt::Debug for NodeGamModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGamModel")
            .field("n_trees", &self.ensemble.n_trees())
            .field("n_groups", &self.ensemble.n_groups())
            .field("n_features", &self.meta.n_features)
            .field("n_outputs", &self.meta.n_outputs)
            .field("task", &self.meta.task)
            .finish()
    }
}
