//! Versioned JSON snapshots of trained models and bare ensembles.
//!
//! Loading validates every structural invariant of the ensemble and seals
//! it, so a loaded snapshot can be used for inference and extraction but
//! never re-bound. Model snapshots also check the feature schema and that
//! the metadata agrees with the ensemble.
//!
//! ```ignore
//! let json = nodegam::persist::to_json(&model)?;
//! let loaded = nodegam::persist::from_json(&json)?;
//! ```

mod schema;

pub use schema::{Envelope, EnsembleSchema, NodeGamModelSchema, CURRENT_VERSION, FORMAT};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::data::DataError;
use crate::model::NodeGamModel;
use crate::repr::{Ensemble, EnsembleError};
use crate::training::ObjectiveFn;

/// Errors raised while reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a nodegam document (format '{0}')")]
    UnknownFormat(String),
    #[error("unsupported format version {found}; this build reads up to {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("expected a '{expected}' document, found '{found}'")]
    WrongModelType { expected: &'static str, found: String },
    #[error("invalid ensemble: {0}")]
    Validation(#[from] EnsembleError),
    #[error("invalid feature schema: {0}")]
    Schema(#[from] DataError),
    #[error("{field} disagrees: metadata says {meta}, snapshot has {actual}")]
    Inconsistent { field: &'static str, meta: usize, actual: usize },
}

/// Serialize a model with its metadata, schema and training report.
pub fn to_json(model: &NodeGamModel) -> Result<String, PersistError> {
    let payload = NodeGamModelSchema {
        meta: model.meta().clone(),
        schema: model.schema().clone(),
        ensemble: model.ensemble().clone(),
        report: model.report().cloned(),
    };
    Ok(serde_json::to_string(&Envelope::new(NodeGamModelSchema::MODEL_TYPE, payload))?)
}

/// Read a model written by [`to_json`].
pub fn from_json(json: &str) -> Result<NodeGamModel, PersistError> {
    let payload: NodeGamModelSchema = read_payload(json, NodeGamModelSchema::MODEL_TYPE)?;
    let NodeGamModelSchema { meta, schema, ensemble, report } = payload;
    ensemble.validate()?;
    schema.validate()?;
    for (field, meta_value, actual) in [
        ("n_features", meta.n_features, ensemble.n_features()),
        ("n_outputs", meta.n_outputs, ensemble.n_outputs()),
        ("objective outputs", meta.objective.n_outputs(), ensemble.n_outputs()),
        ("schema features", meta.n_features, schema.n_features()),
    ] {
        if meta_value != actual {
            return Err(PersistError::Inconsistent { field, meta: meta_value, actual });
        }
    }
    Ok(NodeGamModel::from_parts(ensemble, schema, meta).with_report(report))
}

/// Serialize a bare ensemble snapshot.
pub fn ensemble_to_json(ensemble: &Ensemble) -> Result<String, PersistError> {
    let payload = EnsembleSchema { ensemble: ensemble.clone() };
    Ok(serde_json::to_string(&Envelope::new(EnsembleSchema::MODEL_TYPE, payload))?)
}

/// Read a bare ensemble snapshot. The result is validated and sealed.
pub fn ensemble_from_json(json: &str) -> Result<Ensemble, PersistError> {
    let EnsembleSchema { mut ensemble } = read_payload(json, EnsembleSchema::MODEL_TYPE)?;
    ensemble.validate()?;
    ensemble.seal();
    Ok(ensemble)
}

/// Check the envelope, then decode the payload.
fn read_payload<T: DeserializeOwned>(json: &str, expected: &'static str) -> Result<T, PersistError> {
    let envelope: Envelope<Value> = serde_json::from_str(json)?;
    if envelope.format != FORMAT {
        return Err(PersistError::UnknownFormat(envelope.format));
    }
    if envelope.version > CURRENT_VERSION {
        return Err(PersistError::UnsupportedVersion { found: envelope.version, supported: CURRENT_VERSION });
    }
    if envelope.model_type != expected {
        return Err(PersistError::WrongModelType { expected, found: envelope.model_type });
    }
    Ok(serde_json::from_value(envelope.model)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious_tree;
    use crate::repr::{FeatureGroup, GroupId};
    use crate::soft::Temperature;
    use ndarray::array;

    fn ensemble() -> Ensemble {
        let mut e = Ensemble::new(2, 1, FeatureGroup::enumerate(2, &[[0, 1]]).unwrap())
            .unwrap()
            .with_bias(vec![0.1])
            .unwrap()
            .with_temperature(Temperature::new(0.25).unwrap());
        let tree = oblivious_tree! { levels = [([0.3, -0.2], 0.5, 1.0)]; leaves = [[-1.0], [2.0]] }.unwrap();
        e.bind(tree, GroupId(2)).unwrap();
        e
    }

    #[test]
    fn ensemble_roundtrip_is_exact_and_sealed() {
        let e = ensemble();
        let loaded = ensemble_from_json(&ensemble_to_json(&e).unwrap()).unwrap();
        assert!(loaded.is_sealed());
        assert_eq!(loaded.trees(), e.trees());
        assert_eq!(loaded.temperature(), e.temperature());
        let row = array![0.7f32, -0.3];
        assert_eq!(loaded.forward_total(row.view()), e.forward_total(row.view()));
    }

    #[test]
    fn envelope_is_checked() {
        let json = ensemble_to_json(&ensemble()).unwrap();
        let mut doc: Value = serde_json::from_str(&json).unwrap();

        doc["version"] = Value::from(CURRENT_VERSION + 1);
        let err = ensemble_from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::UnsupportedVersion { .. }));

        doc["version"] = Value::from(CURRENT_VERSION);
        doc["format"] = Value::from("other");
        assert!(matches!(ensemble_from_json(&doc.to_string()), Err(PersistError::UnknownFormat(_))));

        let err = from_json(&json).unwrap_err();
        assert!(matches!(err, PersistError::WrongModelType { expected: "nodegam_model", .. }));
    }

    #[test]
    fn invalid_structure_is_rejected() {
        let json = ensemble_to_json(&ensemble()).unwrap();
        let mut doc: Value = serde_json::from_str(&json).unwrap();
        doc["model"]["ensemble"]["bias"] = Value::from(vec![0.0, 1.0]);
        let err = ensemble_from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Validation(EnsembleError::BiasLenMismatch { .. })));
    }

    fn model_json() -> Value {
        use crate::data::{BinningParams, FeatureSchema};
        use crate::model::ModelMeta;
        use crate::repr::ModelMode;
        use crate::training::{Metric, Objective};

        let e = ensemble();
        let x = array![[0.0f32, 1.0], [1.0, 0.0], [0.5, 0.5]];
        let schema = FeatureSchema::from_matrix(x.view(), BinningParams::default(), None).unwrap();
        let meta = ModelMeta::for_ensemble(&e, Objective::squared(), Metric::Rmse, ModelMode::Ga2m { pairs: vec![[0, 1]] });
        let model = NodeGamModel::from_parts(e, schema, meta);
        serde_json::from_str(&to_json(&model).unwrap()).unwrap()
    }

    #[test]
    fn model_roundtrip_loads() {
        let doc = model_json();
        let loaded = from_json(&doc.to_string()).unwrap();
        assert!(loaded.ensemble().is_sealed());
    }

    #[test]
    fn overflowing_bias_is_rejected() {
        let mut doc: Value = serde_json::from_str(&ensemble_to_json(&ensemble()).unwrap()).unwrap();
        doc["model"]["ensemble"]["bias"] = serde_json::json!([1e40]);
        let err = ensemble_from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Validation(EnsembleError::NonFiniteBias)), "{err}");
    }

    #[test]
    fn broken_schema_grid_is_rejected() {
        let mut doc = model_json();
        doc["model"]["schema"]["features"][1]["grid"] = serde_json::json!([1.0, 0.0]);
        let err = from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Schema(DataError::InvalidSchema { feature: 1, .. })), "{err}");

        doc["model"]["schema"]["features"][1]["grid"] = serde_json::json!([]);
        let err = from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Schema(DataError::InvalidSchema { reason: "grid is empty", .. })));
    }

    #[test]
    fn objective_must_match_outputs() {
        let mut doc = model_json();
        doc["model"]["meta"]["objective"] = serde_json::json!({ "softmax_loss": { "n_classes": 3 } });
        let err = from_json(&doc.to_string()).unwrap_err();
        assert!(
            matches!(err, PersistError::Inconsistent { field: "objective outputs", meta: 3, actual: 1 }),
            "{err}"
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(ensemble_from_json("{"), Err(PersistError::Json(_))));
    }
}
