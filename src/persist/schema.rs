//! Serialized layout of snapshots.
//!
//! Every document is an [`Envelope`] naming the format, its version and the
//! payload type, so readers can reject foreign or newer documents before
//! touching the payload.

use serde::{Deserialize, Serialize};

use crate::data::FeatureSchema;
use crate::model::ModelMeta;
use crate::repr::Ensemble;
use crate::training::TrainingReport;

/// Format tag written into every envelope.
pub const FORMAT: &str = "nodegam";

/// Current format version.
pub const CURRENT_VERSION: u32 = 1;

/// Top-level document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub format: String,
    pub version: u32,
    pub model_type: String,
    pub model: T,
}

impl<T> Envelope<T> {
    pub fn new(model_type: &str, model: T) -> Self {
        Self { format: FORMAT.to_string(), version: CURRENT_VERSION, model_type: model_type.to_string(), model }
    }
}

/// Full model payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGamModelSchema {
    pub meta: ModelMeta,
    pub schema: FeatureSchema,
    pub ensemble: Ensemble,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<TrainingReport>,
}

impl NodeGamModelSchema {
    /// Model type string.
    pub const MODEL_TYPE: &'static str = "nodegam_model";
}

/// Bare ensemble payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSchema {
    pub ensemble: Ensemble,
}

impl EnsembleSchema {
    /// Model type string.
    pub const MODEL_TYPE: &'static str = "ensemble";
}
