//! High-level model wrapper.
//!
//! - [`NodeGamModel`]: trained ensemble with prediction, shape extraction and persistence
//! - [`NodeGamConfig`]: validated training configuration
//! - [`ModelMeta`]: metadata stored next to the ensemble
//!
//! # Example
//!
//! ```ignore
//! use nodegam::model::{NodeGamConfig, NodeGamModel};
//! use nodegam::repr::ModelMode;
//!
//! let config = NodeGamConfig::builder()
//!     .mode(ModelMode::Ga2m { pairs: vec![[0, 1]] })
//!     .max_epochs(20)
//!     .build()?;
//! let model = NodeGamModel::train(x.view(), y.view(), &[], config)?;
//!
//! let predictions = model.predict(x_test.view())?;
//! let shapes = model.shape_functions(64)?;
//! let json = model.to_json()?;
//! ```

mod config;
mod meta;
mod nodegam;

pub use crate::training::TaskKind;
pub use config::{ConfigError, NodeGamConfig, NodeGamConfigBuilder};
pub use meta::ModelMeta;
pub use nodegam::NodeGamModel;
