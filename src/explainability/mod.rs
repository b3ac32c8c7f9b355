//! Explainability: shape functions of a trained ensemble.
//!
//! Because every tree reads only its group's features, a group's
//! contribution is a function of one feature (a curve) or of one feature
//! pair (a heatmap). [`ShapeExtractor`] evaluates that function on the
//! feature grid recorded in a [`FeatureSchema`](crate::data::FeatureSchema).
//!
//! # Example
//!
//! ```ignore
//! use nodegam::explainability::{ShapeExtractor, ShapeTable};
//!
//! let extractor = ShapeExtractor::new(&ensemble, &schema, 64)?;
//! for (group, table) in extractor.extract_all(Parallelism::Sequential)? {
//!     println!("{group}: {} grid cells", table.len());
//! }
//! ```

mod shape;

pub use shape::{ExtractionError, GridRange, RangePolicy, ShapeExtractor, ShapeTable};
