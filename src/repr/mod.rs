//! Canonical model representations.
//!
//! - [`FeatureGroup`]: the feature subset a tree may read
//! - [`ObliviousTree`]: one soft oblivious tree in struct-of-arrays layout
//! - [`Ensemble`]: tree arena plus the parallel tree-to-group table

pub mod ensemble;
pub mod group;
pub mod tree;

pub use ensemble::{Ensemble, EnsembleError};
pub use group::{FeatureGroup, GroupError, GroupId, GroupValues, ModelMode, MAX_GROUP_ARITY};
pub use tree::{ObliviousTree, TreeError, MAX_DEPTH};
