//! Forward evaluation of trees and ensembles.
//!
//! - [`forward`]: one soft oblivious tree, with a [`TreeTrace`] for backprop
//! - [`aggregate`]: grouped reduction into per-group contributions,
//!   [`Decomposition`] and the batch [`Predictor`]
//!
//! ```
//! use ndarray::array;
//! use nodegam::oblivious_tree;
//! use nodegam::repr::{Ensemble, FeatureGroup, GroupId};
//!
//! let mut ensemble = Ensemble::new(1, 1, vec![FeatureGroup::Single(0)]).unwrap();
//! let tree = oblivious_tree! { levels = [([0.0], 0.0, 0.0)]; leaves = [[-1.0], [1.0]] }.unwrap();
//! ensemble.bind(tree, GroupId(0)).unwrap();
//!
//! let d = ensemble.forward(array![2.0f32].view());
//! assert_eq!(d.total(), vec![1.0]);
//! ```

pub mod aggregate;
pub mod forward;

pub use aggregate::{Decomposition, ForwardScratch, Predictor, DEFAULT_BLOCK_SIZE};
pub use forward::{forward_tree, hard_leaf, TreeTrace};
