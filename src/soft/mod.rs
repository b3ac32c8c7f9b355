//! Soft (differentiable) decision primitives.
//!
//! - [`router`]: temperature-scaled feature selection over a fixed index set
//! - [`threshold`]: soft split of a value against a learned threshold
//! - [`temperature`]: [`Temperature`] and the [`AnnealingSchedule`] that drives it
//!
//! Every primitive is a pure function of its parameters and the temperature.
//! The temperature is always passed in explicitly; there is no global state.

pub mod router;
pub mod temperature;
pub mod threshold;

pub use router::{argmax, gather, route, route_backward, route_into, SelectionFn};
pub use temperature::{AnnealingSchedule, ScheduleError, ScheduleKind, Temperature};
pub use threshold::{sharpness, soft_split, soft_split_grad, stable_sigmoid, SplitEval, SplitGrad};
