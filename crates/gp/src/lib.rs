//! Covariance models and sparse indicator gaussian processes for implicit
//! geological modeling.
//!
//! An implicit geological model represents each rock class as a continuous
//! potential field whose sign and magnitude encode class membership;
//! geological boundaries emerge as zero-level contours of these fields.
//! This crate provides the two numerical primitives such models are built
//! from:
//!
//! * [`CovarianceModel`]: a weighted sum of anisotropic covariance
//!   structures ([`StructureKind`]) plus a nugget effect, evaluable between
//!   3-D coordinate sets and flattenable to/from a hyperparameter vector;
//! * [`SparseIndicatorGp`]: a pseudo-input (FITC) GP regressing an
//!   indicator value on coordinates, with a fixed mean offset, optional
//!   structural tangent data and exact-interpolation constraints,
//!   parameterized by [`SpgpParams`].
//!
//! Fitting is fit-free with respect to hyperparameters: the covariance
//! model is taken as given so that many GPs can share one covariance while
//! an outer optimizer drives the hyperparameters.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod covariance;
mod errors;
mod sparse_algorithm;
mod sparse_parameters;

pub use covariance::*;
pub use errors::*;
pub use sparse_algorithm::*;
pub use sparse_parameters::*;
