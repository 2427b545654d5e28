//! Multi-class sparse GP engine for implicit 3-D geological modeling.
//!
//! A geological model is built from scattered categorical observations
//! ([`GeoPoints`]): each rock class gets its own potential field, regressed
//! by a [`SparseIndicatorGp`] over an indicator encoding of the labels.
//! Points carrying two different labels are geological contacts; they are
//! detected from their indicator signature and can be enforced as exact
//! interpolation constraints. All class fields share one [`CovarianceModel`]
//! and one pseudo-input set, so the whole model is driven by a single
//! hyperparameter vector.
//!
//! The workflow has three stages:
//!
//! 1. build a [`MultiClassModel`] from data and a seed covariance
//!    ([`MultiClassParams`]);
//! 2. optionally tune the covariance hyperparameters with a
//!    [`CovarianceFitter`], a genetic search maximizing the total marginal
//!    log-likelihood;
//! 3. [`predict`](MultiClassModel::predict) at target locations, yielding
//!    per-class potentials, a most-likely label with an explicit
//!    `"Unknown"` outcome and an entropy surface.
//!
//! ```no_run
//! use lithos_model::{
//!     CovarianceFitter, CovarianceModel, CovarianceStructure, GeoPoints,
//!     MultiClassModel, PseudoInputs, StructureKind,
//! };
//! use ndarray::array;
//!
//! # fn main() -> lithos_model::Result<()> {
//! let points = GeoPoints::from_single_labels(
//!     array![[0., 0., 0.], [10., 0., 0.]],
//!     vec![Some("granite".to_string()), Some("schist".to_string())],
//! )?;
//! let cov = CovarianceModel::new(
//!     vec![CovarianceStructure::isotropic(StructureKind::Cubic, 1.0, 8.)?],
//!     1e-4,
//! )?;
//! let model = MultiClassModel::params(cov)
//!     .pseudo_inputs(PseudoInputs::Randomized(2))
//!     .seed(Some(42))
//!     .fit(&points)?;
//! let tuned = CovarianceFitter::new(&model).fit()?;
//! let pred = tuned.model.predict(&array![[5., 0., 0.]], "geo")?;
//! println!("{:?}", pred.labels());
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod fitter;
mod multiclass;
mod optimizer;
mod predictor;
#[cfg(test)]
mod testing;
mod types;

pub use errors::*;
pub use fitter::*;
pub use multiclass::*;
pub use optimizer::*;
pub use types::*;

pub use lithos_gp::{
    CovarianceModel, CovarianceStructure, PseudoInputs, Regularization, SparseIndicatorGp,
    StructureKind, TangentData,
};
