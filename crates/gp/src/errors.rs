use thiserror::Error;

/// A result type for sparse indicator GP operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error raised by [`CovarianceModel`](crate::CovarianceModel) or
/// [`SparseIndicatorGp`](crate::SparseIndicatorGp) operations
#[derive(Error, Debug)]
pub enum GpError {
    /// When the marginal likelihood cannot be computed
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When an error is due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
