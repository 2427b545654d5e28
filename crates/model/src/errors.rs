use thiserror::Error;

/// A result type for multi-class geological modeling
pub type Result<T> = std::result::Result<T, ModelError>;

/// An error raised while building, fitting or evaluating a multi-class model.
///
/// Configuration errors are raised before any optimization work begins;
/// numerical failures inside a hyperparameter search are absorbed as
/// worst-fitness candidates instead and never surface through this type.
#[derive(Error, Debug)]
pub enum ModelError {
    /// When fewer than two distinct class labels are present
    #[error("at least 2 distinct classes are required, found {0}")]
    NotEnoughClasses(usize),
    /// When a fixed parameter collapses its search bounds inconsistently
    #[error("inconsistent bounds for parameter `{name}`: min {min} > max {max}")]
    InconsistentBounds {
        /// Parameter slot name
        name: String,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
    /// When the pseudo-input count exceeds the available data
    #[error("pseudo-input count {requested} exceeds the {available} available data points")]
    TooManyPseudoInputs {
        /// Requested number of pseudo-inputs
        requested: usize,
        /// Number of data points to sample from
        available: usize,
    },
    /// When a per-point regularization vector does not match the data length
    #[error("regularization vector length {got} does not match {expected} observations")]
    RegularizationLength {
        /// Provided vector length
        got: usize,
        /// Expected number of observations
        expected: usize,
    },
    /// When a configuration value is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// When the underlying GP fails
    #[error("GP error: {0}")]
    GpError(#[from] lithos_gp::GpError),
}
