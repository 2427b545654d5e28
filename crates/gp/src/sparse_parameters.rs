use crate::covariance::CovarianceModel;
use crate::errors::{GpError, Result};
use linfa::{Float, ParamGuard};
use ndarray::{Array1, Array2, Axis};

/// Pseudo-input specification for the sparse GP approximation
#[derive(Clone, Debug, PartialEq)]
pub enum PseudoInputs<F: Float> {
    /// `usize` points are selected randomly in the training dataset
    Randomized(usize),
    /// Points are given as a (npoints, 3) matrix
    Located(Array2<F>),
}

impl<F: Float> Default for PseudoInputs<F> {
    fn default() -> PseudoInputs<F> {
        Self::Randomized(10)
    }
}

/// Per-observation regularization (noise variance added to the diagonal)
#[derive(Clone, Debug, PartialEq)]
pub enum Regularization<F: Float> {
    /// Same value for every observation
    Scalar(F),
    /// One value per observation
    PerPoint(Array1<F>),
}

impl<F: Float> Default for Regularization<F> {
    fn default() -> Regularization<F> {
        Self::Scalar(F::cast(1e-9))
    }
}

impl<F: Float> Regularization<F> {
    /// Expand to one value per observation, checking the length when given
    /// as a per-point vector
    pub fn expand(&self, n: usize, what: &str) -> Result<Array1<F>> {
        match self {
            Regularization::Scalar(v) => {
                if *v < F::zero() {
                    return Err(GpError::InvalidValueError(format!(
                        "{what} regularization must be non-negative, got {v}"
                    )));
                }
                Ok(Array1::from_elem(n, *v))
            }
            Regularization::PerPoint(v) => {
                if v.len() != n {
                    return Err(GpError::InvalidValueError(format!(
                        "{what} regularization vector length {} does not match {} observations",
                        v.len(),
                        n
                    )));
                }
                if v.iter().any(|r| *r < F::zero()) {
                    return Err(GpError::InvalidValueError(format!(
                        "{what} regularization entries must be non-negative"
                    )));
                }
                Ok(v.to_owned())
            }
        }
    }
}

/// Structural orientation data consumed as tangent constraints: at each
/// location the directional derivative of the potential along the given unit
/// direction is observed to be zero.
#[derive(Clone, Debug, PartialEq)]
pub struct TangentData<F: Float> {
    locations: Array2<F>,
    directions: Array2<F>,
}

impl<F: Float> TangentData<F> {
    /// Build tangent data from (t, 3) locations and (t, 3) direction vectors.
    /// Directions are normalized to unit length.
    pub fn new(locations: Array2<F>, directions: Array2<F>) -> Result<Self> {
        if locations.dim() != directions.dim() {
            return Err(GpError::InvalidValueError(format!(
                "tangent locations {:?} and directions {:?} must have the same shape",
                locations.dim(),
                directions.dim()
            )));
        }
        if locations.ncols() != 3 {
            return Err(GpError::InvalidValueError(format!(
                "tangent data must be 3-D, got {} columns",
                locations.ncols()
            )));
        }
        let mut directions = directions;
        for mut row in directions.axis_iter_mut(Axis(0)) {
            let norm = row.iter().fold(F::zero(), |acc, v| acc + *v * *v).sqrt();
            if norm <= F::zero() {
                return Err(GpError::InvalidValueError(
                    "tangent direction vector cannot be zero".to_string(),
                ));
            }
            row.mapv_inplace(|v| v / norm);
        }
        Ok(TangentData {
            locations,
            directions,
        })
    }

    /// Tangent locations as a (t, 3) matrix
    pub fn locations(&self) -> &Array2<F> {
        &self.locations
    }

    /// Unit tangent directions as a (t, 3) matrix
    pub fn directions(&self) -> &Array2<F> {
        &self.directions
    }

    /// Number of tangent constraints
    pub fn len(&self) -> usize {
        self.locations.nrows()
    }

    /// Whether there is no tangent constraint
    pub fn is_empty(&self) -> bool {
        self.locations.nrows() == 0
    }
}

/// A set of validated sparse indicator GP parameters.
///
/// Construction is fit-free: the covariance hyperparameters are taken as
/// given (they are driven from outside, typically by a covariance fitter)
/// and fitting only assembles the pseudo-input linear algebra.
#[derive(Clone, Debug, PartialEq)]
pub struct SpgpValidParams<F: Float> {
    /// Shared covariance model
    cov: CovarianceModel<F>,
    /// Fixed mean offset of the latent field
    mean: F,
    /// Pseudo-inputs
    z: PseudoInputs<F>,
    /// Optional structural tangent data
    tangents: Option<TangentData<F>>,
    /// Optional pseudo-tangents
    pseudo_tangents: Option<TangentData<F>>,
    /// Indices of value observations forced to exact interpolation
    interpolate: Vec<usize>,
    /// Value-data regularization
    reg: Regularization<F>,
    /// Tangent-data regularization
    reg_t: Regularization<F>,
    /// Random generator seed for pseudo-input sampling
    seed: Option<u64>,
}

impl<F: Float> SpgpValidParams<F> {
    /// Covariance model
    pub fn cov(&self) -> &CovarianceModel<F> {
        &self.cov
    }

    /// Mean offset
    pub fn mean(&self) -> F {
        self.mean
    }

    /// Pseudo-input specification
    pub fn pseudo_inputs(&self) -> &PseudoInputs<F> {
        &self.z
    }

    /// Tangent data
    pub fn tangents(&self) -> Option<&TangentData<F>> {
        self.tangents.as_ref()
    }

    /// Pseudo-tangent data
    pub fn pseudo_tangents(&self) -> Option<&TangentData<F>> {
        self.pseudo_tangents.as_ref()
    }

    /// Exact-interpolation indices
    pub fn interpolate(&self) -> &[usize] {
        &self.interpolate
    }

    /// Value-data regularization
    pub fn reg(&self) -> &Regularization<F> {
        &self.reg
    }

    /// Tangent-data regularization
    pub fn reg_t(&self) -> &Regularization<F> {
        &self.reg_t
    }

    /// Seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

/// The set of parameters configuring a
/// [`SparseIndicatorGp`](crate::SparseIndicatorGp) fit.
#[derive(Clone, Debug)]
pub struct SpgpParams<F: Float>(SpgpValidParams<F>);

impl<F: Float> SpgpParams<F> {
    /// A constructor given the shared covariance model and pseudo-inputs
    pub fn new(cov: CovarianceModel<F>, pseudo_inputs: PseudoInputs<F>) -> SpgpParams<F> {
        Self(SpgpValidParams {
            cov,
            mean: F::zero(),
            z: pseudo_inputs,
            tangents: None,
            pseudo_tangents: None,
            interpolate: vec![],
            reg: Regularization::default(),
            reg_t: Regularization::default(),
            seed: None,
        })
    }

    /// Set the fixed mean offset
    pub fn mean(mut self, mean: F) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set structural tangent data
    pub fn tangents(mut self, tangents: Option<TangentData<F>>) -> Self {
        self.0.tangents = tangents;
        self
    }

    /// Set pseudo-tangent data
    pub fn pseudo_tangents(mut self, pseudo_tangents: Option<TangentData<F>>) -> Self {
        self.0.pseudo_tangents = pseudo_tangents;
        self
    }

    /// Force exact interpolation at the given value-observation indices
    pub fn interpolate(mut self, indices: Vec<usize>) -> Self {
        self.0.interpolate = indices;
        self
    }

    /// Set the value-data regularization
    pub fn reg(mut self, reg: Regularization<F>) -> Self {
        self.0.reg = reg;
        self
    }

    /// Set the tangent-data regularization
    pub fn reg_t(mut self, reg_t: Regularization<F>) -> Self {
        self.0.reg_t = reg_t;
        self
    }

    /// Set the seed used when sampling randomized pseudo-inputs
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float> ParamGuard for SpgpParams<F> {
    type Checked = SpgpValidParams<F>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if let PseudoInputs::Randomized(n) = self.0.z {
            if n == 0 {
                return Err(GpError::InvalidValueError(
                    "pseudo-input count cannot be 0".to_string(),
                ));
            }
        }
        if let PseudoInputs::Located(z) = &self.0.z {
            if z.nrows() == 0 || z.ncols() != 3 {
                return Err(GpError::InvalidValueError(format!(
                    "pseudo-input matrix must be a non-empty (m, 3) matrix, got {:?}",
                    z.dim()
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl<F: Float> From<SpgpValidParams<F>> for SpgpParams<F> {
    fn from(valid: SpgpValidParams<F>) -> Self {
        SpgpParams(valid)
    }
}
