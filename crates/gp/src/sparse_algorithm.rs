//! Pseudo-input (FITC) gaussian process regression of indicator values,
//! with optional structural tangent data and exact-interpolation constraints.

use crate::covariance::CovarianceModel;
use crate::errors::{GpError, Result};
use crate::sparse_parameters::{PseudoInputs, SpgpParams, SpgpValidParams, TangentData};
use linfa::prelude::{DatasetBase, Fit, Float};
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use log::debug;
use std::fmt;

/// Floor keeping effective noise strictly positive, even at
/// exact-interpolation rows with zero regularization
const NOISE_FLOOR: f64 = 1e-12;

/// Woodbury data computed during training and used for prediction
#[derive(Debug, Clone)]
pub(crate) struct WoodburyData<F: Float> {
    vec: Array2<F>,
    inv: Array2<F>,
}

/// A sparse gaussian process regressing a scalar indicator on 3-D coordinates.
///
/// The posterior is approximated through `M` pseudo-inputs (plus optional
/// pseudo-tangents) using the FITC low-rank representation, reducing the
/// `O(N^3)` dense GP cost to `O(N M^2)`.
///
/// Characteristics:
/// * the mean is a fixed offset (the compositional baseline of the indicator
///   encoding), never estimated;
/// * construction is fit-free with respect to the covariance hyperparameters,
///   which are supplied through the shared [`CovarianceModel`] and driven
///   from outside;
/// * structural orientation data enters as tangent constraints: zero
///   directional derivative of the latent field along the given directions;
/// * observations listed in the interpolation index set keep only their own
///   regularization as noise (the nugget is stripped), which forces the
///   posterior mean through them.
#[derive(Debug, Clone)]
pub struct SparseIndicatorGp<F: Float> {
    /// Shared covariance model
    cov: CovarianceModel<F>,
    /// Fixed mean offset
    mean: F,
    /// Marginal log-likelihood of the training data
    likelihood: F,
    /// Pseudo-input coordinates (m, 3)
    pseudo_inputs: Array2<F>,
    /// Pseudo-tangent entries
    pseudo_tangents: Option<TangentData<F>>,
    /// Data used for prediction
    w_data: WoodburyData<F>,
    /// Training data (coords, indicator values)
    training_data: (Array2<F>, Array1<F>),
    /// Tangent data used during training
    tangents: Option<TangentData<F>>,
    /// Parameters used to fit this model
    params: SpgpValidParams<F>,
}

impl<F: Float> SparseIndicatorGp<F> {
    /// Constructor of GP parameters
    pub fn params(cov: CovarianceModel<F>, pseudo_inputs: PseudoInputs<F>) -> SpgpParams<F> {
        SpgpParams::new(cov, pseudo_inputs)
    }

    /// Covariance model used by this GP
    pub fn cov(&self) -> &CovarianceModel<F> {
        &self.cov
    }

    /// Fixed mean offset
    pub fn mean(&self) -> F {
        self.mean
    }

    /// Marginal log-likelihood of the training data under this model
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Pseudo-input coordinates
    pub fn pseudo_inputs(&self) -> &Array2<F> {
        &self.pseudo_inputs
    }

    /// Pseudo-tangent entries
    pub fn pseudo_tangents(&self) -> Option<&TangentData<F>> {
        self.pseudo_tangents.as_ref()
    }

    /// Number of value observations
    pub fn n_data(&self) -> usize {
        self.training_data.0.nrows()
    }

    /// Number of tangent constraints
    pub fn n_tangents(&self) -> usize {
        self.tangents.as_ref().map(|t| t.len()).unwrap_or(0)
    }

    /// Number of pseudo-inputs
    pub fn n_pseudo_inputs(&self) -> usize {
        self.pseudo_inputs.nrows()
    }

    /// Number of pseudo-tangents
    pub fn n_pseudo_tangents(&self) -> usize {
        self.pseudo_tangents.as_ref().map(|t| t.len()).unwrap_or(0)
    }

    /// Parameters used to fit this GP
    pub fn fit_params(&self) -> &SpgpValidParams<F> {
        &self.params
    }

    /// Covariance row block between value-type points `x` and the whole
    /// pseudo set (pseudo-inputs then pseudo-tangents), as a (n, mz) matrix
    fn compute_kx(&self, x: &ArrayView2<F>) -> Array2<F> {
        let m = self.n_pseudo_inputs();
        let mz = m + self.n_pseudo_tangents();
        let mut kx = Array2::zeros((x.nrows(), mz));
        for (i, xi) in x.rows().into_iter().enumerate() {
            for (j, zj) in self.pseudo_inputs.rows().into_iter().enumerate() {
                kx[[i, j]] = self.cov.covariance(&xi, &zj);
            }
            if let Some(pt) = &self.pseudo_tangents {
                for j in 0..pt.len() {
                    kx[[i, m + j]] = self.cov.covariance_dir(
                        &xi,
                        &pt.locations().row(j),
                        &pt.directions().row(j),
                    );
                }
            }
        }
        kx
    }

    /// Predict the indicator mean at n given 3-D points specified as a (n, 3)
    /// matrix. Returns n scalar values as a vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let kx = self.compute_kx(&x.view());
        let mu = kx.dot(&self.w_data.vec).remove_axis(Axis(1));
        Ok(mu.mapv(|v| v + self.mean))
    }

    /// Predict the indicator variance at n given 3-D points specified as a
    /// (n, 3) matrix. Returns n variance values as a vector (n,).
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let kx = self.compute_kx(&x.view()).reversed_axes();
        let kxx = Array1::from_elem(x.nrows(), self.cov.total_sill());
        let var = kxx - (self.w_data.inv.t().dot(&kx) * &kx).sum_axis(Axis(0));
        let nugget = self.cov.nugget();
        Ok(var.mapv(|v| v.max(F::cast(1e-15)) + nugget))
    }
}

impl<F: Float> fmt::Display for SparseIndicatorGp<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SPGP(mean={}, data={}, tangents={}, pseudo-inputs={}, pseudo-tangents={}, likelihood={})",
            self.mean,
            self.n_data(),
            self.n_tangents(),
            self.n_pseudo_inputs(),
            self.n_pseudo_tangents(),
            self.likelihood
        )
    }
}

impl<F: Float, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError>
    for SpgpValidParams<F>
{
    type Object = SparseIndicatorGp<F>;

    /// Assemble the FITC factors for the given indicator dataset; no
    /// hyperparameter is estimated here.
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        let n = x.nrows();
        if n == 0 {
            return Err(GpError::InvalidValueError(
                "cannot fit a GP without observations".to_string(),
            ));
        }
        if x.ncols() != 3 {
            return Err(GpError::InvalidValueError(format!(
                "training coordinates must be 3-D, got {} columns",
                x.ncols()
            )));
        }
        if let Some(bad) = self.interpolate().iter().find(|&&i| i >= n) {
            return Err(GpError::InvalidValueError(format!(
                "interpolation index {bad} out of range for {n} observations"
            )));
        }

        let z = match self.pseudo_inputs() {
            PseudoInputs::Randomized(nz) => {
                if *nz > n {
                    return Err(GpError::InvalidValueError(format!(
                        "pseudo-input count {nz} exceeds the {n} available data points"
                    )));
                }
                let mut rng = match self.seed() {
                    Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
                    None => Xoshiro256Plus::from_entropy(),
                };
                sample_pseudo_inputs(*nz, &x.view(), &mut rng)
            }
            PseudoInputs::Located(z) => z.to_owned(),
        };

        let t = self.tangents().map(|t| t.len()).unwrap_or(0);
        let reg = self.reg().expand(n, "value-data")?;
        let reg_t = self.reg_t().expand(t, "tangent-data")?;

        let cov = self.cov();
        let nugget = cov.nugget();
        let sill = cov.total_sill();
        let m = z.nrows();
        let p = self.pseudo_tangents().map(|t| t.len()).unwrap_or(0);
        let mz = m + p;
        let nd = n + t;

        // Pseudo-set self covariance Kmm with a small stabilizing jitter
        let jitter = F::cast(1e-8) * sill;
        let mut kmm = Array2::zeros((mz, mz));
        for i in 0..mz {
            for j in 0..mz {
                kmm[[i, j]] = pseudo_cov(cov, &z, self.pseudo_tangents(), i, j);
            }
        }
        kmm = kmm + Array2::eye(mz) * jitter;

        // Cross covariance Kmn between the pseudo set and the data rows
        // (value observations then tangent constraints)
        let mut kmn = Array2::zeros((mz, nd));
        for i in 0..mz {
            for (j, xj) in x.rows().into_iter().enumerate() {
                kmn[[i, j]] = pseudo_data_cov(cov, &z, self.pseudo_tangents(), i, &xj, None);
            }
            if let Some(tg) = self.tangents() {
                for j in 0..t {
                    kmn[[i, n + j]] = pseudo_data_cov(
                        cov,
                        &z,
                        self.pseudo_tangents(),
                        i,
                        &tg.locations().row(j),
                        Some(&tg.directions().row(j)),
                    );
                }
            }
        }

        // Data self variances and per-row noise: value rows carry their
        // regularization plus the nugget (stripped at interpolation rows),
        // tangent rows carry the tangent regularization
        let mut knn_diag = Array1::zeros(nd);
        let mut noise = Array1::zeros(nd);
        let floor = F::cast(NOISE_FLOOR);
        for i in 0..n {
            knn_diag[i] = sill;
            noise[i] = if self.interpolate().contains(&i) {
                reg[i].max(floor)
            } else {
                (reg[i] + nugget).max(floor)
            };
        }
        if let Some(tg) = self.tangents() {
            for j in 0..t {
                let loc = tg.locations().row(j);
                let dir = tg.directions().row(j);
                knn_diag[n + j] = cov.covariance_dir_dir(&loc, &dir, &loc, &dir);
                noise[n + j] = reg_t[j].max(floor);
            }
        }

        // Centered targets: indicator values minus the mean offset, zero for
        // tangent rows (the derivative of a constant mean vanishes)
        let mut ybar = Array2::zeros((nd, 1));
        Zip::from(ybar.slice_mut(ndarray::s![..n, 0]))
            .and(y)
            .for_each(|yb, yi| *yb = *yi - self.mean());

        let (likelihood, w_data) = fitc(&kmm, &kmn, &knn_diag, &noise, &ybar)?;
        debug!("SPGP assembled: n={n} t={t} m={m} p={p} likelihood={likelihood}");

        Ok(SparseIndicatorGp {
            cov: cov.clone(),
            mean: self.mean(),
            likelihood,
            pseudo_inputs: z,
            pseudo_tangents: self.pseudo_tangents().cloned(),
            w_data,
            training_data: (x.to_owned(), y.to_owned()),
            tangents: self.tangents().cloned(),
            params: self.clone(),
        })
    }
}

/// Covariance between two entries of the pseudo set; the first `m` entries
/// are value-type pseudo-inputs, the rest are pseudo-tangents
fn pseudo_cov<F: Float>(
    cov: &CovarianceModel<F>,
    z: &Array2<F>,
    pt: Option<&TangentData<F>>,
    i: usize,
    j: usize,
) -> F {
    let m = z.nrows();
    match (i < m, j < m) {
        (true, true) => cov.covariance(&z.row(i), &z.row(j)),
        (true, false) => {
            let pt = pt.unwrap();
            let j = j - m;
            cov.covariance_dir(&z.row(i), &pt.locations().row(j), &pt.directions().row(j))
        }
        (false, true) => {
            let pt = pt.unwrap();
            let i = i - m;
            cov.covariance_dir(&z.row(j), &pt.locations().row(i), &pt.directions().row(i))
        }
        (false, false) => {
            let pt = pt.unwrap();
            let (i, j) = (i - m, j - m);
            cov.covariance_dir_dir(
                &pt.locations().row(i),
                &pt.directions().row(i),
                &pt.locations().row(j),
                &pt.directions().row(j),
            )
        }
    }
}

/// Covariance between one pseudo-set entry and one data row, which is either
/// a value observation (`dir` is `None`) or a tangent constraint
fn pseudo_data_cov<F: Float>(
    cov: &CovarianceModel<F>,
    z: &Array2<F>,
    pt: Option<&TangentData<F>>,
    i: usize,
    loc: &ndarray::ArrayView1<F>,
    dir: Option<&ndarray::ArrayView1<F>>,
) -> F {
    let m = z.nrows();
    if i < m {
        match dir {
            None => cov.covariance(&z.row(i), loc),
            Some(u) => cov.covariance_dir(&z.row(i), loc, u),
        }
    } else {
        let pt = pt.unwrap();
        let i = i - m;
        let zloc = pt.locations().row(i);
        let zdir = pt.directions().row(i);
        match dir {
            None => cov.covariance_dir(loc, &zloc, &zdir),
            Some(u) => cov.covariance_dir_dir(&zloc, &zdir, loc, u),
        }
    }
}

/// FITC marginal log-likelihood and Woodbury factors, with per-row noise
fn fitc<F: Float>(
    kmm: &Array2<F>,
    kmn: &Array2<F>,
    knn_diag: &Array1<F>,
    noise: &Array1<F>,
    ybar: &Array2<F>,
) -> Result<(F, WoodburyData<F>)> {
    let mz = kmm.nrows();
    let nd = kmn.ncols();

    // Cholesky decomposition: Kmm = U U^T
    let u = kmm.cholesky()?;
    let ui = u.solve_triangular(&Array2::eye(mz), UPLO::Lower)?;
    let v = ui.dot(kmn);

    // Diagonal correction: nu = Knn_diag - Qnn_diag + noise
    let qnn = (v.to_owned() * &v).sum_axis(Axis(0));
    let nu = knn_diag.to_owned() - qnn + noise;
    if nu.iter().any(|v| *v <= F::zero() || !v.is_finite()) {
        return Err(GpError::LikelihoodComputationError(
            "non-positive effective noise in FITC correction".to_string(),
        ));
    }
    let beta = nu.mapv(|v| F::one() / v);

    // Cholesky decomposition: A = I + V diag(beta) V^T = L L^T
    let a_mat =
        Array2::eye(mz) + (v.to_owned() * beta.to_owned().insert_axis(Axis(0))).dot(&v.t());
    let l = a_mat.cholesky()?;
    let li = l.solve_triangular(&Array2::eye(mz), UPLO::Lower)?;

    let a = ybar.to_owned() * beta.to_owned().insert_axis(Axis(1));
    let b = li.dot(&v).dot(&a);

    // Marginal log-likelihood, constant term included so that per-class
    // likelihoods add up to a meaningful joint value
    let term0 = F::cast(nd as f64) * F::cast((2. * std::f64::consts::PI).ln());
    let term1 = nu.mapv(|v| v.ln()).sum();
    let term2 = F::cast(2.) * l.diag().mapv(|v| v.ln()).sum();
    let term3 = a.t().dot(ybar)[[0, 0]];
    let term4 = -(b.to_owned() * &b).sum();
    let likelihood = -F::cast(0.5) * (term0 + term1 + term2 + term3 + term4);
    if !likelihood.is_finite() {
        return Err(GpError::LikelihoodComputationError(
            "non-finite marginal log-likelihood".to_string(),
        ));
    }

    // Woodbury vectors for the prediction step
    let li_ui = li.dot(&ui);
    let li_ui_t = li_ui.t();
    let w_data = WoodburyData {
        vec: li_ui_t.dot(&b),
        inv: ui.t().dot(&ui) - li_ui_t.dot(&li_ui),
    };

    Ok((likelihood, w_data))
}

/// Sample `n` pseudo-inputs from the training coordinates without replacement
pub fn sample_pseudo_inputs<F: Float>(
    n: usize,
    xt: &ArrayView2<F>,
    rng: &mut Xoshiro256Plus,
) -> Array2<F> {
    let mut indices = (0..xt.nrows()).collect::<Vec<_>>();
    indices.shuffle(rng);
    let mut z = Array2::zeros((n, xt.ncols()));
    for (mut zi, &idx) in z.rows_mut().into_iter().zip(indices[..n].iter()) {
        zi.assign(&xt.row(idx));
    }
    z
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::{CovarianceModel, CovarianceStructure, StructureKind};
    use crate::sparse_parameters::Regularization;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use linfa::ParamGuard;
    use ndarray::{array, Array};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn cov_model(range: f64, nugget: f64) -> CovarianceModel<f64> {
        CovarianceModel::new(
            vec![CovarianceStructure::isotropic(StructureKind::Gaussian, 1.0, range).unwrap()],
            nugget,
        )
        .unwrap()
    }

    fn training_points() -> (Array2<f64>, Array1<f64>) {
        let xt = array![
            [0., 0., 0.],
            [1., 0., 0.],
            [0., 1., 0.],
            [0., 0., 1.],
            [1., 1., 0.],
            [1., 0., 1.],
            [0., 1., 1.],
            [1., 1., 1.],
        ];
        let yt = xt.map_axis(Axis(1), |p| f64::tanh(p[0] - p[1] + 0.5 * p[2]));
        (xt, yt)
    }

    #[test]
    fn test_fit_and_interpolate_training_points() {
        let (xt, yt) = training_points();
        let gp = SparseIndicatorGp::params(
            cov_model(2.5, 0.),
            PseudoInputs::Located(xt.clone()),
        )
        .reg(Regularization::Scalar(1e-9))
        .check()
        .unwrap()
        .fit(&Dataset::new(xt.clone(), yt.clone()))
        .expect("SPGP fitted");

        assert!(gp.likelihood().is_finite());
        let preds = gp.predict(&xt).unwrap();
        assert_abs_diff_eq!(preds, yt, epsilon = 1e-2);
        let vars = gp.predict_var(&xt).unwrap();
        assert!(vars.iter().all(|v| *v >= 0.));
    }

    #[test]
    fn test_relaxes_to_mean_far_from_data() {
        let (xt, yt) = training_points();
        let mean = -0.5;
        let gp = SparseIndicatorGp::params(cov_model(2., 0.01), PseudoInputs::Located(xt.clone()))
            .mean(mean)
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap();

        let far = array![[1000., 1000., 1000.]];
        let pred = gp.predict(&far).unwrap();
        assert_abs_diff_eq!(pred[0], mean, epsilon = 1e-9);
        // the variance relaxes to the total sill plus the nugget
        let var = gp.predict_var(&far).unwrap();
        assert_abs_diff_eq!(var[0], 1.0 + 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_randomized_pseudo_inputs_seeded() {
        let xt = Array::random_using(
            (40, 3),
            Uniform::new(0., 10.),
            &mut Xoshiro256Plus::seed_from_u64(7),
        );
        let yt = xt.map_axis(Axis(1), |p| f64::sin(p[0] / 10.));

        let fit = |seed| {
            SparseIndicatorGp::params(cov_model(5., 0.01), PseudoInputs::Randomized(10))
                .seed(Some(seed))
                .check()
                .unwrap()
                .fit(&Dataset::new(xt.clone(), yt.clone()))
                .unwrap()
        };
        let gp1 = fit(42);
        let gp2 = fit(42);
        assert_eq!(gp1.pseudo_inputs(), gp2.pseudo_inputs());
        assert_abs_diff_eq!(gp1.likelihood(), gp2.likelihood());
        assert_eq!(gp1.n_pseudo_inputs(), 10);
    }

    #[test]
    fn test_too_many_pseudo_inputs() {
        let (xt, yt) = training_points();
        let res = SparseIndicatorGp::params(cov_model(2., 0.01), PseudoInputs::Randomized(50))
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt));
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
    }

    #[test]
    fn test_interpolation_index_out_of_range() {
        let (xt, yt) = training_points();
        let res = SparseIndicatorGp::params(cov_model(2., 0.01), PseudoInputs::Randomized(4))
            .interpolate(vec![100])
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt));
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
    }

    #[test]
    fn test_regularization_length_mismatch() {
        let (xt, yt) = training_points();
        let res = SparseIndicatorGp::params(cov_model(2., 0.01), PseudoInputs::Randomized(4))
            .reg(Regularization::PerPoint(array![1e-9, 1e-9]))
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt));
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
    }

    #[test]
    fn test_interpolation_constraint_tightens_fit() {
        let (xt, yt) = training_points();
        // noisy setting: large nugget everywhere except the constrained point
        let constrained = 3;
        let fit = |interp: Vec<usize>| {
            SparseIndicatorGp::params(cov_model(2.5, 0.5), PseudoInputs::Located(xt.clone()))
                .interpolate(interp)
                .check()
                .unwrap()
                .fit(&Dataset::new(xt.clone(), yt.clone()))
                .unwrap()
        };
        let free = fit(vec![]);
        let pinned = fit(vec![constrained]);
        let x3 = xt.row(constrained).insert_axis(Axis(0)).to_owned();
        let err_free = (free.predict(&x3).unwrap()[0] - yt[constrained]).abs();
        let err_pinned = (pinned.predict(&x3).unwrap()[0] - yt[constrained]).abs();
        assert!(
            err_pinned < err_free,
            "interpolation constraint should tighten the fit: {err_pinned} vs {err_free}"
        );
        assert_abs_diff_eq!(pinned.predict(&x3).unwrap()[0], yt[constrained], epsilon = 1e-2);
    }

    #[test]
    fn test_tangent_data_fit() {
        let (xt, yt) = training_points();
        let tangents = TangentData::new(
            array![[0.5, 0.5, 0.5], [0.2, 0.8, 0.1]],
            array![[0., 1., 0.], [0., 0., 2.]],
        )
        .unwrap();
        let gp = SparseIndicatorGp::params(
            cov_model(2.5, 0.01),
            PseudoInputs::Located(xt.clone()),
        )
        .tangents(Some(tangents.clone()))
        .pseudo_tangents(Some(tangents))
        .check()
        .unwrap()
        .fit(&Dataset::new(xt, yt))
        .expect("SPGP fitted with tangents");

        assert!(gp.likelihood().is_finite());
        assert_eq!(gp.n_tangents(), 2);
        assert_eq!(gp.n_pseudo_tangents(), 2);
        let probe = array![[0.5, 0.5, 0.5]];
        assert!(gp.predict(&probe).unwrap()[0].is_finite());
    }

    #[test]
    fn test_tangent_shape_mismatch() {
        let res = TangentData::new(array![[0., 0., 0.]], array![[1., 0., 0.], [0., 1., 0.]]);
        assert!(res.is_err());
        let res = TangentData::new(array![[0., 0., 0.]], array![[0., 0., 0.]]);
        assert!(res.is_err());
    }

    #[test]
    fn test_display() {
        let (xt, yt) = training_points();
        let gp = SparseIndicatorGp::params(cov_model(2., 0.01), PseudoInputs::Randomized(4))
            .seed(Some(0))
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap();
        let shown = format!("{gp}");
        assert!(shown.contains("SPGP"));
        assert!(shown.contains("pseudo-inputs=4"));
    }
}
