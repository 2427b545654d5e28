//! Multi-class indicator model: one sparse indicator GP per geological class,
//! built from dual-label compositional data and sharing one covariance model.

use crate::errors::{ModelError, Result};
use crate::types::GeoPoints;
use linfa::prelude::{Dataset, Fit};
use linfa::ParamGuard;
use lithos_gp::{
    sample_pseudo_inputs, CovarianceModel, PseudoInputs, Regularization, SparseIndicatorGp,
    TangentData,
};
use log::info;
use ndarray::{Array1, Array2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use std::fmt;

/// Tolerance used when matching an indicator value against the contact
/// signature
const CONTACT_TOL: f64 = 1e-9;

/// Indicator vector of one category over the observation set.
///
/// Each label column contributes `+1` on a match and `-1/C` otherwise; the
/// two contributions are averaged. A missing label inherits the other
/// column's value, so single-labeled points stay clean positives or
/// negatives.
pub(crate) fn indicators(points: &GeoPoints, class: &str, n_classes: usize) -> Array1<f64> {
    let neg = -1. / n_classes as f64;
    let score = |label: Option<&String>, other: Option<&String>| -> f64 {
        match label.or(other) {
            Some(l) if l == class => 1.,
            _ => neg,
        }
    };
    Array1::from_iter((0..points.len()).map(|i| {
        let l1 = points.label1()[i].as_ref();
        let l2 = points.label2()[i].as_ref();
        0.5 * (score(l1, l2) + score(l2, l1))
    }))
}

/// The indicator value taken at a contact point, strictly between the
/// background level `-1/C` and the positive level `+1`
pub(crate) fn contact_signature(n_classes: usize) -> f64 {
    (1. - 1. / n_classes as f64) / 2.
}

/// Indices where the indicator equals the contact signature
pub(crate) fn contact_indices(indicator: &Array1<f64>, n_classes: usize) -> Vec<usize> {
    let sig = contact_signature(n_classes);
    indicator
        .iter()
        .enumerate()
        .filter(|(_, &v)| (v - sig).abs() < CONTACT_TOL)
        .map(|(i, _)| i)
        .collect()
}

/// Parameters configuring a [`MultiClassModel`] fit
#[derive(Clone, Debug)]
pub struct MultiClassParams {
    cov: CovarianceModel<f64>,
    pseudo_inputs: PseudoInputs<f64>,
    tangents: Option<TangentData<f64>>,
    pseudo_tangents: Option<TangentData<f64>>,
    enforce_contacts: bool,
    reg: Regularization<f64>,
    reg_t: Regularization<f64>,
    unknown_threshold: Option<f64>,
    seed: Option<u64>,
}

impl MultiClassParams {
    /// A constructor given the shared covariance model
    pub fn new(cov: CovarianceModel<f64>) -> Self {
        MultiClassParams {
            cov,
            pseudo_inputs: PseudoInputs::default(),
            tangents: None,
            pseudo_tangents: None,
            enforce_contacts: true,
            reg: Regularization::default(),
            reg_t: Regularization::default(),
            unknown_threshold: None,
            seed: None,
        }
    }

    /// Set the pseudo-input specification shared by all class GPs
    pub fn pseudo_inputs(mut self, z: PseudoInputs<f64>) -> Self {
        self.pseudo_inputs = z;
        self
    }

    /// Set structural orientation data, consumed as tangent constraints by
    /// every class GP
    pub fn tangents(mut self, tangents: Option<TangentData<f64>>) -> Self {
        self.tangents = tangents;
        self
    }

    /// Set pseudo-tangent entries shared by all class GPs
    pub fn pseudo_tangents(mut self, pseudo_tangents: Option<TangentData<f64>>) -> Self {
        self.pseudo_tangents = pseudo_tangents;
        self
    }

    /// Whether detected contact points are passed to the GPs as
    /// exact-interpolation constraints (contacts are always detected, but
    /// only enforced when this is set)
    pub fn enforce_contacts(mut self, enforce: bool) -> Self {
        self.enforce_contacts = enforce;
        self
    }

    /// Set the value-data regularization
    pub fn reg(mut self, reg: Regularization<f64>) -> Self {
        self.reg = reg;
        self
    }

    /// Set the tangent-data regularization
    pub fn reg_t(mut self, reg_t: Regularization<f64>) -> Self {
        self.reg_t = reg_t;
        self
    }

    /// Confidence level a class potential must exceed to win over the
    /// `"Unknown"` outcome; defaults to the compositional baseline `-1/C`
    pub fn unknown_threshold(mut self, threshold: Option<f64>) -> Self {
        self.unknown_threshold = threshold;
        self
    }

    /// Seed used when sampling randomized pseudo-inputs
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Build one sparse indicator GP per distinct label value.
    ///
    /// # Errors
    ///
    /// * [`ModelError::NotEnoughClasses`] with fewer than 2 distinct labels,
    /// * [`ModelError::TooManyPseudoInputs`] when sampling more pseudo-inputs
    ///   than data points,
    /// * [`ModelError::RegularizationLength`] on a mismatched per-point
    ///   regularization vector.
    pub fn fit(&self, points: &GeoPoints) -> Result<MultiClassModel> {
        let classes = points.classes();
        if classes.len() < 2 {
            return Err(ModelError::NotEnoughClasses(classes.len()));
        }
        let n = points.len();
        if let Regularization::PerPoint(v) = &self.reg {
            if v.len() != n {
                return Err(ModelError::RegularizationLength {
                    got: v.len(),
                    expected: n,
                });
            }
        }
        if let Regularization::PerPoint(v) = &self.reg_t {
            let t = self.tangents.as_ref().map(|tg| tg.len()).unwrap_or(0);
            if v.len() != t {
                return Err(ModelError::RegularizationLength {
                    got: v.len(),
                    expected: t,
                });
            }
        }
        // Pseudo-inputs are sampled once and shared by all class GPs
        let z = match &self.pseudo_inputs {
            PseudoInputs::Randomized(nz) => {
                if *nz > n {
                    return Err(ModelError::TooManyPseudoInputs {
                        requested: *nz,
                        available: n,
                    });
                }
                let mut rng = match self.seed {
                    Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
                    None => Xoshiro256Plus::from_entropy(),
                };
                sample_pseudo_inputs(*nz, &points.coords().view(), &mut rng)
            }
            PseudoInputs::Located(z) => z.to_owned(),
        };
        self.fit_with_pseudo_inputs(points, z)
    }

    /// Fit against already resolved pseudo-input locations (also the refit
    /// path used by the covariance fitter, which holds them fixed)
    pub(crate) fn fit_with_pseudo_inputs(
        &self,
        points: &GeoPoints,
        z: Array2<f64>,
    ) -> Result<MultiClassModel> {
        let classes = points.classes();
        let c = classes.len();
        let mean = -1. / c as f64;

        let per_class = classes
            .par_iter()
            .map(|class| {
                let indicator = indicators(points, class, c);
                let contacts = contact_indices(&indicator, c);
                let enforced = if self.enforce_contacts {
                    contacts.clone()
                } else {
                    vec![]
                };
                let gp = SparseIndicatorGp::params(
                    self.cov.clone(),
                    PseudoInputs::Located(z.clone()),
                )
                .mean(mean)
                .tangents(self.tangents.clone())
                .pseudo_tangents(self.pseudo_tangents.clone())
                .interpolate(enforced)
                .reg(self.reg.clone())
                .reg_t(self.reg_t.clone())
                .check()?
                .fit(&Dataset::new(points.coords().clone(), indicator))?;
                Ok((gp, contacts))
            })
            .collect::<std::result::Result<Vec<_>, lithos_gp::GpError>>()?;

        let (gps, contacts): (Vec<_>, Vec<_>) = per_class.into_iter().unzip();
        let model = MultiClassModel {
            unknown_threshold: self.unknown_threshold.unwrap_or(mean),
            classes,
            gps,
            contacts,
            points: points.clone(),
            params: self.clone(),
        };
        info!(
            "multi-class model built: {} classes, total log-likelihood {}",
            model.n_classes(),
            model.log_likelihood()
        );
        Ok(model)
    }
}

/// A multi-class implicit geological model: one [`SparseIndicatorGp`] per
/// class, sharing covariance hyperparameters and pseudo-input locations
/// while regressing independent indicator targets.
#[derive(Clone, Debug)]
pub struct MultiClassModel {
    classes: Vec<String>,
    gps: Vec<SparseIndicatorGp<f64>>,
    /// Detected contact indices per class (enforced only when configured)
    contacts: Vec<Vec<usize>>,
    points: GeoPoints,
    params: MultiClassParams,
    pub(crate) unknown_threshold: f64,
}

impl MultiClassModel {
    /// A constructor for fit parameters given the shared covariance model
    pub fn params(cov: CovarianceModel<f64>) -> MultiClassParams {
        MultiClassParams::new(cov)
    }

    /// Class names, sorted
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Per-class GPs, in class order
    pub fn gps(&self) -> &[SparseIndicatorGp<f64>] {
        &self.gps
    }

    /// Shared covariance model
    pub fn cov(&self) -> &CovarianceModel<f64> {
        self.params.cov()
    }

    /// Training observations
    pub fn points(&self) -> &GeoPoints {
        &self.points
    }

    /// Detected contact indices per class
    pub fn contacts(&self) -> &[Vec<usize>] {
        &self.contacts
    }

    /// Confidence level for the `"Unknown"` outcome
    pub fn unknown_threshold(&self) -> f64 {
        self.unknown_threshold
    }

    /// Per-class marginal log-likelihoods, in class order
    pub fn class_likelihoods(&self) -> Vec<f64> {
        self.gps.iter().map(|gp| gp.likelihood()).collect()
    }

    /// Total log-likelihood: classes are modeled independently given the
    /// shared hyperparameters, so per-class values simply add
    pub fn log_likelihood(&self) -> f64 {
        self.gps.iter().map(|gp| gp.likelihood()).sum()
    }

    /// Rebuild the model with another covariance model, keeping the training
    /// data, indicator targets, constraints, pseudo-inputs and regularization
    /// fixed. This is a pure reconstruction; `self` is left untouched.
    pub fn with_covariance(&self, cov: CovarianceModel<f64>) -> Result<MultiClassModel> {
        let mut params = self.params.clone();
        params.cov = cov;
        params.fit_with_pseudo_inputs(&self.points, self.gps[0].pseudo_inputs().clone())
    }

    /// Fit parameters this model was built with
    pub fn fit_params(&self) -> &MultiClassParams {
        &self.params
    }
}

impl MultiClassParams {
    /// Shared covariance model
    pub fn cov(&self) -> &CovarianceModel<f64> {
        &self.cov
    }
}

impl fmt::Display for MultiClassModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Multi-class SPGP model")?;
        writeln!(f, "  classes ({}): {}", self.n_classes(), self.classes.join(", "))?;
        let gp = &self.gps[0];
        writeln!(f, "  data points: {}", gp.n_data())?;
        writeln!(f, "  tangents: {}", gp.n_tangents())?;
        writeln!(f, "  pseudo-inputs: {}", gp.n_pseudo_inputs())?;
        writeln!(f, "  pseudo-tangents: {}", gp.n_pseudo_tangents())?;
        writeln!(f, "  covariance: {}", self.cov())?;
        for (class, lkh) in self.classes.iter().zip(self.class_likelihoods()) {
            writeln!(f, "  log-likelihood[{class}]: {lkh}")?;
        }
        write!(f, "  total log-likelihood: {}", self.log_likelihood())
    }
}
