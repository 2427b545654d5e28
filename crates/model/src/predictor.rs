//! Joint prediction over a multi-class model: per-class potentials, a
//! most-likely label with an explicit `"Unknown"` outcome, and an entropy
//! surface quantifying classification uncertainty.

use crate::errors::{ModelError, Result};
use crate::multiclass::MultiClassModel;
use crate::types::{Prediction, UNKNOWN_LABEL};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;
use rayon::prelude::*;

/// Softmax probabilities of one augmented potential row, shifted by the row
/// maximum for numerical stability
fn softmax(row: &[f64]) -> Vec<f64> {
    let m = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|v| (v - m).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy of a probability vector
fn entropy(p: &[f64]) -> f64 {
    -p.iter().filter(|&&v| v > 0.).map(|&v| v * v.ln()).sum::<f64>()
}

impl MultiClassModel {
    /// Predict class potentials, labels and entropy at the given (n, 3)
    /// target locations. `name` is the output field family name.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        name: &str,
    ) -> Result<Prediction> {
        self.predict_impl(x, name, false)
    }

    /// Same as [`predict`](Self::predict), additionally computing the
    /// per-class predictive variances
    pub fn predict_with_variance(
        &self,
        x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        name: &str,
    ) -> Result<Prediction> {
        self.predict_impl(x, name, true)
    }

    fn predict_impl(
        &self,
        x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        name: &str,
        with_var: bool,
    ) -> Result<Prediction> {
        if x.ncols() != 3 {
            return Err(ModelError::InvalidConfig(format!(
                "target coordinates must be a (n, 3) matrix, got {} columns",
                x.ncols()
            )));
        }
        let n = x.nrows();
        let c = self.n_classes();

        let per_class = self
            .gps()
            .par_iter()
            .map(|gp| {
                let mu = gp.predict(x)?;
                let var = if with_var {
                    Some(gp.predict_var(x)?)
                } else {
                    None
                };
                Ok((mu, var))
            })
            .collect::<std::result::Result<Vec<_>, lithos_gp::GpError>>()?;

        let mut potentials = Array2::zeros((n, c));
        let mut variances = with_var.then(|| Array2::zeros((n, c)));
        for (j, (mu, var)) in per_class.iter().enumerate() {
            potentials.column_mut(j).assign(mu);
            if let (Some(vs), Some(var)) = (variances.as_mut(), var) {
                vs.column_mut(j).assign(var);
            }
        }

        // Joint decision per target: the winning class must strictly beat
        // the unknown level, and the probabilities are taken over the
        // class potentials augmented with that level. Far from any data
        // every potential relaxes to the baseline, the augmented vector
        // becomes uniform and the entropy peaks at ln(C + 1).
        let threshold = self.unknown_threshold;
        let mut labels = Vec::with_capacity(n);
        let mut ent = Array1::zeros(n);
        let mut augmented = vec![0.; c + 1];
        for (i, row) in potentials.axis_iter(Axis(0)).enumerate() {
            let best = row.argmax().map_err(|e| {
                ModelError::InvalidConfig(format!("empty potential row: {e}"))
            })?;
            labels.push(if row[best] > threshold {
                self.classes()[best].clone()
            } else {
                UNKNOWN_LABEL.to_string()
            });
            augmented[..c].copy_from_slice(row.as_slice().ok_or_else(|| {
                ModelError::InvalidConfig("non-contiguous potential row".to_string())
            })?);
            augmented[c] = threshold;
            ent[i] = entropy(&softmax(&augmented));
        }

        Ok(Prediction::new(
            name.to_string(),
            self.classes().to_vec(),
            potentials,
            variances,
            labels,
            ent,
        ))
    }
}
