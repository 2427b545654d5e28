use crate::errors::{ModelError, Result};
use ndarray::{Array1, Array2};

/// Label assigned when no class potential dominates at a target location
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Spatially scattered categorical observations: 3-D coordinates with two
/// label columns.
///
/// Each observation carries two labels so that geological contacts can be
/// encoded without a dedicated flag: a point inside a unit has the same
/// label twice, a point on a boundary carries the two units in contact.
/// `None` stands for a missing (NA) label; every observation must keep at
/// least one label.
#[derive(Clone, Debug)]
pub struct GeoPoints {
    coords: Array2<f64>,
    label1: Vec<Option<String>>,
    label2: Vec<Option<String>>,
}

impl GeoPoints {
    /// Build an observation set from (n, 3) coordinates and two label columns
    pub fn new(
        coords: Array2<f64>,
        label1: Vec<Option<String>>,
        label2: Vec<Option<String>>,
    ) -> Result<Self> {
        if coords.ncols() != 3 {
            return Err(ModelError::InvalidConfig(format!(
                "coordinates must be a (n, 3) matrix, got {} columns",
                coords.ncols()
            )));
        }
        let n = coords.nrows();
        if label1.len() != n || label2.len() != n {
            return Err(ModelError::InvalidConfig(format!(
                "label columns (lengths {} and {}) must match the {} observations",
                label1.len(),
                label2.len(),
                n
            )));
        }
        if let Some(i) = (0..n).find(|&i| label1[i].is_none() && label2[i].is_none()) {
            return Err(ModelError::InvalidConfig(format!(
                "observation {i} has no label in either column"
            )));
        }
        Ok(GeoPoints {
            coords,
            label1,
            label2,
        })
    }

    /// Build an observation set where both label columns are identical
    /// (no contact points)
    pub fn from_single_labels(coords: Array2<f64>, labels: Vec<Option<String>>) -> Result<Self> {
        let label2 = labels.clone();
        Self::new(coords, labels, label2)
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.coords.nrows() == 0
    }

    /// Coordinates as a (n, 3) matrix
    pub fn coords(&self) -> &Array2<f64> {
        &self.coords
    }

    /// First label column
    pub fn label1(&self) -> &[Option<String>] {
        &self.label1
    }

    /// Second label column
    pub fn label2(&self) -> &[Option<String>] {
        &self.label2
    }

    /// Distinct labels over both columns, sorted and deduplicated
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .label1
            .iter()
            .chain(self.label2.iter())
            .flatten()
            .cloned()
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }

    /// Diagonal of the axis-aligned bounding box of the coordinates
    pub fn bounding_box_diagonal(&self) -> f64 {
        let mut d2 = 0.;
        for col in self.coords.columns() {
            let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
            for &v in col {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            if hi > lo {
                d2 += (hi - lo) * (hi - lo);
            }
        }
        d2.sqrt()
    }
}

/// Joint prediction at a set of target locations: per-class potentials,
/// a most-likely label (possibly [`UNKNOWN_LABEL`]) and an entropy surface.
#[derive(Clone, Debug)]
pub struct Prediction {
    name: String,
    classes: Vec<String>,
    potentials: Array2<f64>,
    variances: Option<Array2<f64>>,
    labels: Vec<String>,
    entropy: Array1<f64>,
}

impl Prediction {
    pub(crate) fn new(
        name: String,
        classes: Vec<String>,
        potentials: Array2<f64>,
        variances: Option<Array2<f64>>,
        labels: Vec<String>,
        entropy: Array1<f64>,
    ) -> Self {
        Prediction {
            name,
            classes,
            potentials,
            variances,
            labels,
            entropy,
        }
    }

    /// Output field family name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class names, one per potential column
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Per-class potentials as a (n_targets, n_classes) matrix
    pub fn potentials(&self) -> &Array2<f64> {
        &self.potentials
    }

    /// Per-class predictive variances, when requested
    pub fn variances(&self) -> Option<&Array2<f64>> {
        self.variances.as_ref()
    }

    /// Most-likely class label per target, [`UNKNOWN_LABEL`] when no class
    /// potential exceeds the confidence level
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Entropy of the class probabilities per target
    pub fn entropy(&self) -> &Array1<f64> {
        &self.entropy
    }

    /// Names of the per-class potential fields, `<name>_<class>`
    pub fn potential_field_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .map(|c| format!("{}_{}", self.name, c))
            .collect()
    }

    /// Name of the label field, `<name>_label`
    pub fn label_field_name(&self) -> String {
        format!("{}_label", self.name)
    }

    /// Name of the entropy field, `<name>_entropy`
    pub fn entropy_field_name(&self) -> String {
        format!("{}_entropy", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn labels(names: &[&str]) -> Vec<Option<String>> {
        names.iter().map(|s| Some(s.to_string())).collect()
    }

    #[test]
    fn test_classes_sorted_dedup() {
        let pts = GeoPoints::new(
            array![[0., 0., 0.], [1., 0., 0.], [2., 0., 0.]],
            labels(&["B", "A", "B"]),
            labels(&["B", "A", "A"]),
        )
        .unwrap();
        assert_eq!(pts.classes(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_missing_labels_allowed_one_sided() {
        let pts = GeoPoints::new(
            array![[0., 0., 0.], [1., 0., 0.]],
            vec![Some("A".to_string()), None],
            vec![None, Some("B".to_string())],
        );
        assert!(pts.is_ok());
        let bad = GeoPoints::new(
            array![[0., 0., 0.]],
            vec![None],
            vec![None],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_bounding_box_diagonal() {
        let pts = GeoPoints::from_single_labels(
            array![[0., 0., 0.], [3., 4., 0.]],
            labels(&["A", "B"]),
        )
        .unwrap();
        assert_abs_diff_eq!(pts.bounding_box_diagonal(), 5.);
    }

    #[test]
    fn test_shape_validation() {
        assert!(GeoPoints::new(array![[0., 0.]], labels(&["A"]), labels(&["A"])).is_err());
        assert!(GeoPoints::new(
            array![[0., 0., 0.]],
            labels(&["A", "B"]),
            labels(&["A"])
        )
        .is_err());
    }
}
