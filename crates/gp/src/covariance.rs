//! Anisotropic covariance models used by the indicator GPs.
//!
//! A covariance model is a weighted sum of covariance structures plus a nugget.
//! Each structure carries its own partial sill (contribution), three orthogonal
//! ranges, three orientation angles and a shape exponent. The following
//! structure kinds are implemented:
//! * spherical,
//! * cubic,
//! * exponential,
//! * gaussian.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use std::fmt;

/// Number of scalars in a flattened structure block:
/// contribution, maxrange, midrange fraction, minrange fraction,
/// azimuth, dip, rake, power.
pub const STRUCTURE_PARAMS: usize = 8;

/// Covariance structure kinds as a closed enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructureKind {
    /// Spherical model, linear near the origin
    Spherical,
    /// Cubic model, twice differentiable at the origin
    Cubic,
    /// Exponential model, `exp(-3 h^power)`
    Exponential,
    /// Gaussian model, `exp(-3 (h^2)^power)`
    Gaussian,
}

impl StructureKind {
    /// All supported kinds, in a stable order
    pub const ALL: [StructureKind; 4] = [
        StructureKind::Spherical,
        StructureKind::Cubic,
        StructureKind::Exponential,
        StructureKind::Gaussian,
    ];

    /// Correlation at reduced distance `h >= 0`, equal to 1 at the origin
    fn correlation<F: Float>(&self, h: F, power: F) -> F {
        let one = F::one();
        match self {
            StructureKind::Spherical => {
                if h < one {
                    one - F::cast(1.5) * h + F::cast(0.5) * h * h * h
                } else {
                    F::zero()
                }
            }
            StructureKind::Cubic => {
                if h < one {
                    let h2 = h * h;
                    let h3 = h2 * h;
                    let h5 = h3 * h2;
                    let h7 = h5 * h2;
                    one - F::cast(7.) * h2 + F::cast(8.75) * h3 - F::cast(3.5) * h5
                        + F::cast(0.75) * h7
                } else {
                    F::zero()
                }
            }
            StructureKind::Exponential => F::exp(F::cast(-3.) * h.powf(power)),
            StructureKind::Gaussian => F::exp(F::cast(-3.) * (h * h).powf(power)),
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StructureKind::Spherical => "Spherical",
            StructureKind::Cubic => "Cubic",
            StructureKind::Exponential => "Exponential",
            StructureKind::Gaussian => "Gaussian",
        };
        write!(f, "{name}")
    }
}

/// One anisotropic covariance structure
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceStructure<F: Float> {
    kind: StructureKind,
    contribution: F,
    /// Absolute ranges along the principal axes: maxrange, midrange, minrange
    ranges: [F; 3],
    /// Orientation angles in degrees: azimuth, dip, rake
    angles: [F; 3],
    power: F,
    /// Rotation from world coordinates to principal-axis coordinates
    rot: [[F; 3]; 3],
}

fn mat3_mul<F: Float>(a: &[[F; 3]; 3], b: &[[F; 3]; 3]) -> [[F; 3]; 3] {
    let mut c = [[F::zero(); 3]; 3];
    for (i, ci) in c.iter_mut().enumerate() {
        for (j, cij) in ci.iter_mut().enumerate() {
            for (aik, bk) in a[i].iter().zip(b.iter()) {
                *cij = *cij + *aik * bk[j];
            }
        }
    }
    c
}

/// Rotation from world axes (x east, y north, z up) to the principal
/// anisotropy axes, given azimuth, dip and rake in degrees.
///
/// Row 0 of the result is the maxrange direction: azimuth is measured
/// clockwise from north, so azimuth 0 points the long axis north and
/// azimuth 90 points it east. Dip then tilts the long axis out of the
/// horizontal plane (rotation around the transverse horizontal axis) and
/// rake spins the mid/min axes around the tilted long axis.
fn anisotropy_rotation<F: Float>(angles: &[F; 3]) -> [[F; 3]; 3] {
    let deg = F::cast(std::f64::consts::PI / 180.);
    let (sa, ca) = (angles[0] * deg).sin_cos();
    let (sd, cd) = (angles[1] * deg).sin_cos();
    let (sr, cr) = (angles[2] * deg).sin_cos();
    let zero = F::zero();
    let one = F::one();
    let r_az = [[sa, ca, zero], [-ca, sa, zero], [zero, zero, one]];
    let r_dip = [[cd, zero, sd], [zero, one, zero], [-sd, zero, cd]];
    let r_rake = [[one, zero, zero], [zero, cr, sr], [zero, -sr, cr]];
    mat3_mul(&r_rake, &mat3_mul(&r_dip, &r_az))
}

impl<F: Float> CovarianceStructure<F> {
    /// Build a covariance structure, validating its parameters
    pub fn new(
        kind: StructureKind,
        contribution: F,
        ranges: [F; 3],
        angles: [F; 3],
        power: F,
    ) -> Result<Self> {
        if contribution <= F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "structure contribution must be positive, got {contribution}"
            )));
        }
        if ranges.iter().any(|r| *r <= F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "structure ranges must be positive, got {:?}",
                ranges.map(|r| format!("{r}"))
            )));
        }
        if power <= F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "structure power must be positive, got {power}"
            )));
        }
        let rot = anisotropy_rotation(&angles);
        Ok(CovarianceStructure {
            kind,
            contribution,
            ranges,
            angles,
            power,
            rot,
        })
    }

    /// Isotropic shortcut: same range along the three axes, no rotation
    pub fn isotropic(kind: StructureKind, contribution: F, range: F) -> Result<Self> {
        Self::new(
            kind,
            contribution,
            [range, range, range],
            [F::zero(); 3],
            F::one(),
        )
    }

    /// Structure kind
    pub fn kind(&self) -> StructureKind {
        self.kind
    }

    /// Partial sill
    pub fn contribution(&self) -> F {
        self.contribution
    }

    /// Absolute ranges (maxrange, midrange, minrange)
    pub fn ranges(&self) -> &[F; 3] {
        &self.ranges
    }

    /// Orientation angles in degrees (azimuth, dip, rake)
    pub fn angles(&self) -> &[F; 3] {
        &self.angles
    }

    /// Shape exponent
    pub fn power(&self) -> F {
        self.power
    }

    /// Reduced anisotropic distance between two 3-D points
    fn reduced_distance(
        &self,
        p: &ArrayBase<impl Data<Elem = F>, Ix1>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let dx = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
        let mut h2 = F::zero();
        for (row, range) in self.rot.iter().zip(self.ranges.iter()) {
            let u = row[0] * dx[0] + row[1] * dx[1] + row[2] * dx[2];
            let scaled = u / *range;
            h2 = h2 + scaled * scaled;
        }
        h2.sqrt()
    }

    /// Covariance value between two points
    pub fn covariance(
        &self,
        p: &ArrayBase<impl Data<Elem = F>, Ix1>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let h = self.reduced_distance(p, q);
        self.contribution * self.kind.correlation(h, self.power)
    }
}

impl<F: Float> fmt::Display for CovarianceStructure<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}(contribution={}, ranges=[{}, {}, {}], angles=[{}, {}, {}], power={})",
            self.kind,
            self.contribution,
            self.ranges[0],
            self.ranges[1],
            self.ranges[2],
            self.angles[0],
            self.angles[1],
            self.angles[2],
            self.power
        )
    }
}

/// A weighted sum of covariance structures plus a nugget effect.
///
/// The nugget is handled as observation noise by the GPs and is not folded
/// into off-diagonal covariance entries.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceModel<F: Float> {
    structures: Vec<CovarianceStructure<F>>,
    nugget: F,
}

impl<F: Float> CovarianceModel<F> {
    /// Build a covariance model from its structures and nugget
    pub fn new(structures: Vec<CovarianceStructure<F>>, nugget: F) -> Result<Self> {
        if structures.is_empty() {
            return Err(GpError::InvalidValueError(
                "covariance model requires at least one structure".to_string(),
            ));
        }
        if nugget < F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "nugget must be non-negative, got {nugget}"
            )));
        }
        Ok(CovarianceModel { structures, nugget })
    }

    /// Covariance structures
    pub fn structures(&self) -> &[CovarianceStructure<F>] {
        &self.structures
    }

    /// Nugget effect
    pub fn nugget(&self) -> F {
        self.nugget
    }

    /// Total sill, excluding the nugget
    pub fn total_sill(&self) -> F {
        self.structures
            .iter()
            .fold(F::zero(), |acc, s| acc + s.contribution)
    }

    /// Covariance value between two 3-D points
    pub fn covariance(
        &self,
        p: &ArrayBase<impl Data<Elem = F>, Ix1>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        self.structures
            .iter()
            .fold(F::zero(), |acc, s| acc + s.covariance(p, q))
    }

    /// Covariance matrix between two coordinate sets given as (n, 3) and (m, 3)
    pub fn covariance_matrix(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix2>,
        b: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let mut k = Array2::zeros((a.nrows(), b.nrows()));
        Zip::indexed(&mut k).for_each(|(i, j), kij| {
            *kij = self.covariance(&a.row(i), &b.row(j));
        });
        k
    }

    /// Step used for finite-difference derivatives, relative to the largest range
    fn diff_step(&self) -> F {
        let max_range = self
            .structures
            .iter()
            .map(|s| s.ranges[0])
            .fold(F::zero(), F::max);
        F::cast(1e-4) * max_range
    }

    /// Directional derivative of the covariance with respect to the second
    /// point, along the unit direction `u`, by central finite difference
    pub fn covariance_dir(
        &self,
        p: &ArrayBase<impl Data<Elem = F>, Ix1>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
        u: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let s = self.diff_step();
        let qp: Array1<F> = q + &u.mapv(|v| v * s);
        let qm: Array1<F> = q - &u.mapv(|v| v * s);
        (self.covariance(p, &qp) - self.covariance(p, &qm)) / (F::cast(2.) * s)
    }

    /// Second-order directional derivative of the covariance, with respect to
    /// the first point along `up` and the second point along `uq`
    pub fn covariance_dir_dir(
        &self,
        p: &ArrayBase<impl Data<Elem = F>, Ix1>,
        up: &ArrayBase<impl Data<Elem = F>, Ix1>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
        uq: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        let s = self.diff_step();
        let pp: Array1<F> = p + &up.mapv(|v| v * s);
        let pm: Array1<F> = p - &up.mapv(|v| v * s);
        let qp: Array1<F> = q + &uq.mapv(|v| v * s);
        let qm: Array1<F> = q - &uq.mapv(|v| v * s);
        (self.covariance(&pp, &qp) - self.covariance(&pp, &qm) - self.covariance(&pm, &qp)
            + self.covariance(&pm, &qm))
            / (F::cast(4.) * s * s)
    }

    /// Flatten the model into its hyperparameter vector.
    ///
    /// Per structure: contribution, maxrange, midrange as a fraction of
    /// maxrange, minrange as a fraction of midrange, azimuth, dip, rake,
    /// power. One trailing nugget scalar. Length is `8 * S + 1`.
    pub fn to_param_vector(&self) -> Array1<F> {
        let mut v = Array1::zeros(STRUCTURE_PARAMS * self.structures.len() + 1);
        for (i, st) in self.structures.iter().enumerate() {
            let block = i * STRUCTURE_PARAMS;
            v[block] = st.contribution;
            v[block + 1] = st.ranges[0];
            v[block + 2] = st.ranges[1] / st.ranges[0];
            v[block + 3] = st.ranges[2] / st.ranges[1];
            v[block + 4] = st.angles[0];
            v[block + 5] = st.angles[1];
            v[block + 6] = st.angles[2];
            v[block + 7] = st.power;
        }
        v[STRUCTURE_PARAMS * self.structures.len()] = self.nugget;
        v
    }

    /// Rebuild a model from a hyperparameter vector and the structure kinds
    pub fn from_param_vector(
        kinds: &[StructureKind],
        v: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self> {
        let expected = STRUCTURE_PARAMS * kinds.len() + 1;
        if v.len() != expected {
            return Err(GpError::InvalidValueError(format!(
                "hyperparameter vector length {} does not match {} structures (expected {})",
                v.len(),
                kinds.len(),
                expected
            )));
        }
        let mut structures = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            let block = i * STRUCTURE_PARAMS;
            let maxrange = v[block + 1];
            let midrange = maxrange * v[block + 2];
            let minrange = midrange * v[block + 3];
            structures.push(CovarianceStructure::new(
                *kind,
                v[block],
                [maxrange, midrange, minrange],
                [v[block + 4], v[block + 5], v[block + 6]],
                v[block + 7],
            )?);
        }
        CovarianceModel::new(structures, v[expected - 1])
    }

    /// Structure kinds, in model order
    pub fn kinds(&self) -> Vec<StructureKind> {
        self.structures.iter().map(|s| s.kind).collect()
    }
}

impl<F: Float> fmt::Display for CovarianceModel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CovarianceModel(")?;
        for (i, st) in self.structures.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{st}")?;
        }
        write!(f, ", nugget={})", self.nugget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn gaussian_model(range: f64) -> CovarianceModel<f64> {
        CovarianceModel::new(
            vec![CovarianceStructure::isotropic(StructureKind::Gaussian, 1.0, range).unwrap()],
            0.01,
        )
        .unwrap()
    }

    #[test]
    fn test_sill_at_origin() {
        for kind in StructureKind::ALL {
            let model = CovarianceModel::new(
                vec![CovarianceStructure::isotropic(kind, 2.5, 10.).unwrap()],
                0.1,
            )
            .unwrap();
            let p = array![1., 2., 3.];
            assert_abs_diff_eq!(model.covariance(&p, &p), 2.5, epsilon = 1e-12);
            assert_abs_diff_eq!(model.total_sill(), 2.5);
        }
    }

    #[test]
    fn test_decay_with_distance() {
        for kind in StructureKind::ALL {
            let model = CovarianceModel::new(
                vec![CovarianceStructure::isotropic(kind, 1.0, 5.).unwrap()],
                0.,
            )
            .unwrap();
            let origin = array![0., 0., 0.];
            let mut prev = model.covariance(&origin, &origin);
            for i in 1..10 {
                let q = array![i as f64, 0., 0.];
                let c = model.covariance(&origin, &q);
                assert!(c <= prev + 1e-12, "{kind} not decreasing at h={i}");
                prev = c;
            }
            // beyond the range, bounded structures vanish
            let far = array![100., 0., 0.];
            assert_abs_diff_eq!(model.covariance(&origin, &far), 0., epsilon = 1e-6);
        }
    }

    #[test]
    fn test_anisotropy_rotation() {
        // maxrange along azimuth 90 (east = x axis), short across
        let st =
            CovarianceStructure::new(StructureKind::Gaussian, 1.0, [10., 1., 1.], [90., 0., 0.], 1.)
                .unwrap();
        let origin = array![0., 0., 0.];
        let east = array![5., 0., 0.];
        let north = array![0., 5., 0.];
        let c_east = st.covariance(&origin, &east);
        let c_north = st.covariance(&origin, &north);
        assert!(
            c_east > c_north,
            "correlation should persist along the long axis: {c_east} vs {c_north}"
        );
    }

    #[test]
    fn test_azimuth_clockwise_from_north() {
        // azimuth 0 points the long axis north (y), not east
        let st =
            CovarianceStructure::new(StructureKind::Gaussian, 1.0, [10., 1., 1.], [0., 0., 0.], 1.)
                .unwrap();
        let origin = array![0., 0., 0.];
        let east = array![5., 0., 0.];
        let north = array![0., 5., 0.];
        assert!(st.covariance(&origin, &north) > st.covariance(&origin, &east));
    }

    #[test]
    fn test_dip_tilts_long_axis_vertical() {
        let st = CovarianceStructure::new(
            StructureKind::Gaussian,
            1.0,
            [10., 1., 1.],
            [0., 90., 0.],
            1.,
        )
        .unwrap();
        let origin = array![0., 0., 0.];
        let up = array![0., 0., 5.];
        let north = array![0., 5., 0.];
        assert!(st.covariance(&origin, &up) > st.covariance(&origin, &north));
    }

    #[test]
    fn test_isotropic_rotation_invariance() {
        let st = CovarianceStructure::isotropic(StructureKind::Spherical, 1.0, 8.).unwrap();
        let rotated =
            CovarianceStructure::new(StructureKind::Spherical, 1.0, [8., 8., 8.], [37., 12., 55.], 1.)
                .unwrap();
        let p = array![1., -2., 0.5];
        let q = array![-3., 0., 2.];
        assert_abs_diff_eq!(
            st.covariance(&p, &q),
            rotated.covariance(&p, &q),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_param_vector_roundtrip() {
        for kind in StructureKind::ALL {
            let model = CovarianceModel::new(
                vec![
                    CovarianceStructure::new(kind, 1.3, [100., 50., 10.], [30., 10., 5.], 1.5)
                        .unwrap(),
                    CovarianceStructure::isotropic(StructureKind::Cubic, 0.5, 20.).unwrap(),
                ],
                0.05,
            )
            .unwrap();
            let v = model.to_param_vector();
            assert_eq!(v.len(), 2 * STRUCTURE_PARAMS + 1);
            let rebuilt =
                CovarianceModel::from_param_vector(&model.kinds(), &v).expect("rebuilt model");
            let v2 = rebuilt.to_param_vector();
            assert_abs_diff_eq!(v, v2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_param_vector_length_check() {
        let model = gaussian_model(5.);
        let v = model.to_param_vector();
        let bad = v.slice(ndarray::s![..v.len() - 1]).to_owned();
        assert!(CovarianceModel::from_param_vector(&model.kinds(), &bad).is_err());
    }

    #[test]
    fn test_directional_derivative() {
        // For a gaussian covariance the derivative at zero separation is zero
        // and antisymmetric around it
        let model = gaussian_model(5.);
        let p = array![0., 0., 0.];
        let u = array![1., 0., 0.];
        let d0 = model.covariance_dir(&p, &p, &u);
        assert_abs_diff_eq!(d0, 0., epsilon = 1e-8);
        let q = array![2., 0., 0.];
        let d_plus = model.covariance_dir(&p, &q, &u);
        let qm = array![-2., 0., 0.];
        let d_minus = model.covariance_dir(&p, &qm, &u);
        assert_abs_diff_eq!(d_plus, -d_minus, epsilon = 1e-8);
        // moving q away from p along u decreases the covariance
        assert!(d_plus < 0.);
    }

    #[test]
    fn test_second_directional_derivative_is_variance() {
        let model = gaussian_model(5.);
        let p = array![1., 1., 1.];
        let u = array![0., 1., 0.];
        let var = model.covariance_dir_dir(&p, &u, &p, &u);
        assert!(var > 0., "derivative variance should be positive, got {var}");
    }

    #[test]
    fn test_invalid_structures() {
        assert!(CovarianceStructure::isotropic(StructureKind::Spherical, -1.0, 5.).is_err());
        assert!(CovarianceStructure::isotropic(StructureKind::Spherical, 1.0, 0.).is_err());
        assert!(
            CovarianceStructure::new(StructureKind::Gaussian, 1.0, [5., 5., 5.], [0.; 3], -2.)
                .is_err()
        );
        assert!(CovarianceModel::<f64>::new(vec![], 0.1).is_err());
    }
}
