use crate::error::{ModelError, Result};
use crate::model::{weighted_centroids, CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::Matrix3;

/// Represents a 2D affine transformation: a 2×2 linear part (`m00`, `m01`,
/// `m10`, `m11`) and a translation (`m02`, `m12`).
///
/// A point `(x, y)` is transformed into `(X, Y)` by:
///
/// ```text
///   X = m00 * x + m01 * y + m02;
///   Y = m10 * x + m11 * y + m12;
/// ```
///
/// The inverse is cached and refreshed whenever the forward parameters change.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineModel {
    m00: f64,
    m01: f64,
    m02: f64,
    m10: f64,
    m11: f64,
    m12: f64,
    inverse: Option<[f64; 6]>,
    cost: f64,
}

impl Default for AffineModel {
    fn default() -> Self {
        AffineModel::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }
}

impl AffineModel {
    /// Creates the affine transformation with the given matrix rows.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::affine_model::AffineModel;
    /// # use tilemesh::model::CoordinateTransform;
    /// let t = AffineModel::new(2.0, 0.0, 1.0, 0.0, 3.0, -1.0);
    /// assert_eq!(t.apply([1.0, 1.0]), [3.0, 2.0]);
    /// ```
    pub fn new(m00: f64, m01: f64, m02: f64, m10: f64, m11: f64, m12: f64) -> Self {
        let mut model = AffineModel { m00, m01, m02, m10, m11, m12, inverse: None, cost: UNDEFINED_COST };
        model.invert();
        model
    }

    /// Builds the model from the upper two rows of a homogeneous matrix.
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        AffineModel::new(m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 0)], m[(1, 1)], m[(1, 2)])
    }

    /// Replaces all six parameters, keeping the cost.
    pub fn set(&mut self, m00: f64, m01: f64, m02: f64, m10: f64, m11: f64, m12: f64) {
        self.m00 = m00;
        self.m01 = m01;
        self.m02 = m02;
        self.m10 = m10;
        self.m11 = m11;
        self.m12 = m12;
        self.invert();
    }

    /// `[m00, m01, m02, m10, m11, m12]`.
    pub fn parameters(&self) -> [f64; 6] {
        [self.m00, self.m01, self.m02, self.m10, self.m11, self.m12]
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn is_invertible(&self) -> bool {
        self.inverse.is_some()
    }

    fn invert(&mut self) {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            self.inverse = None;
            return;
        }
        let i00 = self.m11 / det;
        let i01 = -self.m01 / det;
        let i10 = -self.m10 / det;
        let i11 = self.m00 / det;
        let i02 = -i00 * self.m02 - i01 * self.m12;
        let i12 = -i10 * self.m02 - i11 * self.m12;
        self.inverse = Some([i00, i01, i02, i10, i11, i12]);
    }

    /// Returns the inverse transformation.
    ///
    /// # Errors
    /// [`ModelError::Noninvertible`] when the linear part is singular.
    pub fn create_inverse(&self) -> Result<AffineModel> {
        let [i00, i01, i02, i10, i11, i12] = self.inverse.ok_or_else(|| {
            ModelError::Noninvertible(format!("affine determinant {}", self.determinant()))
        })?;
        let mut inverse = AffineModel::new(i00, i01, i02, i10, i11, i12);
        inverse.cost = self.cost;
        Ok(inverse)
    }

    /// Follows `self` by `other`: afterwards `self.apply(p) == other.apply(old_self.apply(p))`.
    pub fn concatenate(&mut self, other: &AffineModel) {
        let a00 = other.m00 * self.m00 + other.m01 * self.m10;
        let a01 = other.m00 * self.m01 + other.m01 * self.m11;
        let a02 = other.m00 * self.m02 + other.m01 * self.m12 + other.m02;
        let a10 = other.m10 * self.m00 + other.m11 * self.m10;
        let a11 = other.m10 * self.m01 + other.m11 * self.m11;
        let a12 = other.m10 * self.m02 + other.m11 * self.m12 + other.m12;
        self.set(a00, a01, a02, a10, a11, a12);
    }

    /// Precedes `self` by `other`: afterwards `self.apply(p) == old_self.apply(other.apply(p))`.
    pub fn pre_concatenate(&mut self, other: &AffineModel) {
        let a00 = self.m00 * other.m00 + self.m01 * other.m10;
        let a01 = self.m00 * other.m01 + self.m01 * other.m11;
        let a02 = self.m00 * other.m02 + self.m01 * other.m12 + self.m02;
        let a10 = self.m10 * other.m00 + self.m11 * other.m10;
        let a11 = self.m10 * other.m01 + self.m11 * other.m11;
        let a12 = self.m10 * other.m02 + self.m11 * other.m12 + self.m12;
        self.set(a00, a01, a02, a10, a11, a12);
    }
}

impl CoordinateTransform for AffineModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        let [x, y] = location;
        [
            self.m00 * x + self.m01 * y + self.m02,
            self.m10 * x + self.m11 * y + self.m12,
        ]
    }
}

impl InvertibleCoordinateTransform for AffineModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let [i00, i01, i02, i10, i11, i12] = self.inverse.ok_or_else(|| {
            ModelError::Noninvertible(format!("affine determinant {}", self.determinant()))
        })?;
        let [x, y] = location;
        Ok([i00 * x + i01 * y + i02, i10 * x + i11 * y + i12])
    }
}

impl Model for AffineModel {
    fn min_num_matches(&self) -> usize {
        3
    }

    /// Solves the weighted 2×2 normal equations of the centered point sets.
    ///
    /// # Errors
    /// [`ModelError::IllDefinedDataPoints`] when the sources are collinear.
    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        let (pc, qc, _) = weighted_centroids(matches)?;

        let (mut a00, mut a01, mut a11) = (0.0, 0.0, 0.0);
        let (mut b00, mut b01, mut b10, mut b11) = (0.0, 0.0, 0.0, 0.0);
        for m in matches {
            let w = m.weight();
            let p = m.p1.local();
            let q = m.p2.world();
            let (px, py) = (p[0] - pc[0], p[1] - pc[1]);
            let (qx, qy) = (q[0] - qc[0], q[1] - qc[1]);
            a00 += w * px * px;
            a01 += w * px * py;
            a11 += w * py * py;
            b00 += w * px * qx;
            b01 += w * px * qy;
            b10 += w * py * qx;
            b11 += w * py * qy;
        }

        let det = a00 * a11 - a01 * a01;
        // relative test: collinear sources leave only rounding noise in det
        if det == 0.0 || det.abs() <= 1e-12 * (a00 * a11).abs() {
            return Err(ModelError::IllDefinedDataPoints("collinear source points".to_string()));
        }

        let m00 = (a11 * b00 - a01 * b10) / det;
        let m01 = (a00 * b10 - a01 * b00) / det;
        let m10 = (a11 * b01 - a01 * b11) / det;
        let m11 = (a00 * b11 - a01 * b01) / det;
        self.set(
            m00,
            m01,
            qc[0] - m00 * pc[0] - m01 * pc[1],
            m10,
            m11,
            qc[1] - m10 * pc[0] - m11 * pc[1],
        );
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.m00, self.m01, self.m02, self.m10, self.m11, self.m12, 0.0, 0.0, 1.0)
    }

    fn reset(&mut self) {
        *self = AffineModel::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_close(a: [f64; 2], b: [f64; 2], epsilon: f64) {
        assert_abs_diff_eq!(a[0], b[0], epsilon = epsilon);
        assert_abs_diff_eq!(a[1], b[1], epsilon = epsilon);
    }

    #[test]
    fn three_points_are_reproduced_exactly() {
        let truth = AffineModel::new(1.2, 0.3, -4.0, -0.2, 0.9, 7.5);
        let matches: Vec<PointMatch> = [[0.0, 0.0], [10.0, 1.0], [3.0, 8.0]]
            .iter()
            .map(|p| PointMatch::from_locations(*p, truth.apply(*p), 1.0))
            .collect();
        let mut model = AffineModel::default();
        model.fit(&matches).unwrap();
        for m in &matches {
            assert_close(model.apply(m.p1.local()), m.p2.world(), 1e-9);
        }
        for (a, b) in model.parameters().iter().zip(truth.parameters().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn single_translated_point_cloud() {
        // translation by (5, 6) of a small square
        let matches: Vec<PointMatch> = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]
            .iter()
            .map(|p| PointMatch::from_locations(*p, [p[0] + 5.0, p[1] + 6.0], 1.0))
            .collect();
        let mut model = AffineModel::default();
        model.fit(&matches).unwrap();
        assert_close(model.apply([5.0, 5.0]), [10.0, 11.0], 1e-9);
    }

    #[test]
    fn stretch_along_y() {
        let matches = vec![
            PointMatch::from_locations([0.0, 0.0], [0.0, 0.0], 1.0),
            PointMatch::from_locations([10.0, 0.0], [10.0, 0.0], 1.0),
            PointMatch::from_locations([0.0, 10.0], [0.0, 12.0], 1.0),
        ];
        let mut model = AffineModel::default();
        model.fit(&matches).unwrap();
        assert_close(model.apply([5.0, 5.0]), [5.0, 6.0], 1e-9);
    }

    #[test]
    fn collinear_sources_are_ill_defined() {
        let matches: Vec<PointMatch> = (0..4)
            .map(|i| {
                let p = [i as f64, 2.0 * i as f64];
                PointMatch::from_locations(p, [p[0] + 1.0, p[1]], 1.0)
            })
            .collect();
        let mut model = AffineModel::default();
        assert!(matches!(model.fit(&matches), Err(ModelError::IllDefinedDataPoints(_))));
    }

    #[test]
    fn concatenation_order() {
        let scale = AffineModel::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0);
        let shift = AffineModel::new(1.0, 0.0, 3.0, 0.0, 1.0, 0.0);

        let mut then_shift = scale.clone();
        then_shift.concatenate(&shift);
        assert_close(then_shift.apply([1.0, 1.0]), [5.0, 2.0], 1e-12);

        let mut shift_first = scale.clone();
        shift_first.pre_concatenate(&shift);
        assert_close(shift_first.apply([1.0, 1.0]), [8.0, 2.0], 1e-12);
    }

    #[test]
    fn inverse_and_singular_matrices() {
        let model = AffineModel::new(1.0, 2.0, 3.0, -1.0, 0.5, 2.0);
        let inverse = model.create_inverse().unwrap();
        let p = [4.0, -3.0];
        assert_close(inverse.apply(model.apply(p)), p, 1e-12);
        assert_close(model.apply_inverse(model.apply(p)).unwrap(), p, 1e-12);

        let singular = AffineModel::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(!singular.is_invertible());
        assert!(matches!(singular.create_inverse(), Err(ModelError::Noninvertible(_))));
        assert!(singular.apply_inverse([0.0, 0.0]).is_err());
    }

    #[test]
    fn matrix_round_trip() {
        let model = AffineModel::new(0.5, 0.1, 9.0, -0.3, 1.5, -2.0);
        assert_eq!(AffineModel::from_matrix(&model.to_matrix()).parameters(), model.parameters());
    }
}
