use crate::error::{ModelError, Result};
use crate::model::{weighted_centroids, CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Planar projective transformation, `h22` normalized to 1 where possible.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyModel {
    h: Matrix3<f64>,
    inverse: Option<Matrix3<f64>>,
    cost: f64,
}

impl Default for HomographyModel {
    fn default() -> Self {
        HomographyModel::from_matrix(Matrix3::identity())
    }
}

impl HomographyModel {
    pub fn from_matrix(h: Matrix3<f64>) -> Self {
        let inverse = h.try_inverse();
        HomographyModel { h, inverse, cost: UNDEFINED_COST }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn create_inverse(&self) -> Result<HomographyModel> {
        let inverse = self
            .inverse
            .ok_or_else(|| ModelError::Noninvertible("singular homography".to_string()))?;
        let mut model = HomographyModel::from_matrix(inverse);
        model.cost = self.cost;
        Ok(model)
    }

    pub fn concatenate(&mut self, other: &HomographyModel) {
        *self = HomographyModel { cost: self.cost, ..HomographyModel::from_matrix(other.h * self.h) };
    }

    pub fn pre_concatenate(&mut self, other: &HomographyModel) {
        *self = HomographyModel { cost: self.cost, ..HomographyModel::from_matrix(self.h * other.h) };
    }
}

fn project(h: &Matrix3<f64>, location: [f64; 2]) -> [f64; 2] {
    let v = h * Vector3::new(location[0], location[1], 1.0);
    [v.x / v.z, v.y / v.z]
}

/// Similarity moving the weighted centroid to the origin with mean distance √2.
fn normalization(points: &[[f64; 2]], weights: &[f64], centroid: [f64; 2], weight_sum: f64) -> Matrix3<f64> {
    let mean_distance = points
        .iter()
        .zip(weights)
        .map(|(p, w)| w * ((p[0] - centroid[0]).powi(2) + (p[1] - centroid[1]).powi(2)).sqrt())
        .sum::<f64>()
        / weight_sum;
    let s = if mean_distance > 0.0 { std::f64::consts::SQRT_2 / mean_distance } else { 1.0 };
    Matrix3::new(s, 0.0, -s * centroid[0], 0.0, s, -s * centroid[1], 0.0, 0.0, 1.0)
}

impl CoordinateTransform for HomographyModel {
    /// Points on the line at infinity map to non-finite coordinates.
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        project(&self.h, location)
    }
}

impl InvertibleCoordinateTransform for HomographyModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let inverse = self
            .inverse
            .as_ref()
            .ok_or_else(|| ModelError::Noninvertible("singular homography".to_string()))?;
        let p = project(inverse, location);
        if !(p[0].is_finite() && p[1].is_finite()) {
            return Err(ModelError::Noninvertible(format!("{:?} has no finite preimage", location)));
        }
        Ok(p)
    }
}

impl Model for HomographyModel {
    fn min_num_matches(&self) -> usize {
        4
    }

    /// Normalized direct linear transform. Both point sets are conditioned to
    /// zero mean and mean radius √2, the weighted design matrix is solved for its
    /// null vector by SVD, and the result is de-normalized.
    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        let (pc, qc, ws) = weighted_centroids(matches)?;

        let sources: Vec<[f64; 2]> = matches.iter().map(|m| m.p1.local()).collect();
        let targets: Vec<[f64; 2]> = matches.iter().map(|m| m.p2.world()).collect();
        let weights: Vec<f64> = matches.iter().map(|m| m.weight()).collect();
        let t1 = normalization(&sources, &weights, pc, ws);
        let t2 = normalization(&targets, &weights, qc, ws);

        // pad to at least 9 rows so the SVD exposes the full right null space
        let rows = (2 * matches.len()).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for (i, m) in matches.iter().enumerate() {
            let sw = m.weight().sqrt();
            let [x, y] = project(&t1, m.p1.local());
            let [u, v] = project(&t2, m.p2.world());
            let r = 2 * i;
            let row0 = [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u];
            let row1 = [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v];
            for c in 0..9 {
                a[(r, c)] = sw * row0[c];
                a[(r + 1, c)] = sw * row1[c];
            }
        }

        let svd = a.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| ModelError::IllDefinedDataPoints("SVD did not converge".to_string()))?;
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));
        let smallest = order[0];
        let largest = order[order.len() - 1];
        if svd.singular_values[order[1]] <= 1e-10 * svd.singular_values[largest] {
            return Err(ModelError::IllDefinedDataPoints("degenerate point configuration".to_string()));
        }

        let h = v_t.row(smallest);
        let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
        let t2_inverse = t2
            .try_inverse()
            .ok_or_else(|| ModelError::IllDefinedDataPoints("degenerate target normalization".to_string()))?;
        let mut full = t2_inverse * hn * t1;
        let scale = if full[(2, 2)].abs() > f64::EPSILON { full[(2, 2)] } else { full.norm() };
        full /= scale;

        let inverse = full
            .try_inverse()
            .ok_or_else(|| ModelError::IllDefinedDataPoints("singular homography".to_string()))?;
        self.h = full;
        self.inverse = Some(inverse);
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        self.h
    }

    fn reset(&mut self) {
        *self = HomographyModel::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn truth() -> HomographyModel {
        HomographyModel::from_matrix(Matrix3::new(1.1, 0.05, 3.0, -0.02, 0.95, -4.0, 0.001, -0.0005, 1.0))
    }

    #[test]
    fn four_points_are_reproduced_exactly() {
        let truth = truth();
        let matches: Vec<PointMatch> = [[0.0, 0.0], [100.0, 0.0], [100.0, 80.0], [0.0, 80.0]]
            .iter()
            .map(|p| PointMatch::from_locations(*p, truth.apply(*p), 1.0))
            .collect();
        let mut model = HomographyModel::default();
        model.fit(&matches).unwrap();
        for m in &matches {
            let q = model.apply(m.p1.local());
            assert_abs_diff_eq!(q[0], m.p2.world()[0], epsilon = 1e-6);
            assert_abs_diff_eq!(q[1], m.p2.world()[1], epsilon = 1e-6);
        }
        let query = model.apply([40.0, 30.0]);
        let expected = truth.apply([40.0, 30.0]);
        assert_abs_diff_eq!(query[0], expected[0], epsilon = 1e-6);
        assert_abs_diff_eq!(query[1], expected[1], epsilon = 1e-6);
    }

    #[test]
    fn inverse_round_trip() {
        let model = truth();
        let p = [17.0, 23.0];
        let back = model.apply_inverse(model.apply(p)).unwrap();
        assert_abs_diff_eq!(back[0], p[0], epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], p[1], epsilon = 1e-9);
        let inverse = model.create_inverse().unwrap();
        let again = inverse.apply(model.apply(p));
        assert_abs_diff_eq!(again[0], p[0], epsilon = 1e-9);
        assert_abs_diff_eq!(again[1], p[1], epsilon = 1e-9);
    }

    #[test]
    fn collinear_points_are_ill_defined() {
        let matches: Vec<PointMatch> = (0..5)
            .map(|i| {
                let p = [i as f64 * 10.0, i as f64 * 5.0];
                PointMatch::from_locations(p, [p[0] + 1.0, p[1] + 2.0], 1.0)
            })
            .collect();
        let mut model = HomographyModel::default();
        assert!(matches!(model.fit(&matches), Err(ModelError::IllDefinedDataPoints(_))));
    }

    #[test]
    fn composition_order() {
        let shift = HomographyModel::from_matrix(Matrix3::new(1.0, 0.0, 10.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0));
        let p = [2.0, 3.0];

        let mut then_shift = truth();
        then_shift.concatenate(&shift);
        let q = truth().apply(p);
        let r = then_shift.apply(p);
        assert_abs_diff_eq!(r[0], q[0] + 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[1], q[1], epsilon = 1e-9);

        let mut shift_first = truth();
        shift_first.pre_concatenate(&shift);
        let q = truth().apply([12.0, 3.0]);
        let r = shift_first.apply(p);
        assert_abs_diff_eq!(r[0], q[0], epsilon = 1e-9);
        assert_abs_diff_eq!(r[1], q[1], epsilon = 1e-9);

        // the cached inverse follows the composition
        let back = then_shift.apply_inverse(then_shift.apply(p)).unwrap();
        assert_abs_diff_eq!(back[0], p[0], epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], p[1], epsilon = 1e-9);
    }

    #[test]
    fn too_few_matches() {
        let matches = vec![PointMatch::from_locations([0.0, 0.0], [0.0, 0.0], 1.0); 3];
        let mut model = HomographyModel::default();
        assert!(matches!(
            model.fit(&matches),
            Err(ModelError::NotEnoughDataPoints { required: 4, found: 3 })
        ));
    }
}
