use crate::affine_model::AffineModel;
use crate::error::{ModelError, Result};
use crate::model::{weighted_centroids, CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::Matrix3;

/// Pure 2D translation: `(x, y) -> (x + tx, y + ty)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationModel {
    tx: f64,
    ty: f64,
    cost: f64,
}

impl Default for TranslationModel {
    fn default() -> Self {
        TranslationModel::new(0.0, 0.0)
    }
}

impl TranslationModel {
    /// # Examples
    /// ```
    /// # use tilemesh::model::CoordinateTransform;
    /// # use tilemesh::translation_model::TranslationModel;
    /// let t = TranslationModel::new(5.0, -1.0);
    /// assert_eq!(t.apply([1.0, 1.0]), [6.0, 0.0]);
    /// ```
    pub fn new(tx: f64, ty: f64) -> Self {
        TranslationModel { tx, ty, cost: UNDEFINED_COST }
    }

    pub fn translation(&self) -> [f64; 2] {
        [self.tx, self.ty]
    }

    pub fn create_inverse(&self) -> TranslationModel {
        TranslationModel { tx: -self.tx, ty: -self.ty, cost: self.cost }
    }

    pub fn to_affine(&self) -> AffineModel {
        AffineModel::new(1.0, 0.0, self.tx, 0.0, 1.0, self.ty)
    }
}

impl CoordinateTransform for TranslationModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        [location[0] + self.tx, location[1] + self.ty]
    }
}

impl InvertibleCoordinateTransform for TranslationModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        Ok([location[0] - self.tx, location[1] - self.ty])
    }
}

impl Model for TranslationModel {
    fn min_num_matches(&self) -> usize {
        1
    }

    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        let (pc, qc, _) = weighted_centroids(matches)?;
        self.tx = qc[0] - pc[0];
        self.ty = qc[1] - pc[1];
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(1.0, 0.0, self.tx, 0.0, 1.0, self.ty, 0.0, 0.0, 1.0)
    }

    fn reset(&mut self) {
        *self = TranslationModel::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weighted_mean_displacement() {
        let matches = vec![
            PointMatch::from_locations([0.0, 0.0], [1.0, 0.0], 3.0),
            PointMatch::from_locations([5.0, 5.0], [10.0, 5.0], 1.0),
        ];
        let mut t = TranslationModel::default();
        t.fit(&matches).unwrap();
        assert_abs_diff_eq!(t.translation()[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.translation()[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_fit_is_an_error() {
        let mut t = TranslationModel::default();
        assert!(matches!(
            t.fit(&[]),
            Err(ModelError::NotEnoughDataPoints { required: 1, found: 0 })
        ));
    }

    #[test]
    fn zero_weights_are_ill_defined() {
        let mut t = TranslationModel::default();
        let matches = vec![PointMatch::from_locations([0.0, 0.0], [1.0, 0.0], 0.0)];
        assert!(matches!(t.fit(&matches), Err(ModelError::IllDefinedDataPoints(_))));
    }
}
