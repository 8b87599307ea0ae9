use crate::affine_model::AffineModel;
use crate::error::{ModelError, Result};
use crate::model::{weighted_centroids, CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::Matrix3;

/// Rotation followed by translation.
///
/// ```text
///   x' = cos * x - sin * y + tx
///   y' = sin * x + cos * y + ty
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RigidModel {
    cos: f64,
    sin: f64,
    tx: f64,
    ty: f64,
    cost: f64,
}

impl Default for RigidModel {
    fn default() -> Self {
        RigidModel::new(0.0, 0.0, 0.0)
    }
}

impl RigidModel {
    /// # Parameters
    /// - `angle`: counter-clockwise rotation in radians (for a y-up frame).
    /// - `tx`, `ty`: translation applied after the rotation.
    pub fn new(angle: f64, tx: f64, ty: f64) -> Self {
        RigidModel { cos: angle.cos(), sin: angle.sin(), tx, ty, cost: UNDEFINED_COST }
    }

    pub fn angle(&self) -> f64 {
        self.sin.atan2(self.cos)
    }

    pub fn translation(&self) -> [f64; 2] {
        [self.tx, self.ty]
    }

    pub fn create_inverse(&self) -> RigidModel {
        RigidModel {
            cos: self.cos,
            sin: -self.sin,
            tx: -self.cos * self.tx - self.sin * self.ty,
            ty: self.sin * self.tx - self.cos * self.ty,
            cost: self.cost,
        }
    }

    pub fn to_affine(&self) -> AffineModel {
        AffineModel::new(self.cos, -self.sin, self.tx, self.sin, self.cos, self.ty)
    }
}

impl CoordinateTransform for RigidModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        let [x, y] = location;
        [self.cos * x - self.sin * y + self.tx, self.sin * x + self.cos * y + self.ty]
    }
}

impl InvertibleCoordinateTransform for RigidModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let x = location[0] - self.tx;
        let y = location[1] - self.ty;
        Ok([self.cos * x + self.sin * y, -self.sin * x + self.cos * y])
    }
}

impl Model for RigidModel {
    fn min_num_matches(&self) -> usize {
        2
    }

    /// Closed form: the rotation angle is `atan2` of the weighted cross and dot
    /// sums of the centered point sets.
    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        let (pc, qc, _) = weighted_centroids(matches)?;

        let mut sind = 0.0;
        let mut cosd = 0.0;
        for m in matches {
            let w = m.weight();
            let p = m.p1.local();
            let q = m.p2.world();
            let (x1, y1) = (p[0] - pc[0], p[1] - pc[1]);
            let (x2, y2) = (q[0] - qc[0], q[1] - qc[1]);
            sind += w * (x1 * y2 - y1 * x2);
            cosd += w * (x1 * x2 + y1 * y2);
        }
        let norm = (cosd * cosd + sind * sind).sqrt();
        if norm == 0.0 {
            return Err(ModelError::IllDefinedDataPoints("rotation undetermined by coincident points".to_string()));
        }
        self.cos = cosd / norm;
        self.sin = sind / norm;
        self.tx = qc[0] - self.cos * pc[0] + self.sin * pc[1];
        self.ty = qc[1] - self.sin * pc[0] - self.cos * pc[1];
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.cos, -self.sin, self.tx, self.sin, self.cos, self.ty, 0.0, 0.0, 1.0)
    }

    fn reset(&mut self) {
        *self = RigidModel::default();
    }
}
