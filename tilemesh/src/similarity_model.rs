use crate::affine_model::AffineModel;
use crate::error::{ModelError, Result};
use crate::model::{weighted_centroids, CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::Matrix3;

/// Rotation, isotropic scale and translation, stored as `scos = s·cos θ`,
/// `ssin = s·sin θ`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityModel {
    scos: f64,
    ssin: f64,
    tx: f64,
    ty: f64,
    cost: f64,
}

impl Default for SimilarityModel {
    fn default() -> Self {
        SimilarityModel::new(1.0, 0.0, 0.0, 0.0)
    }
}

impl SimilarityModel {
    pub fn new(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        SimilarityModel {
            scos: scale * angle.cos(),
            ssin: scale * angle.sin(),
            tx,
            ty,
            cost: UNDEFINED_COST,
        }
    }

    pub fn scale(&self) -> f64 {
        (self.scos * self.scos + self.ssin * self.ssin).sqrt()
    }

    pub fn angle(&self) -> f64 {
        self.ssin.atan2(self.scos)
    }

    pub fn translation(&self) -> [f64; 2] {
        [self.tx, self.ty]
    }

    pub fn create_inverse(&self) -> Result<SimilarityModel> {
        let det = self.scos * self.scos + self.ssin * self.ssin;
        if det == 0.0 {
            return Err(ModelError::Noninvertible("similarity with zero scale".to_string()));
        }
        let ics = self.scos / det;
        let iss = -self.ssin / det;
        Ok(SimilarityModel {
            scos: ics,
            ssin: iss,
            tx: -ics * self.tx + iss * self.ty,
            ty: -iss * self.tx - ics * self.ty,
            cost: self.cost,
        })
    }

    pub fn to_affine(&self) -> AffineModel {
        AffineModel::new(self.scos, -self.ssin, self.tx, self.ssin, self.scos, self.ty)
    }
}

impl CoordinateTransform for SimilarityModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        let [x, y] = location;
        [self.scos * x - self.ssin * y + self.tx, self.ssin * x + self.scos * y + self.ty]
    }
}

impl InvertibleCoordinateTransform for SimilarityModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let det = self.scos * self.scos + self.ssin * self.ssin;
        if det == 0.0 {
            return Err(ModelError::Noninvertible("similarity with zero scale".to_string()));
        }
        let x = location[0] - self.tx;
        let y = location[1] - self.ty;
        Ok([(self.scos * x + self.ssin * y) / det, (-self.ssin * x + self.scos * y) / det])
    }
}

impl Model for SimilarityModel {
    fn min_num_matches(&self) -> usize {
        2
    }

    /// Treats centered points as complex numbers `p`, `q` and solves
    /// `q = (scos + i·ssin) · p` in the weighted least-squares sense.
    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        let (pc, qc, _) = weighted_centroids(matches)?;

        let mut a = 0.0;
        let mut b = 0.0;
        let mut s = 0.0;
        for m in matches {
            let w = m.weight();
            let p = m.p1.local();
            let q = m.p2.world();
            let (x1, y1) = (p[0] - pc[0], p[1] - pc[1]);
            let (x2, y2) = (q[0] - qc[0], q[1] - qc[1]);
            a += w * (x1 * x2 + y1 * y2);
            b += w * (x1 * y2 - y1 * x2);
            s += w * (x1 * x1 + y1 * y1);
        }
        if s == 0.0 {
            return Err(ModelError::IllDefinedDataPoints("all source points coincide".to_string()));
        }
        self.scos = a / s;
        self.ssin = b / s;
        self.tx = qc[0] - self.scos * pc[0] + self.ssin * pc[1];
        self.ty = qc[1] - self.ssin * pc[0] - self.scos * pc[1];
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.scos, -self.ssin, self.tx, self.ssin, self.scos, self.ty, 0.0, 0.0, 1.0)
    }

    fn reset(&mut self) {
        *self = SimilarityModel::default();
    }
}
