use crate::affine_model::AffineModel;
use crate::any_model::AnyModel;
use crate::error::{ModelError, Result};
use crate::model::{CoordinateTransform, InvertibleCoordinateTransform, Model, UNDEFINED_COST};
use crate::point::PointMatch;
use nalgebra::Matrix3;

/// Blends a free model with a stiffer regularizer fitted to the same matches.
///
/// The effective transform is the affine `(1 - lambda) * A(model) + lambda * A(regularizer)`,
/// so `lambda = 0` is the free model and `lambda = 1` the regularizer. Only
/// affine-family models can be blended.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularizedModel {
    model: Box<AnyModel>,
    regularizer: Box<AnyModel>,
    lambda: f64,
    blended: AffineModel,
    cost: f64,
}

impl RegularizedModel {
    /// # Errors
    /// [`ModelError::UnsupportedModel`] if either part is a homography.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::any_model::{AnyModel, ModelKind};
    /// # use tilemesh::regularized_model::RegularizedModel;
    /// let ok = RegularizedModel::new(
    ///     AnyModel::from_kind(ModelKind::Affine),
    ///     AnyModel::from_kind(ModelKind::Rigid),
    ///     0.1,
    /// );
    /// assert!(ok.is_ok());
    /// let projective = RegularizedModel::new(
    ///     AnyModel::from_kind(ModelKind::Homography),
    ///     AnyModel::from_kind(ModelKind::Rigid),
    ///     0.1,
    /// );
    /// assert!(projective.is_err());
    /// ```
    pub fn new(model: AnyModel, regularizer: AnyModel, lambda: f64) -> Result<Self> {
        let a = model.to_affine()?;
        let b = regularizer.to_affine()?;
        Ok(RegularizedModel {
            model: Box::new(model),
            regularizer: Box::new(regularizer),
            lambda,
            blended: blend(&a, &b, lambda),
            cost: UNDEFINED_COST,
        })
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn model(&self) -> &AnyModel {
        &self.model
    }

    pub fn regularizer(&self) -> &AnyModel {
        &self.regularizer
    }

    /// The blended transform.
    pub fn to_affine(&self) -> AffineModel {
        let mut affine = self.blended.clone();
        affine.set_cost(self.cost);
        affine
    }

    pub fn create_inverse(&self) -> Result<AffineModel> {
        self.blended.create_inverse()
    }

    fn refresh(&mut self) -> Result<()> {
        self.blended = blend(&self.model.to_affine()?, &self.regularizer.to_affine()?, self.lambda);
        Ok(())
    }
}

fn blend(a: &AffineModel, b: &AffineModel, lambda: f64) -> AffineModel {
    let pa = a.parameters();
    let pb = b.parameters();
    let mut p = [0.0; 6];
    for i in 0..6 {
        p[i] = (1.0 - lambda) * pa[i] + lambda * pb[i];
    }
    AffineModel::new(p[0], p[1], p[2], p[3], p[4], p[5])
}

impl CoordinateTransform for RegularizedModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        self.blended.apply(location)
    }
}

impl InvertibleCoordinateTransform for RegularizedModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        self.blended.apply_inverse(location)
    }
}

impl Model for RegularizedModel {
    fn min_num_matches(&self) -> usize {
        self.model.min_num_matches().max(self.regularizer.min_num_matches())
    }

    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        ModelError::check_count(self.min_num_matches(), matches.len())?;
        self.model.fit(matches)?;
        self.regularizer.fit(matches)?;
        self.refresh()
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        self.blended.to_matrix()
    }

    fn reset(&mut self) {
        self.model.reset();
        self.regularizer.reset();
        self.blended = AffineModel::default();
        self.cost = UNDEFINED_COST;
    }
}
