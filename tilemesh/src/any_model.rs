use crate::affine_model::AffineModel;
use crate::error::{ModelError, Result};
use crate::homography_model::HomographyModel;
use crate::model::{CoordinateTransform, InvertibleCoordinateTransform, Model};
use crate::point::PointMatch;
use crate::regularized_model::RegularizedModel;
use crate::rigid_model::RigidModel;
use crate::similarity_model::SimilarityModel;
use crate::translation_model::TranslationModel;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects a model family by name, e.g. in a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Translation,
    Rigid,
    Similarity,
    #[default]
    Affine,
    Homography,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Translation,
        ModelKind::Rigid,
        ModelKind::Similarity,
        ModelKind::Affine,
        ModelKind::Homography,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Translation => "translation",
            ModelKind::Rigid => "rigid",
            ModelKind::Similarity => "similarity",
            ModelKind::Affine => "affine",
            ModelKind::Homography => "homography",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ModelKind::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model '{}', expected one of translation, rigid, similarity, affine, homography", s))
    }
}

/// Closed set of model families behind one type, so tiles and meshes can hold
/// a family chosen at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyModel {
    Translation(TranslationModel),
    Rigid(RigidModel),
    Similarity(SimilarityModel),
    Affine(AffineModel),
    Homography(HomographyModel),
    Regularized(RegularizedModel),
}

impl Default for AnyModel {
    fn default() -> Self {
        AnyModel::from_kind(ModelKind::default())
    }
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            AnyModel::Translation($m) => $body,
            AnyModel::Rigid($m) => $body,
            AnyModel::Similarity($m) => $body,
            AnyModel::Affine($m) => $body,
            AnyModel::Homography($m) => $body,
            AnyModel::Regularized($m) => $body,
        }
    };
}

impl AnyModel {
    /// Identity model of the given family.
    pub fn from_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Translation => AnyModel::Translation(TranslationModel::default()),
            ModelKind::Rigid => AnyModel::Rigid(RigidModel::default()),
            ModelKind::Similarity => AnyModel::Similarity(SimilarityModel::default()),
            ModelKind::Affine => AnyModel::Affine(AffineModel::default()),
            ModelKind::Homography => AnyModel::Homography(HomographyModel::default()),
        }
    }

    /// `kind` regularized by `regularizer` with weight `lambda`.
    ///
    /// # Errors
    /// [`ModelError::UnsupportedModel`] if either family is projective.
    pub fn regularized(kind: ModelKind, regularizer: ModelKind, lambda: f64) -> Result<Self> {
        Ok(AnyModel::Regularized(RegularizedModel::new(
            AnyModel::from_kind(kind),
            AnyModel::from_kind(regularizer),
            lambda,
        )?))
    }

    /// The family, or `None` for a regularized blend.
    pub fn kind(&self) -> Option<ModelKind> {
        match self {
            AnyModel::Translation(_) => Some(ModelKind::Translation),
            AnyModel::Rigid(_) => Some(ModelKind::Rigid),
            AnyModel::Similarity(_) => Some(ModelKind::Similarity),
            AnyModel::Affine(_) => Some(ModelKind::Affine),
            AnyModel::Homography(_) => Some(ModelKind::Homography),
            AnyModel::Regularized(_) => None,
        }
    }

    /// # Errors
    /// [`ModelError::UnsupportedModel`] for homographies.
    pub fn to_affine(&self) -> Result<AffineModel> {
        match self {
            AnyModel::Translation(m) => Ok(m.to_affine()),
            AnyModel::Rigid(m) => Ok(m.to_affine()),
            AnyModel::Similarity(m) => Ok(m.to_affine()),
            AnyModel::Affine(m) => Ok(m.clone()),
            AnyModel::Regularized(m) => Ok(m.to_affine()),
            AnyModel::Homography(_) => Err(ModelError::UnsupportedModel(
                "a homography has no affine representation".to_string(),
            )),
        }
    }

    pub fn create_inverse(&self) -> Result<AnyModel> {
        Ok(match self {
            AnyModel::Translation(m) => AnyModel::Translation(m.create_inverse()),
            AnyModel::Rigid(m) => AnyModel::Rigid(m.create_inverse()),
            AnyModel::Similarity(m) => AnyModel::Similarity(m.create_inverse()?),
            AnyModel::Affine(m) => AnyModel::Affine(m.create_inverse()?),
            AnyModel::Homography(m) => AnyModel::Homography(m.create_inverse()?),
            AnyModel::Regularized(m) => AnyModel::Affine(m.create_inverse()?),
        })
    }
}

impl fmt::Display for AnyModel {
    /// One-line rendering of the homogeneous matrix rows.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.to_matrix();
        let family = self.kind().map_or("regularized", ModelKind::name);
        write!(
            f,
            "{} [[{:.6}, {:.6}, {:.6}], [{:.6}, {:.6}, {:.6}], [{:.6}, {:.6}, {:.6}]]",
            family,
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)]
        )
    }
}

impl CoordinateTransform for AnyModel {
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        dispatch!(self, m => m.apply(location))
    }
}

impl InvertibleCoordinateTransform for AnyModel {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        dispatch!(self, m => m.apply_inverse(location))
    }
}

impl Model for AnyModel {
    fn min_num_matches(&self) -> usize {
        dispatch!(self, m => m.min_num_matches())
    }

    fn fit(&mut self, matches: &[PointMatch]) -> Result<()> {
        dispatch!(self, m => m.fit(matches))
    }

    fn cost(&self) -> f64 {
        dispatch!(self, m => m.cost())
    }

    fn set_cost(&mut self, cost: f64) {
        dispatch!(self, m => m.set_cost(cost))
    }

    fn to_matrix(&self) -> Matrix3<f64> {
        dispatch!(self, m => m.to_matrix())
    }

    fn reset(&mut self) {
        dispatch!(self, m => m.reset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kind_names_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.name().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(AnyModel::from_kind(kind).kind(), Some(kind));
            assert_eq!(AnyModel::from_kind(kind).min_num_matches(), match kind {
                ModelKind::Translation => 1,
                ModelKind::Rigid | ModelKind::Similarity => 2,
                ModelKind::Affine => 3,
                ModelKind::Homography => 4,
            });
        }
        assert!("projective".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::default(), ModelKind::Affine);
    }

    #[test]
    fn every_family_fits_its_minimal_set_exactly() {
        let sources = [[0.0, 0.0], [20.0, 3.0], [4.0, 25.0], [30.0, 30.0]];
        let motion = RigidModel::new(0.25, 3.0, -1.0);
        for kind in ModelKind::ALL {
            let mut model = AnyModel::from_kind(kind);
            let n = model.min_num_matches();
            let matches: Vec<PointMatch> = sources[..n]
                .iter()
                .map(|p| PointMatch::from_locations(*p, motion.apply(*p), 1.0))
                .collect();
            model.fit(&matches).unwrap();
            for m in &matches {
                let q = model.apply(m.p1.local());
                assert_abs_diff_eq!(q[0], m.p2.world()[0], epsilon = 1e-6);
                assert_abs_diff_eq!(q[1], m.p2.world()[1], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ModelKind::Similarity).unwrap();
        assert_eq!(json, "\"similarity\"");
        let kind: ModelKind = serde_json::from_str("\"homography\"").unwrap();
        assert_eq!(kind, ModelKind::Homography);
    }

    #[test]
    fn homography_has_no_affine_form() {
        let model = AnyModel::from_kind(ModelKind::Homography);
        assert!(matches!(model.to_affine(), Err(ModelError::UnsupportedModel(_))));
        assert!(AnyModel::regularized(ModelKind::Homography, ModelKind::Rigid, 0.5).is_err());
        let blended = AnyModel::regularized(ModelKind::Affine, ModelKind::Rigid, 0.5).unwrap();
        assert_eq!(blended.kind(), None);
    }
}
