use crate::error::Result;
use crate::model::{CoordinateTransform, Model};
use crate::point::{distance, PointMatch};
use crate::tile::{TileGraph, TileId};
use crate::tile_configuration::{Convergence, OptimizeParams, TileConfiguration};
use crate::transform_mesh::TransformMesh;
use log::debug;

/// `1 / (1 + d²)^alpha`.
///
/// # Examples
/// ```
/// # use tilemesh::moving_least_squares::weight_by_distance;
/// assert_eq!(weight_by_distance(0.0, 2.0), 1.0);
/// assert_eq!(weight_by_distance(1.0, 1.0), 0.5);
/// ```
pub fn weight_by_distance(d: f64, alpha: f64) -> f64 {
    1.0 / (1.0 + d * d).powf(alpha)
}

fn weighted_copy(m: &PointMatch, w: f64) -> PointMatch {
    let mut copy = m.clone();
    copy.set_weights(vec![m.weight() * w]);
    copy
}

/// Smooth deformation that fits a fresh model at every query location, with
/// landmarks weighted by their distance to it.
#[derive(Debug, Clone)]
pub struct MovingLeastSquaresTransform<M> {
    model: M,
    alpha: f64,
    matches: Vec<PointMatch>,
}

impl<M: Model> MovingLeastSquaresTransform<M> {
    pub fn new(model: M, alpha: f64) -> Self {
        MovingLeastSquaresTransform { model, alpha, matches: Vec::new() }
    }

    pub fn set_matches(&mut self, matches: Vec<PointMatch>) {
        self.matches = matches;
    }

    pub fn matches(&self) -> &[PointMatch] {
        &self.matches
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    /// # Errors
    /// Whatever the local fit reports, e.g. too few landmarks.
    pub fn try_apply(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let weighted: Vec<PointMatch> = self
            .matches
            .iter()
            .map(|m| weighted_copy(m, weight_by_distance(distance(m.p1.local(), location), self.alpha)))
            .collect();
        let mut model = self.model.clone();
        model.fit(&weighted)?;
        Ok(model.apply(location))
    }
}

impl<M: Model> CoordinateTransform for MovingLeastSquaresTransform<M> {
    /// NaN where the local fit fails.
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        self.try_apply(location).unwrap_or([f64::NAN; 2])
    }
}

/// Moving least squares evaluated at the vertices of a [`TransformMesh`] and
/// interpolated piecewise-affinely in between.
#[derive(Debug, Clone)]
pub struct MovingLeastSquaresMesh<M> {
    mesh: TransformMesh,
    models: Vec<M>,
    vertex_matches: Vec<Vec<PointMatch>>,
}

impl<M: Model> MovingLeastSquaresMesh<M> {
    pub fn new(model: M, num_x: usize, num_y: usize, width: f64, height: f64) -> Self {
        let mesh = TransformMesh::new(num_x, num_y, width, height);
        let n = mesh.num_vertices();
        MovingLeastSquaresMesh { mesh, models: vec![model; n], vertex_matches: vec![Vec::new(); n] }
    }

    /// Adds `m` to every vertex, weighted by its distance to the vertex source.
    pub fn add_match_weighted_by_distance(&mut self, m: &PointMatch, alpha: f64) {
        for (v, matches) in self.vertex_matches.iter_mut().enumerate() {
            let d = distance(self.mesh.source(v), m.p1.local());
            matches.push(weighted_copy(m, weight_by_distance(d, alpha)));
        }
    }

    /// Fits every vertex model, moves each vertex target to its model image and
    /// refits the triangles.
    pub fn update_models(&mut self) -> Result<()> {
        for v in 0..self.models.len() {
            self.models[v].fit(&self.vertex_matches[v])?;
            let target = self.models[v].apply(self.mesh.source(v));
            self.mesh.set_target(v, target);
        }
        self.mesh.update_affines()
    }

    pub fn model(&self, vertex: usize) -> &M {
        &self.models[vertex]
    }

    pub fn mesh(&self) -> &TransformMesh {
        &self.mesh
    }

    pub fn into_mesh(self) -> TransformMesh {
        self.mesh
    }
}

/// Moving least squares mesh whose vertex models are also tied to their mesh
/// neighbours, and relaxed jointly as a tile configuration.
///
/// Every mesh edge `(v, w)` connects the two vertex tiles by matches at both
/// vertex locations, so neighbouring models are pulled towards agreement with
/// weight `coupling`.
#[derive(Debug, Clone)]
pub struct ElasticMovingLeastSquaresMesh<M> {
    mesh: TransformMesh,
    configuration: TileConfiguration<M>,
    tiles: Vec<TileId>,
}

impl<M: Model> ElasticMovingLeastSquaresMesh<M> {
    pub fn new(model: M, num_x: usize, num_y: usize, width: f64, height: f64, coupling: f64) -> Self {
        let mesh = TransformMesh::new(num_x, num_y, width, height);
        let mut graph = TileGraph::new();
        let tiles: Vec<TileId> = (0..mesh.num_vertices()).map(|_| graph.add_tile(model.clone())).collect();
        for (v, w) in mesh.edges() {
            let (sv, sw) = (mesh.source(v), mesh.source(w));
            graph.connect(
                tiles[v],
                tiles[w],
                &[PointMatch::from_locations(sv, sv, coupling), PointMatch::from_locations(sw, sw, coupling)],
            );
        }
        ElasticMovingLeastSquaresMesh { mesh, configuration: TileConfiguration::new(graph), tiles }
    }

    /// Adds `m` as a fixed-target landmark of every vertex tile, weighted by its
    /// distance to the vertex source.
    pub fn add_match_weighted_by_distance(&mut self, m: &PointMatch, alpha: f64) {
        for (v, &tile) in self.tiles.iter().enumerate() {
            let d = distance(self.mesh.source(v), m.p1.local());
            let weighted = weighted_copy(m, weight_by_distance(d, alpha));
            self.configuration.graph_mut().add_matches(tile, &[weighted]);
        }
    }

    /// Relaxes the vertex tiles, then moves each vertex target to its model image.
    ///
    /// The error tracked for convergence is the mean residual over all vertex
    /// tiles, landmarks and couplings together.
    pub fn optimize(&mut self, params: &OptimizeParams) -> Result<Convergence> {
        let convergence = self.configuration.optimize(params)?;
        for (v, &tile) in self.tiles.iter().enumerate() {
            let target = self.configuration.graph().tile(tile).model().apply(self.mesh.source(v));
            self.mesh.set_target(v, target);
        }
        self.mesh.update_affines()?;
        debug!("elastic mesh error {:.4} after {} iterations", convergence.error, convergence.iterations);
        Ok(convergence)
    }

    pub fn model(&self, vertex: usize) -> &M {
        self.configuration.graph().tile(self.tiles[vertex]).model()
    }

    pub fn mesh(&self) -> &TransformMesh {
        &self.mesh
    }

    pub fn into_mesh(self) -> TransformMesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine_model::AffineModel;
    use crate::translation_model::TranslationModel;
    use approx::assert_abs_diff_eq;

    fn landmarks(transform: &impl CoordinateTransform) -> Vec<PointMatch> {
        [[0.0, 0.0], [20.0, 0.0], [0.0, 20.0], [20.0, 20.0], [10.0, 10.0]]
            .iter()
            .map(|p| PointMatch::from_locations(*p, transform.apply(*p), 1.0))
            .collect()
    }

    #[test]
    fn affine_landmarks_give_the_affine_everywhere() {
        let truth = AffineModel::new(1.1, 0.2, 3.0, -0.1, 0.9, -2.0);
        let mut mls = MovingLeastSquaresTransform::new(AffineModel::default(), 1.0);
        mls.set_matches(landmarks(&truth));
        for p in [[5.0, 5.0], [17.0, 2.0], [40.0, -3.0]] {
            let q = mls.apply(p);
            let e = truth.apply(p);
            assert_abs_diff_eq!(q[0], e[0], epsilon = 1e-6);
            assert_abs_diff_eq!(q[1], e[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn landmarks_dominate_nearby() {
        let mut mls = MovingLeastSquaresTransform::new(TranslationModel::default(), 2.0);
        mls.set_matches(vec![
            PointMatch::from_locations([0.0, 0.0], [5.0, 0.0], 1.0),
            PointMatch::from_locations([100.0, 0.0], [100.0, 5.0], 1.0),
        ]);
        let q = mls.apply([0.0, 0.0]);
        assert_abs_diff_eq!(q[0], 5.0, epsilon = 1e-3);
        assert_abs_diff_eq!(q[1], 0.0, epsilon = 1e-3);
        let q = mls.apply([100.0, 0.0]);
        assert_abs_diff_eq!(q[0], 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(q[1], 5.0, epsilon = 1e-3);
    }

    #[test]
    fn no_landmarks_maps_to_nan() {
        let mls = MovingLeastSquaresTransform::new(TranslationModel::default(), 1.0);
        assert!(mls.try_apply([1.0, 1.0]).is_err());
        assert!(mls.apply([1.0, 1.0])[0].is_nan());
    }

    #[test]
    fn mesh_follows_a_global_translation() {
        let truth = TranslationModel::new(3.0, 4.0);
        let mut mls = MovingLeastSquaresMesh::new(TranslationModel::default(), 3, 3, 20.0, 20.0);
        for m in landmarks(&truth) {
            mls.add_match_weighted_by_distance(&m, 1.0);
        }
        mls.update_models().unwrap();
        let q = mls.mesh().try_apply([7.0, 13.0]).unwrap();
        assert_abs_diff_eq!(q[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(q[1], 17.0, epsilon = 1e-9);
    }

    #[test]
    fn elastic_mesh_converges_to_consistent_landmarks() {
        let truth = TranslationModel::new(3.0, 4.0);
        let mut elastic = ElasticMovingLeastSquaresMesh::new(TranslationModel::default(), 3, 3, 20.0, 20.0, 0.05);
        for m in landmarks(&truth) {
            elastic.add_match_weighted_by_distance(&m, 1.0);
        }
        let params = OptimizeParams { max_allowed_error: 1.0, max_iterations: 2000, max_plateau_width: 20 };
        let convergence = elastic.optimize(&params).unwrap();
        assert!(convergence.converged);
        let q = elastic.mesh().try_apply([7.0, 13.0]).unwrap();
        assert_abs_diff_eq!(q[0], 10.0, epsilon = 0.05);
        assert_abs_diff_eq!(q[1], 17.0, epsilon = 0.05);
    }
}
