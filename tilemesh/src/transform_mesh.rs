use crate::affine_model::AffineModel;
use crate::error::{ModelError, Result};
use crate::model::{CoordinateTransform, InvertibleCoordinateTransform, Model};
use crate::point::PointMatch;
use kd_tree::{KdPoint, KdTree};
use std::collections::BTreeSet;

/// Relative slack of the point-in-triangle test, so that points on a shared
/// edge are not lost to rounding.
const CONTAINMENT_SLACK: f64 = 1e-9;

/// One triangle of a [`TransformMesh`] and the affine map it currently carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub vertices: [usize; 3],
    pub model: AffineModel,
}

/// A vertex location tagged with its index, for nearest-vertex lookup.
#[derive(Debug, Clone, Copy)]
struct IndexedLocation {
    location: [f64; 2],
    index: usize,
}

impl KdPoint for IndexedLocation {
    type Scalar = f64;
    type Dim = typenum::U2;
    fn at(&self, k: usize) -> f64 {
        self.location[k]
    }
}

/// Piecewise-affine deformation over a triangulated regular grid.
///
/// The grid has `num_x × num_y` corner vertices spanning `[0, width] × [0, height]`
/// plus a centre vertex per cell; every cell is split into four triangles around
/// its centre. Each vertex is a [`PointMatch`] whose `p1.local` is the source
/// location and whose `p2.world` is the target location.
///
/// # Examples
/// ```
/// # use tilemesh::transform_mesh::TransformMesh;
/// # use tilemesh::model::InvertibleCoordinateTransform;
/// let mut mesh = TransformMesh::new(3, 3, 100.0, 100.0);
/// let centre = mesh.closest_source_vertex([25.0, 25.0]).unwrap();
/// mesh.set_target(centre, [27.0, 25.0]);
/// mesh.update_affine(centre).unwrap();
///
/// let q = mesh.try_apply([25.0, 25.0]).unwrap();
/// assert!((q[0] - 27.0).abs() < 1e-9);
/// let p = mesh.apply_inverse(q).unwrap();
/// assert!((p[0] - 25.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct TransformMesh {
    width: f64,
    height: f64,
    vertices: Vec<PointMatch>,
    triangles: Vec<Triangle>,
    vertex_triangles: Vec<Vec<usize>>,
}

impl TransformMesh {
    /// Builds an identity mesh. `num_x` and `num_y` are clamped to at least 2.
    pub fn new(num_x: usize, num_y: usize, width: f64, height: f64) -> Self {
        let num_x = num_x.max(2);
        let num_y = num_y.max(2);
        let dx = width / (num_x - 1) as f64;
        let dy = height / (num_y - 1) as f64;

        let mut vertices = Vec::with_capacity(num_x * num_y + (num_x - 1) * (num_y - 1));
        for j in 0..num_y {
            for i in 0..num_x {
                let p = [i as f64 * dx, j as f64 * dy];
                vertices.push(PointMatch::from_locations(p, p, 1.0));
            }
        }
        let centres = vertices.len();
        for j in 0..num_y - 1 {
            for i in 0..num_x - 1 {
                let p = [(i as f64 + 0.5) * dx, (j as f64 + 0.5) * dy];
                vertices.push(PointMatch::from_locations(p, p, 1.0));
            }
        }

        let mut triangles = Vec::with_capacity(4 * (num_x - 1) * (num_y - 1));
        for j in 0..num_y - 1 {
            for i in 0..num_x - 1 {
                let a = j * num_x + i;
                let b = a + 1;
                let c = b + num_x;
                let d = a + num_x;
                let e = centres + j * (num_x - 1) + i;
                for vertices in [[a, b, e], [b, c, e], [c, d, e], [d, a, e]] {
                    triangles.push(Triangle { vertices, model: AffineModel::default() });
                }
            }
        }

        TransformMesh::from_parts(width, height, vertices, triangles)
    }

    fn from_parts(width: f64, height: f64, vertices: Vec<PointMatch>, triangles: Vec<Triangle>) -> Self {
        let mut vertex_triangles = vec![Vec::new(); vertices.len()];
        for (t, triangle) in triangles.iter().enumerate() {
            for &v in &triangle.vertices {
                vertex_triangles[v].push(t);
            }
        }
        TransformMesh { width, height, vertices, triangles, vertex_triangles }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex correspondences, indexed by vertex.
    pub fn vertices(&self) -> &[PointMatch] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Indices of the triangles incident to `vertex`.
    pub fn vertex_triangles(&self, vertex: usize) -> &[usize] {
        &self.vertex_triangles[vertex]
    }

    pub fn source(&self, vertex: usize) -> [f64; 2] {
        self.vertices[vertex].p1.local()
    }

    pub fn target(&self, vertex: usize) -> [f64; 2] {
        self.vertices[vertex].p2.world()
    }

    /// Moves a vertex target. The incident triangles keep their old affines
    /// until [`TransformMesh::update_affine`] or [`TransformMesh::update_affines`].
    pub fn set_target(&mut self, vertex: usize, target: [f64; 2]) {
        let m = &mut self.vertices[vertex];
        m.p2.set_world(target);
        m.update_distance();
    }

    /// Unique undirected edges `(low, high)` of the triangulation.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = BTreeSet::new();
        for triangle in &self.triangles {
            let [a, b, c] = triangle.vertices;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edges.insert((u.min(v), u.max(v)));
            }
        }
        edges.into_iter().collect()
    }

    /// `(min, max)` corners of the target vertex locations.
    pub fn bounding_box_of_targets(&self) -> ([f64; 2], [f64; 2]) {
        let mut min = [f64::MAX; 2];
        let mut max = [f64::MIN; 2];
        for m in &self.vertices {
            let q = m.p2.world();
            for k in 0..2 {
                min[k] = min[k].min(q[k]);
                max[k] = max[k].max(q[k]);
            }
        }
        (min, max)
    }

    /// Sets every target to `transform(source)` and refits all triangles.
    pub fn init<T: CoordinateTransform + ?Sized>(&mut self, transform: &T) -> Result<()> {
        for m in &mut self.vertices {
            let q = transform.apply(m.p1.local());
            m.p2.set_world(q);
            m.update_distance();
        }
        self.update_affines()
    }

    fn fit_triangle(&mut self, t: usize) -> Result<()> {
        let [a, b, c] = self.triangles[t].vertices;
        let matches = [self.vertices[a].clone(), self.vertices[b].clone(), self.vertices[c].clone()];
        self.triangles[t].model.fit(&matches)
    }

    /// Refits only the triangles touching `vertex`.
    pub fn update_affine(&mut self, vertex: usize) -> Result<()> {
        for i in 0..self.vertex_triangles[vertex].len() {
            let t = self.vertex_triangles[vertex][i];
            self.fit_triangle(t)?;
        }
        Ok(())
    }

    pub fn update_affines(&mut self) -> Result<()> {
        for t in 0..self.triangles.len() {
            self.fit_triangle(t)?;
        }
        Ok(())
    }

    /// Index of the first triangle whose source corners contain `p`.
    pub fn source_triangle_containing(&self, p: [f64; 2]) -> Option<usize> {
        self.triangles.iter().position(|t| {
            let [a, b, c] = t.vertices;
            contains([self.source(a), self.source(b), self.source(c)], p)
        })
    }

    /// Index of the first triangle whose target corners contain `p`.
    pub fn target_triangle_containing(&self, p: [f64; 2]) -> Option<usize> {
        self.triangles.iter().position(|t| {
            let [a, b, c] = t.vertices;
            contains([self.target(a), self.target(b), self.target(c)], p)
        })
    }

    /// Forward map through the triangle containing `p` in source space.
    ///
    /// # Errors
    /// [`ModelError::Noninvertible`] if no triangle contains `p`.
    pub fn try_apply(&self, p: [f64; 2]) -> Result<[f64; 2]> {
        let t = self
            .source_triangle_containing(p)
            .ok_or_else(|| ModelError::Noninvertible(format!("{:?} lies outside the mesh", p)))?;
        Ok(self.triangles[t].model.apply(p))
    }

    pub fn try_apply_in_place(&self, p: &mut [f64; 2]) -> Result<()> {
        *p = self.try_apply(*p)?;
        Ok(())
    }

    /// Mesh with sources and targets swapped; maps this mesh's targets back to
    /// its sources.
    pub fn create_inverse(&self) -> Result<TransformMesh> {
        let vertices = self
            .vertices
            .iter()
            .map(|m| PointMatch::from_locations(m.p2.world(), m.p1.local(), m.weight()))
            .collect();
        let triangles = self
            .triangles
            .iter()
            .map(|t| Triangle { vertices: t.vertices, model: AffineModel::default() })
            .collect();
        let mut inverse = TransformMesh::from_parts(self.width, self.height, vertices, triangles);
        inverse.update_affines()?;
        Ok(inverse)
    }

    fn index(locations: impl Iterator<Item = [f64; 2]>) -> KdTree<IndexedLocation> {
        let points: Vec<IndexedLocation> = locations
            .enumerate()
            .map(|(index, location)| IndexedLocation { location, index })
            .collect();
        KdTree::build_by_ordered_float(points)
    }

    fn nearest(tree: &KdTree<IndexedLocation>, p: [f64; 2]) -> Option<usize> {
        tree.nearest(&IndexedLocation { location: p, index: usize::MAX })
            .map(|found| found.item.index)
    }

    /// Vertex whose source location is nearest to `p`.
    pub fn closest_source_vertex(&self, p: [f64; 2]) -> Option<usize> {
        TransformMesh::nearest(&TransformMesh::index(self.vertices.iter().map(|m| m.p1.local())), p)
    }

    /// Nearest source vertex of every location in `points`, from a single tree.
    pub fn closest_source_vertices(&self, points: &[[f64; 2]]) -> Vec<Option<usize>> {
        let tree = TransformMesh::index(self.vertices.iter().map(|m| m.p1.local()));
        points.iter().map(|&p| TransformMesh::nearest(&tree, p)).collect()
    }

    /// Vertex whose target location is nearest to `p`.
    pub fn closest_target_vertex(&self, p: [f64; 2]) -> Option<usize> {
        TransformMesh::nearest(&TransformMesh::index(self.vertices.iter().map(|m| m.p2.world())), p)
    }
}

/// Twice the signed area of `(a, b, c)`.
pub(crate) fn signed_area2(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Point-in-triangle for either winding. Degenerate triangles contain nothing.
pub(crate) fn contains(corners: [[f64; 2]; 3], p: [f64; 2]) -> bool {
    let [a, b, c] = corners;
    let min_x = a[0].min(b[0]).min(c[0]);
    let max_x = a[0].max(b[0]).max(c[0]);
    let min_y = a[1].min(b[1]).min(c[1]);
    let max_y = a[1].max(b[1]).max(c[1]);
    let margin = CONTAINMENT_SLACK * ((max_x - min_x) + (max_y - min_y));
    if p[0] < min_x - margin || p[0] > max_x + margin || p[1] < min_y - margin || p[1] > max_y + margin {
        return false;
    }

    let area = signed_area2(a, b, c);
    if area == 0.0 || !area.is_finite() {
        return false;
    }
    let sign = area.signum();
    let slack = -CONTAINMENT_SLACK * area.abs();
    sign * signed_area2(a, b, p) >= slack
        && sign * signed_area2(b, c, p) >= slack
        && sign * signed_area2(c, a, p) >= slack
}

impl CoordinateTransform for TransformMesh {
    /// Points outside the mesh map to NaN.
    fn apply(&self, location: [f64; 2]) -> [f64; 2] {
        self.try_apply(location).unwrap_or([f64::NAN; 2])
    }
}

impl InvertibleCoordinateTransform for TransformMesh {
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]> {
        let t = self
            .target_triangle_containing(location)
            .ok_or_else(|| ModelError::Noninvertible(format!("{:?} lies outside the deformed mesh", location)))?;
        self.triangles[t].model.apply_inverse(location)
    }
}
