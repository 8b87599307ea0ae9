use crate::error::{ModelError, Result};
use crate::error_statistic::ErrorStatistic;
use crate::model::CoordinateTransform;
use crate::point::distance;
use crate::spring::Spring;
use crate::tile_configuration::{Convergence, OptimizeParams};
use crate::transform_mesh::TransformMesh;
use crate::vertex::{Vertex, VertexRef};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Longest distance any vertex may travel in one step.
const MAX_STEP: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringMeshParams {
    /// Vertices per row of the underlying grid.
    pub resolution: usize,
    /// Weight of every mesh spring.
    pub stiffness: f64,
    /// Stretch beyond which a spring goes slack.
    pub max_stretch: f64,
    /// Velocity damping per step, in `(0, 1]`.
    pub damp: f64,
}

impl Default for SpringMeshParams {
    fn default() -> Self {
        SpringMeshParams { resolution: 32, stiffness: 0.1, max_stretch: 2000.0, damp: 0.9 }
    }
}

/// Handle of a passive vertex inside its [`SpringMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassiveId(pub usize);

/// A point carried along by the mesh rather than by springs.
#[derive(Debug, Clone, PartialEq)]
struct PassiveVertex {
    local: [f64; 2],
    world: [f64; 2],
}

/// Spring between an active vertex of one mesh and a passive vertex of another,
/// used by [`optimize_meshes`].
#[derive(Debug, Clone, PartialEq)]
pub struct CrossMeshSpring {
    /// `(mesh index, vertex index)` of the end that receives the force.
    pub active: (usize, usize),
    /// `(mesh index, passive vertex)` of the end it is pulled towards.
    pub passive: (usize, PassiveId),
    pub spring: Spring,
}

/// Mass-spring relaxation over a [`TransformMesh`].
///
/// Every triangle edge is a spring with its source length as rest length, and
/// the opposite corners of every pair of triangles sharing an edge are joined by
/// a second-order spring. Vertex positions are the mesh targets.
#[derive(Debug, Clone)]
pub struct SpringMesh {
    mesh: TransformMesh,
    vertices: Vec<Vertex>,
    springs: Vec<Spring>,
    anchors: Vec<[f64; 2]>,
    passive: Vec<PassiveVertex>,
    fixed: BTreeSet<usize>,
    damp: f64,
    force: f64,
    max_force: f64,
    min_force: f64,
}

impl SpringMesh {
    /// Grid of `params.resolution` vertices per row over `width × height` with
    /// roughly square cells.
    pub fn new(params: &SpringMeshParams, width: f64, height: f64) -> Self {
        let num_x = params.resolution.max(2);
        let dx = width / (num_x - 1) as f64;
        let num_y = if dx > 0.0 { ((height / dx).round() as usize + 1).max(2) } else { 2 };
        let mesh = TransformMesh::new(num_x, num_y, width, height);

        let mut spring_mesh = SpringMesh {
            vertices: vec![Vertex::new(); mesh.num_vertices()],
            mesh,
            springs: Vec::new(),
            anchors: Vec::new(),
            passive: Vec::new(),
            fixed: BTreeSet::new(),
            damp: params.damp,
            force: 0.0,
            max_force: 0.0,
            min_force: 0.0,
        };

        let edges = spring_mesh.mesh.edges();
        for &(a, b) in &edges {
            spring_mesh.add_mesh_spring(a, b, params.stiffness, params.max_stretch);
        }

        // second order: opposite corners of triangle pairs sharing an edge
        let mut edge_triangles: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (t, triangle) in spring_mesh.mesh.triangles().iter().enumerate() {
            let [a, b, c] = triangle.vertices;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edge_triangles.entry((u.min(v), u.max(v))).or_default().push(t);
            }
        }
        let existing: BTreeSet<(usize, usize)> = edges.into_iter().collect();
        let mut diagonals = BTreeSet::new();
        for (&(u, v), triangles) in &edge_triangles {
            if let [t1, t2] = triangles[..] {
                let opposite = |t: usize| {
                    spring_mesh.mesh.triangles()[t].vertices.into_iter().find(|&w| w != u && w != v)
                };
                if let (Some(w1), Some(w2)) = (opposite(t1), opposite(t2)) {
                    let pair = (w1.min(w2), w1.max(w2));
                    if w1 != w2 && !existing.contains(&pair) {
                        diagonals.insert(pair);
                    }
                }
            }
        }
        for (a, b) in diagonals {
            spring_mesh.add_mesh_spring(a, b, params.stiffness, params.max_stretch);
        }
        debug!(
            "spring mesh with {} vertices and {} springs",
            spring_mesh.vertices.len(),
            spring_mesh.springs.len()
        );
        spring_mesh
    }

    fn add_mesh_spring(&mut self, a: usize, b: usize, weight: f64, max_stretch: f64) {
        let length = distance(self.mesh.source(a), self.mesh.source(b));
        self.springs.push(Spring::new(length, weight, max_stretch));
        let s = self.springs.len() - 1;
        self.vertices[a].add_spring(VertexRef::Mesh(b), s);
        self.vertices[b].add_spring(VertexRef::Mesh(a), s);
    }

    pub fn mesh(&self) -> &TransformMesh {
        &self.mesh
    }

    pub fn into_mesh(self) -> TransformMesh {
        self.mesh
    }

    pub fn vertex(&self, v: usize) -> &Vertex {
        &self.vertices[v]
    }

    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Total force magnitude of the last step.
    pub fn force(&self) -> f64 {
        self.force
    }

    pub fn max_force(&self) -> f64 {
        self.max_force
    }

    pub fn min_force(&self) -> f64 {
        self.min_force
    }

    pub fn fix_vertex(&mut self, v: usize) {
        self.fixed.insert(v);
        self.vertices[v].halt();
    }

    pub fn is_fixed(&self, v: usize) -> bool {
        self.fixed.contains(&v)
    }

    /// Seeds every vertex target with `transform(source)`.
    pub fn init<T: CoordinateTransform + ?Sized>(&mut self, transform: &T) -> Result<()> {
        self.mesh.init(transform)?;
        self.update_passive_vertices();
        Ok(())
    }

    /// Ties vertex `v` to the immovable location `target` by a zero-length spring.
    pub fn attach(&mut self, v: usize, target: [f64; 2], weight: f64) {
        self.anchors.push(target);
        self.springs.push(Spring::new(0.0, weight, f64::MAX));
        let s = self.springs.len() - 1;
        self.vertices[v].add_spring(VertexRef::Anchor(self.anchors.len() - 1), s);
    }

    /// Registers a point that follows the mesh through its containing triangle.
    pub fn add_passive_vertex(&mut self, local: [f64; 2]) -> PassiveId {
        let world = self.mesh.apply(local);
        self.passive.push(PassiveVertex { local, world });
        PassiveId(self.passive.len() - 1)
    }

    /// Current location of a passive vertex, NaN once it falls outside the mesh.
    pub fn passive_world(&self, id: PassiveId) -> [f64; 2] {
        self.passive[id.0].world
    }

    fn update_passive_vertices(&mut self) {
        for p in &mut self.passive {
            p.world = self.mesh.apply(p.local);
        }
    }

    fn far_end(&self, other: VertexRef) -> [f64; 2] {
        match other {
            VertexRef::Mesh(w) => self.mesh.target(w),
            VertexRef::Anchor(a) => self.anchors[a],
        }
    }

    /// Resets and accumulates the internal spring forces of every free vertex.
    fn accumulate_spring_forces<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for v in 0..self.vertices.len() {
            self.vertices[v].reset_force();
            if self.fixed.contains(&v) {
                continue;
            }
            let here = self.mesh.target(v);
            let mut total = [0.0, 0.0];
            let mut weight = 0.0;
            for &(other, s) in self.vertices[v].springs() {
                let f = self.springs[s].force(here, self.far_end(other), rng);
                total[0] += f[0];
                total[1] += f[1];
                weight += self.springs[s].weight();
            }
            self.vertices[v].add_force(total, weight);
        }
    }

    fn add_vertex_force(&mut self, v: usize, f: [f64; 2], weight: f64) {
        if !self.fixed.contains(&v) {
            self.vertices[v].add_force(f, weight);
        }
    }

    /// Summed power of the free vertices.
    fn power(&self) -> f64 {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(v, _)| !self.fixed.contains(v))
            .map(|(_, vertex)| vertex.power())
            .sum()
    }

    fn stop(&mut self) {
        for vertex in &mut self.vertices {
            vertex.stop();
        }
    }

    /// Records force statistics and integrates velocities; returns the
    /// maximal speed.
    fn update_velocities(&mut self) -> f64 {
        let mut total = 0.0;
        let mut max = 0.0_f64;
        let mut min = f64::MAX;
        let mut max_speed = 0.0_f64;
        for (v, vertex) in self.vertices.iter_mut().enumerate() {
            if self.fixed.contains(&v) {
                continue;
            }
            let f = vertex.force_magnitude();
            total += f;
            max = max.max(f);
            min = min.min(f);
            vertex.update(self.damp);
            max_speed = max_speed.max(vertex.speed());
        }
        self.force = total;
        self.max_force = max;
        self.min_force = if min == f64::MAX { 0.0 } else { min };
        max_speed
    }

    /// Moves every free vertex by `direction * dt`, refits the triangles and
    /// re-positions the passive vertices.
    fn advance(&mut self, dt: f64) -> Result<()> {
        for v in 0..self.vertices.len() {
            if self.fixed.contains(&v) {
                continue;
            }
            let d = self.vertices[v].displacement(dt);
            let q = self.mesh.target(v);
            self.mesh.set_target(v, [q[0] + d[0], q[1] + d[1]]);
        }
        self.mesh.update_affines()?;
        self.update_passive_vertices();
        Ok(())
    }

    /// One explicit integration step. Returns the total force before the move.
    ///
    /// Velocities are dropped whenever the forces work against them as a whole,
    /// so the mesh does not swing through its rest state.
    pub fn optimize_iteration<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<f64> {
        self.accumulate_spring_forces(rng);
        if self.power() < 0.0 {
            self.stop();
        }
        let max_speed = self.update_velocities();
        self.advance(time_step(max_speed))?;
        Ok(self.force)
    }

    /// Relaxes until the total force plateaus below `params.max_allowed_error`
    /// or `params.max_iterations` steps have run.
    pub fn optimize<R: Rng + ?Sized>(&mut self, params: &OptimizeParams, rng: &mut R) -> Result<Convergence> {
        let mut observer = ErrorStatistic::new(params.max_plateau_width + 1);
        let mut iteration = 0;
        let mut converged = false;
        while iteration < params.max_iterations {
            let force = self.optimize_iteration(rng)?;
            observer.add(force);
            iteration += 1;
            if observer.is_converged(iteration, force, params.max_allowed_error, params.max_plateau_width) {
                converged = true;
                break;
            }
        }
        if converged {
            info!("spring mesh relaxed after {} iterations, total force {:.4}", iteration, self.force);
        } else {
            warn!("spring mesh stopped at the iteration limit {}, total force {:.4}", iteration, self.force);
        }
        Ok(Convergence {
            iterations: iteration,
            error: self.force,
            min_error: self.min_force,
            max_error: self.max_force,
            converged,
        })
    }
}

/// Unit step, shortened so that no vertex moves further than [`MAX_STEP`].
fn time_step(max_speed: f64) -> f64 {
    if max_speed > MAX_STEP {
        MAX_STEP / max_speed
    } else {
        1.0
    }
}

/// Relaxes several meshes in lock-step.
///
/// Besides their own springs, active vertices are pulled towards passive vertices
/// of other meshes through `links`. All meshes share one time step per iteration,
/// derived from the fastest vertex overall, and stop together when the forces work
/// against their joint motion. The error is the summed total force.
///
/// # Errors
/// [`ModelError::IllDefinedDataPoints`] for a link naming a missing mesh, vertex
/// or passive vertex; otherwise whatever a triangle refit reports.
pub fn optimize_meshes<R: Rng + ?Sized>(
    meshes: &mut [SpringMesh],
    links: &[CrossMeshSpring],
    params: &OptimizeParams,
    rng: &mut R,
) -> Result<Convergence> {
    for link in links {
        let (am, av) = link.active;
        let (pm, pv) = link.passive;
        let valid = am < meshes.len()
            && pm < meshes.len()
            && av < meshes[am].vertices.len()
            && pv.0 < meshes[pm].passive.len();
        if !valid {
            return Err(ModelError::IllDefinedDataPoints(format!("dangling cross-mesh spring {:?}", link)));
        }
    }

    let mut observer = ErrorStatistic::new(params.max_plateau_width + 1);
    let mut iteration = 0;
    let mut converged = false;
    let mut force = 0.0;
    let (mut min_force, mut max_force) = (0.0, 0.0);
    while iteration < params.max_iterations {
        for mesh in meshes.iter_mut() {
            mesh.accumulate_spring_forces(rng);
        }
        for link in links {
            let (am, av) = link.active;
            let (pm, pv) = link.passive;
            let here = meshes[am].mesh.target(av);
            let there = meshes[pm].passive_world(pv);
            if !(there[0].is_finite() && there[1].is_finite()) {
                continue;
            }
            let f = link.spring.force(here, there, rng);
            meshes[am].add_vertex_force(av, f, link.spring.weight());
        }
        if meshes.iter().map(|m| m.power()).sum::<f64>() < 0.0 {
            for mesh in meshes.iter_mut() {
                mesh.stop();
            }
        }

        let mut max_speed = 0.0_f64;
        for mesh in meshes.iter_mut() {
            max_speed = max_speed.max(mesh.update_velocities());
        }
        let dt = time_step(max_speed);
        for mesh in meshes.iter_mut() {
            mesh.advance(dt)?;
        }

        force = meshes.iter().map(|m| m.force).sum();
        min_force = meshes.iter().map(|m| m.min_force).fold(f64::MAX, f64::min);
        max_force = meshes.iter().map(|m| m.max_force).fold(0.0, f64::max);
        observer.add(force);
        iteration += 1;
        if observer.is_converged(iteration, force, params.max_allowed_error, params.max_plateau_width) {
            converged = true;
            break;
        }
    }

    if converged {
        info!("{} meshes relaxed after {} iterations, total force {:.4}", meshes.len(), iteration, force);
    } else {
        warn!("{} meshes stopped at the iteration limit {}, total force {:.4}", meshes.len(), iteration, force);
    }
    Ok(Convergence {
        iterations: iteration,
        error: force,
        min_error: if meshes.is_empty() { 0.0 } else { min_force },
        max_error: max_force,
        converged,
    })
}
