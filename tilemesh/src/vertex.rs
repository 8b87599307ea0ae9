/// The far end of a spring attached to a [`Vertex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexRef {
    /// Another vertex of the same mesh.
    Mesh(usize),
    /// An immovable anchor location.
    Anchor(usize),
}

/// Dynamic state of one spring-mesh vertex.
///
/// Positions live in the [`crate::transform_mesh::TransformMesh`] targets;
/// the vertex only carries velocity, accumulated force and its spring links.
/// Its mass is the summed weight of the springs that pushed it in the current
/// step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vertex {
    direction: [f64; 2],
    force: [f64; 2],
    mass: f64,
    speed: f64,
    springs: Vec<(VertexRef, usize)>,
}

impl Vertex {
    pub fn new() -> Self {
        Vertex::default()
    }

    pub fn add_spring(&mut self, other: VertexRef, spring: usize) {
        self.springs.push((other, spring));
    }

    /// `(far end, spring index)` pairs.
    pub fn springs(&self) -> &[(VertexRef, usize)] {
        &self.springs
    }

    /// Adds the force `f` of a spring with weight `weight`.
    pub fn add_force(&mut self, f: [f64; 2], weight: f64) {
        self.force[0] += f[0];
        self.force[1] += f[1];
        self.mass += weight;
    }

    pub fn reset_force(&mut self) {
        self.force = [0.0, 0.0];
        self.mass = 0.0;
    }

    pub fn force(&self) -> [f64; 2] {
        self.force
    }

    pub fn force_magnitude(&self) -> f64 {
        self.force[0].hypot(self.force[1])
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Rate at which the current force works on the current velocity.
    pub fn power(&self) -> f64 {
        self.force[0] * self.direction[0] + self.force[1] * self.direction[1]
    }

    pub fn direction(&self) -> [f64; 2] {
        self.direction
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Integrates the accumulated force into the damped velocity.
    ///
    /// The acceleration is `force / (2 * mass)`. Every spring weight enters the
    /// mass, so a step never carries a vertex past the rest position of the
    /// springs pulling it. A vertex without springs only decays.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::vertex::Vertex;
    /// let mut v = Vertex::new();
    /// v.add_force([3.0, 4.0], 1.0);
    /// v.update(0.5);
    /// assert_eq!(v.direction(), [0.75, 1.0]);
    /// assert_eq!(v.speed(), 1.25);
    /// ```
    pub fn update(&mut self, damp: f64) {
        let a = if self.mass > 0.0 { 0.5 / self.mass } else { 0.0 };
        self.direction[0] = (self.direction[0] + self.force[0] * a) * damp;
        self.direction[1] = (self.direction[1] + self.force[1] * a) * damp;
        self.speed = self.direction[0].hypot(self.direction[1]);
    }

    pub fn displacement(&self, dt: f64) -> [f64; 2] {
        [self.direction[0] * dt, self.direction[1] * dt]
    }

    /// Drops the velocity.
    pub fn stop(&mut self) {
        self.direction = [0.0, 0.0];
        self.speed = 0.0;
    }

    /// Drops velocity and force, keeping the springs.
    pub fn halt(&mut self) {
        self.stop();
        self.reset_force();
    }
}
