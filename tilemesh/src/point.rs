use crate::model::CoordinateTransform;

/// A 2D location with an immutable `local` coordinate and a mutable `world`
/// coordinate.
///
/// `local` is where the point lives in its own image or tile; `world` is where
/// the current transform puts it. Both start out equal.
///
/// # Examples
/// ```
/// # use tilemesh::point::Point;
/// let p = Point::new([3.0, 4.0]);
/// assert_eq!(p.local(), [3.0, 4.0]);
/// assert_eq!(p.world(), [3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    local: [f64; 2],
    world: [f64; 2],
}

impl Point {
    pub fn new(local: [f64; 2]) -> Self {
        Point { local, world: local }
    }

    /// Creates a point whose world coordinate already differs from its local one.
    pub fn with_world(local: [f64; 2], world: [f64; 2]) -> Self {
        Point { local, world }
    }

    pub fn local(&self) -> [f64; 2] {
        self.local
    }

    pub fn world(&self) -> [f64; 2] {
        self.world
    }

    pub fn set_world(&mut self, world: [f64; 2]) {
        self.world = world;
    }

    /// Overwrites `world` with `transform(local)`.
    pub fn apply<T: CoordinateTransform + ?Sized>(&mut self, transform: &T) {
        self.world = transform.apply(self.local);
    }

    /// Moves `world` only part of the way from `local` towards `transform(local)`.
    ///
    /// # Parameters
    /// - `amount`: `0.0` leaves `world == local`, `1.0` is a full [`Point::apply`].
    pub fn apply_with_strength<T: CoordinateTransform + ?Sized>(&mut self, transform: &T, amount: f64) {
        let t = transform.apply(self.local);
        self.world = [
            self.local[0] + amount * (t[0] - self.local[0]),
            self.local[1] + amount * (t[1] - self.local[1]),
        ];
    }

    /// Euclidean distance between the world coordinates of `a` and `b`.
    pub fn distance(a: &Point, b: &Point) -> f64 {
        Point::square_distance(a, b).sqrt()
    }

    pub fn square_distance(a: &Point, b: &Point) -> f64 {
        square_distance(a.world, b.world)
    }
}

pub(crate) fn square_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

pub(crate) fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    square_distance(a, b).sqrt()
}

/// A weighted correspondence between two points.
///
/// Fitting always maps `p1.local` onto `p2.world`. [`PointMatch::apply`] moves
/// `p1.world` and refreshes the cached `distance`, so `distance` always matches
/// the last transform applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatch {
    pub p1: Point,
    pub p2: Point,
    weights: Vec<f64>,
    weight: f64,
    strength: f64,
    distance: f64,
}

impl PointMatch {
    /// Creates a match with a single weight factor.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::point::{Point, PointMatch};
    /// let m = PointMatch::new(Point::new([0.0, 0.0]), Point::new([3.0, 4.0]), 2.0);
    /// assert_eq!(m.weight(), 2.0);
    /// assert_eq!(m.distance(), 5.0);
    /// ```
    pub fn new(p1: Point, p2: Point, weight: f64) -> Self {
        PointMatch::with_weights(p1, p2, vec![weight], 1.0)
    }

    /// Creates a match whose scalar weight is the product of `weights`.
    pub fn with_weights(p1: Point, p2: Point, weights: Vec<f64>, strength: f64) -> Self {
        let weight = weights.iter().product();
        let distance = Point::distance(&p1, &p2);
        PointMatch {
            p1,
            p2,
            weights,
            weight,
            strength: strength.clamp(0.0, 1.0),
            distance,
        }
    }

    /// Convenience constructor from plain source/target locations.
    pub fn from_locations(source: [f64; 2], target: [f64; 2], weight: f64) -> Self {
        PointMatch::new(Point::new(source), Point::new(target), weight)
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn set_weights(&mut self, weights: Vec<f64>) {
        self.weight = weights.iter().product();
        self.weights = weights;
    }

    /// Replaces one weight factor, appending it if `index` is past the end.
    pub fn set_weight(&mut self, index: usize, weight: f64) {
        if index < self.weights.len() {
            self.weights[index] = weight;
        } else {
            self.weights.push(weight);
        }
        self.weight = self.weights.iter().product();
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn set_strength(&mut self, strength: f64) {
        self.strength = strength.clamp(0.0, 1.0);
    }

    /// World distance between `p1` and `p2` as of the last [`PointMatch::apply`].
    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn update_distance(&mut self) {
        self.distance = Point::distance(&self.p1, &self.p2);
    }

    /// Applies `transform` to `p1` (scaled by `strength`) and refreshes `distance`.
    pub fn apply<T: CoordinateTransform + ?Sized>(&mut self, transform: &T) {
        self.p1.apply_with_strength(transform, self.strength);
        self.update_distance();
    }

    /// Returns the reversed correspondence (`p2 -> p1`) carrying the same weights.
    pub fn flip(&self) -> PointMatch {
        PointMatch::with_weights(self.p2.clone(), self.p1.clone(), self.weights.clone(), self.strength)
    }

    pub fn flip_all(matches: &[PointMatch]) -> Vec<PointMatch> {
        matches.iter().map(PointMatch::flip).collect()
    }

    pub fn apply_all<T: CoordinateTransform + ?Sized>(matches: &mut [PointMatch], transform: &T) {
        for m in matches.iter_mut() {
            m.apply(transform);
        }
    }

    /// Mean cached distance, `0.0` for an empty slice.
    pub fn mean_distance(matches: &[PointMatch]) -> f64 {
        if matches.is_empty() {
            return 0.0;
        }
        matches.iter().map(|m| m.distance).sum::<f64>() / matches.len() as f64
    }

    pub fn max_distance(matches: &[PointMatch]) -> f64 {
        matches.iter().map(|m| m.distance).fold(0.0, f64::max)
    }

    pub fn source_points(matches: &[PointMatch]) -> Vec<[f64; 2]> {
        matches.iter().map(|m| m.p1.local()).collect()
    }

    pub fn target_points(matches: &[PointMatch]) -> Vec<[f64; 2]> {
        matches.iter().map(|m| m.p2.world()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation_model::TranslationModel;
    use approx::assert_abs_diff_eq;

    #[test]
    fn apply_updates_world_and_distance() {
        let mut m = PointMatch::from_locations([1.0, 1.0], [4.0, 5.0], 1.0);
        assert_abs_diff_eq!(m.distance(), 5.0, epsilon = 1e-12);

        m.apply(&TranslationModel::new(3.0, 4.0));
        assert_eq!(m.p1.world(), [4.0, 5.0]);
        assert_eq!(m.p1.local(), [1.0, 1.0]);
        assert_abs_diff_eq!(m.distance(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn partial_strength_moves_half_way() {
        let mut m = PointMatch::with_weights(Point::new([0.0, 0.0]), Point::new([10.0, 0.0]), vec![1.0], 0.5);
        m.apply(&TranslationModel::new(10.0, 0.0));
        assert_eq!(m.p1.world(), [5.0, 0.0]);
        assert_abs_diff_eq!(m.distance(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn weight_is_product_of_factors() {
        let mut m = PointMatch::with_weights(Point::new([0.0, 0.0]), Point::new([1.0, 0.0]), vec![2.0, 3.0], 1.0);
        assert_eq!(m.weight(), 6.0);
        m.set_weight(1, 0.5);
        assert_eq!(m.weight(), 1.0);
        m.set_weight(5, 4.0);
        assert_eq!(m.weights(), &[2.0, 0.5, 4.0]);
        assert_eq!(m.weight(), 4.0);
    }

    #[test]
    fn flip_swaps_points_and_keeps_weights() {
        let m = PointMatch::from_locations([1.0, 2.0], [3.0, 4.0], 0.25);
        let f = m.flip();
        assert_eq!(f.p1.local(), [3.0, 4.0]);
        assert_eq!(f.p2.local(), [1.0, 2.0]);
        assert_eq!(f.weight(), 0.25);
        assert_abs_diff_eq!(f.distance(), m.distance(), epsilon = 1e-12);
    }

    #[test]
    fn flipping_twice_restores_the_matches() {
        let matches = vec![
            PointMatch::from_locations([1.0, 2.0], [3.0, 4.0], 1.0),
            PointMatch::from_locations([-5.0, 0.5], [7.0, 8.0], 2.0),
        ];
        let flipped = PointMatch::flip_all(&matches);
        assert_eq!(PointMatch::source_points(&flipped), PointMatch::target_points(&matches));
        assert_eq!(PointMatch::target_points(&flipped), PointMatch::source_points(&matches));
        assert_eq!(PointMatch::source_points(&matches), vec![[1.0, 2.0], [-5.0, 0.5]]);

        let back = PointMatch::flip_all(&flipped);
        assert_eq!(PointMatch::source_points(&back), PointMatch::source_points(&matches));
        assert_eq!(PointMatch::target_points(&back), PointMatch::target_points(&matches));
        assert_eq!(back[1].weight(), 2.0);
        assert!(PointMatch::flip_all(&[]).is_empty());
    }
}
