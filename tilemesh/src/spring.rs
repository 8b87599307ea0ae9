use crate::point::distance;
use rand::Rng;

/// Jitter applied when both ends of a spring coincide.
const COINCIDENT_JITTER: f64 = 1e-6;

/// A linear spring with a rest length.
///
/// Beyond `max_stretch` (in either direction) the spring goes slack and
/// contributes no force.
#[derive(Debug, Clone, PartialEq)]
pub struct Spring {
    length: f64,
    weight: f64,
    max_stretch: f64,
}

impl Spring {
    pub fn new(length: f64, weight: f64, max_stretch: f64) -> Self {
        Spring { length, weight, max_stretch }
    }

    /// Rest length.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn max_stretch(&self) -> f64 {
        self.max_stretch
    }

    /// Force on the end at `from` exerted by the end at `to`.
    ///
    /// Proportional to `(l - length) * weight` and directed from `from` towards
    /// `to`, so a stretched spring pulls and a compressed one pushes.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::spring::Spring;
    /// # use rand::SeedableRng;
    /// let spring = Spring::new(4.0, 0.5, 100.0);
    /// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    /// assert_eq!(spring.force([0.0, 0.0], [8.0, 0.0], &mut rng), [2.0, 0.0]);
    /// assert_eq!(spring.force([0.0, 0.0], [2.0, 0.0], &mut rng), [-1.0, 0.0]);
    /// ```
    pub fn force<R: Rng + ?Sized>(&self, from: [f64; 2], to: [f64; 2], rng: &mut R) -> [f64; 2] {
        let mut d = [to[0] - from[0], to[1] - from[1]];
        let mut l = distance(from, to);
        if l == 0.0 {
            d = [
                COINCIDENT_JITTER * rng.random_range(-1.0..1.0),
                COINCIDENT_JITTER * rng.random_range(-1.0..1.0),
            ];
            l = (d[0] * d[0] + d[1] * d[1]).sqrt();
            if l == 0.0 {
                return [0.0, 0.0];
            }
        }
        let stretch = l - self.length;
        if stretch.abs() > self.max_stretch {
            return [0.0, 0.0];
        }
        let f = stretch * self.weight / l;
        [d[0] * f, d[1] * f]
    }
}
