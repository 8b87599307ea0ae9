use crate::error::{ModelError, Result};
use crate::error_statistic::median;
use crate::point::PointMatch;
use log::{debug, trace};
use nalgebra::Matrix3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Cost of a model that has not been evaluated yet. Any evaluated model is
/// better than one carrying this cost.
pub const UNDEFINED_COST: f64 = -1.0;

/// Residuals below this are treated as exact when trimming, so that a noise-free
/// inlier set is not eroded by rounding differences around a zero median.
const TRIM_NOISE_FLOOR: f64 = 1e-9;

/// Maps 2D locations.
pub trait CoordinateTransform {
    fn apply(&self, location: [f64; 2]) -> [f64; 2];

    fn apply_in_place(&self, location: &mut [f64; 2]) {
        *location = self.apply(*location);
    }
}

/// A [`CoordinateTransform`] that can also be run backwards.
pub trait InvertibleCoordinateTransform: CoordinateTransform {
    /// # Errors
    /// [`ModelError::Noninvertible`] when the transform is singular or `location`
    /// has no preimage.
    fn apply_inverse(&self, location: [f64; 2]) -> Result<[f64; 2]>;

    fn apply_inverse_in_place(&self, location: &mut [f64; 2]) -> Result<()> {
        *location = self.apply_inverse(*location)?;
        Ok(())
    }
}

/// Parameters of [`Model::ransac`], [`Model::filter`] and [`Model::filter_ransac`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Number of random minimal draws.
    pub iterations: usize,
    /// Maximal world distance for a candidate to count as inlier.
    pub max_epsilon: f64,
    /// The inlier ratio must exceed this for a model to be accepted.
    pub min_inlier_ratio: f64,
    /// Absolute lower bound on the inlier count.
    pub min_num_inliers: usize,
    /// Trimming factor of [`Model::filter`], in multiples of the median residual.
    pub max_trust: f64,
}

impl Default for RansacParams {
    fn default() -> Self {
        RansacParams {
            iterations: 1000,
            max_epsilon: 25.0,
            min_inlier_ratio: 0.05,
            min_num_inliers: 7,
            max_trust: 4.0,
        }
    }
}

/// A transformation that can be estimated from weighted correspondences.
///
/// Every fit maps `p1.local` of each [`PointMatch`] onto `p2.world`.
pub trait Model: InvertibleCoordinateTransform + Clone + Debug + Send + Sync {
    /// Hard lower bound on the number of matches [`Model::fit`] accepts.
    fn min_num_matches(&self) -> usize;

    /// Closed-form weighted least-squares fit.
    ///
    /// # Errors
    /// - [`ModelError::NotEnoughDataPoints`] with fewer than
    ///   [`Model::min_num_matches`] matches.
    /// - [`ModelError::IllDefinedDataPoints`] for degenerate configurations.
    fn fit(&mut self, matches: &[PointMatch]) -> Result<()>;

    fn cost(&self) -> f64;

    fn set_cost(&mut self, cost: f64);

    /// Homogeneous 3×3 matrix of the transform.
    fn to_matrix(&self) -> Matrix3<f64>;

    /// Back to identity, cost undefined.
    fn reset(&mut self);

    /// Strictly lower cost than `other`. A model with undefined (negative) cost
    /// is never better; anything is better than an undefined incumbent.
    fn better_than(&self, other: &Self) -> bool {
        if self.cost() < 0.0 {
            return false;
        }
        if other.cost() < 0.0 {
            return true;
        }
        self.cost() < other.cost()
    }

    /// Applies the model to copies of `candidates` and collects those landing
    /// within `epsilon` of their target.
    ///
    /// Sets the cost to `1 - inlier ratio`, clamped to `[0, 1]`.
    ///
    /// # Returns
    /// `(passed, inliers)` where `passed` requires both
    /// `inliers.len() >= min_num_inliers` and `ratio > min_inlier_ratio`.
    fn test(
        &mut self,
        candidates: &[PointMatch],
        epsilon: f64,
        min_inlier_ratio: f64,
        min_num_inliers: usize,
    ) -> (bool, Vec<PointMatch>) {
        let mut inliers = Vec::new();
        for candidate in candidates {
            let mut m = candidate.clone();
            m.apply(&*self);
            if m.distance() < epsilon {
                inliers.push(m);
            }
        }
        let ratio = if candidates.is_empty() {
            0.0
        } else {
            inliers.len() as f64 / candidates.len() as f64
        };
        self.set_cost((1.0 - ratio).clamp(0.0, 1.0));
        (inliers.len() >= min_num_inliers && ratio > min_inlier_ratio, inliers)
    }

    /// Random sample consensus.
    ///
    /// Each iteration fits a random minimal subset, tests it, and greedily refits
    /// on the inlier set while that set keeps growing. The best accepted
    /// candidate replaces `self`.
    ///
    /// # Returns
    /// `Ok(Some(inliers))` on success; `Ok(None)` with `self` untouched if no
    /// candidate was ever accepted.
    ///
    /// # Errors
    /// [`ModelError::NotEnoughDataPoints`] if `candidates` is smaller than the
    /// minimal set.
    fn ransac<R: Rng + ?Sized>(
        &mut self,
        candidates: &[PointMatch],
        params: &RansacParams,
        rng: &mut R,
    ) -> Result<Option<Vec<PointMatch>>> {
        let min = self.min_num_matches();
        ModelError::check_count(min, candidates.len())?;

        let mut best = self.clone();
        best.set_cost(UNDEFINED_COST);
        let mut best_inliers: Vec<PointMatch> = Vec::new();
        let mut model = self.clone();

        'draws: for iteration in 0..params.iterations {
            let minimal: Vec<PointMatch> = rand::seq::index::sample(rng, candidates.len(), min)
                .iter()
                .map(|i| candidates[i].clone())
                .collect();
            if let Err(e) = model.fit(&minimal) {
                trace!("ransac draw {} rejected: {}", iteration, e);
                continue;
            }

            let (mut is_good, mut inliers) =
                model.test(candidates, params.max_epsilon, params.min_inlier_ratio, params.min_num_inliers);
            let mut num_inliers = 0;
            while is_good && num_inliers < inliers.len() {
                num_inliers = inliers.len();
                if let Err(e) = model.fit(&inliers) {
                    trace!("ransac refit {} rejected: {}", iteration, e);
                    continue 'draws;
                }
                let (good, grown) =
                    model.test(candidates, params.max_epsilon, params.min_inlier_ratio, params.min_num_inliers);
                is_good = good;
                inliers = grown;
            }

            if is_good && inliers.len() >= params.min_num_inliers && model.better_than(&best) {
                best = model.clone();
                best_inliers = inliers;
            }
        }

        if best_inliers.is_empty() {
            debug!("ransac found no consensus among {} candidates", candidates.len());
            return Ok(None);
        }
        debug!(
            "ransac kept {} of {} candidates (cost {:.4})",
            best_inliers.len(),
            candidates.len(),
            best.cost()
        );
        *self = best;
        Ok(Some(best_inliers))
    }

    /// Iterative trimmed least squares.
    ///
    /// Fits on the current inliers and drops every match whose residual exceeds
    /// `max_trust` times the median residual, until nothing more is dropped. The
    /// cost becomes the mean residual.
    ///
    /// # Returns
    /// `Ok(Some(inliers))` on success; `Ok(None)` with `self` untouched if fewer
    /// than `max(min_num_inliers, min_num_matches)` survive or a refit fails.
    fn filter(
        &mut self,
        candidates: &[PointMatch],
        max_trust: f64,
        min_num_inliers: usize,
    ) -> Result<Option<Vec<PointMatch>>> {
        let min = self.min_num_matches();
        ModelError::check_count(min, candidates.len())?;
        let min_num_inliers = min_num_inliers.max(min);

        let mut model = self.clone();
        let mut inliers: Vec<PointMatch> = candidates.to_vec();
        loop {
            let num_inliers = inliers.len();
            if let Err(e) = model.fit(&inliers) {
                debug!("filter stopped with {} inliers: {}", num_inliers, e);
                return Ok(None);
            }
            PointMatch::apply_all(&mut inliers, &model);
            let residuals: Vec<f64> = inliers.iter().map(|m| m.distance()).collect();
            let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
            let threshold = (median(residuals) * max_trust).max(TRIM_NOISE_FLOOR);
            inliers.retain(|m| m.distance() <= threshold);
            model.set_cost(mean);
            if inliers.len() >= num_inliers {
                break;
            }
        }

        if inliers.len() < min_num_inliers {
            return Ok(None);
        }
        *self = model;
        Ok(Some(inliers))
    }

    /// RANSAC for gross outliers, then [`Model::filter`] on its inliers.
    ///
    /// If RANSAC succeeds but trimming fails, `self` keeps the RANSAC model and
    /// `Ok(None)` is returned.
    fn filter_ransac<R: Rng + ?Sized>(
        &mut self,
        candidates: &[PointMatch],
        params: &RansacParams,
        rng: &mut R,
    ) -> Result<Option<Vec<PointMatch>>> {
        let Some(consensus) = self.ransac(candidates, params, rng)? else {
            return Ok(None);
        };
        let filtered = self.filter(&consensus, params.max_trust, params.min_num_inliers)?;
        if let Some(inliers) = &filtered {
            debug!("filter kept {} of {} ransac inliers", inliers.len(), consensus.len());
        }
        Ok(filtered)
    }
}

/// Fits `model` to parallel slices of source and target locations.
///
/// Intended for producers that hand over plain coordinates rather than
/// [`PointMatch`]es. Missing weights default to `1.0`.
pub fn fit_to_points<M: Model>(
    model: &mut M,
    sources: &[[f64; 2]],
    targets: &[[f64; 2]],
    weights: &[f64],
) -> Result<()> {
    let matches: Vec<PointMatch> = sources
        .iter()
        .zip(targets)
        .enumerate()
        .map(|(i, (s, t))| PointMatch::from_locations(*s, *t, weights.get(i).copied().unwrap_or(1.0)))
        .collect();
    model.fit(&matches)
}

/// Weighted centroids of sources (`p1.local`) and targets (`p2.world`) plus the
/// weight sum.
pub(crate) fn weighted_centroids(matches: &[PointMatch]) -> Result<([f64; 2], [f64; 2], f64)> {
    let mut ws = 0.0;
    let mut pc = [0.0; 2];
    let mut qc = [0.0; 2];
    for m in matches {
        let w = m.weight();
        let p = m.p1.local();
        let q = m.p2.world();
        ws += w;
        pc[0] += w * p[0];
        pc[1] += w * p[1];
        qc[0] += w * q[0];
        qc[1] += w * q[1];
    }
    if !(ws > 0.0) {
        return Err(ModelError::IllDefinedDataPoints("sum of weights is not positive".to_string()));
    }
    Ok(([pc[0] / ws, pc[1] / ws], [qc[0] / ws, qc[1] / ws], ws))
}
