use std::collections::VecDeque;

/// Slope magnitude below which a window counts as flat.
pub const PLATEAU_SLOPE: f64 = 0.0001;

/// Bounded history of scalar errors used by every iterative optimizer to decide
/// when it has converged.
///
/// Running `mean`, `var`, `std`, `min` and `max` cover every value ever added;
/// [`ErrorStatistic::median`] and [`ErrorStatistic::wide_slope`] only see the
/// retained window of the last `capacity` values.
#[derive(Debug, Clone)]
pub struct ErrorStatistic {
    values: VecDeque<f64>,
    capacity: usize,
    count: usize,
    var0: f64,
    pub mean: f64,
    pub var: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ErrorStatistic {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        ErrorStatistic {
            values: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
            var0: 0.0,
            mean: 0.0,
            var: 0.0,
            std: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Appends `value`, evicting the oldest retained value once full.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::error_statistic::ErrorStatistic;
    /// let mut s = ErrorStatistic::new(3);
    /// for v in [4.0, 2.0, 6.0, 8.0] {
    ///     s.add(v);
    /// }
    /// assert_eq!(s.len(), 3);
    /// assert_eq!(s.mean, 5.0);
    /// assert_eq!(s.median(), 6.0);
    /// ```
    pub fn add(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);

        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.var0 = 0.0;
        } else {
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.var0 += delta * (value - self.mean);
        }
        self.var = if self.count > 1 { self.var0 / (self.count - 1) as f64 } else { 0.0 };
        self.std = self.var.sqrt();
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Number of retained values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total number of values ever added.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Median of the retained window, `0.0` when empty.
    pub fn median(&self) -> f64 {
        median(self.values.iter().copied().collect())
    }

    /// Average change per step over the trailing `width` values.
    ///
    /// The window is clipped to what is retained. `None` until two values exist.
    ///
    /// # Examples
    /// ```
    /// # use tilemesh::error_statistic::ErrorStatistic;
    /// let mut s = ErrorStatistic::new(10);
    /// for v in [10.0, 8.0, 6.0, 4.0] {
    ///     s.add(v);
    /// }
    /// assert_eq!(s.wide_slope(2), Some(-2.0));
    /// assert_eq!(s.wide_slope(100), Some(-2.0));
    /// ```
    pub fn wide_slope(&self, width: usize) -> Option<f64> {
        let len = self.values.len();
        if len < 2 || width == 0 {
            return None;
        }
        let w = width.min(len - 1);
        Some((self.values[len - 1] - self.values[len - 1 - w]) / w as f64)
    }

    /// Multi-width plateau test shared by the tile, spring and MLS optimizers.
    ///
    /// Converged means: past the first `max_plateau_width` iterations, the
    /// current error is below `max_allowed_error`, and the wide slope is flat at
    /// every width `max_plateau_width, max_plateau_width / 2, ..., 1`. Any width
    /// that is still moving keeps the optimizer going.
    pub fn is_converged(
        &self,
        iteration: usize,
        current_error: f64,
        max_allowed_error: f64,
        max_plateau_width: usize,
    ) -> bool {
        if iteration <= max_plateau_width || !(current_error < max_allowed_error) {
            return false;
        }
        let mut d = max_plateau_width;
        while d >= 1 {
            match self.wide_slope(d) {
                Some(slope) if slope.abs() <= PLATEAU_SLOPE => {}
                _ => return false,
            }
            d /= 2;
        }
        true
    }
}

/// Median of `values` (mean of the two middle values for even lengths).
pub(crate) fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn running_moments_cover_all_values() {
        let mut s = ErrorStatistic::new(2);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.add(v);
        }
        assert_abs_diff_eq!(s.mean, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.var, 32.0 / 7.0, epsilon = 1e-12);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert_eq!(s.len(), 2);
        assert_eq!(s.count(), 8);
        assert_eq!(s.median(), 8.0);
    }

    #[test]
    fn plateau_requires_every_width_to_be_flat() {
        let mut s = ErrorStatistic::new(11);
        // long flat run, then a jump in the very last step
        for _ in 0..10 {
            s.add(1.0);
        }
        s.add(1.5);
        // width 8 averages the jump away, width 1 does not
        assert!(s.wide_slope(8).unwrap().abs() < 0.1);
        assert!(!s.is_converged(20, 1.5, 10.0, 8));

        let mut flat = ErrorStatistic::new(11);
        for _ in 0..11 {
            flat.add(1.0);
        }
        assert!(flat.is_converged(20, 1.0, 10.0, 8));
        assert!(!flat.is_converged(8, 1.0, 10.0, 8));
        assert!(!flat.is_converged(20, 1.0, 0.5, 8));
    }

    #[test]
    fn slope_needs_two_values() {
        let mut s = ErrorStatistic::new(4);
        assert_eq!(s.wide_slope(1), None);
        s.add(3.0);
        assert_eq!(s.wide_slope(1), None);
        s.add(1.0);
        assert_eq!(s.wide_slope(1), Some(-2.0));
    }
}
