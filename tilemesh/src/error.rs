use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Failures raised while fitting, inverting or exporting transformations.
///
/// The two fitting failures are recoverable for the estimators that
/// use them: [`crate::model::Model::ransac`] treats both as a failed draw and
/// moves on, while tile and mesh optimizers abort the current run and hand the
/// error back to the caller.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Fewer correspondences than the model needs for a unique solution.
    #[error("not enough data points: {found} given, at least {required} required")]
    NotEnoughDataPoints { required: usize, found: usize },

    /// Enough correspondences, but their geometry does not determine the model
    /// (singular normal equations, collinear points, ...).
    #[error("ill-defined data points: {0}")]
    IllDefinedDataPoints(String),

    /// The transform cannot be inverted at this location, or the location is not
    /// covered by any mesh triangle.
    #[error("noninvertible: {0}")]
    Noninvertible(String),

    /// A model family was used where it is not allowed.
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// A transformation map file could not be parsed.
    #[error("invalid transformation map: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Shorthand for the minimum-count check every `fit` starts with.
    pub(crate) fn check_count(required: usize, found: usize) -> Result<()> {
        if found < required {
            Err(ModelError::NotEnoughDataPoints { required, found })
        } else {
            Ok(())
        }
    }

    /// `true` for the two fitting failures (as opposed to inversion or I/O).
    pub fn is_fit_failure(&self) -> bool {
        matches!(
            self,
            ModelError::NotEnoughDataPoints { .. } | ModelError::IllDefinedDataPoints(_)
        )
    }
}
