use thiserror::Error;

/// Failures surfaced by the trip preparation pipeline.
///
/// Routing problems never show up here: the router degrades to a straight
/// line instead. `NoRouteFound` is only produced by the HTTP layer when the
/// resulting distance is unusable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid coordinate values: ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Location ({lat}, {lon}) is outside the service area")]
    OutOfServiceArea { lat: f64, lon: f64 },

    #[error("Invalid datetime format: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid or empty graph provided")]
    GraphUnavailable,

    #[error("Nearest node lookup failed: {0}")]
    NodeResolution(String),

    #[error("No route found between these points")]
    NoRouteFound,

    #[error("Feature schema mismatch: expected {expected} features, got {actual}")]
    FeatureSchemaMismatch { expected: usize, actual: usize },
}

impl PipelineError {
    /// True for errors caused by the caller's input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidCoordinate { .. }
                | PipelineError::OutOfServiceArea { .. }
                | PipelineError::InvalidTimestamp(_)
                | PipelineError::NoRouteFound
        )
    }
}
