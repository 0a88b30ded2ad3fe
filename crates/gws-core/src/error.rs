use thiserror::Error;

/// Errors raised by the groundwater storage pipeline.
///
/// Every variant aborts the operation that raised it; nothing is retried.
#[derive(Error, Debug)]
pub enum GwsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient samples: need at least {required}, found {found}")]
    InsufficientSamples { required: usize, found: usize },
    #[error("point (lat={lat}, lon={lon}) lies outside the grid extent")]
    PointOutOfRange { lat: f64, lon: f64 },
    #[error("no data at point (lat={lat}, lon={lon}): all four surrounding nodes are masked")]
    NoDataAtPoint { lat: f64, lon: f64 },
    #[error("stage `{stage}` failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: Box<GwsError>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GwsError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GwsError::InvalidInput(msg.into())
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &GwsError {
        match self {
            GwsError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convenience type for `Result<T, GwsError>`.
pub type GwsResult<T> = Result<T, GwsError>;
