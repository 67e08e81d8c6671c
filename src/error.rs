//! Unified error handling for the trackline library.
//!
//! Hard failures (a recording that cannot start, a snap call with too few
//! anchors) are returned to the caller. Segment-level matching failures and
//! sensor errors are recoverable: they are logged and the affected component
//! degrades instead of aborting.

use thiserror::Error;

/// Unified error type for trackline operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// No position source is available, recording cannot start
    #[error("Position source unavailable")]
    SensorUnavailable,

    /// The position source reported an error while recording
    #[error("Sensor error: {message}")]
    SensorError { message: String },

    /// Matching request failed (non-success code, timeout, network error)
    #[error("Matching service failure{}: {message}", status_suffix(.status_code))]
    MatchingServiceFailure {
        message: String,
        status_code: Option<u16>,
    },

    /// Matching service answered with a payload we could not use
    #[error("Malformed matching response: {message}")]
    MatchingServiceMalformedResponse { message: String },

    /// Not enough anchors to build a route
    #[error("Route needs at least {minimum_required} anchors, got {anchor_count}")]
    InvalidInput {
        anchor_count: usize,
        minimum_required: usize,
    },

    /// An anchor has non-finite or out-of-range coordinates
    #[error("Anchor {index} has invalid coordinates ({latitude}, {longitude})")]
    InvalidAnchor {
        index: usize,
        latitude: f64,
        longitude: f64,
    },

    /// The draw operation was cancelled or superseded while in flight
    #[error("Route drawing cancelled")]
    Cancelled,

    /// Encoded polyline could not be produced or parsed
    #[error("Polyline codec error: {message}")]
    Codec { message: String },

    /// Persistence collaborator rejected an object
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|code| format!(" ({})", code)).unwrap_or_default()
}

impl TrackError {
    /// Whether this error only degrades a single segment of a snap run.
    pub fn is_segment_failure(&self) -> bool {
        matches!(
            self,
            TrackError::MatchingServiceFailure { .. }
                | TrackError::MatchingServiceMalformedResponse { .. }
        )
    }
}

/// Result type alias for trackline operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed matching response error.
    fn ok_or_malformed(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::MatchingServiceMalformedResponse {
            message: message.to_string(),
        })
    }
}
