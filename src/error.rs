//! Unified error handling for the road-monitor core.
//!
//! Every failure the core can surface is a variant of [`FieldError`]. The
//! `Display` text is written for people: hosts show it verbatim as the single
//! notification for a surfaced failure.

use thiserror::Error;

/// Which input was rejected when a session or record could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Name was empty after trimming
    MissingName,
    /// Road class (or asset category) was not chosen
    MissingType,
    /// Coordinates were non-finite or outside the WGS84 ranges
    InvalidCoordinates,
    /// A recording session is already running
    AlreadyRecording,
}

impl ValidationError {
    fn message(self) -> &'static str {
        match self {
            ValidationError::MissingName => "Please enter a name before continuing",
            ValidationError::MissingType => "Please select a type before continuing",
            ValidationError::InvalidCoordinates => {
                "Please enter valid coordinate ranges (lat: -90 to 90, lng: -180 to 180)"
            }
            ValidationError::AlreadyRecording => "A recording is already in progress",
        }
    }
}

/// Unified error type for road-monitor operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// Bad input; the operation never started
    #[error("{}", .0.message())]
    Validation(ValidationError),

    /// No positioning capability exists on this device
    #[error("Geolocation is not supported on this device")]
    SourceUnavailable,

    /// A fix could not be delivered
    #[error("GPS Error: {message}")]
    Source { message: String, terminal: bool },

    /// A persisted collection could not be parsed
    #[error("Stored {collection} data is unreadable: {message}")]
    StoreCorrupt { collection: String, message: String },

    /// A persisted collection could not be written
    #[error("Could not save {collection}: {message}")]
    StoreWriteFailed { collection: String, message: String },

    /// Best-effort cache population failed
    #[error("Could not cache {key} in {generation}: {message}")]
    CacheWriteFailed {
        generation: String,
        key: String,
        message: String,
    },

    /// The network could not be reached for a fetch
    #[error("Network unavailable for {url}: {message}")]
    NetworkUnavailable { url: String, message: String },

    /// Export was requested with no records at all
    #[error("No data to export. Please record some roads or add infrastructure first.")]
    NothingToExport,

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl FieldError {
    /// Whether a session can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FieldError::Source { terminal, .. } => !terminal,
            FieldError::StoreCorrupt { .. }
            | FieldError::CacheWriteFailed { .. }
            | FieldError::NothingToExport => true,
            FieldError::Validation(_)
            | FieldError::SourceUnavailable
            | FieldError::StoreWriteFailed { .. }
            | FieldError::NetworkUnavailable { .. }
            | FieldError::Config { .. } => false,
        }
    }
}

impl From<ValidationError> for FieldError {
    fn from(err: ValidationError) -> Self {
        FieldError::Validation(err)
    }
}

/// Result type alias for road-monitor operations.
pub type Result<T> = std::result::Result<T, FieldError>;

/// Extension trait for converting Option to FieldError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a validation error.
    fn ok_or_invalid(self, reason: ValidationError) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid(self, reason: ValidationError) -> Result<T> {
        self.ok_or(FieldError::Validation(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FieldError::Source {
            message: "timeout expired".to_string(),
            terminal: false,
        };
        assert_eq!(err.to_string(), "GPS Error: timeout expired");

        let err = FieldError::StoreCorrupt {
            collection: "infrastructure".to_string(),
            message: "expected value at line 1".to_string(),
        };
        assert!(err.to_string().contains("infrastructure"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<&str> = None;
        let result = none.ok_or_invalid(ValidationError::MissingType);
        assert!(matches!(
            result,
            Err(FieldError::Validation(ValidationError::MissingType))
        ));
    }

    #[test]
    fn test_recoverability() {
        let transient = FieldError::Source {
            message: "timeout".to_string(),
            terminal: false,
        };
        let revoked = FieldError::Source {
            message: "permission denied".to_string(),
            terminal: true,
        };
        assert!(transient.is_recoverable());
        assert!(!revoked.is_recoverable());
        assert!(!FieldError::SourceUnavailable.is_recoverable());
    }
}
