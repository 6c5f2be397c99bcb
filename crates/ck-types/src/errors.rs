use thiserror::Error;

/// Main error type for the Candlekeep system
#[derive(Error, Debug)]
pub enum CkError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CkError {
    /// True for caller mistakes that must never be retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, CkError::Validation(_))
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, CkError::Upstream(_))
    }
}

/// Request validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid timeframe '{token}': {reason}")]
    InvalidTimeframe { token: String, reason: String },

    #[error("Exactly one of candles_back | hours_back | days_back | months_back | years_back is required, got {provided}")]
    SelectionCount { provided: usize },

    #[error("{mode} must be positive, got {value}")]
    NonPositiveSelection { mode: String, value: i64 },

    #[error("Unsupported category '{category}' (expected spot, linear or inverse)")]
    InvalidCategory { category: String },

    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Empty symbols list")]
    EmptySymbols,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Errors reported by, or on the way to, the remote kline API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Malformed response: {message}")]
    Decode { message: String },

    #[error("Gave up after {attempts} attempts, last failure: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<UpstreamError>,
    },
}

/// Cache and artifact persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("Cache corruption detected in {path}: {message}")]
    Corruption { path: String, message: String },
}

/// Result type alias for Candlekeep operations
pub type CkResult<T> = Result<T, CkError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CkError::Validation($crate::ValidationError::InvalidRequest {
            message: format!($($arg)*),
        })
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CkError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CkError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ValidationError::InvalidTimeframe {
            token: "7m".to_string(),
            reason: "Allowed minute timeframes: 1m,3m,5m,15m,30m".to_string(),
        };

        assert!(error.to_string().contains("7m"));
        assert!(error.to_string().contains("15m"));
    }

    #[test]
    fn test_error_conversion() {
        let upstream = UpstreamError::HttpStatus { status: 502 };
        let ck_error: CkError = upstream.into();

        match ck_error {
            CkError::Upstream(_) => (),
            _ => panic!("Expected Upstream error"),
        }
        assert!(CkError::from(ValidationError::EmptySymbols).is_validation());
    }

    #[test]
    fn test_exhaustion_reports_last_failure() {
        let error = UpstreamError::RetriesExhausted {
            attempts: 3,
            last: Box::new(UpstreamError::Remote {
                code: 10006,
                message: "Too many visits".to_string(),
            }),
        };

        assert!(error.to_string().contains("3 attempts"));
        assert!(error.to_string().contains("10006"));
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(validation_err.is_validation());
        let _internal_err = internal_error!("Something went wrong");
        let _config_err = config_error!("Missing required field: {}", "symbol");
    }
}
