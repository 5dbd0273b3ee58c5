use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Main error type for the sparrow-notifier service
#[derive(Debug)]
pub enum SparrowError {
    // Change source errors
    FirebaseDatabase(String),

    // Push delivery errors
    FcmDelivery(String),
    FcmInvalidToken(String),
    FcmQuotaExceeded,
    FcmAuth(String),

    // Network and HTTP client errors
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),
    InvalidUrl(String),

    // Serialization and parsing errors
    JsonParsing(String),
    JsonSerialization(String),

    // Configuration and lifecycle errors
    ConfigurationMissing(String),
    InvalidConfiguration(String),
    ChannelClosed,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

impl fmt::Display for SparrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparrowError::FirebaseDatabase(msg) => write!(f, "Firebase database error: {}", msg),

            SparrowError::FcmDelivery(msg) => write!(f, "FCM delivery error: {}", msg),
            SparrowError::FcmInvalidToken(msg) => write!(f, "Invalid FCM token: {}", msg),
            SparrowError::FcmQuotaExceeded => write!(f, "FCM quota exceeded"),
            SparrowError::FcmAuth(msg) => write!(f, "FCM authorization error: {}", msg),

            SparrowError::NetworkTimeout => write!(f, "Network request timed out"),
            SparrowError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            SparrowError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),
            SparrowError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),

            SparrowError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            SparrowError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),

            SparrowError::ConfigurationMissing(what) => write!(f, "Configuration missing: {}", what),
            SparrowError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            SparrowError::ChannelClosed => write!(f, "Communication channel closed"),
        }
    }
}

impl std::error::Error for SparrowError {}

impl IntoResponse for SparrowError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            SparrowError::ConfigurationMissing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_missing"),
            SparrowError::InvalidConfiguration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_configuration"),
            SparrowError::InvalidUrl(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_url"),
            SparrowError::FcmAuth(_) => (StatusCode::BAD_GATEWAY, "fcm_auth"),
            SparrowError::FirebaseDatabase(_)
            | SparrowError::NetworkTimeout
            | SparrowError::NetworkConnection(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let error_response = ErrorResponse {
            success: false,
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type SparrowResult<T> = Result<T, SparrowError>;

impl From<reqwest::Error> for SparrowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SparrowError::NetworkTimeout
        } else if err.is_connect() {
            SparrowError::NetworkConnection(err.to_string())
        } else if err.is_decode() {
            SparrowError::JsonParsing(err.to_string())
        } else {
            SparrowError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SparrowError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() {
            SparrowError::JsonParsing(err.to_string())
        } else {
            SparrowError::JsonSerialization(err.to_string())
        }
    }
}

// Helper functions for creating common errors
impl SparrowError {
    pub fn configuration_missing(what: impl Into<String>) -> Self {
        SparrowError::ConfigurationMissing(what.into())
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        SparrowError::InvalidConfiguration(msg.into())
    }

    /// Failed reads of the store. They cost the current event only and are
    /// logged as warnings.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            SparrowError::FirebaseDatabase(_)
                | SparrowError::NetworkTimeout
                | SparrowError::NetworkConnection(_)
                | SparrowError::JsonParsing(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SparrowError::ConfigurationMissing(_) | SparrowError::InvalidConfiguration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SparrowError::FirebaseDatabase("users/u1: permission denied".to_string());
        assert_eq!(error.to_string(), "Firebase database error: users/u1: permission denied");

        let error = SparrowError::configuration_missing("FIREBASE_SERVICE_ACCOUNT");
        assert_eq!(error.to_string(), "Configuration missing: FIREBASE_SERVICE_ACCOUNT");
    }

    #[test]
    fn test_helper_functions() {
        assert!(SparrowError::configuration_missing("x").is_configuration());
        assert!(SparrowError::invalid_configuration("x").is_configuration());
        assert!(!SparrowError::ChannelClosed.is_configuration());
    }

    #[test]
    fn test_lookup_classification() {
        assert!(SparrowError::FirebaseDatabase("boom".into()).is_lookup_failure());
        assert!(SparrowError::NetworkTimeout.is_lookup_failure());
        assert!(!SparrowError::FcmDelivery("boom".into()).is_lookup_failure());
        assert!(!SparrowError::FcmAuth("boom".into()).is_lookup_failure());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(SparrowError::from(err), SparrowError::JsonParsing(_)));
    }

    #[test]
    fn test_into_response_status() {
        let response = SparrowError::configuration_missing("FIREBASE_SERVICE_ACCOUNT").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = SparrowError::FirebaseDatabase("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
