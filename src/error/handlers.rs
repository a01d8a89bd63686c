//! Standardized mapping of HTTP responses and transport failures into [`ApiError`]

use crate::error::ApiError;
use reqwest::StatusCode;

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Classify a non-success registry response
    ///
    /// Distribution registries report their error codes in a JSON body
    /// (`{"errors":[{"code":"NAME_UNKNOWN",...}]}`); the code takes precedence over
    /// the status where both are meaningful.
    pub fn classify(status: StatusCode, error_text: &str, context: &str) -> ApiError {
        if error_text.contains("NAME_UNKNOWN") || error_text.contains("BLOB_UNKNOWN") {
            return ApiError::NotFound(format!("{}: {}", context, error_text));
        }
        if error_text.contains("DIGEST_INVALID") || error_text.contains("SIZE_INVALID") {
            return ApiError::InvalidLayer(format!("{}: {}", context, error_text));
        }
        if error_text.contains("BLOB_UPLOAD_INVALID") || error_text.contains("RANGE_INVALID") {
            return ApiError::InvalidLayer(format!(
                "{} rejected the byte range: {}",
                context, error_text
            ));
        }

        let message = match status.as_u16() {
            400 => format!("Bad request during {}: {}", context, error_text),
            401 => format!("Authentication failed during {}: {}", context, error_text),
            403 => format!("Permission denied for {}: {}", context, error_text),
            404 => return ApiError::NotFound(format!("{}: {}", context, error_text)),
            409 => format!("Conflict during {}: {}", context, error_text),
            413 => format!("Payload too large for {}: {}", context, error_text),
            416 => {
                return ApiError::InvalidLayer(format!(
                    "{} range not satisfiable: {}",
                    context, error_text
                ));
            }
            429 => format!("Rate limited during {}: {}", context, error_text),
            500 => format!("Registry server error during {}: {}", context, error_text),
            502 | 503 => format!("Registry unavailable during {}: {}", context, error_text),
            _ => format!("{} failed (status {}): {}", context, status, error_text),
        };

        ApiError::Service(message)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> ApiError {
        if error.is_timeout() {
            ApiError::Transport(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            ApiError::Transport(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            ApiError::Transport(format!(
                "TLS certificate error during {}: {}",
                context, error
            ))
        } else {
            ApiError::Transport(format!("{} network error: {}", context, error))
        }
    }
}
