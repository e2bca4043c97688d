//! Error taxonomy for the transfer engine.
//!
//! One flat enum, following this codebase's convention of concrete
//! `thiserror` enums rather than a dynamic catch-all. Buffer-pool
//! exhaustion is deliberately not a member here — it is back-pressure,
//! modeled as an `.await` on a semaphore, never a `Result::Err`.

use thiserror::Error;

/// Errors produced anywhere in the transfer pipeline.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// A caller passed an invalid combination of arguments (client bug).
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// An asset was rejected before any network I/O was attempted.
    #[error("File cannot be uploaded: {0}")]
    Unsupported(String),

    /// The server responded, but with a status outside the 2xx range.
    #[error("HTTP {status}: {body_excerpt}")]
    HttpResponse {
        status: u16,
        /// Up to 10,000 chars of a text/* response body.
        body_excerpt: String,
    },

    /// The request never reached the server (DNS, TCP, TLS handshake).
    #[error("connect error: {0}")]
    HttpConnect(String),

    /// The response body was cut short or the connection dropped mid-stream.
    #[error("stream error: {0}")]
    HttpStream(String),

    /// A Range GET response did not honor the requested range.
    #[error("range violation: requested {requested_len} bytes, server returned {actual_len}")]
    RangeViolation { requested_len: u64, actual_len: u64 },

    /// A DAM response (or other structured response) failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Local file I/O failure (open/seek/read/write/preallocate).
    #[error("file I/O error: {0}")]
    Io(String),
}

impl TransferError {
    /// DAM-style error code, used in `fileerror` events.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::IllegalArgument(_) => "EINVAL",
            TransferError::Unsupported(_) => "EUNKNOWN",
            TransferError::HttpResponse { status, .. } => status_to_code(*status),
            TransferError::HttpConnect(_) => "ECONNECTION",
            TransferError::HttpStream(_) => "ESTREAM",
            TransferError::RangeViolation { .. } => "ERANGE",
            TransferError::Validation(_) => "EVALIDATION",
            TransferError::Io(_) => "EIO",
        }
    }

    /// HTTP status-code mapping per the documented table (§6.6).
    pub fn status_code(&self) -> u16 {
        match self {
            TransferError::HttpResponse { status, .. } => *status,
            TransferError::IllegalArgument(_) => 400,
            TransferError::Unsupported(_) => 501,
            TransferError::HttpConnect(_) => 500,
            TransferError::HttpStream(_) => 500,
            TransferError::RangeViolation { .. } => 500,
            TransferError::Validation(_) => 400,
            TransferError::Io(_) => 500,
        }
    }

    /// Whether the retry engine should retry this error.
    ///
    /// `HttpResponseError` with status >= 500 is retryable; 4xx is not
    /// unless `retryAllErrors`. `HttpConnectError`/`HttpStreamError` are
    /// always retryable. Validation and illegal-argument errors never are.
    pub fn is_retryable(&self, retry_all_errors: bool) -> bool {
        match self {
            TransferError::HttpResponse { status, .. } => *status >= 500 || retry_all_errors,
            TransferError::HttpConnect(_) | TransferError::HttpStream(_) => true,
            TransferError::IllegalArgument(_)
            | TransferError::Unsupported(_)
            | TransferError::Validation(_)
            | TransferError::RangeViolation { .. }
            | TransferError::Io(_) => retry_all_errors,
        }
    }
}

fn status_to_code(status: u16) -> &'static str {
    match status {
        409 => "EALREADYEXISTS",
        403 => "EFORBIDDEN",
        400 => "EINVALIDOPTIONS",
        401 => "ENOTAUTHORIZED",
        404 => "ENOTFOUND",
        413 => "ETOOLARGE",
        501 => "ENOTSUPPORTED",
        429 => "ETOOMANYREQUESTS",
        _ => "EUNKNOWN",
    }
}

/// Known DAM error codes mapped back to a status, per §6.6.
pub fn code_to_status(code: &str) -> u16 {
    match code {
        "ALREADY_EXISTS" => 409,
        "FORBIDDEN" => 403,
        "INVALID_OPTIONS" => 400,
        "NOT_AUTHORIZED" => 401,
        "NOT_FOUND" => 404,
        "TOO_LARGE" => 413,
        "NOT_SUPPORTED" => 501,
        "TOO_MANY_REQUESTS" => 429,
        _ => 500,
    }
}
