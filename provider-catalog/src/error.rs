//! Error mapping for catalog server responses

use bridge_traits::catalog::CatalogError;
use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpResponse;
use serde::Deserialize;

/// Result type for catalog client operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// FastAPI-style error body: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Best-effort human readable reason for a failed response.
pub(crate) fn response_detail(response: &HttpResponse) -> String {
    if let Ok(ErrorBody {
        detail: Some(detail),
    }) = response.json::<ErrorBody>()
    {
        return match detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
    }

    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim();
    if text.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, truncate(text, 200))
    }
}

/// Transport failures on any endpoint mean the server could not be reached.
pub(crate) fn unreachable(error: BridgeError) -> CatalogError {
    CatalogError::Unreachable(error.to_string())
}

/// Map a non-success status from an authenticated endpoint.
pub(crate) fn auth_status_error(response: &HttpResponse, limit: u32) -> CatalogError {
    match response.status {
        401 | 403 => CatalogError::Unauthorized(response_detail(response)),
        402 => CatalogError::UploadLimitReached { limit },
        400 | 413 | 415 | 422 => CatalogError::InvalidUpload(response_detail(response)),
        _ => CatalogError::Protocol(response_detail(response)),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
