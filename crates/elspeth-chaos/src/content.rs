//! Response bodies ChaosWeb serves for each [`crate::fault::ErrorDecision`]
//! variant, and the plain-HTML page served on success.

use crate::config::MalformedKind;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// A normal page for a path that wasn't selected for fault injection.
pub fn success_page(path: &str) -> Response {
    let body = format!(
        "<!doctype html><html><head><title>chaosweb</title></head><body><h1>{path}</h1><p>ok</p></body></html>"
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
}

/// An HTML error page for an HTTP-status fault, with an optional
/// `Retry-After` header for throttling-flavored statuses.
pub fn http_error_page(status: u16, retry_after_sec: Option<u64>) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = format!(
        "<!doctype html><html><head><title>{code}</title></head><body><h1>{code}</h1></body></html>"
    );
    let mut response = (code, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response();
    if let Some(seconds) = retry_after_sec {
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// A 200 response with a body or headers corrupted the way `kind`
/// describes. Every variant returns status 200 — the defect is in the
/// content, not the transport, matching how a misconfigured upstream
/// would actually fail.
pub fn malformed_page(kind: MalformedKind, path: &str) -> Response {
    match kind {
        MalformedKind::WrongContentType => {
            let body = format!("{{\"path\": \"{path}\", \"note\": \"json body, html content-type\"}}");
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
        }
        MalformedKind::EncodingMismatch => {
            // Header claims utf-8; body bytes are latin-1, so a
            // non-ASCII byte decodes to mojibake under utf-8.
            let mut body = format!("<html><body>{path} caf").into_bytes();
            body.push(0xE9); // 'é' in latin-1, invalid utf-8 continuation on its own
            body.extend_from_slice(b"</body></html>");
            let mut response = (StatusCode::OK, body).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            response
        }
        MalformedKind::TruncatedHtml => {
            let body = format!("<!doctype html><html><head><title>{path}</title></head><body><div class=");
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
        }
        MalformedKind::InvalidEncoding => {
            let mut body = b"<html><body>bad byte: ".to_vec();
            body.push(0xFF);
            body.extend_from_slice(b"</body></html>");
            let mut response = (StatusCode::OK, body).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            response
        }
        MalformedKind::CharsetConfusion => {
            let body = format!(
                "<!doctype html><html><head><meta charset=\"windows-1252\"></head><body>{path}</body></html>"
            );
            let mut response = (StatusCode::OK, body).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            response
        }
        MalformedKind::MalformedMeta => {
            let body = format!(
                "<!doctype html><html><head><meta charset=></head><body>{path}</body></html>"
            );
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
        }
    }
}

/// A response that sends a truncated body and ends the stream without
/// closing it cleanly — axum's `Body::from` over a bounded byte buffer
/// with no `Content-Length` makes the runtime close the connection once
/// the buffer is exhausted, which is the closest idiomatic analogue to
/// the original's mid-stream disconnect.
pub fn incomplete_response(path: &str, fraction: f64) -> Response {
    let full = format!(
        "<!doctype html><html><head><title>{path}</title></head><body>{}</body></html>",
        "x".repeat(4096)
    );
    let cut = ((full.len() as f64) * fraction.clamp(0.0, 1.0)) as usize;
    let truncated = full.as_bytes()[..cut].to_vec();
    let mut response = Response::new(Body::from(truncated));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    response
}
