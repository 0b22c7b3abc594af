//! Audited HTTP client (spec §4.5): every request goes through the SSRF
//! boundary, is timed, is recorded through [`PluginContext::record_call`],
//! and emits a `tracing` event, whether it succeeds or fails.
//!
//! Redirects are followed manually rather than left to `reqwest`'s
//! built-in policy so that every hop's host can be re-checked against the
//! SSRF boundary before the client connects to it.

use crate::error::{is_capacity_status, NetError, Result};
use elspeth_core::model::CallStatus;
use elspeth_core::plugin::PluginContext;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Instant;
use url::Url;

/// Default cap on redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: u8 = 10;

/// The outcome of one audited request: the final response's status,
/// headers-derived content type, and body, after following any redirects.
#[derive(Debug)]
pub struct AuditedResponse {
    /// Final HTTP status code, after following redirects.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// How many requests (including redirect hops) this call made.
    pub hops: u32,
}

/// An SSRF-guarded `reqwest` client that audits every request it makes
/// through a run's landscape recorder.
pub struct AuditedHttpClient {
    http: reqwest::Client,
    max_redirects: u8,
}

impl AuditedHttpClient {
    /// Build a client around an existing `reqwest::Client`. The client
    /// should be built with `redirect::Policy::none()` — `AuditedHttpClient`
    /// performs its own redirect following so each hop passes the SSRF
    /// check.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Override the redirect cap.
    pub fn with_max_redirects(mut self, max_redirects: u8) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Perform one audited HTTP request. `body` is recorded verbatim as
    /// the request payload (and sent as the request body, JSON-encoded,
    /// when present).
    pub async fn request(&self, ctx: &PluginContext, method: Method, url: &str, body: Option<&Value>) -> Result<AuditedResponse> {
        let started = Instant::now();
        let request_data = json!({
            "method": method.as_str(),
            "url": url,
            "body": body,
        });
        let outcome = self.follow(method, url, body).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome {
            Ok(response) => {
                let response_data = response_to_value(response);
                tracing::info!(target: "elspeth_net", url, status = response.status, latency_ms, "external http call completed");
                ctx.record_call(
                    elspeth_core::model::CallType::Http,
                    CallStatus::Success,
                    &request_data,
                    Some(&response_data),
                    None,
                    Some(latency_ms),
                )
                .await?;
            }
            Err(err) => {
                let error_data = json!({ "message": err.to_string() });
                tracing::warn!(target: "elspeth_net", url, latency_ms, error = %err, "external http call failed");
                ctx.record_call(
                    elspeth_core::model::CallType::Http,
                    CallStatus::Error,
                    &request_data,
                    None,
                    Some(&error_data),
                    Some(latency_ms),
                )
                .await?;
            }
        }

        outcome
    }

    async fn follow(&self, method: Method, url: &str, body: Option<&Value>) -> Result<AuditedResponse> {
        let mut current = url.to_string();
        let mut current_method = method;
        let mut hops = 0u32;

        loop {
            let parsed = Url::parse(&current).map_err(|_| NetError::InvalidRedirect { url: current.clone() })?;
            let host = parsed.host_str().ok_or_else(|| NetError::InvalidRedirect { url: current.clone() })?;
            let port = parsed.port_or_known_default().unwrap_or(443);
            crate::ssrf::check_host(host, port).await?;

            let mut request = self.http.request(current_method.clone(), &current);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(|source| NetError::Transport { url: current.clone(), source })?;

            let status = response.status();
            if status.is_redirection() {
                hops += 1;
                if hops > self.max_redirects as u32 {
                    return Err(NetError::TooManyRedirects { url: url.to_string() });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| NetError::InvalidRedirect { url: current.clone() })?;
                current = parsed
                    .join(location)
                    .map_err(|_| NetError::InvalidRedirect { url: current.clone() })?
                    .to_string();
                // 303 always downgrades to GET; other redirects preserve the method.
                if status == StatusCode::SEE_OTHER {
                    current_method = Method::GET;
                }
                continue;
            }

            let status_code = status.as_u16();
            let body_bytes = response.bytes().await.map_err(|source| NetError::Transport { url: current.clone(), source })?.to_vec();

            if is_capacity_status(status_code) {
                return Err(NetError::Capacity { url: current, status: status_code });
            }
            if status.is_client_error() || status.is_server_error() {
                return Err(NetError::Http { url: current, status: status_code });
            }

            return Ok(AuditedResponse {
                status: status_code,
                body: body_bytes,
                hops,
            });
        }
    }
}

fn response_to_value(response: &AuditedResponse) -> Value {
    json!({
        "status": response.status,
        "hops": response.hops,
        "body_len": response.body.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_statuses_are_classified() {
        assert!(is_capacity_status(429));
        assert!(is_capacity_status(503));
        assert!(is_capacity_status(529));
        assert!(!is_capacity_status(500));
        assert!(!is_capacity_status(404));
    }
}
