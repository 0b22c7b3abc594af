//! Structured logging initializer and telemetry event types (spec §6.4,
//! expansion §6.6).
//!
//! Library code in this workspace never installs a global subscriber
//! itself — only binaries and tests call [`init_tracing`]. Everywhere else,
//! code just calls `tracing::info!`/`debug!`/etc. and trusts that whoever
//! is running the process wired up a subscriber.

use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` formatter driven by `RUST_LOG` (or
/// `default_level` if unset). Intended for `main()` functions and
/// integration tests, not library code.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Telemetry events emitted through `PluginContext::telemetry_emit`.
/// Payloads are deep-copied at record time, not at emit time, so
/// mutating a request/response map after `record_call` returns cannot
/// retroactively change what was reported here.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// An external call (HTTP/LLM/SQL/FS) finished.
    ExternalCallCompleted {
        /// The node that made the call.
        node_id: String,
        /// The call's kind, e.g. `"HTTP"`.
        call_type: String,
        /// Whether it succeeded.
        success: bool,
        /// Observed latency in milliseconds.
        latency_ms: Option<u64>,
        /// Immutable snapshot of the request payload at record time.
        request_snapshot: Value,
        /// Immutable snapshot of the response payload at record time, if
        /// any.
        response_snapshot: Option<Value>,
    },
}

impl TelemetryEvent {
    /// Build an `ExternalCallCompleted` event, deep-copying both payloads
    /// immediately so later mutation of the caller's originals cannot
    /// affect this event.
    pub fn external_call_completed(
        node_id: impl Into<String>,
        call_type: impl Into<String>,
        success: bool,
        latency_ms: Option<u64>,
        request: &Value,
        response: Option<&Value>,
    ) -> Self {
        Self::ExternalCallCompleted {
            node_id: node_id.into(),
            call_type: call_type.into(),
            success,
            latency_ms,
            request_snapshot: request.clone(),
            response_snapshot: response.cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_snapshot_is_independent_of_later_mutation() {
        let mut request = json!({"url": "https://example.com"});
        let event = TelemetryEvent::external_call_completed("node_1", "HTTP", true, Some(12), &request, None);
        request["url"] = json!("https://mutated.example.com");

        let TelemetryEvent::ExternalCallCompleted { request_snapshot, .. } = event;
        assert_eq!(request_snapshot["url"], json!("https://example.com"));
    }
}
