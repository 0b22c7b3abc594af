//! Configuration for the fault injector shared by ChaosLLM and ChaosWeb.
//!
//! Mirrors the shape of the original Python `ErrorInjectionConfig` /
//! `ContentConfig` / `LatencyConfig` trio: one knob per fault category,
//! each independently enabled with its own probability, plus a burst
//! duty cycle that temporarily multiplies every probability.

use serde::{Deserialize, Serialize};

/// A malformed-content variant ChaosWeb can serve instead of a clean page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKind {
    /// `Content-Type: application/json` on an HTML (or vice versa) body.
    WrongContentType,
    /// Header claims UTF-8, body is Latin-1/Windows-1252 encoded.
    EncodingMismatch,
    /// HTML cut off mid-tag.
    TruncatedHtml,
    /// Body contains a byte sequence invalid for the declared charset.
    InvalidEncoding,
    /// `<meta charset>` disagrees with the real encoding.
    CharsetConfusion,
    /// `<meta charset>` tag itself is malformed.
    MalformedMeta,
}

impl MalformedKind {
    /// All variants, for random selection and admin introspection.
    pub const ALL: [MalformedKind; 6] = [
        MalformedKind::WrongContentType,
        MalformedKind::EncodingMismatch,
        MalformedKind::TruncatedHtml,
        MalformedKind::InvalidEncoding,
        MalformedKind::CharsetConfusion,
        MalformedKind::MalformedMeta,
    ];
}

/// A connection-level fault: the response never completes cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFaultKind {
    /// Sleep past the caller's expected deadline, then respond 504.
    Timeout,
    /// Drop the connection with no response at all.
    ConnectionReset,
    /// Hold the connection open with no bytes, then drop it.
    ConnectionStall,
    /// Send a truncated body and drop the connection mid-stream.
    IncompleteResponse,
}

impl ConnectionFaultKind {
    /// All variants, for random selection.
    pub const ALL: [ConnectionFaultKind; 4] = [
        ConnectionFaultKind::Timeout,
        ConnectionFaultKind::ConnectionReset,
        ConnectionFaultKind::ConnectionStall,
        ConnectionFaultKind::IncompleteResponse,
    ];
}

/// HTTP-status-level error injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorConfig {
    pub enabled: bool,
    pub probability: f64,
    pub status_codes: Vec<u16>,
}

impl Default for HttpErrorConfig {
    fn default() -> Self {
        Self { enabled: false, probability: 0.0, status_codes: vec![429, 500, 502, 503, 504, 529] }
    }
}

/// Connection-level error injection (resets, stalls, timeouts, truncation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionErrorConfig {
    pub enabled: bool,
    pub probability: f64,
    pub timeout_delay_ms: u64,
    pub incomplete_fraction: f64,
}

impl Default for ConnectionErrorConfig {
    fn default() -> Self {
        Self { enabled: false, probability: 0.0, timeout_delay_ms: 15_000, incomplete_fraction: 0.3 }
    }
}

/// Malformed-content injection: the response completes with status 200
/// but the body or headers are corrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedErrorConfig {
    pub enabled: bool,
    pub probability: f64,
}

impl Default for MalformedErrorConfig {
    fn default() -> Self {
        Self { enabled: false, probability: 0.0 }
    }
}

/// A temporary window of elevated fault probability, toggled on a duty
/// cycle of `burst_duration_ms` elevated, `quiet_duration_ms` normal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    pub enabled: bool,
    pub burst_duration_ms: u64,
    pub quiet_duration_ms: u64,
    pub multiplier: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self { enabled: false, burst_duration_ms: 5_000, quiet_duration_ms: 30_000, multiplier: 5.0 }
    }
}

/// Artificial response latency, independent of any error injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub enabled: bool,
    pub base_ms: u64,
    pub jitter_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self { enabled: false, base_ms: 0, jitter_ms: 0 }
    }
}

/// How ChaosLLM fabricates a successful chat-completion body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// A random sentence from a built-in corpus.
    Random,
    /// A fixed template string, `{input}` substituted with the request.
    Template,
    /// Echo the last user message back verbatim.
    Echo,
    /// Cycle deterministically through a configured preset list.
    Preset,
}

/// Top-level configuration for a chaos harness instance. Shared by both
/// ChaosLLM and ChaosWeb; the mock-content fields are read only by the
/// handler that needs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    pub seed: Option<u64>,
    pub http: HttpErrorConfig,
    pub connection: ConnectionErrorConfig,
    pub malformed: MalformedErrorConfig,
    pub burst: BurstConfig,
    pub latency: LatencyConfig,
    pub response_mode: ResponseMode,
    pub preset_responses: Vec<String>,
    pub template: String,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: None,
            http: HttpErrorConfig::default(),
            connection: ConnectionErrorConfig::default(),
            malformed: MalformedErrorConfig::default(),
            burst: BurstConfig::default(),
            latency: LatencyConfig::default(),
            response_mode: ResponseMode::Random,
            preset_responses: Vec::new(),
            template: "You said: {input}".to_string(),
        }
    }
}
