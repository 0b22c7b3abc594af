//! Fault decision logic shared by ChaosLLM and ChaosWeb.
//!
//! Each request asks [`FaultInjector::decide`] once for an [`ErrorDecision`].
//! Categories are checked in a fixed priority order — connection faults
//! over HTTP-status faults over malformed-content faults — so that a
//! single roll never needs to reconcile two categories firing at once;
//! whichever category's independent probability check fires first wins.

use crate::config::{ConnectionFaultKind, FaultInjectionConfig, MalformedKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// What a single request should do, decided once up front.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDecision {
    /// Serve the response normally.
    Success,
    /// Fail at the connection layer: no clean HTTP response.
    Connection(ConnectionFaultKind),
    /// Serve an HTTP error status.
    Http { status: u16, retry_after_sec: Option<u64> },
    /// Serve a 200 with a corrupted body or headers.
    Malformed(MalformedKind),
}

impl ErrorDecision {
    /// `true` unless this is [`ErrorDecision::Success`].
    pub fn is_fault(&self) -> bool {
        !matches!(self, ErrorDecision::Success)
    }
}

struct BurstState {
    window_start: Instant,
    elevated: bool,
}

/// Decides, per request, whether and how to inject a fault.
///
/// Cloning shares the same configuration and RNG state — clone the
/// `Arc` wrapper used by the server rather than this struct directly
/// when a seeded run needs reproducible draws across handlers.
pub struct FaultInjector {
    config: Mutex<FaultInjectionConfig>,
    rng: Mutex<StdRng>,
    burst: Mutex<Option<BurstState>>,
}

impl FaultInjector {
    /// Build an injector from `config`; a configured seed makes every
    /// draw reproducible across a test run.
    pub fn new(config: FaultInjectionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config: Mutex::new(config), rng: Mutex::new(rng), burst: Mutex::new(None) }
    }

    /// The current configuration.
    pub fn config(&self) -> FaultInjectionConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration in place and reset the burst and RNG
    /// state so updated probabilities take effect immediately.
    pub fn update_config(&self, config: FaultInjectionConfig) {
        let mut rng = self.rng.lock();
        *rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        *self.config.lock() = config;
        *self.burst.lock() = None;
    }

    /// Reset burst-cycle tracking without touching configuration.
    pub fn reset(&self) {
        *self.burst.lock() = None;
    }

    fn burst_multiplier(&self) -> f64 {
        let config = self.config.lock();
        if !config.burst.enabled {
            return 1.0;
        }
        let mut burst = self.burst.lock();
        let now = Instant::now();
        let cycle = Duration::from_millis(config.burst.burst_duration_ms + config.burst.quiet_duration_ms);
        let elevated_for = Duration::from_millis(config.burst.burst_duration_ms);

        let state = burst.get_or_insert(BurstState { window_start: now, elevated: true });
        let elapsed = now.duration_since(state.window_start);
        if elapsed >= cycle {
            state.window_start = now;
            state.elevated = true;
        } else {
            state.elevated = elapsed < elevated_for;
        }

        if state.elevated {
            config.burst.multiplier
        } else {
            1.0
        }
    }

    /// Decide the outcome for one request. Connection faults are
    /// checked first, then HTTP-status faults, then malformed-content
    /// faults — see the module doc for why the order matters.
    pub fn decide(&self) -> ErrorDecision {
        let config = self.config.lock().clone();
        if !config.enabled {
            return ErrorDecision::Success;
        }
        let multiplier = self.burst_multiplier();
        let mut rng = self.rng.lock();

        if config.connection.enabled && rng.random::<f64>() < config.connection.probability * multiplier {
            let idx = rng.random_range(0..ConnectionFaultKind::ALL.len());
            return ErrorDecision::Connection(ConnectionFaultKind::ALL[idx]);
        }

        if config.http.enabled && !config.http.status_codes.is_empty() && rng.random::<f64>() < config.http.probability * multiplier {
            let idx = rng.random_range(0..config.http.status_codes.len());
            let status = config.http.status_codes[idx];
            let retry_after_sec = if status == 429 || status == 503 { Some(1) } else { None };
            return ErrorDecision::Http { status, retry_after_sec };
        }

        if config.malformed.enabled && rng.random::<f64>() < config.malformed.probability * multiplier {
            let idx = rng.random_range(0..MalformedKind::ALL.len());
            return ErrorDecision::Malformed(MalformedKind::ALL[idx]);
        }

        ErrorDecision::Success
    }

    /// Draw the artificial latency to sleep before responding, if any.
    pub fn latency(&self) -> Option<Duration> {
        let config = self.config.lock();
        if !config.latency.enabled {
            return None;
        }
        let mut rng = self.rng.lock();
        let jitter = if config.latency.jitter_ms == 0 { 0 } else { rng.random_range(0..=config.latency.jitter_ms) };
        Some(Duration::from_millis(config.latency.base_ms + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpErrorConfig;

    fn always_http(status_codes: Vec<u16>) -> FaultInjectionConfig {
        FaultInjectionConfig {
            seed: Some(1),
            http: HttpErrorConfig { enabled: true, probability: 1.0, status_codes },
            ..FaultInjectionConfig::default()
        }
    }

    #[test]
    fn disabled_injector_always_succeeds() {
        let injector = FaultInjector::new(FaultInjectionConfig { enabled: false, ..always_http(vec![500]) });
        for _ in 0..20 {
            assert_eq!(injector.decide(), ErrorDecision::Success);
        }
    }

    #[test]
    fn http_probability_one_always_fires() {
        let injector = FaultInjector::new(always_http(vec![503]));
        match injector.decide() {
            ErrorDecision::Http { status, retry_after_sec } => {
                assert_eq!(status, 503);
                assert_eq!(retry_after_sec, Some(1));
            }
            other => panic!("expected an http fault, got {other:?}"),
        }
    }

    #[test]
    fn connection_faults_take_priority_over_http() {
        let mut config = always_http(vec![500]);
        config.connection.enabled = true;
        config.connection.probability = 1.0;
        let injector = FaultInjector::new(config);
        assert!(matches!(injector.decide(), ErrorDecision::Connection(_)));
    }

    #[test]
    fn seeded_injector_is_deterministic() {
        let config = FaultInjectionConfig {
            seed: Some(42),
            http: HttpErrorConfig { enabled: true, probability: 0.5, status_codes: vec![500, 502, 503] },
            ..FaultInjectionConfig::default()
        };
        let a = FaultInjector::new(config.clone());
        let b = FaultInjector::new(config);
        let sequence_a: Vec<_> = (0..10).map(|_| a.decide()).collect();
        let sequence_b: Vec<_> = (0..10).map(|_| b.decide()).collect();
        assert_eq!(sequence_a, sequence_b);
    }

    #[test]
    fn reset_clears_burst_state_without_touching_config() {
        let mut config = FaultInjectionConfig::default();
        config.burst.enabled = true;
        let injector = FaultInjector::new(config);
        let _ = injector.decide();
        injector.reset();
        assert!(injector.burst.lock().is_none());
    }
}
