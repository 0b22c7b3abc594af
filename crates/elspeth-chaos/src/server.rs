//! Ties the fault injector, metrics, and response generators into one
//! shared harness state, regardless of which router mounts it.

use crate::config::FaultInjectionConfig;
use crate::fault::FaultInjector;
use crate::llm::ChatResponder;
use crate::metrics::ChaosMetrics;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;

/// Shared state for one chaos harness process. Both the ChaosLLM and
/// ChaosWeb routers mount the same `Arc<ChaosServer>`, so `/admin/*`
/// reconfigures and resets both at once — mirroring the original
/// harness's single admin surface over one running process.
pub struct ChaosServer {
    pub injector: Arc<FaultInjector>,
    pub responder: ChatResponder,
    pub metrics: Arc<ChaosMetrics>,
    run_id: RwLock<String>,
}

impl ChaosServer {
    /// Build a harness from `config`, wiring a fresh metrics registry
    /// and a responder seeded the same way as the fault injector.
    pub fn new(config: FaultInjectionConfig) -> crate::error::Result<Arc<Self>> {
        let seed = config.seed;
        Ok(Arc::new(Self {
            injector: Arc::new(FaultInjector::new(config)),
            responder: ChatResponder::new(seed),
            metrics: Arc::new(ChaosMetrics::new()?),
            run_id: RwLock::new(new_run_id()),
        }))
    }

    /// The identifier for the current run, assigned at construction and
    /// replaced on every `/admin/reset`.
    pub fn run_id(&self) -> String {
        self.run_id.read().clone()
    }

    /// Replace the fault-injection configuration in place.
    pub fn update_config(&self, config: FaultInjectionConfig) {
        tracing::info!(enabled = config.enabled, seed = ?config.seed, "chaos config updated");
        self.injector.update_config(config);
    }

    /// Reset burst-cycle state and assign a new run id, the way the
    /// original harness's `reset()` starts a fresh measurement window
    /// without restarting the process.
    pub fn reset(&self) {
        self.injector.reset();
        let run_id = new_run_id();
        tracing::info!(previous_run_id = %self.run_id(), new_run_id = %run_id, "chaos harness reset");
        *self.run_id.write() = run_id;
    }
}

fn new_run_id() -> String {
    let mut rng = rand::rng();
    format!("run-{:016x}", rng.random::<u64>())
}
