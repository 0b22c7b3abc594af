//! # elspeth-chaos
//!
//! ChaosLLM and ChaosWeb: fault-injecting mock HTTP services used by
//! plugin integration tests. Each exposes an OpenAI-compatible chat
//! completion endpoint (ChaosLLM) or a generic catch-all page (ChaosWeb),
//! with an `/admin/{config,stats,reset,export}` control surface to
//! reconfigure fault probabilities and inspect what was injected.

pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod fault;
pub mod llm;
pub mod metrics;
pub mod server;

pub use config::FaultInjectionConfig;
pub use error::{ChaosError, Result};
pub use fault::{ErrorDecision, FaultInjector};
pub use server::ChaosServer;

use axum::Router;
use std::sync::Arc;

/// Build a ready-to-serve ChaosLLM [`Router`] from `config`.
pub fn chaos_llm(config: FaultInjectionConfig) -> Result<Router> {
    let server = ChaosServer::new(config)?;
    Ok(api::chaos_llm_router(server))
}

/// Build a ready-to-serve ChaosWeb [`Router`] from `config`.
pub fn chaos_web(config: FaultInjectionConfig) -> Result<Router> {
    let server = ChaosServer::new(config)?;
    Ok(api::chaos_web_router(server))
}

/// Build both harnesses sharing one [`ChaosServer`] — one fault
/// configuration and metrics set driving both endpoints, for tests
/// that exercise an LLM call and a web scrape through the same
/// `/admin/reset` cycle.
pub fn chaos_combined(config: FaultInjectionConfig) -> Result<Router> {
    let server = ChaosServer::new(config)?;
    Ok(Router::new().merge(api::chaos_llm_router(server.clone())).fallback_service(api::chaos_web_router(server)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn all_faults_off() -> FaultInjectionConfig {
        FaultInjectionConfig { enabled: false, ..FaultInjectionConfig::default() }
    }

    #[tokio::test]
    async fn chaos_llm_serves_a_completion_when_no_fault_fires() {
        let app = chaos_llm(all_faults_off()).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_config_roundtrips() {
        let app = chaos_web(all_faults_off()).unwrap();
        let request = Request::builder().uri("/admin/config").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn chaos_web_serves_success_page_for_any_path() {
        let app = chaos_web(all_faults_off()).unwrap();
        let request = Request::builder().uri("/scrape/anything").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
