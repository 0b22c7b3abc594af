//! # elspeth-secrets
//!
//! Secret-backend resolution (spec §4.1, §6.2, §6.3): turns a
//! `secrets: {source, vault_url?, mapping}` config block into process
//! environment variables plus an audit trail of [`elspeth_core::model::SecretResolution`]
//! records. The plaintext value of a secret is never placed in a record,
//! never logged, and never crosses into the landscape recorder — only its
//! HMAC-SHA256 fingerprint does.

pub mod client;
pub mod error;
pub mod loader;

pub use client::{HttpKeyVaultClient, KeyVaultClient};
pub use error::{Error, Result};
pub use loader::load_secrets_from_config;
