//! `load_secrets_from_config`: the single entry point that turns a
//! [`SecretsConfig`] into environment variables plus an audit trail,
//! never letting a plaintext secret value escape into the latter.

use crate::client::KeyVaultClient;
use crate::error::{Error, Result};
use chrono::Utc;
use elspeth_core::config::SecretsConfig;
use elspeth_core::ids::RunId;
use elspeth_core::model::{SecretResolution, SecretSource};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Instant;

/// Resolve every secret in `config.mapping`, inject each into the process
/// environment under its mapped name, and return one audit record per
/// secret — fingerprinted, never carrying the plaintext.
///
/// When `config.source` is `env`, this is a no-op: the caller is expected
/// to already have the relevant variables set, and an empty list is
/// returned. When it is `keyvault`, every mapped secret is fetched through
/// `client`. `ELSPETH_FINGERPRINT_KEY` must already be set, or itself be
/// present in `config.mapping`, before any vault call is made — otherwise
/// this returns [`Error::MissingFingerprintKey`] without touching the
/// network. If it is mapped, it is always resolved first regardless of
/// where it appears in the mapping, so later entries can be fingerprinted
/// with it.
pub async fn load_secrets_from_config(
    run_id: RunId,
    config: &SecretsConfig,
    client: &dyn KeyVaultClient,
) -> Result<Vec<SecretResolution>> {
    match config.source {
        SecretSource::Env => Ok(Vec::new()),
        SecretSource::Keyvault => load_from_keyvault(run_id, config, client).await,
    }
}

async fn load_from_keyvault(run_id: RunId, config: &SecretsConfig, client: &dyn KeyVaultClient) -> Result<Vec<SecretResolution>> {
    let vault_url = config.vault_url.clone().ok_or(Error::MissingVaultUrl)?;

    let fingerprint_key_entry = config.mapping.get_key_value(elspeth_hash::FINGERPRINT_KEY_ENV);
    let mut fingerprint_key = std::env::var(elspeth_hash::FINGERPRINT_KEY_ENV).ok();
    if fingerprint_key.is_none() && fingerprint_key_entry.is_none() {
        return Err(Error::MissingFingerprintKey);
    }

    // Resolve the fingerprint key entry first, regardless of mapping
    // order, so every other secret can be fingerprinted with it.
    let mut ordered: Vec<(&String, &String)> = Vec::with_capacity(config.mapping.len());
    if let Some((env_var_name, secret_name)) = fingerprint_key_entry {
        ordered.push((env_var_name, secret_name));
    }
    for (env_var_name, secret_name) in &config.mapping {
        if env_var_name != elspeth_hash::FINGERPRINT_KEY_ENV {
            ordered.push((env_var_name, secret_name));
        }
    }

    let mut resolutions = Vec::with_capacity(ordered.len());
    for (env_var_name, secret_name) in ordered {
        let started = Instant::now();
        let value = client.get_secret(&vault_url, secret_name, env_var_name).await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        std::env::set_var(env_var_name, &value);
        if env_var_name == elspeth_hash::FINGERPRINT_KEY_ENV {
            fingerprint_key = Some(value.clone());
        }

        let key = fingerprint_key
            .as_deref()
            .expect("fingerprint key is resolved before the first secret is fingerprinted");
        resolutions.push(SecretResolution {
            run_id: run_id.clone(),
            env_var_name: env_var_name.clone(),
            source: SecretSource::Keyvault,
            vault_url: Some(vault_url.clone()),
            secret_name: secret_name.clone(),
            latency_ms,
            timestamp: Utc::now(),
            fingerprint: fingerprint_hex(key, &value),
        });
    }

    Ok(resolutions)
}

fn fingerprint_hex(key: &str, value: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(value.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
