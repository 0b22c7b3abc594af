//! The seam between the loader and whichever vault backend is wired in.
//!
//! Production code talks to a real vault through [`HttpKeyVaultClient`];
//! tests substitute an in-memory double so no network call ever happens
//! in the unit-test suite.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

/// Fetches one secret's plaintext value from a key-vault backend.
///
/// Implementations receive the mapped env var name purely so error
/// variants can report it; the fetch itself only needs `vault_url` and
/// `secret_name`.
#[async_trait]
pub trait KeyVaultClient: Send + Sync {
    /// Fetch `secret_name` from `vault_url`. `env_var_name` is carried
    /// through into any error for operator-facing context.
    async fn get_secret(&self, vault_url: &str, secret_name: &str, env_var_name: &str) -> Result<String>;
}

/// Talks to a Key Vault-style REST API: `GET {vault_url}/secrets/{name}`,
/// bearer-authenticated from an access token held in an environment
/// variable (`AZURE_KEYVAULT_TOKEN` by default). Full AAD credential
/// negotiation is left to whatever process places that token there.
pub struct HttpKeyVaultClient {
    http: reqwest::Client,
    token_env_var: String,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    value: String,
}

impl HttpKeyVaultClient {
    /// Build a client that reads its bearer token from `AZURE_KEYVAULT_TOKEN`.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            token_env_var: "AZURE_KEYVAULT_TOKEN".to_string(),
        }
    }

    /// Build a client that reads its bearer token from a custom env var.
    pub fn with_token_env_var(http: reqwest::Client, token_env_var: impl Into<String>) -> Self {
        Self {
            http,
            token_env_var: token_env_var.into(),
        }
    }
}

#[async_trait]
impl KeyVaultClient for HttpKeyVaultClient {
    async fn get_secret(&self, vault_url: &str, secret_name: &str, env_var_name: &str) -> Result<String> {
        let token = std::env::var(&self.token_env_var).map_err(|_| Error::AuthenticationFailed {
            vault_url: vault_url.to_string(),
            detail: format!(
                "no bearer token found in {}; set it to a valid Key Vault access token",
                self.token_env_var
            ),
        })?;

        let url = format!("{}/secrets/{}?api-version=7.4", vault_url.trim_end_matches('/'), secret_name);
        let response = self.http.get(&url).bearer_auth(token).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: SecretResponse = response.json().await?;
                Ok(body.value)
            }
            StatusCode::NOT_FOUND => Err(Error::SecretNotFound {
                env_var_name: env_var_name.to_string(),
                secret_name: secret_name.to_string(),
                vault_url: vault_url.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthenticationFailed {
                vault_url: vault_url.to_string(),
                detail: format!("vault rejected the request with status {}", response.status()),
            }),
            status => Err(Error::RequestFailed {
                env_var_name: env_var_name.to_string(),
                secret_name: secret_name.to_string(),
                vault_url: vault_url.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory vault double, keyed by secret name, mirroring the
    /// mocked `_get_keyvault_client` pattern used against the real thing.
    pub struct MockKeyVaultClient {
        secrets: HashMap<String, String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockKeyVaultClient {
        pub fn new(secrets: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
            Self {
                secrets: secrets.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KeyVaultClient for MockKeyVaultClient {
        async fn get_secret(&self, vault_url: &str, secret_name: &str, env_var_name: &str) -> Result<String> {
            self.calls.lock().unwrap().push(secret_name.to_string());
            self.secrets
                .get(secret_name)
                .cloned()
                .ok_or_else(|| Error::SecretNotFound {
                    env_var_name: env_var_name.to_string(),
                    secret_name: secret_name.to_string(),
                    vault_url: vault_url.to_string(),
                })
        }
    }
}
