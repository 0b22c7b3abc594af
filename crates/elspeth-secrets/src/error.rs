//! Error taxonomy for secret resolution.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading secrets from a configured backend.
///
/// Every variant is designed to surface enough context (vault URL, secret
/// name, mapped env var) for an operator to act on it without re-running
/// anything against the vault.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `ELSPETH_FINGERPRINT_KEY` is absent and not about to be loaded by
    /// this same call. Raised before any external fetch.
    #[error("ELSPETH_FINGERPRINT_KEY is required for the audit trail and must be present before any secret is fetched")]
    MissingFingerprintKey,

    /// `source` is `keyvault` but no `vault_url` was configured.
    #[error("secrets.vault_url is required when source is keyvault")]
    MissingVaultUrl,

    /// The vault has no secret under the requested name.
    #[error("secret `{secret_name}` not found in vault `{vault_url}` (mapped to `{env_var_name}`)")]
    SecretNotFound {
        /// The environment variable this secret was mapped to.
        env_var_name: String,
        /// The name the secret was requested under.
        secret_name: String,
        /// The vault it was requested from.
        vault_url: String,
    },

    /// The vault rejected the request's credentials.
    #[error("failed to authenticate to vault `{vault_url}`: {detail}")]
    AuthenticationFailed {
        /// The vault that rejected the request.
        vault_url: String,
        /// Remediation guidance.
        detail: String,
    },

    /// The vault request failed for a reason other than auth or not-found.
    #[error("request to vault `{vault_url}` for secret `{secret_name}` (mapped to `{env_var_name}`) failed: {detail}")]
    RequestFailed {
        /// The environment variable this secret was mapped to.
        env_var_name: String,
        /// The name the secret was requested under.
        secret_name: String,
        /// The vault it was requested from.
        vault_url: String,
        /// A human-readable description of the failure.
        detail: String,
    },

    /// Transport-level failure talking to the vault.
    #[error("vault request transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
