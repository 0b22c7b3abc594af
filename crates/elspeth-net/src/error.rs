//! Error taxonomy for the audited HTTP client and rate-limit registry.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors the audited client can raise. `Capacity` is the one a caller is
/// expected to catch and feed into an AIMD backoff loop; the rest are
/// terminal for the attempt that raised them.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The target host resolved to a private, link-local, loopback, or
    /// otherwise non-globally-routable address.
    #[error("refusing to connect to `{host}`: resolved to non-routable address {ip}")]
    Ssrf {
        /// The host name or redirect target that was rejected.
        host: String,
        /// The address it resolved to.
        ip: String,
    },

    /// DNS resolution itself failed.
    #[error("could not resolve `{host}`: {detail}")]
    Dns {
        /// The host name that failed to resolve.
        host: String,
        /// The underlying resolver error.
        detail: String,
    },

    /// The response status indicates the server is over capacity
    /// (429/503/529, or a plugin-declared equivalent). Callers that retry
    /// with AIMD backoff should match on this variant specifically.
    #[error("capacity error: {url} returned status {status}")]
    Capacity {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// A non-capacity HTTP error status.
    #[error("request to {url} failed with status {status}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// More redirects were followed than `max_redirects` allows.
    #[error("too many redirects following {url}")]
    TooManyRedirects {
        /// The URL the chain started from.
        url: String,
    },

    /// A redirect response carried no (or an unparseable) `Location`.
    #[error("redirect from {url} had no usable Location header")]
    InvalidRedirect {
        /// The URL that issued the redirect.
        url: String,
    },

    /// The named rate limiter's bucket is empty.
    #[error("rate limit `{name}` exceeded")]
    RateLimited {
        /// The limiter key that rejected the request.
        name: String,
    },

    /// Recording the call through the landscape recorder failed.
    #[error("failed to record external call: {0}")]
    Recording(#[from] elspeth_core::error::Error),

    /// Transport-level failure (connection reset, timeout, TLS, etc).
    #[error("transport error requesting {url}: {source}")]
    Transport {
        /// The URL that was requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },
}

impl NetError {
    /// Whether this error should be treated as a capacity signal by an
    /// AIMD retry loop.
    pub fn is_capacity(&self) -> bool {
        matches!(self, NetError::Capacity { .. })
    }
}

/// Classify an HTTP status code as a capacity signal. 429 (Too Many
/// Requests), 503 (Service Unavailable), and 529 (the ad-hoc
/// "site is overloaded" status some upstreams use) all count; anything
/// else in the 4xx/5xx range is an ordinary HTTP error.
pub fn is_capacity_status(status: u16) -> bool {
    matches!(status, 429 | 503 | 529)
}
