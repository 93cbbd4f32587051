//! Configuration types for the registry client.

use std::time::Duration;

use oci_mirror_core::Credentials;

/// Configuration for the HTTP registry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout. `None` leaves requests unbounded; callers
    /// bound the run through cancellation instead.
    pub timeout: Option<Duration>,

    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// User agent string.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Creates a configuration with no request timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_registry::ClientConfig;
    ///
    /// let config = ClientConfig::new();
    /// assert!(config.timeout.is_none());
    /// assert!(config.user_agent.starts_with("oci-mirror/"));
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: None,
            connect_timeout: Duration::from_secs(30),
            user_agent: format!("oci-mirror/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// How one registry call reaches its registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    /// Skip TLS verification and allow plain HTTP.
    pub insecure: bool,

    /// Credentials, or `None` for anonymous access.
    pub credentials: Option<Credentials>,
}

impl Access {
    /// Anonymous access over verified TLS.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets whether TLS verification is skipped.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Returns true if credentials are configured.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }
}
