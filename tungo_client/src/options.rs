//! Engine configuration and the result of a successful handshake.

use crate::error::{Result, TunnelError};

/// Client configuration, supplied at construction and validated synchronously
/// by [`Options::validate`]. `subdomain` is the one field the engine mutates
/// after the fact, once the server assigns one.
#[derive(Debug, Clone)]
pub struct Options {
    pub local_port: u16,
    pub local_host: String,
    pub server_url: Option<String>,
    pub server_host: String,
    pub control_port: u16,
    pub subdomain: Option<String>,
    pub secret_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    pub log_level: String,
}

impl Options {
    pub fn builder(local_port: u16) -> OptionsBuilder {
        OptionsBuilder::new(local_port)
    }

    /// Synchronous configuration gate. The only way to raise
    /// [`TunnelError::ConfigInvalid`].
    pub fn validate(&self) -> Result<()> {
        if self.local_port == 0 {
            return Err(TunnelError::ConfigInvalid("local_port must be nonzero".into()));
        }
        if self.server_url.is_none() && self.control_port == 0 {
            return Err(TunnelError::ConfigInvalid("control_port must be nonzero".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(TunnelError::ConfigInvalid("connect_timeout must be nonzero".into()));
        }
        if self.retry_interval_secs == 0 {
            return Err(TunnelError::ConfigInvalid("retry_interval must be nonzero".into()));
        }
        Ok(())
    }

    /// The rendezvous WebSocket URL, derived from `server_url` or
    /// `server_host`/`control_port`.
    pub fn websocket_url(&self) -> String {
        match &self.server_url {
            Some(url) => normalize_ws_url(url),
            None => format!("ws://{}:{}/ws", self.server_host, self.control_port),
        }
    }
}

fn normalize_ws_url(url: &str) -> String {
    let mut url = url.to_string();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        url = format!("ws://{url}");
    }
    if !url.ends_with("/ws") {
        url = if url.ends_with('/') { format!("{url}ws") } else { format!("{url}/ws") };
    }
    url
}

/// Builder mirroring the teacher's config-struct style.
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn new(local_port: u16) -> Self {
        Self {
            options: Options {
                local_port,
                local_host: "localhost".to_string(),
                server_url: None,
                server_host: "localhost".to_string(),
                control_port: 5555,
                subdomain: None,
                secret_key: None,
                connect_timeout_secs: 10,
                max_retries: 5,
                retry_interval_secs: 5,
                log_level: "info".to_string(),
            },
        }
    }

    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.options.local_host = host.into();
        self
    }

    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.options.server_url = Some(url.into());
        self
    }

    pub fn server_host(mut self, host: impl Into<String>) -> Self {
        self.options.server_host = host.into();
        self
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.options.control_port = port;
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.options.subdomain = Some(subdomain.into());
        self
    }

    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.options.secret_key = Some(key.into());
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.options.connect_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.options.max_retries = retries;
        self
    }

    pub fn retry_interval_secs(mut self, secs: u64) -> Self {
        self.options.retry_interval_secs = secs;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.options.log_level = level.into();
        self
    }

    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub url: String,
    pub subdomain: String,
}
