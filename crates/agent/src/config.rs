//! Agent configuration
//!
//! All settings can be built in code with the `with_*` methods or loaded from
//! TOML. `[connect]` and `[listen]` are brought up by `Agent::start`:
//!
//! ```toml
//! secret = "cymru"
//! label = "billing"
//! default_connection = "first_available"
//!
//! [connect]
//! host = "127.0.0.1"
//! port = 9022
//!
//! [connect.reconnect]
//! max_attempts = 10
//! max_delay_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// Default `host:port` of a drachtio server's control socket
pub const DEFAULT_PORT: u16 = 9022;

/// How a request without an explicit target connection picks one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultConnection {
    /// Use the only ready connection; fail when there are none or several
    #[default]
    OnlyWhenSingle,
    /// Use the oldest ready connection
    FirstAvailable,
    /// Always require an explicit target
    Disabled,
}

/// Reconnect limits for an outbound connection
///
/// Unset limits mean "retry forever" and "no ceiling on the delay".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    /// Give up once the total time spent waiting reaches this
    pub connect_timeout_ms: Option<u64>,
}

impl ReconnectConfig {
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Where to dial a drachtio server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl ConnectConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where to accept connections from drachtio servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
}

impl ListenConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Agent wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Shared secret presented in the `authenticate` command
    pub secret: String,
    /// Application label presented alongside the secret
    pub label: String,
    /// Pause between a successful authentication and the `Connect` event
    pub connect_grace_ms: u64,
    pub default_connection: DefaultConnection,
    /// Tracked inbound INVITEs older than this are purged
    pub inbound_invite_ttl_secs: u64,
    /// Trace every frame on the `drachtio::wire` target
    pub log_wire: bool,
    pub event_capacity: usize,
    pub max_frame_length: usize,
    pub connect: Option<ConnectConfig>,
    pub listen: Option<ListenConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            label: "default".to_string(),
            connect_grace_ms: 100,
            default_connection: DefaultConnection::default(),
            inbound_invite_ttl_secs: 300,
            log_wire: false,
            event_capacity: 256,
            max_frame_length: drachtio_wire::codec::DEFAULT_MAX_FRAME_LENGTH,
            connect: None,
            listen: None,
        }
    }
}

impl AgentConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_connect_grace(mut self, grace: Duration) -> Self {
        self.connect_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_default_connection(mut self, policy: DefaultConnection) -> Self {
        self.default_connection = policy;
        self
    }

    pub fn with_inbound_invite_ttl(mut self, ttl: Duration) -> Self {
        self.inbound_invite_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_wire_logging(mut self, enabled: bool) -> Self {
        self.log_wire = enabled;
        self
    }

    pub fn with_connect(mut self, connect: ConnectConfig) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn with_listen(mut self, listen: ListenConfig) -> Self {
        self.listen = Some(listen);
        self
    }

    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.connect_grace_ms)
    }

    pub fn inbound_invite_ttl(&self) -> Duration {
        Duration::from_secs(self.inbound_invite_ttl_secs)
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> AgentResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AgentError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.label.is_empty() {
            return Err(AgentError::config("label must not be empty"));
        }
        if self.event_capacity == 0 {
            return Err(AgentError::config("event_capacity must be at least 1"));
        }
        if self.max_frame_length == 0 {
            return Err(AgentError::config("max_frame_length must be at least 1"));
        }
        if self.secret.contains('|') || self.label.contains('|') {
            return Err(AgentError::config("secret and label must not contain '|'"));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
