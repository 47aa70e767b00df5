use crate::{env_or_default, ConfigError, FromEnv};
use std::net::Ipv4Addr;

/// HTTP listener settings shared by the API and the worker's health server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load a listener from `HOST` plus the first port variable that is set.
    ///
    /// The worker uses this with `["WORKER_HEALTH_PORT", "HEALTH_PORT"]` so one
    /// image can serve several subscriptions on distinct ports.
    pub fn from_env_with_ports(port_keys: &[&str], default_port: u16) -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());

        let port = match port_keys
            .iter()
            .find_map(|key| std::env::var(key).ok().map(|value| (*key, value)))
        {
            Some((key, value)) => value.parse().map_err(|e| ConfigError::ParseError {
                key: key.to_string(),
                details: format!("{}", e),
            })?,
            None => default_port,
        };

        Ok(Self { host, port })
    }
}

impl FromEnv for ServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - PORT: defaults to 8080
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_ports(&["PORT"], 8080)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 8080,
        }
    }
}
