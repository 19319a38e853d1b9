//! # Configuration Module
//!
//! This module holds the proxy configuration structures and loading
//! mechanisms.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`PROXY_*`)
//! - Validation with detailed error messages
//!
//! Everything here is immutable after startup; the only runtime-mutable
//! state derived from it is the per-host health bit owned by the registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{ProxyError, ProxyResult};
use crate::routing::host::normalize_host;

/// Main proxy configuration structure
///
/// Deserialized from YAML or JSON. Only `listen` and `services` are
/// required; the remaining sections fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listener address and port
    pub listen: ListenConfig,

    /// Backend services, keyed at runtime by their canonical domain
    pub services: Vec<ServiceConfig>,

    /// Shared response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Periodic health probing settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Request limits
    #[serde(default)]
    pub limits: LimitConfig,

    /// Upstream client settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            services: Vec::new(),
            cache: CacheConfig::default(),
            health_check: HealthCheckConfig::default(),
            limits: LimitConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ListenConfig {
    /// Parse into a socket address
    pub fn socket_addr(&self) -> ProxyResult<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|e| ProxyError::config(format!("Invalid listen address: {}", e)))
    }
}

/// A single backend service and the hosts that serve it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Display name, used in logs
    pub name: String,

    /// Domain this service answers for; matched against the normalized
    /// `Host` header
    pub domain: String,

    /// Load balancing strategy for this service
    #[serde(default)]
    pub strategy: Strategy,

    /// Backend hosts, in configuration order
    pub hosts: Vec<HostConfig>,
}

/// Load balancing strategy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[serde(alias = "round_robin")]
    RoundRobin,
    Random,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::RoundRobin => write!(f, "round-robin"),
            Strategy::Random => write!(f, "random"),
        }
    }
}

/// A single backend host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: String,
    pub port: u16,

    /// Initial health state; the checker takes over from there
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

/// Shared response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries before LRU eviction kicks in
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// Health probing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Delay between probe cycles
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Delay before the first probe cycle after startup
    #[serde(default = "default_health_initial_delay")]
    pub initial_delay_secs: u64,

    /// Per-probe timeout
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// Path probed on every host
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_initial_delay() -> u64 {
    2
}

fn default_health_timeout() -> u64 {
    3
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            initial_delay_secs: default_health_initial_delay(),
            timeout_secs: default_health_timeout(),
            path: default_health_path(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum inbound request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Upstream HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Total per-request timeout against a backend host
    #[serde(default = "default_upstream_timeout")]
    pub request_timeout_secs: u64,
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ProxyConfig = serde_yaml::from_str(&content)
            .map_err(|e| ProxyError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ProxyConfig = serde_json::from_str(&content)
            .map_err(|e| ProxyError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validation
    pub fn from_yaml_str(content: &str) -> ProxyResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ProxyError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern `PROXY_<SECTION>_<FIELD>`,
    /// for example `PROXY_LISTEN_PORT=8080`. Durations accept humantime
    /// syntax such as `30s` or `1m`.
    pub fn apply_env_overrides(&mut self) -> ProxyResult<()> {
        use std::env;

        if let Ok(addr) = env::var("PROXY_LISTEN_ADDRESS") {
            self.listen.address = addr;
        }

        if let Ok(port) = env::var("PROXY_LISTEN_PORT") {
            self.listen.port = port
                .parse()
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_LISTEN_PORT: {}", e)))?;
        }

        if let Ok(entries) = env::var("PROXY_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = entries.parse().map_err(|e| {
                ProxyError::config(format!("Invalid PROXY_CACHE_MAX_ENTRIES: {}", e))
            })?;
        }

        if let Ok(size) = env::var("PROXY_MAX_BODY_BYTES") {
            self.limits.max_body_bytes = size
                .parse()
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_MAX_BODY_BYTES: {}", e)))?;
        }

        if let Ok(timeout) = env::var("PROXY_UPSTREAM_TIMEOUT") {
            self.upstream.request_timeout_secs = humantime::parse_duration(&timeout)
                .map_err(|e| ProxyError::config(format!("Invalid PROXY_UPSTREAM_TIMEOUT: {}", e)))?
                .as_secs();
        }

        if let Ok(interval) = env::var("PROXY_HEALTH_CHECK_INTERVAL") {
            self.health_check.interval_secs = humantime::parse_duration(&interval)
                .map_err(|e| {
                    ProxyError::config(format!("Invalid PROXY_HEALTH_CHECK_INTERVAL: {}", e))
                })?
                .as_secs();
        }

        Ok(())
    }

    /// Validate the configuration, returning the first problem found
    pub fn validate(&self) -> ProxyResult<()> {
        self.listen.socket_addr()?;

        if self.services.is_empty() {
            return Err(ProxyError::config("At least one service must be configured"));
        }

        let mut seen_domains = std::collections::HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err(ProxyError::config("Service name must not be empty"));
            }

            let canonical = normalize_host(&service.domain).ok_or_else(|| {
                ProxyError::config(format!("Service {} has an empty domain", service.name))
            })?;

            if !seen_domains.insert(canonical.clone()) {
                return Err(ProxyError::config(format!(
                    "Duplicate service domain: {}",
                    canonical
                )));
            }

            if service.hosts.is_empty() {
                return Err(ProxyError::config(format!(
                    "Service {} has no hosts",
                    service.name
                )));
            }

            for host in &service.hosts {
                if host.address.is_empty() {
                    return Err(ProxyError::config(format!(
                        "Service {} has a host with an empty address",
                        service.name
                    )));
                }
                if host.port == 0 {
                    return Err(ProxyError::config(format!(
                        "Service {} has a host with port 0",
                        service.name
                    )));
                }
            }
        }

        if self.cache.max_entries == 0 {
            return Err(ProxyError::config("cache.max_entries must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
listen:
  address: 127.0.0.1
  port: 8080
services:
  - name: users
    domain: Users.Example.com
    strategy: round-robin
    hosts:
      - address: 10.0.0.1
        port: 9001
      - address: 10.0.0.2
        port: 9001
        healthy: false
  - name: catalog
    domain: catalog.example.com
    strategy: random
    hosts:
      - address: 10.0.1.1
        port: 9002
"#;

    #[test]
    fn test_parse_sample_yaml() {
        let config = ProxyConfig::from_yaml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].strategy, Strategy::RoundRobin);
        assert_eq!(config.services[1].strategy, Strategy::Random);
        assert!(config.services[0].hosts[0].healthy);
        assert!(!config.services[0].hosts[1].healthy);
    }

    #[test]
    fn test_section_defaults() {
        let config = ProxyConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.health_check.interval(), Duration::from_secs(30));
        assert_eq!(config.health_check.initial_delay(), Duration::from_secs(2));
        assert_eq!(config.health_check.timeout(), Duration::from_secs(3));
        assert_eq!(config.health_check.path, "/health");
        assert_eq!(config.limits.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upstream.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_strategy_aliases() {
        let yaml = r#"
name: svc
domain: svc.local
strategy: round_robin
hosts:
  - address: 10.0.0.1
    port: 9000
"#;
        let service: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(service.strategy, Strategy::RoundRobin);

        let yaml = r#"
name: svc
domain: svc.local
hosts:
  - address: 10.0.0.1
    port: 9000
"#;
        let service: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(service.strategy, Strategy::RoundRobin, "default strategy");
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let yaml = r#"
listen:
  address: 127.0.0.1
  port: 8080
services:
  - name: a
    domain: api.example.com
    hosts:
      - address: 10.0.0.1
        port: 9000
  - name: b
    domain: API.EXAMPLE.COM:443
    hosts:
      - address: 10.0.0.2
        port: 9000
"#;
        let config = ProxyConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate service domain"));
    }

    #[test]
    fn test_empty_services_rejected() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_without_hosts_rejected() {
        let yaml = r#"
listen:
  address: 127.0.0.1
  port: 8080
services:
  - name: a
    domain: api.example.com
    hosts: []
"#;
        let config = ProxyConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
