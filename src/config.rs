//! Configuration management

use crate::session::BackendSettings;
use crate::tracking::Wrapper;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default: 5587)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hostname announced to clients
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Upstream relay `host:port`
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// Certificate for downstream STARTTLS (offered only with `key_file`)
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    /// Accept any certificate from the upstream
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Log every command exchange
    #[serde(default)]
    pub verbose: bool,
    /// File receiving a copy of every rewritten message
    #[serde(default)]
    pub upstream_data_debug: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hostname: default_hostname(),
            upstream: default_upstream(),
            cert_file: None,
            key_file: None,
            insecure_skip_verify: false,
            verbose: false,
            upstream_data_debug: None,
        }
    }
}

/// Engagement tracking configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackingConfig {
    /// Tracking base URL; tracking is off when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Open pixel before `</body>`
    #[serde(default = "default_true")]
    pub open: bool,
    /// Hidden pixel right after `<body>`
    #[serde(default = "default_true")]
    pub initial_open: bool,
    /// Wrap `<a href>` links
    #[serde(default = "default_true")]
    pub click: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            url: None,
            open: true,
            initial_open: true,
            click: true,
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5587
}
fn default_hostname() -> String {
    "smtp.proxy.local".to_string()
}
fn default_upstream() -> String {
    "smtp.sparkpostmail.com:587".to_string()
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Backend settings described by this configuration. The debug sink is
    /// opened by the caller.
    pub fn backend_settings(&self) -> crate::Result<BackendSettings> {
        Ok(BackendSettings {
            upstream: self.proxy.upstream.clone(),
            verbose: self.proxy.verbose,
            wrapper: self.tracking.wrapper()?,
            insecure_skip_verify: self.proxy.insecure_skip_verify,
            debug_sink: None,
        })
    }
}

impl ProxyConfig {
    /// Get socket address to bind to
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }

    /// Certificate and key paths, when downstream STARTTLS is configured
    pub fn tls_files(&self) -> Option<(&str, &str)> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => {
                Some((cert.as_str(), key.as_str()))
            }
            _ => None,
        }
    }
}

impl TrackingConfig {
    /// Build the tracking wrapper, or `None` when no URL is configured.
    pub fn wrapper(&self) -> crate::Result<Option<Wrapper>> {
        match self.url.as_deref() {
            None | Some("") => Ok(None),
            Some(url) => Wrapper::new(url, self.open, self.initial_open, self.click).map(Some),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> String {
    r#"# SMTP Tracking Proxy Configuration
# Copy this file and customize for your setup

# ============================================================================
# Proxy
# ============================================================================
proxy:
  # Listen address (0.0.0.0 for all interfaces)
  host: "0.0.0.0"

  # Port clients submit mail to
  port: 5587

  # Hostname announced in the greeting and EHLO reply
  hostname: "smtp.proxy.local"

  # Upstream relay, host:port
  upstream: "smtp.sparkpostmail.com:587"

  # Certificate and key for downstream STARTTLS (both needed to offer it)
  # cert_file: "proxy.crt"
  # key_file: "proxy.key"

  # Skip certificate verification towards the upstream
  insecure_skip_verify: false

  # Log every command exchange
  verbose: false

  # Write a copy of every rewritten message to this file
  # upstream_data_debug: "upstream-data.eml"

# ============================================================================
# Engagement tracking
# ============================================================================
tracking:
  # Base URL for tracking links; leave unset to relay mail unchanged
  url: "https://track.example.com"

  # Open pixel before </body>
  open: true

  # Hidden pixel right after <body>
  initial_open: true

  # Wrap <a href> links
  click: true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.proxy.port, 5587);
        assert!(config.tracking.url.is_none());
        assert!(config.tracking.wrapper().unwrap().is_none());
        assert!(config.proxy.tls_files().is_none());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = serde_yaml::from_str(&generate_example_config()).unwrap();
        assert_eq!(config.proxy.upstream, "smtp.sparkpostmail.com:587");
        assert_eq!(config.proxy.bind_addr().unwrap().port(), 5587);
        let wrapper = config.tracking.wrapper().unwrap().unwrap();
        assert_eq!(wrapper.url().as_str(), "https://track.example.com/");
        assert!(wrapper.track_open() && wrapper.track_initial_open() && wrapper.track_link());
    }

    #[test]
    fn test_load_and_save() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "proxy:\n  upstream: relay.internal:25\n  cert_file: a.crt\n  key_file: a.key\n\
             tracking:\n  url: http://t.internal/trk\n  click: false\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.proxy.upstream, "relay.internal:25");
        assert_eq!(config.proxy.tls_files(), Some(("a.crt", "a.key")));
        let settings = config.backend_settings().unwrap();
        let wrapper = settings.wrapper.unwrap();
        assert!(!wrapper.track_link());
        assert!(wrapper.track_open());

        let out = NamedTempFile::new().unwrap();
        config.save_to_file(out.path()).unwrap();
        assert_eq!(Config::from_file(out.path()).unwrap(), config);
    }

    #[test]
    fn test_bad_tracking_url_is_rejected() {
        let tracking = TrackingConfig {
            url: Some("https://t.example/?campaign=1".to_string()),
            ..Default::default()
        };
        assert!(tracking.wrapper().is_err());
    }
}
