//! Proxy fleet configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Hard cap on fleet size unless `force` is set
pub const MAX_UNFORCED_COUNT: u32 = 50;

/// Configuration for one cloud-proxy run
///
/// Built once at startup (file, then command-line overrides) and passed by
/// reference to every component afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// DigitalOcean API token
    pub token: Option<String>,

    /// Fingerprint or id of the SSH key installed on new droplets
    pub key_id: Option<String>,

    /// Private key used to open the tunnels
    pub key_location: PathBuf,

    /// Number of droplets to deploy
    pub count: u32,

    /// Droplet name prefix
    pub name_prefix: String,

    /// `*` or a comma separated list of region slugs
    pub regions: String,

    /// Allow more than [`MAX_UNFORCED_COUNT`] droplets
    pub force: bool,

    /// Local port of the first proxy, incremented for each further one
    pub start_port: u16,

    /// Fixed wait between droplet creation and the address lookup
    #[serde(with = "secs_serde")]
    pub boot_wait: Duration,

    /// Remote login user for the tunnels
    pub ssh_user: String,

    /// SSH client executable
    pub ssh_binary: String,

    /// Droplet size slug
    pub droplet_size: String,

    /// Droplet image slug
    pub droplet_image: String,

    /// Base URL of the DigitalOcean API
    pub api_base_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            token: None,
            key_id: None,
            key_location: PathBuf::from("~/.ssh/id_rsa"),
            count: 5,
            name_prefix: "cloud-proxy".to_string(),
            regions: "*".to_string(),
            force: false,
            start_port: 55555,
            boot_wait: Duration::from_secs(100),
            ssh_user: "root".to_string(),
            ssh_binary: "ssh".to_string(),
            droplet_size: "s-1vcpu-1gb".to_string(),
            droplet_image: "ubuntu-22-04-x64".to_string(),
            api_base_url: "https://api.digitalocean.com".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Check the configuration before any provisioning begins
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField("token".to_string()));
        }
        if self.key_id.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField("key".to_string()));
        }
        if self.count == 0 {
            return Err(ConfigError::Invalid("count must be at least 1".to_string()));
        }
        if self.count > MAX_UNFORCED_COUNT && !self.force {
            return Err(ConfigError::Invalid(format!(
                "count greater than {} (use --force to override)",
                MAX_UNFORCED_COUNT
            )));
        }
        if self.regions.trim().is_empty() {
            return Err(ConfigError::Invalid("regions must not be empty".to_string()));
        }
        if u64::from(self.start_port) + u64::from(self.count) > u64::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "start port {} leaves no room for {} proxies",
                self.start_port, self.count
            )));
        }
        Ok(())
    }

    /// API token, empty if unset
    pub fn token(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }

    /// SSH key identifier, empty if unset
    pub fn key_id(&self) -> &str {
        self.key_id.as_deref().unwrap_or_default()
    }

    /// Private key path with `~` expanded
    pub fn identity_path(&self) -> PathBuf {
        super::expand_home(&self.key_location)
    }
}

// Durations are stored as whole seconds
mod secs_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
