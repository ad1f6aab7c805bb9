//! Load the optional JSON configuration for tunnel provisioning and probing

use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigLoadError;

/// First candidate unit: `utun7` on macOS, leaving the low units to the system and other VPN software.
pub const DEFAULT_FIRST_UNIT: u32 = 8;
/// Number of candidate units, which bounds worst-case provisioning latency.
pub const DEFAULT_UNIT_COUNT: u32 = 25;
pub const DEFAULT_SIMULATED_REPLY_DELAY: Duration = Duration::from_millis(30);
/// Longer delays are clamped, the timer wheel only reaches about two years ahead.
pub const MAX_SIMULATED_REPLY_DELAY: Duration = Duration::from_secs(60 * 60);
// TEST-NET-1 (RFC 5737)
const DEFAULT_SIMULATED_UNREACHABLE: (Ipv4Addr, u8) = (Ipv4Addr::new(192, 0, 2, 0), 24);

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub tunnel: TunnelConfig,
    pub probe: ProbeConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TunnelConfig {
    pub first_unit: u32,
    pub unit_count: u32,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self { first_unit: DEFAULT_FIRST_UNIT, unit_count: DEFAULT_UNIT_COUNT }
    }
}

impl TunnelConfig {
    pub fn last_unit(&self) -> u32 {
        self.first_unit.saturating_add(self.unit_count.saturating_sub(1))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Fake replies instead of opening a raw socket, for unprivileged environments.
    pub simulate: bool,
    pub simulated_reply_delay_ms: u64,
    /// Simulated pings to this network never get a reply.
    pub simulated_unreachable: Ipv4Network,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        let (network, prefix) = DEFAULT_SIMULATED_UNREACHABLE;
        Self {
            simulate: false,
            simulated_reply_delay_ms: DEFAULT_SIMULATED_REPLY_DELAY.as_millis() as u64,
            simulated_unreachable: Ipv4Network::new(network, prefix).unwrap_or_else(|_| Ipv4Network::from(network)),
        }
    }
}

impl ProbeConfig {
    pub fn simulated_reply_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_reply_delay_ms).min(MAX_SIMULATED_REPLY_DELAY)
    }
}

/// Load the config at `path`, falling back to defaults if the file does not exist.
pub fn load(path: &Path) -> Result<Config, ConfigLoadError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(err) => {
            if err.kind() == ErrorKind::NotFound {
                tracing::info!(message_id = "Jq3vWn0e", config.path =? path, "no config file, using defaults");
                return Ok(Config::default());
            }
            return Err(ConfigLoadError::ReadError(err));
        }
    };

    serde_json::from_reader(file).map_err(|error| {
        tracing::error!(message_id = "a8GtkL2s", ?error, config.path =? path, "failed to parse config");
        ConfigLoadError::DeserializeError(error)
    })
}
