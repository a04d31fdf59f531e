//! Configuration types for the discovery engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the discovery loop waits for the mDNS engine before re-entering the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Wait effectively until an event arrives
    #[default]
    Long,
    /// Poll with a short timeout
    Short,
}

/// Configuration for the discovery engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Which wait duration the blocking loop uses
    #[serde(default)]
    pub wait_mode: WaitMode,

    /// Long wait (seconds)
    #[serde(default = "default_long_wait")]
    pub long_wait_secs: u64,

    /// Short wait (milliseconds)
    #[serde(default = "default_short_wait")]
    pub short_wait_millis: u64,

    /// Address reported for services running on this host
    #[serde(default = "default_local_address")]
    pub local_address: String,

    /// Withdraw registrations when an advertise loop exits
    #[serde(default = "default_unregister_on_exit")]
    pub unregister_on_exit: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            wait_mode: WaitMode::default(),
            long_wait_secs: default_long_wait(),
            short_wait_millis: default_short_wait(),
            local_address: default_local_address(),
            unregister_on_exit: default_unregister_on_exit(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns a configuration that polls with the short wait
    pub fn short() -> Self {
        Self {
            wait_mode: WaitMode::Short,
            ..Self::default()
        }
    }

    /// Returns the wait duration selected by `wait_mode`
    pub fn wait(&self) -> Duration {
        match self.wait_mode {
            WaitMode::Long => Duration::from_secs(self.long_wait_secs),
            WaitMode::Short => Duration::from_millis(self.short_wait_millis),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.long_wait_secs == 0 {
            return Err("long_wait_secs cannot be 0".to_string());
        }

        if self.short_wait_millis == 0 {
            return Err("short_wait_millis cannot be 0".to_string());
        }

        if self.local_address.parse::<std::net::IpAddr>().is_err() {
            return Err(format!(
                "local_address '{}' is not an IP address",
                self.local_address
            ));
        }

        Ok(())
    }
}

// Default configuration values
fn default_long_wait() -> u64 {
    100_000_000
}

fn default_short_wait() -> u64 {
    10
}

fn default_local_address() -> String {
    "127.0.0.1".to_string()
}

fn default_unregister_on_exit() -> bool {
    true
}
