//! Configuration loading for gmcore

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gmwire::{MountError, MountResult, DEFAULT_PORT};

use crate::refraction::RefractionPolicy;

/// Runtime options for the mount core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mount hostname or IP address
    pub host: String,
    pub port: u16,
    /// Per-send socket timeout
    pub socket_timeout_s: f64,
    pub fast_period_ms: u64,
    pub medium_period_ms: u64,
    pub slow_period_ms: u64,
    pub auto_refraction_when_not_tracking: bool,
    pub auto_refraction_when_camera_idle: bool,
    /// Minimum gap between two connect attempts on one channel
    pub reconnect_cooldown_ms: u64,
    /// Retry period of the Once loop until it succeeds
    pub once_retry_ms: u64,
    /// Wait after clearing the alignment before reading it back
    pub model_settle_ms: u64,
    pub loading_timeout_s: f64,
    /// How long a command channel request may wait for its reply
    pub command_timeout_s: f64,
    pub keepalive: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            socket_timeout_s: 2.0,
            fast_period_ms: 100,
            medium_period_ms: 3000,
            slow_period_ms: 10000,
            auto_refraction_when_not_tracking: false,
            auto_refraction_when_camera_idle: false,
            reconnect_cooldown_ms: 1000,
            once_retry_ms: 1000,
            model_settle_ms: 1000,
            loading_timeout_s: 30.0,
            command_timeout_s: 10.0,
            keepalive: true,
        }
    }
}

fn positive_secs(name: &str, value: f64) -> MountResult<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(MountError::Config(format!("{} must be positive, got {}", name, value)));
    }
    Ok(Duration::from_secs_f64(value))
}

impl MountConfig {
    pub fn validate(&self) -> MountResult<()> {
        if self.host.trim().is_empty() {
            return Err(MountError::Config("host is not set".to_string()));
        }
        if self.port == 0 {
            return Err(MountError::Config("port must not be 0".to_string()));
        }
        positive_secs("socket_timeout_s", self.socket_timeout_s)?;
        positive_secs("loading_timeout_s", self.loading_timeout_s)?;
        positive_secs("command_timeout_s", self.command_timeout_s)?;
        for (name, ms) in [
            ("fast_period_ms", self.fast_period_ms),
            ("medium_period_ms", self.medium_period_ms),
            ("slow_period_ms", self.slow_period_ms),
            ("once_retry_ms", self.once_retry_ms),
        ] {
            if ms == 0 {
                return Err(MountError::Config(format!("{} must not be 0", name)));
            }
        }
        Ok(())
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.socket_timeout_s.max(0.0))
    }

    pub fn fast_period(&self) -> Duration {
        Duration::from_millis(self.fast_period_ms)
    }

    pub fn medium_period(&self) -> Duration {
        Duration::from_millis(self.medium_period_ms)
    }

    pub fn slow_period(&self) -> Duration {
        Duration::from_millis(self.slow_period_ms)
    }

    pub fn once_retry(&self) -> Duration {
        Duration::from_millis(self.once_retry_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn model_settle(&self) -> Duration {
        Duration::from_millis(self.model_settle_ms)
    }

    pub fn loading_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.loading_timeout_s.max(0.0))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout_s.max(0.0))
    }

    pub fn refraction_policy(&self) -> RefractionPolicy {
        RefractionPolicy {
            when_not_tracking: self.auto_refraction_when_not_tracking,
            when_camera_idle: self.auto_refraction_when_camera_idle,
        }
    }
}

/// Load mount configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> MountResult<MountConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: MountConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    pub use gmwire::{DEFAULT_PORT, FW_DUT_QUERY};

    /// Accepted weather station pressure, exclusive bounds
    pub const PRESSURE_RANGE_HPA: (f64, f64) = (900.0, 1100.0);

    /// Accepted weather station temperature, exclusive bounds
    pub const TEMPERATURE_RANGE_C: (f64, f64) = (-30.0, 35.0);

    /// How often an idle command worker rechecks its stop flag
    pub const COMMAND_IDLE_POLL: Duration = Duration::from_millis(100);
}
