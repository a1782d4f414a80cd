//! Translator configuration

use crate::error::{Result, TcpupError};
use crate::packet::DEFAULT_TTL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Translator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Idle bound for flows in LAST_ACK / TIME_WAIT (seconds)
    pub closing_timeout_secs: u64,

    /// Idle bound for every other live flow (seconds)
    pub idle_timeout_secs: u64,

    /// TTL written into reconstructed IPv4 headers
    pub ip_ttl: u8,

    /// Log shadow state changes at debug level
    pub log_transitions: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            closing_timeout_secs: 6,
            idle_timeout_secs: 600,
            ip_ttl: DEFAULT_TTL,
            log_transitions: true,
        }
    }
}

impl TranslatorConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s).map_err(|e| TcpupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.closing_timeout_secs == 0 || self.idle_timeout_secs == 0 {
            return Err(TcpupError::Config("timeouts must be non-zero".into()));
        }
        if self.closing_timeout_secs > self.idle_timeout_secs {
            return Err(TcpupError::Config(format!(
                "closing_timeout_secs ({}) exceeds idle_timeout_secs ({})",
                self.closing_timeout_secs, self.idle_timeout_secs
            )));
        }
        if self.ip_ttl == 0 {
            return Err(TcpupError::Config("ip_ttl must be non-zero".into()));
        }
        Ok(())
    }

    pub fn closing_timeout(&self) -> Duration {
        Duration::from_secs(self.closing_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
