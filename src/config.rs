use crate::bus::DEFAULT_PRIORITIES;
use crate::error::ConfigError;
use crate::sensor::DEFAULT_TARE_SAMPLES;
use crate::transport::QoS;
use crate::units::logic::LogicConfig;
use crate::units::weight_meter::DEFAULT_AVG_SAMPLES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Device configuration, read from a JSON file. Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub device_id: String,
    pub priorities: usize,
    pub tick_ms: u64,
    pub read_period_ms: u64,
    pub avg_samples: u8,
    pub tare_samples: u8,
    pub filter_koeff: f32,
    pub topic_prefix: String,
    pub qos: QoS,
    /// `None` drains the bus completely on every tick.
    pub max_dispatch_per_tick: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "scale-0".into(),
            priorities: DEFAULT_PRIORITIES,
            tick_ms: 10,
            read_period_ms: 5000,
            avg_samples: DEFAULT_AVG_SAMPLES,
            tare_samples: DEFAULT_TARE_SAMPLES,
            filter_koeff: 0.5,
            topic_prefix: "scale".into(),
            qos: QoS::AtMostOnce,
            max_dispatch_per_tick: None,
        }
    }
}

impl DeviceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_owned(),
            })
        }

        if self.device_id.is_empty() {
            return invalid("device_id", "must not be empty");
        }
        if self.device_id.contains(['/', '+', '#']) {
            return invalid("device_id", "must be a single topic segment");
        }
        if self.priorities == 0 {
            return invalid("priorities", "must be greater than 0");
        }
        if self.tick_ms == 0 {
            return invalid("tick_ms", "must be greater than 0");
        }
        if self.avg_samples == 0 {
            return invalid("avg_samples", "must be greater than 0");
        }
        if self.tare_samples == 0 {
            return invalid("tare_samples", "must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.filter_koeff) {
            return invalid("filter_koeff", "must be within [0, 1]");
        }
        if self.topic_prefix.is_empty() || self.topic_prefix.contains(['+', '#']) {
            return invalid("topic_prefix", "must be non-empty and free of wildcards");
        }
        if self.max_dispatch_per_tick == Some(0) {
            return invalid("max_dispatch_per_tick", "must be greater than 0 when set");
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn read_period(&self) -> Duration {
        Duration::from_millis(self.read_period_ms)
    }

    pub fn logic_config(&self) -> LogicConfig {
        LogicConfig {
            device_id: self.device_id.clone(),
            topic_prefix: self.topic_prefix.clone(),
            read_period: self.read_period(),
            filter_koeff: self.filter_koeff,
            qos: self.qos,
        }
    }
}
