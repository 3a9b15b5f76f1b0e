// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Configuration module

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (cycle-count file lives here)
    pub data_dir: PathBuf,

    /// Interval between status publishes, in seconds
    pub publish_interval_secs: u64,

    /// How long the door must stay open before a cycle is considered
    /// collected, in seconds
    pub door_open_confirm_secs: u64,

    /// Re-run state transitions at publish-tick boundaries, not only on
    /// message arrival
    pub evaluate_on_tick: bool,

    /// Local sensor broker (ingest)
    pub ingest: IngestConfig,

    /// Cloud broker (egress)
    pub egress: EgressConfig,

    /// Monitored machines
    pub machines: Vec<MachineConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            publish_interval_secs: 30,
            door_open_confirm_secs: crate::monitor::DOOR_OPEN_CONFIRM_SECS,
            evaluate_on_tick: true,
            ingest: IngestConfig::default(),
            egress: EgressConfig::default(),
            machines: vec![MachineConfig::default()],
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            // Create parent directories
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("washwatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Path of the cycle-count file inside the data directory
    pub fn cycle_file(&self) -> PathBuf {
        self.data_dir.join("machine_cycles.json")
    }

    fn validate(&self) -> Result<()> {
        if self.machines.is_empty() {
            bail!("configuration defines no machines");
        }
        let mut ids = HashSet::new();
        let mut topics = HashSet::new();
        for machine in &self.machines {
            if !ids.insert(machine.id.as_str()) {
                bail!("duplicate machine id '{}'", machine.id);
            }
            // A shared topic would silently shadow one machine's routing
            for topic in [&machine.power_topic, &machine.door_topic] {
                if !topics.insert(topic.as_str()) {
                    bail!("duplicate sensor topic '{}'", topic);
                }
            }
        }
        Ok(())
    }
}

/// Local broker connection (plaintext, sensor side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Broker hostname or IP
    pub host: String,

    /// Broker port
    pub port: u16,

    /// MQTT client id
    pub client_id: String,

    /// Optional username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Optional password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// Fixed delay between reconnect attempts, in seconds
    pub reconnect_delay_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "washwatch-ingest".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
        }
    }
}

/// Cloud broker connection (egress, mutual TLS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Broker hostname
    pub host: String,

    /// Broker port
    pub port: u16,

    /// MQTT client id
    pub client_id: String,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// Fixed delay between reconnect attempts, in seconds
    pub reconnect_delay_secs: u64,

    /// Topic prefix for published status records
    /// (records go to `<prefix>/<machine_id>/data`)
    pub topic_prefix: String,

    /// TLS settings
    pub tls: TlsConfig,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            host: "example-ats.iot.ap-southeast-1.amazonaws.com".to_string(),
            port: 8883,
            client_id: "washwatch-egress".to_string(),
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
            topic_prefix: "washer".to_string(),
            tls: TlsConfig::default(),
        }
    }
}

/// TLS certificate files for the egress session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS (disable only for local test brokers)
    pub enabled: bool,

    /// Root CA certificate (PEM)
    pub ca_file: PathBuf,

    /// Device certificate (PEM)
    pub cert_file: PathBuf,

    /// Device private key (PEM)
    pub key_file: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_file: PathBuf::from("certs/AmazonRootCA1.pem"),
            cert_file: PathBuf::from("certs/device.pem.crt"),
            key_file: PathBuf::from("certs/private.pem.key"),
        }
    }
}

/// One monitored machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Stable machine identifier
    pub id: String,

    /// Human-readable label
    pub name: String,

    /// Topic delivering smart-plug status JSON (`apower` field)
    pub power_topic: String,

    /// Topic delivering door sensor state (`0`/`1` or `open`/`closed`)
    pub door_topic: String,

    /// Power threshold in watts separating active from inactive
    pub power_threshold: f64,

    /// Threshold comparison mode
    pub threshold_mode: ThresholdMode,

    /// Multiplier applied to the threshold when entering RUNNING
    /// (hysteretic mode only)
    pub hysteresis_up: f64,

    /// Multiplier applied to the threshold when leaving RUNNING
    /// (hysteretic mode only)
    pub hysteresis_down: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            id: "WM-01".to_string(),
            name: "Washing Machine 1".to_string(),
            power_topic: "WM-01/plug/status".to_string(),
            door_topic: "WM-01/hall_sensor/state".to_string(),
            power_threshold: 8.0,
            threshold_mode: ThresholdMode::Hysteretic,
            hysteresis_up: 1.2,
            hysteresis_down: 0.8,
        }
    }
}

impl MachineConfig {
    /// Effective threshold for the IDLE → RUNNING comparison
    pub fn on_threshold(&self) -> f64 {
        match self.threshold_mode {
            ThresholdMode::Plain => self.power_threshold,
            ThresholdMode::Hysteretic => self.power_threshold * self.hysteresis_up,
        }
    }

    /// Effective threshold for the RUNNING → OCCUPIED comparison
    pub fn off_threshold(&self) -> f64 {
        match self.threshold_mode {
            ThresholdMode::Plain => self.power_threshold,
            ThresholdMode::Hysteretic => self.power_threshold * self.hysteresis_down,
        }
    }
}

/// Threshold comparison variant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Same threshold in both directions
    Plain,
    /// Distinct up/down multipliers around one threshold
    Hysteretic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.machines.len(), 1);
        assert_eq!(parsed.machines[0].id, "WM-01");
        assert_eq!(parsed.publish_interval_secs, 30);
    }

    #[test]
    fn test_duplicate_machine_ids_rejected() {
        let mut config = Config::default();
        config.machines.push(config.machines[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_topics_rejected() {
        let mut config = Config::default();
        // Distinct id and door topic, but the power topic collides
        config.machines.push(MachineConfig {
            id: "WM-02".to_string(),
            name: "Washing Machine 2".to_string(),
            door_topic: "WM-02/hall_sensor/state".to_string(),
            ..MachineConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hysteretic_thresholds() {
        let machine = MachineConfig::default();
        assert!((machine.on_threshold() - 9.6).abs() < 1e-9);
        assert!((machine.off_threshold() - 6.4).abs() < 1e-9);
    }

    #[test]
    fn test_plain_thresholds() {
        let machine = MachineConfig {
            threshold_mode: ThresholdMode::Plain,
            ..MachineConfig::default()
        };
        assert!((machine.on_threshold() - 8.0).abs() < 1e-9);
        assert!((machine.off_threshold() - 8.0).abs() < 1e-9);
    }
}
