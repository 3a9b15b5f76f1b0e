// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Multi-machine registry - routes sensor messages and drives publish ticks

use chrono::Local;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{Machine, MachineState, MachineStatus, Transition};
use crate::config::Config;
use crate::store::CycleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    Power,
    Door,
}

/// Owns every machine record and the cycle store.
///
/// Each machine sits behind its own mutex; machines are independent, so
/// no cross-machine lock exists. Locks are held only across one logical
/// read-modify-write and never across network calls.
pub struct MachineRegistry {
    machines: Vec<Mutex<Machine>>,
    topics: HashMap<String, (usize, SensorKind)>,
    store: CycleStore,
    evaluate_on_tick: bool,
}

impl MachineRegistry {
    /// Build the registry from configuration, restoring persisted cycle
    /// counts
    pub fn new(config: &Config, store: CycleStore) -> Self {
        let door_confirm = Duration::from_secs(config.door_open_confirm_secs);
        let saved = store.load();

        let mut machines = Vec::with_capacity(config.machines.len());
        let mut topics = HashMap::new();

        for (idx, mc) in config.machines.iter().enumerate() {
            let mut machine = Machine::new(mc, door_confirm);
            if let Some(&count) = saved.get(mc.id.as_str()) {
                machine.set_cycle_count(count);
            }
            machines.push(Mutex::new(machine));
            topics.insert(mc.power_topic.clone(), (idx, SensorKind::Power));
            topics.insert(mc.door_topic.clone(), (idx, SensorKind::Door));
        }

        Self {
            machines,
            topics,
            store,
            evaluate_on_tick: config.evaluate_on_tick,
        }
    }

    /// Every topic the ingest session must subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Number of configured machines
    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Route one inbound sensor message to its machine.
    ///
    /// Topics that match no configured machine are ignored; malformed
    /// payloads are dropped without touching machine state.
    pub fn route(&self, topic: &str, payload: &[u8]) {
        let Some(&(idx, kind)) = self.topics.get(topic) else {
            debug!("Ignoring message on unmapped topic '{}'", topic);
            return;
        };

        match kind {
            SensorKind::Power => self.handle_power(idx, payload),
            SensorKind::Door => self.handle_door(idx, payload),
        }
    }

    fn handle_power(&self, idx: usize, payload: &[u8]) {
        let data: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping malformed power payload: {}", e);
                return;
            }
        };
        // Absent field reads as a zero-watt sample, per the plug firmware
        // contract
        let watts = data.get("apower").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let outcome = {
            let mut machine = self.machines[idx].lock();
            machine.record_power(watts);
            let t = machine.evaluate(Instant::now());
            (t, machine.name().to_string(), machine.state(), machine.cycle_count())
        };
        self.log_and_persist(outcome);
    }

    fn handle_door(&self, idx: usize, payload: &[u8]) {
        let Some(open) = parse_door_payload(payload) else {
            warn!(
                "Dropping unrecognized door payload: {:?}",
                String::from_utf8_lossy(payload)
            );
            return;
        };

        let outcome = {
            let mut machine = self.machines[idx].lock();
            let now = Instant::now();
            machine.record_door(open, now);
            let t = machine.evaluate(now);
            (t, machine.name().to_string(), machine.state(), machine.cycle_count())
        };
        self.log_and_persist(outcome);
    }

    fn log_and_persist(&self, (transition, name, state, cycles): (Transition, String, MachineState, u64)) {
        if transition.changed {
            info!("{}: {}", name, state);
        }
        if transition.cycle_completed {
            info!("Cycle completed on {}! Total cycles: {}", name, cycles);
            self.persist_counts();
        }
    }

    /// Drain every aggregator, re-evaluate transitions at the tick
    /// boundary when configured, and return one status record per
    /// machine.
    pub fn publish_tick(&self) -> Vec<MachineStatus> {
        let timestamp = Local::now().to_rfc3339();
        let now = Instant::now();
        let mut statuses = Vec::with_capacity(self.machines.len());
        let mut any_cycle_completed = false;

        for slot in &self.machines {
            let mut machine = slot.lock();
            machine.drain_average();

            if self.evaluate_on_tick {
                let t = machine.evaluate(now);
                if t.changed {
                    info!("{}: {}", machine.name(), machine.state());
                }
                if t.cycle_completed {
                    info!(
                        "Cycle completed on {}! Total cycles: {}",
                        machine.name(),
                        machine.cycle_count()
                    );
                    any_cycle_completed = true;
                }
            }

            statuses.push(machine.status(&timestamp));
        }

        if any_cycle_completed {
            self.persist_counts();
        }

        statuses
    }

    /// Snapshot of every machine's cycle counter
    pub fn cycle_counts(&self) -> HashMap<String, u64> {
        self.machines
            .iter()
            .map(|slot| {
                let machine = slot.lock();
                (machine.id().to_string(), machine.cycle_count())
            })
            .collect()
    }

    /// Persist the complete counter snapshot; failures are logged and
    /// never propagate to the triggering transition
    pub fn persist_counts(&self) {
        let counts = self.cycle_counts();
        if let Err(e) = self.store.persist(&counts) {
            error!("Failed to persist cycle counts: {}", e);
        }
    }
}

/// Accepts the integer (`0`/`1`) and enumerated (`open`/`closed`,
/// `true`/`false`) wire encodings seen across door sensor firmwares
fn parse_door_payload(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?;
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "open" | "true" => Some(true),
        "0" | "closed" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.machines = vec![
            MachineConfig::default(),
            MachineConfig {
                id: "WM-02".to_string(),
                name: "Washing Machine 2".to_string(),
                power_topic: "WM-02/plug/status".to_string(),
                door_topic: "WM-02/hall_sensor/state".to_string(),
                ..MachineConfig::default()
            },
        ];
        (config, dir)
    }

    fn test_registry() -> (MachineRegistry, TempDir) {
        let (config, dir) = test_config();
        let store = CycleStore::new(config.cycle_file());
        (MachineRegistry::new(&config, store), dir)
    }

    #[test]
    fn test_subscriptions_cover_all_topics() {
        let (registry, _dir) = test_registry();
        assert_eq!(registry.machine_count(), 2);
        let subs = registry.subscriptions();
        assert_eq!(subs.len(), 4);
        assert!(subs.contains(&"WM-01/plug/status".to_string()));
        assert!(subs.contains(&"WM-02/hall_sensor/state".to_string()));
    }

    #[test]
    fn test_unmapped_topic_ignored() {
        let (registry, _dir) = test_registry();
        registry.route("some/other/topic", b"{}");
        let statuses = registry.publish_tick();
        assert!(statuses.iter().all(|s| s.state == MachineState::Idle));
    }

    #[test]
    fn test_power_routing_drives_state() {
        let (registry, _dir) = test_registry();
        registry.route("WM-01/plug/status", br#"{"apower": 150.0}"#);

        let statuses = registry.publish_tick();
        let wm1 = statuses.iter().find(|s| s.machine_id == "WM-01").unwrap();
        let wm2 = statuses.iter().find(|s| s.machine_id == "WM-02").unwrap();
        assert_eq!(wm1.state, MachineState::Running);
        assert_eq!(wm1.average_power, 150.0);
        assert_eq!(wm2.state, MachineState::Idle);
    }

    #[test]
    fn test_missing_power_field_reads_zero() {
        let (registry, _dir) = test_registry();
        registry.route("WM-01/plug/status", br#"{"voltage": 230.1}"#);
        let statuses = registry.publish_tick();
        let wm1 = statuses.iter().find(|s| s.machine_id == "WM-01").unwrap();
        assert_eq!(wm1.average_power, 0.0);
        assert_eq!(wm1.state, MachineState::Idle);
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        let (registry, _dir) = test_registry();
        registry.route("WM-01/plug/status", b"not json");
        registry.route("WM-01/hall_sensor/state", b"ajar");
        let statuses = registry.publish_tick();
        let wm1 = statuses.iter().find(|s| s.machine_id == "WM-01").unwrap();
        assert_eq!(wm1.state, MachineState::Idle);
        assert!(!wm1.door_open);
    }

    #[test]
    fn test_door_payload_encodings() {
        assert_eq!(parse_door_payload(b"1"), Some(true));
        assert_eq!(parse_door_payload(b"0"), Some(false));
        assert_eq!(parse_door_payload(b"open"), Some(true));
        assert_eq!(parse_door_payload(b"CLOSED"), Some(false));
        assert_eq!(parse_door_payload(b" true\n"), Some(true));
        assert_eq!(parse_door_payload(b"2"), None);
        assert_eq!(parse_door_payload(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_tick_idempotent_without_new_samples() {
        let (registry, _dir) = test_registry();
        registry.route("WM-01/plug/status", br#"{"apower": 42.5}"#);

        let first = registry.publish_tick();
        let second = registry.publish_tick();
        let a = first.iter().find(|s| s.machine_id == "WM-01").unwrap();
        let b = second.iter().find(|s| s.machine_id == "WM-01").unwrap();
        assert_eq!(a.average_power, b.average_power);
        assert_eq!(a.state, b.state);
        assert_eq!(a.cycle_count, b.cycle_count);
    }

    #[test]
    fn test_average_rounded_to_two_decimals() {
        let (registry, _dir) = test_registry();
        registry.route("WM-01/plug/status", br#"{"apower": 1.0}"#);
        registry.route("WM-01/plug/status", br#"{"apower": 2.0}"#);
        registry.route("WM-01/plug/status", br#"{"apower": 2.005}"#);

        let statuses = registry.publish_tick();
        let wm1 = statuses.iter().find(|s| s.machine_id == "WM-01").unwrap();
        assert_eq!(wm1.average_power, 1.67);
    }

    #[test]
    fn test_completed_cycle_persists_counts() {
        // The door-hold window is wall-clock; use a zero-second confirm
        // window instead of sleeping through the real one.
        let (mut fast, _dir) = test_config();
        fast.door_open_confirm_secs = 0;
        let store = CycleStore::new(fast.cycle_file());
        let registry = MachineRegistry::new(&fast, store);

        // Full cycle on WM-01: high power, drop, door held open
        registry.route("WM-01/plug/status", br#"{"apower": 300.0}"#);
        registry.publish_tick();
        registry.route("WM-01/plug/status", br#"{"apower": 3.0}"#);
        registry.publish_tick();
        registry.route("WM-01/hall_sensor/state", b"1");

        let counts = registry.cycle_counts();
        assert_eq!(counts["WM-01"], 1);

        // A fresh registry over the same store restores the count
        let store = CycleStore::new(fast.cycle_file());
        let restored = MachineRegistry::new(&fast, store);
        assert_eq!(restored.cycle_counts()["WM-01"], 1);
        assert_eq!(restored.cycle_counts()["WM-02"], 0);
    }
}
