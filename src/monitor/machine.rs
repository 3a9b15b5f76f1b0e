// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Per-machine record and lifecycle state engine

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

use super::{DoorDebouncer, MachineState, MachineStatus, PowerAggregator};
use crate::config::MachineConfig;

/// Default seconds the door must stay open in OCCUPIED before the
/// laundry counts as collected
pub const DOOR_OPEN_CONFIRM_SECS: u64 = 10;

/// Outcome of one transition evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The state changed during this evaluation
    pub changed: bool,
    /// An OCCUPIED → IDLE transition completed a wash cycle
    pub cycle_completed: bool,
}

impl Transition {
    const NONE: Transition = Transition {
        changed: false,
        cycle_completed: false,
    };
}

/// One monitored machine: identity, thresholds and all mutable runtime
/// state (aggregator, door debouncer, engine state, cycle counter).
///
/// The registry wraps each record in its own mutex; nothing here is
/// internally synchronized.
#[derive(Debug)]
pub struct Machine {
    id: String,
    name: String,
    on_threshold: f64,
    off_threshold: f64,
    door_confirm: Duration,

    state: MachineState,
    current_power: f64,
    aggregator: PowerAggregator,
    door: DoorDebouncer,
    cycle_count: u64,
    last_state_change: DateTime<Local>,
}

impl Machine {
    /// Build a machine record from its configuration
    pub fn new(config: &MachineConfig, door_confirm: Duration) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            on_threshold: config.on_threshold(),
            off_threshold: config.off_threshold(),
            door_confirm,
            state: MachineState::Idle,
            current_power: 0.0,
            aggregator: PowerAggregator::new(),
            door: DoorDebouncer::new(),
            cycle_count: 0,
            last_state_change: Local::now(),
        }
    }

    /// Machine identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Completed cycles so far
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Restore a persisted cycle count at startup
    pub fn set_cycle_count(&mut self, count: u64) {
        self.cycle_count = count;
    }

    /// Last debounced door reading
    pub fn door_open(&self) -> bool {
        self.door.is_open()
    }

    /// Timestamp of the most recent state transition
    pub fn last_state_change(&self) -> DateTime<Local> {
        self.last_state_change
    }

    /// Record one power sample
    pub fn record_power(&mut self, watts: f64) {
        self.aggregator.add(watts);
    }

    /// Record a door sensor reading
    pub fn record_door(&mut self, open: bool, now: Instant) {
        self.door.update(open, now);
    }

    /// Drain the tick window into the sticky average and return it.
    ///
    /// When no samples arrived since the previous drain the prior
    /// average is kept, so sensor silence never reads as zero watts.
    pub fn drain_average(&mut self) -> f64 {
        if let Some(avg) = self.aggregator.drain() {
            self.current_power = avg;
        }
        self.current_power
    }

    /// Most recent averaged power available: the running average of the
    /// current window when samples have arrived, otherwise the sticky
    /// value from the last drained window
    fn effective_power(&self) -> f64 {
        self.aggregator.peek().unwrap_or(self.current_power)
    }

    /// Evaluate the transition rules against the latest averaged power
    /// and door state. At most one transition happens per call.
    pub fn evaluate(&mut self, now: Instant) -> Transition {
        let power = self.effective_power();
        let mut next = None;
        let mut cycle_completed = false;

        match self.state {
            MachineState::Idle => {
                if power > self.on_threshold {
                    next = Some(MachineState::Running);
                    self.door.rearm(now);
                }
            }
            MachineState::Running => {
                if power <= self.off_threshold {
                    next = Some(MachineState::Occupied);
                    // Hold timing starts once the cycle is over
                    self.door.rearm(now);
                }
            }
            MachineState::Occupied => {
                if self.door.held_open_for(now) >= self.door_confirm {
                    next = Some(MachineState::Idle);
                    self.cycle_count += 1;
                    cycle_completed = true;
                    self.door.rearm(now);
                }
            }
        }

        match next {
            Some(state) if state != self.state => {
                self.state = state;
                self.last_state_change = Local::now();
                Transition {
                    changed: true,
                    cycle_completed,
                }
            }
            _ => Transition::NONE,
        }
    }

    /// Build the egress status record for this machine
    pub fn status(&self, timestamp: &str) -> MachineStatus {
        MachineStatus {
            timestamp: timestamp.to_string(),
            machine_id: self.id.clone(),
            cycle_count: self.cycle_count,
            average_power: (self.current_power * 100.0).round() / 100.0,
            state: self.state,
            door_open: self.door.is_open(),
        }
    }
}
