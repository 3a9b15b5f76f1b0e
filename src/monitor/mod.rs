//! Machine monitoring - lifecycle state engine, power aggregation, routing

mod aggregator;
mod door;
mod machine;
mod registry;

pub use aggregator::PowerAggregator;
pub use door::DoorDebouncer;
pub use machine::{Machine, Transition, DOOR_OPEN_CONFIRM_SECS};
pub use registry::MachineRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one machine
///
/// Canonical definition shared by the state engine, the logs and the
/// wire encoding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineState {
    /// Free, nothing running, no laundry waiting
    Idle,
    /// Drawing power above the on-threshold
    Running,
    /// Cycle finished, laundry still inside
    Occupied,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => write!(f, "IDLE"),
            MachineState::Running => write!(f, "RUNNING"),
            MachineState::Occupied => write!(f, "OCCUPIED"),
        }
    }
}

/// Status record published per machine on every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// ISO-8601 timestamp of the publish tick
    pub timestamp: String,

    /// Machine identifier
    pub machine_id: String,

    /// Completed cycles since first deployment
    pub cycle_count: u64,

    /// Average power over the tick window, watts, 2 decimals
    pub average_power: f64,

    /// Lifecycle state after tick-time evaluation
    pub state: MachineState,

    /// Last debounced door reading
    pub door_open: bool,
}
