// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! washwatch - Shared Laundry Machine Monitor
//!
//! A headless daemon that watches shared washing machines through
//! smart-plug power telemetry and hall-effect door sensors, infers a
//! usage lifecycle per machine, and republishes averaged status records
//! to a cloud MQTT broker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     washwatch daemon                     │
//! ├──────────────────────────────────────────────────────────┤
//! │  local broker ──► BrokerBridge (ingest session)          │
//! │                        │ decoded messages (channel)      │
//! │                        ▼                                 │
//! │                 MachineRegistry                          │
//! │        ┌───────────────┼────────────────┐                │
//! │        ▼               ▼                ▼                │
//! │  PowerAggregator  DoorDebouncer  state engine            │
//! │        │               │                │                │
//! │        └───── per-machine record ───────┘                │
//! │                        │ cycle completed                 │
//! │                        ▼                                 │
//! │                   CycleStore (machine_cycles.json)       │
//! │                                                          │
//! │  publish tick ──► registry snapshot ──► egress session   │
//! │                                         (TLS broker)     │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod bridge;
pub mod config;
pub mod monitor;
pub mod sim;
pub mod store;

// Re-exports for convenience
pub use bridge::BrokerBridge;
pub use config::Config;
pub use monitor::{MachineRegistry, MachineState, MachineStatus};
pub use store::CycleStore;

/// washwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// washwatch name
pub const NAME: &str = "washwatch";
