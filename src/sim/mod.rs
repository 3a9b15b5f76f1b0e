//! Washing machine simulator
//!
//! Drives the configured machines through realistic IDLE → RUNNING →
//! OCCUPIED patterns and publishes fake smart-plug JSON and door sensor
//! payloads to the local broker, so the monitor can be exercised
//! end-to-end without hardware. Enabled with `--simulate`.

use anyhow::Result;
use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{Config, MachineConfig};
use crate::monitor::MachineState;

/// Seconds between simulated sensor publishes
const SENSOR_PUBLISH_INTERVAL_SECS: u64 = 30;

/// One simulated machine
struct SimulatedMachine {
    name: String,
    power_topic: String,
    door_topic: String,

    state: MachineState,
    door_open: bool,
    power: f64,
    time_in_state: f64,
    cycle_duration: f64,
    door_opens_after: f64,
    collected_after: f64,
}

impl SimulatedMachine {
    fn new(config: &MachineConfig) -> Self {
        Self {
            name: config.name.clone(),
            power_topic: config.power_topic.clone(),
            door_topic: config.door_topic.clone(),
            state: MachineState::Idle,
            door_open: false,
            power: 0.0,
            time_in_state: 0.0,
            cycle_duration: 0.0,
            door_opens_after: 0.0,
            collected_after: 0.0,
        }
    }

    /// Advance the simulation by `delta` seconds
    fn update(&mut self, delta: f64) {
        let mut rng = rand::thread_rng();
        self.time_in_state += delta;

        match self.state {
            MachineState::Idle => {
                if rng.gen_bool(0.02) {
                    self.start_cycle();
                } else {
                    self.power = rng.gen_range(0.0..2.0); // standby draw
                    self.door_open = rng.gen_bool(0.5);
                }
            }
            MachineState::Running => {
                let progress = self.time_in_state / self.cycle_duration;
                self.power = match progress {
                    p if p < 0.2 => rng.gen_range(300.0..500.0), // fill/agitate
                    p if p < 0.5 => rng.gen_range(150.0..300.0), // main wash
                    p if p < 0.7 => rng.gen_range(400.0..600.0), // spin
                    p if p < 0.9 => rng.gen_range(100.0..250.0), // rinse
                    _ => rng.gen_range(500.0..700.0),            // final spin
                };
                self.power += rng.gen_range(-20.0..20.0);
                self.door_open = false; // door locked during cycle

                if self.time_in_state >= self.cycle_duration {
                    self.complete_cycle();
                }
            }
            MachineState::Occupied => {
                self.power = rng.gen_range(0.0..3.0);
                if self.time_in_state > self.door_opens_after {
                    self.door_open = true;
                }
                if self.time_in_state > self.collected_after {
                    self.return_to_idle();
                }
            }
        }
    }

    fn start_cycle(&mut self) {
        let mut rng = rand::thread_rng();
        self.state = MachineState::Running;
        self.cycle_duration = rng.gen_range(180.0..300.0);
        self.time_in_state = 0.0;
        self.door_open = false;
        info!(
            "{} starting cycle (duration: {:.0}s)",
            self.name, self.cycle_duration
        );
    }

    fn complete_cycle(&mut self) {
        let mut rng = rand::thread_rng();
        self.state = MachineState::Occupied;
        self.time_in_state = 0.0;
        self.door_opens_after = rng.gen_range(30.0..120.0);
        // Door stays open well past the confirm window before collection
        self.collected_after = self.door_opens_after + rng.gen_range(15.0..40.0);
        info!("{} cycle complete, now OCCUPIED", self.name);
    }

    fn return_to_idle(&mut self) {
        self.state = MachineState::Idle;
        self.time_in_state = 0.0;
        self.door_open = false;
        info!("{} returned to IDLE", self.name);
    }

    /// Smart-plug status JSON in the Shelly Plus Plug shape
    fn plug_payload(&self) -> serde_json::Value {
        let mut rng = rand::thread_rng();
        json!({
            "id": 0,
            "source": "init",
            "output": self.power > 5.0,
            "apower": (self.power * 100.0).round() / 100.0,
            "voltage": (rng.gen_range(230.0..240.0_f64) * 10.0).round() / 10.0,
            "current": (self.power / 230.0 * 1000.0).round() / 1000.0,
            "aenergy": {
                "total": (rng.gen_range(1000.0..2000.0_f64) * 100.0).round() / 100.0,
                "by_minute": [0.0, 0.0, 0.0]
            },
            "temperature": {
                "tC": (rng.gen_range(20.0..35.0_f64) * 10.0).round() / 10.0,
                "tF": (rng.gen_range(68.0..95.0_f64) * 10.0).round() / 10.0
            }
        })
    }

    /// Hall sensor payload: `1` open, `0` closed
    fn door_payload(&self) -> &'static str {
        if self.door_open {
            "1"
        } else {
            "0"
        }
    }
}

/// Run the simulator against the local (ingest) broker until shutdown
pub async fn run(config: &Config, shutdown: &broadcast::Sender<()>) -> Result<()> {
    let mut machines: Vec<SimulatedMachine> = config
        .machines
        .iter()
        .map(SimulatedMachine::new)
        .collect();

    info!(
        "Simulating {} machine(s) against {}:{}",
        machines.len(),
        config.ingest.host,
        config.ingest.port
    );

    let mut options = MqttOptions::new(
        "washwatch-simulator",
        &config.ingest.host,
        config.ingest.port,
    );
    options.set_keep_alive(Duration::from_secs(config.ingest.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&config.ingest.username, &config.ingest.password) {
        options.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let reconnect_delay = Duration::from_secs(config.ingest.reconnect_delay_secs);

    let mut poll_shutdown = shutdown.subscribe();
    let poll_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Simulator connected to local broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Simulator session error: {}, retrying in {:?}", e, reconnect_delay);
                        tokio::time::sleep(reconnect_delay).await;
                    }
                },
                _ = poll_shutdown.recv() => break,
            }
        }
    });

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut shutdown_rx = shutdown.subscribe();
    let mut since_publish = 0.0_f64;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                for machine in &mut machines {
                    machine.update(1.0);
                }
                since_publish += 1.0;
                if since_publish >= SENSOR_PUBLISH_INTERVAL_SECS as f64 {
                    since_publish = 0.0;
                    publish_sensor_data(&client, &machines).await;
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Simulator shutting down...");
                break;
            }
        }
    }

    let _ = client.disconnect().await;
    let _ = poll_task.await;
    Ok(())
}

async fn publish_sensor_data(client: &AsyncClient, machines: &[SimulatedMachine]) {
    for machine in machines {
        let plug = machine.plug_payload().to_string();
        if let Err(e) = client
            .publish(machine.power_topic.clone(), QoS::AtLeastOnce, false, plug)
            .await
        {
            warn!("Simulator publish to {} failed: {}", machine.power_topic, e);
        }

        if let Err(e) = client
            .publish(
                machine.door_topic.clone(),
                QoS::AtLeastOnce,
                false,
                machine.door_payload(),
            )
            .await
        {
            warn!("Simulator publish to {} failed: {}", machine.door_topic, e);
        }

        debug!(
            "{}: state={} power={:.1}W door={}",
            machine.name,
            machine.state,
            machine.power,
            if machine.door_open { "OPEN" } else { "CLOSED" }
        );
    }
}
