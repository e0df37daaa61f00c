//! Satellite workload demo
//!
//! A small satellite flight-software model on top of the kernel:
//! telemetry, attitude control, thermal control, command handling,
//! housekeeping, payload control, and a status monitor, coordinated
//! through a semaphore, a command queue, an event flag group, and a
//! resource mutex.

use std::sync::{Arc, Mutex as StdMutex};

use satos::drivers::TickDriver;
use satos::{evt, Kernel, Policy, MAX_TIMEOUT};

// ============ System events ============

const EVENT_THERMAL_ALERT: u32 = 1 << 0;
const EVENT_ATTITUDE_UPDATE: u32 = 1 << 1;
const EVENT_PAYLOAD_READY: u32 = 1 << 2;
const EVENT_COMMAND_RECEIVED: u32 = 1 << 3;
const EVENT_LOW_POWER: u32 = 1 << 4;

// ============ Commands ============

const CMD_NOOP: u32 = 0;
const CMD_RESET: u32 = 1;
const CMD_SET_MODE: u32 = 2;
const CMD_TAKE_PICTURE: u32 = 3;
const CMD_DEPLOY_SOLAR_PANEL: u32 = 4;
const CMD_ADJUST_ORBIT: u32 = 5;

const CMD_SIZE: usize = 12;

#[derive(Debug, Clone, Copy)]
struct Command {
    kind: u32,
    parameter: u32,
    timestamp: u32,
}

impl Command {
    fn encode(&self) -> [u8; CMD_SIZE] {
        let mut buf = [0u8; CMD_SIZE];
        buf[0..4].copy_from_slice(&self.kind.to_le_bytes());
        buf[4..8].copy_from_slice(&self.parameter.to_le_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; CMD_SIZE]) -> Command {
        Command {
            kind: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            parameter: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

// ============ Satellite state ============

const MODE_SAFE: u32 = 0;
const MODE_NORMAL: u32 = 1;
const MODE_LOW_POWER: u32 = 2;
const MODE_SCIENCE: u32 = 3;
const MODE_MAINTENANCE: u32 = 4;

struct SatelliteState {
    mode: u32,
    orbit_position: u32,
    battery_level: f32,
    temperature: f32,
    solar_panels_deployed: bool,
    payload_active: bool,
    uptime: u32,
    command_count: u32,
    telemetry_packets: u32,
}

impl SatelliteState {
    fn new() -> Self {
        SatelliteState {
            mode: MODE_SAFE,
            orbit_position: 0,
            battery_level: 0.8,
            temperature: 25.0,
            solar_panels_deployed: false,
            payload_active: false,
            uptime: 0,
            command_count: 0,
            telemetry_packets: 0,
        }
    }

    fn mode_name(&self) -> &'static str {
        match self.mode {
            MODE_SAFE => "SAFE",
            MODE_NORMAL => "NORMAL",
            MODE_LOW_POWER => "LOW POWER",
            MODE_SCIENCE => "SCIENCE",
            MODE_MAINTENANCE => "MAINTENANCE",
            _ => "UNKNOWN",
        }
    }
}

/// Advance the simulated orbital environment by one monitor period.
fn update_environment(sat: &mut SatelliteState, events: &satos::EventGroup) {
    sat.orbit_position = (sat.orbit_position + 4) % 360;
    let in_sunlight = sat.orbit_position <= 180;

    if in_sunlight && sat.solar_panels_deployed {
        sat.battery_level = (sat.battery_level + 0.01).min(1.0);
    } else {
        let mut drain = 0.005;
        if sat.payload_active {
            drain *= 2.0;
        }
        sat.battery_level = (sat.battery_level - drain).max(0.0);
    }

    let mut target = if in_sunlight { 30.0 } else { 10.0 };
    if sat.payload_active {
        target += 10.0;
    }
    if sat.temperature < target {
        sat.temperature += 0.5;
    } else if sat.temperature > target {
        sat.temperature -= 0.5;
    }

    if sat.temperature > 40.0 || sat.temperature < 0.0 {
        let _ = events.set_flags(EVENT_THERMAL_ALERT);
    } else {
        let _ = events.clear_flags(EVENT_THERMAL_ALERT);
    }

    if sat.battery_level < 0.2 {
        let _ = events.set_flags(EVENT_LOW_POWER);
    } else {
        let _ = events.clear_flags(EVENT_LOW_POWER);
    }

    sat.uptime += 1;
}

fn display_status(kernel: &Kernel, sat: &SatelliteState, events: &satos::EventGroup) {
    println!("=== Satellite Kernel Simulator ===");
    println!("Uptime: {} s", sat.uptime);
    println!("Mode: {}", sat.mode_name());
    println!("Orbit position: {} deg", sat.orbit_position);
    println!("Battery: {:.1}%", sat.battery_level * 100.0);
    println!("Temperature: {:.1} C", sat.temperature);
    println!(
        "Solar panels: {}",
        if sat.solar_panels_deployed { "DEPLOYED" } else { "STOWED" }
    );
    println!("Payload: {}", if sat.payload_active { "ACTIVE" } else { "INACTIVE" });
    println!("Commands processed: {}", sat.command_count);
    println!("Telemetry packets: {}", sat.telemetry_packets);

    let flags = events.get_flags().unwrap_or(0);
    println!("Active events:");
    if flags & EVENT_THERMAL_ALERT != 0 {
        println!("- thermal alert");
    }
    if flags & EVENT_ATTITUDE_UPDATE != 0 {
        println!("- attitude update needed");
    }
    if flags & EVENT_PAYLOAD_READY != 0 {
        println!("- payload ready");
    }
    if flags & EVENT_COMMAND_RECEIVED != 0 {
        println!("- command received");
    }
    if flags & EVENT_LOW_POWER != 0 {
        println!("- low power");
    }
    if flags == 0 {
        println!("- none");
    }

    let stats = kernel.stats();
    println!(
        "Kernel: switches={} cpu={:.1}% misses={}",
        stats.context_switches,
        stats.cpu_load * 100.0,
        stats.deadline_misses
    );

    println!("Tasks:");
    for name in [
        "telemetry",
        "attitude",
        "thermal",
        "command",
        "housekeep",
        "payload",
        "monitor",
        "idle",
    ] {
        if let Some(id) = kernel.task_by_name(name) {
            let state = kernel.task_state(id).unwrap();
            let stats = kernel.task_stats(id).unwrap();
            println!(
                "  {:<10} prio={:<2} {:<10} runtime={} ms",
                name,
                kernel.task_priority(id).unwrap(),
                state.as_str(),
                kernel.ticks_to_ms(stats.total_runtime)
            );
        }
    }
    println!();
}

const MONITOR_PERIOD_TICKS: u32 = 100;
const MONITOR_CYCLES: u32 = 15;

fn main() {
    env_logger::init();

    let kernel = Kernel::new(Policy::Priority).expect("kernel init failed");

    // Shared resources.
    let telemetry_sem = kernel.create_semaphore("telemetry", 1, 1).expect("sem");
    let command_queue = kernel.create_queue("commands", CMD_SIZE, 10).expect("queue");
    let system_events = kernel.create_event_group("events").expect("events");
    let resource_mutex = kernel.create_mutex("resource").expect("mutex");
    let satellite = Arc::new(StdMutex::new(SatelliteState::new()));

    // Telemetry task: collect and "transmit" telemetry every 500 ms.
    let k = kernel.clone();
    let sem = telemetry_sem.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    let sat = satellite.clone();
    kernel
        .task_create("telemetry", 2, 4096, move || {
            while k.is_running() {
                if sem.take(100).is_ok() {
                    if mutex.lock(MAX_TIMEOUT).is_err() {
                        break;
                    }
                    sat.lock().unwrap().telemetry_packets += 1;
                    let _ = mutex.unlock();
                    let _ = sem.give();
                    let _ = events.set_flags(EVENT_ATTITUDE_UPDATE);
                }
                if k.task_delay(50).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    // Attitude control: reacts to attitude-update events.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    kernel
        .task_create("attitude", 1, 4096, move || {
            while k.is_running() {
                if events
                    .wait(EVENT_ATTITUDE_UPDATE, evt::WAIT_ANY | evt::CLEAR, MAX_TIMEOUT)
                    .is_err()
                {
                    break;
                }
                if mutex.lock(MAX_TIMEOUT).is_err() {
                    break;
                }
                log::debug!("adjusting satellite attitude");
                let _ = mutex.unlock();
                if k.task_delay(10).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    // Thermal control: pull temperature back into range on alerts.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    let sat = satellite.clone();
    kernel
        .task_create("thermal", 1, 4096, move || {
            while k.is_running() {
                if events.get_flags().unwrap_or(0) & EVENT_THERMAL_ALERT != 0 {
                    if mutex.lock(MAX_TIMEOUT).is_err() {
                        break;
                    }
                    log::warn!("thermal alert, taking corrective action");
                    {
                        let mut sat = sat.lock().unwrap();
                        if sat.temperature > 40.0 {
                            sat.temperature -= 2.0;
                        } else if sat.temperature < 0.0 {
                            sat.temperature += 2.0;
                        }
                    }
                    let _ = mutex.unlock();
                }
                if k.task_delay(20).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    // Command handler: drains the ground-station queue.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    let queue = command_queue.clone();
    let sat = satellite.clone();
    kernel
        .task_create("command", 0, 4096, move || {
            let mut buf = [0u8; CMD_SIZE];
            while k.is_running() {
                if queue.receive(&mut buf, MAX_TIMEOUT).is_err() {
                    break;
                }
                let cmd = Command::decode(&buf);
                if mutex.lock(MAX_TIMEOUT).is_err() {
                    break;
                }
                log::info!("processing command {}", cmd.kind);
                {
                    let mut sat = sat.lock().unwrap();
                    match cmd.kind {
                        CMD_NOOP => {}
                        CMD_RESET => {
                            log::warn!("system reset command received");
                            sat.mode = MODE_SAFE;
                            sat.payload_active = false;
                        }
                        CMD_SET_MODE => {
                            if cmd.parameter <= MODE_MAINTENANCE {
                                sat.mode = cmd.parameter;
                                if sat.mode == MODE_SCIENCE {
                                    sat.payload_active = true;
                                }
                            }
                        }
                        CMD_TAKE_PICTURE => {
                            if sat.payload_active {
                                let _ = events.set_flags(EVENT_PAYLOAD_READY);
                            } else {
                                log::warn!("cannot take picture, payload not active");
                            }
                        }
                        CMD_DEPLOY_SOLAR_PANEL => {
                            if !sat.solar_panels_deployed {
                                sat.solar_panels_deployed = true;
                            } else {
                                log::warn!("solar panels already deployed");
                            }
                        }
                        CMD_ADJUST_ORBIT => {
                            log::info!("adjusting orbit");
                        }
                        other => log::warn!("unknown command type {}", other),
                    }
                    sat.command_count += 1;
                }
                let _ = mutex.unlock();
                let _ = events.set_flags(EVENT_COMMAND_RECEIVED);
            }
        })
        .unwrap();

    // Housekeeping: periodic background maintenance.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    kernel
        .task_create("housekeep", 3, 4096, move || {
            while k.is_running() {
                if mutex.lock(MAX_TIMEOUT).is_err() {
                    break;
                }
                log::debug!("performing housekeeping");
                let _ = mutex.unlock();
                if k.task_delay(100).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    // Payload control: operates the payload when it is ready.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    kernel
        .task_create("payload", 2, 4096, move || {
            while k.is_running() {
                if events
                    .wait(EVENT_PAYLOAD_READY, evt::WAIT_ANY | evt::CLEAR, MAX_TIMEOUT)
                    .is_err()
                {
                    break;
                }
                if mutex.lock(MAX_TIMEOUT).is_err() {
                    break;
                }
                log::info!("operating payload");
                let _ = mutex.unlock();
                if k.task_delay(30).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    // Monitor: environment simulation and status display.
    let k = kernel.clone();
    let mutex = resource_mutex.clone();
    let events = system_events.clone();
    let sat = satellite.clone();
    kernel
        .task_create("monitor", 4, 8192, move || {
            for _ in 0..MONITOR_CYCLES {
                if mutex.lock(MAX_TIMEOUT).is_err() {
                    return;
                }
                update_environment(&mut sat.lock().unwrap(), &events);
                let _ = mutex.unlock();

                display_status(&k, &sat.lock().unwrap(), &events);

                if k.task_delay(MONITOR_PERIOD_TICKS).is_err() {
                    return;
                }
            }
            let _ = k.stop();
        })
        .unwrap();

    // Mark the long-period tasks periodic for deadline accounting.
    if let Some(id) = kernel.task_by_name("telemetry") {
        let _ = kernel.task_set_periodic(id, 50, 48);
    }
    if let Some(id) = kernel.task_by_name("housekeep") {
        let _ = kernel.task_set_periodic(id, 100, 95);
    }

    // Seed a couple of ground commands.
    let now = kernel.now();
    let deploy = Command {
        kind: CMD_DEPLOY_SOLAR_PANEL,
        parameter: 0,
        timestamp: now,
    };
    let science = Command {
        kind: CMD_SET_MODE,
        parameter: MODE_SCIENCE,
        timestamp: now,
    };
    command_queue.send(&deploy.encode(), 0).expect("seed command");
    command_queue.send(&science.encode(), 0).expect("seed command");

    let driver = TickDriver::start(kernel.clone()).expect("tick driver failed");
    log::info!("starting satellite simulation");
    kernel.start().expect("scheduler start failed");
    driver.stop();
    kernel.shutdown();
    println!("simulation complete");
}
