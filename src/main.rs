//! Still controller — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  ProbeBus          ActuatorPort      StoragePort   EventSink │
//! │  (one-wire / sim)  (PWM+GPIO / sim)  (NVS / mem)   (log)     │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ──────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │            Controller (pure logic)                     │  │
//! │  │  Sampler · Safety · Distillation · Rectification       │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One cooperative loop drives everything in fixed order; nothing in
//! the core blocks, and the watchdog is pet from inside the safety
//! supervisor on every pass.

use std::time::{Duration, Instant};

use anyhow::Result;
use log::info;

use stillpilot::adapters::log_sink::LogEventSink;
use stillpilot::adapters::sim::{SimActuators, SimProbeBus};
use stillpilot::adapters::storage::MemStorage;
use stillpilot::app::events::AppEvent;
use stillpilot::app::ports::EventSink;
use stillpilot::app::service::Controller;
use stillpilot::error::Error;
use stillpilot::sensors::Probe;
use stillpilot::settings;

/// Scheduler iteration period.
const TICK_MS: u64 = 100;

/// Telemetry snapshot cadence.
const TELEMETRY_MS: u64 = 60_000;

fn main() -> Result<()> {
    #[cfg(target_os = "espidf")]
    esp_idf_svc::sys::link_patches();

    #[cfg(not(target_os = "espidf"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("stillpilot v{}", env!("CARGO_PKG_VERSION"));

    // ── Persistent settings (defaults on first boot) ──────────
    let mut storage = MemStorage::new();
    let (active_settings, from_store) = settings::init(&mut storage);
    if !from_store {
        info!("first boot: factory defaults persisted");
    }
    active_settings.validate().map_err(Error::from)?;

    // ── Adapters ──────────────────────────────────────────────
    // The simulation bus stands in for the one-wire driver; a bench
    // rig scripts it over the config interface instead.
    let mut bus = SimProbeBus::new();
    for probe in Probe::ALL {
        bus.set_temp(probe, Some(20.0));
    }
    let mut hw = SimActuators::new();
    let mut sink = LogEventSink::new();

    // ── Controller ────────────────────────────────────────────
    let mut controller = Controller::new(active_settings);
    let found = controller.scan_for_sensors(&mut bus, &mut storage);
    info!("boot: {found} probe(s) on the bus");

    info!("system ready, entering control loop");

    let epoch = Instant::now();
    let mut last_telemetry = 0u64;

    loop {
        // On hardware the loop blocks on the tick timer interrupt; on
        // host we sleep out the period instead.
        std::thread::sleep(Duration::from_millis(TICK_MS));
        let now_ms = epoch.elapsed().as_millis() as u64;

        controller.tick(now_ms, &mut bus, &mut hw, &mut sink);

        if now_ms.saturating_sub(last_telemetry) >= TELEMETRY_MS {
            last_telemetry = now_ms;
            let snapshot = controller.build_telemetry(now_ms);
            sink.emit(&AppEvent::Telemetry(snapshot));
        }
    }
}
