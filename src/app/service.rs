//! The controller service: the cooperative core.
//!
//! [`Controller`] owns the sensor sampler, safety supervisor, actuator
//! bank, and both process engines, and runs them in the fixed per-tick
//! order:
//!
//! ```text
//!  sampler ──▶ supervisor ──▶ active engine ──▶ actuator flush
//! ```
//!
//! Within one tick the engine observes the supervisor's verdict, and
//! the flush applies the engine's commands last; the supervisor's
//! emergency latch overrides any racing positive command.  All I/O
//! flows through port traits injected at call sites, so the whole
//! service runs against mocks.

use log::{info, warn};

use crate::actuators::ActuatorBank;
use crate::process::{
    ActuatorCommands, AppliedState, DistillationEngine, Process, ProcessContext, ProcessKind,
    RectificationEngine,
};
use crate::safety::{SafetyStatus, SafetySupervisor};
use crate::sensors::{Probe, SensorSampler};
use crate::settings::{self, SafetySettings, Settings};

use super::commands::Command;
use super::events::{AppEvent, Telemetry};
use super::ports::{ActuatorPort, ConfigError, EventSink, ProbeBus, StoragePort};

pub struct Controller {
    settings: Settings,
    sampler: SensorSampler,
    supervisor: SafetySupervisor,
    bank: ActuatorBank,
    distillation: DistillationEngine,
    rectification: RectificationEngine,
    /// At most one engine is active at any tick.
    active: Option<ProcessKind>,
    tick_count: u64,
}

impl Controller {
    pub fn new(settings: Settings) -> Self {
        Self {
            sampler: SensorSampler::new(&settings),
            supervisor: SafetySupervisor::new(&settings.safety),
            bank: ActuatorBank::new(&settings),
            distillation: DistillationEngine::new(),
            rectification: RectificationEngine::new(),
            active: None,
            tick_count: 0,
            settings,
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one scheduler iteration: sample → supervise → engine → flush.
    pub fn tick(
        &mut self,
        now_ms: u64,
        bus: &mut impl ProbeBus,
        hw: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) {
        self.tick_count += 1;
        let prev_error = self.supervisor.status().error;

        // 1. Sensors.
        self.sampler.tick(now_ms, bus);

        // 2. Safety verdict (may latch the bank on a hard fault).
        self.supervisor.tick(
            now_ms,
            &self.sampler,
            &self.settings.safety,
            self.active,
            &mut self.bank,
            hw,
        );

        // 3. Active engine.
        if let Some(kind) = self.active {
            let mut ctx = ProcessContext {
                now_ms,
                temps: self.sampler.snapshot(),
                safe: self.supervisor.is_safe(),
                settings: &self.settings,
                applied: AppliedState {
                    heater_watts: self.bank.heater_watts(),
                    pump_flow_ml_per_min: self.bank.pump_flow(),
                    valve_open: self.bank.is_valve_open(),
                },
                commands: ActuatorCommands::all_off(),
                emergency: None,
            };

            let prev_phase;
            {
                let engine: &mut dyn Process = match kind {
                    ProcessKind::Distillation => &mut self.distillation,
                    ProcessKind::Rectification => &mut self.rectification,
                };
                prev_phase = engine.phase_name();
                engine.tick(&mut ctx);
            }
            let commands = ctx.commands;
            let emergency = ctx.emergency;
            drop(ctx);

            // Engine-reported fault (cube over its own limit).
            if let Some(code) = emergency {
                self.supervisor
                    .raise(code, now_ms, &self.settings.safety, &mut self.bank, hw);
            }

            // 4. Flush.  A latched bank swallows the positive commands.
            self.bank.set_heater_watts(commands.heater_watts, hw);
            if commands.pump_flow_ml_per_min > 0.0 {
                self.bank.set_pump_flow(commands.pump_flow_ml_per_min, hw);
            } else {
                self.bank.pump_stop(hw);
            }
            self.bank.set_valve(commands.valve_open, hw);

            self.after_engine_tick(kind, prev_phase, sink);
        }

        // The verdict always wins: an unsafe tick flushes (0, 0, closed)
        // regardless of what was commanded above.
        if !self.supervisor.is_safe() {
            self.bank.all_off(hw);
        }

        let new_error = self.supervisor.status().error;
        if new_error != prev_error {
            if let Some(code) = new_error {
                sink.emit(&AppEvent::FaultRaised(code));
            }
        }
    }

    /// Phase-change events and end-of-run bookkeeping.
    fn after_engine_tick(
        &mut self,
        kind: ProcessKind,
        prev_phase: &'static str,
        sink: &mut impl EventSink,
    ) {
        let (phase_now, running, completed) = match kind {
            ProcessKind::Distillation => (
                self.distillation.phase_name(),
                self.distillation.is_running(),
                self.distillation.phase()
                    == crate::process::distillation::DistillationPhase::Completed,
            ),
            ProcessKind::Rectification => (
                self.rectification.phase_name(),
                self.rectification.is_running(),
                self.rectification.phase()
                    == crate::process::rectification::RectificationPhase::Completed,
            ),
        };

        if phase_now != prev_phase {
            sink.emit(&AppEvent::PhaseChanged {
                process: kind,
                from: prev_phase,
                to: phase_now,
            });
        }

        if !running {
            self.active = None;
            self.supervisor.on_process_end();
            if completed {
                sink.emit(&AppEvent::ProcessCompleted(kind));
            } else {
                sink.emit(&AppEvent::ProcessFailed(kind));
            }
        }
    }

    // ── Process lifecycle ─────────────────────────────────────

    pub fn start_distillation(&mut self, now_ms: u64, sink: &mut impl EventSink) -> bool {
        self.start_process(ProcessKind::Distillation, now_ms, sink)
    }

    pub fn start_rectification(&mut self, now_ms: u64, sink: &mut impl EventSink) -> bool {
        self.start_process(ProcessKind::Rectification, now_ms, sink)
    }

    fn start_process(
        &mut self,
        kind: ProcessKind,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> bool {
        if self.active.is_some() {
            warn!("controller: start rejected, a process is already active");
            return false;
        }
        // Leftover non-sticky faults clear on a fresh start; sticky
        // ones still veto it.
        if !self.supervisor.is_safe() && !self.supervisor.reset(&mut self.bank) {
            warn!("controller: start rejected, sticky safety fault");
            return false;
        }
        let started = match kind {
            ProcessKind::Distillation => self.distillation.start(now_ms),
            ProcessKind::Rectification => self.rectification.start(now_ms),
        };
        if !started {
            return false;
        }
        self.active = Some(kind);
        self.supervisor.on_process_start(now_ms);
        sink.emit(&AppEvent::ProcessStarted(kind));
        info!("controller: {} started", kind.name());
        true
    }

    /// Stop the active run (or return a terminal engine to Idle).
    /// Non-latching: actuators go quiet but no reset is required after.
    pub fn stop(&mut self, now_ms: u64, hw: &mut impl ActuatorPort, sink: &mut impl EventSink) {
        if let Some(kind) = self.active.take() {
            match kind {
                ProcessKind::Distillation => self.distillation.stop(now_ms),
                ProcessKind::Rectification => self.rectification.stop(now_ms),
            }
            self.supervisor.on_process_end();
            self.bank.all_off(hw);
            sink.emit(&AppEvent::ProcessStopped(kind));
        } else {
            // No active run: clear any terminal phase back to Idle.
            self.distillation.stop(now_ms);
            self.rectification.stop(now_ms);
        }
    }

    pub fn pause(&mut self, now_ms: u64) {
        match self.active {
            Some(ProcessKind::Distillation) => self.distillation.pause(now_ms),
            Some(ProcessKind::Rectification) => self.rectification.pause(now_ms),
            None => {}
        }
    }

    pub fn resume(&mut self, now_ms: u64) {
        match self.active {
            Some(ProcessKind::Distillation) => self.distillation.resume(now_ms),
            Some(ProcessKind::Rectification) => self.rectification.resume(now_ms),
            None => {}
        }
    }

    // ── Safety surface ────────────────────────────────────────

    pub fn emergency_stop(
        &mut self,
        now_ms: u64,
        hw: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) {
        self.supervisor.emergency_stop(now_ms, &mut self.bank, hw);
        if let Some(kind) = self.active.take() {
            match kind {
                ProcessKind::Distillation => self.distillation.stop(now_ms),
                ProcessKind::Rectification => self.rectification.stop(now_ms),
            }
            self.supervisor.on_process_end();
        }
        sink.emit(&AppEvent::EmergencyStopped);
    }

    /// Entry point for faults the supervisor cannot observe itself:
    /// overpressure or mains problems reported by an external
    /// collaborator.  Hard codes latch the actuators immediately.
    pub fn raise_external_fault(
        &mut self,
        code: crate::error::SafetyError,
        now_ms: u64,
        hw: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) {
        self.supervisor
            .raise(code, now_ms, &self.settings.safety, &mut self.bank, hw);
        sink.emit(&AppEvent::FaultRaised(code));
    }

    /// Clear non-sticky safety errors.  Returns `false` while a sticky
    /// fault requires the external operator re-arm.
    pub fn reset_safety_errors(&mut self, sink: &mut impl EventSink) -> bool {
        let ok = self.supervisor.reset(&mut self.bank);
        if ok {
            sink.emit(&AppEvent::SafetyReset);
        }
        ok
    }

    pub fn safety_status(&self) -> SafetyStatus {
        self.supervisor.status()
    }

    pub fn is_safety_ok(&self) -> bool {
        self.supervisor.is_safe()
    }

    // ── Manual overrides (idle only) ──────────────────────────

    pub fn set_heater_percent(&mut self, percent: f32, hw: &mut impl ActuatorPort) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.bank.set_heater_percent(percent, hw);
        true
    }

    pub fn set_heater_watts(&mut self, watts: f32, hw: &mut impl ActuatorPort) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.bank.set_heater_watts(watts, hw);
        true
    }

    pub fn set_pump_flow(&mut self, ml_per_min: f32, hw: &mut impl ActuatorPort) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.bank.set_pump_flow(ml_per_min, hw);
        true
    }

    pub fn set_valve(&mut self, open: bool, hw: &mut impl ActuatorPort) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.bank.set_valve(open, hw);
        true
    }

    // ── Sensor surface ────────────────────────────────────────

    pub fn temperature(&self, probe: Probe) -> Option<f32> {
        self.sampler.temperature(probe)
    }

    pub fn is_sensor_connected(&self, probe: Probe) -> bool {
        self.sampler.is_connected(probe)
    }

    pub fn rise_rate(&self, probe: Probe) -> f32 {
        self.sampler.rise_rate(probe)
    }

    pub fn sensor_count(&self) -> usize {
        self.sampler.connected_count()
    }

    /// Persist a calibration offset and apply it to subsequent reads.
    pub fn calibrate_temp_sensor(
        &mut self,
        index: usize,
        offset: f32,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        if index >= Probe::COUNT {
            return Err(ConfigError::ValidationFailed("probe index out of range"));
        }
        let probe = Probe::from_index(index);
        self.settings.probe_calibration[index] = offset;
        self.sampler.calibrate(probe, offset);
        settings::save(storage, &self.settings)
    }

    /// Re-enumerate the bus and persist the discovered probe set.
    pub fn scan_for_sensors(
        &mut self,
        bus: &mut impl ProbeBus,
        storage: &mut impl StoragePort,
    ) -> usize {
        let found = self.sampler.scan(bus);
        self.settings.probe_enabled = [false; Probe::COUNT];
        for (probe, addr) in &found {
            let idx = *probe as usize;
            self.settings.probe_enabled[idx] = true;
            self.settings.probe_addresses[idx] = *addr;
        }
        if let Err(e) = settings::save(storage, &self.settings) {
            warn!("controller: persisting scan result failed: {e}");
        }
        found.len()
    }

    // ── Settings surface ──────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the whole record: validate, persist, then adopt.  The
    /// engines see either the old or the new snapshot, never a mix.
    pub fn update_settings(
        &mut self,
        new: Settings,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        settings::save(storage, &new)?;
        self.settings = new;
        self.propagate_settings();
        Ok(())
    }

    pub fn save_settings(&mut self, storage: &mut impl StoragePort) -> Result<(), ConfigError> {
        settings::save(storage, &self.settings)
    }

    pub fn reload_settings(&mut self, storage: &impl StoragePort) -> Result<(), ConfigError> {
        self.settings = settings::load(storage)?;
        self.propagate_settings();
        Ok(())
    }

    pub fn reset_settings(&mut self, storage: &mut impl StoragePort) {
        self.settings = settings::reset_to_defaults(storage);
        self.propagate_settings();
    }

    fn propagate_settings(&mut self) {
        self.sampler.apply_settings(&self.settings);
        self.bank.apply_settings(&self.settings);
    }

    fn update_safety_settings(
        &mut self,
        storage: &mut impl StoragePort,
        mutate: impl FnOnce(&mut SafetySettings),
    ) -> Result<(), ConfigError> {
        let mut next = self.settings.clone();
        mutate(&mut next.safety);
        settings::save(storage, &next)?;
        self.settings = next;
        Ok(())
    }

    pub fn set_safety_max_runtime_hours(
        &mut self,
        hours: u32,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        self.update_safety_settings(storage, |s| s.max_runtime_hours = hours)
    }

    pub fn set_safety_max_cube_temp(
        &mut self,
        celsius: f32,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        self.update_safety_settings(storage, |s| s.max_cube_temp = celsius)
    }

    pub fn set_safety_max_temp_rise_rate(
        &mut self,
        per_minute: f32,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        self.update_safety_settings(storage, |s| s.max_temp_rise_rate = per_minute)
    }

    pub fn set_safety_water_out_band(
        &mut self,
        min: f32,
        max: f32,
        storage: &mut impl StoragePort,
    ) -> Result<(), ConfigError> {
        self.update_safety_settings(storage, |s| {
            s.min_water_out_temp = min;
            s.max_water_out_temp = max;
        })
    }

    // ── Actuator observers ────────────────────────────────────

    pub fn heater_percent(&self) -> f32 {
        self.bank.heater_percent()
    }

    pub fn heater_watts(&self) -> f32 {
        self.bank.heater_watts()
    }

    pub fn pump_flow(&self) -> f32 {
        self.bank.pump_flow()
    }

    pub fn is_pump_running(&self) -> bool {
        self.bank.is_pump_running()
    }

    pub fn is_valve_open(&self) -> bool {
        self.bank.is_valve_open()
    }

    /// True while the emergency latch holds the actuators at zero.
    pub fn is_emergency_latched(&self) -> bool {
        self.bank.is_latched()
    }

    // ── Process observers ─────────────────────────────────────

    pub fn active_process(&self) -> Option<ProcessKind> {
        self.active
    }

    pub fn distillation(&self) -> &DistillationEngine {
        &self.distillation
    }

    pub fn rectification(&self) -> &RectificationEngine {
        &self.rectification
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn build_telemetry(&self, now_ms: u64) -> Telemetry {
        let (phase, uptime, volume) = match self.active {
            Some(ProcessKind::Distillation) => (
                self.distillation.phase_name(),
                self.distillation.uptime_secs(now_ms),
                self.distillation.total_volume_ml(),
            ),
            Some(ProcessKind::Rectification) => (
                self.rectification.phase_name(),
                self.rectification.uptime_secs(now_ms),
                self.rectification.total_volume_ml(),
            ),
            None => ("Idle", 0, 0.0),
        };
        Telemetry {
            temps: self.sampler.snapshot(),
            heater_percent: self.bank.heater_percent(),
            heater_watts: self.bank.heater_watts(),
            pump_flow_ml_per_min: self.bank.pump_flow(),
            valve_open: self.bank.is_valve_open(),
            active: self.active,
            phase,
            uptime_secs: uptime,
            total_volume_ml: volume,
            is_safe: self.supervisor.is_safe(),
        }
    }

    // ── Command dispatch ──────────────────────────────────────

    /// Queue-facing mirror of the method surface.
    pub fn handle_command(
        &mut self,
        cmd: Command,
        now_ms: u64,
        bus: &mut impl ProbeBus,
        hw: &mut impl ActuatorPort,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) {
        match cmd {
            Command::StartDistillation => {
                let _ = self.start_distillation(now_ms, sink);
            }
            Command::StartRectification => {
                let _ = self.start_rectification(now_ms, sink);
            }
            Command::Stop => self.stop(now_ms, hw, sink),
            Command::Pause => self.pause(now_ms),
            Command::Resume => self.resume(now_ms),
            Command::SetHeaterPercent(p) => {
                let _ = self.set_heater_percent(p, hw);
            }
            Command::SetHeaterWatts(w) => {
                let _ = self.set_heater_watts(w, hw);
            }
            Command::SetPumpFlow(f) => {
                let _ = self.set_pump_flow(f, hw);
            }
            Command::OpenValve => {
                let _ = self.set_valve(true, hw);
            }
            Command::CloseValve => {
                let _ = self.set_valve(false, hw);
            }
            Command::EmergencyStop => self.emergency_stop(now_ms, hw, sink),
            Command::ResetSafetyErrors => {
                let _ = self.reset_safety_errors(sink);
            }
            Command::SaveSettings => {
                if let Err(e) = self.save_settings(storage) {
                    warn!("controller: save settings failed: {e}");
                }
            }
            Command::ReloadSettings => {
                if let Err(e) = self.reload_settings(storage) {
                    warn!("controller: reload settings failed: {e}");
                }
            }
            Command::ResetSettings => self.reset_settings(storage),
            Command::Calibrate { probe, offset } => {
                if let Err(e) = self.calibrate_temp_sensor(probe as usize, offset, storage) {
                    warn!("controller: calibration failed: {e}");
                }
            }
            Command::ScanSensors => {
                let _ = self.scan_for_sensors(bus, storage);
            }
        }
    }
}
