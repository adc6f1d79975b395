//! Safety supervisor.
//!
//! Runs **every tick before the active engine** and evaluates the
//! safety invariants against the latest sensor state.  The engine
//! observes the verdict in the same tick; hard faults additionally
//! pre-empt the actuator bank directly via the latched emergency stop,
//! so the supervisor always wins a racing engine command.
//!
//! ## Fault lifecycle
//!
//! 1. A check fails (e.g. cube overtemperature) during a process.
//! 2. The supervisor records the code and category; hard faults
//!    additionally latch the actuator bank at `(0, stopped, closed)`.
//! 3. The engine sees `is_safe == false` and transitions to `Error`.
//! 4. Non-sticky faults clear when the condition clears or through
//!    `reset()`; `SensorDisconnect` and the operator emergency stop
//!    survive `reset()` and need an external re-arm.

use log::{error, info, warn};

use crate::actuators::ActuatorBank;
use crate::app::ports::ActuatorPort;
use crate::drivers::watchdog::{reset_reason, ResetReason, Watchdog};
use crate::error::SafetyError;
use crate::process::ProcessKind;
use crate::sensors::{Probe, SensorSampler};
use crate::settings::SafetySettings;

/// Minimum interval between safety evaluations.
pub const SAFETY_CHECK_INTERVAL_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot of the supervisor's verdict and fault bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyStatus {
    pub is_safe: bool,
    pub error: Option<SafetyError>,
    /// When `error` was first raised.
    pub error_time_ms: u64,
    pub sensor_error: bool,
    pub temperature_error: bool,
    pub water_flow_error: bool,
    pub pressure_error: bool,
    pub runtime_error: bool,
    pub emergency_stop: bool,
    /// Informational: the previous boot ended in a watchdog reset, or
    /// the simulated watchdog expired.  Does not unset `is_safe`.
    pub watchdog_reset: bool,
}

impl SafetyStatus {
    const fn ok() -> Self {
        Self {
            is_safe: true,
            error: None,
            error_time_ms: 0,
            sensor_error: false,
            temperature_error: false,
            water_flow_error: false,
            pressure_error: false,
            runtime_error: false,
            emergency_stop: false,
            watchdog_reset: false,
        }
    }

    /// English description of the current condition; presentation
    /// collaborators localise from the `error` code instead.
    pub fn description(&self) -> &'static str {
        match self.error {
            Some(code) => code.description(),
            None => "system nominal",
        }
    }
}

impl Default for SafetyStatus {
    fn default() -> Self {
        Self::ok()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct SafetySupervisor {
    status: SafetyStatus,
    /// 0 = never evaluated.
    last_check_ms: u64,
    process_start_ms: u64,
    process_running: bool,
    watchdog: Watchdog,
}

impl SafetySupervisor {
    pub fn new(settings: &SafetySettings) -> Self {
        let mut status = SafetyStatus::ok();
        if reset_reason() == ResetReason::Watchdog {
            warn!("safety: previous boot ended in a watchdog reset");
            status.watchdog_reset = true;
        }
        Self {
            status,
            last_check_ms: 0,
            process_start_ms: 0,
            process_running: false,
            watchdog: Watchdog::new(settings.watchdog_enabled, settings.watchdog_timeout_secs),
        }
    }

    // ── Process bookkeeping ───────────────────────────────────

    /// Arm the runtime clock.  Wired into the engines' start paths by
    /// the controller.
    pub fn on_process_start(&mut self, now_ms: u64) {
        self.process_start_ms = now_ms;
        self.process_running = true;
        // A fresh run clears whatever non-sticky faults were left over.
        if !self.status.emergency_stop && !self.status.sensor_error {
            self.clear_nonsticky();
        }
        info!("safety: runtime clock armed");
    }

    pub fn on_process_end(&mut self) {
        if self.process_running {
            info!("safety: runtime clock disarmed");
        }
        self.process_running = false;
    }

    /// Seconds the current process has been running.
    pub fn process_runtime_secs(&self, now_ms: u64) -> u64 {
        if self.process_running {
            now_ms.saturating_sub(self.process_start_ms) / 1000
        } else {
            0
        }
    }

    // ── Per-tick evaluation ───────────────────────────────────

    /// Evaluate the invariants for the active engine.  Throttled to
    /// [`SAFETY_CHECK_INTERVAL_MS`]; pets the watchdog on every pass.
    pub fn tick(
        &mut self,
        now_ms: u64,
        sampler: &SensorSampler,
        cfg: &SafetySettings,
        active: Option<ProcessKind>,
        bank: &mut ActuatorBank,
        hw: &mut impl ActuatorPort,
    ) {
        if self.last_check_ms != 0
            && now_ms.saturating_sub(self.last_check_ms) < SAFETY_CHECK_INTERVAL_MS
        {
            return;
        }
        self.last_check_ms = now_ms;

        if cfg.watchdog_enabled {
            if self.watchdog.expired(now_ms) && !self.status.watchdog_reset {
                warn!("safety: simulated watchdog expired");
                self.status.watchdog_reset = true;
            }
            self.watchdog.pet(now_ms);
        }

        if !self.process_running {
            return;
        }

        let verdict = match active {
            Some(ProcessKind::Distillation) => self.check_distillation(sampler, cfg, now_ms),
            Some(ProcessKind::Rectification) => self.check_rectification(sampler, cfg, now_ms),
            None => None,
        };

        match verdict {
            Some(code) => self.raise(code, now_ms, cfg, bank, hw),
            None => self.self_clear(),
        }
    }

    /// Invariants for a distillation run.
    fn check_distillation(
        &self,
        sampler: &SensorSampler,
        cfg: &SafetySettings,
        now_ms: u64,
    ) -> Option<SafetyError> {
        if !sampler.is_connected(Probe::Cube) {
            return Some(SafetyError::SensorDisconnect);
        }
        self.check_common(sampler, cfg, now_ms)
    }

    /// Invariants for a rectification run, which additionally requires
    /// the reflux probe.
    fn check_rectification(
        &self,
        sampler: &SensorSampler,
        cfg: &SafetySettings,
        now_ms: u64,
    ) -> Option<SafetyError> {
        if !sampler.is_connected(Probe::Cube) || !sampler.is_connected(Probe::Reflux) {
            return Some(SafetyError::SensorDisconnect);
        }
        self.check_common(sampler, cfg, now_ms)
    }

    fn check_common(
        &self,
        sampler: &SensorSampler,
        cfg: &SafetySettings,
        now_ms: u64,
    ) -> Option<SafetyError> {
        if let Some(cube) = sampler.temperature(Probe::Cube) {
            if cube > cfg.max_cube_temp {
                return Some(SafetyError::TempHigh);
            }
        }
        if let Some(water) = sampler.temperature(Probe::WaterOut) {
            if water > cfg.max_water_out_temp {
                return Some(SafetyError::WaterFlowLow);
            }
        }
        if sampler.rise_rate(Probe::Cube) > cfg.max_temp_rise_rate {
            return Some(SafetyError::TempRise);
        }
        let max_runtime_ms = u64::from(cfg.max_runtime_hours) * 3_600_000;
        if now_ms.saturating_sub(self.process_start_ms) >= max_runtime_ms {
            return Some(SafetyError::MaxRuntime);
        }
        None
    }

    // ── Fault entry points ────────────────────────────────────

    /// Record a fault and, for hard codes, pre-empt the actuators.
    /// Also the entry point for externally-raised faults
    /// (`PressureHigh`, `PowerIssue`, engine overtemperature reports).
    pub fn raise(
        &mut self,
        code: SafetyError,
        now_ms: u64,
        cfg: &SafetySettings,
        bank: &mut ActuatorBank,
        hw: &mut impl ActuatorPort,
    ) {
        if self.status.error != Some(code) {
            error!("safety: FAULT {code}");
            self.status.error = Some(code);
            self.status.error_time_ms = now_ms;
        }
        self.status.is_safe = false;

        match code {
            SafetyError::SensorDisconnect => self.status.sensor_error = true,
            SafetyError::TempHigh | SafetyError::TempRise => {
                self.status.temperature_error = true
            }
            SafetyError::WaterFlowLow => self.status.water_flow_error = true,
            SafetyError::PressureHigh => self.status.pressure_error = true,
            SafetyError::MaxRuntime => self.status.runtime_error = true,
            SafetyError::EmergencyStop => self.status.emergency_stop = true,
            SafetyError::WatchdogTimeout => self.status.watchdog_reset = true,
            SafetyError::PowerIssue => {}
        }

        if code.is_hard() && cfg.emergency_stop_enabled {
            bank.emergency_all_off(code, hw);
        }
    }

    /// Operator-initiated emergency stop.  Sticky.
    pub fn emergency_stop(
        &mut self,
        now_ms: u64,
        bank: &mut ActuatorBank,
        hw: &mut impl ActuatorPort,
    ) {
        error!("safety: EMERGENCY STOP requested by operator");
        self.status.is_safe = false;
        self.status.emergency_stop = true;
        self.status.error = Some(SafetyError::EmergencyStop);
        self.status.error_time_ms = now_ms;
        bank.emergency_all_off(SafetyError::EmergencyStop, hw);
    }

    /// Clear non-sticky faults and the actuator latch.
    ///
    /// Returns `false`, leaving everything untouched, while a sticky
    /// fault stands: those need the external operator re-arm.
    pub fn reset(&mut self, bank: &mut ActuatorBank) -> bool {
        if self.status.emergency_stop || self.status.sensor_error {
            warn!("safety: reset refused, sticky fault requires operator re-arm");
            return false;
        }
        self.clear_nonsticky();
        self.status.watchdog_reset = false; // Acknowledged.
        bank.clear_latch();
        info!("safety: errors reset");
        true
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> SafetyStatus {
        self.status
    }

    pub fn is_safe(&self) -> bool {
        self.status.is_safe
    }

    // ── Internal ──────────────────────────────────────────────

    /// Evaluator pass found no fault: non-sticky, evaluator-owned
    /// faults self-clear.  Externally-raised codes are invisible to the
    /// checks and only clear via `reset()`.
    fn self_clear(&mut self) {
        let evaluator_owned = matches!(
            self.status.error,
            Some(
                SafetyError::TempHigh
                    | SafetyError::TempRise
                    | SafetyError::WaterFlowLow
                    | SafetyError::MaxRuntime
            )
        );
        if !self.status.is_safe
            && evaluator_owned
            && !self.status.emergency_stop
            && !self.status.sensor_error
        {
            info!("safety: condition cleared");
            self.clear_nonsticky();
        }
    }

    fn clear_nonsticky(&mut self) {
        self.status.is_safe = true;
        self.status.error = None;
        self.status.temperature_error = false;
        self.status.water_flow_error = false;
        self.status.pressure_error = false;
        self.status.runtime_error = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
