//! Phase-driven process engines.
//!
//! Both engines share the same capability surface (the [`Process`]
//! trait) and communicate with the rest of the core through a
//! blackboard [`ProcessContext`] built fresh by the controller on every
//! tick: sensor snapshot and supervisor verdict flow in, actuator
//! commands and emergency reports flow out.  Engines hold no ambient
//! state; everything they read arrives through the context.

pub mod distillation;
pub mod rectification;
pub mod reflux;

pub use distillation::DistillationEngine;
pub use rectification::RectificationEngine;

use crate::error::SafetyError;
use crate::sensors::Probe;
use crate::settings::Settings;

/// Which engine is (or may be) active.  At most one at any tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Distillation,
    Rectification,
}

impl ProcessKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Distillation => "distillation",
            Self::Rectification => "rectification",
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator commands (engine → flush)
// ---------------------------------------------------------------------------

/// Desired actuator state for this tick, written by the active engine
/// and applied by the controller's end-of-tick flush.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommands {
    pub heater_watts: f32,
    pub pump_flow_ml_per_min: f32,
    pub valve_open: bool,
}

impl ActuatorCommands {
    /// All actuators off, the safe default every tick starts from.
    pub const fn all_off() -> Self {
        Self {
            heater_watts: 0.0,
            pump_flow_ml_per_min: 0.0,
            valve_open: false,
        }
    }
}

impl Default for ActuatorCommands {
    fn default() -> Self {
        Self::all_off()
    }
}

/// Actuator state that was actually applied at the end of the previous
/// tick, the basis for open-loop volume integration: a supervisor
/// pre-empt never accrues phantom volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppliedState {
    pub heater_watts: f32,
    pub pump_flow_ml_per_min: f32,
    pub valve_open: bool,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-tick blackboard threaded through the active engine.
pub struct ProcessContext<'a> {
    pub now_ms: u64,
    /// Calibrated snapshot by probe index (`None` = disconnected).
    pub temps: [Option<f32>; Probe::COUNT],
    /// The supervisor's verdict for this tick.
    pub safe: bool,
    pub settings: &'a Settings,
    /// What the flush applied at the end of the previous tick.
    pub applied: AppliedState,
    /// What the engine wants applied at the end of this tick.
    pub commands: ActuatorCommands,
    /// Up-channel: a fault the engine asks the supervisor to raise.
    pub emergency: Option<SafetyError>,
}

impl<'a> ProcessContext<'a> {
    pub fn temp(&self, probe: Probe) -> Option<f32> {
        self.temps[probe as usize]
    }
}

// ---------------------------------------------------------------------------
// Process capability
// ---------------------------------------------------------------------------

/// The capability both engines implement.
pub trait Process {
    fn kind(&self) -> ProcessKind;

    /// Begin a run.  Returns `false` if the engine is already running.
    /// Volume counters from the previous run are cleared here.
    fn start(&mut self, now_ms: u64) -> bool;

    /// Return to Idle.  Actuator shutdown is the controller's job
    /// (non-latching all-off); collected volumes stay readable until
    /// the next `start`.
    fn stop(&mut self, now_ms: u64);

    /// Hold the process: heater drops to a maintenance level, pump and
    /// valve go quiet, phase clock keeps running.
    fn pause(&mut self, now_ms: u64);

    /// Restore the phase power; the pump recovers on the next tick.
    fn resume(&mut self, now_ms: u64);

    /// Advance one tick.  No-op outside an active run.
    fn tick(&mut self, ctx: &mut ProcessContext<'_>);

    fn is_running(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn phase_name(&self) -> &'static str;

    fn uptime_secs(&self, now_ms: u64) -> u64;
    fn phase_secs(&self, now_ms: u64) -> u64;

    /// Total collected volume across all fractions, in ml.
    fn total_volume_ml(&self) -> f32;
}

/// Heater power while paused: enough to hold the cube near temperature
/// without driving the process on.
pub(crate) fn maintenance_watts(phase_watts: f32) -> f32 {
    phase_watts * 0.5
}
