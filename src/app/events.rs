//! Outbound application events.
//!
//! The [`Controller`](super::service::Controller) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the
//! other side decide what to do with them — serial log, display
//! update, WebSocket broadcast.

use crate::error::SafetyError;
use crate::process::ProcessKind;
use crate::sensors::Probe;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A process run began.
    ProcessStarted(ProcessKind),
    /// A process run was stopped by the operator.
    ProcessStopped(ProcessKind),
    /// A process run reached its end condition.
    ProcessCompleted(ProcessKind),
    /// A process run aborted into the Error phase.
    ProcessFailed(ProcessKind),
    /// The active engine moved between phases.
    PhaseChanged {
        process: ProcessKind,
        from: &'static str,
        to: &'static str,
    },
    /// The supervisor raised a new fault.
    FaultRaised(SafetyError),
    /// The operator triggered the emergency stop.
    EmergencyStopped,
    /// Non-sticky safety errors were cleared.
    SafetyReset,
    /// Periodic telemetry snapshot.
    Telemetry(Telemetry),
}

/// A point-in-time snapshot suitable for logging or transmission.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    /// Calibrated temperatures by probe index (`None` = disconnected).
    pub temps: [Option<f32>; Probe::COUNT],
    pub heater_percent: f32,
    pub heater_watts: f32,
    pub pump_flow_ml_per_min: f32,
    pub valve_open: bool,
    pub active: Option<ProcessKind>,
    pub phase: &'static str,
    pub uptime_secs: u64,
    pub total_volume_ml: f32,
    pub is_safe: bool,
}
