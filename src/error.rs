//! Unified error types for the still controller.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! the top-level control loop's error handling uniform.  Safety fault
//! *kinds* live here as a plain enum; human-readable rendering is a
//! `Display` concern so presentation collaborators can localise freely.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// A safety fault was raised.
    Safety(SafetyError),
    /// Settings are invalid or could not be loaded/saved.
    Config(ConfigError),
    /// The persistent storage backend failed.
    Storage(StorageError),
    /// A process-engine precondition was violated.
    Process(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<SafetyError> for Error {
    fn from(e: SafetyError) -> Self {
        Self::Safety(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Safety fault codes
// ---------------------------------------------------------------------------

/// Fault codes raised by the safety supervisor.
///
/// The code is the machine-readable *kind*.  Two orthogonal attributes
/// drive the supervisor's policy:
///
/// * **hard** faults immediately force the actuator bank to the safe
///   state and latch it;
/// * **sticky** faults survive `reset()` and require an external
///   operator re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyError {
    /// Cube temperature above the configured maximum.
    TempHigh,
    /// Cube temperature climbing faster than the configured rate.
    TempRise,
    /// A required temperature probe is disconnected.
    SensorDisconnect,
    /// Coolant outlet too hot — water flow is insufficient.
    WaterFlowLow,
    /// Continuous process runtime exceeded the configured maximum.
    MaxRuntime,
    /// Mains power problem reported by an external collaborator.
    PowerIssue,
    /// Overpressure reported by an external collaborator.
    PressureHigh,
    /// Operator-initiated emergency stop.
    EmergencyStop,
    /// The previous boot ended in a watchdog reset.
    WatchdogTimeout,
}

impl SafetyError {
    /// Hard faults pre-empt the actuators via the latched emergency stop.
    pub const fn is_hard(self) -> bool {
        matches!(
            self,
            Self::TempHigh
                | Self::TempRise
                | Self::WaterFlowLow
                | Self::PressureHigh
                | Self::PowerIssue
        )
    }

    /// Sticky faults cannot be cleared by `reset()`.
    pub const fn is_sticky(self) -> bool {
        matches!(self, Self::SensorDisconnect | Self::EmergencyStop)
    }

    /// Default English description.  Localised strings are the
    /// presentation collaborator's job.
    pub const fn description(self) -> &'static str {
        match self {
            Self::TempHigh => "maximum cube temperature exceeded",
            Self::TempRise => "cube temperature rising too fast",
            Self::SensorDisconnect => "temperature probe disconnected",
            Self::WaterFlowLow => "coolant water flow too low",
            Self::MaxRuntime => "maximum process runtime exceeded",
            Self::PowerIssue => "heater power problem",
            Self::PressureHigh => "pressure too high",
            Self::EmergencyStop => "emergency stop",
            Self::WatchdogTimeout => "watchdog reset detected",
        }
    }
}

impl fmt::Display for SafetyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
