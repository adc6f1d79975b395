//! Port traits: the boundary between the control core and the outside
//! world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Driven adapters (the one-wire bus, the PWM/GPIO hardware, event
//! sinks, persistent storage) implement these traits.  The
//! [`Controller`](super::service::Controller) consumes them via
//! generics, so the domain core never touches hardware directly.

use crate::sensors::Probe;

// ───────────────────────────────────────────────────────────────
// Probe bus (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port over the one-wire temperature bus.
pub trait ProbeBus {
    /// Raw (uncalibrated) reading, `None` when the probe is absent.
    fn read_celsius(&mut self, probe: Probe) -> Option<f32>;

    /// Enumerate the bus.  Returns each answering probe with its
    /// 8-byte ROM address.
    fn scan(&mut self) -> Vec<(Probe, [u8; 8])>;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the actuator bank forwards every applied change
/// through this trait exactly once.
pub trait ActuatorPort {
    /// Heater PWM duty in percent (0.0–100.0).
    fn set_heater_percent(&mut self, percent: f32);

    /// Metering pump flow in ml/min (0.0 = stopped); the adapter maps
    /// this to PWM via the pump calibration.
    fn set_pump_flow(&mut self, ml_per_min: f32);

    /// Reflux valve position.
    fn set_valve(&mut self, open: bool);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go — serial log,
/// display, WebSocket broadcast.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ EEPROM / NVS)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the settings blob.
///
/// Write operations MUST be atomic: a power loss never leaves a
/// half-written record visible to a later read.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from settings load/save.
#[derive(Debug)]
pub enum ConfigError {
    /// No record found in storage (first boot).
    NotFound,
    /// Stored record failed to decode.
    Corrupted,
    /// Stored record was written by an incompatible firmware.
    VersionMismatch { found: u32, expected: u32 },
    /// A field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "settings record not found"),
            Self::Corrupted => write!(f, "settings record corrupted"),
            Self::VersionMismatch { found, expected } => {
                write!(f, "settings version {found} (expected {expected})")
            }
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
