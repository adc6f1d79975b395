//! Versioned persistent system settings.
//!
//! A single record holds every tunable the controller consumes: probe
//! bookkeeping, heater and pump parameters, the full distillation and
//! rectification parameter sets, safety thresholds, and the WiFi
//! credentials consumed by the network collaborator.
//!
//! The record is persisted as a postcard blob behind a [`StoragePort`].
//! Compatibility is gated by `settings_version`: a mismatched or
//! undecodable blob is replaced with factory defaults, which are then
//! persisted.  Engines only ever see a whole snapshot: mutations
//! happen on an in-memory copy that is flushed in one atomic write.

use heapless::String as FixedString;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, StoragePort};
use crate::sensors::Probe;

/// Bump on any incompatible layout change; invalidates stored records.
pub const SETTINGS_VERSION: u32 = 1;

const SETTINGS_NAMESPACE: &str = "stillpilot";
const SETTINGS_KEY: &str = "settings";
const MAX_BLOB_SIZE: usize = 2048;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaterSettings {
    /// Heater element rating, the 100 % PWM point.
    pub max_power_watts: f32,
    /// Supply voltage, informational for the power collaborator.
    pub volts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpSettings {
    pub heads_flow_rate: f32,
    pub body_flow_rate: f32,
    pub tails_flow_rate: f32,
    /// Open-loop ml/min per PWM unit correction.
    pub calibration_factor: f32,
    /// Upper bound accepted by the actuator bank.
    pub max_flow_ml_per_min: f32,
}

/// Which Body-phase exit predicate set the rectification engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RectModel {
    /// Volume and absolute-temperature exits only.
    Classic,
    /// Additionally ends Body when the reflux temperature has climbed
    /// `temp_delta_end_body` above the in-phase minimum.
    Alternative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectificationSettings {
    pub model: RectModel,
    pub heating_power_watts: f32,
    pub stabilisation_power_watts: f32,
    pub body_power_watts: f32,
    pub tails_power_watts: f32,
    /// Reflux temperature that ends Heating.
    pub heads_temp: f32,
    /// Reflux temperature reference for the body fraction.
    pub body_temp: f32,
    /// Reflux temperature that ends Body.
    pub tails_temp: f32,
    /// Reflux or cube temperature that ends Tails.
    pub end_temp: f32,
    pub max_cube_temp: f32,
    /// Cube temperature that ends Body.
    pub tails_cube_temp: f32,
    /// Body exit delta for the alternative model.
    pub temp_delta_end_body: f32,
    pub stabilisation_time_mins: u32,
    pub post_heads_stabilisation_time_mins: u32,
    pub heads_volume_ml: u32,
    pub body_volume_ml: u32,
    /// R in R:D (refluxed over drawn).
    pub reflux_ratio: f32,
    pub reflux_period_secs: u32,
    pub use_same_flow_for_tails: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationSettings {
    pub heating_power_watts: f32,
    pub distillation_power_watts: f32,
    /// Cube temperature that ends Heating.
    pub start_collecting_temp: f32,
    pub end_temp: f32,
    pub max_cube_temp: f32,
    pub separate_heads: bool,
    pub heads_volume_ml: u32,
    pub flow_rate: f32,
    pub heads_flow_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    pub max_runtime_hours: u32,
    pub max_cube_temp: f32,
    /// °C/min.
    pub max_temp_rise_rate: f32,
    pub min_water_out_temp: f32,
    pub max_water_out_temp: f32,
    pub emergency_stop_enabled: bool,
    pub watchdog_enabled: bool,
    pub watchdog_timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiSettings {
    pub ssid: FixedString<32>,
    pub password: FixedString<64>,
    pub use_access_point: bool,
}

// ---------------------------------------------------------------------------
// The record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub settings_version: u32,
    /// One-wire ROM addresses by probe index.
    pub probe_addresses: [[u8; 8]; Probe::COUNT],
    pub probe_enabled: [bool; Probe::COUNT],
    pub probe_calibration: [f32; Probe::COUNT],
    pub heater: HeaterSettings,
    pub pump: PumpSettings,
    pub rectification: RectificationSettings,
    pub distillation: DistillationSettings,
    pub safety: SafetySettings,
    pub wifi: WifiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut ssid = FixedString::new();
        let _ = ssid.push_str("Distiller");
        let mut password = FixedString::new();
        let _ = password.push_str("password");

        Self {
            settings_version: SETTINGS_VERSION,
            probe_addresses: [[0; 8]; Probe::COUNT],
            probe_enabled: [false; Probe::COUNT],
            probe_calibration: [0.0; Probe::COUNT],
            heater: HeaterSettings {
                max_power_watts: 2000.0,
                volts: 220,
            },
            pump: PumpSettings {
                heads_flow_rate: 50.0,
                body_flow_rate: 250.0,
                tails_flow_rate: 350.0,
                calibration_factor: 1.0,
                max_flow_ml_per_min: 2000.0,
            },
            rectification: RectificationSettings {
                model: RectModel::Classic,
                heating_power_watts: 1800.0,
                stabilisation_power_watts: 1200.0,
                body_power_watts: 1000.0,
                tails_power_watts: 1200.0,
                heads_temp: 78.0,
                body_temp: 78.3,
                tails_temp: 92.0,
                end_temp: 97.0,
                max_cube_temp: 101.0,
                tails_cube_temp: 95.0,
                temp_delta_end_body: 0.5,
                stabilisation_time_mins: 30,
                post_heads_stabilisation_time_mins: 10,
                heads_volume_ml: 150,
                body_volume_ml: 2000,
                reflux_ratio: 3.0,
                reflux_period_secs: 60,
                use_same_flow_for_tails: true,
            },
            distillation: DistillationSettings {
                heating_power_watts: 2000.0,
                distillation_power_watts: 1500.0,
                start_collecting_temp: 70.0,
                end_temp: 97.0,
                max_cube_temp: 101.0,
                separate_heads: true,
                heads_volume_ml: 200,
                flow_rate: 800.0,
                heads_flow_rate: 200.0,
            },
            safety: SafetySettings {
                max_runtime_hours: 12,
                max_cube_temp: 105.0,
                max_temp_rise_rate: 5.0,
                min_water_out_temp: 5.0,
                max_water_out_temp: 50.0,
                emergency_stop_enabled: true,
                watchdog_enabled: true,
                watchdog_timeout_secs: 30,
            },
            wifi: WifiSettings {
                ssid,
                password,
                use_access_point: true,
            },
        }
    }
}

impl Settings {
    /// Factory defaults with every probe enabled: the usual starting
    /// point on a rig whose bus has been scanned, and for tests.
    pub fn factory_defaults_all_probes() -> Self {
        let mut s = Self::default();
        s.probe_enabled = [true; Probe::COUNT];
        s
    }

    /// Range-check every tunable.  Rejects rather than clamps, so a
    /// compromised config channel cannot smuggle dangerous parameters
    /// in (e.g. an absurd `max_cube_temp` disabling the overtemp trip).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100.0..=10_000.0).contains(&self.heater.max_power_watts) {
            return Err(ConfigError::ValidationFailed(
                "heater.max_power_watts must be 100–10000",
            ));
        }
        if self.pump.max_flow_ml_per_min <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "pump.max_flow_ml_per_min must be positive",
            ));
        }
        for (label, flow) in [
            ("pump.heads_flow_rate", self.pump.heads_flow_rate),
            ("pump.body_flow_rate", self.pump.body_flow_rate),
            ("pump.tails_flow_rate", self.pump.tails_flow_rate),
            ("distillation.flow_rate", self.distillation.flow_rate),
            (
                "distillation.heads_flow_rate",
                self.distillation.heads_flow_rate,
            ),
        ] {
            if !(0.0..=self.pump.max_flow_ml_per_min).contains(&flow) {
                warn!("settings: {label} = {flow} outside pump range");
                return Err(ConfigError::ValidationFailed(
                    "pump flow outside 0..max_flow_ml_per_min",
                ));
            }
        }
        if self.rectification.reflux_ratio <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "rectification.reflux_ratio must be positive",
            ));
        }
        if !(1..=3600).contains(&self.rectification.reflux_period_secs) {
            return Err(ConfigError::ValidationFailed(
                "rectification.reflux_period_secs must be 1–3600",
            ));
        }
        if !(1..=48).contains(&self.safety.max_runtime_hours) {
            return Err(ConfigError::ValidationFailed(
                "safety.max_runtime_hours must be 1–48",
            ));
        }
        if self.safety.max_temp_rise_rate <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "safety.max_temp_rise_rate must be positive",
            ));
        }
        if !(60.0..=150.0).contains(&self.safety.max_cube_temp) {
            return Err(ConfigError::ValidationFailed(
                "safety.max_cube_temp must be 60–150",
            ));
        }
        if self.safety.min_water_out_temp >= self.safety.max_water_out_temp {
            return Err(ConfigError::ValidationFailed(
                "safety water-out band must satisfy min < max",
            ));
        }
        if !(5..=300).contains(&self.safety.watchdog_timeout_secs) {
            return Err(ConfigError::ValidationFailed(
                "safety.watchdog_timeout_secs must be 5–300",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load the record, falling back to (and persisting) factory defaults
/// on a missing blob, decode failure, or version mismatch.
///
/// Returns the active settings and whether the stored record was used.
pub fn init(storage: &mut impl StoragePort) -> (Settings, bool) {
    match load(storage) {
        Ok(settings) => {
            info!("settings: loaded stored record (v{})", settings.settings_version);
            (settings, true)
        }
        Err(e) => {
            warn!("settings: {e}; applying factory defaults");
            let defaults = Settings::default();
            if let Err(e) = save(storage, &defaults) {
                warn!("settings: persisting defaults failed: {e}");
            }
            (defaults, false)
        }
    }
}

/// Decode the stored record, enforcing the version gate.
pub fn load(storage: &impl StoragePort) -> Result<Settings, ConfigError> {
    let mut buf = [0u8; MAX_BLOB_SIZE];
    let len = storage
        .read(SETTINGS_NAMESPACE, SETTINGS_KEY, &mut buf)
        .map_err(|_| ConfigError::NotFound)?;
    let settings: Settings =
        postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
    if settings.settings_version != SETTINGS_VERSION {
        return Err(ConfigError::VersionMismatch {
            found: settings.settings_version,
            expected: SETTINGS_VERSION,
        });
    }
    settings.validate()?;
    Ok(settings)
}

/// Validate, stamp the current version, and persist in one write.
pub fn save(storage: &mut impl StoragePort, settings: &Settings) -> Result<(), ConfigError> {
    settings.validate()?;
    let mut stamped = settings.clone();
    stamped.settings_version = SETTINGS_VERSION;
    let blob = postcard::to_allocvec(&stamped).map_err(|_| ConfigError::IoError)?;
    storage
        .write(SETTINGS_NAMESPACE, SETTINGS_KEY, &blob)
        .map_err(|_| ConfigError::IoError)?;
    info!("settings: saved ({} bytes)", blob.len());
    Ok(())
}

/// Overwrite the stored record with factory defaults.
pub fn reset_to_defaults(storage: &mut impl StoragePort) -> Settings {
    let defaults = Settings::default();
    if let Err(e) = save(storage, &defaults) {
        warn!("settings: reset could not persist defaults: {e}");
    }
    defaults
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
