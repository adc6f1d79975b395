//! Actuator bank façade.
//!
//! Single owner of the heater, metering pump, and reflux valve.  Latches
//! the last commanded values so observers can report them, converts
//! between watts and PWM percent, and enforces the emergency latch:
//! after `emergency_all_off` no positive command takes effect until the
//! safety supervisor clears the latch via a successful reset.
//!
//! The bank is deliberately dumb — *whether* an actuator may run is the
//! supervisor's and engines' decision; the bank only carries it out.

use log::{debug, error, info};

use crate::app::ports::ActuatorPort;
use crate::error::SafetyError;
use crate::settings::Settings;

pub struct ActuatorBank {
    heater_percent: f32,
    pump_flow_ml_per_min: f32,
    valve_open: bool,
    /// Set by `emergency_all_off`, cleared only by the supervisor.
    latched: bool,
    max_heater_watts: f32,
    max_pump_flow: f32,
}

impl ActuatorBank {
    pub fn new(settings: &Settings) -> Self {
        Self {
            heater_percent: 0.0,
            pump_flow_ml_per_min: 0.0,
            valve_open: false,
            latched: false,
            max_heater_watts: settings.heater.max_power_watts,
            max_pump_flow: settings.pump.max_flow_ml_per_min,
        }
    }

    /// Pick up new heater/pump limits after a settings change.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.max_heater_watts = settings.heater.max_power_watts;
        self.max_pump_flow = settings.pump.max_flow_ml_per_min;
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn set_heater_percent(&mut self, percent: f32, hw: &mut impl ActuatorPort) {
        let percent = percent.clamp(0.0, 100.0);
        if self.latched && percent > 0.0 {
            debug!("actuators: heater command ignored while latched");
            return;
        }
        if (percent - self.heater_percent).abs() > f32::EPSILON {
            self.heater_percent = percent;
            hw.set_heater_percent(percent);
        }
    }

    /// Convenience wrapper converting through `max_heater_watts`.
    pub fn set_heater_watts(&mut self, watts: f32, hw: &mut impl ActuatorPort) {
        let percent = if self.max_heater_watts > 0.0 {
            watts / self.max_heater_watts * 100.0
        } else {
            0.0
        };
        self.set_heater_percent(percent, hw);
    }

    pub fn set_pump_flow(&mut self, ml_per_min: f32, hw: &mut impl ActuatorPort) {
        let flow = ml_per_min.clamp(0.0, self.max_pump_flow);
        if self.latched && flow > 0.0 {
            debug!("actuators: pump command ignored while latched");
            return;
        }
        if (flow - self.pump_flow_ml_per_min).abs() > f32::EPSILON {
            self.pump_flow_ml_per_min = flow;
            hw.set_pump_flow(flow);
        }
    }

    pub fn pump_stop(&mut self, hw: &mut impl ActuatorPort) {
        self.set_pump_flow(0.0, hw);
    }

    pub fn set_valve(&mut self, open: bool, hw: &mut impl ActuatorPort) {
        if self.latched && open {
            debug!("actuators: valve command ignored while latched");
            return;
        }
        if open != self.valve_open {
            self.valve_open = open;
            hw.set_valve(open);
        }
    }

    pub fn valve_open(&mut self, hw: &mut impl ActuatorPort) {
        self.set_valve(true, hw);
    }

    pub fn valve_close(&mut self, hw: &mut impl ActuatorPort) {
        self.set_valve(false, hw);
    }

    /// Drive everything to the safe state without latching — used by
    /// `stop()` and by the per-tick verdict enforcement for soft faults.
    pub fn all_off(&mut self, hw: &mut impl ActuatorPort) {
        self.set_heater_percent(0.0, hw);
        self.set_pump_flow(0.0, hw);
        self.set_valve(false, hw);
    }

    /// Unconditionally drive `(0, stopped, closed)` and latch.
    ///
    /// The latch makes the supervisor's pre-empt authoritative: any
    /// racing engine command in the same tick is applied earlier in the
    /// flush and then overridden here, and later positive commands are
    /// ignored until [`clear_latch`](Self::clear_latch).
    pub fn emergency_all_off(&mut self, reason: SafetyError, hw: &mut impl ActuatorPort) {
        if !self.latched {
            error!("actuators: EMERGENCY ALL-OFF ({reason})");
        }
        self.all_off(hw);
        self.latched = true;
    }

    /// Called by the supervisor after a successful `reset()`.
    pub fn clear_latch(&mut self) {
        if self.latched {
            info!("actuators: emergency latch cleared");
        }
        self.latched = false;
    }

    // ── Observers ─────────────────────────────────────────────

    pub fn heater_percent(&self) -> f32 {
        self.heater_percent
    }

    pub fn heater_watts(&self) -> f32 {
        self.heater_percent * self.max_heater_watts / 100.0
    }

    pub fn pump_flow(&self) -> f32 {
        self.pump_flow_ml_per_min
    }

    pub fn is_pump_running(&self) -> bool {
        self.pump_flow_ml_per_min > 0.0
    }

    pub fn is_valve_open(&self) -> bool {
        self.valve_open
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimActuators;

    fn make_bank() -> (ActuatorBank, SimActuators) {
        (
            ActuatorBank::new(&Settings::default()),
            SimActuators::new(),
        )
    }

    #[test]
    fn watts_percent_conversion() {
        let (mut bank, mut hw) = make_bank();
        bank.set_heater_watts(1000.0, &mut hw); // Half of the 2000 W rating.
        assert_eq!(bank.heater_percent(), 50.0);
        assert_eq!(bank.heater_watts(), 1000.0);
        assert_eq!(hw.heater_percent, 50.0);
    }

    #[test]
    fn heater_percent_is_clamped() {
        let (mut bank, mut hw) = make_bank();
        bank.set_heater_percent(140.0, &mut hw);
        assert_eq!(bank.heater_percent(), 100.0);
        bank.set_heater_percent(-3.0, &mut hw);
        assert_eq!(bank.heater_percent(), 0.0);
    }

    #[test]
    fn pump_flow_clamped_to_max() {
        let (mut bank, mut hw) = make_bank();
        bank.set_pump_flow(99_999.0, &mut hw);
        assert_eq!(bank.pump_flow(), 2000.0);
        assert!(bank.is_pump_running());
        bank.pump_stop(&mut hw);
        assert!(!bank.is_pump_running());
    }

    #[test]
    fn emergency_latch_blocks_positive_commands() {
        let (mut bank, mut hw) = make_bank();
        bank.set_heater_percent(80.0, &mut hw);
        bank.set_pump_flow(250.0, &mut hw);
        bank.valve_open(&mut hw);

        bank.emergency_all_off(SafetyError::TempHigh, &mut hw);
        assert!(bank.is_latched());
        assert_eq!(bank.heater_percent(), 0.0);
        assert_eq!(bank.pump_flow(), 0.0);
        assert!(!bank.is_valve_open());
        assert_eq!(hw.heater_percent, 0.0);

        // Positive commands are swallowed while latched.
        bank.set_heater_percent(80.0, &mut hw);
        bank.set_pump_flow(250.0, &mut hw);
        bank.valve_open(&mut hw);
        assert_eq!(bank.heater_percent(), 0.0);
        assert_eq!(bank.pump_flow(), 0.0);
        assert!(!bank.is_valve_open());

        bank.clear_latch();
        bank.set_heater_percent(40.0, &mut hw);
        assert_eq!(bank.heater_percent(), 40.0);
    }

    #[test]
    fn all_off_does_not_latch() {
        let (mut bank, mut hw) = make_bank();
        bank.set_heater_percent(80.0, &mut hw);
        bank.all_off(&mut hw);
        assert!(!bank.is_latched());
        bank.set_heater_percent(30.0, &mut hw);
        assert_eq!(bank.heater_percent(), 30.0);
    }
}
