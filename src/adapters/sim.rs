//! Host simulation adapters.
//!
//! Scriptable stand-ins for the one-wire bus and the PWM/GPIO hardware,
//! used by the host `main` and the test suites.  Real hardware adapters
//! live with the driver collaborators and implement the same ports.

use crate::app::ports::{ActuatorPort, ProbeBus};
use crate::sensors::Probe;

// ---------------------------------------------------------------------------
// Probe bus
// ---------------------------------------------------------------------------

/// In-memory probe bus: each probe reads a settable temperature, or
/// `None` to simulate an unplugged sensor.
pub struct SimProbeBus {
    temps: [Option<f32>; Probe::COUNT],
}

impl SimProbeBus {
    pub fn new() -> Self {
        Self {
            temps: [None; Probe::COUNT],
        }
    }

    /// Script the next readings for a probe (`None` = disconnected).
    pub fn set_temp(&mut self, probe: Probe, celsius: Option<f32>) {
        self.temps[probe as usize] = celsius;
    }
}

impl Default for SimProbeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeBus for SimProbeBus {
    fn read_celsius(&mut self, probe: Probe) -> Option<f32> {
        self.temps[probe as usize]
    }

    fn scan(&mut self) -> Vec<(Probe, [u8; 8])> {
        Probe::ALL
            .iter()
            .filter(|p| self.temps[**p as usize].is_some())
            .map(|p| {
                // DS18B20-style address: family code, a synthetic serial,
                // and the probe index standing in for the CRC byte.
                let mut addr = [0u8; 8];
                addr[0] = 0x28;
                addr[1] = *p as u8 + 1;
                addr[7] = *p as u8;
                (*p, addr)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Records the last applied hardware state for assertions and logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimActuators {
    pub heater_percent: f32,
    pub pump_flow_ml_per_min: f32,
    pub valve_open: bool,
}

impl SimActuators {
    pub fn new() -> Self {
        Self {
            heater_percent: 0.0,
            pump_flow_ml_per_min: 0.0,
            valve_open: false,
        }
    }
}

impl Default for SimActuators {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorPort for SimActuators {
    fn set_heater_percent(&mut self, percent: f32) {
        self.heater_percent = percent;
    }

    fn set_pump_flow(&mut self, ml_per_min: f32) {
        self.pump_flow_ml_per_min = ml_per_min;
    }

    fn set_valve(&mut self, open: bool) {
        self.valve_open = open;
    }
}
