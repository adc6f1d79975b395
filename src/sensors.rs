//! Temperature probe sampler.
//!
//! Owns the semantic probe identities, per-probe calibration, the short
//! circular temperature history, and the rise-rate estimate derived
//! from it.  The sampler is the *sole writer* of the history ring; the
//! safety supervisor and process engines are pure readers.
//!
//! ## Dual-target design
//!
//! All bus access goes through the [`ProbeBus`] port.  On hardware that
//! is the one-wire driver; on host/test it is a scriptable simulation
//! (`adapters::sim::SimProbeBus`).

use log::{debug, info};

use crate::app::ports::ProbeBus;
use crate::settings::Settings;

/// Sentinel stored in the ring for a disconnected or disabled probe.
pub const DISCONNECTED_C: f32 = -127.0;

/// Ring entries below this are treated as invalid when deriving rates.
const VALID_FLOOR_C: f32 = -100.0;

/// Depth of the temperature history ring.
const HISTORY_LEN: usize = 10;

/// Minimum span between ring entries for a defined rise-rate.
const RATE_MIN_SPAN_MS: u64 = 30_000;

/// Entries older than this never participate in the rise-rate.
const RATE_MAX_SPAN_MS: u64 = 300_000;

/// Default probe read interval.
pub const UPDATE_INTERVAL_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Probe identity
// ---------------------------------------------------------------------------

/// Semantic probe positions along the apparatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Probe {
    /// Boiling vessel containing the mash.
    Cube = 0,
    /// Mid-column probe.
    Column = 1,
    /// Top of the column, the primary vapour-temperature indicator.
    Reflux = 2,
    /// Coolant outlet.
    WaterOut = 3,
    /// Atmospheric vent (TSA) probe.
    Tsa = 4,
}

impl Probe {
    /// Total number of probes; sizes every per-probe array.
    pub const COUNT: usize = 5;

    /// All probes in index order.
    pub const ALL: [Probe; Self::COUNT] = [
        Probe::Cube,
        Probe::Column,
        Probe::Reflux,
        Probe::WaterOut,
        Probe::Tsa,
    ];

    /// Convert an array index back to a probe.  Out-of-range indices
    /// fall back to `Cube` in release builds.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Cube,
            1 => Self::Column,
            2 => Self::Reflux,
            3 => Self::WaterOut,
            4 => Self::Tsa,
            _ => {
                debug_assert!(false, "invalid probe index: {idx}");
                Self::Cube
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Cube => "cube",
            Self::Column => "column",
            Self::Reflux => "reflux",
            Self::WaterOut => "water-out",
            Self::Tsa => "tsa",
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Periodic probe sampler with calibration and history.
pub struct SensorSampler {
    update_interval_ms: u64,
    /// 0 = never sampled.
    last_sample_ms: u64,
    enabled: [bool; Probe::COUNT],
    calibration: [f32; Probe::COUNT],
    /// Latest calibrated reading per probe (sentinel when absent).
    latest: [f32; Probe::COUNT],
    /// Shared timestamp column for the ring (0 = slot never written).
    hist_times: [u64; HISTORY_LEN],
    /// Per-probe ring values, sentinel for invalid entries.
    hist_values: [[f32; HISTORY_LEN]; Probe::COUNT],
    hist_index: usize,
}

impl SensorSampler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            update_interval_ms: UPDATE_INTERVAL_MS,
            last_sample_ms: 0,
            enabled: settings.probe_enabled,
            calibration: settings.probe_calibration,
            latest: [DISCONNECTED_C; Probe::COUNT],
            hist_times: [0; HISTORY_LEN],
            hist_values: [[DISCONNECTED_C; HISTORY_LEN]; Probe::COUNT],
            hist_index: 0,
        }
    }

    /// Re-apply probe enable flags and calibration after a settings change.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.enabled = settings.probe_enabled;
        self.calibration = settings.probe_calibration;
    }

    /// Sample every enabled probe if the update interval elapsed.
    /// Idempotent within an interval.
    pub fn tick(&mut self, now_ms: u64, bus: &mut impl ProbeBus) {
        if self.last_sample_ms != 0
            && now_ms.saturating_sub(self.last_sample_ms) < self.update_interval_ms
        {
            return;
        }
        self.last_sample_ms = now_ms;

        self.hist_index = (self.hist_index + 1) % HISTORY_LEN;
        self.hist_times[self.hist_index] = now_ms;

        for probe in Probe::ALL {
            let idx = probe as usize;
            let value = if self.enabled[idx] {
                match bus.read_celsius(probe) {
                    Some(raw) => raw + self.calibration[idx],
                    None => DISCONNECTED_C,
                }
            } else {
                DISCONNECTED_C
            };
            self.latest[idx] = value;
            self.hist_values[idx][self.hist_index] = value;
        }
    }

    /// Latest calibrated reading, `None` when disconnected or disabled.
    pub fn temperature(&self, probe: Probe) -> Option<f32> {
        let v = self.latest[probe as usize];
        (v > VALID_FLOOR_C).then_some(v)
    }

    pub fn is_connected(&self, probe: Probe) -> bool {
        self.temperature(probe).is_some()
    }

    /// Number of probes currently delivering readings.
    pub fn connected_count(&self) -> usize {
        Probe::ALL.iter().filter(|p| self.is_connected(**p)).count()
    }

    /// Snapshot of every probe for the process context.
    pub fn snapshot(&self) -> [Option<f32>; Probe::COUNT] {
        let mut out = [None; Probe::COUNT];
        for probe in Probe::ALL {
            out[probe as usize] = self.temperature(probe);
        }
        out
    }

    /// Temperature rise-rate in °C/min.
    ///
    /// Pairs the newest ring entry with the oldest valid entry whose age
    /// lies in the [30 s, 300 s] window.  Returns 0.0 when no such pair
    /// exists, so the caller never sees a division by zero or a rate
    /// contaminated by disconnect sentinels.
    pub fn rise_rate(&self, probe: Probe) -> f32 {
        let pi = probe as usize;
        let cur = self.hist_index;
        let cur_time = self.hist_times[cur];
        let cur_value = self.hist_values[pi][cur];
        if cur_time == 0 || cur_value <= VALID_FLOOR_C {
            return 0.0;
        }

        let mut oldest: Option<(u64, f32)> = None;
        for back in 1..HISTORY_LEN {
            let idx = (cur + HISTORY_LEN - back) % HISTORY_LEN;
            let t = self.hist_times[idx];
            let v = self.hist_values[pi][idx];
            if t == 0 || v <= VALID_FLOOR_C {
                continue;
            }
            let age = cur_time.saturating_sub(t);
            if age > RATE_MAX_SPAN_MS {
                continue;
            }
            match oldest {
                Some((old_t, _)) if t >= old_t => {}
                _ => oldest = Some((t, v)),
            }
        }

        match oldest {
            Some((old_t, old_v)) if cur_time - old_t >= RATE_MIN_SPAN_MS => {
                let minutes = (cur_time - old_t) as f32 / 60_000.0;
                (cur_value - old_v) / minutes
            }
            _ => 0.0,
        }
    }

    /// Set the calibration offset applied to subsequent reads.
    /// Persisting the offset is the controller's job.
    pub fn calibrate(&mut self, probe: Probe, offset: f32) {
        info!("sampler: {} calibration set to {:+.2} °C", probe.name(), offset);
        self.calibration[probe as usize] = offset;
    }

    /// Re-enumerate the bus, enabling every probe that answered.
    /// Returns the discovered `(probe, address)` pairs.
    pub fn scan(&mut self, bus: &mut impl ProbeBus) -> Vec<(Probe, [u8; 8])> {
        let found = bus.scan();
        self.enabled = [false; Probe::COUNT];
        for (probe, addr) in &found {
            self.enabled[*probe as usize] = true;
            debug!("sampler: found {} at {:02x?}", probe.name(), addr);
        }
        info!("sampler: scan found {} probe(s)", found.len());
        found
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
