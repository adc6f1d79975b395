//! Distillation engine — single vaporise-and-collect pass.
//!
//! ```text
//!  Idle ──start──▶ Heating ──[T(cube) ≥ start_collecting]──▶ Collecting
//!                                                               │
//!                                          [T(cube) ≥ end_temp] │
//!                                                               ▼
//!                                                           Completed
//!
//!  Heating/Collecting ──[cube over limit ∨ supervisor unsafe]──▶ Error
//! ```
//!
//! With `separate_heads` the first `heads_volume_ml` of integrated pump
//! output is drawn at the heads rate before the engine switches to the
//! body rate.  Distillation has no tails fraction.

use log::{info, warn};

use super::{maintenance_watts, Process, ProcessContext, ProcessKind};
use crate::error::SafetyError;
use crate::sensors::Probe;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistillationPhase {
    Idle,
    Heating,
    Collecting,
    Completed,
    Error,
}

impl DistillationPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Heating => "Heating",
            Self::Collecting => "Collecting",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

pub struct DistillationEngine {
    phase: DistillationPhase,
    paused: bool,
    start_ms: u64,
    phase_entry_ms: u64,
    last_tick_ms: u64,
    heads_ml: f32,
    body_ml: f32,
    /// Fraction the pump was filling during the last applied interval.
    drawing_heads: bool,
}

impl DistillationEngine {
    pub fn new() -> Self {
        Self {
            phase: DistillationPhase::Idle,
            paused: false,
            start_ms: 0,
            phase_entry_ms: 0,
            last_tick_ms: 0,
            heads_ml: 0.0,
            body_ml: 0.0,
            drawing_heads: true,
        }
    }

    pub fn phase(&self) -> DistillationPhase {
        self.phase
    }

    /// Heads fraction collected so far, in ml.
    pub fn heads_volume_ml(&self) -> f32 {
        self.heads_ml
    }

    /// Product (body) fraction collected so far, in ml.
    pub fn product_volume_ml(&self) -> f32 {
        self.body_ml
    }

    /// True while the heads fraction is still being drawn.
    pub fn is_heads_mode(&self) -> bool {
        self.phase == DistillationPhase::Collecting && self.drawing_heads
    }

    fn phase_watts(&self, settings: &Settings) -> f32 {
        match self.phase {
            DistillationPhase::Heating => settings.distillation.heating_power_watts,
            DistillationPhase::Collecting => settings.distillation.distillation_power_watts,
            _ => 0.0,
        }
    }

    fn transition(&mut self, next: DistillationPhase, now_ms: u64) {
        info!(
            "distillation: {} -> {}",
            self.phase.name(),
            next.name()
        );
        self.phase = next;
        self.phase_entry_ms = now_ms;
    }

    fn fail(&mut self, now_ms: u64, reason: &str) {
        warn!("distillation: aborting ({reason})");
        self.paused = false;
        self.transition(DistillationPhase::Error, now_ms);
    }

    /// Integrate the pump output applied since the previous tick into
    /// the fraction that was being drawn.
    fn accrue_volume(&mut self, ctx: &ProcessContext<'_>, dt_ms: u64) {
        if ctx.applied.pump_flow_ml_per_min > 0.0 && dt_ms > 0 {
            let ml = ctx.applied.pump_flow_ml_per_min * dt_ms as f32 / 60_000.0;
            if self.drawing_heads {
                self.heads_ml += ml;
            } else {
                self.body_ml += ml;
            }
        }
    }
}

impl Default for DistillationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for DistillationEngine {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Distillation
    }

    fn start(&mut self, now_ms: u64) -> bool {
        if self.is_running() {
            return false;
        }
        self.heads_ml = 0.0;
        self.body_ml = 0.0;
        self.drawing_heads = true;
        self.paused = false;
        self.start_ms = now_ms;
        self.last_tick_ms = now_ms;
        self.phase = DistillationPhase::Idle;
        self.transition(DistillationPhase::Heating, now_ms);
        true
    }

    fn stop(&mut self, now_ms: u64) {
        if self.phase != DistillationPhase::Idle {
            info!("distillation: stopped by operator");
        }
        self.paused = false;
        self.phase = DistillationPhase::Idle;
        self.phase_entry_ms = now_ms;
    }

    fn pause(&mut self, _now_ms: u64) {
        if self.is_running() && !self.paused {
            info!("distillation: paused");
            self.paused = true;
        }
    }

    fn resume(&mut self, _now_ms: u64) {
        if self.paused {
            info!("distillation: resumed");
            self.paused = false;
        }
    }

    fn tick(&mut self, ctx: &mut ProcessContext<'_>) {
        if !self.is_running() {
            return;
        }

        let now = ctx.now_ms;
        let dt_ms = now.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now;

        self.accrue_volume(ctx, dt_ms);

        if self.paused {
            ctx.commands.heater_watts = maintenance_watts(self.phase_watts(ctx.settings));
            return;
        }

        if !ctx.safe {
            self.fail(now, "safety supervisor unsafe");
            return;
        }

        let d = &ctx.settings.distillation;
        let cube = ctx.temp(Probe::Cube);

        if cube.is_some_and(|c| c >= d.max_cube_temp) {
            ctx.emergency = Some(SafetyError::TempHigh);
            self.fail(now, "cube temperature over engine limit");
            return;
        }

        // Phase transitions, then the command set for the (possibly new)
        // phase.  Commands take effect at the controller's flush.
        match self.phase {
            DistillationPhase::Heating => {
                if cube.is_some_and(|c| c >= d.start_collecting_temp) {
                    self.transition(DistillationPhase::Collecting, now);
                }
            }
            DistillationPhase::Collecting => {
                if cube.is_some_and(|c| c >= d.end_temp) {
                    info!(
                        "distillation: complete — heads {:.0} ml, product {:.0} ml",
                        self.heads_ml, self.body_ml
                    );
                    self.transition(DistillationPhase::Completed, now);
                }
            }
            _ => {}
        }

        match self.phase {
            DistillationPhase::Heating => {
                ctx.commands.heater_watts = d.heating_power_watts;
            }
            DistillationPhase::Collecting => {
                ctx.commands.heater_watts = d.distillation_power_watts;
                let heads_mode =
                    d.separate_heads && self.heads_ml < d.heads_volume_ml as f32;
                if heads_mode != self.drawing_heads && !heads_mode {
                    info!(
                        "distillation: heads fraction complete ({:.0} ml), switching to body rate",
                        self.heads_ml
                    );
                }
                self.drawing_heads = heads_mode;
                ctx.commands.pump_flow_ml_per_min = if heads_mode {
                    d.heads_flow_rate
                } else {
                    d.flow_rate
                };
            }
            _ => {
                // Completed / Error: leave the all-off defaults in place.
            }
        }
    }

    fn is_running(&self) -> bool {
        matches!(
            self.phase,
            DistillationPhase::Heating | DistillationPhase::Collecting
        )
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    fn uptime_secs(&self, now_ms: u64) -> u64 {
        if self.phase == DistillationPhase::Idle {
            0
        } else {
            now_ms.saturating_sub(self.start_ms) / 1000
        }
    }

    fn phase_secs(&self, now_ms: u64) -> u64 {
        if self.phase == DistillationPhase::Idle {
            0
        } else {
            now_ms.saturating_sub(self.phase_entry_ms) / 1000
        }
    }

    fn total_volume_ml(&self) -> f32 {
        self.heads_ml + self.body_ml
    }
}
