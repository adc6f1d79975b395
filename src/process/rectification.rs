//! Rectification engine — reflux-column operation with heads / body /
//! tails fractions and periodic reflux cycling.
//!
//! ```text
//!  Idle ─▶ Heating ─[T(reflux) ≥ heads_temp]─▶ Stabilising
//!                                                  │ [elapsed ≥ stabilisation_time]
//!                                                  ▼
//!            PostHeadsStabilising ◀─[heads collected]─ Heads
//!                    │ [elapsed ≥ post_heads_time]
//!                    ▼
//!                   Body ─[volume ∨ temps ∨ delta]─▶ Tails ─[end temp]─▶ Completed
//!
//!  Any active phase ──[cube over limit ∨ supervisor unsafe]──▶ Error
//! ```
//!
//! In Heads/Body/Tails the valve cycles with period `reflux_period_secs`:
//! open (drawing) for `P/(1+R)` seconds, closed (refluxing) otherwise;
//! the pump runs at the phase rate only while the valve is open.

use log::{info, warn};

use super::reflux::{secs_into_cycle, valve_target};
use super::{maintenance_watts, Process, ProcessContext, ProcessKind};
use crate::error::SafetyError;
use crate::sensors::Probe;
use crate::settings::{RectModel, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectificationPhase {
    Idle,
    Heating,
    Stabilising,
    Heads,
    PostHeadsStabilising,
    Body,
    Tails,
    Completed,
    Error,
}

impl RectificationPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Heating => "Heating",
            Self::Stabilising => "Stabilising",
            Self::Heads => "Heads",
            Self::PostHeadsStabilising => "PostHeadsStabilising",
            Self::Body => "Body",
            Self::Tails => "Tails",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// Phases in which the reflux valve cycles and product is drawn.
    pub const fn is_drawing_phase(self) -> bool {
        matches!(self, Self::Heads | Self::Body | Self::Tails)
    }
}

/// Which fraction the pump output lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fraction {
    Heads,
    Body,
    Tails,
}

/// Observer snapshot of the reflux cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefluxCycleState {
    pub period_secs: u32,
    pub ratio: f32,
    /// True while the valve is open and product is drawn.
    pub drawing: bool,
    pub secs_into_cycle: u64,
}

pub struct RectificationEngine {
    phase: RectificationPhase,
    paused: bool,
    start_ms: u64,
    phase_entry_ms: u64,
    last_tick_ms: u64,
    heads_ml: f32,
    body_ml: f32,
    tails_ml: f32,
    /// Anchor of the current reflux cycle; reset on entering each
    /// drawing phase.
    cycle_start_ms: u64,
    /// Lowest reflux temperature seen during Body (alternative model).
    min_body_reflux_c: Option<f32>,
    /// Fraction drawn during the last applied interval.
    drawing: Fraction,
}

impl RectificationEngine {
    pub fn new() -> Self {
        Self {
            phase: RectificationPhase::Idle,
            paused: false,
            start_ms: 0,
            phase_entry_ms: 0,
            last_tick_ms: 0,
            heads_ml: 0.0,
            body_ml: 0.0,
            tails_ml: 0.0,
            cycle_start_ms: 0,
            min_body_reflux_c: None,
            drawing: Fraction::Heads,
        }
    }

    pub fn phase(&self) -> RectificationPhase {
        self.phase
    }

    pub fn heads_volume_ml(&self) -> f32 {
        self.heads_ml
    }

    pub fn body_volume_ml(&self) -> f32 {
        self.body_ml
    }

    pub fn tails_volume_ml(&self) -> f32 {
        self.tails_ml
    }

    /// Reflux-cycle snapshot; `None` outside the drawing phases.
    pub fn reflux_cycle(&self, now_ms: u64, settings: &Settings) -> Option<RefluxCycleState> {
        if !self.phase.is_drawing_phase() || self.paused {
            return None;
        }
        let r = &settings.rectification;
        Some(RefluxCycleState {
            period_secs: r.reflux_period_secs,
            ratio: r.reflux_ratio,
            drawing: valve_target(
                now_ms,
                self.cycle_start_ms,
                r.reflux_period_secs,
                r.reflux_ratio,
            ),
            secs_into_cycle: secs_into_cycle(now_ms, self.cycle_start_ms, r.reflux_period_secs),
        })
    }

    fn phase_watts(&self, settings: &Settings) -> f32 {
        let r = &settings.rectification;
        match self.phase {
            RectificationPhase::Heating => r.heating_power_watts,
            RectificationPhase::Stabilising | RectificationPhase::PostHeadsStabilising => {
                r.stabilisation_power_watts
            }
            RectificationPhase::Heads | RectificationPhase::Body => r.body_power_watts,
            RectificationPhase::Tails => r.tails_power_watts,
            _ => 0.0,
        }
    }

    fn transition(&mut self, next: RectificationPhase, now_ms: u64) {
        info!(
            "rectification: {} -> {}",
            self.phase.name(),
            next.name()
        );
        self.phase = next;
        self.phase_entry_ms = now_ms;
        if next.is_drawing_phase() {
            // Each drawing phase opens with a fresh draw window.
            self.cycle_start_ms = now_ms;
        }
        if next == RectificationPhase::Body {
            self.min_body_reflux_c = None;
        }
    }

    fn fail(&mut self, now_ms: u64, reason: &str) {
        warn!("rectification: aborting ({reason})");
        self.paused = false;
        self.transition(RectificationPhase::Error, now_ms);
    }

    fn accrue_volume(&mut self, ctx: &ProcessContext<'_>, dt_ms: u64) {
        if ctx.applied.pump_flow_ml_per_min > 0.0 && dt_ms > 0 {
            let ml = ctx.applied.pump_flow_ml_per_min * dt_ms as f32 / 60_000.0;
            match self.drawing {
                Fraction::Heads => self.heads_ml += ml,
                Fraction::Body => self.body_ml += ml,
                Fraction::Tails => self.tails_ml += ml,
            }
        }
    }

    /// Valve/pump command pair for a drawing phase.
    fn cycle_commands(
        &mut self,
        ctx: &mut ProcessContext<'_>,
        flow_ml_per_min: f32,
        fraction: Fraction,
    ) {
        let r = &ctx.settings.rectification;
        let open = valve_target(
            ctx.now_ms,
            self.cycle_start_ms,
            r.reflux_period_secs,
            r.reflux_ratio,
        );
        ctx.commands.valve_open = open;
        ctx.commands.pump_flow_ml_per_min = if open { flow_ml_per_min } else { 0.0 };
        self.drawing = fraction;
    }

    fn body_exit_due(&self, ctx: &ProcessContext<'_>) -> bool {
        let r = &ctx.settings.rectification;
        let reflux = ctx.temp(Probe::Reflux);
        let cube = ctx.temp(Probe::Cube);

        if self.body_ml >= r.body_volume_ml as f32 {
            return true;
        }
        if reflux.is_some_and(|t| t >= r.tails_temp) {
            return true;
        }
        if cube.is_some_and(|t| t >= r.tails_cube_temp) {
            return true;
        }
        if r.model == RectModel::Alternative {
            if let (Some(t), Some(min)) = (reflux, self.min_body_reflux_c) {
                if t - min >= r.temp_delta_end_body {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for RectificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for RectificationEngine {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Rectification
    }

    fn start(&mut self, now_ms: u64) -> bool {
        if self.is_running() {
            return false;
        }
        self.heads_ml = 0.0;
        self.body_ml = 0.0;
        self.tails_ml = 0.0;
        self.min_body_reflux_c = None;
        self.drawing = Fraction::Heads;
        self.paused = false;
        self.start_ms = now_ms;
        self.last_tick_ms = now_ms;
        self.phase = RectificationPhase::Idle;
        self.transition(RectificationPhase::Heating, now_ms);
        true
    }

    fn stop(&mut self, now_ms: u64) {
        if self.phase != RectificationPhase::Idle {
            info!("rectification: stopped by operator");
        }
        self.paused = false;
        self.phase = RectificationPhase::Idle;
        self.phase_entry_ms = now_ms;
    }

    fn pause(&mut self, _now_ms: u64) {
        if self.is_running() && !self.paused {
            info!("rectification: paused");
            self.paused = true;
        }
    }

    fn resume(&mut self, _now_ms: u64) {
        if self.paused {
            info!("rectification: resumed");
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

        let r = &ctx.settings.rectification;
        let cube = ctx.temp(Probe::Cube);
        let reflux = ctx.temp(Probe::Reflux);

        if cube.is_some_and(|c| c >= r.max_cube_temp) {
            ctx.emergency = Some(SafetyError::TempHigh);
            self.fail(now, "cube temperature over engine limit");
            return;
        }

        if self.phase == RectificationPhase::Body {
            if let Some(t) = reflux {
                self.min_body_reflux_c =
                    Some(self.min_body_reflux_c.map_or(t, |m| m.min(t)));
            }
        }

        // Phase transitions first, then the command set for the
        // (possibly new) phase.
        match self.phase {
            RectificationPhase::Heating => {
                if reflux.is_some_and(|t| t >= r.heads_temp) {
                    self.transition(RectificationPhase::Stabilising, now);
                }
            }
            RectificationPhase::Stabilising => {
                let due = u64::from(r.stabilisation_time_mins) * 60_000;
                if now.saturating_sub(self.phase_entry_ms) >= due {
                    self.transition(RectificationPhase::Heads, now);
                }
            }
            RectificationPhase::Heads => {
                if self.heads_ml >= r.heads_volume_ml as f32 {
                    info!(
                        "rectification: heads fraction complete ({:.0} ml)",
                        self.heads_ml
                    );
                    self.transition(RectificationPhase::PostHeadsStabilising, now);
                }
            }
            RectificationPhase::PostHeadsStabilising => {
                let due = u64::from(r.post_heads_stabilisation_time_mins) * 60_000;
                if now.saturating_sub(self.phase_entry_ms) >= due {
                    self.transition(RectificationPhase::Body, now);
                }
            }
            RectificationPhase::Body => {
                if self.body_exit_due(ctx) {
                    info!(
                        "rectification: body fraction complete ({:.0} ml)",
                        self.body_ml
                    );
                    self.transition(RectificationPhase::Tails, now);
                }
            }
            RectificationPhase::Tails => {
                let at_end = reflux.is_some_and(|t| t >= r.end_temp)
                    || cube.is_some_and(|t| t >= r.end_temp);
                if at_end {
                    info!(
                        "rectification: complete — heads {:.0} ml, body {:.0} ml, tails {:.0} ml",
                        self.heads_ml, self.body_ml, self.tails_ml
                    );
                    self.transition(RectificationPhase::Completed, now);
                }
            }
            _ => {}
        }

        ctx.commands.heater_watts = self.phase_watts(ctx.settings);
        match self.phase {
            RectificationPhase::Heads => {
                let flow = ctx.settings.pump.heads_flow_rate;
                self.cycle_commands(ctx, flow, Fraction::Heads);
            }
            RectificationPhase::Body => {
                let flow = ctx.settings.pump.body_flow_rate;
                self.cycle_commands(ctx, flow, Fraction::Body);
            }
            RectificationPhase::Tails => {
                let flow = if ctx.settings.rectification.use_same_flow_for_tails {
                    ctx.settings.pump.body_flow_rate
                } else {
                    ctx.settings.pump.tails_flow_rate
                };
                self.cycle_commands(ctx, flow, Fraction::Tails);
            }
            _ => {
                // Heating and both stabilising phases hold full reflux:
                // valve closed, pump stopped (the all-off defaults).
            }
        }
    }

    fn is_running(&self) -> bool {
        matches!(
            self.phase,
            RectificationPhase::Heating
                | RectificationPhase::Stabilising
                | RectificationPhase::Heads
                | RectificationPhase::PostHeadsStabilising
                | RectificationPhase::Body
                | RectificationPhase::Tails
        )
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    fn uptime_secs(&self, now_ms: u64) -> u64 {
        if self.phase == RectificationPhase::Idle {
            0
        } else {
            now_ms.saturating_sub(self.start_ms) / 1000
        }
    }

    fn phase_secs(&self, now_ms: u64) -> u64 {
        if self.phase == RectificationPhase::Idle {
            0
        } else {
            now_ms.saturating_sub(self.phase_entry_ms) / 1000
        }
    }

    fn total_volume_ml(&self) -> f32 {
        self.heads_ml + self.body_ml + self.tails_ml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ActuatorCommands, AppliedState};

    fn make_ctx<'a>(
        settings: &'a Settings,
        now_ms: u64,
        cube: Option<f32>,
        reflux: Option<f32>,
    ) -> ProcessContext<'a> {
        let mut temps = [None; Probe::COUNT];
        temps[Probe::Cube as usize] = cube;
        temps[Probe::Reflux as usize] = reflux;
        ProcessContext {
            now_ms,
            temps,
            safe: true,
            settings,
            applied: AppliedState::default(),
            commands: ActuatorCommands::all_off(),
            emergency: None,
        }
    }

    fn drive(
        engine: &mut RectificationEngine,
        settings: &Settings,
        now_ms: u64,
        cube: f32,
        reflux: f32,
        applied: ActuatorCommands,
    ) -> ActuatorCommands {
        let mut ctx = make_ctx(settings, now_ms, Some(cube), Some(reflux));
        ctx.applied = AppliedState {
            heater_watts: applied.heater_watts,
            pump_flow_ml_per_min: applied.pump_flow_ml_per_min,
            valve_open: applied.valve_open,
        };
        engine.tick(&mut ctx);
        ctx.commands
    }

    /// Settings with short stabilisation windows so tests stay fast.
    fn quick_settings() -> Settings {
        let mut s = Settings::factory_defaults_all_probes();
        s.rectification.stabilisation_time_mins = 1;
        s.rectification.post_heads_stabilisation_time_mins = 1;
        s
    }

    #[test]
    fn heating_holds_full_reflux() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        let cmds = drive(&mut engine, &settings, 1000, 30.0, 30.0, ActuatorCommands::all_off());
        assert_eq!(cmds.heater_watts, 1800.0);
        assert!(!cmds.valve_open);
        assert_eq!(cmds.pump_flow_ml_per_min, 0.0);
    }

    #[test]
    fn stabilising_after_heads_temp_and_timed_exit() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);

        let cmds = drive(&mut engine, &settings, 1000, 60.0, 78.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Stabilising);
        assert_eq!(cmds.heater_watts, 1200.0);
        assert!(!cmds.valve_open);

        // One minute of stabilisation, then Heads.
        drive(&mut engine, &settings, 31_000, 60.0, 78.1, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Stabilising);
        let cmds = drive(&mut engine, &settings, 61_000, 60.0, 78.1, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Heads);
        assert_eq!(cmds.heater_watts, 1000.0);
        // A drawing phase opens with the valve open.
        assert!(cmds.valve_open);
        assert_eq!(cmds.pump_flow_ml_per_min, 50.0);
    }

    #[test]
    fn heads_pump_runs_only_while_drawing() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        drive(&mut engine, &settings, 1000, 60.0, 78.0, ActuatorCommands::all_off());
        let mut cmds =
            drive(&mut engine, &settings, 61_000, 60.0, 78.1, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Heads);

        // R = 3, P = 60 s: open through 15 s of the cycle, closed after.
        cmds = drive(&mut engine, &settings, 61_000 + 14_000, 60.0, 78.1, cmds);
        assert!(cmds.valve_open);
        assert_eq!(cmds.pump_flow_ml_per_min, 50.0);

        cmds = drive(&mut engine, &settings, 61_000 + 16_000, 60.0, 78.1, cmds);
        assert!(!cmds.valve_open);
        assert_eq!(cmds.pump_flow_ml_per_min, 0.0);
    }

    #[test]
    fn body_exits_on_tails_temp() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);

        drive(&mut engine, &settings, 1000, 85.0, 80.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Body);
        drive(&mut engine, &settings, 2000, 85.0, 92.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Tails);
    }

    #[test]
    fn body_exits_on_cube_temp() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);

        drive(&mut engine, &settings, 1000, 95.0, 80.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Tails);
    }

    #[test]
    fn body_exits_on_volume() {
        let mut settings = quick_settings();
        settings.rectification.body_volume_ml = 10;
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);

        // 250 ml/min applied for 3 s = 12.5 ml > 10 ml target.
        let mut applied = ActuatorCommands::all_off();
        applied.pump_flow_ml_per_min = 250.0;
        engine.drawing = Fraction::Body;
        drive(&mut engine, &settings, 3000, 85.0, 80.0, applied);
        assert_eq!(engine.phase(), RectificationPhase::Tails);
        assert!(engine.body_volume_ml() >= 10.0);
    }

    #[test]
    fn alternative_model_delta_ends_body() {
        let mut settings = quick_settings();
        settings.rectification.model = RectModel::Alternative;
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);

        // Establish the in-phase minimum at 78.2 °C.
        drive(&mut engine, &settings, 1000, 85.0, 78.2, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Body);
        drive(&mut engine, &settings, 2000, 85.0, 78.5, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Body);
        // +0.5 °C over the minimum fires the delta exit.
        drive(&mut engine, &settings, 3000, 85.0, 78.7, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Tails);
    }

    #[test]
    fn classic_model_ignores_delta() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);

        drive(&mut engine, &settings, 1000, 85.0, 78.2, ActuatorCommands::all_off());
        drive(&mut engine, &settings, 2000, 85.0, 79.5, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Body);
    }

    #[test]
    fn tails_flow_respects_same_flow_flag() {
        let mut settings = quick_settings();
        settings.rectification.use_same_flow_for_tails = false;
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Tails, 0);

        let cmds = drive(&mut engine, &settings, 1000, 93.0, 93.0, ActuatorCommands::all_off());
        assert_eq!(cmds.heater_watts, 1200.0);
        assert!(cmds.valve_open);
        assert_eq!(cmds.pump_flow_ml_per_min, 350.0);

        settings.rectification.use_same_flow_for_tails = true;
        let cmds = drive(&mut engine, &settings, 2000, 93.0, 93.0, cmds);
        assert_eq!(cmds.pump_flow_ml_per_min, 250.0);
    }

    #[test]
    fn tails_completes_at_end_temp() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Tails, 0);

        drive(&mut engine, &settings, 1000, 90.0, 96.9, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Tails);
        let cmds = drive(&mut engine, &settings, 2000, 90.0, 97.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Completed);
        assert_eq!(cmds, ActuatorCommands::all_off());
    }

    #[test]
    fn fractions_are_disjoint_and_sum_to_total() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Heads, 0);
        engine.drawing = Fraction::Heads;

        let mut applied = ActuatorCommands::all_off();
        applied.pump_flow_ml_per_min = 50.0;
        drive(&mut engine, &settings, 12_000, 60.0, 78.1, applied);
        assert!(engine.heads_volume_ml() > 0.0);
        assert_eq!(engine.body_volume_ml(), 0.0);
        assert_eq!(engine.tails_volume_ml(), 0.0);
        assert_eq!(
            engine.total_volume_ml(),
            engine.heads_volume_ml() + engine.body_volume_ml() + engine.tails_volume_ml()
        );
    }

    #[test]
    fn cube_over_limit_raises_and_errors() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);

        let mut ctx = make_ctx(&settings, 1000, Some(101.0), Some(70.0));
        engine.tick(&mut ctx);
        assert_eq!(engine.phase(), RectificationPhase::Error);
        assert_eq!(ctx.emergency, Some(SafetyError::TempHigh));
    }

    #[test]
    fn pause_holds_full_reflux_at_maintenance_power() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(0);
        engine.transition(RectificationPhase::Body, 0);
        engine.pause(1000);

        let cmds = drive(&mut engine, &settings, 1000, 85.0, 78.3, ActuatorCommands::all_off());
        assert!(engine.is_paused());
        assert_eq!(cmds.heater_watts, 500.0); // Half the body power.
        assert_eq!(cmds.pump_flow_ml_per_min, 0.0);
        assert!(!cmds.valve_open);
        assert!(engine.reflux_cycle(1000, &settings).is_none());

        engine.resume(2000);
        let cmds = drive(&mut engine, &settings, 2000, 85.0, 78.3, cmds);
        assert_eq!(cmds.heater_watts, 1000.0);
    }

    #[test]
    fn phase_clock_and_uptime() {
        let settings = quick_settings();
        let mut engine = RectificationEngine::new();
        engine.start(10_000);
        drive(&mut engine, &settings, 11_000, 30.0, 30.0, ActuatorCommands::all_off());
        assert_eq!(engine.uptime_secs(70_000), 60);
        assert_eq!(engine.phase_secs(70_000), 60);

        let _ = drive(&mut engine, &settings, 70_000, 60.0, 78.0, ActuatorCommands::all_off());
        assert_eq!(engine.phase(), RectificationPhase::Stabilising);
        assert_eq!(engine.phase_secs(75_000), 5);
        assert_eq!(engine.uptime_secs(75_000), 65);
    }
}
