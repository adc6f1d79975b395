//! Property tests for the universally-quantified invariants.
//!
//! Runs on host only — proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use proptest::prelude::*;

use stillpilot::adapters::sim::{SimActuators, SimProbeBus};
use stillpilot::app::events::AppEvent;
use stillpilot::app::ports::EventSink;
use stillpilot::app::service::Controller;
use stillpilot::process::reflux::{draw_duration_ms, valve_target};
use stillpilot::process::rectification::RectificationPhase;
use stillpilot::process::Process;
use stillpilot::sensors::{Probe, SensorSampler};
use stillpilot::settings::{self, RectModel, Settings};

struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &AppEvent) {}
}

fn make_rig() -> (Controller, SimProbeBus, SimActuators, NullSink) {
    let mut bus = SimProbeBus::new();
    for probe in Probe::ALL {
        bus.set_temp(probe, Some(20.0));
    }
    (
        Controller::new(Settings::factory_defaults_all_probes()),
        bus,
        SimActuators::new(),
        NullSink,
    )
}

// ── 1. Supervisor authority ───────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    StartDistillation,
    StartRectification,
    Stop,
    Pause,
    Resume,
    SetCube(Option<f32>),
    SetReflux(Option<f32>),
    SetWaterOut(f32),
    ManualHeater(f32),
    ManualPump(f32),
    EmergencyStop,
    Reset,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::StartDistillation),
        Just(Op::StartRectification),
        Just(Op::Stop),
        Just(Op::Pause),
        Just(Op::Resume),
        proptest::option::of(20.0f32..120.0).prop_map(Op::SetCube),
        proptest::option::of(20.0f32..110.0).prop_map(Op::SetReflux),
        (10.0f32..70.0).prop_map(Op::SetWaterOut),
        (0.0f32..100.0).prop_map(Op::ManualHeater),
        (0.0f32..500.0).prop_map(Op::ManualPump),
        Just(Op::EmergencyStop),
        Just(Op::Reset),
    ]
}

proptest! {
    /// For any command sequence, every tick that ends unsafe flushes
    /// the actuators at (0, 0, closed).
    #[test]
    fn supervisor_authority_always_wins(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let (mut controller, mut bus, mut hw, mut sink) = make_rig();
        let mut now_ms = 0u64;

        for op in ops {
            match op {
                Op::StartDistillation => { let _ = controller.start_distillation(now_ms, &mut sink); }
                Op::StartRectification => { let _ = controller.start_rectification(now_ms, &mut sink); }
                Op::Stop => controller.stop(now_ms, &mut hw, &mut sink),
                Op::Pause => controller.pause(now_ms),
                Op::Resume => controller.resume(now_ms),
                Op::SetCube(t) => bus.set_temp(Probe::Cube, t),
                Op::SetReflux(t) => bus.set_temp(Probe::Reflux, t),
                Op::SetWaterOut(t) => bus.set_temp(Probe::WaterOut, Some(t)),
                Op::ManualHeater(p) => { let _ = controller.set_heater_percent(p, &mut hw); }
                Op::ManualPump(f) => { let _ = controller.set_pump_flow(f, &mut hw); }
                Op::EmergencyStop => controller.emergency_stop(now_ms, &mut hw, &mut sink),
                Op::Reset => { let _ = controller.reset_safety_errors(&mut sink); }
            }

            now_ms += 1000;
            controller.tick(now_ms, &mut bus, &mut hw, &mut sink);

            if !controller.is_safety_ok() {
                prop_assert_eq!(hw.heater_percent, 0.0);
                prop_assert_eq!(hw.pump_flow_ml_per_min, 0.0);
                prop_assert!(!hw.valve_open);
            }
        }
    }
}

// ── 2. Reflux duty cycle ──────────────────────────────────────

proptest! {
    /// The long-run open fraction is 1/(1+R) to within one tick per
    /// period, for any period and ratio.
    #[test]
    fn reflux_duty_cycle_matches_ratio(
        period_secs in 5u32..=120,
        ratio in 0.25f32..=8.0,
    ) {
        let periods = 20u64;
        let total_ticks = u64::from(period_secs) * periods;
        let mut open_ticks = 0u64;
        for k in 0..total_ticks {
            if valve_target(k * 1000, 0, period_secs, ratio) {
                open_ticks += 1;
            }
        }
        let open_fraction = open_ticks as f64 / total_ticks as f64;
        let expected = 1.0 / (1.0 + f64::from(ratio));
        let tick_tolerance = 1.0 / f64::from(period_secs);
        prop_assert!(
            (open_fraction - expected).abs() <= tick_tolerance + 1e-9,
            "fraction {} vs {} (period {}, ratio {})",
            open_fraction, expected, period_secs, ratio
        );
    }

    /// The drawn share of a single period never exceeds the period.
    #[test]
    fn draw_duration_is_bounded(period_secs in 1u32..=3600, ratio in 0.0f32..=100.0) {
        let draw = draw_duration_ms(period_secs, ratio);
        prop_assert!(draw <= u64::from(period_secs) * 1000);
    }
}

// ── 3 & 4. Volume conservation and phase monotonicity ─────────

fn phase_rank(phase: RectificationPhase) -> usize {
    match phase {
        RectificationPhase::Idle => 0,
        RectificationPhase::Heating => 1,
        RectificationPhase::Stabilising => 2,
        RectificationPhase::Heads => 3,
        RectificationPhase::PostHeadsStabilising => 4,
        RectificationPhase::Body => 5,
        RectificationPhase::Tails => 6,
        RectificationPhase::Completed => 7,
        RectificationPhase::Error => 8,
    }
}

proptest! {
    /// Against any temperature trajectory: fractions never shrink,
    /// always sum to the total, and phases never move backwards.
    #[test]
    fn volumes_conserve_and_phases_advance(
        temps in proptest::collection::vec(
            (
                proptest::option::of(20.0f32..110.0), // cube
                proptest::option::of(20.0f32..105.0), // reflux
            ),
            1..300,
        )
    ) {
        let mut settings = Settings::factory_defaults_all_probes();
        settings.rectification.stabilisation_time_mins = 1;
        settings.rectification.post_heads_stabilisation_time_mins = 1;
        settings.rectification.heads_volume_ml = 5;
        settings.rectification.body_volume_ml = 20;
        let mut controller = Controller::new(settings);
        let mut bus = SimProbeBus::new();
        for probe in Probe::ALL {
            bus.set_temp(probe, Some(20.0));
        }
        let mut hw = SimActuators::new();
        let mut sink = NullSink;

        prop_assert!(controller.start_rectification(0, &mut sink));

        let mut now_ms = 0u64;
        let mut prev_volumes = (0.0f32, 0.0f32, 0.0f32);
        let mut prev_rank = phase_rank(controller.rectification().phase());

        for (cube, reflux) in temps {
            bus.set_temp(Probe::Cube, cube);
            bus.set_temp(Probe::Reflux, reflux);
            now_ms += 1000;
            controller.tick(now_ms, &mut bus, &mut hw, &mut sink);

            let engine = controller.rectification();
            let volumes = (
                engine.heads_volume_ml(),
                engine.body_volume_ml(),
                engine.tails_volume_ml(),
            );
            prop_assert!(volumes.0 >= prev_volumes.0);
            prop_assert!(volumes.1 >= prev_volumes.1);
            prop_assert!(volumes.2 >= prev_volumes.2);
            prop_assert_eq!(
                engine.total_volume_ml(),
                volumes.0 + volumes.1 + volumes.2
            );
            prev_volumes = volumes;

            let rank = phase_rank(engine.phase());
            prop_assert!(
                rank >= prev_rank,
                "phase went backwards: {} -> {}",
                prev_rank, rank
            );
            prev_rank = rank;
        }
    }
}

// ── 5. Mutual exclusion ───────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum LifecycleOp {
    StartDistillation,
    StartRectification,
    Stop,
    Tick,
}

fn arb_lifecycle_op() -> impl Strategy<Value = LifecycleOp> {
    prop_oneof![
        Just(LifecycleOp::StartDistillation),
        Just(LifecycleOp::StartRectification),
        Just(LifecycleOp::Stop),
        Just(LifecycleOp::Tick),
    ]
}

proptest! {
    /// At most one engine runs at any tick, and a start against an
    /// active process is always rejected.
    #[test]
    fn at_most_one_engine_runs(ops in proptest::collection::vec(arb_lifecycle_op(), 1..60)) {
        let (mut controller, mut bus, mut hw, mut sink) = make_rig();
        let mut now_ms = 0u64;

        for op in ops {
            now_ms += 1000;
            match op {
                LifecycleOp::StartDistillation => {
                    let accepted = controller.start_distillation(now_ms, &mut sink);
                    if controller.rectification().is_running() {
                        prop_assert!(!accepted);
                    }
                }
                LifecycleOp::StartRectification => {
                    let accepted = controller.start_rectification(now_ms, &mut sink);
                    if controller.distillation().is_running() {
                        prop_assert!(!accepted);
                    }
                }
                LifecycleOp::Stop => controller.stop(now_ms, &mut hw, &mut sink),
                LifecycleOp::Tick => controller.tick(now_ms, &mut bus, &mut hw, &mut sink),
            }

            prop_assert!(
                !(controller.distillation().is_running()
                    && controller.rectification().is_running())
            );
        }
    }
}

// ── 6. Rise-rate well-definedness ─────────────────────────────

proptest! {
    /// For any sampling history the rise-rate is finite, and zero
    /// whenever no valid pair spans at least 30 s.
    #[test]
    fn rise_rate_is_well_defined(
        samples in proptest::collection::vec(
            (
                1u64..60,                              // seconds since previous sample
                proptest::option::of(-50.0f32..150.0), // reading (None = unplugged)
            ),
            1..40,
        )
    ) {
        let mut sampler = SensorSampler::new(&Settings::factory_defaults_all_probes());
        let mut bus = SimProbeBus::new();
        let mut now_ms = 0u64;
        let mut elapsed_since_first = 0u64;

        for (i, (gap_secs, value)) in samples.iter().enumerate() {
            now_ms += gap_secs * 1000;
            if i > 0 {
                elapsed_since_first += gap_secs * 1000;
            }
            bus.set_temp(Probe::Cube, *value);
            sampler.tick(now_ms, &mut bus);

            let rate = sampler.rise_rate(Probe::Cube);
            prop_assert!(rate.is_finite());
            if elapsed_since_first < 30_000 {
                prop_assert_eq!(rate, 0.0);
            }
        }
    }
}

// ── 7. Settings round-trip ────────────────────────────────────

proptest! {
    /// `save(s); load() == s` for any valid record.
    #[test]
    fn settings_round_trip(
        calibration in proptest::array::uniform5(-5.0f32..5.0),
        reflux_ratio in 0.5f32..8.0,
        reflux_period in 10u32..600,
        separate_heads in any::<bool>(),
        alternative in any::<bool>(),
        heads_flow in 10.0f32..400.0,
        max_runtime in 1u32..48,
    ) {
        let mut s = Settings::factory_defaults_all_probes();
        s.probe_calibration = calibration;
        s.rectification.reflux_ratio = reflux_ratio;
        s.rectification.reflux_period_secs = reflux_period;
        s.rectification.model = if alternative {
            RectModel::Alternative
        } else {
            RectModel::Classic
        };
        s.distillation.separate_heads = separate_heads;
        s.pump.heads_flow_rate = heads_flow;
        s.safety.max_runtime_hours = max_runtime;

        let mut storage = stillpilot::adapters::storage::MemStorage::new();
        settings::save(&mut storage, &s).unwrap();
        let loaded = settings::load(&storage).unwrap();
        prop_assert_eq!(loaded, s);
    }
}
