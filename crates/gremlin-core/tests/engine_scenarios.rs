// Gremlin Engine Scenarios
//
// End-to-end runs of the engine against a recording sink. Time is driven by
// explicit instants, so nothing here sleeps.
//
// Run with: cargo test --test engine_scenarios

use std::time::{Duration, Instant};

use gremlin_core::profile::{
    ActionNode, AxisMode, ChainConfig, ChangeModeConfig, ConditionConfig, DoubleTapConfig, Expression,
    LongActivation, MacroConfig, MacroEvent, MacroPolicy, MapToKeyboardConfig, MapToOutputConfig, MergeAxisConfig,
    MergeOperator, RootConfig, SplitAxisConfig, TapMode, TempoConfig,
};
use gremlin_core::script::ScriptOutput;
use gremlin_core::{
    ActionId, ActivationPolicy, BindingKey, DeviceDecl, DeviceId, Engine, EngineError, EventQueue, EventValue,
    InputAddr, InputEvent, InputRef, Key, Profile, QueuedEvent, RecordingSink, Settings, VariableKind, VariableValue,
};

// =========================================================================
// Test Helpers
// =========================================================================

fn ids(list: &[&str]) -> Vec<ActionId> {
    list.iter().map(|s| ActionId::new(*s)).collect()
}

/// stick (physical), vjoy (virtual 4/16/1) and bus (intermediate)
fn base_profile() -> Profile {
    let mut p = Profile::new("Default");
    p.add_device("stick", DeviceDecl::physical_named("Stick"));
    p.add_device("vjoy", DeviceDecl::virtual_joystick(4, 16, 1));
    p.add_device("bus", DeviceDecl::Intermediate);
    p
}

/// Root `root` on a stick input in `mode`, forwarding to `children`
fn bind(p: &mut Profile, input: InputRef, mode: &str, root: &str, children: &[&str]) {
    p.set_action(root, ActionNode::root(ids(children)));
    p.add_binding(BindingKey::new("stick", input, mode), root);
}

fn out_button(p: &mut Profile, id: &str, index: u16) {
    p.set_action(id, ActionNode::map_to("vjoy", InputRef::button(index)));
}

fn vjoy_button(index: u16) -> InputAddr {
    InputAddr::new("vjoy", InputRef::button(index))
}

fn vjoy_axis(index: u16) -> InputAddr {
    InputAddr::new("vjoy", InputRef::axis(index))
}

fn key_addr(code: u16) -> InputAddr {
    InputAddr::new(DeviceId::keyboard(), InputRef::button(code))
}

fn axis_of(value: Option<EventValue>) -> f64 {
    value.and_then(|v| v.as_axis()).unwrap_or(f64::NAN)
}

struct Rig {
    engine: Engine,
    sink: RecordingSink,
    t0: Instant,
}

impl Rig {
    fn new(profile: Profile) -> Self {
        Self::with(profile, Settings::new(), RecordingSink::new())
    }

    fn with(profile: Profile, settings: Settings, sink: RecordingSink) -> Self {
        let mut engine = Engine::new(settings);
        engine.activate(profile, Box::new(sink.clone())).unwrap();
        Self {
            engine,
            sink,
            t0: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn send(&mut self, device: &str, input: InputRef, value: EventValue, ms: u64) {
        let event = InputEvent::new(device, input, value, self.at(ms));
        self.engine.handle_input(event).unwrap();
    }

    fn button(&mut self, index: u16, pressed: bool, ms: u64) {
        self.send("stick", InputRef::button(index), EventValue::Button(pressed), ms);
    }

    fn axis(&mut self, index: u16, value: f64, ms: u64) {
        self.send("stick", InputRef::axis(index), EventValue::Axis(value), ms);
    }

    fn tick(&mut self, ms: u64) -> usize {
        self.engine.dispatch_timers(self.at(ms))
    }

    /// Every press state written to a vjoy button, oldest first
    fn presses(&self, index: u16) -> Vec<bool> {
        self.sink
            .values_of(&vjoy_button(index))
            .iter()
            .map(|v| v.is_pressed())
            .collect()
    }

    fn key_presses(&self, code: u16) -> Vec<bool> {
        self.sink
            .values_of(&key_addr(code))
            .iter()
            .map(|v| v.is_pressed())
            .collect()
    }
}

// =========================================================================
// Routing and modes
// =========================================================================

#[test]
fn test_button_remap() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(1, false, 40);
    assert_eq!(rig.presses(1), vec![true, false]);
    assert_eq!(rig.engine.context_count(), 1);
}

#[test]
fn test_repeated_value_is_ignored() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(1, true, 10);
    assert_eq!(rig.presses(1), vec![true]);
}

#[test]
fn test_nearest_ancestor_binding_wins() {
    let mut p = base_profile();
    p.add_mode("Landing", Some("Default"));
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    bind(&mut p, InputRef::button(2), "Default", "r2", &["out2"]);
    bind(&mut p, InputRef::button(1), "Landing", "r3", &["out3"]);
    out_button(&mut p, "out1", 1);
    out_button(&mut p, "out2", 2);
    out_button(&mut p, "out3", 3);
    let mut rig = Rig::new(p);

    rig.engine.set_mode("Landing").unwrap();
    assert_eq!(rig.engine.current_mode(), Some("Landing"));

    rig.button(1, true, 0);
    rig.button(2, true, 10);
    assert!(rig.presses(1).is_empty());
    assert_eq!(rig.presses(3), vec![true]);
    // Inherited from Default
    assert_eq!(rig.presses(2), vec![true]);
}

#[test]
fn test_unknown_mode_is_refused() {
    let mut rig = Rig::new(base_profile());
    assert!(matches!(rig.engine.set_mode("Orbit"), Err(EngineError::UnknownMode(_))));
    assert_eq!(rig.engine.current_mode(), Some("Default"));
}

#[test]
fn test_settings_start_mode_overrides_profile() {
    let mut p = base_profile();
    p.add_mode("Taxi", None);
    let mut settings = Settings::new();
    settings.start_mode = Some("Taxi".to_string());
    let rig = Rig::with(p, settings, RecordingSink::new());
    assert_eq!(rig.engine.current_mode(), Some("Taxi"));
}

#[test]
fn test_temporary_mode_switch_reverts_on_release() {
    let mut p = base_profile();
    p.add_mode("Shift", Some("Default"));
    p.set_action(
        "to-shift",
        ActionNode::ChangeMode(ChangeModeConfig {
            mode: "Shift".to_string(),
            temporary: true,
        }),
    );
    bind(&mut p, InputRef::button(5), "Default", "r5", &["to-shift"]);
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    bind(&mut p, InputRef::button(1), "Shift", "r1s", &["out2"]);
    out_button(&mut p, "out1", 1);
    out_button(&mut p, "out2", 2);
    let mut rig = Rig::new(p);

    rig.button(5, true, 0);
    assert_eq!(rig.engine.current_mode(), Some("Shift"));
    rig.button(1, true, 10);
    rig.button(1, false, 20);
    rig.button(5, false, 30);
    assert_eq!(rig.engine.current_mode(), Some("Default"));
    rig.button(1, true, 40);

    assert_eq!(rig.presses(2), vec![true, false]);
    assert_eq!(rig.presses(1), vec![true]);
}

#[test]
fn test_permanent_mode_switch() {
    let mut p = base_profile();
    p.add_mode("Combat", None);
    p.set_action(
        "to-combat",
        ActionNode::ChangeMode(ChangeModeConfig {
            mode: "Combat".to_string(),
            temporary: false,
        }),
    );
    bind(&mut p, InputRef::button(5), "Default", "r5", &["to-combat"]);
    let mut rig = Rig::new(p);

    rig.button(5, true, 0);
    rig.button(5, false, 30);
    assert_eq!(rig.engine.current_mode(), Some("Combat"));
}

// =========================================================================
// Timing nodes
// =========================================================================

fn tap_profile(mode: TapMode) -> Profile {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["tap"]);
    p.set_action(
        "tap",
        ActionNode::DoubleTap(DoubleTapConfig {
            threshold_ms: 300,
            mode,
            single: ids(&["single"]),
            double: ids(&["double"]),
        }),
    );
    out_button(&mut p, "single", 1);
    out_button(&mut p, "double", 2);
    p
}

#[test]
fn test_exclusive_single_waits_for_window() {
    let mut rig = Rig::new(tap_profile(TapMode::Exclusive));
    rig.button(1, true, 0);
    rig.button(1, false, 50);
    assert!(rig.presses(1).is_empty());
    assert_eq!(rig.engine.pending_timers(), 1);

    assert_eq!(rig.tick(300), 1);
    assert_eq!(rig.presses(1), vec![true, false]);
    assert!(rig.presses(2).is_empty());
}

#[test]
fn test_exclusive_double_suppresses_single() {
    let mut rig = Rig::new(tap_profile(TapMode::Exclusive));
    rig.button(1, true, 0);
    rig.button(1, false, 50);
    rig.button(1, true, 120);
    rig.button(1, false, 160);
    assert_eq!(rig.tick(1000), 0);
    assert!(rig.presses(1).is_empty());
    assert_eq!(rig.presses(2), vec![true, false]);
}

#[test]
fn test_combined_third_press_starts_new_cycle() {
    let mut rig = Rig::new(tap_profile(TapMode::Combined));
    rig.button(1, true, 0);
    rig.button(1, false, 50);
    rig.button(1, true, 100);
    rig.button(1, false, 150);
    // Still inside the first window: counts as a fresh single
    rig.button(1, true, 200);
    rig.button(1, false, 250);
    assert_eq!(rig.engine.pending_timers(), 1);
    rig.tick(600);

    assert_eq!(rig.presses(1), vec![true, false, true, false, true, false]);
    assert_eq!(rig.presses(2), vec![true, false]);
    assert_eq!(rig.engine.pending_timers(), 0);
}

#[test]
fn test_tempo_long_press_fires_at_threshold() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["tempo"]);
    p.set_action(
        "tempo",
        ActionNode::Tempo(TempoConfig {
            threshold_ms: 400,
            activate_on: LongActivation::Press,
            short: ids(&["short"]),
            long: ids(&["long"]),
        }),
    );
    out_button(&mut p, "short", 1);
    out_button(&mut p, "long", 2);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.tick(399);
    assert!(rig.presses(2).is_empty());
    rig.tick(400);
    assert_eq!(rig.presses(2), vec![true]);
    rig.button(1, false, 700);
    assert_eq!(rig.presses(2), vec![true, false]);

    rig.button(1, true, 1000);
    rig.button(1, false, 1100);
    assert_eq!(rig.presses(1), vec![true, false]);
    assert_eq!(rig.engine.pending_timers(), 0);
}

#[test]
fn test_chain_steps_through_sequences() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["chain"]);
    p.set_action(
        "chain",
        ActionNode::Chain(ChainConfig {
            sequences: vec![ids(&["out1"]), ids(&["out2"])],
            timeout_ms: None,
            on_timeout: Default::default(),
        }),
    );
    out_button(&mut p, "out1", 1);
    out_button(&mut p, "out2", 2);
    let mut rig = Rig::new(p);

    for (i, ms) in [0u64, 100, 200].into_iter().enumerate() {
        rig.button(1, true, ms);
        rig.button(1, false, ms + 50);
        assert_eq!(rig.engine.pending_timers(), 0, "press {}", i);
    }
    assert_eq!(rig.presses(1), vec![true, false, true, false]);
    assert_eq!(rig.presses(2), vec![true, false]);
}

#[test]
fn test_stale_timer_after_mode_switch_is_ignored() {
    let mut p = base_profile();
    p.add_mode("Other", None);
    bind(&mut p, InputRef::button(1), "Default", "r1", &["tempo"]);
    p.set_action(
        "tempo",
        ActionNode::Tempo(TempoConfig {
            threshold_ms: 300,
            activate_on: LongActivation::Press,
            short: ids(&["out1"]),
            long: ids(&["out2"]),
        }),
    );
    out_button(&mut p, "out1", 1);
    out_button(&mut p, "out2", 2);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    assert_eq!(rig.engine.pending_timers(), 1);
    rig.engine.set_mode("Other").unwrap();
    assert_eq!(rig.engine.context_count(), 0);

    assert_eq!(rig.tick(500), 0);
    assert!(rig.presses(2).is_empty());
}

// =========================================================================
// Macros
// =========================================================================

fn macro_profile(policy: MacroPolicy, events: Vec<MacroEvent>) -> Profile {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["macro"]);
    p.set_action(
        "macro",
        ActionNode::Macro(MacroConfig {
            events,
            policy,
            count: 1,
            repeat_delay_ms: 0,
        }),
    );
    p
}

fn key(code: u16, pressed: bool) -> MacroEvent {
    MacroEvent::Key {
        key: Key(code),
        pressed,
    }
}

#[test]
fn test_macro_steps_respect_min_delay() {
    let p = macro_profile(MacroPolicy::Once, vec![key(30, true), key(30, false)]);
    let mut settings = Settings::new();
    settings.macro_min_delay = Duration::from_millis(25);
    let mut rig = Rig::with(p, settings, RecordingSink::new());

    rig.button(1, true, 0);
    assert_eq!(rig.key_presses(30), vec![true]);
    rig.tick(24);
    assert_eq!(rig.key_presses(30), vec![true]);
    rig.tick(25);
    assert_eq!(rig.key_presses(30), vec![true, false]);
    assert_eq!(rig.engine.pending_timers(), 0);
}

#[test]
fn test_hold_macro_stops_on_release() {
    let p = macro_profile(MacroPolicy::Hold, vec![key(30, true), key(30, false), MacroEvent::Delay { delay_ms: 50 }]);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.tick(20);
    rig.tick(70);
    assert_eq!(rig.key_presses(30), vec![true, false]);
    assert_eq!(rig.engine.pending_timers(), 1);

    rig.button(1, false, 80);
    assert_eq!(rig.engine.pending_timers(), 0);
    assert_eq!(rig.tick(1000), 0);
    assert_eq!(rig.key_presses(30), vec![true, false]);
}

#[test]
fn test_toggle_macro_loops_until_second_press() {
    let p = macro_profile(
        MacroPolicy::Toggle,
        vec![key(30, true), MacroEvent::Delay { delay_ms: 30 }, key(30, false)],
    );
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(1, false, 10);
    // 0: down, 30: up, 50: down again after the restart gap
    rig.tick(50);
    assert_eq!(rig.key_presses(30), vec![true, false, true]);

    rig.button(1, true, 60);
    assert_eq!(rig.engine.pending_timers(), 0);
}

#[test]
fn test_shared_macro_keeps_state_per_binding() {
    let mut p = macro_profile(
        MacroPolicy::Once,
        vec![key(34, true), MacroEvent::Delay { delay_ms: 100 }, key(34, false)],
    );
    p.set_action("macro-ref", ActionNode::reference("macro"));
    bind(&mut p, InputRef::button(2), "Default", "r2", &["macro-ref"]);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(2, true, 10);
    // One playback per binding, each with its own timer
    assert_eq!(rig.engine.context_count(), 2);
    assert_eq!(rig.engine.pending_timers(), 2);

    assert_eq!(rig.tick(100), 1);
    assert_eq!(rig.engine.pending_timers(), 1);
    assert_eq!(rig.tick(110), 1);
    assert_eq!(rig.engine.output_value(&key_addr(34)), Some(EventValue::Button(false)));
}

// =========================================================================
// Axes
// =========================================================================

#[test]
fn test_axis_virtual_button() {
    let mut p = base_profile();
    p.set_action(
        "r1",
        ActionNode::Root(RootConfig {
            actions: ids(&["out1"]),
            behavior: Some(ActivationPolicy::AxisAbove { threshold: 0.5 }),
        }),
    );
    p.add_binding(BindingKey::new("stick", InputRef::axis(1), "Default"), "r1");
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    rig.axis(1, 0.3, 0);
    rig.axis(1, 0.7, 10);
    rig.axis(1, 0.6, 20);
    rig.axis(1, 0.2, 30);
    assert_eq!(rig.presses(1), vec![true, false]);
}

#[test]
fn test_axis_invert() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(1), "Default", "r1", &["out"]);
    p.set_action(
        "out",
        ActionNode::MapToOutput(MapToOutputConfig {
            device: DeviceId::new("vjoy"),
            input: InputRef::axis(1),
            invert: true,
            axis_mode: AxisMode::Absolute,
            scaling: 1.0,
        }),
    );
    let mut rig = Rig::new(p);

    rig.axis(1, 0.4, 0);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(-0.4)));
}

#[test]
fn test_merge_reacts_to_either_input() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(1), "Default", "r1", &["merge"]);
    p.set_action(
        "merge",
        ActionNode::MergeAxis(MergeAxisConfig {
            first: InputAddr::new("stick", InputRef::axis(1)),
            second: InputAddr::new("stick", InputRef::axis(2)),
            operator: MergeOperator::SumClamped,
            weights: [1.0, 1.0],
            actions: ids(&["out"]),
        }),
    );
    p.set_action("out", ActionNode::map_to("vjoy", InputRef::axis(1)));
    let mut rig = Rig::new(p);

    rig.axis(1, 0.25, 0);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.25)));
    // Axis 2 has no binding of its own
    rig.axis(2, 0.5, 10);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.75)));
    rig.axis(2, 1.0, 20);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(1.0)));
}

#[test]
fn test_split_releases_the_side_being_left() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(3), "Default", "r1", &["split"]);
    p.set_action(
        "split",
        ActionNode::SplitAxis(SplitAxisConfig {
            split: 0.0,
            lower: ids(&["low"]),
            upper: ids(&["high"]),
        }),
    );
    p.set_action("low", ActionNode::map_to("vjoy", InputRef::axis(2)));
    p.set_action("high", ActionNode::map_to("vjoy", InputRef::axis(3)));
    let mut rig = Rig::new(p);

    rig.axis(3, 0.5, 0);
    assert_eq!(rig.engine.output_value(&vjoy_axis(3)), Some(EventValue::Axis(0.0)));
    assert_eq!(rig.engine.output_value(&vjoy_axis(2)), None);

    rig.axis(3, -0.5, 10);
    assert_eq!(rig.engine.output_value(&vjoy_axis(3)), Some(EventValue::Axis(-1.0)));
    assert_eq!(rig.engine.output_value(&vjoy_axis(2)), Some(EventValue::Axis(0.0)));
}

#[test]
fn test_relative_axis_integrates_over_ticks() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(1), "Default", "r1", &["rel"]);
    p.set_action(
        "rel",
        ActionNode::MapToOutput(MapToOutputConfig {
            device: DeviceId::new("vjoy"),
            input: InputRef::axis(1),
            invert: false,
            axis_mode: AxisMode::Relative,
            scaling: 1.0,
        }),
    );
    let mut rig = Rig::new(p);

    rig.axis(1, 0.5, 0);
    assert_eq!(rig.engine.pending_timers(), 1);
    rig.tick(1000);
    let value = axis_of(rig.engine.output_value(&vjoy_axis(1)));
    assert!((value - 0.5).abs() < 1e-6, "integrated to {}", value);

    // Stick centred: the value holds and ticking stops
    rig.axis(1, 0.0, 1000);
    rig.tick(1010);
    assert_eq!(rig.engine.pending_timers(), 0);
    let held = axis_of(rig.engine.output_value(&vjoy_axis(1)));
    assert!((held - 0.5).abs() < 1e-6);
}

// =========================================================================
// Conditions and scripting
// =========================================================================

#[test]
fn test_condition_follows_script_variable() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["cond"]);
    p.set_action(
        "cond",
        ActionNode::Condition(ConditionConfig {
            expression: Expression::parse("var.armed").unwrap(),
            when_true: ids(&["fire"]),
            when_false: ids(&["safe"]),
        }),
    );
    out_button(&mut p, "fire", 1);
    out_button(&mut p, "safe", 2);

    let sink = RecordingSink::new();
    let mut engine = Engine::new(Settings::new());
    engine
        .variables_mut()
        .register("armed", VariableKind::Bool, VariableValue::Bool(false))
        .unwrap();
    engine.activate(p, Box::new(sink.clone())).unwrap();
    let mut rig = Rig {
        engine,
        sink,
        t0: Instant::now(),
    };

    rig.button(1, true, 0);
    rig.button(1, false, 10);
    rig.engine.set_variable("armed", VariableValue::Bool(true)).unwrap();
    rig.button(1, true, 20);

    assert_eq!(rig.presses(2), vec![true, false]);
    assert_eq!(rig.presses(1), vec![true]);
    assert!(matches!(
        rig.engine.set_variable("armed", VariableValue::Integer(1)),
        Err(EngineError::Script(_))
    ));
}

#[test]
fn test_condition_release_follows_press_branch() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["cond"]);
    p.set_action(
        "cond",
        ActionNode::Condition(ConditionConfig {
            expression: Expression::parse("stick.button:2").unwrap(),
            when_true: ids(&["with"]),
            when_false: ids(&["without"]),
        }),
    );
    out_button(&mut p, "with", 1);
    out_button(&mut p, "without", 2);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    // The condition flips while the press is held
    rig.button(2, true, 10);
    rig.button(1, false, 20);
    assert_eq!(rig.presses(2), vec![true, false]);
    assert!(rig.presses(1).is_empty());

    rig.button(1, true, 30);
    rig.button(1, false, 40);
    assert_eq!(rig.presses(1), vec![true, false]);
}

#[test]
fn test_merge_behind_false_condition_stays_silent() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(1), "Default", "r1", &["cond"]);
    p.set_action(
        "cond",
        ActionNode::Condition(ConditionConfig {
            expression: Expression::parse("stick.button:5").unwrap(),
            when_true: ids(&["merge"]),
            when_false: Vec::new(),
        }),
    );
    p.set_action(
        "merge",
        ActionNode::MergeAxis(MergeAxisConfig {
            first: InputAddr::new("stick", InputRef::axis(1)),
            second: InputAddr::new("stick", InputRef::axis(2)),
            operator: MergeOperator::SumClamped,
            weights: [1.0, 1.0],
            actions: ids(&["out"]),
        }),
    );
    p.set_action("out", ActionNode::map_to("vjoy", InputRef::axis(1)));
    let mut rig = Rig::new(p);

    rig.axis(1, 0.25, 0);
    rig.axis(2, 0.5, 10);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), None);

    rig.button(5, true, 20);
    rig.axis(2, 0.25, 30);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.5)));

    rig.button(5, false, 40);
    rig.axis(2, 0.0, 50);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.5)));
}

#[test]
fn test_failed_merge_keeps_previous_output() {
    let mut p = base_profile();
    bind(&mut p, InputRef::axis(1), "Default", "r1", &["merge"]);
    bind(&mut p, InputRef::axis(1), "Default", "r2", &["out2"]);
    bind(&mut p, InputRef::axis(3), "Default", "r3", &["out1"]);
    p.set_action(
        "merge",
        ActionNode::MergeAxis(MergeAxisConfig {
            first: InputAddr::new("stick", InputRef::axis(1)),
            second: InputAddr::new("stick", InputRef::axis(2)),
            operator: MergeOperator::Weighted,
            weights: [1.0, -1.0],
            actions: ids(&["out1"]),
        }),
    );
    p.set_action("out1", ActionNode::map_to("vjoy", InputRef::axis(1)));
    p.set_action("out2", ActionNode::map_to("vjoy", InputRef::axis(2)));
    let mut rig = Rig::new(p);

    rig.axis(3, 0.5, 0);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.5)));

    // Weights summing to zero fail the merge without touching its output
    rig.axis(1, 0.25, 10);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(0.5)));
    assert_eq!(rig.engine.output_value(&vjoy_axis(2)), Some(EventValue::Axis(0.25)));

    // Later events are still processed
    rig.axis(3, -0.5, 20);
    assert_eq!(rig.engine.output_value(&vjoy_axis(1)), Some(EventValue::Axis(-0.5)));
}

#[test]
fn test_condition_on_other_input() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["cond"]);
    p.set_action(
        "cond",
        ActionNode::Condition(ConditionConfig {
            expression: Expression::parse("stick.button:2").unwrap(),
            when_true: ids(&["with"]),
            when_false: ids(&["without"]),
        }),
    );
    out_button(&mut p, "with", 1);
    out_button(&mut p, "without", 2);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(1, false, 10);
    rig.button(2, true, 20);
    rig.button(1, true, 30);
    assert_eq!(rig.presses(2), vec![true, false]);
    assert_eq!(rig.presses(1), vec![true]);
}

#[test]
fn test_callback_writes_and_switches_mode() {
    let mut p = base_profile();
    p.add_mode("Other", None);
    let mut rig = Rig::new(p);

    let target = vjoy_button(9);
    rig.engine.callbacks_mut().on_activation(
        InputAddr::new("stick", InputRef::button(3)),
        None,
        Box::new(move |event: &InputEvent, out: &mut ScriptOutput| {
            out.write(target.clone(), event.value);
            if event.value.is_pressed() {
                out.switch_mode("Other");
            }
        }),
    );

    rig.button(3, true, 0);
    assert_eq!(rig.presses(9), vec![true]);
    assert_eq!(rig.engine.current_mode(), Some("Other"));

    // Releases are not activations
    rig.button(3, false, 10);
    assert_eq!(rig.presses(9), vec![true]);
}

#[test]
fn test_change_callback_mirrors_every_value() {
    let mut rig = Rig::new(base_profile());
    let target = vjoy_button(8);
    rig.engine.callbacks_mut().on_change(
        InputAddr::new("stick", InputRef::button(3)),
        Some("Default"),
        Box::new(move |event: &InputEvent, out: &mut ScriptOutput| {
            out.write(target.clone(), event.value);
        }),
    );

    rig.button(3, true, 0);
    rig.button(3, false, 10);
    assert_eq!(rig.presses(8), vec![true, false]);
}

#[test]
fn test_keyboard_chord_releases_in_reverse() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["chord"]);
    p.set_action(
        "chord",
        ActionNode::MapToKeyboard(MapToKeyboardConfig {
            keys: vec![Key::LEFT_CTRL, Key(46)],
        }),
    );
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(1, false, 10);
    let writes = rig.sink.writes();
    let order: Vec<(u16, bool)> = writes
        .iter()
        .map(|(addr, value)| (addr.input.index, value.is_pressed()))
        .collect();
    assert_eq!(
        order,
        vec![
            (Key::LEFT_CTRL.code(), true),
            (46, true),
            (46, false),
            (Key::LEFT_CTRL.code(), false)
        ]
    );
}

// =========================================================================
// Devices and feedback
// =========================================================================

#[test]
fn test_feedback_through_intermediate_device() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["to-bus"]);
    p.set_action("to-bus", ActionNode::map_to("bus", InputRef::button(1)));
    p.set_action("from-bus", ActionNode::root(ids(&["out4"])));
    p.add_binding(BindingKey::new("bus", InputRef::button(1), "Default"), "from-bus");
    out_button(&mut p, "out4", 4);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    assert_eq!(rig.presses(4), vec![true]);
    rig.button(1, false, 10);
    assert_eq!(rig.presses(4), vec![true, false]);
    // Intermediate values never reach the sink
    assert!(rig.sink.writes().iter().all(|(addr, _)| addr.device != DeviceId::new("bus")));
}

#[test]
fn test_mode_switch_releases_through_intermediate() {
    let mut p = base_profile();
    p.add_mode("Other", Some("Default"));
    bind(&mut p, InputRef::button(1), "Default", "r1", &["to-bus"]);
    // Shadows the Default binding once Other is active
    bind(&mut p, InputRef::button(1), "Other", "quiet", &[]);
    p.set_action("to-bus", ActionNode::map_to("bus", InputRef::button(1)));
    p.set_action("from-bus", ActionNode::root(ids(&["out1"])));
    p.add_binding(BindingKey::new("bus", InputRef::button(1), "Default"), "from-bus");
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    assert_eq!(rig.presses(1), vec![true]);
    rig.engine.set_mode("Other").unwrap();
    assert_eq!(rig.presses(1), vec![true, false]);
    assert_eq!(rig.engine.output_value(&vjoy_button(1)), Some(EventValue::Button(false)));
}

#[test]
fn test_lost_device_releases_held_inputs() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);
    let stick = DeviceId::new("stick");

    rig.button(1, true, 0);
    rig.engine.device_status(&stick, false, rig.at(10)).unwrap();
    assert_eq!(rig.presses(1), vec![true, false]);

    // Ignored while offline
    rig.button(1, true, 20);
    assert_eq!(rig.presses(1), vec![true, false]);

    rig.engine.device_status(&stick, true, rig.at(30)).unwrap();
    rig.button(1, true, 40);
    assert_eq!(rig.presses(1), vec![true, false, true]);
}

#[test]
fn test_unavailable_output_is_skipped_until_back() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let sink = RecordingSink::new();
    sink.mark_unavailable("vjoy");
    let mut rig = Rig::with(p, Settings::new(), sink);

    rig.button(1, true, 0);
    rig.button(1, false, 10);
    rig.button(1, true, 15);
    assert!(rig.sink.writes().is_empty());

    // The press still held is delivered once the device is back
    rig.sink.mark_available("vjoy");
    rig.engine.device_status(&DeviceId::new("vjoy"), true, rig.at(20)).unwrap();
    assert_eq!(rig.presses(1), vec![true]);
    rig.button(1, false, 30);
    assert_eq!(rig.presses(1), vec![true, false]);
}

// =========================================================================
// Lifecycle and live edits
// =========================================================================

#[test]
fn test_deactivate_returns_outputs_to_rest() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    assert!(rig.engine.deactivate());
    assert_eq!(rig.presses(1), vec![true, false]);
    assert!(rig.sink.acquired().is_empty());
    assert!(!rig.engine.is_active());
    assert_eq!(rig.engine.current_mode(), None);

    let event = InputEvent::new("stick", InputRef::button(1), EventValue::Button(false), rig.at(10));
    assert!(matches!(rig.engine.handle_input(event), Err(EngineError::NotActive)));
    assert!(!rig.engine.deactivate());
}

#[test]
fn test_invalid_profile_is_not_activated() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["missing"]);
    let mut engine = Engine::new(Settings::new());
    let result = engine.activate(p, Box::new(RecordingSink::new()));
    assert!(matches!(result, Err(EngineError::Profile(_))));
    assert!(!engine.is_active());
}

#[test]
fn test_live_edit_resets_only_affected_contexts() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    bind(&mut p, InputRef::button(2), "Default", "r2", &["chord"]);
    out_button(&mut p, "out1", 1);
    p.set_action(
        "chord",
        ActionNode::MapToKeyboard(MapToKeyboardConfig {
            keys: vec![Key(30)],
        }),
    );
    let mut rig = Rig::new(p);

    rig.button(1, true, 0);
    rig.button(2, true, 10);

    rig.engine
        .edit(|p| p.set_action("out1", ActionNode::map_to("vjoy", InputRef::button(3))))
        .unwrap();
    // The edited branch let go of its old output, the other one is untouched
    assert_eq!(rig.presses(1), vec![true, false]);
    assert_eq!(rig.engine.output_value(&key_addr(30)), Some(EventValue::Button(true)));

    rig.button(1, false, 20);
    rig.button(1, true, 30);
    assert_eq!(rig.presses(3), vec![false, true]);
}

#[test]
fn test_rejected_edit_rolls_back() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);
    let before = rig.engine.profile().unwrap().clone();

    let result = rig.engine.edit(|p| p.set_action("r1", ActionNode::reference("nowhere")));
    assert!(matches!(result, Err(EngineError::Profile(_))));
    assert_eq!(rig.engine.profile(), Some(&before));

    rig.button(1, true, 0);
    assert_eq!(rig.presses(1), vec![true]);
}

#[test]
fn test_edit_removing_current_mode_falls_back_to_start() {
    let mut p = base_profile();
    p.add_mode("Spare", None);
    let mut rig = Rig::new(p);
    rig.engine.set_mode("Spare").unwrap();

    rig.engine.edit(|p| p.remove_mode("Spare")).unwrap();
    assert_eq!(rig.engine.current_mode(), Some("Default"));
}

#[test]
fn test_run_loop_stops_on_shutdown() {
    let mut p = base_profile();
    bind(&mut p, InputRef::button(1), "Default", "r1", &["out1"]);
    out_button(&mut p, "out1", 1);
    let mut rig = Rig::new(p);

    let queue = EventQueue::new();
    queue.push_input(InputEvent::new(
        "stick",
        InputRef::button(1),
        EventValue::Button(true),
        Instant::now(),
    ));
    queue.push(QueuedEvent::Shutdown);
    rig.engine.run(&queue);

    assert_eq!(rig.presses(1), vec![true]);
    assert!(queue.is_empty());
}
