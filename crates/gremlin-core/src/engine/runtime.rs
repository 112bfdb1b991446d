// Gremlin Engine Runtime
// Activation-scoped state: event walk, timer dispatch, mode switches and live edits

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use super::arena::RuntimeArena;
use super::context::{ActivationContext, ContextId, ContextKey, Contexts};
use super::effect::{Effect, EvalResult};
use super::nodes::{self, NodeCx};
use super::scheduler::Scheduler;
use crate::device::{DeviceId, DeviceKind, EventValue, InputAddr, InputEvent, InputKind, InputStates};
use crate::output::{OutputSink, OutputWriter, WriteOutcome};
use crate::profile::{ActionId, ActionNode, Library, Profile, ProfileChange};
use crate::resolver::ModeResolver;
use crate::script::{CallbackRegistry, VariableRegistry};
use crate::settings::Settings;
use crate::synth::ActivationPolicy;

/// Engine-owned pieces a runtime borrows per call
pub(crate) struct Env<'a> {
    pub settings: &'a Settings,
    pub variables: &'a VariableRegistry,
    pub callbacks: &'a mut CallbackRegistry,
}

/// Mode to go back to once a temporary switch's trigger is released
#[derive(Debug, Clone)]
struct TemporarySwitch {
    return_to: String,
    /// Behavior of the trigger's root, for axis triggers
    policy: Option<ActivationPolicy>,
}

#[derive(Debug)]
struct ModeRequest {
    mode: String,
    /// Trigger input and root of a temporary switch
    trigger: Option<(InputAddr, ActionId)>,
}

/// Deferred consequences of one event or timer
#[derive(Debug, Default)]
struct Outcome {
    feedback: Vec<InputEvent>,
    switch: Option<ModeRequest>,
}

enum Start<'s> {
    Value(&'s ActionId, EventValue),
    Timer(&'s ActionId),
}

/// One traversal of an action tree inside a single context
struct Walk<'a> {
    library: &'a Library,
    arena: &'a mut RuntimeArena,
    scheduler: &'a mut Scheduler,
    inputs: &'a InputStates,
    settings: &'a Settings,
    variables: &'a VariableRegistry,
    mode: &'a str,
    context: ActivationContext,
    now: Instant,
    /// Outputs and mode requests, in production order
    effects: Vec<Effect>,
}

impl<'a> Walk<'a> {
    fn run(&mut self, id: &ActionId, value: EventValue) {
        let library = self.library;
        let Some((concrete, node)) = library.resolve(id) else {
            log::warn!("Action '{}' does not resolve, skipped", id);
            return;
        };
        let result = {
            let state = self.arena.state_mut(concrete, self.context.id, node);
            let mut cx = NodeCx {
                action: concrete,
                context: self.context,
                now: self.now,
                settings: self.settings,
                scheduler: &mut *self.scheduler,
                inputs: self.inputs,
                mode: self.mode,
                variables: self.variables,
            };
            nodes::evaluate(node, state, value, &mut cx)
        };
        self.apply(concrete, node, value, result);
    }

    fn fire(&mut self, id: &ActionId) {
        let library = self.library;
        let Some(node) = library.get(id) else {
            return;
        };
        let result = {
            let state = self.arena.state_mut(id, self.context.id, node);
            let mut cx = NodeCx {
                action: id,
                context: self.context,
                now: self.now,
                settings: self.settings,
                scheduler: &mut *self.scheduler,
                inputs: self.inputs,
                mode: self.mode,
                variables: self.variables,
            };
            nodes::on_timer(node, state, &mut cx)
        };
        self.apply(id, node, EventValue::Button(false), result);
    }

    fn apply(&mut self, id: &ActionId, node: &'a ActionNode, incoming: EventValue, result: EvalResult) {
        let effects = match result {
            Ok(effects) => effects,
            Err(e) => {
                log::warn!("Action '{}' ({}) failed: {}", id, node.kind_name(), e);
                return;
            }
        };
        for effect in effects {
            match effect {
                Effect::Activate { slot, value } => {
                    for child in node.slot(slot) {
                        self.run(child, value);
                    }
                }
                Effect::PassThrough => {
                    for (_, children) in node.slots() {
                        for child in children {
                            self.run(child, incoming);
                        }
                    }
                }
                other => self.effects.push(other),
            }
        }
    }
}

/// Inputs read by every merge node below `id`
fn collect_merge_inputs(library: &Library, id: &ActionId, found: &mut Vec<InputAddr>) {
    let Some((_, node)) = library.resolve(id) else {
        return;
    };
    if let ActionNode::MergeAxis(c) = node {
        found.push(c.first.clone());
        found.push(c.second.clone());
    }
    for (_, children) in node.slots() {
        for child in children {
            collect_merge_inputs(library, child, found);
        }
    }
}

fn reaches(library: &Library, root: &ActionId, target: &ActionId) -> bool {
    library.reachable(root).contains(target)
}

/// Everything that exists only while a profile is active
pub(crate) struct Runtime {
    profile: Profile,
    writer: OutputWriter,
    mode: String,
    resolver: ModeResolver,
    contexts: Contexts,
    arena: RuntimeArena,
    scheduler: Scheduler,
    inputs: InputStates,
    /// Contexts whose tree holds a merge reading the keyed input
    merges: HashMap<InputAddr, Vec<ContextId>>,
    temporary: HashMap<InputAddr, TemporarySwitch>,
    offline: HashSet<DeviceId>,
}

impl Runtime {
    pub fn new(profile: Profile, sink: Box<dyn OutputSink>, mode: String) -> Self {
        let mut writer = OutputWriter::new(sink);
        writer.configure(&profile);
        let mut runtime = Self {
            profile,
            writer,
            mode,
            resolver: ModeResolver::new(),
            contexts: Contexts::new(),
            arena: RuntimeArena::new(),
            scheduler: Scheduler::new(),
            inputs: InputStates::new(),
            merges: HashMap::new(),
            temporary: HashMap::new(),
            offline: HashSet::new(),
        };
        runtime.rebuild_merges();
        runtime
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn process(&mut self, event: InputEvent, env: &mut Env) {
        self.process_input(event, env, 0);
    }

    fn process_input(&mut self, event: InputEvent, env: &mut Env, depth: usize) {
        if self.offline.contains(&event.device) {
            log::trace!("Dropping event from offline device '{}'", event.device);
            return;
        }
        let addr = event.addr();
        if !self.inputs.update(addr.clone(), event.value) {
            return;
        }
        log::trace!("{} = {}", addr, event.value);
        let now = event.timestamp;
        let mut outcome = Outcome::default();

        let script = env.callbacks.fire(&event, &self.mode, self.profile.modes());

        let resolution = self
            .resolver
            .resolve(&self.profile, &event.device, event.input, &self.mode)
            .clone();
        let mut walked: HashSet<ContextId> = HashSet::new();
        if let Some(owner) = resolution.mode {
            for root in &resolution.roots {
                let key = ContextKey {
                    device: event.device.clone(),
                    input: event.input,
                    mode: owner.clone(),
                    root: root.clone(),
                };
                let context = self.contexts.get_or_create(&key);
                walked.insert(context.id);
                let effects = self.walk(context, now, env, Start::Value(root, event.value));
                self.settle(effects, &key, now, &mut outcome);
            }
        }

        // Merges elsewhere reading this input are reached again from their
        // own root, so routing nodes above them still decide
        let subscribed = self.merges.get(&addr).cloned().unwrap_or_default();
        for context_id in subscribed {
            if !walked.insert(context_id) {
                continue;
            }
            let (Some(context), Some(key)) = (self.contexts.lookup(context_id), self.contexts.key(context_id).cloned())
            else {
                continue;
            };
            let value = self.inputs.value_or_rest(&key.addr());
            let effects = self.walk(context, now, env, Start::Value(&key.root, value));
            self.settle(effects, &key, now, &mut outcome);
        }

        for (target, value) in script.writes() {
            self.write(target, *value, now, &mut outcome);
        }
        if let Some(mode) = script.mode() {
            outcome.switch = Some(ModeRequest {
                mode: mode.to_string(),
                trigger: None,
            });
        }

        self.finish(outcome, now, env, depth);

        let released = self.temporary.get(&addr).map(|t| match &t.policy {
            Some(policy) => policy.is_pressed(&event.value) == Some(false),
            None => event.value.kind() != InputKind::Axis && !event.value.is_pressed(),
        });
        if released == Some(true) {
            if let Some(temp) = self.temporary.remove(&addr) {
                log::debug!("{} released, returning to mode '{}'", addr, temp.return_to);
                self.change_mode(&temp.return_to, now, env, depth);
            }
        }
    }

    fn walk(&mut self, context: ActivationContext, now: Instant, env: &Env, start: Start) -> Vec<Effect> {
        let mut walk = Walk {
            library: self.profile.library(),
            arena: &mut self.arena,
            scheduler: &mut self.scheduler,
            inputs: &self.inputs,
            settings: env.settings,
            variables: env.variables,
            mode: &self.mode,
            context,
            now,
            effects: Vec::new(),
        };
        match start {
            Start::Value(id, value) => walk.run(id, value),
            Start::Timer(id) => walk.fire(id),
        }
        walk.effects
    }

    fn settle(&mut self, effects: Vec<Effect>, key: &ContextKey, now: Instant, outcome: &mut Outcome) {
        for effect in effects {
            match effect {
                Effect::Output { target, value } => self.write(&target, value, now, outcome),
                Effect::SwitchMode { mode, temporary } => {
                    outcome.switch = Some(ModeRequest {
                        mode,
                        trigger: temporary.then(|| (key.addr(), key.root.clone())),
                    });
                }
                Effect::Activate { .. } | Effect::PassThrough => {}
            }
        }
    }

    fn write(&mut self, target: &InputAddr, value: EventValue, now: Instant, outcome: &mut Outcome) {
        if self.writer.write(target, value) == WriteOutcome::Feedback {
            outcome
                .feedback
                .push(InputEvent::new(target.device.clone(), target.input, value, now));
        }
    }

    fn finish(&mut self, outcome: Outcome, now: Instant, env: &mut Env, depth: usize) {
        for event in outcome.feedback {
            if depth >= env.settings.max_feedback_depth {
                log::warn!(
                    "Feedback through {} exceeded depth {}, dropped",
                    event.addr(),
                    env.settings.max_feedback_depth
                );
                continue;
            }
            self.process_input(event, env, depth + 1);
        }

        if let Some(request) = outcome.switch {
            if let Some((trigger, root)) = request.trigger {
                if !self.temporary.contains_key(&trigger) {
                    let policy = match self.profile.library().resolve(&root) {
                        Some((_, ActionNode::Root(c))) => c.behavior.clone(),
                        _ => None,
                    };
                    self.temporary.insert(
                        trigger,
                        TemporarySwitch {
                            return_to: self.mode.clone(),
                            policy,
                        },
                    );
                }
            }
            self.change_mode(&request.mode, now, env, depth);
        }
    }

    /// Change the current mode; unknown modes are refused
    pub fn switch_mode(&mut self, mode: &str, now: Instant, env: &mut Env) -> bool {
        self.change_mode(mode, now, env, 0)
    }

    fn change_mode(&mut self, mode: &str, now: Instant, env: &mut Env, depth: usize) -> bool {
        if !self.profile.modes().contains(mode) {
            log::warn!("Ignoring switch to unknown mode '{}'", mode);
            return false;
        }
        if self.mode == mode {
            return true;
        }
        log::info!("Mode changed: {} -> {}", self.mode, mode);
        self.mode = mode.to_string();
        let mut outcome = Outcome::default();
        self.prune(now, &mut outcome);
        self.rebuild_merges();
        // Releases written to intermediate devices reach their consumers
        self.finish(outcome, now, env, depth);
        true
    }

    pub fn dispatch_timers(&mut self, now: Instant, env: &mut Env) -> usize {
        let mut fired = 0;
        while let Some(due) = self.scheduler.pop_due(now) {
            if !self.contexts.is_current(due.key.context, due.generation) {
                log::trace!("Ignoring stale timer of '{}' in {}", due.key.action, due.key.context);
                continue;
            }
            let (Some(context), Some(key)) = (
                self.contexts.lookup(due.key.context),
                self.contexts.key(due.key.context).cloned(),
            ) else {
                continue;
            };
            let effects = self.walk(context, due.deadline, env, Start::Timer(&due.key.action));
            let mut outcome = Outcome::default();
            self.settle(effects, &key, due.deadline, &mut outcome);
            self.finish(outcome, due.deadline, env, 0);
            fired += 1;
        }
        fired
    }

    /// A device went away or came back
    pub fn device_status(&mut self, device: &DeviceId, available: bool, now: Instant, env: &mut Env) {
        let kind = self.profile.device_kind(device);
        if kind == Some(DeviceKind::Virtual) {
            if available && self.writer.retry(device) {
                log::info!("Output device '{}' is available again", device);
            } else if !available {
                log::warn!("Output device '{}' reported unavailable", device);
            }
            return;
        }
        if kind == Some(DeviceKind::Intermediate) {
            return;
        }

        if available {
            if self.offline.remove(device) {
                log::info!("Device '{}' is back", device);
            }
            return;
        }
        if self.offline.contains(device) {
            return;
        }
        log::warn!("Device '{}' unavailable, releasing its inputs", device);
        for kind in [InputKind::Button, InputKind::Hat] {
            for input in self.inputs.inputs_of(device, kind) {
                let addr = InputAddr::new(device.clone(), input);
                if self.inputs.is_pressed(&addr) {
                    self.process_input(InputEvent::new(device.clone(), input, EventValue::rest(kind), now), env, 0);
                }
            }
        }
        self.inputs.clear_device(device);
        self.offline.insert(device.clone());
    }

    /// Swap in an edited, already validated profile
    pub fn apply_edit(&mut self, mut profile: Profile, now: Instant, env: &mut Env) {
        let changes = profile.take_changes();
        let mut reset: BTreeSet<ContextId> = BTreeSet::new();
        let mut modes_changed = false;
        let mut devices_changed = false;

        for change in &changes {
            match change {
                ProfileChange::ActionChanged(id) | ProfileChange::ActionRemoved(id) => {
                    for (context, key) in self.contexts.iter() {
                        if self.arena.get(id, context).is_some()
                            || reaches(self.profile.library(), &key.root, id)
                            || reaches(profile.library(), &key.root, id)
                        {
                            reset.insert(context);
                        }
                    }
                }
                ProfileChange::BindingChanged(key) => self.resolver.invalidate_input(&key.device, key.input),
                ProfileChange::ModesChanged => {
                    self.resolver.invalidate_all();
                    modes_changed = true;
                }
                ProfileChange::DevicesChanged => devices_changed = true,
            }
        }

        // Teardown runs against the library the state was built from
        let mut outcome = Outcome::default();
        for context in reset {
            self.teardown_context(context, now, &mut outcome);
            self.contexts.bump(context);
        }
        self.profile = profile;

        if modes_changed {
            let modes = self.profile.modes();
            self.temporary.retain(|_, t| modes.contains(&t.return_to));
            if !modes.contains(&self.mode) {
                let start = self.profile.start_mode().to_string();
                log::warn!("Mode '{}' was removed, falling back to '{}'", self.mode, start);
                self.mode = start;
            }
        }
        if devices_changed {
            self.writer.configure(&self.profile);
        }
        self.prune(now, &mut outcome);
        self.rebuild_merges();
        log::info!("Applied {} profile change(s)", changes.len());
        self.finish(outcome, now, env, 0);
    }

    /// Release everything this runtime holds
    pub fn shutdown(&mut self) {
        // Nothing is evaluated any more, so feedback is not followed
        let mut outcome = Outcome::default();
        let now = Instant::now();
        for context in self.contexts.ids() {
            self.teardown_context(context, now, &mut outcome);
        }
        self.contexts.clear();
        self.scheduler.clear();
        self.writer.release_all();
        self.temporary.clear();
    }

    /// Destroy contexts whose binding no longer wins in the current mode
    fn prune(&mut self, now: Instant, outcome: &mut Outcome) {
        let mut stale = Vec::new();
        for (context, key) in self.contexts.iter() {
            let resolution = self.resolver.resolve(&self.profile, &key.device, key.input, &self.mode);
            let live = resolution.mode.as_deref() == Some(key.mode.as_str()) && resolution.roots.contains(&key.root);
            if !live {
                stale.push(context);
            }
        }
        stale.sort();
        if !stale.is_empty() {
            log::debug!("Retiring {} context(s)", stale.len());
        }
        for context in stale {
            self.teardown_context(context, now, outcome);
            self.contexts.destroy(context);
        }
    }

    /// Return held outputs of a context to rest and drop its node state
    fn teardown_context(&mut self, context: ContextId, now: Instant, outcome: &mut Outcome) {
        for (action, state) in self.arena.remove_context(context) {
            let Some(node) = self.profile.library().get(&action) else {
                continue;
            };
            for effect in nodes::teardown(node, &state) {
                if let Effect::Output { target, value } = effect {
                    self.write(&target, value, now, outcome);
                }
            }
        }
    }

    fn rebuild_merges(&mut self) {
        self.merges.clear();
        let library = self.profile.library();
        for addr in self.profile.bindings().bound_inputs() {
            let resolution = self.resolver.resolve(&self.profile, &addr.device, addr.input, &self.mode);
            let Some(owner) = resolution.mode.clone() else {
                continue;
            };
            for root in resolution.roots.clone() {
                let mut found = Vec::new();
                collect_merge_inputs(library, &root, &mut found);
                if found.is_empty() {
                    continue;
                }
                let key = ContextKey {
                    device: addr.device.clone(),
                    input: addr.input,
                    mode: owner.clone(),
                    root,
                };
                let context = self.contexts.get_or_create(&key);
                for input in found {
                    let subs = self.merges.entry(input).or_default();
                    if !subs.contains(&context.id) {
                        subs.push(context.id);
                    }
                }
            }
        }
        if !self.merges.is_empty() {
            log::debug!("Merge subscriptions on {} input(s)", self.merges.len());
        }
    }
}
