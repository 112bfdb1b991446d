// Gremlin Execution Engine
// Single-threaded owner of the active profile, its runtime state and the output writer

pub mod arena;
pub mod context;
pub mod effect;
pub mod nodes;
mod runtime;
pub mod scheduler;

use std::time::Instant;

pub use context::{ActivationContext, ContextId, ContextKey};
pub use effect::{Effect, Effects, EvalResult, EvaluationError};
pub use scheduler::Scheduler;

use crate::device::{DeviceId, EventQueue, EventValue, InputAddr, InputEvent, QueuedEvent};
use crate::output::OutputSink;
use crate::profile::{Profile, ProfileError};
use crate::script::{CallbackRegistry, ScriptError, VariableRegistry, VariableValue};
use crate::settings::Settings;
use runtime::{Env, Runtime};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No profile is active")]
    NotActive,

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Event-driven action engine.
///
/// All evaluation happens on the thread that owns the engine. Device
/// readers only push onto an [`EventQueue`]; timers are dispatched from
/// the same loop that drains it.
pub struct Engine {
    settings: Settings,
    variables: VariableRegistry,
    callbacks: CallbackRegistry,
    runtime: Option<Runtime>,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            variables: VariableRegistry::new(),
            callbacks: CallbackRegistry::new(),
            runtime: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn parts(&mut self) -> Option<(&mut Runtime, Env<'_>)> {
        let runtime = self.runtime.as_mut()?;
        Some((
            runtime,
            Env {
                settings: &self.settings,
                variables: &self.variables,
                callbacks: &mut self.callbacks,
            },
        ))
    }

    /// Validate and start running a profile; replaces any active one
    pub fn activate(&mut self, mut profile: Profile, sink: Box<dyn OutputSink>) -> Result<(), EngineError> {
        profile.validate()?;
        profile.take_changes();
        self.deactivate();

        let mode = match &self.settings.start_mode {
            Some(mode) if profile.modes().contains(mode) => mode.clone(),
            Some(mode) => {
                log::warn!(
                    "Configured start mode '{}' not in profile, using '{}'",
                    mode,
                    profile.start_mode()
                );
                profile.start_mode().to_string()
            }
            None => profile.start_mode().to_string(),
        };
        log::info!(
            "Activating profile: {} action(s), {} binding(s), mode '{}'",
            profile.library().len(),
            profile.bindings().len(),
            mode
        );
        self.runtime = Some(Runtime::new(profile, sink, mode));
        Ok(())
    }

    /// Stop the active profile, returning every output to rest
    pub fn deactivate(&mut self) -> bool {
        match self.runtime.take() {
            Some(mut runtime) => {
                runtime.shutdown();
                log::info!("Profile deactivated");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.runtime.as_ref().map(Runtime::profile)
    }

    pub fn current_mode(&self) -> Option<&str> {
        self.runtime.as_ref().map(Runtime::mode)
    }

    pub fn set_mode(&mut self, mode: &str) -> Result<(), EngineError> {
        let (runtime, mut env) = self.parts().ok_or(EngineError::NotActive)?;
        if runtime.switch_mode(mode, Instant::now(), &mut env) {
            Ok(())
        } else {
            Err(EngineError::UnknownMode(mode.to_string()))
        }
    }

    /// Process one queued item; returns false once the loop should stop
    pub fn handle(&mut self, event: QueuedEvent) -> bool {
        match event {
            QueuedEvent::Input(input) => {
                if self.handle_input(input).is_err() {
                    log::trace!("Input ignored, no active profile");
                }
                true
            }
            QueuedEvent::DeviceStatus { device, available } => {
                if let Some((runtime, mut env)) = self.parts() {
                    runtime.device_status(&device, available, Instant::now(), &mut env);
                }
                true
            }
            QueuedEvent::Shutdown => false,
        }
    }

    pub fn handle_input(&mut self, event: InputEvent) -> Result<(), EngineError> {
        let (runtime, mut env) = self.parts().ok_or(EngineError::NotActive)?;
        runtime.process(event, &mut env);
        Ok(())
    }

    /// Report a device going away or coming back at a given time
    pub fn device_status(&mut self, device: &DeviceId, available: bool, now: Instant) -> Result<(), EngineError> {
        let (runtime, mut env) = self.parts().ok_or(EngineError::NotActive)?;
        runtime.device_status(device, available, now, &mut env);
        Ok(())
    }

    /// Fire every timer due at `now`; returns how many ran
    pub fn dispatch_timers(&mut self, now: Instant) -> usize {
        match self.parts() {
            Some((runtime, mut env)) => runtime.dispatch_timers(now, &mut env),
            None => 0,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.runtime.as_ref().and_then(Runtime::next_deadline)
    }

    /// Drain `queue` until a shutdown item arrives
    pub fn run(&mut self, queue: &EventQueue) {
        loop {
            let item = queue.pop_until(self.next_deadline());
            if let Some(item) = item {
                if !self.handle(item) {
                    log::info!("Engine loop stopping");
                    break;
                }
            }
            self.dispatch_timers(Instant::now());
        }
    }

    /// Edit the active profile in place.
    ///
    /// The edit is applied to a copy and validated first; a rejected edit
    /// leaves the running profile untouched.
    pub fn edit<F>(&mut self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Profile),
    {
        let (runtime, mut env) = self.parts().ok_or(EngineError::NotActive)?;
        let mut draft = runtime.profile().clone();
        draft.take_changes();
        f(&mut draft);
        if let Err(e) = draft.validate() {
            log::warn!("Rejected profile edit: {}", e);
            return Err(e.into());
        }
        runtime.apply_edit(draft, Instant::now(), &mut env);
        Ok(())
    }

    pub fn variables(&self) -> &VariableRegistry {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableRegistry {
        &mut self.variables
    }

    /// Set a script variable, checked against the active profile if any
    pub fn set_variable(&mut self, name: &str, value: VariableValue) -> Result<(), EngineError> {
        let profile = self.runtime.as_ref().map(Runtime::profile);
        self.variables.set(name, value, profile)?;
        Ok(())
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Last value written to an output input
    pub fn output_value(&self, addr: &InputAddr) -> Option<EventValue> {
        self.runtime.as_ref().and_then(|r| r.writer().value(addr))
    }

    pub fn context_count(&self) -> usize {
        self.runtime.as_ref().map_or(0, Runtime::context_count)
    }

    pub fn pending_timers(&self) -> usize {
        self.runtime.as_ref().map_or(0, Runtime::pending_timers)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.deactivate();
    }
}
