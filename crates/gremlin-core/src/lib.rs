// Gremlin Core Library
// Profile model and event-driven action engine for game controller remapping

pub mod device;
pub mod engine;
pub mod key;
pub mod output;
pub mod profile;
pub mod resolver;
pub mod script;
pub mod settings;
pub mod synth;

pub use device::{
    DeviceId, DeviceKind, DeviceMatcher, EventQueue, EventValue, HatDirection, InputAddr, InputEvent, InputKind,
    InputRef, InputStates, QueuedEvent,
};
pub use engine::{Engine, EngineError, EvaluationError};
pub use key::Key;
pub use output::{OutputError, OutputSink, OutputWriter, RecordingSink, SinkSpec, WriteOutcome};
pub use profile::{ActionId, ActionNode, BindingKey, DeviceDecl, Profile, ProfileError};
pub use resolver::{ModeResolver, Resolution};
pub use script::{ScriptError, ScriptOutput, VariableKind, VariableValue};
pub use settings::{Settings, SettingsError};
pub use synth::{ActivationPolicy, VirtualButton};

#[cfg(feature = "pure-rust")]
pub use device::poller::{list_devices, DeviceInfo, JoystickPoller};
#[cfg(feature = "pure-rust")]
pub use output::UinputSink;
