pub use cabinet::{
    clamp_value, Cabinet, CabinetError, CombinePolicy, FlushReport, Output, OutputHandle,
    PendingWrite, TickGuard, IDLE_VALUE,
};
pub use config::{default_config_dir, ConfigError, ConfigManager, ConfigSchema, Settings};
pub use events::{EventParseError, TableElementEvent, TableElementType};
pub use modules::{AsyncModule, FlushDriver, FlushModule, ModuleEvent, ModuleId, ModuleMessage};
pub use pinball::{Pinball, PinballError, TableIdentity};
pub use sink::{LogSink, MemorySink, OutputSink, SinkError};
pub use topology::{
    DeviceDefinition, FileTopology, StaticTopology, Topology, TopologySource, ToyDefinition,
};
pub use toys::{
    ConfigurationError, DirectToy, LedWizEquivalent, LedWizEquivalentBinding, LegacyTrigger,
    RgbToy, Toy, ToyError, ToyLifecycle, ToyState, Trigger,
};

pub mod cabinet;
mod config;
pub mod events;
mod modules;
mod pinball;
mod sink;
pub mod topology;
pub mod toys;
