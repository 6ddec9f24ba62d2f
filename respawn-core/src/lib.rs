pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod policy;
pub mod process;
pub mod snapshot;
pub mod state;

pub use command::{CommandParser, PosixGrammar, ResolvedCommand, WindowsGrammar, platform_parser};
pub use config::{CommandSpec, MonitorConfig, StdioMode};
pub use env::merge_env;
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, MonitorEvent};
pub use policy::{ExitContext, RestartDecision};
pub use process::{ExitStatus, ProcessBuilder, Signal, StdioFactory, StdioSet};
pub use snapshot::Snapshot;
pub use state::{LifecycleState, Uid};
