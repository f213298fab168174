pub mod client;
pub mod event;
pub mod registry;

pub use client::{AgentConfig, ClientAgent, InstanceDescriptor, RegistryClient};
pub use event::{EventBus, RegistryEvent, RegistryEventKind};
pub use registry::{InstanceInfo, InstanceStatus, LeaseStore, RegistryError, RegistryService};
