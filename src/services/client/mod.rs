pub mod agent;
pub mod config;
pub mod error;
pub mod registry_client;

pub use agent::{AgentState, ClientAgent};
pub use config::{AgentConfig, InstanceDescriptor};
pub use error::AgentError;
pub use registry_client::RegistryClient;
