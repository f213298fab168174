//! Registry service module
//!
//! This module contains the lease-based registry split into logical components:
//! - `types`: Data structures and type definitions
//! - `lease_store`: In-memory lease table
//! - `heartbeat`: Lease renewal and renewal metering
//! - `sweeper`: Periodic eviction with self-preservation
//! - `service`: Registry operations composing the above
//! - `http_impl`: HTTP/JSON routes

pub mod error;
pub mod heartbeat;
pub mod http_impl;
pub mod lease_store;
pub mod service;
pub mod sweeper;
pub mod types;

// Re-export public types for easier access
pub use error::RegistryError;
pub use heartbeat::HeartbeatProcessor;
pub use lease_store::LeaseStore;
pub use service::RegistryService;
pub use sweeper::{EvictionSweeper, SweepReport};
pub use types::{InstanceInfo, InstanceRecord, InstanceStatus, RegisterRequest, ServiceRegistry};
