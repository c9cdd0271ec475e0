//! Lornu Cluster Discovery
//!
//! Plugin contract layer for discovering Kubernetes clusters across cloud
//! backends: a plugin registry, declarative configuration negotiation and
//! identity to authorizer dispatch, with AKS and EKS providers built in.

pub mod authorizer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod providers;
pub mod registry;

pub use authorizer::{resolve_authorizer, Authorizer, ProviderCapabilities};
pub use config::{ConfigItem, ConfigValue, ConfigurationSet, ItemKind};
pub use discovery::{Cluster, ClusterClient, DiscoverInput, DiscoverOutput, DiscoveryProvider, PreReq};
pub use error::{DiscoveryError, Result};
pub use identity::{Identity, IdentityProvider};
pub use orchestrator::{DiscoveryRequest, DiscoveryState, Orchestrator, OrchestratorOptions};
pub use registry::{register_discovery_plugin, Registry};
