//! Discovery Provider contract
//!
//! A discovery provider is implemented once per cloud backend. The
//! orchestrator only ever talks to [`DiscoveryProvider`]; the backend's
//! control API is reached through a [`ClusterClient`] built from the
//! provider's bound configuration and resolved authorizer.
//!
//! ## Lifecycle
//!
//! - `setup` binds the configuration set and resolves the authorizer
//! - `discover` re-binds the session from its input, lists cluster
//!   identifiers and fetches each cluster's details (fail-fast, bounded
//!   concurrency, cancellable)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::authorizer::Authorizer;
use crate::config::ConfigurationSet;
use crate::error::Result;
use crate::identity::Identity;

mod engine;
mod prereq;
mod session;

pub use engine::collect_clusters;
pub use prereq::{check_all, PreReq, PreReqKind};
pub use session::Session;

/// A discovered Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cloud resource identifier (ARN, Azure resource id, ...)
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ca_data")]
    pub certificate_authority_data: Option<Vec<u8>>,
}

/// Input to a discovery run
#[derive(Debug, Clone)]
pub struct DiscoverInput {
    pub config_set: ConfigurationSet,
    pub identity: Identity,
}

/// Normalized result of a discovery run, keyed by cluster id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverOutput {
    pub discovery_provider: String,
    pub identity_provider: String,
    pub clusters: BTreeMap<String, Cluster>,
}

impl DiscoverOutput {
    pub fn new(discovery_provider: &str, identity_provider: &str) -> Self {
        Self {
            discovery_provider: discovery_provider.to_string(),
            identity_provider: identity_provider.to_string(),
            clusters: BTreeMap::new(),
        }
    }
}

/// A cloud backend's cluster API, with pagination fully drained
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_cluster_identifiers(&self) -> anyhow::Result<Vec<String>>;

    async fn describe_cluster(&self, identifier: &str) -> anyhow::Result<Cluster>;
}

/// Builds a provider's cluster client from its bound config and authorizer
pub type ClientFactory<C> =
    Arc<dyn Fn(&C, Arc<dyn Authorizer>) -> Result<Arc<dyn ClusterClient>> + Send + Sync>;

/// Capability implemented once per cloud backend
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Bind `config_set` into the provider's typed configuration and
    /// resolve an authorizer for `identity`. Performs no network calls.
    fn setup(&mut self, config_set: &ConfigurationSet, identity: &Identity) -> Result<()>;

    /// Discover clusters. Always re-runs `setup` from `input`, replacing any
    /// session bound earlier.
    async fn discover(
        &mut self,
        cancel: &CancellationToken,
        input: &DiscoverInput,
    ) -> Result<DiscoverOutput>;

    fn list_prereqs(&self) -> Vec<PreReq>;

    fn check_prereqs(&self) -> Result<()> {
        check_all(&self.list_prereqs())
    }
}

mod ca_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
