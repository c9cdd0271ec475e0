//! Azure Kubernetes Service discovery

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::authorizer::{Authorizer, ProviderCapabilities};
use crate::config::ConfigurationSet;
use crate::discovery::{
    collect_clusters, ClientFactory, ClusterClient, DiscoverInput, DiscoverOutput, DiscoveryProvider,
    PreReq, Session,
};
use crate::error::{DiscoveryError, Result};
use crate::identity::Identity;
use crate::registry::PluginCreationInput;

mod client;

pub use client::AksRestClient;

pub const PROVIDER_NAME: &str = "aks";
pub const SUPPORTED_IDENTITY_PROVIDERS: &[&str] = &["aad", "az-env"];
pub const USAGE_EXAMPLE: &str = r#"  # Discover AKS clusters using Azure AD
  cluster-discovery aks --idp-protocol aad

  # Discover AKS clusters using environment based credentials
  export AZURE_TENANT_ID="123455"
  export AZURE_CLIENT_ID="76849"
  export AZURE_CLIENT_SECRET="supersecret"
  cluster-discovery aks --idp-protocol az-env
"#;

pub const SUBSCRIPTION_ID_ITEM: &str = "subscription-id";
pub const SUBSCRIPTION_NAME_ITEM: &str = "subscription-name";
pub const RESOURCE_GROUP_ITEM: &str = "resource-group";
pub const ADMIN_ITEM: &str = "admin";
pub const CLUSTER_NAME_ITEM: &str = "cluster-name";

pub fn configuration_items(_scope: &str) -> Result<ConfigurationSet> {
    let mut cs = ConfigurationSet::new();
    cs.string(SUBSCRIPTION_ID_ITEM, "", "The Azure subscription to use (specified by ID)")?;
    cs.string(SUBSCRIPTION_NAME_ITEM, "", "The Azure subscription to use (specified by name)")?;
    cs.string(RESOURCE_GROUP_ITEM, "", "The Azure resource group to use")?;
    cs.bool(ADMIN_ITEM, false, "Generate admin user kubeconfig")?;
    cs.string(CLUSTER_NAME_ITEM, "", "The name of the AKS cluster")?;
    cs.set_short(RESOURCE_GROUP_ITEM, 'r')?;
    Ok(cs)
}

pub fn capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(PROVIDER_NAME, SUPPORTED_IDENTITY_PROVIDERS).with_bearer()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AksConfig {
    #[serde(rename = "subscription-id", default)]
    pub subscription_id: String,
    #[serde(rename = "subscription-name", default)]
    pub subscription_name: String,
    #[serde(rename = "resource-group", default)]
    pub resource_group: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(rename = "cluster-name", default)]
    pub cluster_name: String,
}

pub struct AksClusterProvider {
    client_factory: ClientFactory<AksConfig>,
    worker_limit: usize,
    session: Option<Session<AksConfig>>,
}

impl AksClusterProvider {
    /// Factory used by the registry
    pub fn create(input: PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> {
        let http_client = input
            .http_client
            .ok_or(DiscoveryError::MissingCollaborator {
                provider: PROVIDER_NAME.to_string(),
                collaborator: "HTTP client",
            })?;

        let factory: ClientFactory<AksConfig> = Arc::new(
            move |config: &AksConfig, authorizer: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                let client: Arc<dyn ClusterClient> =
                    Arc::new(AksRestClient::new(http_client.clone(), authorizer, config.clone()));
                Ok(client)
            },
        );

        Ok(Box::new(Self::with_client_factory(factory, input.worker_limit)))
    }

    pub fn with_client_factory(client_factory: ClientFactory<AksConfig>, worker_limit: usize) -> Self {
        Self {
            client_factory,
            worker_limit,
            session: None,
        }
    }

    fn establish(config_set: &ConfigurationSet, identity: &Identity) -> Result<Session<AksConfig>> {
        Session::establish(PROVIDER_NAME, config_set, identity, |_| capabilities())
    }
}

#[async_trait]
impl DiscoveryProvider for AksClusterProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn setup(&mut self, config_set: &ConfigurationSet, identity: &Identity) -> Result<()> {
        self.session = Some(Self::establish(config_set, identity)?);
        Ok(())
    }

    async fn discover(
        &mut self,
        cancel: &CancellationToken,
        input: &DiscoverInput,
    ) -> Result<DiscoverOutput> {
        let session = self
            .session
            .insert(Self::establish(&input.config_set, &input.identity)?);

        info!(resource_group = %session.config.resource_group, "Discovering AKS clusters");

        let client = (self.client_factory)(&session.config, Arc::clone(&session.authorizer))?;
        let clusters = collect_clusters(PROVIDER_NAME, client.as_ref(), cancel, self.worker_limit).await?;

        let mut output = DiscoverOutput::new(PROVIDER_NAME, session.identity_provider());
        output.clusters = clusters;
        Ok(output)
    }

    fn list_prereqs(&self) -> Vec<PreReq> {
        Vec::new()
    }
}
