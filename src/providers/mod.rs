//! Built-in plugins
//!
//! Discovery providers for AKS and EKS plus the environment based identity
//! providers they are normally paired with.

use anyhow::Context;
use serde_json::Value;

use crate::authorizer::Authorizer;
use crate::error::Result;
use crate::identity::env::{AWS_IAM_PROVIDER_NAME, AZ_ENV_PROVIDER_NAME};
use crate::identity::{AwsIamIdentityProvider, AzureEnvIdentityProvider};
use crate::registry::{
    DiscoveryPluginRegistration, IdentityPluginRegistration, PluginRegistration, Registry,
};

pub mod aks;
pub mod eks;

/// Register every built-in plugin with `registry`
pub fn register_builtin(registry: &Registry) -> Result<()> {
    registry.register_discovery(DiscoveryPluginRegistration::new(
        PluginRegistration::new(aks::PROVIDER_NAME, aks::USAGE_EXAMPLE, aks::configuration_items),
        aks::AksClusterProvider::create,
        aks::SUPPORTED_IDENTITY_PROVIDERS,
    ))?;

    registry.register_discovery(DiscoveryPluginRegistration::new(
        PluginRegistration::new(eks::PROVIDER_NAME, eks::USAGE_EXAMPLE, eks::configuration_items),
        eks::EksClusterProvider::create,
        eks::SUPPORTED_IDENTITY_PROVIDERS,
    ))?;

    registry.register_identity(IdentityPluginRegistration::new(
        PluginRegistration::new(
            AZ_ENV_PROVIDER_NAME,
            "export AZURE_TENANT_ID AZURE_CLIENT_ID AZURE_CLIENT_SECRET",
            AzureEnvIdentityProvider::configuration_items,
        ),
        AzureEnvIdentityProvider::create,
    ))?;

    registry.register_identity(IdentityPluginRegistration::new(
        PluginRegistration::new(
            AWS_IAM_PROVIDER_NAME,
            "export AWS_ACCESS_KEY_ID AWS_SECRET_ACCESS_KEY",
            AwsIamIdentityProvider::configuration_items,
        ),
        AwsIamIdentityProvider::create,
    ))?;

    Ok(())
}

/// Sign `request`, send it and decode the JSON body
pub(crate) async fn execute_json(
    http_client: &reqwest::Client,
    authorizer: &dyn Authorizer,
    mut request: reqwest::Request,
) -> anyhow::Result<Value> {
    authorizer.sign(&mut request)?;

    let url = request.url().clone();
    let response = http_client
        .execute(request)
        .await
        .with_context(|| format!("Failed to call {}", url.path()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("API error {}: {}", status, text);
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url.path()))
}
