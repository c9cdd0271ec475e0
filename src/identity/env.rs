//! Environment based identity providers
//!
//! - `az-env`: Azure AD client-credentials exchange using a service principal
//!   from `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET`
//! - `aws-iam`: static AWS access keys from `AWS_ACCESS_KEY_ID` /
//!   `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//!
//! Values set on the configuration set take precedence over the environment.

use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{AuthorizerIdentity, AwsIdentity, Identity, IdentityProvider, StaticToken};
use crate::authorizer::BearerAuthorizer;
use crate::config::ConfigurationSet;
use crate::error::{DiscoveryError, Result};
use crate::registry::PluginCreationInput;

pub const AZ_ENV_PROVIDER_NAME: &str = "az-env";
pub const AWS_IAM_PROVIDER_NAME: &str = "aws-iam";

const AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";
const AZURE_MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

const TENANT_ID_ITEM: &str = "tenant-id";
const CLIENT_ID_ITEM: &str = "client-id";
const CLIENT_SECRET_ITEM: &str = "client-secret";

const ACCESS_KEY_ITEM: &str = "access-key";
const SECRET_KEY_ITEM: &str = "secret-key";
const SESSION_TOKEN_ITEM: &str = "session-token";

/// Config value if non-empty, otherwise the environment variable
fn setting(
    cs: &ConfigurationSet,
    item: &str,
    env_var: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    cs.value_str(item)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| lookup(env_var).filter(|v| !v.is_empty()))
}

fn required_setting(
    provider: &str,
    cs: &ConfigurationSet,
    item: &str,
    env_var: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String> {
    setting(cs, item, env_var, lookup).ok_or_else(|| {
        DiscoveryError::bind(provider, format!("{} is not set (use {} or {})", item, item, env_var))
    })
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Service principal credentials for the client-credentials flow
#[derive(Clone, PartialEq, Eq)]
pub struct AzureClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl AzureClientCredentials {
    pub fn resolve(cs: &ConfigurationSet, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            tenant_id: required_setting(AZ_ENV_PROVIDER_NAME, cs, TENANT_ID_ITEM, "AZURE_TENANT_ID", lookup)?,
            client_id: required_setting(AZ_ENV_PROVIDER_NAME, cs, CLIENT_ID_ITEM, "AZURE_CLIENT_ID", lookup)?,
            client_secret: required_setting(
                AZ_ENV_PROVIDER_NAME,
                cs,
                CLIENT_SECRET_ITEM,
                "AZURE_CLIENT_SECRET",
                lookup,
            )?,
        })
    }
}

/// Parse an Azure AD token response into the access token and its lifetime
/// in seconds. `expires_in` is a number on v2 endpoints and a string on v1.
pub fn parse_token_response(body: &Value) -> anyhow::Result<(String, u64)> {
    let token = body["access_token"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing access_token in Azure response"))?
        .to_string();

    let expires_in = match &body["expires_in"] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(3600);

    Ok((token, expires_in))
}

/// `az-env` identity provider
pub struct AzureEnvIdentityProvider {
    http_client: reqwest::Client,
    authority: String,
}

impl AzureEnvIdentityProvider {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            authority: AZURE_AUTHORITY.to_string(),
        }
    }

    /// Factory used by the registry
    pub fn create(input: PluginCreationInput) -> Result<Box<dyn IdentityProvider>> {
        let http_client = input
            .http_client
            .ok_or(DiscoveryError::MissingCollaborator {
                provider: AZ_ENV_PROVIDER_NAME.to_string(),
                collaborator: "HTTP client",
            })?;
        Ok(Box::new(Self::new(http_client)))
    }

    pub fn configuration_items(_scope: &str) -> Result<ConfigurationSet> {
        let mut cs = ConfigurationSet::new();
        cs.string(TENANT_ID_ITEM, "", "The Azure tenant id (defaults to AZURE_TENANT_ID)")?;
        cs.string(CLIENT_ID_ITEM, "", "The service principal client id (defaults to AZURE_CLIENT_ID)")?;
        cs.string(
            CLIENT_SECRET_ITEM,
            "",
            "The service principal secret (defaults to AZURE_CLIENT_SECRET)",
        )?;
        cs.set_sensitive(CLIENT_SECRET_ITEM)?;
        Ok(cs)
    }
}

#[async_trait]
impl IdentityProvider for AzureEnvIdentityProvider {
    fn name(&self) -> &str {
        AZ_ENV_PROVIDER_NAME
    }

    async fn authenticate(&self, config_set: &ConfigurationSet) -> Result<Identity> {
        const OPERATION: &str = "requesting Azure AD token";

        let creds = AzureClientCredentials::resolve(config_set, &env_lookup)?;

        let token_url = format!("{}/{}/oauth2/v2.0/token", self.authority, creds.tenant_id);
        let form_data = [
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("scope", AZURE_MANAGEMENT_SCOPE),
        ];

        debug!(tenant_id = %creds.tenant_id, client_id = %creds.client_id, "Requesting Azure AD token");

        let response = self
            .http_client
            .post(&token_url)
            .form(&form_data)
            .send()
            .await
            .map_err(|e| DiscoveryError::collaborator(AZ_ENV_PROVIDER_NAME, OPERATION, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::collaborator(
                AZ_ENV_PROVIDER_NAME,
                OPERATION,
                anyhow::anyhow!("Azure AD failed with {}: {}", status, body),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DiscoveryError::collaborator(AZ_ENV_PROVIDER_NAME, OPERATION, e))?;
        let (access_token, expires_in) = parse_token_response(&body)
            .map_err(|e| DiscoveryError::collaborator(AZ_ENV_PROVIDER_NAME, OPERATION, e))?;

        let source = StaticToken::new(
            AZ_ENV_PROVIDER_NAME,
            access_token,
            Some(Instant::now() + Duration::from_secs(expires_in)),
        );
        info!(
            tenant_id = %creds.tenant_id,
            expires_in_secs = source.time_until_expiry().unwrap_or_default().as_secs(),
            "Azure credentials obtained from environment"
        );
        let authorizer = BearerAuthorizer::new(Arc::new(source));

        Ok(Identity::Authorizer(AuthorizerIdentity::new(
            AZ_ENV_PROVIDER_NAME,
            Arc::new(authorizer),
        )))
    }
}

/// `aws-iam` identity provider
#[derive(Debug, Default)]
pub struct AwsIamIdentityProvider;

impl AwsIamIdentityProvider {
    pub fn create(_input: PluginCreationInput) -> Result<Box<dyn IdentityProvider>> {
        Ok(Box::new(Self))
    }

    pub fn configuration_items(_scope: &str) -> Result<ConfigurationSet> {
        let mut cs = ConfigurationSet::new();
        cs.string(ACCESS_KEY_ITEM, "", "The AWS access key id (defaults to AWS_ACCESS_KEY_ID)")?;
        cs.string(SECRET_KEY_ITEM, "", "The AWS secret access key (defaults to AWS_SECRET_ACCESS_KEY)")?;
        cs.string(SESSION_TOKEN_ITEM, "", "The AWS session token (defaults to AWS_SESSION_TOKEN)")?;
        cs.set_sensitive(SECRET_KEY_ITEM)?;
        cs.set_sensitive(SESSION_TOKEN_ITEM)?;
        Ok(cs)
    }

    pub fn resolve(cs: &ConfigurationSet, lookup: &dyn Fn(&str) -> Option<String>) -> Result<AwsIdentity> {
        let access_key_id =
            required_setting(AWS_IAM_PROVIDER_NAME, cs, ACCESS_KEY_ITEM, "AWS_ACCESS_KEY_ID", lookup)?;
        let secret_access_key =
            required_setting(AWS_IAM_PROVIDER_NAME, cs, SECRET_KEY_ITEM, "AWS_SECRET_ACCESS_KEY", lookup)?;
        let session_token = setting(cs, SESSION_TOKEN_ITEM, "AWS_SESSION_TOKEN", lookup);

        Ok(AwsIdentity::new(
            AWS_IAM_PROVIDER_NAME,
            access_key_id,
            secret_access_key,
            session_token,
        ))
    }
}

#[async_trait]
impl IdentityProvider for AwsIamIdentityProvider {
    fn name(&self) -> &str {
        AWS_IAM_PROVIDER_NAME
    }

    async fn authenticate(&self, config_set: &ConfigurationSet) -> Result<Identity> {
        let identity = Self::resolve(config_set, &env_lookup)?;
        info!(access_key_id = %identity.access_key_id, "AWS credentials loaded");
        Ok(Identity::AwsCredentials(identity))
    }
}
