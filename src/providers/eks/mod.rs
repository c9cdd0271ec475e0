//! Amazon Elastic Kubernetes Service discovery

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::authorizer::{Authorizer, AwsSigningScope, ProviderCapabilities};
use crate::config::ConfigurationSet;
use crate::discovery::{
    collect_clusters, ClientFactory, ClusterClient, DiscoverInput, DiscoverOutput, DiscoveryProvider,
    PreReq, Session,
};
use crate::error::{DiscoveryError, Result};
use crate::identity::Identity;
use crate::registry::PluginCreationInput;

mod client;

pub use client::EksRestClient;

pub const PROVIDER_NAME: &str = "eks";
pub const SUPPORTED_IDENTITY_PROVIDERS: &[&str] = &["aws-iam"];
pub const USAGE_EXAMPLE: &str = r#"  # Discover EKS clusters using static AWS credentials
  export AWS_ACCESS_KEY_ID="AKIDEXAMPLE"
  export AWS_SECRET_ACCESS_KEY="secret"
  cluster-discovery eks --idp-protocol aws-iam --set region=eu-west-1
"#;

pub const REGION_ITEM: &str = "region";
pub const MAX_RESULTS_ITEM: &str = "max-results";

const SIGNING_SERVICE: &str = "eks";

pub fn configuration_items(_scope: &str) -> Result<ConfigurationSet> {
    let mut cs = ConfigurationSet::new();
    cs.required_string(REGION_ITEM, "The AWS region to discover clusters in")?;
    cs.int(MAX_RESULTS_ITEM, 100, "Page size for cluster listing")?;
    Ok(cs)
}

pub fn capabilities(region: &str) -> ProviderCapabilities {
    ProviderCapabilities::new(PROVIDER_NAME, SUPPORTED_IDENTITY_PROVIDERS)
        .with_aws_signing(AwsSigningScope::new(region, SIGNING_SERVICE))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EksConfig {
    pub region: String,
    #[serde(rename = "max-results", default = "default_max_results")]
    pub max_results: i64,
}

fn default_max_results() -> i64 {
    100
}

pub struct EksClusterProvider {
    client_factory: ClientFactory<EksConfig>,
    worker_limit: usize,
    session: Option<Session<EksConfig>>,
}

impl EksClusterProvider {
    pub fn create(input: PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> {
        let http_client = input
            .http_client
            .ok_or(DiscoveryError::MissingCollaborator {
                provider: PROVIDER_NAME.to_string(),
                collaborator: "HTTP client",
            })?;

        let factory: ClientFactory<EksConfig> = Arc::new(
            move |config: &EksConfig, authorizer: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                let client: Arc<dyn ClusterClient> =
                    Arc::new(EksRestClient::new(http_client.clone(), authorizer, config));
                Ok(client)
            },
        );

        Ok(Box::new(Self::with_client_factory(factory, input.worker_limit)))
    }

    pub fn with_client_factory(client_factory: ClientFactory<EksConfig>, worker_limit: usize) -> Self {
        Self {
            client_factory,
            worker_limit,
            session: None,
        }
    }

    fn establish(config_set: &ConfigurationSet, identity: &Identity) -> Result<Session<EksConfig>> {
        Session::establish(PROVIDER_NAME, config_set, identity, |config: &EksConfig| {
            capabilities(&config.region)
        })
    }
}

#[async_trait]
impl DiscoveryProvider for EksClusterProvider {
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

        info!(region = %session.config.region, "Discovering EKS clusters");

        let client = (self.client_factory)(&session.config, Arc::clone(&session.authorizer))?;
        let clusters = collect_clusters(PROVIDER_NAME, client.as_ref(), cancel, self.worker_limit).await?;

        let mut output = DiscoverOutput::new(PROVIDER_NAME, session.identity_provider());
        output.clusters = clusters;
        Ok(output)
    }

    fn list_prereqs(&self) -> Vec<PreReq> {
        vec![PreReq::binary(
            "aws-iam-authenticator",
            "aws-iam-authenticator",
            "aws-iam-authenticator must be installed and on PATH to use the generated kubeconfig. \
             See https://docs.aws.amazon.com/eks/latest/userguide/install-aws-iam-authenticator.html",
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Cluster, PreReqKind};
    use crate::identity::{AwsIdentity, OidcIdentity};

    struct NoClusters;

    #[async_trait]
    impl ClusterClient for NoClusters {
        async fn list_cluster_identifiers(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn describe_cluster(&self, identifier: &str) -> anyhow::Result<Cluster> {
            anyhow::bail!("unexpected describe of {}", identifier)
        }
    }

    fn provider() -> EksClusterProvider {
        let factory: ClientFactory<EksConfig> = Arc::new(
            |_: &EksConfig, authorizer: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                assert_eq!(authorizer.scheme(), "aws-sigv4");
                Ok(Arc::new(NoClusters))
            },
        );
        EksClusterProvider::with_client_factory(factory, 4)
    }

    fn aws_identity() -> Identity {
        Identity::AwsCredentials(AwsIdentity::new("aws-iam", "AKID", "secret", None))
    }

    #[test]
    fn test_region_is_required() {
        let mut provider = provider();
        let cs = configuration_items("").unwrap();

        let err = provider.setup(&cs, &aws_identity()).unwrap_err();
        match err {
            DiscoveryError::ConfigBind { target, message } => {
                assert_eq!(target, "eks");
                assert!(message.contains("region"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_oidc_identity_unsupported() {
        let mut provider = provider();
        let mut cs = configuration_items("").unwrap();
        cs.set_raw("region", "us-east-1").unwrap();
        let identity = Identity::Oidc(OidcIdentity::new("aad", "token", None));

        assert!(matches!(
            provider.setup(&cs, &identity),
            Err(DiscoveryError::UnsupportedIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_clusters() {
        let mut provider = provider();
        let mut cs = configuration_items("").unwrap();
        cs.set_raw("region", "us-east-1").unwrap();

        provider.setup(&cs, &aws_identity()).unwrap();
        let input = DiscoverInput {
            config_set: cs,
            identity: aws_identity(),
        };
        let output = provider.discover(&CancellationToken::new(), &input).await.unwrap();

        assert_eq!(output.identity_provider, "aws-iam");
        assert!(output.clusters.is_empty());
    }

    #[test]
    fn test_declares_authenticator_prereq() {
        let prereqs = provider().list_prereqs();

        assert_eq!(prereqs.len(), 1);
        assert_eq!(
            prereqs[0].kind,
            PreReqKind::Binary {
                executable: "aws-iam-authenticator".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_discover_rebinds_from_input_after_setup() {
        let seen_region = Arc::new(std::sync::Mutex::new(None));
        let recorder = seen_region.clone();
        let factory: ClientFactory<EksConfig> = Arc::new(
            move |config: &EksConfig, _: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                *recorder.lock().unwrap() = Some(config.region.clone());
                Ok(Arc::new(NoClusters))
            },
        );
        let mut provider = EksClusterProvider::with_client_factory(factory, 4);

        let mut first = configuration_items("").unwrap();
        first.set_raw("region", "us-east-1").unwrap();
        provider.setup(&first, &aws_identity()).unwrap();

        let mut second = configuration_items("").unwrap();
        second.set_raw("region", "eu-west-1").unwrap();
        let input = DiscoverInput {
            config_set: second,
            identity: Identity::AwsCredentials(AwsIdentity::new("aws-iam", "AKID2", "secret2", None)),
        };
        provider.discover(&CancellationToken::new(), &input).await.unwrap();

        assert_eq!(seen_region.lock().unwrap().as_deref(), Some("eu-west-1"));
    }
}
