//! Discovery Orchestrator
//!
//! Drives one discovery run end to end:
//!
//! 1. Look up the discovery and identity plugins and reject unsupported pairs
//! 2. Merge provider, identity and global configuration items, apply user
//!    values and check that every required item is set
//! 3. Check prerequisites and authenticate
//! 4. `setup` the provider, then `discover` under a cancellation token
//! 5. Apply the `cluster-id` filter to the normalized output
//!
//! Every run carries a [`DiscoveryRun`] whose state transitions are logged.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ConfigurationSet;
use crate::discovery::{DiscoverInput, DiscoverOutput};
use crate::error::{DiscoveryError, Result};
use crate::registry::{PluginCreationInput, Registry};

pub const CLUSTER_ID_ITEM: &str = "cluster-id";

/// Items every run carries regardless of provider
pub fn global_configuration_items() -> Result<ConfigurationSet> {
    let mut cs = ConfigurationSet::new();
    cs.string(CLUSTER_ID_ITEM, "", "Id of a single cluster to return")?;
    cs.set_short(CLUSTER_ID_ITEM, 'c')?;
    Ok(cs)
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Upper bound on concurrent cluster detail fetches
    pub worker_limit: usize,
    /// Cancel discovery after this long
    pub timeout: Option<Duration>,
    pub check_prereqs: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            timeout: Some(Duration::from_secs(120)),
            check_prereqs: true,
        }
    }
}

/// Lifecycle of a discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Created,
    Configured,
    Authorized,
    Discovering,
    Completed,
    Failed,
}

impl std::fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryState::Created => write!(f, "created"),
            DiscoveryState::Configured => write!(f, "configured"),
            DiscoveryState::Authorized => write!(f, "authorized"),
            DiscoveryState::Discovering => write!(f, "discovering"),
            DiscoveryState::Completed => write!(f, "completed"),
            DiscoveryState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    id: Uuid,
    state: DiscoveryState,
    failed_from: Option<DiscoveryState>,
}

impl DiscoveryRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: DiscoveryState::Created,
            failed_from: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// State the run was in when it failed
    pub fn failed_from(&self) -> Option<DiscoveryState> {
        self.failed_from
    }

    fn transition(&mut self, to: DiscoveryState) {
        info!(run_id = %self.id, from = %self.state, to = %to, "Discovery state transition");
        self.state = to;
    }

    fn fail(&mut self, err: &DiscoveryError) {
        error!(run_id = %self.id, from = %self.state, error = %err, "Discovery run failed");
        self.failed_from = Some(self.state);
        self.state = DiscoveryState::Failed;
    }
}

impl Default for DiscoveryRun {
    fn default() -> Self {
        Self::new()
    }
}

/// What to discover, and with which identity
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    pub discovery_provider: String,
    pub identity_provider: String,
    /// Raw `key=value` assignments for configuration items
    pub values: Vec<(String, String)>,
}

impl DiscoveryRequest {
    pub fn new(discovery_provider: &str, identity_provider: &str) -> Self {
        Self {
            discovery_provider: discovery_provider.to_string(),
            identity_provider: identity_provider.to_string(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.values.push((name.to_string(), value.to_string()));
        self
    }
}

/// Result of [`Orchestrator::run`] together with the run's final state
#[derive(Debug)]
pub struct RunOutcome {
    pub run: DiscoveryRun,
    pub result: Result<DiscoverOutput>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<DiscoverOutput> {
        self.result
    }
}

pub struct Orchestrator<'a> {
    registry: &'a Registry,
    http_client: Option<reqwest::Client>,
    options: OrchestratorOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a Registry, http_client: Option<reqwest::Client>, options: OrchestratorOptions) -> Self {
        Self {
            registry,
            http_client,
            options,
        }
    }

    fn creation_input(&self) -> PluginCreationInput {
        PluginCreationInput {
            http_client: self.http_client.clone(),
            worker_limit: self.options.worker_limit,
        }
    }

    /// Merged configuration items for a provider/identity pairing.
    ///
    /// Fails with [`DiscoveryError::UnsupportedIdentity`] before anything
    /// else if the discovery provider does not list the identity provider.
    pub fn configuration_for(&self, discovery_provider: &str, identity_provider: &str) -> Result<ConfigurationSet> {
        let discovery = self.registry.discovery_plugin(discovery_provider)?;
        if !discovery.supports(identity_provider) {
            return Err(DiscoveryError::UnsupportedIdentity {
                identity_provider: identity_provider.to_string(),
                discovery_provider: discovery_provider.to_string(),
            });
        }
        let identity = self.registry.identity_plugin(identity_provider)?;

        let mut cs = discovery.plugin.configuration_items(identity_provider)?;
        cs.merge(&identity.plugin.configuration_items(discovery_provider)?)?;
        cs.merge(&global_configuration_items()?)?;
        Ok(cs)
    }

    /// Run discovery. The run's state is returned even when discovery fails.
    pub async fn run(&self, request: &DiscoveryRequest, cancel: &CancellationToken) -> RunOutcome {
        let mut run = DiscoveryRun::new();
        let span = info_span!(
            "discovery_run",
            run_id = %run.id(),
            provider = %request.discovery_provider,
            idp = %request.identity_provider
        );

        let result = self.execute(&mut run, request, cancel).instrument(span).await;
        if let Err(err) = &result {
            run.fail(err);
        }

        RunOutcome { run, result }
    }

    async fn execute(
        &self,
        run: &mut DiscoveryRun,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<DiscoverOutput> {
        let mut config_set = self.configuration_for(&request.discovery_provider, &request.identity_provider)?;
        for (name, value) in &request.values {
            config_set.set_raw(name, value)?;
        }
        config_set.validate(&request.discovery_provider)?;

        let mut provider = self
            .registry
            .discovery_plugin(&request.discovery_provider)?
            .create(self.creation_input())?;

        if self.options.check_prereqs {
            provider.check_prereqs()?;
        }

        let identity_provider = self
            .registry
            .identity_plugin(&request.identity_provider)?
            .create(self.creation_input())?;

        let identity = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DiscoveryError::canceled(identity_provider.name(), "authenticating"));
            }
            identity = identity_provider.authenticate(&config_set) => identity?,
        };
        info!(
            identity_provider = %identity.identity_provider(),
            identity_kind = identity.kind(),
            "Authenticated"
        );

        if let Err(err) = provider.setup(&config_set, &identity) {
            if !matches!(err, DiscoveryError::ConfigBind { .. }) {
                run.transition(DiscoveryState::Configured);
            }
            return Err(err);
        }
        run.transition(DiscoveryState::Configured);
        run.transition(DiscoveryState::Authorized);

        let input = DiscoverInput {
            config_set,
            identity,
        };

        run.transition(DiscoveryState::Discovering);
        let child = cancel.child_token();
        let timer = self.options.timeout.map(|timeout| {
            let token = child.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs_f64(), "Discovery timed out, canceling");
                token.cancel();
            })
        });

        let discovered = provider.discover(&child, &input).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        let mut output = discovered?;

        if let Some(cluster_id) = input.config_set.value_str(CLUSTER_ID_ITEM).filter(|id| !id.is_empty()) {
            output.clusters.retain(|id, _| id == cluster_id);
            if output.clusters.is_empty() {
                warn!(cluster_id = %cluster_id, "Requested cluster was not discovered");
            }
        }

        run.transition(DiscoveryState::Completed);
        info!(count = output.clusters.len(), "Discovery complete");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Cluster, ClientFactory, ClusterClient};
    use crate::identity::{AwsIdentity, Identity, IdentityProvider, OidcIdentity};
    use crate::providers::aks::{self, AksClusterProvider, AksConfig};
    use crate::providers::eks::{self, EksClusterProvider, EksConfig};
    use crate::registry::{DiscoveryPluginRegistration, IdentityPluginRegistration, PluginRegistration};
    use crate::authorizer::Authorizer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Identity provider that hands back a fixed identity
    struct FixedIdentity {
        name: String,
        identity: Identity,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IdentityProvider for FixedIdentity {
        fn name(&self) -> &str {
            &self.name
        }

        async fn authenticate(&self, _config_set: &ConfigurationSet) -> Result<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.identity.clone())
        }
    }

    struct FakeClusters {
        ids: Vec<&'static str>,
        list_delay: Option<Duration>,
    }

    #[async_trait]
    impl ClusterClient for FakeClusters {
        async fn list_cluster_identifiers(&self) -> anyhow::Result<Vec<String>> {
            if let Some(delay) = self.list_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.ids.iter().map(|s| s.to_string()).collect())
        }

        async fn describe_cluster(&self, identifier: &str) -> anyhow::Result<Cluster> {
            Ok(Cluster {
                id: identifier.to_string(),
                name: identifier.rsplit('/').next().unwrap_or(identifier).to_string(),
                control_plane_endpoint: None,
                certificate_authority_data: None,
            })
        }
    }

    fn register_identity(registry: &Registry, name: &str, identity: Identity) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let idp = name.to_string();
        registry
            .register_identity(IdentityPluginRegistration::new(
                PluginRegistration::new(name, "", |_: &str| Ok(ConfigurationSet::new())),
                move |_: PluginCreationInput| -> Result<Box<dyn IdentityProvider>> {
                    Ok(Box::new(FixedIdentity {
                        name: idp.clone(),
                        identity: identity.clone(),
                        calls: counter.clone(),
                    }))
                },
            ))
            .unwrap();
        calls
    }

    fn register_aks(registry: &Registry, ids: Vec<&'static str>, list_delay: Option<Duration>) {
        let client: Arc<dyn ClusterClient> = Arc::new(FakeClusters { ids, list_delay });
        registry
            .register_discovery(DiscoveryPluginRegistration::new(
                PluginRegistration::new(aks::PROVIDER_NAME, aks::USAGE_EXAMPLE, aks::configuration_items),
                move |input: PluginCreationInput| -> Result<Box<dyn crate::discovery::DiscoveryProvider>> {
                    let client = client.clone();
                    let factory: ClientFactory<AksConfig> = Arc::new(
                        move |_: &AksConfig, _: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                            Ok(client.clone())
                        },
                    );
                    Ok(Box::new(AksClusterProvider::with_client_factory(factory, input.worker_limit)))
                },
                aks::SUPPORTED_IDENTITY_PROVIDERS,
            ))
            .unwrap();
    }

    fn register_eks(registry: &Registry) {
        registry
            .register_discovery(DiscoveryPluginRegistration::new(
                PluginRegistration::new(eks::PROVIDER_NAME, eks::USAGE_EXAMPLE, eks::configuration_items),
                |input: PluginCreationInput| -> Result<Box<dyn crate::discovery::DiscoveryProvider>> {
                    let factory: ClientFactory<EksConfig> = Arc::new(
                        |_: &EksConfig, _: Arc<dyn Authorizer>| -> Result<Arc<dyn ClusterClient>> {
                            Ok(Arc::new(FakeClusters {
                                ids: vec!["arn:aws:eks:us-east-1:1:cluster/a"],
                                list_delay: None,
                            }))
                        },
                    );
                    Ok(Box::new(EksClusterProvider::with_client_factory(factory, input.worker_limit)))
                },
                eks::SUPPORTED_IDENTITY_PROVIDERS,
            ))
            .unwrap();
    }

    fn oidc() -> Identity {
        Identity::Oidc(OidcIdentity::new("aad", "token", None))
    }

    fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            check_prereqs: false,
            ..Default::default()
        }
    }

    const PROD: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/prod";
    const DEV: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/dev";

    #[tokio::test]
    async fn test_run_completes() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD, DEV], None);
        register_identity(&registry, "aad", oidc());

        let orchestrator = Orchestrator::new(&registry, None, options());
        let outcome = orchestrator
            .run(&DiscoveryRequest::new("aks", "aad"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.run.state(), DiscoveryState::Completed);
        let output = outcome.into_result().unwrap();
        assert_eq!(output.discovery_provider, "aks");
        assert_eq!(output.identity_provider, "aad");
        assert_eq!(output.clusters.len(), 2);
        assert_eq!(output.clusters[PROD].name, "prod");
    }

    #[tokio::test]
    async fn test_cluster_id_filter() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD, DEV], None);
        register_identity(&registry, "aad", oidc());

        let orchestrator = Orchestrator::new(&registry, None, options());
        let request = DiscoveryRequest::new("aks", "aad").with_value("cluster-id", DEV);
        let output = orchestrator
            .run(&request, &CancellationToken::new())
            .await
            .into_result()
            .unwrap();

        assert_eq!(output.clusters.keys().collect::<Vec<_>>(), vec![DEV]);
    }

    #[tokio::test]
    async fn test_unsupported_pair_rejected_before_authentication() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD], None);
        let calls = register_identity(
            &registry,
            "aws-iam",
            Identity::AwsCredentials(AwsIdentity::new("aws-iam", "AKID", "secret", None)),
        );

        let orchestrator = Orchestrator::new(&registry, None, options());
        let outcome = orchestrator
            .run(&DiscoveryRequest::new("aks", "aws-iam"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.run.state(), DiscoveryState::Failed);
        assert_eq!(outcome.run.failed_from(), Some(DiscoveryState::Created));
        assert!(matches!(outcome.result, Err(DiscoveryError::UnsupportedIdentity { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_fails_from_configured() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD], None);
        // Listed as supported, but AKS cannot sign with AWS keys
        register_identity(
            &registry,
            "aad",
            Identity::AwsCredentials(AwsIdentity::new("aad", "AKID", "secret", None)),
        );

        let orchestrator = Orchestrator::new(&registry, None, options());
        let outcome = orchestrator
            .run(&DiscoveryRequest::new("aks", "aad"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.run.failed_from(), Some(DiscoveryState::Configured));
        assert!(matches!(outcome.result, Err(DiscoveryError::UnsupportedIdentity { .. })));
    }

    #[tokio::test]
    async fn test_bind_failure_fails_from_created() {
        let registry = Registry::new();
        register_eks(&registry);
        let authentications = register_identity(
            &registry,
            "aws-iam",
            Identity::AwsCredentials(AwsIdentity::new("aws-iam", "AKID", "secret", None)),
        );

        let orchestrator = Orchestrator::new(&registry, None, options());
        let outcome = orchestrator
            .run(&DiscoveryRequest::new("eks", "aws-iam"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.run.failed_from(), Some(DiscoveryState::Created));
        assert!(matches!(outcome.result, Err(DiscoveryError::ConfigBind { .. })));
        assert_eq!(authentications.load(Ordering::SeqCst), 0);

        let output = orchestrator
            .run(
                &DiscoveryRequest::new("eks", "aws-iam").with_value("region", "us-east-1"),
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();
        assert_eq!(output.clusters.len(), 1);
        assert_eq!(authentications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_value_rejected() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD], None);
        register_identity(&registry, "aad", oidc());

        let orchestrator = Orchestrator::new(&registry, None, options());
        let request = DiscoveryRequest::new("aks", "aad").with_value("admin", "maybe");
        let result = orchestrator.run(&request, &CancellationToken::new()).await.result;

        assert!(matches!(result, Err(DiscoveryError::ConfigBind { .. })));
    }

    #[tokio::test]
    async fn test_timeout_cancels_discovery() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD], Some(Duration::from_secs(30)));
        register_identity(&registry, "aad", oidc());

        let orchestrator = Orchestrator::new(
            &registry,
            None,
            OrchestratorOptions {
                timeout: Some(Duration::from_millis(50)),
                ..options()
            },
        );
        let outcome = orchestrator
            .run(&DiscoveryRequest::new("aks", "aad"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.run.failed_from(), Some(DiscoveryState::Discovering));
        assert!(outcome.result.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_canceled_before_authentication() {
        let registry = Registry::new();
        register_aks(&registry, vec![PROD], None);
        let calls = register_identity(&registry, "aad", oidc());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let orchestrator = Orchestrator::new(&registry, None, options());
        let result = orchestrator.run(&DiscoveryRequest::new("aks", "aad"), &cancel).await.result;

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configuration_for_merges_all_sources() {
        let registry = Registry::new();
        crate::providers::register_builtin(&registry).unwrap();
        let orchestrator = Orchestrator::new(&registry, None, options());

        let cs = orchestrator.configuration_for("eks", "aws-iam").unwrap();
        assert_eq!(
            cs.names(),
            vec!["region", "max-results", "access-key", "secret-key", "session-token", "cluster-id"]
        );
        assert_eq!(cs.get("region").unwrap().owner.as_deref(), Some("eks"));
        assert_eq!(cs.get("access-key").unwrap().owner.as_deref(), Some("aws-iam"));
        assert_eq!(cs.get("cluster-id").unwrap().owner, None);

        assert!(matches!(
            orchestrator.configuration_for("gke", "aws-iam"),
            Err(DiscoveryError::NotFound { .. })
        ));
    }
}
