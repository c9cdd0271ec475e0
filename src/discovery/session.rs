//! Per-run discovery session: a provider's bound config and resolved authorizer

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use crate::authorizer::{resolve_authorizer, Authorizer, ProviderCapabilities};
use crate::config::ConfigurationSet;
use crate::error::Result;
use crate::identity::Identity;

/// Bound configuration and resolved authorizer for one discovery run
pub struct Session<C> {
    pub config: C,
    pub authorizer: Arc<dyn Authorizer>,
    identity_provider: String,
}

impl<C: DeserializeOwned> Session<C> {
    /// Bind the configuration, then dispatch the identity. The capabilities
    /// may depend on the bound config (e.g. the signing region).
    pub fn establish(
        provider: &str,
        config_set: &ConfigurationSet,
        identity: &Identity,
        capabilities: impl FnOnce(&C) -> ProviderCapabilities,
    ) -> Result<Self> {
        let config: C = config_set.bind(provider)?;
        let authorizer = resolve_authorizer(identity, &capabilities(&config))?;

        debug!(
            provider = %provider,
            identity_provider = %identity.identity_provider(),
            identity_kind = identity.kind(),
            scheme = authorizer.scheme(),
            "Discovery session established"
        );

        Ok(Self {
            config,
            authorizer,
            identity_provider: identity.identity_provider().to_string(),
        })
    }
}

impl<C> Session<C> {
    pub fn identity_provider(&self) -> &str {
        &self.identity_provider
    }
}
