//! Identity Resolution & Authorizer Dispatch
//!
//! [`resolve_authorizer`] turns the identity a user brought into the
//! authorizer a discovery provider signs its control API requests with.
//! It is a pure mapping and runs before any network call, so unsupported
//! identity/provider pairings are rejected up front.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;

use crate::error::{DiscoveryError, Result};
use crate::identity::{Identity, TokenSource};

mod sigv4;

pub use sigv4::{AwsSigningScope, SigV4Authorizer};

/// Signs outbound requests to a cloud control API
pub trait Authorizer: Send + Sync {
    /// Short name of the signing scheme, e.g. `bearer`
    fn scheme(&self) -> &'static str;

    fn sign(&self, request: &mut reqwest::Request) -> Result<()>;
}

/// Adds an `Authorization: Bearer` header from a token source
pub struct BearerAuthorizer {
    source: Arc<dyn TokenSource>,
}

impl BearerAuthorizer {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

impl Authorizer for BearerAuthorizer {
    fn scheme(&self) -> &'static str {
        "bearer"
    }

    fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        let token = self.source.token()?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            DiscoveryError::collaborator("bearer authorizer", "building authorization header", e)
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// What a discovery provider can accept as credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub provider: String,
    pub supported_identity_providers: Vec<String>,
    /// The control API accepts OAuth bearer tokens
    pub accepts_bearer: bool,
    /// The control API accepts SigV4 signed requests for this scope
    pub aws_signing: Option<AwsSigningScope>,
}

impl ProviderCapabilities {
    pub fn new(provider: &str, supported_identity_providers: &[&str]) -> Self {
        Self {
            provider: provider.to_string(),
            supported_identity_providers: supported_identity_providers
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accepts_bearer: false,
            aws_signing: None,
        }
    }

    pub fn with_bearer(mut self) -> Self {
        self.accepts_bearer = true;
        self
    }

    pub fn with_aws_signing(mut self, scope: AwsSigningScope) -> Self {
        self.aws_signing = Some(scope);
        self
    }

    pub fn supports(&self, identity_provider: &str) -> bool {
        self.supported_identity_providers
            .iter()
            .any(|p| p == identity_provider)
    }

    fn unsupported(&self, identity: &Identity) -> DiscoveryError {
        DiscoveryError::UnsupportedIdentity {
            identity_provider: identity.identity_provider().to_string(),
            discovery_provider: self.provider.clone(),
        }
    }
}

/// Map an identity to the authorizer `capabilities` needs.
#[deny(clippy::wildcard_enum_match_arm)]
pub fn resolve_authorizer(
    identity: &Identity,
    capabilities: &ProviderCapabilities,
) -> Result<Arc<dyn Authorizer>> {
    if !capabilities.supports(identity.identity_provider()) {
        return Err(capabilities.unsupported(identity));
    }

    match identity {
        Identity::Oidc(id) if capabilities.accepts_bearer => {
            Ok(Arc::new(BearerAuthorizer::new(Arc::new(id.clone()))))
        }
        Identity::Oidc(_) => Err(capabilities.unsupported(identity)),
        Identity::Authorizer(id) => Ok(id.authorizer()),
        Identity::AwsCredentials(creds) => match &capabilities.aws_signing {
            Some(scope) => Ok(Arc::new(SigV4Authorizer::new(creds.clone(), scope.clone()))),
            None => Err(capabilities.unsupported(identity)),
        },
    }
}
