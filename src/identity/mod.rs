//! Identities
//!
//! Identity providers hand back one [`Identity`] value per run. The set of
//! variants is closed: every dispatch site matches on it exhaustively, so a
//! new variant has to be handled everywhere before the crate compiles.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::authorizer::Authorizer;
use crate::config::ConfigurationSet;
use crate::error::{DiscoveryError, Result};

pub mod env;

pub use env::{AwsIamIdentityProvider, AzureEnvIdentityProvider};

/// Something that can hand out a bearer token, refreshing it if it knows how
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String>;
}

/// A token obtained once, valid until `expires_at`
pub struct StaticToken {
    identity_provider: String,
    token: String,
    expires_at: Option<Instant>,
}

impl StaticToken {
    pub fn new(
        identity_provider: impl Into<String>,
        token: impl Into<String>,
        expires_at: Option<Instant>,
    ) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|at| {
            at.checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String> {
        if self.is_expired() {
            return Err(DiscoveryError::ExpiredIdentity {
                identity_provider: self.identity_provider.clone(),
            });
        }
        Ok(self.token.clone())
    }
}

/// Bearer token identity from an OIDC flow (e.g. Azure AD)
#[derive(Clone)]
pub struct OidcIdentity {
    identity_provider: String,
    source: Arc<dyn TokenSource>,
}

impl OidcIdentity {
    pub fn new(
        identity_provider: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: Option<Instant>,
    ) -> Self {
        let identity_provider = identity_provider.into();
        let source = StaticToken::new(identity_provider.clone(), access_token, expires_at);
        Self {
            identity_provider,
            source: Arc::new(source),
        }
    }

    /// Identity whose token retrieval and refresh is owned by `source`
    pub fn from_source(identity_provider: impl Into<String>, source: Arc<dyn TokenSource>) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            source,
        }
    }

    pub fn identity_provider(&self) -> &str {
        &self.identity_provider
    }
}

impl TokenSource for OidcIdentity {
    fn token(&self) -> Result<String> {
        self.source.token()
    }
}

impl std::fmt::Debug for OidcIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcIdentity")
            .field("identity_provider", &self.identity_provider)
            .finish_non_exhaustive()
    }
}

/// Identity that already carries a ready-made authorizer
#[derive(Clone)]
pub struct AuthorizerIdentity {
    identity_provider: String,
    authorizer: Arc<dyn Authorizer>,
}

impl AuthorizerIdentity {
    pub fn new(identity_provider: impl Into<String>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            authorizer,
        }
    }

    pub fn identity_provider(&self) -> &str {
        &self.identity_provider
    }

    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::clone(&self.authorizer)
    }
}

impl std::fmt::Debug for AuthorizerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizerIdentity")
            .field("identity_provider", &self.identity_provider)
            .field("scheme", &self.authorizer.scheme())
            .finish()
    }
}

/// AWS access keys, optionally with a session token
#[derive(Clone)]
pub struct AwsIdentity {
    identity_provider: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsIdentity {
    pub fn new(
        identity_provider: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    pub fn identity_provider(&self) -> &str {
        &self.identity_provider
    }
}

impl std::fmt::Debug for AwsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIdentity")
            .field("identity_provider", &self.identity_provider)
            .field("access_key_id", &self.access_key_id)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Credential material handed back by an identity provider
#[derive(Debug, Clone)]
pub enum Identity {
    Oidc(OidcIdentity),
    Authorizer(AuthorizerIdentity),
    AwsCredentials(AwsIdentity),
}

impl Identity {
    /// Name of the identity provider that produced this identity
    pub fn identity_provider(&self) -> &str {
        match self {
            Identity::Oidc(id) => id.identity_provider(),
            Identity::Authorizer(id) => id.identity_provider(),
            Identity::AwsCredentials(id) => id.identity_provider(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Identity::Oidc(_) => "oidc",
            Identity::Authorizer(_) => "authorizer",
            Identity::AwsCredentials(_) => "aws-credentials",
        }
    }
}

/// Identity provider plugin: runs a credential flow and returns an identity
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(&self, config_set: &ConfigurationSet) -> Result<Identity>;
}
