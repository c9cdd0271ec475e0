//! Discovery errors
//!
//! Every failure the plugin layer can report. Collaborator failures keep
//! their cause as the error source so callers can print the whole chain.

use thiserror::Error;

/// Kind of plugin a registry entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Discovery,
    Identity,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Discovery => write!(f, "discovery"),
            PluginKind::Identity => write!(f, "identity"),
        }
    }
}

/// Errors raised while registering, configuring, authorizing or running
/// discovery plugins
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A plugin with the same name is already registered
    #[error("{kind} plugin {name} is already registered")]
    DuplicateName { kind: PluginKind, name: String },

    /// No plugin registered under the requested name
    #[error("no {kind} plugin registered with name {name}")]
    NotFound { kind: PluginKind, name: String },

    /// Configuration could not be bound or assigned
    #[error("binding configuration for {target}: {message}")]
    ConfigBind { target: String, message: String },

    /// Two configuration sets disagree on an item or alias
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// The identity cannot be turned into an authorizer for this provider
    #[error(
        "identity provider {identity_provider} is not supported by discovery provider {discovery_provider}"
    )]
    UnsupportedIdentity {
        identity_provider: String,
        discovery_provider: String,
    },

    /// A required collaborator (HTTP client, cloud client) was not supplied
    #[error("{provider}: {collaborator} is required")]
    MissingCollaborator {
        provider: String,
        collaborator: &'static str,
    },

    /// A collaborator call failed
    #[error("{provider}: {operation}")]
    Collaborator {
        provider: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// The discovery run was canceled or timed out
    #[error("{provider}: discovery canceled during {operation}")]
    Canceled { provider: String, operation: String },

    /// The identity's credential material is no longer valid
    #[error("identity from {identity_provider} has expired")]
    ExpiredIdentity { identity_provider: String },

    /// An environment prerequisite is missing
    #[error("prerequisite {name} not satisfied: {help}")]
    PreReqNotMet { name: String, help: String },
}

impl DiscoveryError {
    pub fn collaborator(
        provider: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        DiscoveryError::Collaborator {
            provider: provider.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn canceled(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        DiscoveryError::Canceled {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    pub fn bind(target: impl Into<String>, message: impl Into<String>) -> Self {
        DiscoveryError::ConfigBind {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, DiscoveryError::Canceled { .. })
    }
}

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;
