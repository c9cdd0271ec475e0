//! Plugin Registry
//!
//! Catalog of discovery and identity plugins keyed by name. Plugins register
//! once at process start, possibly from several initializers at the same
//! time; afterwards the catalog is only read. A duplicate name is reported
//! back to the registering code, which decides whether that is fatal.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

use crate::config::ConfigurationSet;
use crate::discovery::DiscoveryProvider;
use crate::error::{DiscoveryError, PluginKind, Result};
use crate::identity::IdentityProvider;

/// Collaborators handed to a plugin factory
#[derive(Debug, Clone)]
pub struct PluginCreationInput {
    pub http_client: Option<reqwest::Client>,
    /// Upper bound on concurrent per-cluster detail fetches
    pub worker_limit: usize,
}

impl Default for PluginCreationInput {
    fn default() -> Self {
        Self {
            http_client: None,
            worker_limit: 4,
        }
    }
}

pub type ConfigurationItemsFn = Arc<dyn Fn(&str) -> Result<ConfigurationSet> + Send + Sync>;
pub type DiscoveryCreateFn =
    Arc<dyn Fn(PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> + Send + Sync>;
pub type IdentityCreateFn =
    Arc<dyn Fn(PluginCreationInput) -> Result<Box<dyn IdentityProvider>> + Send + Sync>;

/// Metadata shared by every plugin kind
#[derive(Clone)]
pub struct PluginRegistration {
    pub name: String,
    pub usage_example: String,
    pub configuration_items: ConfigurationItemsFn,
}

impl PluginRegistration {
    pub fn new(
        name: impl Into<String>,
        usage_example: impl Into<String>,
        configuration_items: impl Fn(&str) -> Result<ConfigurationSet> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            usage_example: usage_example.into(),
            configuration_items: Arc::new(configuration_items),
        }
    }

    /// The plugin's configuration items, namespaced with its name
    pub fn configuration_items(&self, scope: &str) -> Result<ConfigurationSet> {
        Ok((self.configuration_items)(scope)?.with_owner(&self.name))
    }
}

impl std::fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DiscoveryPluginRegistration {
    pub plugin: PluginRegistration,
    pub create: DiscoveryCreateFn,
    pub supported_identity_providers: Vec<String>,
}

impl DiscoveryPluginRegistration {
    pub fn new(
        plugin: PluginRegistration,
        create: impl Fn(PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> + Send + Sync + 'static,
        supported_identity_providers: &[&str],
    ) -> Self {
        Self {
            plugin,
            create: Arc::new(create),
            supported_identity_providers: supported_identity_providers
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.plugin.name
    }

    pub fn supports(&self, identity_provider: &str) -> bool {
        self.supported_identity_providers
            .iter()
            .any(|p| p == identity_provider)
    }

    pub fn create(&self, input: PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> {
        (self.create)(input)
    }
}

impl std::fmt::Debug for DiscoveryPluginRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryPluginRegistration")
            .field("name", &self.plugin.name)
            .field("supported_identity_providers", &self.supported_identity_providers)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct IdentityPluginRegistration {
    pub plugin: PluginRegistration,
    pub create: IdentityCreateFn,
}

impl IdentityPluginRegistration {
    pub fn new(
        plugin: PluginRegistration,
        create: impl Fn(PluginCreationInput) -> Result<Box<dyn IdentityProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            plugin,
            create: Arc::new(create),
        }
    }

    pub fn name(&self) -> &str {
        &self.plugin.name
    }

    pub fn create(&self, input: PluginCreationInput) -> Result<Box<dyn IdentityProvider>> {
        (self.create)(input)
    }
}

impl std::fmt::Debug for IdentityPluginRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPluginRegistration")
            .field("name", &self.plugin.name)
            .finish_non_exhaustive()
    }
}

/// Name-keyed plugin catalog. Names are listed sorted.
#[derive(Default)]
pub struct Registry {
    discovery: RwLock<BTreeMap<String, Arc<DiscoveryPluginRegistration>>>,
    identity: RwLock<BTreeMap<String, Arc<IdentityPluginRegistration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_discovery(&self, registration: DiscoveryPluginRegistration) -> Result<()> {
        insert_unique(&self.discovery, PluginKind::Discovery, registration.name().to_string(), registration)
    }

    pub fn register_identity(&self, registration: IdentityPluginRegistration) -> Result<()> {
        insert_unique(&self.identity, PluginKind::Identity, registration.name().to_string(), registration)
    }

    pub fn discovery_plugin(&self, name: &str) -> Result<Arc<DiscoveryPluginRegistration>> {
        lookup(&self.discovery, PluginKind::Discovery, name)
    }

    pub fn identity_plugin(&self, name: &str) -> Result<Arc<IdentityPluginRegistration>> {
        lookup(&self.identity, PluginKind::Identity, name)
    }

    pub fn discovery_names(&self) -> Vec<String> {
        read(&self.discovery).keys().cloned().collect()
    }

    pub fn identity_names(&self) -> Vec<String> {
        read(&self.identity).keys().cloned().collect()
    }

    /// Drop every registration
    pub fn reset(&self) {
        self.discovery
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.identity
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn read<T>(
    map: &RwLock<BTreeMap<String, Arc<T>>>,
) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<T>>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn insert_unique<T>(
    map: &RwLock<BTreeMap<String, Arc<T>>>,
    kind: PluginKind,
    name: String,
    registration: T,
) -> Result<()> {
    let mut guard = map.write().unwrap_or_else(PoisonError::into_inner);
    if guard.contains_key(&name) {
        return Err(DiscoveryError::DuplicateName { kind, name });
    }
    debug!(kind = %kind, name = %name, "Registered plugin");
    guard.insert(name, Arc::new(registration));
    Ok(())
}

fn lookup<T>(map: &RwLock<BTreeMap<String, Arc<T>>>, kind: PluginKind, name: &str) -> Result<Arc<T>> {
    read(map)
        .get(name)
        .cloned()
        .ok_or_else(|| DiscoveryError::NotFound {
            kind,
            name: name.to_string(),
        })
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

/// Register a discovery plugin with the process-wide registry
pub fn register_discovery_plugin(
    name: &str,
    usage_example: &str,
    configuration_items: impl Fn(&str) -> Result<ConfigurationSet> + Send + Sync + 'static,
    create: impl Fn(PluginCreationInput) -> Result<Box<dyn DiscoveryProvider>> + Send + Sync + 'static,
    supported_identity_providers: &[&str],
) -> Result<()> {
    global().register_discovery(DiscoveryPluginRegistration::new(
        PluginRegistration::new(name, usage_example, configuration_items),
        create,
        supported_identity_providers,
    ))
}
