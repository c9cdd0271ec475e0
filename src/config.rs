//! Configuration Schema Negotiation
//!
//! Plugins declare the configuration items they need as a [`ConfigurationSet`].
//! The orchestrator merges the sets of every plugin taking part in a run,
//! applies user supplied values and hands the merged set to the provider,
//! which binds it into its own typed configuration with [`ConfigurationSet::bind`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{DiscoveryError, Result};

/// Value type of a configuration item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    String,
    Bool,
    Int,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::String => write!(f, "string"),
            ItemKind::Bool => write!(f, "bool"),
            ItemKind::Int => write!(f, "int"),
        }
    }
}

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Int(i64),
}

impl ConfigValue {
    pub fn kind(&self) -> ItemKind {
        match self {
            ConfigValue::String(_) => ItemKind::String,
            ConfigValue::Bool(_) => ItemKind::Bool,
            ConfigValue::Int(_) => ItemKind::Int,
        }
    }

    /// Parse a raw string (e.g. from `--set key=value`) as the given kind
    pub fn parse(kind: ItemKind, raw: &str) -> Option<Self> {
        match kind {
            ItemKind::String => Some(ConfigValue::String(raw.to_string())),
            ItemKind::Bool => raw.trim().parse().ok().map(ConfigValue::Bool),
            ItemKind::Int => raw.trim().parse().ok().map(ConfigValue::Int),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Int(i) => Value::from(*i),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "{:?}", s),
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// A single named configuration item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    pub name: String,
    pub kind: ItemKind,
    pub description: String,
    /// `None` marks the item as required
    pub default: Option<ConfigValue>,
    pub short: Option<char>,
    /// Plugin that declared the item; `None` for global items
    pub owner: Option<String>,
    pub sensitive: bool,
    /// Value supplied by the user for this run
    pub value: Option<ConfigValue>,
}

impl ConfigItem {
    pub fn new(
        name: impl Into<String>,
        kind: ItemKind,
        default: Option<ConfigValue>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            default,
            short: None,
            owner: None,
            sensitive: false,
            value: None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// The user value if set, otherwise the default
    pub fn effective(&self) -> Option<&ConfigValue> {
        self.value.as_ref().or(self.default.as_ref())
    }

    fn same_definition(&self, other: &ConfigItem) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.default == other.default
            && self.short == other.short
            && self.owner == other.owner
    }
}

/// Ordered set of configuration items with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationSet {
    items: Vec<ConfigItem>,
}

impl ConfigurationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an item. Fails if an item with the same name exists.
    pub fn add(&mut self, item: ConfigItem) -> Result<&mut ConfigItem> {
        if self.exists(&item.name) {
            return Err(DiscoveryError::ConfigConflict(format!(
                "item {} is already declared",
                item.name
            )));
        }
        self.items.push(item);
        let last = self.items.len() - 1;
        Ok(&mut self.items[last])
    }

    /// Declare an optional string item
    pub fn string(&mut self, name: &str, default: &str, description: &str) -> Result<&mut ConfigItem> {
        self.add(ConfigItem::new(
            name,
            ItemKind::String,
            Some(ConfigValue::String(default.to_string())),
            description,
        ))
    }

    /// Declare a string item with no default
    pub fn required_string(&mut self, name: &str, description: &str) -> Result<&mut ConfigItem> {
        self.add(ConfigItem::new(name, ItemKind::String, None, description))
    }

    pub fn bool(&mut self, name: &str, default: bool, description: &str) -> Result<&mut ConfigItem> {
        self.add(ConfigItem::new(
            name,
            ItemKind::Bool,
            Some(ConfigValue::Bool(default)),
            description,
        ))
    }

    pub fn int(&mut self, name: &str, default: i64, description: &str) -> Result<&mut ConfigItem> {
        self.add(ConfigItem::new(
            name,
            ItemKind::Int,
            Some(ConfigValue::Int(default)),
            description,
        ))
    }

    /// Assign a short alias. Uniqueness is checked when sets are merged.
    pub fn set_short(&mut self, name: &str, short: char) -> Result<()> {
        self.item_mut(name)?.short = Some(short);
        Ok(())
    }

    pub fn set_sensitive(&mut self, name: &str) -> Result<()> {
        self.item_mut(name)?.sensitive = true;
        Ok(())
    }

    /// Tag every item with the plugin that declared it
    pub fn with_owner(mut self, owner: &str) -> Self {
        for item in &mut self.items {
            item.owner = Some(owner.to_string());
        }
        self
    }

    /// Assign a user value, checking it against the item's kind
    pub fn set_value(&mut self, name: &str, value: ConfigValue) -> Result<()> {
        let item = self.item_mut(name)?;
        if value.kind() != item.kind {
            return Err(DiscoveryError::bind(
                name,
                format!("expected {} value, got {}", item.kind, value.kind()),
            ));
        }
        item.value = Some(value);
        Ok(())
    }

    /// Parse and assign a raw string value
    pub fn set_raw(&mut self, name: &str, raw: &str) -> Result<()> {
        let kind = self.item_mut(name)?.kind;
        let value = ConfigValue::parse(kind, raw)
            .ok_or_else(|| DiscoveryError::bind(name, format!("expected {} value, got {:?}", kind, raw)))?;
        self.set_value(name, value)
    }

    /// Merge another set into this one.
    ///
    /// Identical definitions are skipped. Same-named items with different
    /// definitions, and short aliases used twice, fail with
    /// [`DiscoveryError::ConfigConflict`] and leave `self` untouched.
    pub fn merge(&mut self, other: &ConfigurationSet) -> Result<()> {
        let mut merged = self.items.clone();

        for item in &other.items {
            match merged.iter().find(|existing| existing.name == item.name) {
                Some(existing) if existing.same_definition(item) => continue,
                Some(existing) => {
                    return Err(DiscoveryError::ConfigConflict(format!(
                        "item {} declared by {} and {}",
                        item.name,
                        owner_label(existing),
                        owner_label(item)
                    )));
                }
                None => merged.push(item.clone()),
            }
        }

        for (idx, item) in merged.iter().enumerate() {
            let Some(short) = item.short else { continue };
            if let Some(other) = merged[..idx].iter().find(|i| i.short == Some(short)) {
                return Err(DiscoveryError::ConfigConflict(format!(
                    "short alias -{} used by both {} and {}",
                    short, other.name, item.name
                )));
            }
        }

        self.items = merged;
        Ok(())
    }

    /// Bind the effective values into a typed configuration.
    ///
    /// Item names are used as field names, so typed configs rename their
    /// fields to the kebab-case item names. Unknown items are ignored.
    /// Fail with a bind error naming the first required item left unset
    pub fn validate(&self, target: &str) -> Result<()> {
        match self.items.iter().find(|item| item.effective().is_none()) {
            Some(item) => Err(DiscoveryError::bind(
                target,
                format!("required item {} is not set", item.name),
            )),
            None => Ok(()),
        }
    }

    pub fn bind<T: DeserializeOwned>(&self, target: &str) -> Result<T> {
        self.validate(target)?;

        let map: Map<String, Value> = self
            .items
            .iter()
            .filter_map(|item| item.effective().map(|value| (item.name.clone(), value.to_json())))
            .collect();

        serde_json::from_value(Value::Object(map))
            .map_err(|e| DiscoveryError::bind(target, e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ConfigItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Effective string value of an item, if it is a string
    pub fn value_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|i| i.effective()).and_then(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigItem> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render the items as flag-style help text
    pub fn usage(&self) -> String {
        let mut lines = Vec::with_capacity(self.items.len());

        for item in &self.items {
            let flag = match item.short {
                Some(short) => format!("-{}, --{}", short, item.name),
                None => format!("    --{}", item.name),
            };
            let default = match (&item.default, item.sensitive) {
                (None, _) => " (required)".to_string(),
                (Some(_), true) => String::new(),
                (Some(value), false) => format!(" (default {})", value),
            };
            lines.push(format!(
                "  {:<28} {:<7} {}{}",
                flag, item.kind, item.description, default
            ));
        }

        lines.join("\n")
    }

    fn item_mut(&mut self, name: &str) -> Result<&mut ConfigItem> {
        self.items
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| DiscoveryError::bind(name, "no such configuration item"))
    }
}

fn owner_label(item: &ConfigItem) -> &str {
    item.owner.as_deref().unwrap_or("global")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct SampleConfig {
        #[serde(rename = "resource-group")]
        resource_group: String,
        admin: bool,
        #[serde(rename = "max-results")]
        max_results: i64,
    }

    fn sample_set() -> ConfigurationSet {
        let mut cs = ConfigurationSet::new();
        cs.string("resource-group", "", "Resource group").unwrap();
        cs.bool("admin", false, "Admin credentials").unwrap();
        cs.int("max-results", 100, "Page size").unwrap();
        cs
    }

    #[test]
    fn test_duplicate_item_rejected() {
        let mut cs = sample_set();
        let err = cs.string("admin", "", "again").unwrap_err();
        assert!(matches!(err, DiscoveryError::ConfigConflict(_)));
        assert_eq!(cs.len(), 3);
    }

    #[test]
    fn test_bind_defaults_and_values() {
        let mut cs = sample_set();
        cs.set_raw("admin", "true").unwrap();
        cs.set_raw("resource-group", "rg-prod").unwrap();

        let cfg: SampleConfig = cs.bind("sample").unwrap();
        assert_eq!(cfg.resource_group, "rg-prod");
        assert!(cfg.admin);
        assert_eq!(cfg.max_results, 100);
    }

    #[test]
    fn test_bind_missing_required_item() {
        let mut cs = ConfigurationSet::new();
        cs.required_string("region", "AWS region").unwrap();

        let err = cs.bind::<serde_json::Value>("eks").unwrap_err();
        match err {
            DiscoveryError::ConfigBind { target, message } => {
                assert_eq!(target, "eks");
                assert!(message.contains("region"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_without_binding() {
        let mut cs = ConfigurationSet::new();
        cs.string("resource-group", "", "Resource group").unwrap();
        cs.required_string("region", "AWS region").unwrap();

        assert!(matches!(cs.validate("eks"), Err(DiscoveryError::ConfigBind { .. })));
        cs.set_raw("region", "us-east-1").unwrap();
        assert!(cs.validate("eks").is_ok());
    }

    #[test]
    fn test_bind_type_mismatch() {
        let mut cs = ConfigurationSet::new();
        cs.string("admin", "yes", "declared as a string").unwrap();
        cs.string("resource-group", "", "").unwrap();
        cs.int("max-results", 1, "").unwrap();

        let err = cs.bind::<SampleConfig>("sample").unwrap_err();
        assert!(matches!(err, DiscoveryError::ConfigBind { .. }));
    }

    #[test]
    fn test_set_raw_rejects_bad_kind() {
        let mut cs = sample_set();
        assert!(matches!(
            cs.set_raw("admin", "maybe"),
            Err(DiscoveryError::ConfigBind { .. })
        ));
        assert!(matches!(
            cs.set_value("max-results", ConfigValue::String("ten".into())),
            Err(DiscoveryError::ConfigBind { .. })
        ));
        assert!(cs.set_raw("unknown", "x").is_err());
    }

    #[test]
    fn test_alias_conflict_detected_at_merge() {
        let mut first = ConfigurationSet::new();
        first.string("resource-group", "", "").unwrap();
        first.set_short("resource-group", 'r').unwrap();
        let first = first.with_owner("aks");

        let mut second = ConfigurationSet::new();
        second.string("region", "", "").unwrap();
        // Declaring the alias alone is fine
        second.set_short("region", 'r').unwrap();
        let second = second.with_owner("other");

        let mut merged = first.clone();
        let err = merged.merge(&second).unwrap_err();
        assert!(matches!(err, DiscoveryError::ConfigConflict(_)));
        assert_eq!(merged, first);
    }

    #[test]
    fn test_merge_same_name_different_owner_conflicts() {
        let mut first = ConfigurationSet::new();
        first.string("region", "", "").unwrap();
        let mut second = first.clone().with_owner("eks");
        let mut first = first.with_owner("aks");

        assert!(first.merge(&second).is_err());
        // Identical definitions merge idempotently
        let copy = second.clone();
        second.merge(&copy).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut cs = sample_set().with_owner("aks");
        let mut global = ConfigurationSet::new();
        global.string("cluster-id", "", "").unwrap();
        cs.merge(&global).unwrap();

        assert_eq!(
            cs.names(),
            vec!["resource-group", "admin", "max-results", "cluster-id"]
        );
    }

    #[test]
    fn test_usage_hides_sensitive_defaults() {
        let mut cs = ConfigurationSet::new();
        cs.string("client-secret", "hunter2", "Client secret").unwrap();
        cs.set_sensitive("client-secret").unwrap();
        cs.string("resource-group", "", "Resource group").unwrap();
        cs.set_short("resource-group", 'r').unwrap();

        let usage = cs.usage();
        assert!(!usage.contains("hunter2"));
        assert!(usage.contains("-r, --resource-group"));
    }
}
