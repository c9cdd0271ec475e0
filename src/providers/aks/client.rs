//! Azure Resource Manager client for managed clusters

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::AksConfig;
use crate::authorizer::Authorizer;
use crate::discovery::{Cluster, ClusterClient};
use crate::providers::execute_json;

const ARM_BASE: &str = "https://management.azure.com";
const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";
const MANAGED_CLUSTERS_API_VERSION: &str = "2023-08-01";

pub struct AksRestClient {
    http_client: reqwest::Client,
    authorizer: Arc<dyn Authorizer>,
    config: AksConfig,
    base_url: String,
}

impl AksRestClient {
    pub fn new(http_client: reqwest::Client, authorizer: Arc<dyn Authorizer>, config: AksConfig) -> Self {
        Self {
            http_client,
            authorizer,
            config,
            base_url: ARM_BASE.to_string(),
        }
    }

    async fn get(&self, url: &str) -> Result<Value> {
        let request = self.http_client.get(url).build()?;
        execute_json(&self.http_client, self.authorizer.as_ref(), request).await
    }

    async fn subscription_id(&self) -> Result<String> {
        if !self.config.subscription_id.is_empty() {
            return Ok(self.config.subscription_id.clone());
        }

        let mut url = Some(format!(
            "{}/subscriptions?api-version={}",
            self.base_url, SUBSCRIPTIONS_API_VERSION
        ));
        let mut subscriptions = Vec::new();
        while let Some(next) = url {
            let page = self.get(&next).await.context("Failed to list subscriptions")?;
            subscriptions.extend(parse_subscriptions(&page));
            url = next_link(&page);
        }

        select_subscription(&subscriptions, &self.config.subscription_name)
    }

    fn clusters_url(&self, subscription_id: &str) -> String {
        let scope = if self.config.resource_group.is_empty() {
            format!("/subscriptions/{}", subscription_id)
        } else {
            format!(
                "/subscriptions/{}/resourceGroups/{}",
                subscription_id,
                urlencoding::encode(&self.config.resource_group)
            )
        };
        format!(
            "{}{}/providers/Microsoft.ContainerService/managedClusters?api-version={}",
            self.base_url, scope, MANAGED_CLUSTERS_API_VERSION
        )
    }
}

#[async_trait]
impl ClusterClient for AksRestClient {
    async fn list_cluster_identifiers(&self) -> Result<Vec<String>> {
        let subscription_id = self.subscription_id().await?;
        debug!(subscription_id = %subscription_id, "Listing AKS clusters");

        let mut url = Some(self.clusters_url(&subscription_id));
        let mut ids = Vec::new();
        while let Some(next) = url {
            let page = self.get(&next).await?;
            ids.extend(
                parse_clusters(&page)
                    .into_iter()
                    .filter(|(_, name)| {
                        self.config.cluster_name.is_empty() || *name == self.config.cluster_name
                    })
                    .map(|(id, _)| id),
            );
            url = next_link(&page);
        }

        Ok(ids)
    }

    async fn describe_cluster(&self, identifier: &str) -> Result<Cluster> {
        let resource_url = format!(
            "{}{}?api-version={}",
            self.base_url, identifier, MANAGED_CLUSTERS_API_VERSION
        );
        let resource = self.get(&resource_url).await?;
        let mut cluster = cluster_from_resource(&resource)?;

        let action = if self.config.admin {
            "listClusterAdminCredential"
        } else {
            "listClusterUserCredential"
        };
        let credentials_url = format!(
            "{}{}/{}?api-version={}",
            self.base_url, identifier, action, MANAGED_CLUSTERS_API_VERSION
        );
        let request = self.http_client.post(&credentials_url).build()?;
        let credentials = execute_json(&self.http_client, self.authorizer.as_ref(), request)
            .await
            .with_context(|| format!("Failed to get credentials for {}", cluster.name))?;

        cluster.certificate_authority_data = credential_ca_data(&credentials)?;
        Ok(cluster)
    }
}

fn next_link(page: &Value) -> Option<String> {
    page["nextLink"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `(subscriptionId, displayName)` pairs from a subscriptions page
fn parse_subscriptions(page: &Value) -> Vec<(String, String)> {
    page["value"]
        .as_array()
        .map(|subs| {
            subs.iter()
                .filter_map(|s| {
                    let id = s["subscriptionId"].as_str()?;
                    let name = s["displayName"].as_str().unwrap_or_default();
                    Some((id.to_string(), name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pick a subscription by display name, or the only one when no name is given
fn select_subscription(subscriptions: &[(String, String)], name: &str) -> Result<String> {
    if !name.is_empty() {
        return subscriptions
            .iter()
            .find(|(_, display)| display == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| anyhow::anyhow!("No subscription named {}", name));
    }

    match subscriptions {
        [(id, _)] => Ok(id.clone()),
        [] => anyhow::bail!("No subscriptions visible to this identity"),
        _ => anyhow::bail!(
            "{} subscriptions found, set subscription-id or subscription-name",
            subscriptions.len()
        ),
    }
}

/// `(resourceId, name)` pairs from a managed clusters page
fn parse_clusters(page: &Value) -> Vec<(String, String)> {
    page["value"]
        .as_array()
        .map(|clusters| {
            clusters
                .iter()
                .filter_map(|c| Some((c["id"].as_str()?.to_string(), c["name"].as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn cluster_from_resource(resource: &Value) -> Result<Cluster> {
    let id = resource["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Managed cluster has no id"))?;
    let name = resource["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Managed cluster {} has no name", id))?;

    let properties = &resource["properties"];
    let fqdn = properties["fqdn"]
        .as_str()
        .or_else(|| properties["privateFQDN"].as_str());

    Ok(Cluster {
        id: id.to_string(),
        name: name.to_string(),
        control_plane_endpoint: fqdn.map(|f| format!("https://{}:443", f)),
        certificate_authority_data: None,
    })
}

/// CA bundle from the first kubeconfig in a credential results response
fn credential_ca_data(credentials: &Value) -> Result<Option<Vec<u8>>> {
    let Some(encoded) = credentials["kubeconfigs"][0]["value"].as_str() else {
        return Ok(None);
    };
    let kubeconfig = STANDARD
        .decode(encoded)
        .context("Kubeconfig is not valid base64")?;
    let kubeconfig = String::from_utf8_lossy(&kubeconfig);

    kubeconfig
        .lines()
        .find_map(|line| line.trim().strip_prefix("certificate-authority-data:"))
        .map(|data| {
            STANDARD
                .decode(data.trim())
                .context("certificate-authority-data is not valid base64")
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subs() -> Vec<(String, String)> {
        vec![
            ("sub-1".to_string(), "Production".to_string()),
            ("sub-2".to_string(), "Development".to_string()),
        ]
    }

    #[test]
    fn test_select_subscription_by_name() {
        assert_eq!(select_subscription(&subs(), "Development").unwrap(), "sub-2");
        assert!(select_subscription(&subs(), "Staging").is_err());
    }

    #[test]
    fn test_select_subscription_requires_choice() {
        assert!(select_subscription(&subs(), "").is_err());
        assert!(select_subscription(&[], "").is_err());

        let single = vec![("only".to_string(), "Only".to_string())];
        assert_eq!(select_subscription(&single, "").unwrap(), "only");
    }

    #[test]
    fn test_parse_cluster_page() {
        let page = json!({
            "value": [
                {"id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/prod", "name": "prod"},
                {"name": "missing-id"}
            ],
            "nextLink": "https://management.azure.com/next"
        });

        let clusters = parse_clusters(&page);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].1, "prod");
        assert_eq!(next_link(&page).as_deref(), Some("https://management.azure.com/next"));
        assert_eq!(next_link(&json!({"value": []})), None);
    }

    #[test]
    fn test_cluster_from_resource() {
        let resource = json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/dev",
            "name": "dev",
            "properties": {"fqdn": "dev-abc.hcp.westeurope.azmk8s.io"}
        });

        let cluster = cluster_from_resource(&resource).unwrap();
        assert_eq!(cluster.name, "dev");
        assert_eq!(
            cluster.control_plane_endpoint.as_deref(),
            Some("https://dev-abc.hcp.westeurope.azmk8s.io:443")
        );
    }

    #[test]
    fn test_ca_data_from_kubeconfig() {
        let kubeconfig = "apiVersion: v1\nclusters:\n- cluster:\n    certificate-authority-data: Q0VSVA==\n    server: https://dev:443\n";
        let credentials = json!({"kubeconfigs": [{"name": "clusterUser", "value": STANDARD.encode(kubeconfig)}]});

        assert_eq!(credential_ca_data(&credentials).unwrap(), Some(b"CERT".to_vec()));
        assert_eq!(credential_ca_data(&json!({"kubeconfigs": []})).unwrap(), None);
    }
}
