//! EKS control plane REST client, signed with SigV4

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::EksConfig;
use crate::authorizer::Authorizer;
use crate::discovery::{Cluster, ClusterClient};
use crate::providers::execute_json;

/// The EKS API caps `maxResults` at 100
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListClustersPage {
    #[serde(default)]
    clusters: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeClusterResponse {
    cluster: EksCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EksCluster {
    arn: String,
    name: String,
    endpoint: Option<String>,
    certificate_authority: Option<CertificateAuthority>,
}

#[derive(Debug, Deserialize)]
struct CertificateAuthority {
    data: Option<String>,
}

pub struct EksRestClient {
    http_client: reqwest::Client,
    authorizer: Arc<dyn Authorizer>,
    base_url: String,
    page_size: i64,
}

impl EksRestClient {
    pub fn new(http_client: reqwest::Client, authorizer: Arc<dyn Authorizer>, config: &EksConfig) -> Self {
        Self {
            http_client,
            authorizer,
            base_url: format!("https://eks.{}.amazonaws.com", config.region),
            page_size: config.max_results.clamp(1, MAX_PAGE_SIZE),
        }
    }

    async fn get(&self, url: &str) -> Result<Value> {
        let request = self.http_client.get(url).build()?;
        execute_json(&self.http_client, self.authorizer.as_ref(), request).await
    }

    fn list_url(&self, next_token: Option<&str>) -> String {
        let mut url = format!("{}/clusters?maxResults={}", self.base_url, self.page_size);
        if let Some(token) = next_token {
            url.push_str("&nextToken=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

#[async_trait]
impl ClusterClient for EksRestClient {
    async fn list_cluster_identifiers(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let body = self.get(&self.list_url(next_token.as_deref())).await?;
            let page: ListClustersPage =
                serde_json::from_value(body).context("Failed to parse ListClusters response")?;
            debug!(count = page.clusters.len(), "Listed EKS cluster page");

            names.extend(page.clusters);
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(names)
    }

    async fn describe_cluster(&self, identifier: &str) -> Result<Cluster> {
        let url = format!("{}/clusters/{}", self.base_url, urlencoding::encode(identifier));
        let body = self.get(&url).await?;
        cluster_from_response(body)
    }
}

fn cluster_from_response(body: Value) -> Result<Cluster> {
    let response: DescribeClusterResponse =
        serde_json::from_value(body).context("Failed to parse DescribeCluster response")?;
    let cluster = response.cluster;

    let certificate_authority_data = cluster
        .certificate_authority
        .and_then(|ca| ca.data)
        .map(|data| STANDARD.decode(data))
        .transpose()
        .with_context(|| format!("Cluster {} has invalid certificate authority data", cluster.name))?;

    Ok(Cluster {
        id: cluster.arn,
        name: cluster.name,
        control_plane_endpoint: cluster.endpoint,
        certificate_authority_data,
    })
}
