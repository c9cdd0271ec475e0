//! List-then-describe discovery engine shared by every provider
//!
//! Per-cluster detail fetches run concurrently up to a worker limit. The
//! first failure wins: the remaining fetches are dropped and no partial
//! result is returned. The cancellation token is checked before every
//! collaborator call and raced against each call in flight.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Cluster, ClusterClient};
use crate::error::{DiscoveryError, Result};

/// Enumerate and describe every cluster `client` can see
pub async fn collect_clusters(
    provider: &str,
    client: &dyn ClusterClient,
    cancel: &CancellationToken,
    worker_limit: usize,
) -> Result<BTreeMap<String, Cluster>> {
    const LIST: &str = "listing clusters";

    if cancel.is_cancelled() {
        return Err(DiscoveryError::canceled(provider, LIST));
    }

    let identifiers = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DiscoveryError::canceled(provider, LIST)),
        listed = client.list_cluster_identifiers() => {
            listed.map_err(|e| DiscoveryError::collaborator(provider, LIST, e))?
        }
    };

    let mut clusters = BTreeMap::new();
    if identifiers.is_empty() {
        info!(provider = %provider, "No clusters discovered");
        return Ok(clusters);
    }

    debug!(provider = %provider, count = identifiers.len(), "Describing clusters");

    let mut details = stream::iter(identifiers)
        .map(|identifier| describe(provider, client, cancel, identifier))
        .buffer_unordered(worker_limit.max(1));

    while let Some(detail) = details.next().await {
        let cluster = detail?;
        clusters.insert(cluster.id.clone(), cluster);
    }

    info!(provider = %provider, count = clusters.len(), "Clusters discovered");
    Ok(clusters)
}

async fn describe(
    provider: &str,
    client: &dyn ClusterClient,
    cancel: &CancellationToken,
    identifier: String,
) -> Result<Cluster> {
    let operation = || format!("describing cluster {}", identifier);

    if cancel.is_cancelled() {
        return Err(DiscoveryError::canceled(provider, operation()));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::canceled(provider, operation())),
        described = client.describe_cluster(&identifier) => {
            described.map_err(|e| DiscoveryError::collaborator(provider, operation(), e))
        }
    }
}
