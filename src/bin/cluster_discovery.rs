//! Cluster Discovery - Standalone Binary
//!
//! Discovers Kubernetes clusters with a registered discovery provider and
//! prints the normalized listing as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lornu_cluster_discovery::orchestrator::{DiscoveryRequest, Orchestrator, OrchestratorOptions};
use lornu_cluster_discovery::providers;
use lornu_cluster_discovery::registry::{self, Registry};

/// Discover Kubernetes clusters across cloud providers
#[derive(Parser, Debug)]
#[command(name = "cluster-discovery", version, about)]
struct Args {
    /// Discovery provider to use (e.g. aks, eks)
    #[arg(env = "CLUSTER_DISCOVERY_PROVIDER", required_unless_present = "list")]
    provider: Option<String>,

    /// Identity provider to authenticate with (e.g. az-env, aws-iam)
    #[arg(long = "idp-protocol", env = "CLUSTER_DISCOVERY_IDP", required_unless_present = "list")]
    idp_protocol: Option<String>,

    /// Configuration values as key=value, repeatable
    #[arg(long = "set", value_parser = parse_key_value)]
    values: Vec<(String, String)>,

    /// Maximum concurrent cluster detail fetches
    #[arg(long, default_value = "4", env = "CLUSTER_DISCOVERY_WORKERS")]
    workers: usize,

    /// Discovery timeout in seconds (0 disables the timeout)
    #[arg(long, default_value = "120", env = "CLUSTER_DISCOVERY_TIMEOUT_SECS")]
    timeout: u64,

    /// Skip local prerequisite checks
    #[arg(long, default_value = "false")]
    skip_prereqs: bool,

    /// List registered plugins and their configuration items, then exit
    #[arg(long, default_value = "false")]
    list: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();

    let registry = registry::global();
    providers::register_builtin(registry).context("Failed to register built-in plugins")?;

    if args.list {
        print_plugins(registry);
        return Ok(());
    }

    let (Some(provider), Some(idp)) = (args.provider.as_deref(), args.idp_protocol.as_deref()) else {
        anyhow::bail!("provider and --idp-protocol are required");
    };

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let options = OrchestratorOptions {
        worker_limit: args.workers.max(1),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        check_prereqs: !args.skip_prereqs,
    };

    info!(
        provider = %provider,
        idp = %idp,
        workers = options.worker_limit,
        "Starting cluster discovery"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling discovery");
            on_signal.cancel();
        }
    });

    let request = DiscoveryRequest {
        discovery_provider: provider.to_string(),
        identity_provider: idp.to_string(),
        values: args.values.clone(),
    };

    let orchestrator = Orchestrator::new(registry, Some(http_client), options);
    let outcome = orchestrator.run(&request, &cancel).await;
    let run_id = outcome.run.id();

    match outcome.into_result() {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).context("Failed to serialize clusters")?;
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            let e = anyhow::Error::from(e);
            error!(run_id = %run_id, error = %format!("{:#}", e), "Cluster discovery failed");
            Err(e)
        }
    }
}

fn print_plugins(registry: &Registry) {
    println!("Discovery providers:");
    for name in registry.discovery_names() {
        let Ok(plugin) = registry.discovery_plugin(&name) else {
            continue;
        };
        println!(
            "\n{} (identity providers: {})",
            name,
            plugin.supported_identity_providers.join(", ")
        );
        match plugin.plugin.configuration_items("") {
            Ok(items) => println!("{}", items.usage()),
            Err(e) => println!("  <invalid configuration items: {}>", e),
        }
        println!("\n{}", plugin.plugin.usage_example);
    }

    println!("Identity providers:");
    for name in registry.identity_names() {
        let Ok(plugin) = registry.identity_plugin(&name) else {
            continue;
        };
        println!("\n{}", name);
        if let Ok(items) = plugin.plugin.configuration_items("") {
            println!("{}", items.usage());
        }
    }
}
