//! License proxy manager entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licenseproxy_manager::acquirer::LicenseAcquirer;
use licenseproxy_manager::options::Options;
use lproxy_cluster::{ClusterApi, KubeClusterApi, KubeConfig};
use lproxy_license::IssuerKey;
use lproxy_watch::Controller;

const WATCH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("license proxy manager v{}", env!("CARGO_PKG_VERSION"));

    let opts = Options::parse();
    if let Err(e) = run(opts).await {
        tracing::error!(error = %e, "manager failed");
        std::process::exit(1);
    }
}

async fn run(opts: Options) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ca = std::fs::read(&opts.ca_file)?;
    let issuer = IssuerKey::from_pem(&ca)?;

    let config = match &opts.kubeconfig {
        Some(path) => KubeConfig::from_kubeconfig(path)?,
        None => KubeConfig::in_cluster()?,
    };
    let hub: Arc<dyn ClusterApi> =
        Arc::new(KubeClusterApi::new(config)?.with_rate_limit(opts.qps, opts.burst));

    std::fs::create_dir_all(&opts.cache_dir)?;
    let acquirer = LicenseAcquirer::new(
        Arc::clone(&hub),
        opts.base_url.clone(),
        opts.token.clone(),
        Some(ca),
        opts.insecure_skip_tls_verify,
        issuer,
        opts.cache_dir.clone(),
    );

    let (controller, handle) = Controller::new("license-acquirer");
    let worker = tokio::spawn(controller.run(Arc::new(acquirer)));

    // Poll-driven event source over managed clusters.
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(WATCH_INTERVAL);
        loop {
            tick.tick().await;
            match hub.list_managed_clusters().await {
                Ok(clusters) => {
                    for cluster in clusters {
                        handle.enqueue(&cluster.name);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "listing managed clusters failed"),
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
        _ = worker => Err("reconcile worker exited unexpectedly".into()),
    }
}
