//! License proxy server entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licenseproxy_server::api::{build_router, AppState};
use licenseproxy_server::handler::RequestHandler;
use licenseproxy_server::options::Options;
use licenseproxy_server::status::StatusApi;
use licenseproxy_server::syncer::LicenseSyncer;
use lproxy_client::UpstreamClient;
use lproxy_cluster::{ClusterApi, KubeClusterApi, KubeConfig};
use lproxy_license::IssuerKey;
use lproxy_registry::{load_dir, LicenseRegistry, RecordBook, MIN_REMAINING_LIFE};
use lproxy_watch::Controller;

const SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("license proxy server v{}", env!("CARGO_PKG_VERSION"));

    let opts = Options::parse();
    if let Err(e) = run(opts).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

async fn run(opts: Options) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    opts.validate()?;

    let ca = std::fs::read(&opts.ca_file)?;
    let issuer = IssuerKey::from_pem(&ca)?;

    let spoke_api: Arc<dyn ClusterApi> = Arc::new(
        KubeClusterApi::new(KubeConfig::in_cluster()?)?.with_rate_limit(opts.qps, opts.burst),
    );
    let cluster_uid = spoke_api.cluster_uid().await?;
    tracing::info!(cluster = %cluster_uid, spoke = opts.spoke_mode(), "resolved cluster identity");

    if let Some(dir) = &opts.cache_dir {
        std::fs::create_dir_all(dir)?;
    }
    let record_book = Arc::new(RecordBook::new());
    let registry = Arc::new(LicenseRegistry::new(
        opts.cache_dir.clone(),
        MIN_REMAINING_LIFE,
        Some(Arc::clone(&record_book)),
    ));

    if let Some(dir) = &opts.license_dir {
        load_dir(&cluster_uid, &issuer, dir, &registry)?;
    }
    if let Some(dir) = &opts.cache_dir {
        load_dir(&cluster_uid, &issuer, dir, &registry)?;
    }
    tracing::info!(licenses = registry.list().len(), "registry loaded");

    let mut upstream = None;
    let mut claims: Option<Arc<dyn ClusterApi>> = None;

    if let (Some(hub_kubeconfig), Some(cluster_name)) =
        (&opts.hub_kubeconfig, opts.cluster_name.clone())
    {
        let hub_api: Arc<dyn ClusterApi> = Arc::new(
            KubeClusterApi::new(KubeConfig::from_kubeconfig(hub_kubeconfig)?)
                .map_err(|e| format!("unable to build hub rest config: {e}"))?
                .with_rate_limit(opts.qps, opts.burst),
        );

        let syncer = LicenseSyncer {
            hub: Arc::clone(&hub_api),
            spoke: Arc::clone(&spoke_api),
            hub_namespace: cluster_name.clone(),
            local_namespace: lproxy_common::namespace(),
            cluster_uid: cluster_uid.clone(),
            issuer: issuer.clone(),
            registry: Arc::clone(&registry),
        };
        let (controller, handle) = Controller::new("license-syncer");
        tokio::spawn(controller.run(Arc::new(syncer)));
        // Poll-driven event source for the hub secret.
        let key = format!("{cluster_name}/{}", lproxy_common::LICENSE_SECRET);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SYNC_INTERVAL);
            loop {
                tick.tick().await;
                handle.enqueue(&key);
            }
        });

        claims = Some(Arc::clone(&spoke_api));
    } else if let (Some(base_url), Some(token)) = (&opts.base_url, &opts.token) {
        upstream = Some(UpstreamClient::new(
            base_url,
            token,
            &cluster_uid,
            Some(&ca),
            opts.insecure_skip_tls_verify,
            &format!("license-proxyserver/{}", env!("CARGO_PKG_VERSION")),
        )?);
    }

    let handler = Arc::new(RequestHandler::new(
        cluster_uid,
        issuer,
        Arc::clone(&registry),
        Arc::clone(&record_book),
        upstream,
        claims,
    ));
    let status = Arc::new(StatusApi::new(registry, record_book));
    let router = build_router(AppState { handler, status });

    let listener = tokio::net::TcpListener::bind(&opts.listen).await?;
    tracing::info!(addr = %opts.listen, "serving license proxy api");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}
