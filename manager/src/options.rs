//! Process flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "licenseproxy-manager",
    about = "Hub-side license acquisition manager"
)]
pub struct Options {
    /// License server base url
    #[arg(long = "base-url")]
    pub base_url: String,

    /// License server token
    #[arg(long)]
    pub token: String,

    /// Path to the trusted license issuer key
    #[arg(long = "ca-file")]
    pub ca_file: PathBuf,

    /// Skip TLS verification towards the license server
    #[arg(long = "insecure-skip-tls-verify", default_value_t = false)]
    pub insecure_skip_tls_verify: bool,

    /// Root of the per-cluster license cache
    #[arg(long = "cache-dir", default_value = "/var/cache/license-proxyserver")]
    pub cache_dir: PathBuf,

    /// Hub kubeconfig; defaults to the in-cluster configuration
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Maximum QPS against the hub API server
    #[arg(long, default_value_t = 100.0)]
    pub qps: f64,

    /// Maximum burst against the hub API server
    #[arg(long, default_value_t = 100)]
    pub burst: u32,
}
