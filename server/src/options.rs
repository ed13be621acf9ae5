//! Process flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "licenseproxy-server", about = "Cluster-local license proxy server")]
pub struct Options {
    /// License server base url
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// License server token
    #[arg(long)]
    pub token: Option<String>,

    /// Path to the trusted license issuer key
    #[arg(long = "ca-file")]
    pub ca_file: PathBuf,

    /// Skip TLS verification towards the license server
    #[arg(long = "insecure-skip-tls-verify", default_value_t = false)]
    pub insecure_skip_tls_verify: bool,

    /// Path to a directory of seed licenses loaded at boot
    #[arg(long = "license-dir")]
    pub license_dir: Option<PathBuf>,

    /// Path to the license cache directory
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Path to the hub kubeconfig; presence switches the server into
    /// spoke mode
    #[arg(long = "hub-kubeconfig")]
    pub hub_kubeconfig: Option<PathBuf>,

    /// This cluster's name as registered on the hub
    #[arg(long = "cluster-name")]
    pub cluster_name: Option<String>,

    /// Maximum QPS against the API servers
    #[arg(long, default_value_t = 100.0)]
    pub qps: f64,

    /// Maximum burst against the API servers
    #[arg(long, default_value_t = 100)]
    pub burst: u32,

    /// Listen address for the API surface
    #[arg(long, default_value = "0.0.0.0:8443")]
    pub listen: String,
}

impl Options {
    pub fn spoke_mode(&self) -> bool {
        self.hub_kubeconfig.is_some()
    }

    /// Spoke mode needs the hub connection, the cluster's registered
    /// name and a seed license directory.
    pub fn validate(&self) -> Result<(), String> {
        if self.spoke_mode() {
            if self.cluster_name.as_deref().unwrap_or("").is_empty() {
                return Err("missing --cluster-name".to_string());
            }
            if self.license_dir.is_none() {
                return Err("missing --license-dir".to_string());
            }
        } else if self.base_url.is_some() && self.token.as_deref().unwrap_or("").is_empty() {
            return Err("missing --token".to_string());
        }
        Ok(())
    }
}
