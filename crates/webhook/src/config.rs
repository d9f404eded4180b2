//! Webhook configuration
//!
//! Values come from the environment first; command-line flags override them.

use anyhow::{bail, Result};
use config::{Config, ConfigError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;
use webhook_lib::{NamespaceFilter, OvercommitRatios};

use crate::Args;

/// Webhook configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    /// CPU overcommit ratio, `CPU_OVERCOMMIT_RATIO`
    pub cpu_ratio: f64,

    /// Memory overcommit ratio, `MEMORY_OVERCOMMIT_RATIO`
    pub memory_ratio: f64,

    /// Namespaces to mutate; empty means all
    pub target_namespaces: Vec<String>,

    /// Namespace the webhook service runs in, from the downward API
    pub namespace: String,

    pub port: u16,

    pub cert_dir: PathBuf,

    /// Name of the Service fronting the webhook
    pub service_name: String,

    pub generate_certs: bool,

    pub register: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            cpu_ratio: 1.5,
            memory_ratio: 1.5,
            target_namespaces: Vec::new(),
            namespace: "default".to_string(),
            port: 8443,
            cert_dir: PathBuf::from("/etc/webhook/certs"),
            service_name: "pod-manager".to_string(),
            generate_certs: true,
            register: true,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        Self::from_environment(None)
    }

    /// Load configuration from `vars`, or from the process environment when
    /// `vars` is `None`. A missing or unparseable variable falls back to the
    /// default for that setting only.
    pub fn from_environment(vars: Option<HashMap<String, String>>) -> Self {
        let environment = config::Environment::default()
            .source(vars)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("target_namespaces");

        let defaults = WebhookConfig::default();
        let config = match Config::builder().add_source(environment).build() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Failed to read environment, using default configuration");
                return defaults;
            }
        };

        let target_namespaces = setting(&config, "target_namespaces", defaults.target_namespaces);

        WebhookConfig {
            cpu_ratio: setting(&config, "cpu_overcommit_ratio", defaults.cpu_ratio),
            memory_ratio: setting(&config, "memory_overcommit_ratio", defaults.memory_ratio),
            target_namespaces: normalize_namespaces(target_namespaces),
            namespace: setting(&config, "pod_namespace", defaults.namespace),
            port: setting(&config, "webhook_port", defaults.port),
            cert_dir: setting(&config, "webhook_cert_dir", defaults.cert_dir),
            service_name: setting(&config, "webhook_service_name", defaults.service_name),
            generate_certs: setting(&config, "webhook_generate_certs", defaults.generate_certs),
            register: setting(&config, "webhook_register", defaults.register),
        }
    }

    /// Apply command-line overrides
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(ratio) = args.cpu_ratio {
            self.cpu_ratio = ratio;
        }
        if let Some(ratio) = args.mem_ratio {
            self.memory_ratio = ratio;
        }
        if let Some(namespaces) = &args.target_namespaces {
            self.target_namespaces = normalize_namespaces(namespaces.clone());
        }
        if let Some(namespace) = &args.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(cert_dir) = &args.cert_dir {
            self.cert_dir = cert_dir.clone();
        }
        if let Some(service_name) = &args.service_name {
            self.service_name = service_name.clone();
        }
        if args.no_generate_certs {
            self.generate_certs = false;
        }
        if args.skip_registration {
            self.register = false;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpu_ratio.is_nan() {
            bail!("CPU overcommit ratio is not a number");
        }
        if self.memory_ratio.is_nan() {
            bail!("memory overcommit ratio is not a number");
        }
        if self.service_name.is_empty() {
            bail!("webhook service name must not be empty");
        }
        Ok(())
    }

    pub fn ratios(&self) -> OvercommitRatios {
        OvercommitRatios::new(self.cpu_ratio, self.memory_ratio)
    }

    pub fn namespace_filter(&self) -> NamespaceFilter {
        NamespaceFilter::new(self.target_namespaces.clone())
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("tls.crt")
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("tls.key")
    }
}

/// Read one setting, keeping `default` when it is unset or invalid
fn setting<T: DeserializeOwned>(config: &Config, key: &str, default: T) -> T {
    match config.get::<T>(key) {
        Ok(value) => value,
        Err(ConfigError::NotFound(_)) => default,
        Err(e) => {
            warn!(key, error = %e, "Invalid webhook setting in environment, using default");
            default
        }
    }
}

fn normalize_namespaces(namespaces: Vec<String>) -> Vec<String> {
    namespaces
        .into_iter()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .collect()
}
