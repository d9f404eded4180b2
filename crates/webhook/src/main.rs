//! Pod overcommit webhook
//!
//! Runs as a Deployment in the cluster, registers itself as a mutating
//! admission webhook and scales down the CPU and memory requests of new pods.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webhook_lib::{
    health::{components, HealthRegistry},
    observability::{StructuredLogger, WebhookMetrics},
    server::AppState,
    AdmissionHandler,
};

mod api;
mod cert;
mod config;
mod register;

const WEBHOOK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mutating admission webhook that overcommits pod resource requests
#[derive(Debug, Parser)]
#[command(name = "pod-overcommit-webhook")]
#[command(author, version, long_about = None)]
#[command(about = "Overcommit pod resource requests at admission")]
pub struct Args {
    /// CPU overcommit ratio (overrides CPU_OVERCOMMIT_RATIO)
    #[arg(long)]
    pub cpu_ratio: Option<f64>,

    /// Memory overcommit ratio (overrides MEMORY_OVERCOMMIT_RATIO)
    #[arg(long)]
    pub mem_ratio: Option<f64>,

    /// Comma-separated namespaces to mutate; all when empty
    #[arg(long, value_delimiter = ',')]
    pub target_namespaces: Option<Vec<String>>,

    /// Namespace the webhook service runs in
    #[arg(long)]
    pub namespace: Option<String>,

    /// HTTPS listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding tls.crt and tls.key
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Name of the Service fronting the webhook
    #[arg(long)]
    pub service_name: Option<String>,

    /// Use existing certificates instead of generating them
    #[arg(long)]
    pub no_generate_certs: bool,

    /// Do not create the MutatingWebhookConfiguration
    #[arg(long)]
    pub skip_registration: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pod-overcommit-webhook");

    let args = Args::parse();
    let config = config::WebhookConfig::load().apply_args(&args);
    config.validate()?;
    info!(
        namespace = %config.namespace,
        service = %config.service_name,
        port = config.port,
        "Webhook configured"
    );

    let health_registry = HealthRegistry::new();

    let ratios = config.ratios();
    let metrics = WebhookMetrics::new();
    metrics.set_ratios(&ratios);

    let logger = StructuredLogger::new(&config.service_name);
    logger.log_startup(WEBHOOK_VERSION, &ratios, &config.target_namespaces);

    // Without TLS material nothing can be served
    let cert_pem = match prepare_certificate(&config) {
        Ok(pem) => pem,
        Err(e) => {
            error!(error = %e, "Serving certificate unavailable");
            return Err(e);
        }
    };
    health_registry.register(components::CERTIFICATES).await;

    if config.register {
        let result =
            register::register(&config.service_name, &config.namespace, cert_pem.as_bytes()).await;
        match result {
            Ok(()) => {
                logger.log_registration(register::CONFIGURATION_NAME, Ok(()));
                health_registry.register(components::REGISTRATION).await;
            }
            Err(e) => {
                let reason = format!("{e:#}");
                logger.log_registration(register::CONFIGURATION_NAME, Err(&reason));
                health_registry
                    .set_degraded(components::REGISTRATION, reason)
                    .await;
            }
        }
    } else {
        info!("Webhook registration disabled");
    }

    health_registry.register(components::ADMISSION).await;

    let handler =
        AdmissionHandler::new(ratios, config.namespace_filter()).with_logger(logger.clone());
    let app_state = Arc::new(AppState::new(handler, health_registry));

    let port = config.port;
    let cert_path = config.cert_path();
    let key_path = config.key_path();
    let server =
        tokio::spawn(async move { api::serve(port, &cert_path, &key_path, app_state).await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        finished = server => {
            let reason = match finished {
                Ok(Ok(())) => "server stopped".to_string(),
                Ok(Err(e)) => format!("server error: {e:#}"),
                Err(e) => format!("server task failed: {e}"),
            };
            logger.log_shutdown(&reason);
            anyhow::bail!(reason);
        }
    }

    info!("Shutting down");
    Ok(())
}

/// Generate and write the serving certificate, or read an existing one.
/// Returns the certificate PEM used as the webhook CA bundle.
fn prepare_certificate(config: &config::WebhookConfig) -> Result<String> {
    if !config.generate_certs {
        return cert::read_cert(&config.cert_dir);
    }

    let certificate = cert::generate(&config.service_name, &config.namespace)?;
    cert::write(&config.cert_dir, &certificate)?;
    Ok(certificate.cert_pem)
}
