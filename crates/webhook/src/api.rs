//! TLS listener for the webhook router

use anyhow::{Context, Result};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use webhook_lib::{
    health::HealthRegistry,
    server::{create_router, AppState},
};

/// Serve admission, health and metrics routes over HTTPS. The webhook
/// reports ready once the listener is bound.
pub async fn serve(
    port: u16,
    cert_path: &Path,
    key_path: &Path,
    state: Arc<AppState>,
) -> Result<()> {
    let health_registry = state.health_registry.clone();
    let app = create_router(state);

    let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .with_context(|| format!("Failed to load TLS material from {}", cert_path.display()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting webhook server");

    let handle = Handle::new();
    tokio::spawn(mark_ready_when_listening(handle.clone(), health_registry));

    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("Webhook server failed")?;

    Ok(())
}

async fn mark_ready_when_listening(handle: Handle, health_registry: HealthRegistry) {
    // None when the bind fails
    if let Some(addr) = handle.listening().await {
        info!(addr = %addr, "Webhook server listening");
        health_registry.set_ready(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert;
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use webhook_lib::{AdmissionHandler, NamespaceFilter, OvercommitRatios};

    fn app_state() -> Arc<AppState> {
        let handler = AdmissionHandler::new(
            OvercommitRatios::new(2.0, 2.0),
            NamespaceFilter::new(Vec::new()),
        );
        Arc::new(AppState::new(handler, HealthRegistry::new()))
    }

    fn tls_files(dir: &TempDir) -> (PathBuf, PathBuf) {
        let certificate = cert::generate("pod-manager", "default").unwrap();
        cert::write(dir.path(), &certificate).unwrap();
        (
            dir.path().join(cert::CERT_FILE),
            dir.path().join(cert::KEY_FILE),
        )
    }

    #[tokio::test]
    async fn test_missing_tls_material_is_never_ready() {
        let dir = TempDir::new().unwrap();
        let state = app_state();

        let result = serve(
            0,
            &dir.path().join(cert::CERT_FILE),
            &dir.path().join(cert::KEY_FILE),
            state.clone(),
        )
        .await;

        assert!(result.is_err());
        assert!(!state.health_registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failed_bind_is_never_ready() {
        let dir = TempDir::new().unwrap();
        let (cert_path, key_path) = tls_files(&dir);
        let taken = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let state = app_state();

        let result = serve(port, &cert_path, &key_path, state.clone()).await;
        // let the readiness task observe the failed bind
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(result.is_err());
        assert!(!state.health_registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_ready_once_listening() {
        let dir = TempDir::new().unwrap();
        let (cert_path, key_path) = tls_files(&dir);
        let state = app_state();
        assert!(!state.health_registry.readiness().await.ready);

        let server_state = state.clone();
        let server =
            tokio::spawn(async move { serve(0, &cert_path, &key_path, server_state).await });

        let ready = tokio::time::timeout(Duration::from_secs(10), async {
            while !state.health_registry.readiness().await.ready {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        server.abort();

        assert!(ready.is_ok());
    }
}
