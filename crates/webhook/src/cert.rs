//! Self-signed serving certificate for the webhook endpoint

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Utc};
use rcgen::{
    date_time_ymd, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose,
};
use std::fs;
use std::path::Path;
use tracing::info;

const ORGANIZATION: &str = "pod-overcommit";
const VALIDITY_DAYS: i64 = 365;

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";

/// PEM-encoded certificate and private key
#[derive(Debug, Clone)]
pub struct ServingCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// DNS names the API server may use to reach `<service>.<namespace>`
pub fn subject_alt_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
        "127.0.0.1".to_string(),
    ]
}

/// Generate a self-signed certificate for the webhook service
pub fn generate(service: &str, namespace: &str) -> Result<ServingCertificate> {
    let mut params = CertificateParams::new(subject_alt_names(service, namespace))
        .context("Invalid subject alternative name")?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("{service}.{namespace}.svc"));
    dn.push(DnType::OrganizationName, ORGANIZATION);
    params.distinguished_name = dn;

    let now = Utc::now();
    let expiry = now + Duration::days(VALIDITY_DAYS);
    params.not_before = date_time_ymd(now.year(), now.month() as u8, now.day() as u8);
    params.not_after = date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let key_pair = KeyPair::generate().context("Failed to generate key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign certificate")?;

    Ok(ServingCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Write `tls.crt` and `tls.key` into `dir`, creating it if needed
pub fn write(dir: &Path, certificate: &ServingCertificate) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create certificate directory {}", dir.display()))?;

    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);

    fs::write(&cert_path, &certificate.cert_pem)
        .with_context(|| format!("Failed to write {}", cert_path.display()))?;
    set_mode(&cert_path, 0o644)?;

    fs::write(&key_path, &certificate.key_pem)
        .with_context(|| format!("Failed to write {}", key_path.display()))?;
    set_mode(&key_path, 0o600)?;

    info!(dir = %dir.display(), "Serving certificate written");
    Ok(())
}

/// Read the certificate PEM from `dir`, for certificates provisioned externally
pub fn read_cert(dir: &Path) -> Result<String> {
    let cert_path = dir.join(CERT_FILE);
    fs::read_to_string(&cert_path)
        .with_context(|| format!("Failed to read {}", cert_path.display()))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
