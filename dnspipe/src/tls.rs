//! TLS material loading shared by the DoT/DoH/DoQ endpoints.
//!
//! Certificates and keys arrive as PEM files referenced from the listener
//! and upstream descriptors. Client configs verify against the Mozilla
//! root set unless a CA bundle is given.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::Result;
use crate::ResolveError;

/// PEM file locations for one TLS endpoint.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Server or client certificate chain.
    pub cert_file: Option<String>,
    /// Private key matching `cert_file`.
    pub key_file: Option<String>,
    /// CA bundle used instead of the built-in roots when verifying peers.
    pub ca_file: Option<String>,
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(Path::new(path))
        .map_err(|e| ResolveError::config(format!("cannot open certificate {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| ResolveError::config(format!("cannot parse certificate {}: {}", path, e)))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(Path::new(path))
        .map_err(|e| ResolveError::config(format!("cannot open key {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ResolveError::config(format!("cannot parse key {}: {}", path, e)))?
        .ok_or_else(|| ResolveError::config(format!("no private key found in {}", path)))
}

fn root_store(ca_file: Option<&str>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|e| ResolveError::config(format!("bad CA certificate in {}: {}", path, e)))?;
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }
    Ok(roots)
}

/// Client-side config for DoT/DoQ upstreams. `alpn` is `"dot"`/`"doq"`/`"h2"`
/// depending on the transport. The crypto provider is pinned to ring so a
/// second provider compiled in elsewhere cannot make the builder ambiguous.
pub fn client_config(opts: &TlsOptions, alpn: &[&str]) -> Result<ClientConfig> {
    let roots = root_store(opts.ca_file.as_deref())?;
    let builder = ClientConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ResolveError::config(format!("tls protocol versions: {}", e)))?
    .with_root_certificates(roots);
    let mut config = match (&opts.cert_file, &opts.key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| ResolveError::config(format!("client certificate rejected: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}

/// Server-side config for DoT/DoH/DoQ listeners.
pub fn server_config(opts: &TlsOptions, alpn: &[&str]) -> Result<ServerConfig> {
    let cert_file = opts
        .cert_file
        .as_deref()
        .ok_or_else(|| ResolveError::config("listener TLS requires a certificate file"))?;
    let key_file = opts
        .key_file
        .as_deref()
        .ok_or_else(|| ResolveError::config("listener TLS requires a key file"))?;
    let mut config = ServerConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ResolveError::config(format!("tls protocol versions: {}", e)))?
    .with_no_client_auth()
    .with_single_cert(load_certs(cert_file)?, load_key(key_file)?)
    .map_err(|e| ResolveError::config(format!("server certificate rejected: {}", e)))?;
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}
