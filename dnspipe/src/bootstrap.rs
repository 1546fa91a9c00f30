//! Upstream hostname resolution.
//!
//! Encrypted upstreams are usually configured by hostname. Resolving that
//! hostname through the pipeline itself would be circular, so a descriptor
//! may carry a bootstrap nameserver address; hostnames are then looked up
//! once at graph-build time through that server. Without a bootstrap
//! address the system resolver is used.

use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;

use crate::error::Result;
use crate::ResolveError;

/// Resolve `host` to a socket address on `port`. IP literals pass through
/// without any lookup.
pub async fn lookup(host: &str, port: u16, bootstrap: Option<SocketAddr>) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    match bootstrap {
        Some(nameserver) => {
            let mut config = ResolverConfig::new();
            config.add_name_server(NameServerConfig::new(nameserver, Protocol::Udp));
            let resolver = hickory_resolver::Resolver::builder_with_config(
                config,
                TokioConnectionProvider::default(),
            )
            .build();
            let lookup = resolver.lookup_ip(host).await.map_err(|e| {
                ResolveError::config(format!("bootstrap lookup for {} failed: {}", host, e))
            })?;
            lookup
                .iter()
                .next()
                .map(|ip| SocketAddr::new(ip, port))
                .ok_or_else(|| {
                    ResolveError::config(format!("bootstrap lookup for {} returned no address", host))
                })
        }
        None => tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| ResolveError::config(format!("{} did not resolve to any address", host))),
    }
}

/// Split `host:port` into its parts, defaulting to `default_port`.
pub fn split_host_port(address: &str, default_port: u16) -> (String, u16) {
    if let Some(stripped) = address.strip_prefix('[') {
        // Bracketed IPv6 literal, possibly with a port.
        if let Some((host, rest)) = stripped.split_once(']') {
            let port = rest
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match address.rsplit_once(':') {
        // A second colon means a bare IPv6 literal, not a port separator.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), default_port),
        },
        _ => (address.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_literals_skip_lookup() {
        let addr = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(lookup("1.2.3.4", 53, None))
            .unwrap();
        assert_eq!(addr, "1.2.3.4:53".parse().unwrap());
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("dns.example:853", 853), ("dns.example".into(), 853));
        assert_eq!(split_host_port("dns.example", 853), ("dns.example".into(), 853));
        assert_eq!(split_host_port("[2001:db8::1]:53", 853), ("2001:db8::1".into(), 53));
        assert_eq!(split_host_port("2001:db8::1", 853), ("2001:db8::1".into(), 853));
    }
}
