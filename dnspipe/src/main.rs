//! dnspipe binary entrypoint.
//!
//! The binary is intentionally a thin wrapper: flags are parsed here and
//! turned into a small descriptor graph (listeners → optional cache →
//! failover group → upstreams); everything else happens in the library.
//! Full graphs with routers, blocklists and modifiers are built
//! programmatically through `dnspipe::graph` by an external configuration
//! loader.
//!
//! Examples
//!
//! Forward plain DNS on a local port to Cloudflare over DoT, with a cache:
//!
//! $ dnspipe -l 127.0.0.1:5353 -u dot:1.1.1.1:853 --cache
//!
//! Round out the setup with a second upstream and the metrics endpoint:
//!
//! $ dnspipe -l 0.0.0.0:53 -u dot:1.1.1.1:853 -u udp:9.9.9.9:53 \
//!     --admin 127.0.0.1:8080 --allowed-net 192.168.0.0/16

use clap::Parser;
use env_logger::Env;

use dnspipe::cache::CacheOptions;
use dnspipe::error::Result;
use dnspipe::graph::{
    Graph, ListenerDesc, ListenerProtocol, MiddlewareDesc, MiddlewareKind, Protocol, UpstreamDesc,
};
use dnspipe::group::FailOptions;
use dnspipe::ResolveError;

#[derive(clap::Parser)]
#[command(version, about = "DNS stub resolver, forwarding proxy and query router")]
struct Cli {
    /// Address to serve plain DNS on (UDP and TCP).
    #[arg(short = 'l', long = "listen", default_value = "127.0.0.1:5353")]
    listen: std::net::SocketAddr,

    /// Upstream service as <protocol>:<address>, where protocol is one of
    /// udp, tcp, dot, doh, doq. May be given multiple times; the first is
    /// active and the rest are failover targets.
    #[arg(short = 'u', long = "upstream", required = true)]
    upstreams: Vec<String>,

    /// Enable the in-memory response cache.
    #[arg(long = "cache", default_value_t = false)]
    cache: bool,

    /// Cache capacity in entries (0 means unbounded).
    #[arg(long = "cache-size", default_value_t = 4096)]
    cache_size: usize,

    /// Networks allowed to query; everyone when not given.
    #[arg(long = "allowed-net")]
    allowed_nets: Vec<String>,

    /// Serve the read-only metrics endpoint on this address.
    #[arg(long = "admin")]
    admin: Option<std::net::SocketAddr>,
}

impl Cli {
    fn into_graph(self) -> Result<Graph> {
        let mut graph = Graph::default();

        for (i, spec) in self.upstreams.iter().enumerate() {
            let (proto, address) = spec
                .split_once(':')
                .ok_or_else(|| ResolveError::config(format!("bad upstream {:?}, expected <protocol>:<address>", spec)))?;
            let protocol = match proto {
                "udp" => Protocol::Udp,
                "tcp" => Protocol::Tcp,
                "dot" => Protocol::Dot,
                "doh" => Protocol::Doh,
                "doq" => Protocol::Doq,
                other => {
                    return Err(ResolveError::config(format!("unknown upstream protocol {:?}", other)))
                }
            };
            graph
                .upstreams
                .push(UpstreamDesc::new(format!("upstream-{}", i), address, protocol));
        }

        let mut root = if graph.upstreams.len() == 1 {
            graph.upstreams[0].id.clone()
        } else {
            graph.middleware.push(MiddlewareDesc {
                id: "failover".to_string(),
                kind: MiddlewareKind::FailRotate {
                    resolvers: graph.upstreams.iter().map(|u| u.id.clone()).collect(),
                    opts: FailOptions {
                        servfail_error: true,
                        empty_error: false,
                    },
                },
            });
            "failover".to_string()
        };

        if self.cache {
            graph.middleware.push(MiddlewareDesc {
                id: "cache".to_string(),
                kind: MiddlewareKind::Cache {
                    resolver: root,
                    opts: CacheOptions {
                        capacity: self.cache_size,
                        ..CacheOptions::default()
                    },
                },
            });
            root = "cache".to_string();
        }

        for (protocol, id) in [(ListenerProtocol::Udp, "udp"), (ListenerProtocol::Tcp, "tcp")] {
            graph.listeners.push(ListenerDesc {
                id: id.to_string(),
                address: self.listen,
                protocol,
                tls: None,
                allowed_nets: self.allowed_nets.clone(),
                resolver: root.clone(),
                metrics_path: None,
            });
        }
        if let Some(addr) = self.admin {
            graph.listeners.push(ListenerDesc {
                id: "admin".to_string(),
                address: addr,
                protocol: ListenerProtocol::Admin,
                tls: None,
                allowed_nets: Vec::new(),
                resolver: String::new(),
                metrics_path: None,
            });
        }
        Ok(graph)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let cli = Cli::parse();
    let graph = cli.into_graph()?;
    log::info!(
        "starting with {} upstream(s), {} listener(s)",
        graph.upstreams.len(),
        graph.listeners.len()
    );
    dnspipe::graph::run(graph).await
}
