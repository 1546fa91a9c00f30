//! Descriptor types and DAG materialization.
//!
//! An external loader (or the binary's flag handling) produces a [`Graph`]
//! of upstream, middleware and listener descriptors referencing each other
//! by id. `build_resolvers` materializes them into shared [`Resolver`]
//! handles: upstreams first, then middleware in dependency order, with
//! unknown references, duplicate ids and cycles rejected. Listeners are
//! spawned last, each bound to its root resolver.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use hickory_proto::rr::{DNSClass, RecordType};
use regex::Regex;

use crate::blocklist::{
    FileLoader, HttpLoader, IpDbKind, IpMatcher, NameDbKind, NameMatcher, QueryBlocklist,
    ResponseBlocklistIp, ResponseBlocklistName, RuleLoader, StaticLoader,
};
use crate::cache::{Cache, CacheOptions};
use crate::client::doh::{DohClient, DohMethod};
use crate::client::doq::DoqClient;
use crate::client::tcp::TcpDialer;
use crate::client::tls::TlsDialer;
use crate::client::udp::UdpDialer;
use crate::client::PipelineClient;
use crate::dedup::Dedup;
use crate::dnssec::{DnssecValidator, TrustAnchor};
use crate::error::Result;
use crate::group::{FailBack, FailOptions, FailRotate, Fastest, Replace, ReplacePattern, RoundRobin};
use crate::listener::{self, Frontend, ListenerOptions};
use crate::modifier::collapse::Collapse;
use crate::modifier::ecs::{EcsMode, EcsModifier};
use crate::modifier::edns0::{Edns0Modifier, Edns0Op};
use crate::modifier::minimize::Minimize;
use crate::modifier::pad::{PadMode, Padder};
use crate::modifier::static_responder::{StaticOptions, StaticResponder};
use crate::modifier::ttl::TtlModifier;
use crate::ratelimit::{RateLimitOptions, RateLimiter};
use crate::router::{Route, Router};
use crate::tls::TlsOptions;
use crate::{bootstrap, tls, ResolveError, SharedResolver, Transport};

/// Wire protocol of an upstream or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Dot,
    Doh,
    Doq,
}

impl Protocol {
    fn default_port(&self) -> u16 {
        match self {
            Protocol::Udp | Protocol::Tcp => 53,
            Protocol::Dot | Protocol::Doq => 853,
            Protocol::Doh => 443,
        }
    }
}

/// One upstream DNS service.
#[derive(Debug, Clone)]
pub struct UpstreamDesc {
    pub id: String,
    /// `host:port` (port optional), or a URL for DoH.
    pub address: String,
    pub protocol: Protocol,
    pub tls: TlsOptions,
    /// Pre-resolved nameserver used to look up the upstream's hostname.
    pub bootstrap: Option<SocketAddr>,
    /// EDNS0 payload size announced upstream.
    pub udp_size: Option<u16>,
    /// DoH only: use GET instead of POST.
    pub doh_get: bool,
}

impl UpstreamDesc {
    pub fn new(id: impl Into<String>, address: impl Into<String>, protocol: Protocol) -> Self {
        UpstreamDesc {
            id: id.into(),
            address: address.into(),
            protocol,
            tls: TlsOptions::default(),
            bootstrap: None,
            udp_size: None,
            doh_get: false,
        }
    }
}

/// Where a blocklist's rules come from.
#[derive(Debug, Clone)]
pub enum ListSource {
    File(String),
    Http(String),
    Static(Vec<String>),
}

impl ListSource {
    fn loader(&self) -> Box<dyn RuleLoader> {
        match self {
            ListSource::File(path) => Box::new(FileLoader::new(path.clone())),
            ListSource::Http(url) => Box::new(HttpLoader::new(url.clone())),
            ListSource::Static(rules) => Box::new(StaticLoader::new(rules.clone())),
        }
    }
}

/// One route of a router element, with its predicates still in textual
/// form.
#[derive(Debug, Clone, Default)]
pub struct RouteDesc {
    pub types: Vec<String>,
    pub classes: Vec<String>,
    pub qname: Option<String>,
    pub sources: Vec<String>,
    pub listeners: Vec<String>,
    pub weekdays: Vec<String>,
    /// Local time-of-day window as `HH:MM`.
    pub after: Option<String>,
    pub before: Option<String>,
    pub invert: bool,
    pub resolver: String,
}

/// Middleware element descriptors. `resolver`/`resolvers` reference other
/// elements by id.
#[derive(Debug, Clone)]
pub enum MiddlewareKind {
    Cache {
        resolver: String,
        opts: CacheOptions,
    },
    Router {
        routes: Vec<RouteDesc>,
    },
    RoundRobin {
        resolvers: Vec<String>,
    },
    FailRotate {
        resolvers: Vec<String>,
        opts: FailOptions,
    },
    FailBack {
        resolvers: Vec<String>,
        opts: FailOptions,
        reset_after: Duration,
    },
    Fastest {
        resolvers: Vec<String>,
    },
    Replace {
        resolver: String,
        patterns: Vec<(String, String)>,
    },
    QueryBlocklist {
        resolver: String,
        format: NameDbKind,
        source: ListSource,
        allowlist_format: NameDbKind,
        allowlist_source: Option<ListSource>,
        blocklist_resolver: Option<String>,
        allowlist_resolver: Option<String>,
        refresh: Duration,
        allow_failure: bool,
    },
    ResponseBlocklistName {
        resolver: String,
        format: NameDbKind,
        source: ListSource,
        filter: bool,
        blocklist_resolver: Option<String>,
        refresh: Duration,
        allow_failure: bool,
    },
    ResponseBlocklistIp {
        resolver: String,
        kind: IpDbKind,
        source: ListSource,
        filter: bool,
        blocklist_resolver: Option<String>,
        refresh: Duration,
        allow_failure: bool,
    },
    Ecs {
        resolver: String,
        mode: EcsMode,
        prefix4: u8,
        prefix6: u8,
    },
    Edns0 {
        resolver: String,
        ops: Vec<Edns0Op>,
    },
    Ttl {
        resolver: String,
        ttl_min: u32,
        ttl_max: u32,
    },
    Static {
        opts: StaticOptions,
    },
    Collapse {
        resolver: String,
        nxdomain_on_empty: bool,
    },
    Minimize {
        resolver: String,
    },
    Pad {
        resolver: String,
        mode: PadMode,
    },
    Dnssec {
        resolver: String,
        anchors: Vec<TrustAnchor>,
        log_only: bool,
    },
    RateLimit {
        resolver: String,
        limit_resolver: Option<String>,
        opts: RateLimitOptions,
    },
    Dedup {
        resolver: String,
        ecs_aware: bool,
    },
}

#[derive(Debug, Clone)]
pub struct MiddlewareDesc {
    pub id: String,
    pub kind: MiddlewareKind,
}

/// Listener kinds, including the read-only admin endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    Udp,
    Tcp,
    Dot,
    Doh,
    Doq,
    Admin,
}

#[derive(Debug, Clone)]
pub struct ListenerDesc {
    pub id: String,
    pub address: SocketAddr,
    pub protocol: ListenerProtocol,
    pub tls: Option<TlsOptions>,
    pub allowed_nets: Vec<String>,
    /// Root resolver handling this listener's queries. Unused by admin.
    pub resolver: String,
    /// Admin only: path of the variable dump.
    pub metrics_path: Option<String>,
}

/// The materialized-graph input consumed by the core.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub upstreams: Vec<UpstreamDesc>,
    pub middleware: Vec<MiddlewareDesc>,
    pub listeners: Vec<ListenerDesc>,
}

/// Ids a middleware element depends on.
fn dependencies(kind: &MiddlewareKind) -> Vec<&String> {
    match kind {
        MiddlewareKind::Cache { resolver, .. }
        | MiddlewareKind::Replace { resolver, .. }
        | MiddlewareKind::Ecs { resolver, .. }
        | MiddlewareKind::Edns0 { resolver, .. }
        | MiddlewareKind::Ttl { resolver, .. }
        | MiddlewareKind::Collapse { resolver, .. }
        | MiddlewareKind::Minimize { resolver }
        | MiddlewareKind::Pad { resolver, .. }
        | MiddlewareKind::Dnssec { resolver, .. }
        | MiddlewareKind::Dedup { resolver, .. } => vec![resolver],
        MiddlewareKind::Router { routes } => routes.iter().map(|r| &r.resolver).collect(),
        MiddlewareKind::RoundRobin { resolvers }
        | MiddlewareKind::FailRotate { resolvers, .. }
        | MiddlewareKind::FailBack { resolvers, .. }
        | MiddlewareKind::Fastest { resolvers } => resolvers.iter().collect(),
        MiddlewareKind::QueryBlocklist {
            resolver,
            blocklist_resolver,
            allowlist_resolver,
            ..
        } => {
            let mut deps = vec![resolver];
            deps.extend(blocklist_resolver.iter());
            deps.extend(allowlist_resolver.iter());
            deps
        }
        MiddlewareKind::ResponseBlocklistName {
            resolver,
            blocklist_resolver,
            ..
        }
        | MiddlewareKind::ResponseBlocklistIp {
            resolver,
            blocklist_resolver,
            ..
        } => {
            let mut deps = vec![resolver];
            deps.extend(blocklist_resolver.iter());
            deps
        }
        MiddlewareKind::RateLimit {
            resolver,
            limit_resolver,
            ..
        } => {
            let mut deps = vec![resolver];
            deps.extend(limit_resolver.iter());
            deps
        }
        MiddlewareKind::Static { .. } => Vec::new(),
    }
}

async fn build_upstream(desc: &UpstreamDesc) -> Result<SharedResolver> {
    Ok(match desc.protocol {
        Protocol::Udp | Protocol::Tcp => {
            let (host, port) = bootstrap::split_host_port(&desc.address, desc.protocol.default_port());
            let addr = bootstrap::lookup(&host, port, desc.bootstrap).await?;
            let dialer: Box<dyn crate::client::Dialer> = match desc.protocol {
                Protocol::Udp => Box::new(UdpDialer::new(addr)),
                _ => Box::new(TcpDialer::new(addr)),
            };
            Arc::new(PipelineClient::new(desc.id.clone(), dialer, desc.udp_size))
        }
        Protocol::Dot => {
            let (host, port) = bootstrap::split_host_port(&desc.address, desc.protocol.default_port());
            let addr = bootstrap::lookup(&host, port, desc.bootstrap).await?;
            let config = Arc::new(tls::client_config(&desc.tls, &[])?);
            let dialer = Box::new(TlsDialer::new(addr, &host, config)?);
            Arc::new(PipelineClient::new(desc.id.clone(), dialer, desc.udp_size))
        }
        Protocol::Doq => {
            let (host, port) = bootstrap::split_host_port(&desc.address, desc.protocol.default_port());
            let addr = bootstrap::lookup(&host, port, desc.bootstrap).await?;
            let config = tls::client_config(&desc.tls, &["doq"])?;
            Arc::new(DoqClient::new(desc.id.clone(), addr, host, config)?)
        }
        Protocol::Doh => {
            let method = if desc.doh_get { DohMethod::Get } else { DohMethod::Post };
            let bootstrap_addr = match desc.bootstrap {
                Some(ns) => {
                    let url = reqwest::Url::parse(&desc.address)
                        .map_err(|e| ResolveError::config(format!("bad DoH url {}: {}", desc.address, e)))?;
                    let host = url
                        .host_str()
                        .ok_or_else(|| ResolveError::config(format!("DoH url {} has no host", desc.address)))?
                        .to_string();
                    let port = url.port().unwrap_or(desc.protocol.default_port());
                    Some(bootstrap::lookup(&host, port, Some(ns)).await?)
                }
                None => None,
            };
            let ca_pem = match &desc.tls.ca_file {
                Some(path) => Some(std::fs::read(path).map_err(|e| {
                    ResolveError::config(format!("cannot read CA bundle {}: {}", path, e))
                })?),
                None => None,
            };
            Arc::new(DohClient::new(
                desc.id.clone(),
                desc.address.clone(),
                method,
                bootstrap_addr,
                ca_pem.as_deref(),
            )?)
        }
    })
}

fn build_route(desc: &RouteDesc, resolver: SharedResolver) -> Result<Route> {
    let mut route = Route::to(resolver);
    for t in &desc.types {
        route.types.push(
            t.parse::<RecordType>()
                .map_err(|_| ResolveError::config(format!("bad record type {:?}", t)))?,
        );
    }
    for c in &desc.classes {
        route.classes.push(
            c.parse::<DNSClass>()
                .map_err(|_| ResolveError::config(format!("bad class {:?}", c)))?,
        );
    }
    if let Some(expr) = &desc.qname {
        route.qname = Some(Regex::new(expr)?);
    }
    for net in &desc.sources {
        route.sources.push(
            net.parse()
                .map_err(|_| ResolveError::config(format!("bad network {:?}", net)))?,
        );
    }
    route.listeners = desc.listeners.clone();
    for day in &desc.weekdays {
        route.weekdays.push(
            day.parse::<Weekday>()
                .map_err(|_| ResolveError::config(format!("bad weekday {:?}", day)))?,
        );
    }
    if desc.after.is_some() || desc.before.is_some() {
        let parse = |s: &Option<String>, default: &str| -> Result<NaiveTime> {
            let text = s.as_deref().unwrap_or(default);
            NaiveTime::parse_from_str(text, "%H:%M")
                .map_err(|_| ResolveError::config(format!("bad time of day {:?}", text)))
        };
        route.window = Some((parse(&desc.after, "00:00")?, parse(&desc.before, "23:59")?));
    }
    route.invert = desc.invert;
    Ok(route)
}

async fn build_middleware(
    desc: &MiddlewareDesc,
    built: &HashMap<String, SharedResolver>,
) -> Result<SharedResolver> {
    let get = |id: &String| -> SharedResolver { Arc::clone(&built[id]) };
    let get_opt = |id: &Option<String>| id.as_ref().map(get);

    Ok(match &desc.kind {
        MiddlewareKind::Cache { resolver, opts } => {
            Cache::new(desc.id.clone(), get(resolver), opts.clone())?
        }
        MiddlewareKind::Router { routes } => {
            let routes = routes
                .iter()
                .map(|r| build_route(r, get(&r.resolver)))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(Router::new(desc.id.clone(), routes))
        }
        MiddlewareKind::RoundRobin { resolvers } => Arc::new(RoundRobin::new(
            desc.id.clone(),
            resolvers.iter().map(get).collect(),
        )),
        MiddlewareKind::FailRotate { resolvers, opts } => Arc::new(FailRotate::new(
            desc.id.clone(),
            resolvers.iter().map(get).collect(),
            *opts,
        )),
        MiddlewareKind::FailBack {
            resolvers,
            opts,
            reset_after,
        } => Arc::new(FailBack::new(
            desc.id.clone(),
            resolvers.iter().map(get).collect(),
            *opts,
            *reset_after,
        )),
        MiddlewareKind::Fastest { resolvers } => Arc::new(Fastest::new(
            desc.id.clone(),
            resolvers.iter().map(get).collect(),
        )),
        MiddlewareKind::Replace { resolver, patterns } => {
            let patterns = patterns
                .iter()
                .map(|(from, to)| ReplacePattern::new(from, to.clone()))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(Replace::new(desc.id.clone(), get(resolver), patterns))
        }
        MiddlewareKind::QueryBlocklist {
            resolver,
            format,
            source,
            allowlist_format,
            allowlist_source,
            blocklist_resolver,
            allowlist_resolver,
            refresh,
            allow_failure,
        } => {
            let blocklist =
                NameMatcher::load_names(desc.id.clone(), *format, source.loader(), *allow_failure)
                    .await?;
            blocklist.spawn_refresh(*refresh);
            let allowlist = match allowlist_source {
                Some(source) => {
                    let matcher = NameMatcher::load_names(
                        format!("{}-allow", desc.id),
                        *allowlist_format,
                        source.loader(),
                        *allow_failure,
                    )
                    .await?;
                    matcher.spawn_refresh(*refresh);
                    Some(matcher)
                }
                None => None,
            };
            Arc::new(QueryBlocklist::new(
                desc.id.clone(),
                get(resolver),
                blocklist,
                allowlist,
                get_opt(blocklist_resolver),
                get_opt(allowlist_resolver),
            ))
        }
        MiddlewareKind::ResponseBlocklistName {
            resolver,
            format,
            source,
            filter,
            blocklist_resolver,
            refresh,
            allow_failure,
        } => {
            let matcher =
                NameMatcher::load_names(desc.id.clone(), *format, source.loader(), *allow_failure)
                    .await?;
            matcher.spawn_refresh(*refresh);
            Arc::new(ResponseBlocklistName::new(
                desc.id.clone(),
                get(resolver),
                matcher,
                *filter,
                get_opt(blocklist_resolver),
            ))
        }
        MiddlewareKind::ResponseBlocklistIp {
            resolver,
            kind,
            source,
            filter,
            blocklist_resolver,
            refresh,
            allow_failure,
        } => {
            let matcher =
                IpMatcher::load_ips(desc.id.clone(), kind.clone(), source.loader(), *allow_failure)
                    .await?;
            matcher.spawn_refresh(*refresh);
            Arc::new(ResponseBlocklistIp::new(
                desc.id.clone(),
                get(resolver),
                matcher,
                *filter,
                get_opt(blocklist_resolver),
            ))
        }
        MiddlewareKind::Ecs {
            resolver,
            mode,
            prefix4,
            prefix6,
        } => Arc::new(EcsModifier::new(
            desc.id.clone(),
            get(resolver),
            mode.clone(),
            *prefix4,
            *prefix6,
        )),
        MiddlewareKind::Edns0 { resolver, ops } => {
            Arc::new(Edns0Modifier::new(desc.id.clone(), get(resolver), ops.clone()))
        }
        MiddlewareKind::Ttl {
            resolver,
            ttl_min,
            ttl_max,
        } => Arc::new(TtlModifier::new(desc.id.clone(), get(resolver), *ttl_min, *ttl_max)),
        MiddlewareKind::Static { opts } => {
            Arc::new(StaticResponder::new(desc.id.clone(), opts.clone())?)
        }
        MiddlewareKind::Collapse {
            resolver,
            nxdomain_on_empty,
        } => Arc::new(Collapse::new(desc.id.clone(), get(resolver), *nxdomain_on_empty)),
        MiddlewareKind::Minimize { resolver } => {
            Arc::new(Minimize::new(desc.id.clone(), get(resolver)))
        }
        MiddlewareKind::Pad { resolver, mode } => {
            Arc::new(Padder::new(desc.id.clone(), get(resolver), *mode))
        }
        MiddlewareKind::Dnssec {
            resolver,
            anchors,
            log_only,
        } => Arc::new(DnssecValidator::new(
            desc.id.clone(),
            get(resolver),
            anchors.clone(),
            *log_only,
        )),
        MiddlewareKind::RateLimit {
            resolver,
            limit_resolver,
            opts,
        } => Arc::new(RateLimiter::new(
            desc.id.clone(),
            get(resolver),
            get_opt(limit_resolver),
            opts.clone(),
        )),
        MiddlewareKind::Dedup { resolver, ecs_aware } => {
            Arc::new(Dedup::new(desc.id.clone(), get(resolver), *ecs_aware))
        }
    })
}

/// Materialize every upstream and middleware element. Returns the id →
/// resolver map; shared downstream references share one instance.
pub async fn build_resolvers(graph: &Graph) -> Result<HashMap<String, SharedResolver>> {
    let mut built: HashMap<String, SharedResolver> = HashMap::new();
    let mut ids: HashSet<&str> = HashSet::new();
    for id in graph
        .upstreams
        .iter()
        .map(|u| u.id.as_str())
        .chain(graph.middleware.iter().map(|m| m.id.as_str()))
    {
        if !ids.insert(id) {
            return Err(ResolveError::config(format!("duplicate element id {:?}", id)));
        }
    }

    for desc in &graph.middleware {
        for dep in dependencies(&desc.kind) {
            if !ids.contains(dep.as_str()) {
                return Err(ResolveError::config(format!(
                    "element {:?} references unknown id {:?}",
                    desc.id, dep
                )));
            }
        }
    }

    for desc in &graph.upstreams {
        let resolver = build_upstream(desc).await?;
        built.insert(desc.id.clone(), resolver);
    }

    // Middleware may reference each other in any order; build whatever has
    // all dependencies ready, repeating until done. A pass that makes no
    // progress means a reference cycle.
    let mut pending: Vec<&MiddlewareDesc> = graph.middleware.iter().collect();
    while !pending.is_empty() {
        let mut next = Vec::new();
        let mut progressed = false;
        for desc in pending {
            if dependencies(&desc.kind).iter().all(|d| built.contains_key(*d)) {
                let resolver = build_middleware(desc, &built).await?;
                built.insert(desc.id.clone(), resolver);
                progressed = true;
            } else {
                next.push(desc);
            }
        }
        if !progressed {
            let stuck: Vec<&str> = next.iter().map(|d| d.id.as_str()).collect();
            return Err(ResolveError::config(format!(
                "reference cycle among elements: {}",
                stuck.join(", ")
            )));
        }
        pending = next;
    }
    Ok(built)
}

/// Build the graph and run every listener. Returns when any listener
/// fails; in normal operation it runs forever.
pub async fn run(graph: Graph) -> Result<()> {
    let resolvers = build_resolvers(&graph).await?;
    if graph.listeners.is_empty() {
        return Err(ResolveError::config("no listeners configured"));
    }

    let mut tasks = tokio::task::JoinSet::new();
    for desc in &graph.listeners {
        let desc = desc.clone();
        if desc.protocol == ListenerProtocol::Admin {
            tasks.spawn(async move {
                listener::admin::serve(
                    &desc.id,
                    desc.address,
                    desc.metrics_path.clone().unwrap_or_default(),
                    desc.tls.clone(),
                )
                .await
            });
            continue;
        }
        let root = resolvers
            .get(&desc.resolver)
            .ok_or_else(|| {
                ResolveError::config(format!(
                    "listener {:?} references unknown resolver {:?}",
                    desc.id, desc.resolver
                ))
            })?
            .clone();
        let opts = ListenerOptions {
            allowed_nets: listener::parse_allowed_nets(&desc.allowed_nets)?,
        };
        tasks.spawn(async move {
            match desc.protocol {
                ListenerProtocol::Udp => {
                    let frontend = Frontend::new(desc.id.clone(), root, Transport::Udp, opts);
                    listener::udp::serve(frontend, desc.address).await
                }
                ListenerProtocol::Tcp => {
                    let frontend = Frontend::new(desc.id.clone(), root, Transport::Tcp, opts);
                    listener::tcp::serve(frontend, desc.address, None).await
                }
                ListenerProtocol::Dot => {
                    let frontend = Frontend::new(desc.id.clone(), root, Transport::Tls, opts);
                    let config = tls::server_config(desc.tls.as_ref().unwrap_or(&TlsOptions::default()), &[])?;
                    listener::tcp::serve(frontend, desc.address, Some(Arc::new(config))).await
                }
                ListenerProtocol::Doh => {
                    let frontend = Frontend::new(desc.id.clone(), root, Transport::Https, opts);
                    listener::doh::serve(frontend, desc.address, desc.tls.clone()).await
                }
                ListenerProtocol::Doq => {
                    let frontend = Frontend::new(desc.id.clone(), root, Transport::Quic, opts);
                    let config = tls::server_config(
                        desc.tls.as_ref().ok_or_else(|| {
                            ResolveError::config("doq listener requires TLS material")
                        })?,
                        &["doq"],
                    )?;
                    listener::doq::serve(frontend, desc.address, config).await
                }
                ListenerProtocol::Admin => unreachable!("admin handled above"),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => return Err(ResolveError::transport(format!("listener task failed: {}", err))),
        }
    }
    Ok(())
}
