//! Listener fronts.
//!
//! Every listener decodes wire queries, builds [`ClientInfo`], enforces
//! `allowed_nets` (REFUSED for sources outside), runs the bound resolver
//! under a per-query timeout and encodes the reply. A resolver returning
//! `Ok(None)` means the listener stays silent. All transports share the
//! `Frontend` for that logic and differ only in framing.

pub mod admin;
pub mod doh;
pub mod doq;
pub mod tcp;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use ipnet::IpNet;

use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, ResolveError, SharedResolver, Transport};

/// Per-query budget covering the whole pipeline walk.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Sources allowed to query this listener; empty allows everyone.
    pub allowed_nets: Vec<IpNet>,
}

/// Transport-independent listener core.
pub struct Frontend {
    id: Arc<str>,
    resolver: SharedResolver,
    transport: Transport,
    allowed_nets: Vec<IpNet>,
    queries: Arc<Counter>,
    errors: Arc<Counter>,
    refused: Arc<Counter>,
    dropped: Arc<Counter>,
}

impl Frontend {
    pub fn new(
        id: impl Into<Arc<str>>,
        resolver: SharedResolver,
        transport: Transport,
        opts: ListenerOptions,
    ) -> Arc<Frontend> {
        let id = id.into();
        Arc::new(Frontend {
            queries: Registry::global().counter(&format!("listener.{}.query", id)),
            errors: Registry::global().counter(&format!("listener.{}.error", id)),
            refused: Registry::global().counter(&format!("listener.{}.refused", id)),
            dropped: Registry::global().counter(&format!("listener.{}.drop", id)),
            id,
            resolver,
            transport,
            allowed_nets: opts.allowed_nets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn allowed(&self, source: SocketAddr) -> bool {
        self.allowed_nets.is_empty() || self.allowed_nets.iter().any(|net| net.contains(&source.ip()))
    }

    /// Process one wire query. Returns the reply and the source's
    /// advertised UDP size cap, or `None` when no reply must be sent.
    pub async fn handle_wire(&self, wire: &[u8], source: SocketAddr) -> Option<(Message, usize)> {
        let query = match Message::from_vec(wire) {
            Ok(query) => query,
            Err(err) => {
                log::debug!("listener {}: dropping unparseable query from {}: {}", self.id, source, err);
                self.errors.inc();
                return None;
            }
        };
        let udp_cap = message::max_udp_size(&query);
        let response = self.handle_query(&query, source).await?;
        Some((response, udp_cap))
    }

    /// Police and resolve one decoded query.
    pub async fn handle_query(&self, query: &Message, source: SocketAddr) -> Option<Message> {
        self.queries.inc();
        if !self.allowed(source) {
            self.refused.inc();
            log::info!("listener {}: refusing query from {}", self.id, source);
            return Some(message::refused(query));
        }
        let client = ClientInfo::new(source, Arc::clone(&self.id), self.transport);
        let result = tokio::time::timeout(QUERY_TIMEOUT, self.resolver.resolve(query, &client)).await;
        match result {
            Ok(Ok(Some(mut response))) => {
                response.set_id(query.id());
                Some(response)
            }
            Ok(Ok(None)) => {
                self.dropped.inc();
                None
            }
            Ok(Err(err)) => {
                self.errors.inc();
                log::warn!("listener {}: resolver error for {}: {}", self.id, source, err);
                Some(message::servfail(query))
            }
            Err(_) => {
                self.errors.inc();
                log::warn!("listener {}: query from {} timed out after {:?}", self.id, source, QUERY_TIMEOUT);
                Some(message::servfail(query))
            }
        }
    }
}

/// Parse listener `allowed_nets` strings at build time.
pub fn parse_allowed_nets(nets: &[String]) -> Result<Vec<IpNet>> {
    nets.iter()
        .map(|n| {
            n.parse::<IpNet>()
                .or_else(|_| n.parse::<std::net::IpAddr>().map(IpNet::from))
                .map_err(|_| ResolveError::config(format!("bad network {:?}", n)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{query, MockResolver};
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::RecordType;

    fn frontend(allowed: &[&str]) -> Arc<Frontend> {
        Frontend::new(
            "l1",
            MockResolver::echoing("up"),
            Transport::Udp,
            ListenerOptions {
                allowed_nets: parse_allowed_nets(
                    &allowed.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
                )
                .unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn outside_sources_get_refused() {
        let frontend = frontend(&["10.0.0.0/8"]);
        let q = query("example.com.", RecordType::A);
        let reply = frontend
            .handle_query(&q, "192.0.2.1:4444".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.response_code(), ResponseCode::Refused);
        assert_eq!(reply.id(), q.id());

        let ok = frontend
            .handle_query(&q, "10.1.2.3:4444".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(ok.response_code(), ResponseCode::NoError);
    }

    #[tokio::test]
    async fn resolver_errors_become_servfail() {
        let frontend = Frontend::new(
            "l2",
            MockResolver::failing("down"),
            Transport::Udp,
            ListenerOptions::default(),
        );
        let q = query("example.com.", RecordType::A);
        let reply = frontend
            .handle_query(&q, "127.0.0.1:5353".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(reply.id(), q.id());
    }

    #[tokio::test]
    async fn wire_roundtrip_preserves_id() {
        let frontend = frontend(&[]);
        let q = query("example.com.", RecordType::A);
        let (reply, cap) = frontend
            .handle_wire(&q.to_vec().unwrap(), "127.0.0.1:5353".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.id(), q.id());
        assert_eq!(cap, 512);
    }
}
