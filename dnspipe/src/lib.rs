//! Composable DNS stub resolver, forwarding proxy and query router.
//!
//! The whole pipeline is built from one abstraction: a [`Resolver`] takes a
//! DNS message plus [`ClientInfo`] and returns a response, an instruction to
//! drop the query silently, or an error. Listeners sit at the front and feed
//! wire traffic into a resolver; upstream clients sit at the back and speak
//! to real nameservers over UDP, TCP, DoT, DoH or DoQ; everything in between
//! (routers, groups, cache, blocklists, modifiers, rate limiter, dedup) is
//! middleware that also implements [`Resolver`] and holds references to its
//! downstreams. The materialized graph is a DAG built once at startup by
//! [`graph::build`]; elements live for the process lifetime.

/// Query and response blocklists with hot reload.
pub mod blocklist;
/// Upstream hostname resolution through a bootstrap nameserver.
pub mod bootstrap;
/// TTL-aware LRU cache with prefetch and garbage collection.
pub mod cache;
/// Pipelined upstream clients for UDP, TCP, DoT, DoH and DoQ.
pub mod client;
/// In-flight request coalescing.
pub mod dedup;
/// DNSSEC validating middleware.
pub mod dnssec;
/// Error types shared across the pipeline.
pub mod error;
/// Descriptor types and DAG materialization.
pub mod graph;
/// Fan-out and failover groups.
pub mod group;
/// Listener fronts for UDP, TCP, DoT, DoH, DoQ and the admin endpoint.
pub mod listener;
/// DNS message synthesis and manipulation helpers.
pub mod message;
/// Process-wide metric registry.
pub mod metrics;
/// Stateless message transformers (EDNS0, ECS, TTL, padding, ...).
pub mod modifier;
/// Fixed-window rate limiting.
pub mod ratelimit;
/// Predicate-ordered query routing.
pub mod router;
/// TLS material loading for DoT/DoH/DoQ endpoints.
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::Message;

pub use error::{ResolveError, Result};

/// Transport a query arrived on. Determines whether padding may be applied
/// (only encrypted transports) and is exposed to routing predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
}

impl Transport {
    /// True when the transport encrypts the DNS payload end-to-end.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls | Transport::Https | Transport::Quic)
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "dot",
            Transport::Https => "doh",
            Transport::Quic => "doq",
        };
        f.write_str(name)
    }
}

/// Information about the client a query originated from. Constructed by the
/// listener, immutable for the lifetime of the query.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Source address of the query.
    pub source_addr: SocketAddr,
    /// Id of the listener that accepted the query.
    pub listener: Arc<str>,
    /// Transport the query arrived on.
    pub transport: Transport,
}

impl ClientInfo {
    pub fn new(source_addr: SocketAddr, listener: impl Into<Arc<str>>, transport: Transport) -> Self {
        ClientInfo {
            source_addr,
            listener: listener.into(),
            transport,
        }
    }
}

/// The uniform resolve contract implemented by every pipeline element.
///
/// Contract every implementer upholds:
/// - the response carries the same id as the query when it reaches a
///   listener (ids may be rewritten locally for pipelining but are restored)
/// - queries with more than one question pass through verbatim; predicates
///   only inspect `question[0]`
/// - `Ok(None)` means drop silently, the listener must not reply
/// - `Err(_)` signals a transport/protocol failure; groups may translate it
///   into failover, listeners into SERVFAIL
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Stable unique id of this element, used in logs, metrics and graph
    /// references.
    fn id(&self) -> &str;

    /// Resolve a single query on behalf of `client`.
    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>>;
}

/// Shared ownership handle for graph edges. Downstreams may be shared by
/// any number of referrers; all of them live as long as the process.
pub type SharedResolver = Arc<dyn Resolver>;

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use hickory_proto::op::{MessageType, Query, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver used by unit tests: counts calls and either echoes a
    /// preconfigured response or fails.
    pub struct MockResolver {
        id: String,
        hits: AtomicUsize,
        reply: Option<Message>,
        fail: bool,
        delay: Option<std::time::Duration>,
    }

    impl MockResolver {
        pub fn answering(id: &str, reply: Message) -> Arc<Self> {
            Arc::new(MockResolver {
                id: id.to_string(),
                hits: AtomicUsize::new(0),
                reply: Some(reply),
                fail: false,
                delay: None,
            })
        }

        pub fn echoing(id: &str) -> Arc<Self> {
            Arc::new(MockResolver {
                id: id.to_string(),
                hits: AtomicUsize::new(0),
                reply: None,
                fail: false,
                delay: None,
            })
        }

        pub fn failing(id: &str) -> Arc<Self> {
            Arc::new(MockResolver {
                id: id.to_string(),
                hits: AtomicUsize::new(0),
                reply: None,
                fail: true,
                delay: None,
            })
        }

        pub fn slow(id: &str, reply: Message, delay: std::time::Duration) -> Arc<Self> {
            Arc::new(MockResolver {
                id: id.to_string(),
                hits: AtomicUsize::new(0),
                reply: Some(reply),
                fail: false,
                delay: Some(delay),
            })
        }

        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Resolver for MockResolver {
        fn id(&self) -> &str {
            &self.id
        }

        async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ResolveError::transport("mock failure"));
            }
            let mut reply = match &self.reply {
                Some(r) => r.clone(),
                None => {
                    let mut m = Message::new();
                    m.set_message_type(MessageType::Response);
                    m.set_response_code(ResponseCode::NoError);
                    for q in query.queries() {
                        m.add_query(q.clone());
                    }
                    m
                }
            };
            reply.set_id(query.id());
            Ok(Some(reply))
        }
    }

    pub fn query(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(rand::random());
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    pub fn a_response(query: &Message, addr: [u8; 4], ttl: u32) -> Message {
        let mut msg = Message::new();
        msg.set_id(query.id());
        msg.set_message_type(MessageType::Response);
        msg.set_response_code(ResponseCode::NoError);
        let q = query.queries()[0].clone();
        let name = q.name().clone();
        msg.add_query(q);
        msg.add_answer(Record::from_rdata(
            name,
            ttl,
            RData::A(A::new(addr[0], addr[1], addr[2], addr[3])),
        ));
        msg
    }

    pub fn client() -> ClientInfo {
        ClientInfo::new("127.0.0.1:53001".parse().unwrap(), "test", Transport::Udp)
    }
}
