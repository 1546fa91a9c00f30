//! End-to-end pipeline tests: wire queries enter through a UDP listener,
//! pass cache and failover middleware built from descriptors, and reach a
//! mock upstream over the pipelined UDP client.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::net::UdpSocket;

use dnspipe::cache::CacheOptions;
use dnspipe::graph::{self, Graph, MiddlewareDesc, MiddlewareKind, Protocol, UpstreamDesc};
use dnspipe::group::FailOptions;
use dnspipe::listener::{udp, Frontend, ListenerOptions};
use dnspipe::Transport;

/// In-process authoritative upstream answering every A query with a fixed
/// address and counting the queries it saw.
async fn spawn_upstream(ttl: u32) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut response = Message::new();
            response.set_id(query.id());
            response.set_message_type(MessageType::Response);
            response.set_response_code(ResponseCode::NoError);
            for q in query.queries() {
                response.add_query(q.clone());
                response.add_answer(Record::from_rdata(
                    q.name().clone(),
                    ttl,
                    RData::A(A::new(192, 0, 2, 53)),
                ));
            }
            let _ = socket.send_to(&response.to_vec().unwrap(), peer).await;
        }
    });
    (addr, hits)
}

fn graph_for(upstream: SocketAddr) -> Graph {
    Graph {
        upstreams: vec![UpstreamDesc::new("main", upstream.to_string(), Protocol::Udp)],
        middleware: vec![
            MiddlewareDesc {
                id: "failover".to_string(),
                kind: MiddlewareKind::FailRotate {
                    resolvers: vec!["main".to_string()],
                    opts: FailOptions::default(),
                },
            },
            MiddlewareDesc {
                id: "cache".to_string(),
                kind: MiddlewareKind::Cache {
                    resolver: "failover".to_string(),
                    opts: CacheOptions {
                        gc_period: Duration::from_secs(3600),
                        ..CacheOptions::default()
                    },
                },
            },
        ],
        listeners: Vec::new(),
    }
}

fn a_query(name: &str) -> Message {
    let mut query = Message::new();
    query.set_id(rand::random());
    query.set_recursion_desired(true);
    query.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    query
}

async fn exchange(listener: SocketAddr, query: &Message) -> Message {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&query.to_vec().unwrap(), listener)
        .await
        .unwrap();
    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(3), socket.recv_from(&mut buf))
        .await
        .expect("listener did not answer")
        .unwrap();
    Message::from_vec(&buf[..len]).unwrap()
}

#[tokio::test]
async fn wire_query_flows_through_cache_and_upstream() {
    let (upstream, hits) = spawn_upstream(300).await;
    let resolvers = graph::build_resolvers(&graph_for(upstream)).await.unwrap();
    let root = Arc::clone(resolvers.get("cache").unwrap());

    let frontend = Frontend::new("e2e", root, Transport::Udp, ListenerOptions::default());
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let listener = socket.local_addr().unwrap();
    tokio::spawn(udp::serve_socket(frontend, socket));

    let query = a_query("host.example.org.");
    let response = exchange(listener, &query).await;
    assert_eq!(response.id(), query.id());
    assert_eq!(response.queries(), query.queries());
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].ttl(), 300);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Same question again: answered from cache, upstream untouched.
    let mut second = query.clone();
    second.set_id(query.id().wrapping_add(1));
    let cached = exchange(listener, &second).await;
    assert_eq!(cached.id(), second.id());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // A different name goes upstream again.
    let other = a_query("other.example.org.");
    exchange(listener, &other).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn allowed_nets_refuse_outside_sources() {
    let (upstream, _) = spawn_upstream(60).await;
    let resolvers = graph::build_resolvers(&graph_for(upstream)).await.unwrap();
    let root = Arc::clone(resolvers.get("cache").unwrap());

    // Loopback is not inside the allowed range, so every query is refused.
    let frontend = Frontend::new(
        "refuser",
        root,
        Transport::Udp,
        ListenerOptions {
            allowed_nets: vec!["203.0.113.0/24".parse().unwrap()],
        },
    );
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let listener = socket.local_addr().unwrap();
    tokio::spawn(udp::serve_socket(frontend, socket));

    let query = a_query("blocked.example.org.");
    let response = exchange(listener, &query).await;
    assert_eq!(response.response_code(), ResponseCode::Refused);
    assert_eq!(response.id(), query.id());
}

#[tokio::test]
async fn failed_upstream_surfaces_servfail() {
    // An upstream address nobody listens on: the pipelined client times
    // out and the listener answers SERVFAIL.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead = probe.local_addr().unwrap();
    drop(probe);

    let graph = Graph {
        upstreams: vec![UpstreamDesc::new("dead", dead.to_string(), Protocol::Udp)],
        middleware: Vec::new(),
        listeners: Vec::new(),
    };
    let resolvers = graph::build_resolvers(&graph).await.unwrap();
    let root = Arc::clone(resolvers.get("dead").unwrap());

    let frontend = Frontend::new("sf", root, Transport::Udp, ListenerOptions::default());
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let listener = socket.local_addr().unwrap();
    tokio::spawn(udp::serve_socket(frontend, socket));

    let query = a_query("unreachable.example.org.");
    let response = exchange(listener, &query).await;
    assert_eq!(response.response_code(), ResponseCode::ServFail);
    assert_eq!(response.id(), query.id());
}
