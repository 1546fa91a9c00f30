//! Upstream DNS clients.
//!
//! All stream-like transports (UDP, TCP, DoT) share one pipelined client:
//! a single logical connection per upstream address, used concurrently by
//! any number of in-flight queries. A writer task drains the request queue
//! and assigns every query a fresh 16-bit id; an idle-timed reader task
//! correlates responses by that id and restores the original id before
//! completing the caller's wait. DoH and DoQ have their own clients
//! (`doh`, `doq`) because their transports multiplex natively.

pub mod doh;
pub mod doq;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, Query};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, ResolveError, Resolver};

/// Default per-request deadline for pipelined transports.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Reader deadline: with no bytes for this long, the connection is closed
/// and the next request re-dials.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of a dialed upstream connection.
#[async_trait]
pub trait MsgWrite: Send {
    async fn write_msg(&mut self, wire: &[u8]) -> Result<()>;
}

/// Read half of a dialed upstream connection. One call returns one whole
/// DNS message.
#[async_trait]
pub trait MsgRead: Send {
    async fn read_msg(&mut self) -> Result<Vec<u8>>;
}

/// Transport-specific connection establishment. Implementations exist for
/// UDP sockets, TCP streams and TLS streams; the pipelined client is
/// otherwise identical across them.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<(Box<dyn MsgWrite>, Box<dyn MsgRead>)>;
}

struct Exchange {
    query: Message,
    respond: oneshot::Sender<Result<Message>>,
}

struct Pending {
    original_id: u16,
    question: Option<Query>,
    respond: oneshot::Sender<Result<Message>>,
}

type Inflight = Arc<Mutex<HashMap<u16, Pending>>>;

/// Pipelined request multiplexer over one upstream connection.
pub struct Pipeline {
    queue: mpsc::Sender<Exchange>,
    timeout: Duration,
}

impl Pipeline {
    /// Spawn the connection manager for `dialer`. No connection is opened
    /// until the first query is submitted.
    pub fn new(label: String, dialer: Box<dyn Dialer>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(manage_connection(label, dialer, rx));
        Pipeline { queue: tx, timeout }
    }

    /// Submit one query and wait for its response. The caller's message is
    /// not mutated; id rewriting happens on a copy and is undone before the
    /// response is returned.
    pub async fn exchange(&self, query: &Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(Exchange {
                query: query.clone(),
                respond: tx,
            })
            .await
            .map_err(|_| ResolveError::transport("upstream client shut down"))?;
        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => Err(ResolveError::timeout(format!(
                "no response within {:?}",
                self.timeout
            ))),
            Ok(Err(_)) => Err(ResolveError::transport("connection torn down")),
            Ok(Ok(result)) => result,
        }
    }
}

/// Connection manager: dials lazily, then acts as the writer while a
/// spawned reader correlates responses. Either side failing tears the
/// connection down; the next queued request re-dials.
async fn manage_connection(label: String, dialer: Box<dyn Dialer>, mut queue: mpsc::Receiver<Exchange>) {
    while let Some(first) = queue.recv().await {
        let (writer, reader) = match dialer.dial().await {
            Ok(conn) => conn,
            Err(err) => {
                log::warn!("{}: dial failed: {}", label, err);
                let _ = first.respond.send(Err(err));
                continue;
            }
        };
        log::debug!("{}: connected", label);
        run_connection(&label, first, writer, reader, &mut queue).await;
    }
}

async fn run_connection(
    label: &str,
    first: Exchange,
    mut writer: Box<dyn MsgWrite>,
    reader: Box<dyn MsgRead>,
    queue: &mut mpsc::Receiver<Exchange>,
) {
    let inflight: Inflight = Arc::new(Mutex::new(HashMap::new()));
    let (reader_gone_tx, mut reader_gone) = oneshot::channel::<()>();
    let reader_task = tokio::spawn(read_responses(
        label.to_string(),
        reader,
        Arc::clone(&inflight),
        reader_gone_tx,
    ));

    let mut alive = submit(label, first, &mut writer, &inflight).await;
    while alive {
        tokio::select! {
            _ = &mut reader_gone => break,
            next = queue.recv() => match next {
                Some(exchange) => {
                    alive = submit(label, exchange, &mut writer, &inflight).await;
                }
                None => break,
            },
        }
    }

    reader_task.abort();
    let drained: Vec<Pending> = {
        let mut map = inflight.lock().expect("in-flight table poisoned");
        map.drain().map(|(_, p)| p).collect()
    };
    for pending in drained {
        let _ = pending
            .respond
            .send(Err(ResolveError::transport("connection torn down")));
    }
}

/// Assign a fresh id, record the in-flight entry and write the query.
/// Returns false when the connection must be abandoned.
async fn submit(label: &str, exchange: Exchange, writer: &mut Box<dyn MsgWrite>, inflight: &Inflight) -> bool {
    let mut msg = exchange.query;
    let original_id = msg.id();
    let question = message::first_question(&msg).cloned();

    let new_id = {
        let mut map = inflight.lock().expect("in-flight table poisoned");
        let mut id: u16 = rand::random();
        while map.contains_key(&id) {
            id = rand::random();
        }
        map.insert(
            id,
            Pending {
                original_id,
                question,
                respond: exchange.respond,
            },
        );
        id
    };
    msg.set_id(new_id);

    let wire = match msg.to_vec() {
        Ok(wire) => wire,
        Err(err) => {
            fail_pending(inflight, new_id, ResolveError::from(err));
            return true;
        }
    };
    if let Err(err) = writer.write_msg(&wire).await {
        log::warn!("{}: write failed: {}", label, err);
        fail_pending(inflight, new_id, err);
        return false;
    }
    true
}

fn fail_pending(inflight: &Inflight, id: u16, err: ResolveError) {
    let pending = {
        let mut map = inflight.lock().expect("in-flight table poisoned");
        map.remove(&id)
    };
    if let Some(pending) = pending {
        let _ = pending.respond.send(Err(err));
    }
}

/// Reader side: correlate responses with the in-flight table. A response
/// whose question does not echo the query's completes the waiting call
/// with a protocol error but does not tear the connection down.
async fn read_responses(label: String, mut reader: Box<dyn MsgRead>, inflight: Inflight, _gone: oneshot::Sender<()>) {
    loop {
        let wire = match tokio::time::timeout(IDLE_TIMEOUT, reader.read_msg()).await {
            Err(_) => {
                log::debug!("{}: idle for {:?}, closing connection", label, IDLE_TIMEOUT);
                return;
            }
            Ok(Err(err)) => {
                log::debug!("{}: read failed: {}", label, err);
                return;
            }
            Ok(Ok(wire)) => wire,
        };
        let mut response = match Message::from_vec(&wire) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("{}: dropping unparseable response: {}", label, err);
                continue;
            }
        };
        let pending = {
            let mut map = inflight.lock().expect("in-flight table poisoned");
            map.remove(&response.id())
        };
        let Some(pending) = pending else {
            log::debug!("{}: discarding late or unknown response id {}", label, response.id());
            continue;
        };
        response.set_id(pending.original_id);
        let result = match (&pending.question, message::first_question(&response)) {
            (Some(q), Some(r))
                if q.name() != r.name()
                    || q.query_type() != r.query_type()
                    || q.query_class() != r.query_class() =>
            {
                Err(ResolveError::protocol(format!(
                    "response question {} does not match query {}",
                    r.name(),
                    q.name()
                )))
            }
            _ => Ok(response),
        };
        let _ = pending.respond.send(result);
    }
}

/// Resolver over a pipelined transport. One instance per upstream address,
/// shared by every incoming query.
pub struct PipelineClient {
    id: String,
    pipeline: Pipeline,
    udp_size: Option<u16>,
    queries: Arc<Counter>,
    failures: Arc<Counter>,
}

impl PipelineClient {
    pub fn new(id: impl Into<String>, dialer: Box<dyn Dialer>, udp_size: Option<u16>) -> Self {
        Self::with_timeout(id, dialer, udp_size, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        id: impl Into<String>,
        dialer: Box<dyn Dialer>,
        udp_size: Option<u16>,
        timeout: Duration,
    ) -> Self {
        let id = id.into();
        let queries = Registry::global().counter(&format!("client.{}.query", id));
        let failures = Registry::global().counter(&format!("client.{}.failure", id));
        PipelineClient {
            pipeline: Pipeline::new(id.clone(), dialer, timeout),
            id,
            udp_size,
            queries,
            failures,
        }
    }
}

#[async_trait]
impl Resolver for PipelineClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
        self.queries.inc();
        let response = if let Some(size) = self.udp_size {
            let mut announced = query.clone();
            let edns = announced
                .extensions_mut()
                .get_or_insert_with(hickory_proto::op::Edns::new);
            if edns.max_payload() < size {
                edns.set_max_payload(size);
            }
            self.pipeline.exchange(&announced).await
        } else {
            self.pipeline.exchange(query).await
        };
        match response {
            Ok(msg) => Ok(Some(msg)),
            Err(err) => {
                self.failures.inc();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::udp::UdpDialer;
    use super::*;
    use crate::test_util::{client, query};
    use hickory_proto::op::MessageType;
    use hickory_proto::rr::RecordType;
    use tokio::net::UdpSocket;

    /// Loopback upstream echoing every query back as an empty NOERROR
    /// response, preserving the wire id.
    async fn spawn_echo_upstream() -> std::net::SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(mut msg) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                msg.set_message_type(MessageType::Response);
                let _ = socket.send_to(&msg.to_vec().unwrap(), peer).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn exchange_restores_query_id() {
        let upstream = spawn_echo_upstream().await;
        let resolver = PipelineClient::new("udp-test", Box::new(UdpDialer::new(upstream)), None);
        let q = query("example.com.", RecordType::A);
        let response = resolver.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.id(), q.id());
        assert_eq!(response.queries(), q.queries());
    }

    #[tokio::test]
    async fn concurrent_queries_share_one_connection() {
        let upstream = spawn_echo_upstream().await;
        let resolver = Arc::new(PipelineClient::new(
            "udp-concurrent",
            Box::new(UdpDialer::new(upstream)),
            None,
        ));
        let mut tasks = Vec::new();
        for i in 0..20 {
            let resolver = Arc::clone(&resolver);
            tasks.push(tokio::spawn(async move {
                let q = query(&format!("host{}.example.com.", i), RecordType::A);
                let response = resolver.resolve(&q, &client()).await.unwrap().unwrap();
                assert_eq!(response.id(), q.id());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_times_out() {
        // Blackhole: a bound socket nobody reads responses from.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        std::mem::forget(socket);
        let resolver = PipelineClient::with_timeout(
            "udp-timeout",
            Box::new(UdpDialer::new(addr)),
            None,
            Duration::from_millis(200),
        );
        let q = query("example.com.", RecordType::A);
        match resolver.resolve(&q, &client()).await {
            Err(ResolveError::Timeout(_)) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }
}
