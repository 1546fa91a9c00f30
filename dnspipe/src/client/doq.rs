//! DoQ upstream client.
//!
//! One QUIC connection per upstream, one DNS message per bidirectional
//! stream (RFC 9250), each message carried in a 2-octet length frame. The
//! wire id is forced to 0 as the RFC requires and restored afterwards.
//! Stream concurrency replaces id-based pipelining here; the connection is
//! re-established lazily after failures, like the pipelined dialers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::sync::Mutex;

use super::REQUEST_TIMEOUT;
use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, ResolveError, Resolver};

pub struct DoqClient {
    id: String,
    remote: SocketAddr,
    server_name: String,
    endpoint: quinn::Endpoint,
    connection: Mutex<Option<quinn::Connection>>,
    timeout: Duration,
    queries: Arc<Counter>,
    failures: Arc<Counter>,
}

impl DoqClient {
    pub fn new(
        id: impl Into<String>,
        remote: SocketAddr,
        server_name: impl Into<String>,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self> {
        let id = id.into();
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid bind address")
        } else {
            "[::]:0".parse().expect("valid bind address")
        };
        let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| ResolveError::config(format!("quic tls config: {}", e)))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_tls));
        let mut endpoint = quinn::Endpoint::client(bind_addr)
            .map_err(|e| ResolveError::transport(format!("quic endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);
        let queries = Registry::global().counter(&format!("client.{}.query", id));
        let failures = Registry::global().counter(&format!("client.{}.failure", id));
        Ok(DoqClient {
            id,
            remote,
            server_name: server_name.into(),
            endpoint,
            connection: Mutex::new(None),
            timeout: REQUEST_TIMEOUT,
            queries,
            failures,
        })
    }

    /// Reuse the open connection when it is still healthy, otherwise dial a
    /// fresh one. The lock is held only while inspecting/storing the handle.
    async fn connection(&self) -> Result<quinn::Connection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }
        let connecting = self
            .endpoint
            .connect(self.remote, &self.server_name)
            .map_err(|e| ResolveError::transport(format!("quic connect: {}", e)))?;
        let conn = connecting.await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn exchange(&self, query: &Message) -> Result<Message> {
        let mut outgoing = query.clone();
        outgoing.set_id(0);
        let wire = outgoing.to_vec()?;

        let conn = self.connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;
        send.write_all(&(wire.len() as u16).to_be_bytes())
            .await
            .map_err(|e| ResolveError::transport(format!("quic write: {}", e)))?;
        send.write_all(&wire)
            .await
            .map_err(|e| ResolveError::transport(format!("quic write: {}", e)))?;
        send.finish()
            .map_err(|e| ResolveError::transport(format!("quic finish: {}", e)))?;

        let mut len = [0u8; 2];
        recv.read_exact(&mut len)
            .await
            .map_err(|e| ResolveError::transport(format!("quic read: {}", e)))?;
        let mut body = vec![0u8; u16::from_be_bytes(len) as usize];
        recv.read_exact(&mut body)
            .await
            .map_err(|e| ResolveError::transport(format!("quic read: {}", e)))?;

        let mut answer = Message::from_vec(&body)?;
        answer.set_id(query.id());
        if !message::questions_match(query, &answer) {
            return Err(ResolveError::protocol("response question does not match query"));
        }
        Ok(answer)
    }
}

#[async_trait]
impl Resolver for DoqClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
        self.queries.inc();
        match tokio::time::timeout(self.timeout, self.exchange(query)).await {
            Ok(Ok(msg)) => Ok(Some(msg)),
            Ok(Err(err)) => {
                self.failures.inc();
                Err(err)
            }
            Err(_) => {
                self.failures.inc();
                Err(ResolveError::timeout(format!(
                    "no response within {:?}",
                    self.timeout
                )))
            }
        }
    }
}
