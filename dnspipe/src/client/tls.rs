//! DoT dialer: TCP + TLS with the same 2-byte framing as plain TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::tcp::{FramedRead, FramedWrite};
use super::{Dialer, MsgRead, MsgWrite};
use crate::error::Result;
use crate::ResolveError;

pub struct TlsDialer {
    remote: SocketAddr,
    server_name: ServerName<'static>,
    config: Arc<rustls::ClientConfig>,
}

impl TlsDialer {
    /// `server_name` is the hostname presented for SNI and certificate
    /// verification; `remote` may come from a bootstrap lookup.
    pub fn new(remote: SocketAddr, server_name: &str, config: Arc<rustls::ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ResolveError::config(format!("invalid TLS server name {}", server_name)))?;
        Ok(TlsDialer {
            remote,
            server_name,
            config,
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self) -> Result<(Box<dyn MsgWrite>, Box<dyn MsgRead>)> {
        let stream = TcpStream::connect(self.remote).await?;
        stream.set_nodelay(true)?;
        let connector = TlsConnector::from(Arc::clone(&self.config));
        let tls = connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| ResolveError::transport(format!("tls handshake: {}", e)))?;
        let (read, write) = tokio::io::split(tls);
        Ok((Box::new(FramedWrite(write)), Box::new(FramedRead(read))))
    }
}
