//! UDP dialer for the pipelined client.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::{Dialer, MsgRead, MsgWrite};
use crate::error::Result;
use crate::ResolveError;

/// Dials a connected UDP socket; both halves share it.
pub struct UdpDialer {
    remote: SocketAddr,
}

impl UdpDialer {
    pub fn new(remote: SocketAddr) -> Self {
        UdpDialer { remote }
    }
}

#[async_trait]
impl Dialer for UdpDialer {
    async fn dial(&self) -> Result<(Box<dyn MsgWrite>, Box<dyn MsgRead>)> {
        let bind_addr = if self.remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.remote).await?;
        let socket = Arc::new(socket);
        Ok((
            Box::new(UdpHalf(Arc::clone(&socket))),
            Box::new(UdpHalf(socket)),
        ))
    }
}

struct UdpHalf(Arc<UdpSocket>);

#[async_trait]
impl MsgWrite for UdpHalf {
    async fn write_msg(&mut self, wire: &[u8]) -> Result<()> {
        let sent = self.0.send(wire).await?;
        if sent != wire.len() {
            return Err(ResolveError::transport("short datagram write"));
        }
        Ok(())
    }
}

#[async_trait]
impl MsgRead for UdpHalf {
    async fn read_msg(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        let len = self.0.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }
}
