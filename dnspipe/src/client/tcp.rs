//! TCP dialer with RFC 1035 2-byte length framing.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Dialer, MsgRead, MsgWrite};
use crate::error::Result;
use crate::ResolveError;

pub struct TcpDialer {
    remote: SocketAddr,
}

impl TcpDialer {
    pub fn new(remote: SocketAddr) -> Self {
        TcpDialer { remote }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<(Box<dyn MsgWrite>, Box<dyn MsgRead>)> {
        let stream = TcpStream::connect(self.remote).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok((
            Box::new(FramedWrite(write)),
            Box::new(FramedRead(read)),
        ))
    }
}

pub(crate) struct FramedWrite<W>(pub(crate) W);
pub(crate) struct FramedRead<R>(pub(crate) R);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MsgWrite for FramedWrite<W> {
    async fn write_msg(&mut self, wire: &[u8]) -> Result<()> {
        write_frame(&mut self.0, wire).await
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MsgRead for FramedRead<R> {
    async fn read_msg(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.0).await
    }
}

/// Write one length-prefixed DNS message.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, wire: &[u8]) -> Result<()> {
    if wire.len() > u16::MAX as usize {
        return Err(ResolveError::transport("message exceeds frame size"));
    }
    writer.write_all(&(wire.len() as u16).to_be_bytes()).await?;
    writer.write_all(wire).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed DNS message.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 2];
    reader.read_exact(&mut len).await?;
    let len = u16::from_be_bytes(len) as usize;
    let mut wire = vec![0u8; len];
    reader.read_exact(&mut wire).await?;
    Ok(wire)
}
