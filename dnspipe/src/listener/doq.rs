//! DoQ listener (RFC 9250).
//!
//! One DNS message per bidirectional stream, 2-octet length framed. The
//! response id mirrors the query id (0 from conforming clients).

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;

use super::Frontend;
use crate::error::Result;
use crate::ResolveError;

pub async fn serve(frontend: Arc<Frontend>, addr: SocketAddr, tls: rustls::ServerConfig) -> Result<()> {
    let quic_tls = QuicServerConfig::try_from(tls)
        .map_err(|e| ResolveError::config(format!("quic tls config: {}", e)))?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));
    let endpoint = quinn::Endpoint::server(server_config, addr)
        .map_err(|e| ResolveError::transport(format!("quic endpoint: {}", e)))?;
    log::info!("listener {}: serving doq on {}", frontend.id(), addr);

    while let Some(incoming) = endpoint.accept().await {
        let frontend = Arc::clone(&frontend);
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(err) => {
                    log::debug!("listener {}: quic handshake failed: {}", frontend.id(), err);
                    return;
                }
            };
            let source = connection.remote_address();
            loop {
                let (send, recv) = match connection.accept_bi().await {
                    Ok(stream) => stream,
                    Err(_) => return, // connection closed
                };
                let frontend = Arc::clone(&frontend);
                tokio::spawn(async move {
                    if let Err(err) = serve_stream(&frontend, send, recv, source).await {
                        log::debug!("listener {}: doq stream from {} ended: {}", frontend.id(), source, err);
                    }
                });
            }
        });
    }
    Ok(())
}

async fn serve_stream(
    frontend: &Frontend,
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    source: SocketAddr,
) -> Result<()> {
    let mut len = [0u8; 2];
    recv.read_exact(&mut len)
        .await
        .map_err(|e| ResolveError::transport(format!("quic read: {}", e)))?;
    let mut wire = vec![0u8; u16::from_be_bytes(len) as usize];
    recv.read_exact(&mut wire)
        .await
        .map_err(|e| ResolveError::transport(format!("quic read: {}", e)))?;

    let Some((response, _)) = frontend.handle_wire(&wire, source).await else {
        return Ok(());
    };
    let encoded = response.to_vec()?;
    send.write_all(&(encoded.len() as u16).to_be_bytes())
        .await
        .map_err(|e| ResolveError::transport(format!("quic write: {}", e)))?;
    send.write_all(&encoded)
        .await
        .map_err(|e| ResolveError::transport(format!("quic write: {}", e)))?;
    send.finish()
        .map_err(|e| ResolveError::transport(format!("quic finish: {}", e)))?;
    Ok(())
}
