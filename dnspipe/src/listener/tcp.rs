//! TCP and DoT listeners.
//!
//! Both speak RFC 1035 length-prefixed DNS over a stream; DoT simply
//! wraps the accepted connection in TLS first. Queries on one connection
//! are served in order; connections idle past the read deadline are
//! closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use super::Frontend;
use crate::client::tcp::{read_frame, write_frame};
use crate::error::Result;

/// Connections with no query for this long are dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind and serve plain TCP, or DoT when `tls` is given.
pub async fn serve(frontend: Arc<Frontend>, addr: SocketAddr, tls: Option<Arc<rustls::ServerConfig>>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!(
        "listener {}: serving {} on {}",
        frontend.id(),
        if tls.is_some() { "dot" } else { "tcp" },
        addr
    );
    serve_listener(frontend, listener, tls).await
}

pub async fn serve_listener(
    frontend: Arc<Frontend>,
    listener: TcpListener,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> Result<()> {
    let acceptor = tls.map(TlsAcceptor::from);
    loop {
        let (stream, source) = listener.accept().await?;
        let frontend = Arc::clone(&frontend);
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_stream(&frontend, tls_stream, source).await,
                    Err(err) => {
                        log::debug!("listener {}: tls accept from {} failed: {}", frontend.id(), source, err);
                        return;
                    }
                },
                None => serve_stream(&frontend, stream, source).await,
            };
            if let Err(err) = result {
                log::debug!("listener {}: connection from {} ended: {}", frontend.id(), source, err);
            }
        });
    }
}

async fn serve_stream<S: AsyncRead + AsyncWrite + Unpin + Send>(
    frontend: &Frontend,
    mut stream: S,
    source: SocketAddr,
) -> Result<()> {
    loop {
        let wire = match tokio::time::timeout(IDLE_TIMEOUT, read_frame(&mut stream)).await {
            Err(_) => return Ok(()),
            Ok(Err(_)) => return Ok(()), // peer closed
            Ok(Ok(wire)) => wire,
        };
        if let Some((response, _)) = frontend.handle_wire(&wire, source).await {
            write_frame(&mut stream, &response.to_vec()?).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerOptions;
    use crate::test_util::{a_response, query, MockResolver};
    use crate::Transport;
    use hickory_proto::op::Message;
    use hickory_proto::rr::RecordType;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn frames_roundtrip_over_tcp() {
        let q = query("tcp.example.com.", RecordType::A);
        let upstream = MockResolver::answering("up", a_response(&q, [5, 6, 7, 8], 60));
        let frontend = Frontend::new("tcp-test", upstream, Transport::Tcp, ListenerOptions::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_listener(frontend, listener, None));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &q.to_vec().unwrap()).await.unwrap();
        let wire = read_frame(&mut stream).await.unwrap();
        let response = Message::from_vec(&wire).unwrap();
        assert_eq!(response.id(), q.id());
        assert_eq!(response.answers().len(), 1);

        // The connection stays open for a second exchange.
        let mut q2 = q.clone();
        q2.set_id(q.id().wrapping_add(1));
        write_frame(&mut stream, &q2.to_vec().unwrap()).await.unwrap();
        let wire = read_frame(&mut stream).await.unwrap();
        assert_eq!(Message::from_vec(&wire).unwrap().id(), q2.id());
    }
}
