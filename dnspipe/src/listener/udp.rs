//! Plain-DNS UDP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use super::Frontend;
use crate::error::Result;
use crate::message;

/// Bind and serve until the socket fails.
pub async fn serve(frontend: Arc<Frontend>, addr: SocketAddr) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    log::info!("listener {}: serving udp on {}", frontend.id(), addr);
    serve_socket(frontend, socket).await
}

/// Serve an already-bound socket. Each datagram is handled on its own task
/// so a slow pipeline never blocks the receive loop.
pub async fn serve_socket(frontend: Arc<Frontend>, socket: Arc<UdpSocket>) -> Result<()> {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, source) = socket.recv_from(&mut buf).await?;
        let wire = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let frontend = Arc::clone(&frontend);
        tokio::spawn(async move {
            let Some((response, udp_cap)) = frontend.handle_wire(&wire, source).await else {
                return;
            };
            match message::encode_for_udp(&response, udp_cap) {
                Ok(encoded) => {
                    if let Err(err) = socket.send_to(&encoded, source).await {
                        log::debug!("listener {}: send to {} failed: {}", frontend.id(), source, err);
                    }
                }
                Err(err) => {
                    log::warn!("listener {}: cannot encode response: {}", frontend.id(), err)
                }
            }
        });
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

    #[tokio::test]
    async fn end_to_end_over_loopback() {
        let q = query("udp.example.com.", RecordType::A);
        let upstream = MockResolver::answering("up", a_response(&q, [1, 2, 3, 4], 60));
        let frontend = Frontend::new("udp-test", upstream, Transport::Udp, ListenerOptions::default());

        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = server.local_addr().unwrap();
        tokio::spawn(serve_socket(frontend, server));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&q.to_vec().unwrap(), addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let response = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(response.id(), q.id());
        assert_eq!(response.answers().len(), 1);
    }
}
