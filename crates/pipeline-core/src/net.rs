//! UDP ingress.
//!
//! Bridges sockets to endpoint writers. The receive task parses each
//! datagram on the network task and pushes it into the endpoint's
//! lock-free ring; it never waits for the pipeline.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use audiolink_packet_core::units::Nanos;

use crate::endpoint::IngressWriter;
use crate::error::Result;

/// Bind a socket for an endpoint address.
pub async fn bind(addr: std::net::SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    info!(addr = %socket.local_addr()?, "net: bound endpoint socket");
    Ok(socket)
}

/// Spawn the receive loop for one endpoint.
///
/// Runs until the socket errors or the task is aborted. Datagram
/// parsing and drop accounting happen inside the writer.
pub fn spawn_ingress(socket: UdpSocket, writer: IngressWriter, max_packet: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; max_packet];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    writer.write_datagram(&buf[..len], peer, wall_clock_ns());
                }
                Err(err) => {
                    debug!(%err, "net: endpoint receive loop terminating");
                    break;
                }
            }
        }
    })
}

fn wall_clock_ns() -> Nanos {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Interface;
    use crate::pipeline_loop::Receiver;
    use crate::config::ReceiverConfig;
    use audiolink_packet_core::rtp::EncodingMap;

    #[tokio::test]
    async fn test_ingress_feeds_endpoint() {
        let receiver = Receiver::new(ReceiverConfig::default(), EncodingMap::new()).unwrap();
        let slot = receiver.create_slot().unwrap();
        let writer = receiver
            .add_endpoint(
                slot,
                Interface::AudioSource,
                "rtp://127.0.0.1:0".parse().unwrap(),
            )
            .unwrap();

        let socket = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = spawn_ingress(socket, writer.clone(), 2_048);

        // A malformed datagram is counted, not fatal.
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&[0xde, 0xad], addr).await.unwrap();

        // Give the receive loop a moment.
        for _ in 0..50 {
            if writer.malformed() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(writer.malformed(), 1);

        handle.abort();
    }
}
