//! TCP link to the relay process.
//!
//! Outbound `RelayRequest`s come from the scheduler through an unbounded
//! channel; inbound `RelayEvent`s are forwarded into the DaemonCore loop.
//! Delivery is at most once: requests issued while the link is down are
//! dropped, never replayed after a reconnect.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voicecast_proto::protocol::{RelayMessage, RelayRequest};

use crate::core::DaemonEvent;

enum SessionEnd {
    /// Socket closed or failed; try again later.
    Lost,
    /// The request channel closed; the daemon is going away.
    Shutdown,
}

pub fn start_link(
    address: String,
    reconnect_delay: Duration,
    mut requests: mpsc::UnboundedReceiver<RelayRequest>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    info!("relay: connected to {}", address);
                    match run_session(stream, &mut requests, &event_tx).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost => warn!("relay: link to {} lost", address),
                    }
                }
                Err(e) => debug!("relay: connect to {} failed: {}", address, e),
            }

            let retry = tokio::time::sleep(reconnect_delay);
            tokio::pin!(retry);
            loop {
                tokio::select! {
                    _ = &mut retry => break,
                    request = requests.recv() => match request {
                        Some(request) => warn!("relay: link down, dropping {:?}", request),
                        None => return,
                    },
                }
            }
        }
    })
}

async fn run_session(
    stream: TcpStream,
    requests: &mut mpsc::UnboundedReceiver<RelayRequest>,
    event_tx: &mpsc::Sender<DaemonEvent>,
) -> SessionEnd {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => return SessionEnd::Lost,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        while voicecast_proto::protocol::has_complete_frame(&read_buf) {
                            match RelayMessage::decode(&read_buf) {
                                Ok((RelayMessage::Event(event), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("relay: event {:?}", event);
                                    if event_tx.send(DaemonEvent::Relay(event)).await.is_err() {
                                        return SessionEnd::Shutdown;
                                    }
                                }
                                Ok((RelayMessage::Request(request), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("relay: ignoring inbound request {:?}", request);
                                }
                                Err(e) => {
                                    warn!("relay: undecodable frame: {}", e);
                                    return SessionEnd::Lost;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("relay: read error: {}", e);
                        return SessionEnd::Lost;
                    }
                }
            }

            request = requests.recv() => {
                let Some(request) = request else {
                    return SessionEnd::Shutdown;
                };
                let encoded = match RelayMessage::Request(request.clone()).encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        warn!("relay: cannot encode {:?}: {}", request, e);
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(&encoded).await {
                    warn!("relay: {:?} not delivered: {}", request, e);
                    return SessionEnd::Lost;
                }
                info!("relay: sent {:?}", request);
            }
        }
    }
}
