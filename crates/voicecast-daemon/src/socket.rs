use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use voicecast_proto::protocol::{has_complete_frame, Broadcast, Message, PROTOCOL_VERSION};
use voicecast_proto::state::StateManager;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Control socket listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

/// Accept control clients until the listener fails for good.
pub async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello with the current status snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while has_complete_frame(&read_buf) {
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);

                                    let (reply_tx, reply_rx) = oneshot::channel();
                                    if event_tx.send(DaemonEvent::ClientCommand(cmd, reply_tx)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                    let reply = reply_rx.await.unwrap_or_else(|_| Broadcast::Reply {
                                        ok: false,
                                        message: "daemon is shutting down".to_string(),
                                    });
                                    if let Ok(encoded) = Message::Broadcast(reply).encode() {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(e) => {
                                    warn!("Client {} sent an undecodable frame: {}", client_id, e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(BroadcastMessage::StatusUpdated) => {
                        if let Ok(encoded) = encode_status(&state_manager).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        let broadcast = Broadcast::Log { message };
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_status(&state_manager).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let status = state_manager.get_status().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        status,
    })
    .encode()
}

async fn encode_status(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let status = state_manager.get_status().await;
    Message::Broadcast(Broadcast::Status { data: status }).encode()
}
