use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use party_proto::protocol::{ClientEvent, ServerEvent};
use party_proto::state::StateManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Drive one WebSocket client until it goes away: greet it, forward its
/// requests into the core and stream broadcast events back out.
pub async fn handle_client(
    socket: WebSocket,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    info!("Client {} connected", client_id);
    let (mut sink, mut stream) = socket.split();

    for event in greeting(&state_manager).await {
        if send_event(&mut sink, &event).await.is_err() {
            return;
        }
    }
    if event_tx.send(DaemonEvent::ClientConnected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error from client {}: {}", client_id, e);
                        break;
                    }
                };

                let request = match ClientEvent::decode(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!("Client {} sent bad request: {}", client_id, e);
                        if send_event(&mut sink, &ServerEvent::Error(e.to_string())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                debug!("Client {} sent {:?}", client_id, request);

                match forward(&event_tx, request).await {
                    Ok(Some(response)) => {
                        if send_event(&mut sink, &response).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(()) => {
                        warn!("DaemonEvent channel closed");
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let event = match msg {
                    Ok(BroadcastMessage::Party(event)) => event,
                    Ok(BroadcastMessage::Log(line)) => ServerEvent::Log(line),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        // Resync with the current record.
                        let mut failed = false;
                        for event in greeting(&state_manager).await {
                            if send_event(&mut sink, &event).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Client {} disconnected", client_id);
}

/// Hand a request to the core.  `requestConfig` / `requestState` are answered
/// to this client only; everything else is observed through broadcasts.
pub async fn forward(
    event_tx: &mpsc::Sender<DaemonEvent>,
    request: ClientEvent,
) -> Result<Option<ServerEvent>, ()> {
    let wants_reply = matches!(request, ClientEvent::RequestConfig | ClientEvent::RequestState);
    if !wants_reply {
        return event_tx
            .send(DaemonEvent::ClientRequest {
                request,
                reply: None,
            })
            .await
            .map(|_| None)
            .map_err(|_| ());
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    event_tx
        .send(DaemonEvent::ClientRequest {
            request,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| ())?;
    reply_rx.await.map(Some).map_err(|_| ())
}

/// Events every client receives on connect.
async fn greeting(state_manager: &StateManager) -> Vec<ServerEvent> {
    let state = state_manager.get_state().await;
    vec![
        ServerEvent::InitialConfig(state.config),
        ServerEvent::ChangeStream {
            stream: state.session.current_stream,
            started_at_ms: state.session.current_stream_start,
        },
    ]
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match event.encode() {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not encode {} event: {}", event.event_name(), e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
