//! Trade Updates WebSocket Client
//!
//! Connects to Alpaca's trade updates stream for order events (fills,
//! cancellations, rejections). One connection backs one subscription; the
//! session manager opens a new one after every reconnect.
//!
//! # Protocol
//!
//! 1. Connect to `wss://{paper-,}api.alpaca.markets/stream`
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `{"stream":"authorization","data":{"status":"authorized",...}}`
//! 4. Send `{"action":"listen","data":{"streams":["trade_updates"]}}`
//! 5. Receive `{"stream":"listening",...}`, then `trade_updates` messages
//!
//! Alpaca sends the JSON in binary frames; text frames are accepted too.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::api_types::{ListenRequest, StreamAuthRequest, StreamMessage};
use super::error::AlpacaError;
use crate::application::ports::BrokerStreamEvent;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_BUFFER: usize = 1024;

/// Open an authenticated `trade_updates` subscription.
///
/// # Errors
///
/// Returns an error if the connection, authentication or listen handshake fails.
pub async fn open_trade_updates(
    url: &str,
    key: &str,
    secret: &str,
) -> Result<mpsc::Receiver<BrokerStreamEvent>, AlpacaError> {
    tracing::info!(url, "Connecting to trade updates stream");

    let (mut socket, _response) = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::connect_async(url),
    )
    .await
    .map_err(|_| AlpacaError::Timeout("stream connect".to_string()))?
    .map_err(|e| AlpacaError::Stream(e.to_string()))?;

    send_json(
        &mut socket,
        &StreamAuthRequest {
            action: "auth",
            key,
            secret,
        },
    )
    .await?;
    match next_control(&mut socket).await? {
        StreamMessage::Authorization { status } if status == "authorized" => {}
        StreamMessage::Authorization { status } => {
            return Err(AlpacaError::AuthenticationFailed(format!(
                "trade updates: {status}"
            )));
        }
        other => {
            return Err(AlpacaError::Stream(format!(
                "expected authorization, got {other:?}"
            )));
        }
    }

    send_json(&mut socket, &ListenRequest::trade_updates()).await?;
    match next_control(&mut socket).await? {
        StreamMessage::Listening { streams } if streams.iter().any(|s| s == "trade_updates") => {
            tracing::info!(?streams, "Listening to trade updates");
        }
        other => {
            return Err(AlpacaError::Stream(format!(
                "expected listening confirmation, got {other:?}"
            )));
        }
    }

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(pump(socket, tx));
    Ok(rx)
}

async fn send_json<T: serde::Serialize + Sync>(
    socket: &mut Socket,
    message: &T,
) -> Result<(), AlpacaError> {
    let json = serde_json::to_string(message).map_err(|e| AlpacaError::JsonParse(e.to_string()))?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| AlpacaError::Stream(e.to_string()))
}

/// Wait for the next decodable message during the handshake.
async fn next_control(socket: &mut Socket) -> Result<StreamMessage, AlpacaError> {
    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .map_err(|_| AlpacaError::Timeout("stream handshake".to_string()))?;
        match frame {
            Some(Ok(message)) => {
                if let Some(text) = frame_text(&message) {
                    return decode(&text);
                }
            }
            Some(Err(e)) => return Err(AlpacaError::Stream(e.to_string())),
            None => return Err(AlpacaError::Stream("closed during handshake".to_string())),
        }
    }
}

fn frame_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(data) => String::from_utf8(data.to_vec()).ok(),
        _ => None,
    }
}

fn decode(text: &str) -> Result<StreamMessage, AlpacaError> {
    serde_json::from_str(text).map_err(|e| AlpacaError::JsonParse(e.to_string()))
}

/// Forward trade updates until the socket ends or the subscriber goes away.
async fn pump(mut socket: Socket, tx: mpsc::Sender<BrokerStreamEvent>) {
    let reason = loop {
        let Some(frame) = socket.next().await else {
            break "stream ended".to_string();
        };
        let message = match frame {
            Ok(message) => message,
            Err(e) => break e.to_string(),
        };
        match &message {
            Message::Ping(data) => {
                if let Err(e) = socket.send(Message::Pong(data.clone())).await {
                    break e.to_string();
                }
                continue;
            }
            Message::Close(_) => break "server closed the stream".to_string(),
            _ => {}
        }
        let Some(text) = frame_text(&message) else {
            continue;
        };

        let update = match decode(&text) {
            Ok(StreamMessage::TradeUpdates(data)) => match data.to_order_update() {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!(error = %e, event = %data.event, "Unparseable trade update");
                    continue;
                }
            },
            Ok(other) => {
                tracing::debug!(?other, "Ignoring control message");
                continue;
            }
            Err(e) => {
                tracing::trace!(error = %e, "Ignoring unknown stream message");
                continue;
            }
        };

        tracing::debug!(
            broker_order_id = %update.broker_order_id,
            status = ?update.status,
            filled = %update.filled_quantity,
            "Trade update received"
        );
        if tx.send(BrokerStreamEvent::Update(update)).await.is_err() {
            // Subscriber dropped; a newer subscription replaced this one
            let _ = socket.close(None).await;
            return;
        }
    };

    tracing::warn!(reason = %reason, "Trade updates stream disconnected");
    let _ = tx.send(BrokerStreamEvent::Disconnected { reason }).await;
}
