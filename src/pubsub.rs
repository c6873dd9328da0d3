//! Pub/sub channels over a websocket connection.
//!
//! One connection per [`PubsubContainer`]; a spawned task owns the
//! socket and fans incoming frames out to per-channel subscribers.
//! Client frames are `{"action": "sub"|"unsub"|"pub", "channel", "data"?}`;
//! server frames are `{"channel", "data"}`. Delivery guarantees are the
//! server's concern, not this module's.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{Error, InvalidInputError, TransportError};

/// A connection lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubsubEvent {
    /// The connection is open. Delivered immediately on registration
    /// while the connection is live.
    Open,
    /// The connection has closed, by either side or by error.
    Closed,
}

#[derive(Debug, Serialize)]
struct ClientFrame<'a> {
    action: &'a str,
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Json>,
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    channel: String,
    #[serde(default)]
    data: Json,
}

enum Command {
    Subscribe {
        channel: String,
        id: u64,
        tx: mpsc::UnboundedSender<Json>,
    },
    Unsubscribe {
        channel: String,
        id: u64,
    },
    Publish {
        channel: String,
        data: Json,
    },
    Lifecycle {
        tx: mpsc::UnboundedSender<PubsubEvent>,
    },
    Close,
}

/// A live pub/sub connection.
///
/// Obtained via [`Container::connect_pubsub`](crate::Container::connect_pubsub).
/// Cheap to clone; clones share the connection. Dropping every clone and
/// subscription closes the socket.
#[derive(Clone)]
pub struct PubsubContainer {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl PubsubContainer {
    /// Connect to a pub/sub websocket endpoint.
    #[instrument]
    pub(crate) async fn connect(ws_url: &str) -> Result<Self, Error> {
        info!("Connecting to pub/sub");
        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Transport(TransportError::WebSocket {
                message: e.to_string(),
            })
        })?;
        debug!("WebSocket connected");

        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(ws_stream, commands_rx));

        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Subscribe to a channel.
    ///
    /// The first subscription to a channel sends a `sub` frame; further
    /// subscriptions share it. Messages published to the channel arrive
    /// on the returned handle until it is cancelled or dropped.
    pub fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, Error> {
        validate_channel(channel)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.send_command(Command::Subscribe {
            channel: channel.to_string(),
            id,
            tx,
        })?;
        Ok(ChannelSubscription {
            channel: channel.to_string(),
            id,
            rx,
            commands: self.commands.clone(),
        })
    }

    /// Publish a JSON message to a channel.
    ///
    /// The connection does not need a subscription to the channel to
    /// publish to it.
    pub fn publish(&self, channel: &str, data: Json) -> Result<(), Error> {
        validate_channel(channel)?;
        self.send_command(Command::Publish {
            channel: channel.to_string(),
            data,
        })
    }

    /// Subscribe to connection lifecycle events.
    ///
    /// Delivers [`PubsubEvent::Open`] immediately while the connection is
    /// live, and [`PubsubEvent::Closed`] once it ends.
    pub fn lifecycle(&self) -> Result<mpsc::UnboundedReceiver<PubsubEvent>, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send_command(Command::Lifecycle { tx })?;
        Ok(rx)
    }

    /// Close the connection. Subscriptions stop receiving and lifecycle
    /// subscribers observe [`PubsubEvent::Closed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    fn send_command(&self, command: Command) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| {
            Error::Transport(TransportError::WebSocket {
                message: "pub/sub connection is closed".to_string(),
            })
        })
    }
}

impl std::fmt::Debug for PubsubContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubsubContainer").finish_non_exhaustive()
    }
}

/// A subscription to one pub/sub channel.
///
/// Dropping the handle unsubscribes; [`ChannelSubscription::cancel`]
/// does so eagerly. The server `unsub` frame is only sent once the last
/// subscription to the channel detaches.
pub struct ChannelSubscription {
    channel: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Json>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelSubscription {
    /// The channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next message. Returns `None` once the connection has
    /// closed and pending messages are drained.
    pub async fn recv(&mut self) -> Option<Json> {
        self.rx.recv().await
    }

    /// Receive without waiting, if a message is already queued.
    pub fn try_recv(&mut self) -> Option<Json> {
        self.rx.try_recv().ok()
    }

    /// Detach this subscription from the connection.
    pub fn cancel(self) {}
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            channel: std::mem::take(&mut self.channel),
            id: self.id,
        });
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

fn validate_channel(channel: &str) -> Result<(), Error> {
    if channel.is_empty() {
        return Err(InvalidInputError::Other {
            message: "channel name must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// The connection task: owns the socket, routes commands out and frames
/// in, until either side closes.
async fn run_connection(ws_stream: WsStream, mut commands: mpsc::UnboundedReceiver<Command>) {
    let (mut write, mut read) = ws_stream.split();
    let mut channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Json>)>> = HashMap::new();
    let mut lifecycle: Vec<mpsc::UnboundedSender<PubsubEvent>> = Vec::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Close) => {
                    debug!("Closing pub/sub connection");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Some(Command::Subscribe { channel, id, tx }) => {
                    let listeners = channels.entry(channel.clone()).or_default();
                    let first = listeners.is_empty();
                    listeners.push((id, tx));
                    if first
                        && send_frame(&mut write, "sub", &channel, None).await.is_err()
                    {
                        break;
                    }
                }
                Some(Command::Unsubscribe { channel, id }) => {
                    let Some(listeners) = channels.get_mut(&channel) else {
                        continue;
                    };
                    listeners.retain(|(sid, _)| *sid != id);
                    if listeners.is_empty() {
                        channels.remove(&channel);
                        if send_frame(&mut write, "unsub", &channel, None).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Command::Publish { channel, data }) => {
                    if send_frame(&mut write, "pub", &channel, Some(&data)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Lifecycle { tx }) => {
                    let _ = tx.send(PubsubEvent::Open);
                    lifecycle.push(tx);
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => dispatch(&mut channels, frame),
                        Err(e) => warn!(error = %e, "Discarding malformed pub/sub frame"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received ping");
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "WebSocket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
        }
    }

    for tx in lifecycle {
        let _ = tx.send(PubsubEvent::Closed);
    }
}

/// Deliver a server frame to the channel's listeners, pruning closed
/// ones.
fn dispatch(
    channels: &mut HashMap<String, Vec<(u64, mpsc::UnboundedSender<Json>)>>,
    frame: ServerFrame,
) {
    trace!(channel = %frame.channel, "Pub/sub message");
    let Some(listeners) = channels.get_mut(&frame.channel) else {
        return;
    };
    listeners.retain(|(_, tx)| tx.send(frame.data.clone()).is_ok());
}

async fn send_frame(
    write: &mut futures_util::stream::SplitSink<WsStream, Message>,
    action: &str,
    channel: &str,
    data: Option<&Json>,
) -> Result<(), ()> {
    let frame = ClientFrame {
        action,
        channel,
        data,
    };
    let text = serde_json::to_string(&frame).expect("frame serialization cannot fail");
    trace!(action, channel, "Sending pub/sub frame");
    write.send(Message::Text(text.into())).await.map_err(|e| {
        error!(error = %e, "Failed to send pub/sub frame");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_serialize_to_wire_shape() {
        let sub = ClientFrame {
            action: "sub",
            channel: "lobby",
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({"action": "sub", "channel": "lobby"})
        );

        let data = json!({"text": "hi"});
        let publish = ClientFrame {
            action: "pub",
            channel: "lobby",
            data: Some(&data),
        };
        assert_eq!(
            serde_json::to_value(&publish).unwrap(),
            json!({"action": "pub", "channel": "lobby", "data": {"text": "hi"}})
        );
    }

    #[test]
    fn server_frame_parses_and_defaults_data() {
        let frame: ServerFrame =
            serde_json::from_value(json!({"channel": "lobby", "data": {"n": 1}})).unwrap();
        assert_eq!(frame.channel, "lobby");
        assert_eq!(frame.data, json!({"n": 1}));

        let bare: ServerFrame = serde_json::from_value(json!({"channel": "lobby"})).unwrap();
        assert_eq!(bare.data, Json::Null);
    }

    #[test]
    fn dispatch_routes_by_channel_and_prunes_closed() {
        let mut channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Json>)>> =
            HashMap::new();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        drop(rx_dead);
        channels.insert("lobby".to_string(), vec![(0, tx_live), (1, tx_dead)]);

        dispatch(
            &mut channels,
            ServerFrame {
                channel: "lobby".to_string(),
                data: json!("hello"),
            },
        );

        assert_eq!(rx_live.try_recv().unwrap(), json!("hello"));
        assert_eq!(channels["lobby"].len(), 1);

        // Unknown channels are ignored
        dispatch(
            &mut channels,
            ServerFrame {
                channel: "other".to_string(),
                data: json!("x"),
            },
        );
    }

    #[test]
    fn empty_channel_name_is_rejected() {
        assert!(validate_channel("").is_err());
        assert!(validate_channel("lobby").is_ok());
    }
}
