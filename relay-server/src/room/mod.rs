//! Room runtime: one upstream chat session per key, fanned out to local
//! subscribers.

pub mod registry;

pub use registry::{RoomRegistry, room_key};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as SubscriberMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use platforms::danmaku::{Danmaku, DanmuProtocol};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_tungstenite::tungstenite::protocol::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Deadline for close-frame writes, upstream and subscriber alike.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type UpstreamSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, UpstreamMessage>;
type UpstreamStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SubscriberSink = SplitSink<WebSocket, SubscriberMessage>;
type SubscriberStream = SplitStream<WebSocket>;

#[derive(Clone)]
struct Subscriber {
    sender: Arc<Mutex<SubscriberSink>>,
}

/// A live upstream chat session and its local subscribers.
///
/// Lifecycle: created by the registry on the first subscription, connected
/// when [`connect`] is first called, and torn down by [`close`] when the
/// subscriber set empties or the upstream session fails. `close` is terminal;
/// every operation afterwards is a no-op.
///
/// [`connect`]: Room::connect
/// [`close`]: Room::close
pub struct Room {
    key: String,
    protocol: Arc<dyn DanmuProtocol>,
    registry: Arc<RoomRegistry>,
    /// Trips the reader and heartbeat tasks on close.
    cancel: CancellationToken,
    closed: AtomicBool,
    /// Write half of the upstream socket; writes (auth, heartbeat, close
    /// frame) are serialized through the inner mutex.
    upstream: Mutex<Option<Arc<Mutex<UpstreamSink>>>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl Room {
    pub(crate) fn new(
        key: String,
        protocol: Arc<dyn DanmuProtocol>,
        registry: Arc<RoomRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            protocol,
            registry,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            upstream: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Install a local subscriber and spawn its watcher task.
    ///
    /// Returns the socket back untouched when the room is already tearing
    /// down, so the caller can retry against a fresh room.
    pub async fn add_subscriber(self: &Arc<Self>, socket: WebSocket) -> Option<WebSocket> {
        let (id, receiver) = {
            let mut subscribers = self.subscribers.lock().await;
            // close() drains the set under this lock after flagging, so a
            // subscriber inserted past this check is never lost.
            if self.is_closed() {
                return Some(socket);
            }

            let (sender, receiver) = socket.split();
            let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
            subscribers.insert(
                id,
                Subscriber {
                    sender: Arc::new(Mutex::new(sender)),
                },
            );
            (id, receiver)
        };

        info!(key = %self.key, id, "subscriber added");
        tokio::spawn(Arc::clone(self).watch_subscriber(id, receiver));
        None
    }

    /// Dial the upstream chat socket and start the reader and heartbeat
    /// tasks. Re-entrant calls are no-ops.
    pub async fn connect(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        let sink = {
            let mut upstream = self.upstream.lock().await;
            if upstream.is_some() {
                return;
            }

            let url = self.protocol.websocket_url();
            let stream = match connect_async(&url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(key = %self.key, error = %e, "failed to dial upstream chat socket");
                    drop(upstream);
                    self.close().await;
                    return;
                }
            };
            info!(key = %self.key, url = %url, "upstream chat socket connected");

            let (sink, reader) = stream.split();
            let sink = Arc::new(Mutex::new(sink));
            *upstream = Some(Arc::clone(&sink));

            // Reader starts before the handshake is sent so replies to the
            // auth frames are not missed.
            tokio::spawn(Arc::clone(self).read_loop(reader));
            sink
        };

        let frames = match self.protocol.handshake_messages() {
            Ok(frames) => frames,
            Err(e) => {
                error!(key = %self.key, error = %e, "failed to build handshake");
                self.close().await;
                return;
            }
        };
        for frame in frames {
            let result = { sink.lock().await.send(frame).await };
            if let Err(e) = result {
                error!(key = %self.key, error = %e, "handshake write failed");
                self.close().await;
                return;
            }
        }

        tokio::spawn(Arc::clone(self).heartbeat_loop(sink));
    }

    /// Fan one chat message out to every subscriber.
    ///
    /// Subscribers whose write fails are dropped; the rest keep receiving.
    /// An empty subscriber set triggers teardown.
    pub async fn send(self: &Arc<Self>, danmaku: Danmaku) {
        if self.is_closed() {
            return;
        }
        trace!(key = %self.key, text = %danmaku.text, "danmaku");

        let targets: Vec<(u64, Subscriber)> = {
            let subscribers = self.subscribers.lock().await;
            if subscribers.is_empty() {
                drop(subscribers);
                self.close().await;
                return;
            }
            subscribers.iter().map(|(id, s)| (*id, s.clone())).collect()
        };

        let Ok(payload) = serde_json::to_string(&danmaku) else {
            return;
        };

        let mut failed = Vec::new();
        for (id, subscriber) in targets {
            if self.is_closed() {
                return;
            }
            let result = {
                let mut sender = subscriber.sender.lock().await;
                sender
                    .send(SubscriberMessage::Text(payload.clone().into()))
                    .await
            };
            if let Err(e) = result {
                debug!(key = %self.key, id, error = %e, "subscriber write failed");
                failed.push(id);
            }
        }
        for id in failed {
            self.remove_subscriber(id).await;
        }
    }

    /// Drop one subscriber; tears the room down when the set empties.
    pub async fn remove_subscriber(self: &Arc<Self>, id: u64) {
        let (removed, now_empty) = {
            let mut subscribers = self.subscribers.lock().await;
            let removed = subscribers.remove(&id);
            (removed, subscribers.is_empty())
        };

        if let Some(subscriber) = removed {
            close_subscriber(&subscriber).await;
            info!(key = %self.key, id, "subscriber removed");
        }

        if now_empty && !self.is_closed() {
            self.close().await;
        }
    }

    /// Tear the room down. Idempotent and safe to call from any task.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop the reader and heartbeat before touching the socket.
        self.cancel.cancel();

        let upstream = { self.upstream.lock().await.take() };
        if let Some(sink) = upstream {
            let mut sink = sink.lock().await;
            let _ = timeout(
                CLOSE_WRITE_TIMEOUT,
                sink.send(UpstreamMessage::Close(None)),
            )
            .await;
        }

        let drained: Vec<Subscriber> = {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.drain().map(|(_, s)| s).collect()
        };
        for subscriber in drained {
            close_subscriber(&subscriber).await;
        }

        self.registry.remove(&self.key).await;
        info!(key = %self.key, "room closed");
    }

    /// Read upstream frames, decode them and fan the results out.
    async fn read_loop(self: Arc<Self>, mut reader: UpstreamStream) {
        let mut acc = Vec::new();

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = reader.next() => message,
            };

            let data = match message {
                Some(Ok(UpstreamMessage::Binary(data))) => data,
                Some(Ok(UpstreamMessage::Text(text))) => text.into(),
                Some(Ok(UpstreamMessage::Close(frame))) => {
                    if !self.is_closed() {
                        warn!(key = %self.key, ?frame, "upstream closed the chat socket");
                        self.close().await;
                    }
                    break;
                }
                Some(Ok(_)) => continue, // ping/pong
                Some(Err(e)) => {
                    // Read errors after close are expected; stay silent.
                    if !self.is_closed() {
                        error!(key = %self.key, error = %e, "upstream read failed");
                        self.close().await;
                    }
                    break;
                }
                None => {
                    if !self.is_closed() {
                        warn!(key = %self.key, "upstream chat socket ended");
                        self.close().await;
                    }
                    break;
                }
            };

            match self.protocol.decode(&data, &mut acc) {
                Ok(items) => {
                    for danmaku in items {
                        self.send(danmaku).await;
                    }
                }
                Err(e) => {
                    if !self.is_closed() {
                        error!(key = %self.key, error = %e, "upstream decode failed");
                        self.close().await;
                    }
                    break;
                }
            }
        }

        debug!(key = %self.key, "reader exited");
    }

    /// Write the platform's keep-alive frame on its cadence; a failed write
    /// is the liveness signal that the connection is dead.
    async fn heartbeat_loop(self: Arc<Self>, sink: Arc<Mutex<UpstreamSink>>) {
        let period = self.protocol.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let result = {
                        let mut sink = sink.lock().await;
                        sink.send(self.protocol.heartbeat_message()).await
                    };
                    if let Err(e) = result {
                        if !self.is_closed() {
                            error!(key = %self.key, error = %e, "heartbeat write failed");
                            self.close().await;
                        }
                        break;
                    }
                    trace!(key = %self.key, "heartbeat sent");
                }
            }
        }

        debug!(key = %self.key, "heartbeat exited");
    }

    /// Read-and-discard on a subscriber socket; a read error or close frame
    /// is how a departed subscriber surfaces.
    async fn watch_subscriber(self: Arc<Self>, id: u64, mut receiver: SubscriberStream) {
        loop {
            match receiver.next().await {
                Some(Ok(SubscriberMessage::Close(_))) => {
                    let subscriber = { self.subscribers.lock().await.get(&id).cloned() };
                    if let Some(subscriber) = subscriber {
                        close_subscriber(&subscriber).await;
                    }
                    debug!(key = %self.key, id, "subscriber sent close frame");
                    self.remove_subscriber(id).await;
                    break;
                }
                Some(Ok(_)) => continue, // discard
                Some(Err(_)) | None => {
                    self.remove_subscriber(id).await;
                    break;
                }
            }
        }
    }
}

/// Best-effort close-frame write with the shared deadline.
async fn close_subscriber(subscriber: &Subscriber) {
    let _ = timeout(CLOSE_WRITE_TIMEOUT, async {
        let mut sender = subscriber.sender.lock().await;
        sender.send(SubscriberMessage::Close(None)).await
    })
    .await;
}
