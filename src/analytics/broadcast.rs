//! Live view-count fan-out to WebSocket subscribers
//!
//! A single coordinator task owns the subscriber set and the latest aggregate
//! per channel. Everything else talks to it through one ordered mailbox, so
//! registration, removal and fan-out never need a lock. Each subscriber has a
//! bounded outbound queue; a subscriber whose queue is full is dropped rather
//! than the frame, and dropping its sender is what tells its writer to close.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::models::Aggregate;

pub const GLOBAL_CHANNEL: &str = "global";

/// Capacity of the coordinator mailbox
const MAILBOX_CAPACITY: usize = 1024;

/// A serialized server-to-client frame, shared by every recipient
pub type Frame = Arc<str>;

/// Broadcast channel for a page: `"global"` for the empty page, else `"page:<page>"`
pub fn channel_for(page: &str) -> String {
    if page.is_empty() {
        GLOBAL_CHANNEL.to_string()
    } else {
        format!("page:{page}")
    }
}

#[derive(Serialize)]
struct ViewCountsFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    channel: &'a str,
    data: &'a Aggregate,
}

fn encode_frame(channel: &str, aggregate: &Aggregate) -> serde_json::Result<Frame> {
    let json = serde_json::to_string(&ViewCountsFrame {
        kind: "view_counts",
        channel,
        data: aggregate,
    })?;
    Ok(Arc::from(json))
}

/// Channels a subscriber wants. Empty means every channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSet(HashSet<String>);

impl ChannelSet {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a comma-separated channel list such as `global,page:/blog`
    pub fn from_query(channels: Option<&str>) -> Self {
        Self(
            channels
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn accepts(&self, channel: &str) -> bool {
        self.0.is_empty() || self.0.contains(channel)
    }
}

struct Subscriber {
    id: u64,
    channels: ChannelSet,
    queue: mpsc::Sender<Frame>,
}

/// Message types for the coordinator
enum CoordinatorMessage {
    /// Add a subscriber and replay the latest frame of each channel it accepts
    Register {
        subscriber: Subscriber,
        ack: oneshot::Sender<()>,
    },
    /// Remove a subscriber, closing its outbound queue
    Unregister(u64),
    /// Record the latest aggregate for a channel and fan it out
    Broadcast { channel: String, aggregate: Aggregate },
}

struct Coordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    subscribers: HashMap<u64, Subscriber>,
    latest_by_channel: BTreeMap<String, Aggregate>,
}

impl Coordinator {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                CoordinatorMessage::Register { subscriber, ack } => {
                    self.register(subscriber);
                    let _ = ack.send(());
                }
                CoordinatorMessage::Unregister(id) => {
                    if self.subscribers.remove(&id).is_some() {
                        debug!(subscriber = id, "subscriber unregistered");
                    }
                }
                CoordinatorMessage::Broadcast { channel, aggregate } => {
                    self.broadcast(channel, aggregate);
                }
            }
        }

        info!(
            subscribers = self.subscribers.len(),
            "broadcast coordinator stopped"
        );
    }

    fn register(&mut self, subscriber: Subscriber) {
        for (channel, aggregate) in &self.latest_by_channel {
            if !subscriber.channels.accepts(channel) {
                continue;
            }
            let frame = match encode_frame(channel, aggregate) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(channel = %channel, error = %e, "failed to encode latest frame");
                    continue;
                }
            };
            if subscriber.queue.try_send(frame).is_err() {
                warn!(subscriber = subscriber.id, "outbound queue rejected initial frames, dropping subscriber");
                return;
            }
        }

        debug!(subscriber = subscriber.id, "subscriber registered");
        self.subscribers.insert(subscriber.id, subscriber);
    }

    fn broadcast(&mut self, channel: String, aggregate: Aggregate) {
        self.latest_by_channel.insert(channel.clone(), aggregate);

        let frame = match encode_frame(&channel, &aggregate) {
            Ok(frame) => frame,
            Err(e) => {
                error!(channel = %channel, error = %e, "failed to encode frame, dropping publish");
                return;
            }
        };

        self.subscribers.retain(|id, subscriber| {
            if !subscriber.channels.accepts(&channel) {
                return true;
            }
            match subscriber.queue.try_send(Arc::clone(&frame)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = *id, channel = %channel, "outbound queue full, dropping subscriber");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = *id, "outbound queue closed, dropping subscriber");
                    false
                }
            }
        });
    }
}

/// Receiving side of a registered subscriber
pub struct SubscriberHandle {
    pub id: u64,
    pub frames: mpsc::Receiver<Frame>,
}

/// Cloneable handle to the coordinator task
#[derive(Clone)]
pub struct Broadcaster {
    sender: mpsc::Sender<CoordinatorMessage>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Broadcaster {
    /// Spawn the coordinator. It runs until every `Broadcaster` clone is dropped.
    pub fn spawn(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);

        let coordinator = Coordinator {
            receiver,
            subscribers: HashMap::new(),
            latest_by_channel: BTreeMap::new(),
        };

        let handle = tokio::spawn(async move {
            coordinator.run().await;
        });

        (
            Self {
                sender,
                next_id: Arc::new(AtomicU64::new(1)),
                queue_capacity: queue_capacity.max(1),
            },
            handle,
        )
    }

    /// Register a subscriber. Returns once the latest frames for its channels
    /// are queued, or `None` if the coordinator is gone.
    pub async fn subscribe(&self, channels: ChannelSet) -> Option<SubscriberHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, frames) = mpsc::channel(self.queue_capacity);
        let (ack, acked) = oneshot::channel();

        let subscriber = Subscriber {
            id,
            channels,
            queue,
        };
        self.sender
            .send(CoordinatorMessage::Register { subscriber, ack })
            .await
            .ok()?;
        acked.await.ok()?;

        Some(SubscriberHandle { id, frames })
    }

    pub async fn unsubscribe(&self, id: u64) {
        if self
            .sender
            .send(CoordinatorMessage::Unregister(id))
            .await
            .is_err()
        {
            debug!(subscriber = id, "coordinator gone during unsubscribe");
        }
    }

    /// Publish the aggregate for `page` to its channel. Best effort.
    pub async fn publish(&self, aggregate: Aggregate, page: &str) {
        let channel = channel_for(page);
        if self
            .sender
            .send(CoordinatorMessage::Broadcast { channel, aggregate })
            .await
            .is_err()
        {
            warn!(page = %page, "broadcast coordinator unavailable, dropping publish");
        }
    }
}
