//! Broadcast router: topic-based fan-out of emitted measurements.
//!
//! Topics are independent: a subscriber to `subject:<id>` sees only that
//! subject's readings, the global topic sees everything published to it.
//! There is no replay; a late subscriber starts at the next publish.

use crate::types::{Measurement, SubjectId};
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};

const SUBJECT_PREFIX: &str = "subject:";
const GLOBAL_TOPIC: &str = "global";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Global,
    Subject(SubjectId),
}

impl Topic {
    pub fn subject(subject_id: impl Into<SubjectId>) -> Self {
        Self::Subject(subject_id.into())
    }

    /// Parse the wire name used by the transport layer.
    pub fn parse(name: &str) -> Option<Self> {
        if name == GLOBAL_TOPIC {
            return Some(Self::Global);
        }
        name.strip_prefix(SUBJECT_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Self::Subject(id.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(GLOBAL_TOPIC),
            Self::Subject(id) => write!(f, "{SUBJECT_PREFIX}{id}"),
        }
    }
}

pub struct BroadcastRouter {
    capacity: usize,
    topics: RwLock<HashMap<Topic, broadcast::Sender<Arc<Measurement>>>>,
}

impl BroadcastRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Publish to one topic. Returns how many subscribers received it;
    /// publishing to a topic nobody has joined is a silent no-op.
    pub fn publish(&self, topic: &Topic, measurement: Arc<Measurement>) -> usize {
        let topics = match self.topics.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match topics.get(topic) {
            Some(sender) => sender.send(measurement).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> Subscription {
        let mut topics = match self.topics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let receiver = topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        log::debug!("New subscriber on {topic}");
        Subscription {
            topic: topic.clone(),
            receiver,
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let topics = match self.topics.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics.get(topic).map_or(0, |s| s.receiver_count())
    }

    /// Drop topics whose subscribers have all gone away.
    pub fn prune(&self) -> usize {
        let mut topics = match self.topics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new(crate::config::RouterConfig::default().channel_capacity)
    }
}

/// A live subscription to one topic.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<Arc<Measurement>>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next measurement, or `None` once the topic is gone.
    /// A subscriber that fell behind skips to the oldest retained value.
    pub async fn recv(&mut self) -> Option<Arc<Measurement>> {
        loop {
            match self.receiver.recv().await {
                Ok(m) => return Some(m),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Subscriber on {} lagged, skipped {skipped} measurements", self.topic);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<Measurement>> {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|m| (m, sub))
        })
    }
}
