use crate::domain::models::{Topic, TopicId, TopicStatus};
use std::sync::Arc;
use tracing::debug;

/// Notified after the bridge changed a topic's status locally.
pub trait TopicStatusListener: Send + Sync {
    fn topic_status_changed(&self, topic: &Topic);
}

/// Client-side copy of a subject's topics, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicCollection {
    topics: Vec<Topic>,
}

impl TopicCollection {
    pub fn from_topics(topics: Vec<Topic>) -> Self {
        let mut collection = Self { topics };
        collection.sort();
        collection
    }

    pub fn replace(&mut self, topics: Vec<Topic>) {
        self.topics = topics;
        self.sort();
    }

    /// Inserts or replaces by id; returns the previous value.
    pub fn upsert(&mut self, topic: Topic) -> Option<Topic> {
        let previous = match self.topics.iter_mut().find(|current| current.id == topic.id) {
            Some(current) => Some(std::mem::replace(current, topic)),
            None => {
                self.topics.push(topic);
                None
            }
        };
        self.sort();
        previous
    }

    pub fn remove(&mut self, topic_id: TopicId) -> Option<Topic> {
        let index = self.topics.iter().position(|topic| topic.id == topic_id)?;
        Some(self.topics.remove(index))
    }

    pub fn get(&self, topic_id: TopicId) -> Option<&Topic> {
        self.topics.iter().find(|topic| topic.id == topic_id)
    }

    pub fn as_slice(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    fn sort(&mut self) {
        self.topics.sort_by(|left, right| {
            left.name
                .to_lowercase()
                .cmp(&right.name.to_lowercase())
                .then(left.id.cmp(&right.id))
        });
    }
}

/// Propagates a block reaching COMPLETED into the topic collection.
/// Purely local: the backend already updated the topic as a side effect of
/// the block update. There is no reverse path.
#[derive(Clone, Default)]
pub struct TopicStatusBridge {
    listener: Option<Arc<dyn TopicStatusListener>>,
}

impl TopicStatusBridge {
    pub fn new(listener: Option<Arc<dyn TopicStatusListener>>) -> Self {
        Self { listener }
    }

    /// Marks the topic completed. Returns the updated topic when its status
    /// actually changed.
    pub fn on_block_completed(
        &self,
        topics: &mut TopicCollection,
        topic_id: TopicId,
    ) -> Option<Topic> {
        let Some(topic) = topics.topics.iter_mut().find(|topic| topic.id == topic_id) else {
            debug!(topic_id, "completed block references a topic outside the collection");
            return None;
        };
        if topic.status == TopicStatus::Completed {
            return None;
        }
        topic.status = TopicStatus::Completed;
        debug!(topic_id, "topic marked completed from block");
        Some(topic.clone())
    }

    /// Must be called without holding the store lock.
    pub fn notify(&self, topic: &Topic) {
        if let Some(listener) = &self.listener {
            listener.topic_status_changed(topic);
        }
    }
}
