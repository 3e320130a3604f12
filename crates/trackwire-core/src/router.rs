//! Topic router.
//!
//! Owns group membership: which connections are subscribed to which
//! topics. Joins are idempotent, leaves of non-members are a no-op, and a
//! topic's map entry is pruned the moment its last member leaves so a
//! churn of short-lived tracking-number topics cannot grow the map.

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::topic::Topic;
use dashmap::DashMap;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Router errors, reported back to the offending connection only.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Per-connection subscription limit reached.
    #[error("Subscription limit reached ({0})")]
    SubscriptionLimit(usize),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum topics a single connection may join.
    pub max_subscriptions_per_connection: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 100,
        }
    }
}

/// Topic-to-members mapping with a reverse index for disconnect teardown.
///
/// Both maps are sharded; a mutation locks one entry of one map at a time,
/// so membership updates never contend with an in-flight fan-out snapshot
/// for longer than a single map update.
pub struct TopicRouter {
    /// Topic membership (topic -> handles).
    members: DashMap<Topic, HashSet<ConnectionHandle>>,
    /// Reverse index (connection -> topics), consulted on disconnect.
    memberships: DashMap<ConnectionId, HashSet<Topic>>,
    config: RouterConfig,
}

impl TopicRouter {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            members: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Add a connection to a topic. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already at its subscription
    /// limit and this join would add a new topic.
    pub fn join(&self, topic: &Topic, handle: &ConnectionHandle) -> Result<(), RouterError> {
        let newly_joined = {
            let mut topics = self.memberships.entry(handle.id().clone()).or_default();
            if !topics.contains(topic)
                && topics.len() >= self.config.max_subscriptions_per_connection
            {
                return Err(RouterError::SubscriptionLimit(
                    self.config.max_subscriptions_per_connection,
                ));
            }
            topics.insert(topic.clone())
        };

        self.members
            .entry(topic.clone())
            .or_default()
            .replace(handle.clone());

        if newly_joined {
            debug!(topic = %topic, connection = %handle.id(), "Joined topic");
        }
        Ok(())
    }

    /// Remove a connection from a topic.
    ///
    /// Leaving a topic never joined is a no-op, not an error.
    pub fn leave(&self, topic: &Topic, id: &ConnectionId) {
        let was_member = match self.memberships.get_mut(id) {
            Some(mut topics) => topics.remove(topic),
            None => false,
        };
        self.memberships.remove_if(id, |_, topics| topics.is_empty());

        if was_member {
            self.remove_member(topic, id);
            debug!(topic = %topic, connection = %id, "Left topic");
        }
    }

    /// Remove a connection from every topic it belongs to.
    ///
    /// Invoked once, on disconnect, so no later emission can reach a
    /// handle that is mid-teardown.
    pub fn leave_all(&self, id: &ConnectionId) {
        if let Some((_, topics)) = self.memberships.remove(id) {
            for topic in &topics {
                self.remove_member(topic, id);
            }
            debug!(connection = %id, topics = topics.len(), "Left all topics");
        }
    }

    fn remove_member(&self, topic: &Topic, id: &ConnectionId) {
        let now_empty = match self.members.get_mut(topic) {
            Some(mut members) => {
                members.retain(|h| h.id() != id);
                members.is_empty()
            }
            None => false,
        };

        if now_empty {
            // Re-checked under the entry lock so a concurrent join wins.
            self.members.remove_if(topic, |_, members| members.is_empty());
        }
    }

    /// Snapshot of a topic's current members. Empty if the topic has none.
    #[must_use]
    pub fn members_of(&self, topic: &Topic) -> Vec<ConnectionHandle> {
        self.members
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members currently in a topic.
    #[must_use]
    pub fn member_count(&self, topic: &Topic) -> usize {
        self.members.get(topic).map(|m| m.len()).unwrap_or(0)
    }

    /// Whether a connection is currently a member of a topic.
    #[must_use]
    pub fn is_member(&self, topic: &Topic, id: &ConnectionId) -> bool {
        self.memberships
            .get(id)
            .map(|topics| topics.contains(topic))
            .unwrap_or(false)
    }

    /// Snapshot of the topics a connection belongs to.
    #[must_use]
    pub fn topics_for(&self, id: &ConnectionId) -> Vec<Topic> {
        self.memberships
            .get(id)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All topics with at least one member.
    #[must_use]
    pub fn all_topics(&self) -> Vec<Topic> {
        self.members.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of topics with at least one member.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.members.len()
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}
