//! Event topic vocabulary

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, Result};

/// A named category of event.
///
/// The built-in variants form the fixed vocabulary of the intake pipeline.
/// `Custom` topics exist only after being registered on the bus with
/// [`EventBus::register_topic`](super::EventBus::register_topic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Topic {
    CallIncoming,
    CallAssigned,
    CallQueued,
    AgentBecameAvailable,
    CallResolved,
    CallAbandoned,
    MetricsSnapshot,
    ComponentAlert,
    QueueOverflowAlert,
    Heartbeat,
    Custom(Arc<str>),
}

impl Topic {
    /// Every built-in topic, in declaration order
    pub const BUILTIN: [Topic; 10] = [
        Topic::CallIncoming,
        Topic::CallAssigned,
        Topic::CallQueued,
        Topic::AgentBecameAvailable,
        Topic::CallResolved,
        Topic::CallAbandoned,
        Topic::MetricsSnapshot,
        Topic::ComponentAlert,
        Topic::QueueOverflowAlert,
        Topic::Heartbeat,
    ];

    /// Wire name of the topic
    pub fn as_str(&self) -> &str {
        match self {
            Topic::CallIncoming => "call_incoming",
            Topic::CallAssigned => "call_assigned",
            Topic::CallQueued => "call_queued",
            Topic::AgentBecameAvailable => "agent_became_available",
            Topic::CallResolved => "call_resolved",
            Topic::CallAbandoned => "call_abandoned",
            Topic::MetricsSnapshot => "metrics_snapshot",
            Topic::ComponentAlert => "component_alert",
            Topic::QueueOverflowAlert => "queue_overflow_alert",
            Topic::Heartbeat => "heartbeat",
            Topic::Custom(name) => name,
        }
    }

    /// Resolve a built-in topic by wire name
    pub fn builtin(name: &str) -> Option<Topic> {
        Self::BUILTIN.iter().find(|t| t.as_str() == name).cloned()
    }

    /// Built-in topic for `name`, or a (not yet validated) custom topic
    pub fn from_name(name: &str) -> Topic {
        Self::builtin(name).unwrap_or_else(|| Topic::Custom(Arc::from(name)))
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Topic::Custom(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::from_name(&name)
    }
}

/// Set of recognized topics: all built-ins plus explicitly registered custom names
#[derive(Debug, Default)]
pub(crate) struct TopicVocabulary {
    custom: HashSet<Arc<str>>,
}

impl TopicVocabulary {
    pub(crate) fn is_recognized(&self, topic: &Topic) -> bool {
        match topic {
            Topic::Custom(name) => self.custom.contains(name),
            _ => true,
        }
    }

    /// Register a custom topic name; registering twice is harmless
    pub(crate) fn register(&mut self, name: &str) -> Result<Topic> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
        if !valid {
            return Err(IntakeError::InvalidTopic(format!(
                "'{}' (topic names use lowercase letters, digits, '_' and '.')",
                name
            )));
        }

        if let Some(builtin) = Topic::builtin(name) {
            return Ok(builtin);
        }

        let name: Arc<str> = Arc::from(name);
        self.custom.insert(Arc::clone(&name));
        Ok(Topic::Custom(name))
    }

    /// Resolve a name against the vocabulary, rejecting unknown names
    pub(crate) fn resolve(&self, name: &str) -> Result<Topic> {
        let topic = Topic::from_name(name);
        if self.is_recognized(&topic) {
            Ok(topic)
        } else {
            Err(IntakeError::InvalidTopic(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_round_trip() {
        for topic in Topic::BUILTIN.iter() {
            assert_eq!(Topic::builtin(topic.as_str()).as_ref(), Some(topic));
        }
        assert_eq!(Topic::builtin("call_incomming"), None);
    }

    #[test]
    fn test_typo_is_rejected() {
        let vocabulary = TopicVocabulary::default();
        assert!(vocabulary.resolve("call_incoming").is_ok());
        assert!(matches!(
            vocabulary.resolve("call_incomming"),
            Err(IntakeError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_custom_registration() {
        let mut vocabulary = TopicVocabulary::default();
        let topic = vocabulary.register("faq.matched").unwrap();
        assert_eq!(topic, Topic::Custom(Arc::from("faq.matched")));
        assert!(vocabulary.is_recognized(&topic));
        assert_eq!(vocabulary.resolve("faq.matched").unwrap(), topic);

        // built-in names resolve to the built-in variant
        assert_eq!(vocabulary.register("heartbeat").unwrap(), Topic::Heartbeat);
        assert!(vocabulary.register("Bad Name").is_err());
    }
}
