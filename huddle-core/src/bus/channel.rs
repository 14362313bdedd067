//! Transport channel naming.
//!
//! An event goes out on `huddle:{topic}:{k=v,...}` with its scope keys in
//! sorted order. Names over [`MAX_CHANNEL_NAME_LENGTH`] bytes collapse to a
//! SHA-256 digest but keep the topic prefix, so `huddle:{topic}:*` still
//! matches every scope of a topic.

use std::fmt;

use huddle_model::{ScopeKeys, Topic};
use sha2::{Digest, Sha256};

pub const CHANNEL_PREFIX: &str = "huddle";
pub const MAX_CHANNEL_NAME_LENGTH: usize = 1024;

pub fn channel_name(topic: Topic, scope: &ScopeKeys) -> String {
    let body = scope
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    let name = format!("{CHANNEL_PREFIX}:{topic}:{body}");
    if name.len() <= MAX_CHANNEL_NAME_LENGTH {
        return name;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{CHANNEL_PREFIX}:{topic}:#{digest}")
}

/// Prefix shared by every channel of `topic`.
pub fn topic_prefix(topic: Topic) -> String {
    format!("{CHANNEL_PREFIX}:{topic}:")
}

/// What a transport subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelPattern {
    /// One concrete channel.
    Exact(String),
    /// Every channel starting with the prefix. Maps to a Redis glob
    /// `prefix*`.
    Prefix(String),
}

impl ChannelPattern {
    pub fn topic_wildcard(topic: Topic) -> Self {
        ChannelPattern::Prefix(topic_prefix(topic))
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::Exact(name) => name == channel,
            ChannelPattern::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }

    /// Redis glob form of a prefix pattern.
    pub fn glob(&self) -> String {
        match self {
            ChannelPattern::Exact(name) => name.clone(),
            ChannelPattern::Prefix(prefix) => format!("{prefix}*"),
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPattern::Exact(name) => f.write_str(name),
            ChannelPattern::Prefix(_) => f.write_str(&self.glob()),
        }
    }
}
