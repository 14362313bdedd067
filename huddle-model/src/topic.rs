use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{OrgId, ThreadId, UserId};

/// The closed set of pub/sub topics. Wire names are shared with other
/// services and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    ContextPresence,
    ThreadCreated,
    ThreadDeleted,
    ThreadMessageAdded,
    ThreadMessageUpdated,
    ThreadMessageContentAppended,
    ThreadMessageRemoved,
    ThreadTypingUsersUpdated,
    ThreadFilterablePropertiesUpdated,
    InboxUpdated,
    AnnotationsOnPageUpdated,
    NotificationAdded,
    NotificationReadStateUpdated,
    NotificationDeleted,
    OrgMemberAdded,
    OrgMemberRemoved,
    UserIdentity,
    OrgUserIdentity,
    PubSubHealthCheck,
}

impl Topic {
    pub const ALL: [Topic; 19] = [
        Topic::ContextPresence,
        Topic::ThreadCreated,
        Topic::ThreadDeleted,
        Topic::ThreadMessageAdded,
        Topic::ThreadMessageUpdated,
        Topic::ThreadMessageContentAppended,
        Topic::ThreadMessageRemoved,
        Topic::ThreadTypingUsersUpdated,
        Topic::ThreadFilterablePropertiesUpdated,
        Topic::InboxUpdated,
        Topic::AnnotationsOnPageUpdated,
        Topic::NotificationAdded,
        Topic::NotificationReadStateUpdated,
        Topic::NotificationDeleted,
        Topic::OrgMemberAdded,
        Topic::OrgMemberRemoved,
        Topic::UserIdentity,
        Topic::OrgUserIdentity,
        Topic::PubSubHealthCheck,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Topic::ContextPresence => "context-presence",
            Topic::ThreadCreated => "thread-created",
            Topic::ThreadDeleted => "thread-deleted",
            Topic::ThreadMessageAdded => "thread-message-added",
            Topic::ThreadMessageUpdated => "thread-message-updated",
            Topic::ThreadMessageContentAppended => {
                "thread-message-content-appended"
            }
            Topic::ThreadMessageRemoved => "thread-message-removed",
            Topic::ThreadTypingUsersUpdated => "thread-typing-users-updated",
            Topic::ThreadFilterablePropertiesUpdated => {
                "thread-filterable-properties-updated"
            }
            Topic::InboxUpdated => "inbox-updated",
            Topic::AnnotationsOnPageUpdated => "annotations-on-page-updated",
            Topic::NotificationAdded => "notification-added",
            Topic::NotificationReadStateUpdated => {
                "notification-read-state-updated"
            }
            Topic::NotificationDeleted => "notification-deleted",
            Topic::OrgMemberAdded => "org-member-added",
            Topic::OrgMemberRemoved => "org-member-removed",
            Topic::UserIdentity => "user-identity",
            Topic::OrgUserIdentity => "org-user-identity",
            Topic::PubSubHealthCheck => "pub-sub-health-check",
        }
    }

    /// Scope keys every event on this topic carries, sorted.
    pub const fn scope_keys(self) -> &'static [&'static str] {
        match self {
            Topic::ContextPresence
            | Topic::ThreadFilterablePropertiesUpdated
            | Topic::OrgMemberAdded
            | Topic::OrgMemberRemoved
            | Topic::OrgUserIdentity => &["orgID"],
            Topic::ThreadCreated
            | Topic::ThreadDeleted
            | Topic::ThreadMessageAdded
            | Topic::ThreadMessageUpdated
            | Topic::ThreadMessageContentAppended
            | Topic::ThreadMessageRemoved
            | Topic::ThreadTypingUsersUpdated => &["threadID"],
            Topic::InboxUpdated
            | Topic::NotificationAdded
            | Topic::NotificationReadStateUpdated
            | Topic::NotificationDeleted
            | Topic::UserIdentity => &["userID"],
            Topic::AnnotationsOnPageUpdated => &["orgID", "pageContextHash"],
            Topic::PubSubHealthCheck => &[],
        }
    }

    /// Checks that `scope` names exactly the keys this topic is scoped by.
    pub fn validate_scope(self, scope: &ScopeKeys) -> Result<()> {
        let expected = self.scope_keys();
        let matches = scope.len() == expected.len()
            && expected.iter().all(|key| scope.get(key).is_some());
        if !matches {
            return Err(ModelError::InvalidEvent {
                topic: self.as_str(),
                reason: format!(
                    "scope keys {:?} do not match {:?}",
                    scope.keys().collect::<Vec<_>>(),
                    expected
                ),
            });
        }
        if scope.values().any(str::is_empty) {
            return Err(ModelError::InvalidEvent {
                topic: self.as_str(),
                reason: "scope values must be non-empty".into(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Topic::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| ModelError::UnknownTopic(s.to_string()))
    }
}

/// Identifier map narrowing which subscribers of a topic receive an event,
/// e.g. `{orgID: "..."}`. Keys are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKeys(BTreeMap<String, String>);

impl ScopeKeys {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn org(org_id: OrgId) -> Self {
        Self::none().with("orgID", org_id)
    }

    pub fn thread(thread_id: ThreadId) -> Self {
        Self::none().with("threadID", thread_id)
    }

    pub fn user(user_id: UserId) -> Self {
        Self::none().with("userID", user_id)
    }

    pub fn page(org_id: OrgId, page_context_hash: impl Into<String>) -> Self {
        Self::org(org_id).with("pageContextHash", page_context_hash.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
        assert!("page-thread-added".parse::<Topic>().is_err());
    }

    #[test]
    fn scope_registry_is_sorted() {
        for topic in Topic::ALL {
            let keys = topic.scope_keys();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "{topic}");
        }
    }

    #[test]
    fn validate_scope_requires_exact_keys() {
        let org = OrgId::new();
        assert!(
            Topic::ContextPresence
                .validate_scope(&ScopeKeys::org(org))
                .is_ok()
        );
        assert!(
            Topic::ContextPresence
                .validate_scope(&ScopeKeys::user(UserId::new()))
                .is_err()
        );
        assert!(
            Topic::AnnotationsOnPageUpdated
                .validate_scope(&ScopeKeys::org(org))
                .is_err()
        );
        assert!(
            Topic::AnnotationsOnPageUpdated
                .validate_scope(&ScopeKeys::page(org, "abc"))
                .is_ok()
        );
        assert!(
            Topic::PubSubHealthCheck
                .validate_scope(&ScopeKeys::none())
                .is_ok()
        );
    }
}
