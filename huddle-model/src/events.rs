//! Typed pub/sub events.
//!
//! Every event is `{name, args, payload}` on the wire: `name` is the topic,
//! `args` the scope keys that select the channel, and `payload` the body.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{MessageId, NotificationId, OrgId, ThreadId, UserId};
use crate::location::{EntityMetadata, Location};
use crate::topic::{ScopeKeys, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgScope {
    #[serde(rename = "orgID")]
    pub org_id: OrgId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadScope {
    #[serde(rename = "threadID")]
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScope {
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageScope {
    #[serde(rename = "pageContextHash")]
    pub page_context_hash: String,
    #[serde(rename = "orgID")]
    pub org_id: OrgId,
}

impl From<&OrgScope> for ScopeKeys {
    fn from(scope: &OrgScope) -> Self {
        ScopeKeys::org(scope.org_id)
    }
}

impl From<&ThreadScope> for ScopeKeys {
    fn from(scope: &ThreadScope) -> Self {
        ScopeKeys::thread(scope.thread_id)
    }
}

impl From<&UserScope> for ScopeKeys {
    fn from(scope: &UserScope) -> Self {
        ScopeKeys::user(scope.user_id)
    }
}

impl From<&PageScope> for ScopeKeys {
    fn from(scope: &PageScope) -> Self {
        ScopeKeys::page(scope.org_id, scope.page_context_hash.clone())
    }
}

/// `context-presence` body. Either an ephemeral arrival/departure or a
/// durable visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPresencePayload {
    #[serde(rename = "externalUserID")]
    pub external_user_id: String,
    #[serde(flatten)]
    pub change: PresenceChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceChange {
    Ephemeral(EphemeralChange),
    Durable(DurableVisit),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed: Option<Location>,
    pub sequence_num: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableVisit {
    pub context: Location,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    #[serde(rename = "threadID")]
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    #[serde(rename = "messageID")]
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendedContent {
    #[serde(rename = "messageID")]
    pub message_id: MessageId,
    #[serde(rename = "appendedContent")]
    pub appended_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUsers {
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRef {
    #[serde(rename = "notificationID")]
    pub notification_id: NotificationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    #[serde(rename = "threadID")]
    pub thread_id: ThreadId,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriberChange {
    pub added: Vec<UserId>,
    pub removed: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterableChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Change<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Change<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Change<EntityMetadata>>,
    #[serde(rename = "orgID", default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Change<OrgId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<SubscriberChange>,
}

impl FilterableChanges {
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.resolved.is_none()
            && self.metadata.is_none()
            && self.org_id.is_none()
            && self.subscribers.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterablePropertiesUpdated {
    #[serde(rename = "threadID")]
    pub thread_id: ThreadId,
    pub changes: FilterableChanges,
}

/// One variant per topic, each with its own scope and payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum PubSubEvent {
    ContextPresence {
        args: OrgScope,
        payload: ContextPresencePayload,
    },
    ThreadCreated {
        args: ThreadScope,
        payload: ThreadRef,
    },
    ThreadDeleted {
        args: ThreadScope,
        payload: ThreadRef,
    },
    ThreadMessageAdded {
        args: ThreadScope,
        payload: MessageRef,
    },
    ThreadMessageUpdated {
        args: ThreadScope,
        payload: MessageRef,
    },
    ThreadMessageContentAppended {
        args: ThreadScope,
        payload: AppendedContent,
    },
    ThreadMessageRemoved {
        args: ThreadScope,
        payload: MessageRef,
    },
    ThreadTypingUsersUpdated {
        args: ThreadScope,
        payload: TypingUsers,
    },
    ThreadFilterablePropertiesUpdated {
        args: OrgScope,
        payload: FilterablePropertiesUpdated,
    },
    InboxUpdated {
        args: UserScope,
        #[serde(default)]
        payload: Option<InboxEntry>,
    },
    AnnotationsOnPageUpdated {
        args: PageScope,
        #[serde(default)]
        payload: (),
    },
    NotificationAdded {
        args: UserScope,
        payload: NotificationRef,
    },
    NotificationReadStateUpdated {
        args: UserScope,
        payload: NotificationRef,
    },
    NotificationDeleted {
        args: UserScope,
        payload: NotificationRef,
    },
    OrgMemberAdded {
        args: OrgScope,
        payload: UserRef,
    },
    OrgMemberRemoved {
        args: OrgScope,
        payload: UserRef,
    },
    UserIdentity {
        args: UserScope,
        #[serde(default)]
        payload: (),
    },
    OrgUserIdentity {
        args: OrgScope,
        payload: UserRef,
    },
    PubSubHealthCheck {
        #[serde(default)]
        args: (),
        #[serde(default)]
        payload: (),
    },
}

impl PubSubEvent {
    pub fn heartbeat() -> Self {
        PubSubEvent::PubSubHealthCheck {
            args: (),
            payload: (),
        }
    }

    pub fn context_presence(
        org_id: OrgId,
        external_user_id: impl Into<String>,
        change: PresenceChange,
    ) -> Self {
        PubSubEvent::ContextPresence {
            args: OrgScope { org_id },
            payload: ContextPresencePayload {
                external_user_id: external_user_id.into(),
                change,
            },
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            PubSubEvent::ContextPresence { .. } => Topic::ContextPresence,
            PubSubEvent::ThreadCreated { .. } => Topic::ThreadCreated,
            PubSubEvent::ThreadDeleted { .. } => Topic::ThreadDeleted,
            PubSubEvent::ThreadMessageAdded { .. } => Topic::ThreadMessageAdded,
            PubSubEvent::ThreadMessageUpdated { .. } => {
                Topic::ThreadMessageUpdated
            }
            PubSubEvent::ThreadMessageContentAppended { .. } => {
                Topic::ThreadMessageContentAppended
            }
            PubSubEvent::ThreadMessageRemoved { .. } => {
                Topic::ThreadMessageRemoved
            }
            PubSubEvent::ThreadTypingUsersUpdated { .. } => {
                Topic::ThreadTypingUsersUpdated
            }
            PubSubEvent::ThreadFilterablePropertiesUpdated { .. } => {
                Topic::ThreadFilterablePropertiesUpdated
            }
            PubSubEvent::InboxUpdated { .. } => Topic::InboxUpdated,
            PubSubEvent::AnnotationsOnPageUpdated { .. } => {
                Topic::AnnotationsOnPageUpdated
            }
            PubSubEvent::NotificationAdded { .. } => Topic::NotificationAdded,
            PubSubEvent::NotificationReadStateUpdated { .. } => {
                Topic::NotificationReadStateUpdated
            }
            PubSubEvent::NotificationDeleted { .. } => Topic::NotificationDeleted,
            PubSubEvent::OrgMemberAdded { .. } => Topic::OrgMemberAdded,
            PubSubEvent::OrgMemberRemoved { .. } => Topic::OrgMemberRemoved,
            PubSubEvent::UserIdentity { .. } => Topic::UserIdentity,
            PubSubEvent::OrgUserIdentity { .. } => Topic::OrgUserIdentity,
            PubSubEvent::PubSubHealthCheck { .. } => Topic::PubSubHealthCheck,
        }
    }

    pub fn scope(&self) -> ScopeKeys {
        match self {
            PubSubEvent::ContextPresence { args, .. }
            | PubSubEvent::ThreadFilterablePropertiesUpdated { args, .. }
            | PubSubEvent::OrgMemberAdded { args, .. }
            | PubSubEvent::OrgMemberRemoved { args, .. }
            | PubSubEvent::OrgUserIdentity { args, .. } => args.into(),
            PubSubEvent::ThreadCreated { args, .. }
            | PubSubEvent::ThreadDeleted { args, .. }
            | PubSubEvent::ThreadMessageAdded { args, .. }
            | PubSubEvent::ThreadMessageUpdated { args, .. }
            | PubSubEvent::ThreadMessageContentAppended { args, .. }
            | PubSubEvent::ThreadMessageRemoved { args, .. }
            | PubSubEvent::ThreadTypingUsersUpdated { args, .. } => args.into(),
            PubSubEvent::InboxUpdated { args, .. }
            | PubSubEvent::NotificationAdded { args, .. }
            | PubSubEvent::NotificationReadStateUpdated { args, .. }
            | PubSubEvent::NotificationDeleted { args, .. }
            | PubSubEvent::UserIdentity { args, .. } => args.into(),
            PubSubEvent::AnnotationsOnPageUpdated { args, .. } => args.into(),
            PubSubEvent::PubSubHealthCheck { .. } => ScopeKeys::none(),
        }
    }

    /// Checks the event against its topic's registered scope keys and the
    /// payload rules that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        let topic = self.topic();
        topic.validate_scope(&self.scope())?;

        let invalid = |reason: &str| {
            Err(ModelError::InvalidEvent {
                topic: topic.as_str(),
                reason: reason.to_string(),
            })
        };

        match self {
            PubSubEvent::ContextPresence { payload, .. } => {
                if payload.external_user_id.is_empty() {
                    return invalid("externalUserID is empty");
                }
                match &payload.change {
                    PresenceChange::Ephemeral(change) => {
                        if change.arrived.is_none() && change.departed.is_none()
                        {
                            return invalid(
                                "ephemeral change names neither an arrival nor a departure",
                            );
                        }
                        let empty = |l: &Option<Location>| {
                            l.as_ref().is_some_and(Location::is_empty)
                        };
                        if empty(&change.arrived) || empty(&change.departed) {
                            return invalid("presence context is empty");
                        }
                    }
                    PresenceChange::Durable(visit) => {
                        if visit.context.is_empty() {
                            return invalid("presence context is empty");
                        }
                    }
                }
            }
            PubSubEvent::ThreadFilterablePropertiesUpdated { payload, .. } => {
                if payload.changes.is_empty() {
                    return invalid("no property changes");
                }
            }
            PubSubEvent::AnnotationsOnPageUpdated { args, .. } => {
                if args.page_context_hash.is_empty() {
                    return invalid("pageContextHash is empty");
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
