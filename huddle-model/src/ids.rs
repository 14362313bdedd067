use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|err| {
                    ModelError::InvalidId(format!(
                        "{} `{}`: {}",
                        $label, s, err
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Tenant (organization) identifier. Every presence record and most
    /// topics are scoped to one org.
    OrgId,
    "org id"
);
uuid_id!(
    /// Internal user identifier.
    UserId,
    "user id"
);
uuid_id!(ThreadId, "thread id");
uuid_id!(MessageId, "message id");
uuid_id!(NotificationId, "notification id");

/// The user a presence update is made on behalf of.
///
/// `external_id` is the identifier integrators know the user by and is what
/// goes out on the wire; `user_id` is what the durable store keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub external_id: String,
    pub org_id: OrgId,
}

impl Actor {
    pub fn new(
        user_id: UserId,
        external_id: impl Into<String>,
        org_id: OrgId,
    ) -> Self {
        Self {
            user_id,
            external_id: external_id.into(),
            org_id,
        }
    }
}
