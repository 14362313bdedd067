use huddle_model::Location;
use serde::{Deserialize, Serialize};

use crate::error::{HuddleError, Result};

/// Input of [`PresenceTracker::set_user_present_context`].
///
/// [`PresenceTracker::set_user_present_context`]:
///     crate::presence::PresenceTracker::set_user_present_context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub context: Location,
    pub present: bool,
    #[serde(default)]
    pub durable: bool,
    pub exclusivity_region: Location,
}

impl PresenceUpdate {
    pub fn arrive(context: Location, exclusivity_region: Location) -> Self {
        Self {
            context,
            present: true,
            durable: false,
            exclusivity_region,
        }
    }

    pub fn leave(context: Location, exclusivity_region: Location) -> Self {
        Self {
            context,
            present: false,
            durable: false,
            exclusivity_region,
        }
    }

    pub fn visit(context: Location, exclusivity_region: Location) -> Self {
        Self {
            context,
            present: true,
            durable: true,
            exclusivity_region,
        }
    }

    /// Runs before any state is touched.
    pub fn validate(&self) -> Result<()> {
        self.context.ensure_non_empty("context")?;
        self.exclusivity_region.ensure_non_empty("exclusivity region")?;
        if self.durable && !self.present {
            return Err(HuddleError::Validation(
                "durable presence cannot be retracted".into(),
            ));
        }
        if !self.context.matches(&self.exclusivity_region) {
            return Err(HuddleError::Validation(format!(
                "context {} is outside exclusivity region {}",
                self.context, self.exclusivity_region
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> Location {
        Location::new().with("page", "docs").with("doc", id)
    }

    fn region() -> Location {
        Location::new().with("page", "docs")
    }

    #[test]
    fn durable_retraction_is_rejected() {
        let mut update = PresenceUpdate::visit(doc("1"), region());
        update.present = false;
        assert!(update.validate().unwrap_err().is_validation());
    }

    #[test]
    fn empty_maps_are_rejected() {
        assert!(PresenceUpdate::arrive(Location::new(), region()).validate().is_err());
        assert!(PresenceUpdate::arrive(doc("1"), Location::new()).validate().is_err());
    }

    #[test]
    fn context_must_sit_inside_region() {
        let other = Location::new().with("page", "settings");
        assert!(PresenceUpdate::arrive(doc("1"), other).validate().is_err());
        assert!(PresenceUpdate::arrive(doc("1"), region()).validate().is_ok());
    }

    #[test]
    fn deserializes_wire_shape() {
        let update: PresenceUpdate = serde_json::from_value(json!({
            "context": {"page": "docs", "doc": "1"},
            "present": true,
            "exclusivityRegion": {"page": "docs"}
        }))
        .unwrap();
        assert!(!update.durable);
        assert_eq!(update.context, doc("1"));
    }
}
