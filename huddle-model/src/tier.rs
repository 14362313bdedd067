use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Named deployment environment (e.g. `prod`, `staging`). Selects which
/// cron schedules a process installs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tier(String);

impl Tier {
    pub fn new(name: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidTier("tier name is empty".into()));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ModelError::InvalidTier(format!(
                "`{trimmed}` may only contain ASCII letters, digits, `-` and `_`"
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::new(s)
    }
}

impl TryFrom<String> for Tier {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tier::new(value)
    }
}

impl From<Tier> for String {
    fn from(value: Tier) -> Self {
        value.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_is_normalized() {
        let tier: Tier = " Staging ".parse().unwrap();
        assert_eq!(tier.as_str(), "staging");
    }

    #[test]
    fn tier_rejects_blank_and_symbols() {
        assert!(Tier::new("  ").is_err());
        assert!(Tier::new("prod/eu").is_err());
    }
}
