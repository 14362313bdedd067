//! Flat key/value maps describing where a user is (a "context") and the
//! regions presence is exclusive within.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{ModelError, Result};

/// Scalar value allowed inside a [`Location`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationValue {
    Bool(bool),
    Number(Number),
    String(String),
}

impl LocationValue {
    /// Builds a numeric value from a float. Returns `None` for NaN and
    /// infinities, which have no JSON representation.
    pub fn float(value: f64) -> Option<Self> {
        Number::from_f64(value).map(LocationValue::Number)
    }
}

impl From<&str> for LocationValue {
    fn from(value: &str) -> Self {
        LocationValue::String(value.to_string())
    }
}

impl From<String> for LocationValue {
    fn from(value: String) -> Self {
        LocationValue::String(value)
    }
}

impl From<bool> for LocationValue {
    fn from(value: bool) -> Self {
        LocationValue::Bool(value)
    }
}

impl From<i64> for LocationValue {
    fn from(value: i64) -> Self {
        LocationValue::Number(value.into())
    }
}

impl From<i32> for LocationValue {
    fn from(value: i32) -> Self {
        LocationValue::Number(value.into())
    }
}

impl From<u64> for LocationValue {
    fn from(value: u64) -> Self {
        LocationValue::Number(value.into())
    }
}

impl fmt::Display for LocationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationValue::Bool(value) => write!(f, "{value}"),
            LocationValue::Number(value) => write!(f, "{value}"),
            LocationValue::String(value) => write!(f, "{value}"),
        }
    }
}

/// Ordered flat map of scalar values, e.g. `{"page": "doc-1", "block": 3}`.
///
/// Keys are kept sorted so the JSON form is canonical: two equal locations
/// always serialize, and therefore hash, identically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(BTreeMap<String, LocationValue>);

/// Entity metadata shares the flat-map shape of locations.
pub type EntityMetadata = Location;

impl Location {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<LocationValue>,
    ) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<LocationValue>,
    ) -> Option<LocationValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&LocationValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocationValue)> {
        self.0.iter()
    }

    /// True when every entry of `matcher` is present, with an equal value,
    /// in `self`. An empty matcher matches everything.
    pub fn matches(&self, matcher: &Location) -> bool {
        matcher
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Canonical JSON (sorted keys, no whitespace).
    pub fn canonical_json(&self) -> String {
        // A map of strings to scalars cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// SHA-256 of the canonical JSON, hex encoded. Durable presence keys its
    /// location rows on this value.
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        hex::encode(digest)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or(Value::Null)
    }

    /// Rejects empty maps. Presence contexts and exclusivity regions must
    /// name at least one key.
    pub fn ensure_non_empty(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            return Err(ModelError::InvalidLocation(format!(
                "{what} must contain at least one key"
            )));
        }
        if self.0.keys().any(|key| key.is_empty()) {
            return Err(ModelError::InvalidLocation(format!(
                "{what} contains an empty key"
            )));
        }
        Ok(())
    }
}

/// Canonical ordering: fewer keys first, then canonical JSON.
pub fn location_compare(a: &Location, b: &Location) -> Ordering {
    a.len()
        .cmp(&b.len())
        .then_with(|| a.canonical_json().cmp(&b.canonical_json()))
}

impl TryFrom<Value> for Location {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(ModelError::InvalidLocation(
                "expected a JSON object".into(),
            ));
        };

        let mut location = Location::new();
        for (key, value) in map {
            let value = match value {
                Value::Bool(b) => LocationValue::Bool(b),
                Value::Number(n) => LocationValue::Number(n),
                Value::String(s) => LocationValue::String(s),
                other => {
                    return Err(ModelError::InvalidLocation(format!(
                        "value for `{key}` must be a string, number or boolean, got {other}"
                    )));
                }
            };
            location.0.insert(key, value);
        }
        Ok(location)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}

impl<K, V> FromIterator<(K, V)> for Location
where
    K: Into<String>,
    V: Into<LocationValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Location(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = Location::new().with("page", "doc-1").with("block", 3);
        let b = Location::new().with("block", 3).with("page", "doc-1");
        assert_eq!(a.canonical_json(), r#"{"block":3,"page":"doc-1"}"#);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn matcher_is_a_subset_test() {
        let context = Location::new().with("page", "doc-1").with("block", 3);
        assert!(context.matches(&Location::new().with("page", "doc-1")));
        assert!(context.matches(&Location::new()));
        assert!(!context.matches(&Location::new().with("page", "doc-2")));
        assert!(
            !Location::new()
                .with("page", "doc-1")
                .matches(&context)
        );
    }

    #[test]
    fn nested_values_are_rejected() {
        let err = Location::try_from(json!({"page": {"nested": true}}))
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidLocation(_)));

        let err: std::result::Result<Location, _> =
            serde_json::from_value(json!({"page": [1, 2]}));
        assert!(err.is_err());
    }

    #[test]
    fn compare_orders_by_size_then_json() {
        let small = Location::new().with("z", 1);
        let big = Location::new().with("a", 1).with("b", 2);
        let other = Location::new().with("a", 2);
        assert_eq!(location_compare(&small, &big), Ordering::Less);
        assert_eq!(location_compare(&other, &small), Ordering::Less);
    }

    #[test]
    fn empty_location_fails_non_empty_check() {
        assert!(Location::new().ensure_non_empty("context").is_err());
        assert!(
            Location::new()
                .with("", "x")
                .ensure_non_empty("context")
                .is_err()
        );
        assert!(
            Location::new()
                .with("page", "x")
                .ensure_non_empty("context")
                .is_ok()
        );
    }
}
