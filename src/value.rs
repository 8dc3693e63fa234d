//! Tri-state attribute values.
//!
//! Configuration, plan and state documents carry every attribute as either
//! null (not set), unknown (not computed yet by the host) or a known value.
//! The host encodes unknown values in JSON as the [`UNKNOWN_VALUE`] sentinel
//! string.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Sentinel the host uses for values that are not known until apply.
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// A single attribute value as seen in a configuration, plan or state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue<T> {
    /// The attribute is not set.
    Null,
    /// The attribute is set, but its value is not known yet.
    Unknown,
    /// The attribute has a concrete value.
    Known(T),
}

impl<T> Default for AttrValue<T> {
    fn default() -> Self {
        Self::Null
    }
}

impl<T> AttrValue<T> {
    /// Returns `true` if the attribute is not set.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if the attribute's value is not known yet.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Borrow the value if it is known.
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            _ => None,
        }
    }

    /// Null for `None`, known for `Some`.
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::Known)
    }
}

impl<T: Clone + Default> AttrValue<T> {
    /// The known value, or `T::default()` for null and unknown.
    pub fn value_or_default(&self) -> T {
        self.known().cloned().unwrap_or_default()
    }
}

impl<T> From<T> for AttrValue<T> {
    fn from(value: T) -> Self {
        Self::Known(value)
    }
}

/// Returns `true` if a raw JSON value is the unknown sentinel.
pub fn is_unknown_json(value: &Value) -> bool {
    value.as_str() == Some(UNKNOWN_VALUE)
}

impl<T: Serialize> Serialize for AttrValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Unknown => serializer.serialize_str(UNKNOWN_VALUE),
            Self::Known(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for AttrValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        if raw.is_null() {
            return Ok(Self::Null);
        }
        if is_unknown_json(&raw) {
            return Ok(Self::Unknown);
        }
        T::deserialize(raw).map(Self::Known).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize)]
    struct Model {
        #[serde(default)]
        name: AttrValue<String>,
        #[serde(default)]
        enabled: AttrValue<bool>,
    }

    #[test]
    fn test_deserialize_states() {
        let model: Model = serde_json::from_value(json!({"name": "prod"})).unwrap();
        assert_eq!(model.name, AttrValue::Known("prod".to_string()));
        assert!(model.enabled.is_null());

        let model: Model =
            serde_json::from_value(json!({"name": UNKNOWN_VALUE, "enabled": null})).unwrap();
        assert!(model.name.is_unknown());
        assert!(model.enabled.is_null());
    }

    #[test]
    fn test_deserialize_wrong_type() {
        let result = serde_json::from_value::<Model>(json!({"enabled": "yes"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_states() {
        let model = Model {
            name: AttrValue::Unknown,
            enabled: AttrValue::Known(true),
        };
        assert_eq!(
            serde_json::to_value(&model).unwrap(),
            json!({"name": UNKNOWN_VALUE, "enabled": true})
        );

        let model = Model {
            name: AttrValue::Null,
            enabled: AttrValue::Null,
        };
        assert_eq!(
            serde_json::to_value(&model).unwrap(),
            json!({"name": null, "enabled": null})
        );
    }

    #[test]
    fn test_value_or_default() {
        assert_eq!(AttrValue::<String>::Null.value_or_default(), "");
        assert_eq!(AttrValue::<String>::Unknown.value_or_default(), "");
        assert_eq!(AttrValue::from("x".to_string()).value_or_default(), "x");
        assert_eq!(AttrValue::from_option(None::<bool>), AttrValue::Null);
    }
}
