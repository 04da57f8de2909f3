use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProvisionerError;

/// Field values carried by a plan operation, keyed by field name.
///
/// A key that is absent means "not part of this operation"; a key present
/// with `null` means the field is intentionally cleared. Keys are ordered,
/// so encoded payloads are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

/// Identifying fields used to address a remote object.
pub type Identity = Payload;

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Decode one field. `Ok(None)` if the field is not part of the payload.
    pub fn decode<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, ProvisionerError> {
        self.0
            .get(field)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(ProvisionerError::from)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `base` with every field of `self` written over it.
    pub fn overlay_on(&self, base: &Payload) -> Payload {
        let mut merged = base.clone();
        for (k, v) in &self.0 {
            merged.0.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Only the listed fields that are present.
    pub fn select<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Payload {
        let mut out = Payload::new();
        for field in fields {
            if let Some(v) = self.0.get(field) {
                out.0.insert(field.to_string(), v.clone());
            }
        }
        out
    }

    /// Deserialize the whole payload into a typed provider spec. Unknown
    /// fields are ignored by the target type.
    pub fn to_typed<S: DeserializeOwned>(&self) -> Result<S, ProvisionerError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Serialize a typed provider spec into a payload.
    pub fn from_typed<S: Serialize>(spec: &S) -> Result<Self, ProvisionerError> {
        match serde_json::to_value(spec)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProvisionerError::State(format!(
                "expected an object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Spec {
        name: String,
        tier: String,
        #[serde(default)]
        public_ip: Option<String>,
    }

    #[test]
    fn absent_and_null_are_distinct() {
        let p = Payload::new().with("body", Value::Null);
        assert!(p.contains("body"));
        assert_eq!(p.decode::<Option<String>>("body").unwrap(), Some(None));
        assert_eq!(p.decode::<Option<String>>("headers").unwrap(), None);
    }

    #[test]
    fn overlay_then_type() {
        let current = Payload::new()
            .with("name", json!("db"))
            .with("tier", json!("small"))
            .with("public_ip", json!("10.0.0.1"));
        let changes = Payload::new().with("tier", json!("large"));
        let spec: Spec = changes.overlay_on(&current).to_typed().unwrap();
        assert_eq!(
            spec,
            Spec {
                name: "db".into(),
                tier: "large".into(),
                public_ip: Some("10.0.0.1".into()),
            }
        );
    }

    #[test]
    fn select_keeps_present_fields_only() {
        let p = Payload::new().with("a", json!(1)).with("b", json!(2));
        let s = p.select(["a", "c"]);
        assert_eq!(s.keys().collect::<Vec<_>>(), ["a"]);
    }
}
