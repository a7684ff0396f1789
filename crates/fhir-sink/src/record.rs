//! FHIR resources as seen by the sink.

use serde_json::Value;

use crate::error::{Result, SinkError};

/// One FHIR resource: declared type, logical id and the full JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    resource_type: String,
    id: String,
    body: Value,
}

impl Record {
    /// Wrap a parsed resource, reading `resourceType` and `id` from it.
    pub fn from_value(body: Value) -> Result<Self> {
        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SinkError::InvalidRecord("missing resourceType".into()))?
            .to_string();

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(id_part)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SinkError::InvalidRecord(format!("{} resource has no id", resource_type))
            })?
            .to_string();

        Ok(Self {
            resource_type,
            id,
            body,
        })
    }

    /// Parse a resource from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SinkError::InvalidRecord(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Logical id (the id part of any `Type/id/_history/v` form).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Compact document text stored in document mode. Numbers keep their
    /// source text, so decimals such as `1.50` are not normalized.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

/// Strip an optional `Type/` prefix and `/_history/...` suffix from an id.
pub(crate) fn id_part(raw: &str) -> &str {
    let without_history = match raw.find("/_history") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    match without_history.rfind('/') {
        Some(pos) => &without_history[pos + 1..],
        None => without_history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let record = Record::from_value(json!({
            "resourceType": "Patient",
            "id": "p1",
            "active": true
        }))
        .unwrap();
        assert_eq!(record.resource_type(), "Patient");
        assert_eq!(record.id(), "p1");
        assert_eq!(record.body()["active"], json!(true));
    }

    #[test]
    fn test_missing_resource_type() {
        let err = Record::from_value(json!({"id": "p1"})).unwrap_err();
        assert!(matches!(err, SinkError::InvalidRecord(_)));
    }

    #[test]
    fn test_missing_id() {
        let err = Record::from_value(json!({"resourceType": "Patient"})).unwrap_err();
        assert!(err.to_string().contains("Patient resource has no id"));
    }

    #[test]
    fn test_empty_logical_id_is_rejected() {
        for raw in ["Patient/", "Patient//_history/2"] {
            let err = Record::from_value(json!({"resourceType": "Patient", "id": raw})).unwrap_err();
            assert!(matches!(err, SinkError::InvalidRecord(_)), "{raw}");
        }
    }

    #[test]
    fn test_id_part() {
        assert_eq!(id_part("p1"), "p1");
        assert_eq!(id_part("Patient/p1"), "p1");
        assert_eq!(id_part("Patient/p1/_history/3"), "p1");
        assert_eq!(id_part("http://fhir.example/Patient/p1/_history/3"), "p1");
    }

    #[test]
    fn test_encode_is_compact_json() {
        let record = Record::from_json(r#"{ "resourceType": "Patient", "id": "p1", "a": 1 }"#).unwrap();
        let encoded = record.encode().unwrap();
        assert!(!encoded.contains(' '));
        let reparsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(reparsed["a"], json!(1));
    }

    #[test]
    fn test_encode_keeps_number_text() {
        let json = concat!(
            r#"{"extension":[{"url":"http://example.org/count","valueInteger64":98765432109876543210}],"#,
            r#""id":"o1","resourceType":"Observation","valueQuantity":{"value":1.50}}"#
        );
        let record = Record::from_json(json).unwrap();
        assert_eq!(record.encode().unwrap(), json);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(Record::from_json("{not json").is_err());
    }
}
