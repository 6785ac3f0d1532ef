//! Line-oriented JSON protocol spoken with the external collector.
//!
//! One request object is written to the collector's stdin as a single line.
//! The collector answers with zero or more result objects, one per stdout
//! line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_FAIL: &str = "Fail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Discovery,
    Collect,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Discovery => "Discovery",
            RequestType::Collect => "Collect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedCredential {
    #[serde(rename = "credential.name")]
    pub name: String,
    #[serde(rename = "credential.type")]
    pub credential_type: String,
    pub attributes: Map<String, Value>,
}

/// Connection data for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorContext {
    pub ip: String,
    pub port: i32,
    pub credentials: Vec<FormattedCredential>,
    #[serde(rename = "provisionId", skip_serializing_if = "Option::is_none", default)]
    pub provision_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRequest {
    #[serde(rename = "requestType")]
    pub request_type: RequestType,
    pub contexts: Vec<CollectorContext>,
}

impl CollectorRequest {
    pub fn discovery(context: CollectorContext) -> Self {
        Self {
            request_type: RequestType::Discovery,
            contexts: vec![context],
        }
    }

    pub fn collect(contexts: Vec<CollectorContext>) -> Self {
        Self {
            request_type: RequestType::Collect,
            contexts,
        }
    }
}

/// One line of collector output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectorResult {
    pub status: String,
    pub provision_id: Option<i32>,
    pub result: Option<Value>,
}

impl CollectorResult {
    /// Parses one output line. Anything other than a JSON object is rejected.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
        let Value::Object(fields) = value else {
            return Err("expected a JSON object".to_string());
        };

        Ok(Self {
            status: fields
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            provision_id: fields.get("provisionId").and_then(lenient_i32),
            result: fields.get("result").cloned(),
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_SUCCESS)
    }

    /// The metrics object, if it holds at least one entry.
    pub fn metrics(&self) -> Option<&Map<String, Value>> {
        match &self.result {
            Some(Value::Object(map)) if !map.is_empty() => Some(map),
            _ => None,
        }
    }
}

/// Accepts integers and numeric strings that fit in an `i32`.
pub fn lenient_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let mut attributes = Map::new();
        attributes.insert("username".to_string(), json!("admin"));
        let request = CollectorRequest::collect(vec![CollectorContext {
            ip: "10.0.0.5".to_string(),
            port: 22,
            credentials: vec![FormattedCredential {
                name: "lab".to_string(),
                credential_type: "ssh".to_string(),
                attributes,
            }],
            provision_id: Some(7),
        }]);

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "requestType": "Collect",
                "contexts": [{
                    "ip": "10.0.0.5",
                    "port": 22,
                    "credentials": [{
                        "credential.name": "lab",
                        "credential.type": "ssh",
                        "attributes": {"username": "admin"}
                    }],
                    "provisionId": 7
                }]
            })
        );
    }

    #[test]
    fn test_discovery_context_omits_provision_id() {
        let request = CollectorRequest::discovery(CollectorContext {
            ip: "10.0.0.5".to_string(),
            port: 22,
            credentials: Vec::new(),
            provision_id: None,
        });
        let line = serde_json::to_string(&request).unwrap();
        assert!(line.starts_with(r#"{"requestType":"Discovery""#));
        assert!(!line.contains("provisionId"));
    }

    #[test]
    fn test_parse_line() {
        let parsed =
            CollectorResult::parse_line(r#"{"status":"success","provisionId":7,"result":{"cpu":42}}"#)
                .unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.provision_id, Some(7));
        assert_eq!(parsed.metrics().unwrap()["cpu"], json!(42));

        let stringly = CollectorResult::parse_line(r#"{"status":"Fail","provisionId":"12"}"#).unwrap();
        assert!(!stringly.is_success());
        assert_eq!(stringly.provision_id, Some(12));
        assert!(stringly.metrics().is_none());

        assert!(CollectorResult::parse_line("not json").is_err());
        assert!(CollectorResult::parse_line("[1,2]").is_err());
    }

    #[test]
    fn test_empty_metrics_are_absent() {
        let parsed = CollectorResult::parse_line(r#"{"status":"Success","result":{}}"#).unwrap();
        assert!(parsed.metrics().is_none());
        let scalar = CollectorResult::parse_line(r#"{"status":"Success","result":5}"#).unwrap();
        assert!(scalar.metrics().is_none());
    }
}
