//! Request and response envelopes carried inside frame payloads

use acelink_core::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request
///
/// `id` is assigned by the dispatcher when the request is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id
    pub id: u32,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request without parameters
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: 0,
            method: method.into(),
            params: None,
        }
    }

    /// Attach parameters
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Inbound response: `{id?, code, msg?, result?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers, absent for unsolicited reports
    #[serde(default)]
    pub id: Option<u32>,
    /// Zero on success
    #[serde(default)]
    pub code: i64,
    /// Human-readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Method-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    /// True when the device accepted the request
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Error text reported by the device
    ///
    /// Some firmware puts the message inside `result` instead of at the top
    /// level.
    pub fn error_message(&self) -> String {
        self.msg
            .clone()
            .or_else(|| {
                self.result
                    .as_ref()
                    .and_then(|r| r.get("msg"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    /// Turn a non-zero code into a device error
    pub fn into_result(self) -> Result<Response, RequestError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(RequestError::Device {
                code: self.code,
                message: self.error_message(),
            })
        }
    }

    /// Integer field of the result object
    pub fn result_i64(&self, key: &str) -> Option<i64> {
        self.result.as_ref()?.get(key)?.as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_omits_missing_params() {
        let mut req = Request::new("get_status");
        req.id = 4;
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"id": 4, "method": "get_status"})
        );

        let req = Request::new("start_feed_assist").with_params(json!({"index": 2}));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"id": 0, "method": "start_feed_assist", "params": {"index": 2}})
        );
    }

    #[test]
    fn test_response_defaults() {
        let resp: Response = serde_json::from_str(r#"{"result": {"status": "ready"}}"#).unwrap();
        assert_eq!(resp.id, None);
        assert!(resp.is_ok());
    }

    #[test]
    fn test_device_error_message_fallbacks() {
        let resp: Response =
            serde_json::from_str(r#"{"id": 1, "code": 2, "result": {"msg": "slot empty"}}"#)
                .unwrap();
        assert_eq!(
            resp.into_result().unwrap_err(),
            RequestError::Device {
                code: 2,
                message: "slot empty".to_string()
            }
        );

        let resp: Response = serde_json::from_str(r#"{"id": 1, "code": 3}"#).unwrap();
        assert_eq!(resp.error_message(), "Unknown error");
    }
}
