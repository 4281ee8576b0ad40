//! Line protocol envelopes.
//!
//! One JSON object per line: `{"id"?, "type", "payload"?, "error"?}`.
//! Requests that expect an answer carry an `id`; the answer is a `reply`
//! envelope with the same id and either a payload or a non-empty error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Harness -> worker
pub const MODULE: &str = "module";
pub const CALLBACK: &str = "callback";
pub const LOG: &str = "log";
pub const PRINT: &str = "print";
pub const SLEEP: &str = "sleep";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const NEXT_EVENT: &str = "next_event";
pub const SIGNAL: &str = "signal";
pub const NEXT_SIGNAL: &str = "next_signal";
pub const STORE_MUTATE: &str = "store_mutate";
pub const STORE_LIST: &str = "store_list";
pub const DONE: &str = "done";

// Worker -> harness
pub const RUN: &str = "run";
pub const EXECUTE: &str = "execute";
pub const RESPONSE: &str = "response";

// Both directions
pub const HEALTH: &str = "health";
pub const REPLY: &str = "reply";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn request<T: Serialize>(
        id: u64,
        kind: &str,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Some(id),
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
            error: None,
        })
    }

    pub fn reply(id: u64, payload: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            kind: REPLY.to_string(),
            payload,
            error: None,
        }
    }

    pub fn error_reply(id: u64, error: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            kind: REPLY.to_string(),
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.kind == REPLY
    }

    /// The error field, with empty strings treated as absent.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{CallInfo, StartRequest};
    use crate::value::Value;

    #[test]
    fn requests_carry_id_type_and_payload() {
        let call = CallInfo {
            function: "wf.fetch".into(),
            args: vec![Value::Bytes(b"hi".to_vec())],
            kwargs: Default::default(),
        };
        let line = Envelope::request(7, CALLBACK, &call).unwrap().to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""type":"callback""#), "{line}");
        assert!(line.contains(r#""bytes":"aGk=""#), "{line}");
        assert!(!line.contains("error"));

        let parsed = Envelope::from_line(&line).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert_eq!(parsed.decode::<CallInfo>().unwrap(), call);
    }

    #[test]
    fn empty_error_fields_are_not_errors() {
        let reply = Envelope::from_line(r#"{"id":1,"type":"reply","error":""}"#).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.error(), None);

        let failed = Envelope::error_reply(2, "no such key");
        assert_eq!(failed.error(), Some("no such key"));
    }

    #[test]
    fn run_requests_default_the_event() {
        let envelope = Envelope::from_line(
            r#"{"id":3,"type":"run","payload":{"runner_id":"r","entry_point":"wf.flow:main"}}"#,
        )
        .unwrap();
        let start: StartRequest = envelope.decode().unwrap();
        assert_eq!(start.entry_point, "wf.flow:main");
        assert_eq!(start.event, Value::Nothing);
    }
}
