//! Cross-frame `__tcfapiCall` / `__tcfapiReturn` envelopes
//!
//! Calls arrive either as structured objects or as JSON text; replies use
//! the same form as the call they answer.

use cmp_config::protocol::messages::{CALL_KEY, RETURN_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcfApiCall {
    pub command: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Value>,
    /// Echoed verbatim in the reply; callers use strings or numbers
    pub call_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcfApiReturn {
    pub return_value: Value,
    pub success: bool,
    pub call_id: Value,
}

/// Wire form a call arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Object,
    Text,
}

fn unwrap_payload(data: &Value) -> Option<(Value, Encoding)> {
    match data {
        Value::String(text) => serde_json::from_str(text)
            .ok()
            .map(|value| (value, Encoding::Text)),
        Value::Object(_) => Some((data.clone(), Encoding::Object)),
        _ => None,
    }
}

/// Extract a call from a message; anything else yields `None`
pub fn parse_call(data: &Value) -> Option<(TcfApiCall, Encoding)> {
    let (payload, encoding) = unwrap_payload(data)?;
    let call = payload.get(CALL_KEY)?;
    serde_json::from_value(call.clone())
        .ok()
        .map(|call| (call, encoding))
}

pub fn parse_return(data: &Value) -> Option<TcfApiReturn> {
    let (payload, _) = unwrap_payload(data)?;
    let ret = payload.get(RETURN_KEY)?;
    serde_json::from_value(ret.clone()).ok()
}

pub fn call_message(call: &TcfApiCall, encoding: Encoding) -> Value {
    wrap(json!({ CALL_KEY: call }), encoding)
}

pub fn return_message(ret: &TcfApiReturn, encoding: Encoding) -> Value {
    wrap(json!({ RETURN_KEY: ret }), encoding)
}

fn wrap(message: Value, encoding: Encoding) -> Value {
    match encoding {
        Encoding::Object => message,
        Encoding::Text => Value::String(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_call() {
        let data = json!({
            "__tcfapiCall": { "command": "ping", "version": 2, "callId": "abc" }
        });
        let (call, encoding) = parse_call(&data).unwrap();
        assert_eq!(call.command, "ping");
        assert_eq!(call.version, 2);
        assert_eq!(call.call_id, json!("abc"));
        assert_eq!(call.parameter, None);
        assert_eq!(encoding, Encoding::Object);
    }

    #[test]
    fn test_parse_text_call_with_numeric_id() {
        let data = Value::String(
            r#"{"__tcfapiCall":{"command":"getTCData","version":2,"parameter":[1,2],"callId":7}}"#
                .to_string(),
        );
        let (call, encoding) = parse_call(&data).unwrap();
        assert_eq!(call.parameter, Some(json!([1, 2])));
        assert_eq!(call.call_id, json!(7));
        assert_eq!(encoding, Encoding::Text);
    }

    #[test]
    fn test_unrelated_messages_ignored() {
        assert!(parse_call(&json!({ "type": "resize" })).is_none());
        assert!(parse_call(&json!("not json")).is_none());
        assert!(parse_call(&json!(42)).is_none());
        assert!(parse_return(&json!({ "__tcfapiCall": {} })).is_none());
    }

    #[test]
    fn test_return_uses_call_encoding() {
        let ret = TcfApiReturn {
            return_value: json!(true),
            success: true,
            call_id: json!("x"),
        };
        let text = return_message(&ret, Encoding::Text);
        assert!(text.is_string());
        assert_eq!(parse_return(&text), Some(ret.clone()));

        let object = return_message(&ret, Encoding::Object);
        assert_eq!(object["__tcfapiReturn"]["returnValue"], json!(true));
    }
}
