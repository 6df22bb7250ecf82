//! Remote SDK message envelope.
//!
//! Protocol:
//!   Server → Phone: {"Request-URI":"/api/Config/v1/GetParams","params":["DND_Setting"]}
//!   Phone → Server: {"type":"response","result":{...}}   (call response)
//!   Phone → Server: {"type":"event",...}                 (unsolicited, ignored)
//!
//! Responses carry no request id. A response belongs to whichever call is
//! currently in flight on that peer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::wire::{EVENT_TYPE, REQUEST_URI_FIELD, TYPE_FIELD};
use crate::error::MessageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Unsolicited notification.
    Event,
    /// Anything else, including a message with no `type` at all.
    Response,
}

/// A parsed inbound frame. The payload is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub payload: Value,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let payload: Value =
            serde_json::from_str(raw).map_err(|e| MessageError::Malformed(e.to_string()))?;

        let kind = match payload.as_object() {
            Some(fields) => match fields.get(TYPE_FIELD).and_then(Value::as_str) {
                Some(EVENT_TYPE) => MessageKind::Event,
                _ => MessageKind::Response,
            },
            None => {
                return Err(MessageError::Malformed(
                    "payload is not a JSON object".to_string(),
                ))
            }
        };

        Ok(Self { kind, payload })
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }
}

/// Outbound call payload: `{"Request-URI": uri, ...params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(rename = "Request-URI")]
    pub request_uri: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Endpoints used by the bundled demo.
pub mod endpoints {
    pub const GET_PARAMS: &str = "/api/Config/v1/GetParams";
    pub const SET_PARAMS: &str = "/api/Config/v1/SetParams";
    pub const DIAL: &str = "/api/Call/v1/Dial";
    pub const ANSWER: &str = "/api/Call/v1/Answer";
    pub const HANGUP: &str = "/api/Call/v1/Hangup";
    pub const DEVICE_SCREENSHOT: &str = "/api/Ui/v1/GetDeviceScreenshot";
    pub const STATUS_FILE: &str = "/api/Serviceability/v1/GetStatusFile";
}

impl ApiRequest {
    pub fn new(request_uri: impl Into<String>) -> Self {
        Self {
            request_uri: request_uri.into(),
            params: Map::new(),
        }
    }

    /// Adds a top-level field. `Request-URI` is never duplicated: a string
    /// replaces the endpoint, anything else is dropped.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == REQUEST_URI_FIELD {
            if let Value::String(uri) = value {
                self.request_uri = uri;
            }
            return self;
        }
        self.params.insert(key, value);
        self
    }

    pub fn get_params<S: AsRef<str>>(names: &[S]) -> Self {
        let names: Vec<Value> = names.iter().map(|n| Value::from(n.as_ref())).collect();
        Self::new(endpoints::GET_PARAMS).with("params", names)
    }

    pub fn set_params(values: Map<String, Value>) -> Self {
        Self::new(endpoints::SET_PARAMS).with("params", values)
    }

    pub fn dial(line: u32, number: &str) -> Self {
        Self::new(endpoints::DIAL)
            .with("line", line)
            .with("number", number)
    }

    pub fn answer(line: u32, call_id: u32) -> Self {
        Self::new(endpoints::ANSWER)
            .with("line", line)
            .with("callId", call_id)
    }

    pub fn hangup(line: u32, call_id: u32) -> Self {
        Self::new(endpoints::HANGUP)
            .with("line", line)
            .with("callId", call_id)
    }

    pub fn device_screenshot(upload_method: &str, url: &str) -> Self {
        Self::new(endpoints::DEVICE_SCREENSHOT)
            .with("uploadMethod", upload_method)
            .with("url", url)
    }

    pub fn status_file() -> Self {
        Self::new(endpoints::STATUS_FILE)
    }
}

/// Reads `result.paramvalues.<name>` from a `GetParams` response.
pub fn param_value<'a>(response: &'a Value, name: &str) -> Option<&'a str> {
    response
        .get("result")?
        .get("paramvalues")?
        .get(name)?
        .as_str()
}
