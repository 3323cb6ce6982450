use hitrelay_core::{Message, SenderId, Sentinel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Message type of a batched events envelope.
pub const MSG_TYPE_EVENTS: &str = "ampAnalytics3pEvents";
/// Message type of an extra-data envelope.
pub const MSG_TYPE_EXTRA_DATA: &str = "ampAnalytics3pExtraData";
/// Message type of an inbound response envelope.
pub const MSG_TYPE_RESPONSE: &str = "ampAnalytics3pResponse";

/// One hit inside a batched events envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "senderId")]
    pub sender_id: SenderId,
    pub request: String,
}

impl From<Message> for EventRecord {
    fn from(message: Message) -> Self {
        Self {
            sender_id: message.sender_id,
            request: message.payload,
        }
    }
}

/// Envelope exchanged with a shared channel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "ampAnalytics3pEvents")]
    Events {
        sentinel: Sentinel,
        #[serde(rename = "ampAnalytics3pEvents")]
        events: Vec<EventRecord>,
    },
    #[serde(rename = "ampAnalytics3pExtraData")]
    ExtraData {
        sentinel: Sentinel,
        #[serde(rename = "senderId")]
        sender_id: SenderId,
        #[serde(rename = "ampAnalytics3pExtraData")]
        data: String,
    },
    #[serde(rename = "ampAnalytics3pResponse")]
    Response {
        sentinel: Sentinel,
        #[serde(rename = "ampAnalytics3pResponse", default)]
        response: Option<Value>,
    },
}

impl Envelope {
    /// Wraps an ordered batch of queued messages, consuming them.
    pub fn events(sentinel: Sentinel, batch: Vec<Message>) -> Self {
        Self::Events {
            sentinel,
            events: batch.into_iter().map(EventRecord::from).collect(),
        }
    }

    pub fn extra_data(sentinel: Sentinel, sender_id: SenderId, data: impl Into<String>) -> Self {
        Self::ExtraData {
            sentinel,
            sender_id,
            data: data.into(),
        }
    }

    pub fn response(sentinel: Sentinel, response: Value) -> Self {
        Self::Response {
            sentinel,
            response: Some(response),
        }
    }

    /// Registered message type name of this envelope.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Events { .. } => MSG_TYPE_EVENTS,
            Self::ExtraData { .. } => MSG_TYPE_EXTRA_DATA,
            Self::Response { .. } => MSG_TYPE_RESPONSE,
        }
    }

    pub fn sentinel(&self) -> &Sentinel {
        match self {
            Self::Events { sentinel, .. }
            | Self::ExtraData { sentinel, .. }
            | Self::Response { sentinel, .. } => sentinel,
        }
    }
}

/// Encodes an envelope as JSON bytes.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decodes JSON bytes into an envelope.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes an inbound response addressed to the channel owning `sentinel`.
///
/// Anything other than a response envelope with the matching sentinel and a
/// non-empty response payload is rejected.
pub fn decode_response(bytes: &[u8], sentinel: &Sentinel) -> Result<Value, CodecError> {
    let (got, response) = match decode_envelope(bytes)? {
        Envelope::Response { sentinel, response } => (sentinel, response),
        other => return Err(CodecError::UnexpectedType(other.message_type())),
    };
    if &got != sentinel {
        return Err(CodecError::SentinelMismatch);
    }
    match response {
        None | Some(Value::Null) => Err(CodecError::MissingField(MSG_TYPE_RESPONSE)),
        Some(Value::String(s)) if s.is_empty() => Err(CodecError::MissingField(MSG_TYPE_RESPONSE)),
        Some(value) => Ok(value),
    }
}
