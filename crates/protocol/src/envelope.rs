use serde::{Deserialize, Serialize};

use crate::constants::{ErrorKind, EventType};
use crate::messages::TransferErrorPayload;

/// Error details in a WebSocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Envelope for all WebSocket communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the event type is known. `id` is an optional
/// client-chosen correlation id echoed on direct replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

/// Failure to extract a typed payload from a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("missing payload")]
    Missing,

    #[error("invalid payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: EventType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: raw,
            error: None,
        })
    }

    /// Creates an uncorrelated push event (room broadcasts).
    pub fn event<T: Serialize>(msg_type: EventType, payload: &T) -> Result<Self, serde_json::Error> {
        Message::new(String::new(), msg_type, Some(payload))
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Deserializes a payload that must be present.
    pub fn require_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, PayloadError> {
        self.parse_payload()?.ok_or(PayloadError::Missing)
    }

    /// Creates a generic error message.
    pub fn error(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: EventType::Error,
            payload: None,
            error: Some(WsError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Creates a `file-transfer-error` message.
    ///
    /// `transfer_id` is attached as payload when the failing transfer is
    /// known (chunk errors), and omitted for rejected starts.
    pub fn transfer_error(
        id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        transfer_id: Option<&str>,
    ) -> Self {
        let payload = transfer_id.and_then(|tid| {
            let body = TransferErrorPayload {
                transfer_id: tid.to_string(),
            };
            serde_json::to_string(&body)
                .ok()
                .and_then(|json| serde_json::value::RawValue::from_string(json).ok())
        });
        Self {
            id: id.into(),
            msg_type: EventType::FileTransferError,
            payload,
            error: Some(WsError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Creates a response message for this request.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: EventType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(&self.id, msg_type, payload)
    }

    /// Creates a generic error response for this request.
    pub fn reply_error(&self, kind: ErrorKind, message: impl Into<String>) -> Self {
        Message::error(&self.id, kind, message)
    }

    /// Creates a `file-transfer-error` response for this request.
    pub fn reply_transfer_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        transfer_id: Option<&str>,
    ) -> Self {
        Message::transfer_error(&self.id, kind, message, transfer_id)
    }
}
