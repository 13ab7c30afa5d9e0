//! Wire protocol for the tungo reverse HTTP tunnel.
//!
//! Frames are single JSON text messages riding inside a WebSocket connection.
//! Two frame families share the wire: the control-plane handshake
//! ([`ClientHello`] / [`ServerHello`]) and the stream-plane multiplex
//! ([`Frame`]).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame of type `{0}` missing required field `{1}`")]
    MissingField(String, &'static str),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Client authentication mode, derived from whether a secret was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Auth,
    Anonymous,
}

/// Outcome carried by a [`ServerHello`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerHelloType {
    Success,
    SubDomainInUse,
    InvalidSubDomain,
    AuthFailed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretKey {
    pub key: String,
}

/// The first message the client sends after the control channel is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub id: String,
    pub client_type: ClientType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub secret_key: Option<SecretKey>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reconnect_token: Option<Value>,
}

impl ClientHello {
    /// Build a fresh hello. `sub_domain` is omitted from the wire form when empty.
    pub fn new(sub_domain: Option<&str>, secret_key: Option<&str>) -> Self {
        let sub_domain = sub_domain
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            id: Uuid::new_v4().to_string(),
            client_type: if secret_key.is_some() {
                ClientType::Auth
            } else {
                ClientType::Anonymous
            },
            sub_domain,
            secret_key: secret_key.map(|key| SecretKey { key: key.to_string() }),
            reconnect_token: None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The server's response to a [`ClientHello`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(rename = "type")]
    pub kind: ServerHelloType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reconnect_token: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ServerHello {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_success(&self) -> bool {
        self.kind == ServerHelloType::Success
    }

    /// Human-readable diagnostic for a non-success outcome: the server's
    /// `error` string if present, otherwise the outcome type itself.
    pub fn diagnostic(&self) -> String {
        self.error.clone().unwrap_or_else(|| match self.kind {
            ServerHelloType::Success => "success".to_string(),
            ServerHelloType::SubDomainInUse => "sub_domain_in_use".to_string(),
            ServerHelloType::InvalidSubDomain => "invalid_sub_domain".to_string(),
            ServerHelloType::AuthFailed => "auth_failed".to_string(),
            ServerHelloType::Error => "error".to_string(),
        })
    }

    /// The public URL to resolve this tunnel at, falling back to the legacy
    /// `http://<hostname>` construction for servers that omit `public_url`.
    pub fn resolved_url(&self) -> Option<String> {
        self.public_url
            .clone()
            .or_else(|| self.hostname.as_ref().map(|h| format!("http://{h}")))
    }
}

/// A stream-plane frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Server announces a new stream; `data` is opaque, server-supplied metadata.
    Init { stream_id: String, data: Option<Value> },
    /// `data` is the base64-encoded raw bytes of an HTTP/1.1 message chunk.
    Data { stream_id: String, data: String },
    /// Terminates the stream in the sender's direction.
    End { stream_id: String },
    Ping,
    Pong,
    /// A frame whose `type` this codec doesn't recognize. Carried as-is so
    /// the dispatcher can log and ignore it instead of failing the whole
    /// receive loop.
    Unknown { kind: String, raw: Value },
}

impl Frame {
    pub fn data(stream_id: impl Into<String>, bytes: &[u8]) -> Self {
        Frame::Data {
            stream_id: stream_id.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn end(stream_id: impl Into<String>) -> Self {
        Frame::End { stream_id: stream_id.into() }
    }

    /// Decode this frame's base64 `data` payload, if it is a [`Frame::Data`].
    pub fn decoded_data(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Frame::Data { data, .. } => Ok(base64::engine::general_purpose::STANDARD.decode(data)?),
            _ => Ok(Vec::new()),
        }
    }

    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Frame::Init { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::End { stream_id } => Some(stream_id.as_str()),
            Frame::Ping | Frame::Pong | Frame::Unknown { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let value = match self {
            Frame::Init { stream_id, data } => {
                let mut obj = serde_json::json!({ "type": "init", "stream_id": stream_id });
                if let Some(data) = data {
                    obj["data"] = data.clone();
                }
                obj
            }
            Frame::Data { stream_id, data } => {
                serde_json::json!({ "type": "data", "stream_id": stream_id, "data": { "data": data } })
            }
            Frame::End { stream_id } => serde_json::json!({ "type": "end", "stream_id": stream_id }),
            Frame::Ping => serde_json::json!({ "type": "ping" }),
            Frame::Pong => serde_json::json!({ "type": "pong" }),
            Frame::Unknown { raw, .. } => raw.clone(),
        };
        Ok(serde_json::to_string(&value)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let stream_id = |v: &Value| -> Option<String> {
            v.get("stream_id").and_then(Value::as_str).map(str::to_string)
        };

        match kind.as_str() {
            "init" => {
                let stream_id = stream_id(&value)
                    .ok_or_else(|| ProtocolError::MissingField(kind.clone(), "stream_id"))?;
                Ok(Frame::Init { stream_id, data: value.get("data").cloned() })
            }
            "data" => {
                let stream_id = stream_id(&value)
                    .ok_or_else(|| ProtocolError::MissingField(kind.clone(), "stream_id"))?;
                // The payload rides as either `{"data": {"data": "<b64>"}}` (the
                // documented wire shape) or, defensively, `{"data": "<b64>"}`.
                let data = value
                    .get("data")
                    .and_then(|d| d.get("data").and_then(Value::as_str).or_else(|| d.as_str()))
                    .ok_or_else(|| ProtocolError::MissingField(kind.clone(), "data"))?
                    .to_string();
                Ok(Frame::Data { stream_id, data })
            }
            "end" => {
                let stream_id = stream_id(&value)
                    .ok_or_else(|| ProtocolError::MissingField(kind.clone(), "stream_id"))?;
                Ok(Frame::End { stream_id })
            }
            "ping" => Ok(Frame::Ping),
            "pong" => Ok(Frame::Pong),
            _ => Ok(Frame::Unknown { kind, raw: value }),
        }
    }
}

/// Generate a fresh opaque stream identifier, for callers that originate streams.
pub fn new_stream_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_omits_empty_subdomain() {
        let hello = ClientHello::new(None, None);
        let text = hello.encode().unwrap();
        assert!(!text.contains("sub_domain"));
        assert!(!text.contains("secret_key"));
        assert!(text.contains("\"client_type\":\"anonymous\""));
    }

    #[test]
    fn client_hello_with_secret_is_auth_type() {
        let hello = ClientHello::new(Some("abc"), Some("shh"));
        let text = hello.encode().unwrap();
        assert!(text.contains("\"client_type\":\"auth\""));
        assert!(text.contains("\"sub_domain\":\"abc\""));
        assert!(text.contains("\"key\":\"shh\""));
    }

    #[test]
    fn server_hello_roundtrip_success() {
        let text = r#"{"type":"success","sub_domain":"abc","public_url":"http://abc.rv"}"#;
        let hello = ServerHello::decode(text).unwrap();
        assert!(hello.is_success());
        assert_eq!(hello.resolved_url().as_deref(), Some("http://abc.rv"));
    }

    #[test]
    fn server_hello_legacy_hostname_fallback() {
        let text = r#"{"type":"success","sub_domain":"abc","hostname":"abc.rv"}"#;
        let hello = ServerHello::decode(text).unwrap();
        assert_eq!(hello.resolved_url().as_deref(), Some("http://abc.rv"));
    }

    #[test]
    fn server_hello_rejection_carries_error() {
        let text = r#"{"type":"sub_domain_in_use","error":"taken"}"#;
        let hello = ServerHello::decode(text).unwrap();
        assert!(!hello.is_success());
        assert_eq!(hello.diagnostic(), "taken");
    }

    #[test]
    fn server_hello_rejection_without_error_uses_type() {
        let text = r#"{"type":"auth_failed"}"#;
        let hello = ServerHello::decode(text).unwrap();
        assert_eq!(hello.diagnostic(), "auth_failed");
    }

    #[test]
    fn frame_roundtrip_init() {
        let frame = Frame::Init { stream_id: "s1".into(), data: Some(serde_json::json!({"protocol": "http"})) };
        let text = frame.encode().unwrap();
        let decoded = Frame::decode(&text).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_roundtrip_data() {
        let frame = Frame::data("s1", b"hello world");
        let text = frame.encode().unwrap();
        let decoded = Frame::decode(&text).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.decoded_data().unwrap(), b"hello world");
    }

    #[test]
    fn frame_roundtrip_end_ping_pong() {
        for frame in [Frame::end("s1"), Frame::Ping, Frame::Pong] {
            let text = frame.encode().unwrap();
            assert_eq!(Frame::decode(&text).unwrap(), frame);
        }
    }

    #[test]
    fn frame_unknown_type_is_preserved_not_rejected() {
        let text = r#"{"type":"websocket_frame","stream_id":"s1","data":"xx"}"#;
        let decoded = Frame::decode(text).unwrap();
        match decoded {
            Frame::Unknown { kind, .. } => assert_eq!(kind, "websocket_frame"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn frame_missing_required_field_is_an_error() {
        let text = r#"{"type":"data","stream_id":"s1"}"#;
        assert!(Frame::decode(text).is_err());
    }

    #[test]
    fn stream_ids_are_unique() {
        assert_ne!(new_stream_id(), new_stream_id());
    }
}
