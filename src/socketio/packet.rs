//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Every websocket text frame is one engine packet. Engine `message` packets
//! carry a Socket.IO packet, e.g. `42["message",{"username":"a"}]` is an
//! engine message (`4`) wrapping a Socket.IO event (`2`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Namespace used when a packet does not name one.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake data sent by the server in the engine `open` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// Longest silence allowed from the server before the session counts as
    /// lost. `None` when the server advertised no heartbeat.
    pub fn heartbeat(&self) -> Option<Duration> {
        match self.ping_interval.saturating_add(self.ping_timeout) {
            0 => None,
            window => Some(Duration::from_millis(window)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let (kind, body) = split_kind(text)?;
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(info) => format!("0{}", serde_json::to_string(info).unwrap_or_default()),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Event on the default namespace without an ack id.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let (kind, mut rest) = split_kind(text)?;
        if matches!(kind, '5' | '6') {
            return Err(PacketError::Unsupported("binary packets"));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let namespace = &rest[..idx];
                    rest = &rest[idx + 1..];
                    namespace.to_string()
                }
                None => std::mem::take(&mut rest).to_string(),
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|_| PacketError::Malformed(format!("bad ack id in {text}")))?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let (name, args) = split_event(data)?;
                Ok(Self::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::Malformed("ack without id".to_string()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    Some(other) => {
                        return Err(PacketError::Malformed(format!(
                            "ack payload must be an array, got {other}"
                        )))
                    }
                };
                Ok(Self::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            '4' => Ok(Self::ConnectError { namespace, data }),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind());

        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }

        match self {
            Self::Connect { data, .. } | Self::ConnectError { data, .. } => {
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
            }
            Self::Disconnect { .. } => {}
            Self::Event { id, name, args, .. } => {
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
            }
            Self::Ack { id, args, .. } => {
                out.push_str(&id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
            }
        }

        out
    }

    /// Wraps the packet in an engine `message` frame.
    pub fn into_frame(self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    fn kind(&self) -> char {
        match self {
            Self::Connect { .. } => '0',
            Self::Disconnect { .. } => '1',
            Self::Event { .. } => '2',
            Self::Ack { .. } => '3',
            Self::ConnectError { .. } => '4',
        }
    }
}

/// Errors produced by packet decoding.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("packet json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("{0} are not supported")]
    Unsupported(&'static str),
}

fn split_kind(text: &str) -> Result<(char, &str), PacketError> {
    let kind = text.chars().next().ok_or(PacketError::Empty)?;
    Ok((kind, &text[kind.len_utf8()..]))
}

fn split_event(data: Option<Value>) -> Result<(String, Vec<Value>), PacketError> {
    let Some(Value::Array(mut items)) = data else {
        return Err(PacketError::Malformed(
            "event payload must be an array".to_string(),
        ));
    };
    if items.is_empty() {
        return Err(PacketError::Malformed("event without a name".to_string()));
    }
    match items.remove(0) {
        Value::String(name) => Ok((name, items)),
        other => Err(PacketError::Malformed(format!(
            "event name must be a string, got {other}"
        ))),
    }
}
