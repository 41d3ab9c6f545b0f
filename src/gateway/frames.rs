use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Outbound line tags.
pub mod tag {
    pub const STATUS: &str = "[STATUS]";
    pub const HEARTBEAT: &str = "[HEARTBEAT]";
    pub const AI_ANSWER: &str = "[AI_ANSWER]";
    pub const ERROR: &str = "[ERROR]";
}

pub const HEARTBEAT_PING: &str = "ping";
pub const HEARTBEAT_PONG: &str = "PONG";
pub const CONNECT_SUCCESS: &str = "CONNECT_SUCCESS";

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// A text frame sent from the gateway to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    ConnectSuccess,
    Pong,
    RequestAccepted,
    /// Already-shaped answer payload, written after the tag as is.
    AiAnswer(String),
    StreamComplete,
    MalformedFrame,
    InvalidParams,
    UpstreamFailed(String),
    ServerError(String),
}

impl OutboundFrame {
    /// Map one upstream body line to its answer frame. Blank lines yield
    /// nothing. `data:` lines pass through unless they carry the `[DONE]`
    /// sentinel; everything else is re-wrapped behind `data: `.
    pub fn answer(line: &str) -> Option<Self> {
        if line.is_empty() {
            return None;
        }
        if line.starts_with(DATA_PREFIX) && !line.contains(DONE_SENTINEL) {
            Some(OutboundFrame::AiAnswer(line.to_string()))
        } else {
            Some(OutboundFrame::AiAnswer(format!("data: {line}")))
        }
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::ConnectSuccess => write!(f, "{} {CONNECT_SUCCESS}", tag::STATUS),
            OutboundFrame::Pong => write!(f, "{} {HEARTBEAT_PONG}", tag::HEARTBEAT),
            OutboundFrame::RequestAccepted => {
                write!(f, "{} 正在请求AI回答，请稍候...", tag::STATUS)
            }
            OutboundFrame::AiAnswer(payload) => write!(f, "{} {payload}", tag::AI_ANSWER),
            OutboundFrame::StreamComplete => {
                write!(f, "{} AI回答流式推送完成 ✔️", tag::STATUS)
            }
            OutboundFrame::MalformedFrame => {
                write!(f, "{} 请发送标准的JSON格式数据！", tag::ERROR)
            }
            OutboundFrame::InvalidParams => write!(
                f,
                "{} 参数错误：resm(接口后缀)和data(请求体)不能为空！",
                tag::ERROR
            ),
            OutboundFrame::UpstreamFailed(detail) => {
                write!(f, "{} 请求Dify接口失败：{detail}", tag::ERROR)
            }
            OutboundFrame::ServerError(detail) => {
                write!(f, "{} 服务端异常：{detail}", tag::ERROR)
            }
        }
    }
}

/// Raw business envelope. Every field is optional on the wire; `type` is
/// read from the raw object before this is built.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(default)]
    resm: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// A validated request to forward upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessRequest {
    /// Route suffix appended to the upstream base address.
    pub resm: String,
    pub headers: HashMap<String, String>,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Heartbeat,
    Business(BusinessRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Not JSON, not an object, or a field of the wrong type.
    Malformed,
    /// `resm` or `data` missing or empty on a business frame.
    MissingParams,
}

impl FrameError {
    pub fn reply(self) -> OutboundFrame {
        match self {
            FrameError::Malformed => OutboundFrame::MalformedFrame,
            FrameError::MissingParams => OutboundFrame::InvalidParams,
        }
    }
}

/// Parse and classify one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|_| FrameError::Malformed)?;
    // Arrays would otherwise deserialize positionally into the envelope.
    if !value.is_object() {
        return Err(FrameError::Malformed);
    }
    // A ping is answered whatever else the object carries.
    if value.get("type").and_then(Value::as_str) == Some(HEARTBEAT_PING) {
        return Ok(InboundFrame::Heartbeat);
    }
    let envelope: InboundEnvelope =
        serde_json::from_value(value).map_err(|_| FrameError::Malformed)?;

    let resm = envelope.resm.unwrap_or_default();
    let data = envelope.data.unwrap_or_default();
    if resm.is_empty() || data.is_empty() {
        return Err(FrameError::MissingParams);
    }

    Ok(InboundFrame::Business(BusinessRequest {
        resm,
        headers: envelope.headers.unwrap_or_default(),
        data,
    }))
}
