//! 串口报文：按行分隔的 JSON `{"topic": "...", "data": {...}}`。
//!
//! 报文没有关联 ID，请求与响应靠期望主题加时间窗口匹配。

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 串口主题（封闭集合）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "command/ping")]
    Ping,
    #[serde(rename = "command/pong")]
    Pong,
    #[serde(rename = "request/current_reading")]
    RequestCurrentReading,
    #[serde(rename = "response/current_reading")]
    ResponseCurrentReading,
    #[serde(rename = "config/threshold")]
    ConfigThreshold,
    #[serde(rename = "config/interval")]
    ConfigInterval,
    #[serde(rename = "command/reset")]
    Reset,
    /// 设备主动上报
    #[serde(rename = "sensor/reading")]
    SensorReading,
    #[serde(rename = "sensor/status")]
    SensorStatus,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Ping => "command/ping",
            Topic::Pong => "command/pong",
            Topic::RequestCurrentReading => "request/current_reading",
            Topic::ResponseCurrentReading => "response/current_reading",
            Topic::ConfigThreshold => "config/threshold",
            Topic::ConfigInterval => "config/interval",
            Topic::Reset => "command/reset",
            Topic::SensorReading => "sensor/reading",
            Topic::SensorStatus => "sensor/status",
        }
    }
}

/// 一条串口报文。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub topic: Topic,
    pub data: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    topic: Topic,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            data: Map::new(),
        }
    }

    pub fn with_data(topic: Topic, data: Map<String, Value>) -> Self {
        Self { topic, data }
    }

    /// 编码为一行（含结尾换行）。
    pub fn encode_line(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut line =
            serde_json::to_vec(self).map_err(|err| ProtocolError::Codec(err.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    /// 解析一行报文；未知主题视为解析失败。`data` 缺失或非对象时视为空对象。
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope =
            serde_json::from_str(line).map_err(|err| ProtocolError::Codec(err.to_string()))?;
        let data = match raw.data {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Ok(Self {
            topic: raw.topic,
            data,
        })
    }
}
