//! MQTT 主题过滤器（`+` 单级、`#` 多级）。

use crate::error::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Exact(String),
    /// `+`
    Single,
    /// `#`，只能是最后一段
    Multi,
}

/// 已校验的主题过滤器。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidFilter(pattern.to_string()));
        }
        let parts: Vec<&str> = pattern.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            let segment = match part {
                "#" if index == last => Segment::Multi,
                "+" => Segment::Single,
                other if other.contains('#') || other.contains('+') => {
                    return Err(BusError::InvalidFilter(pattern.to_string()));
                }
                other => Segment::Exact(other.to_string()),
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, Segment::Exact(_)))
    }

    /// `a/#` 同时匹配父级 `a`；主题层级数不足过滤器前缀时不匹配。
    pub fn matches(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('/').collect();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Multi => return true,
                Segment::Single => {
                    if index >= levels.len() {
                        return false;
                    }
                }
                Segment::Exact(expected) => {
                    if levels.get(index) != Some(&expected.as_str()) {
                        return false;
                    }
                }
            }
        }
        levels.len() == self.segments.len()
    }
}
