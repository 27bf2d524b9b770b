//! Command：点分隔的消息主题路径（如 `chart.class.add`）
//!
//! 订阅前缀与 Command 的匹配规则：前缀逐段相等，或订阅为 `*`（全匹配）。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::SseqError;

/// 全匹配订阅段
pub const WILDCARD: &str = "*";

/// 不可变的主题路径，按段比较
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Command {
    segments: Arc<[String]>,
}

impl Command {
    /// 从点分字符串解析；空字符串得到空路径（根订阅用）
    pub fn parse(path: &str) -> Result<Self, SseqError> {
        if path.is_empty() {
            return Ok(Self::empty());
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SseqError::MalformedMessage(format!(
                "empty segment in command \"{path}\""
            )));
        }
        Ok(Self {
            segments: segments.into(),
        })
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect::<Vec<_>>().into(),
        }
    }

    /// 代码内的常量主题，不做校验
    pub fn topic(path: &str) -> Self {
        Self::from_segments(path.split('.'))
    }

    pub fn empty() -> Self {
        Self {
            segments: Vec::new().into(),
        }
    }

    /// `*` 订阅
    pub fn wildcard() -> Self {
        Self::from_segments([WILDCARD])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == WILDCARD
    }

    /// 作为订阅时是否匹配 `command`
    pub fn matches(&self, command: &Command) -> bool {
        self.is_wildcard() || command.segments.starts_with(&self.segments)
    }

    /// 去掉前缀后的剩余路径；不以该前缀开头时返回 None
    pub fn strip_prefix(&self, prefix: &Command) -> Option<Command> {
        self.segments
            .strip_prefix(&prefix.segments[..])
            .map(|rest| Command::from_segments(rest.iter().cloned()))
    }

    /// 从第 n 段开始的后缀
    pub fn suffix(&self, from: usize) -> Command {
        Command::from_segments(self.segments.iter().skip(from).cloned())
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({self})")
    }
}

impl FromStr for Command {
    type Err = SseqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Command::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 判断一组订阅中是否有任一匹配
pub fn any_matches(subscriptions: &[Command], command: &Command) -> bool {
    subscriptions.iter().any(|s| s.matches(command))
}
