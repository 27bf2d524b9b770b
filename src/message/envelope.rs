//! 消息与信封
//!
//! `Message` 是跨传输层的线格式（命令路径 + 位置参数 + 命名参数）；
//! `Envelope` 包装一条在树中流动的消息，记录来源与是否已被消费。

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::command::Command;
use crate::core::SseqError;

/// 来源标识：从根到发送者的名字路径
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentPath(Vec<String>);

impl AgentPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for AgentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// 线格式消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub cmd: Command,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Message {
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// 追加命名参数；序列化失败时记为 null（payload 类型都由本 crate 定义，不会失败）
    pub fn with<T: Serialize>(mut self, name: &str, value: T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.kwargs.insert(name.to_string(), value);
        self
    }

    pub fn with_arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    /// 命名参数优先，其次按位置取
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        self.kwargs
            .get(name)
            .or_else(|| self.args.get(position))
            .filter(|v| !v.is_null())
    }

    pub fn require<T: DeserializeOwned>(&self, name: &str, position: usize) -> Result<T, SseqError> {
        let value = self.get(name, position).ok_or_else(|| SseqError::MissingArgument {
            command: self.cmd.to_string(),
            name: name.to_string(),
        })?;
        decode_arg(&self.cmd, name, value)
    }

    pub fn optional<T: DeserializeOwned>(
        &self,
        name: &str,
        position: usize,
    ) -> Result<Option<T>, SseqError> {
        self.get(name, position)
            .map(|v| decode_arg(&self.cmd, name, v))
            .transpose()
    }
}

fn decode_arg<T: DeserializeOwned>(cmd: &Command, name: &str, value: &Value) -> Result<T, SseqError> {
    T::deserialize(value).map_err(|e| SseqError::InvalidArgument {
        command: cmd.to_string(),
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// 在途消息 + 消费状态
#[derive(Debug, Clone)]
pub struct Envelope {
    /// 日志关联用
    pub id: String,
    pub source: AgentPath,
    pub msg: Message,
    used: bool,
}

impl Envelope {
    pub fn new(source: AgentPath, msg: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            msg,
            used: false,
        }
    }

    pub fn command(&self) -> &Command {
        &self.msg.cmd
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// 唯一一次「已消费」转换；重复调用视为编程错误
    pub fn mark_used(&mut self) -> Result<(), SseqError> {
        if self.used {
            return Err(SseqError::DoubleConsume(self.msg.cmd.to_string()));
        }
        self.used = true;
        Ok(())
    }

    /// 广播给另一个接收者时使用的新副本（未消费、新 id）
    pub fn fresh_copy(&self) -> Self {
        Self::new(self.source.clone(), self.msg.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn click() -> Message {
        Message::new(Command::parse("click").unwrap())
            .with_arg(json!(1.5))
            .with("y", 2.0)
    }

    #[test]
    fn test_mark_used_once() {
        let mut env = Envelope::new(AgentPath::default(), click());
        assert!(!env.is_used());
        env.mark_used().unwrap();
        assert!(env.is_used());
        assert!(matches!(env.mark_used(), Err(SseqError::DoubleConsume(_))));
        assert!(env.is_used());
    }

    #[test]
    fn test_fresh_copy_is_unused() {
        let mut env = Envelope::new(AgentPath::new(vec!["root".into()]), click());
        env.mark_used().unwrap();
        let copy = env.fresh_copy();
        assert!(!copy.is_used());
        assert_ne!(copy.id, env.id);
        assert_eq!(copy.source, env.source);
    }

    #[test]
    fn test_argument_lookup() {
        let msg = click();
        let x: f64 = msg.require("x", 0).unwrap();
        let y: f64 = msg.require("y", 1).unwrap();
        assert_eq!((x, y), (1.5, 2.0));
        let c: Option<usize> = msg.optional("chart_class", 2).unwrap();
        assert!(c.is_none());
        assert!(matches!(
            msg.require::<String>("mode", 5),
            Err(SseqError::MissingArgument { .. })
        ));
        assert!(matches!(
            msg.require::<String>("x", 0),
            Err(SseqError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_wire_shape() {
        let msg: Message = serde_json::from_value(json!({
            "cmd": "interact.mode.set",
            "kwargs": { "mode": "AddClassMode" }
        }))
        .unwrap();
        assert_eq!(msg.cmd.to_string(), "interact.mode.set");
        assert!(msg.args.is_empty());
        assert_eq!(msg.require::<String>("mode", 0).unwrap(), "AddClassMode");
        assert_eq!(AgentPath::new(vec!["root".into(), "web".into()]).to_string(), "/root/web");
    }
}
