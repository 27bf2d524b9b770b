//! 带类型标签的对象编解码
//!
//! 结构化对象序列化为带 `type` 判别字段的映射；反序列化按判别字段查注册表重建。
//! 注册表是封闭的枚举，未知判别字段直接拒绝。

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chart::{ChartClass, ChartEdge, ChartNode, Differential, Extension, Structline};
use crate::core::SseqError;

/// 判别字段名
pub const TYPE_FIELD: &str = "type";

/// 已注册的类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireObject {
    ChartClass(ChartClass),
    ChartStructline(Structline),
    ChartDifferential(Differential),
    ChartExtension(Extension),
    ChartNode(ChartNode),
}

impl WireObject {
    /// 注册表中的全部判别名
    pub const TYPE_NAMES: &'static [&'static str] = &[
        "ChartClass",
        "ChartStructline",
        "ChartDifferential",
        "ChartExtension",
        "ChartNode",
    ];

    pub fn is_registered(name: &str) -> bool {
        Self::TYPE_NAMES.contains(&name)
    }

    pub fn to_value(&self) -> Result<Value, SseqError> {
        Ok(serde_json::to_value(self)?)
    }

    /// 按判别字段重建；无判别字段或未注册都是错误
    pub fn from_value(value: Value) -> Result<Self, SseqError> {
        let tag = value
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| SseqError::UnknownType("<missing>".to_string()))?;
        if !Self::is_registered(tag) {
            return Err(SseqError::UnknownType(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl From<ChartEdge> for WireObject {
    fn from(edge: ChartEdge) -> Self {
        match edge {
            ChartEdge::Structline(e) => WireObject::ChartStructline(e),
            ChartEdge::Differential(e) => WireObject::ChartDifferential(e),
            ChartEdge::Extension(e) => WireObject::ChartExtension(e),
        }
    }
}

/// 递归检查 payload：所有带判别字段的映射都必须能按注册表重建
pub fn validate_payload(value: &Value) -> Result<(), SseqError> {
    match value {
        Value::Object(map) => {
            if map.contains_key(TYPE_FIELD) {
                WireObject::from_value(value.clone())?;
                return Ok(());
            }
            map.values().try_for_each(validate_payload)
        }
        Value::Array(items) => items.iter().try_for_each(validate_payload),
        _ => Ok(()),
    }
}

/// 不透明对象（如来源路径）在线格式里只以字符串形式出现
pub fn opaque<T: Display>(value: &T) -> Value {
    Value::String(value.to_string())
}
