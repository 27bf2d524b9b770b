//! Sseq - 谱序列图表的分层消息路由与交互式编辑
//!
//! 模块划分：
//! - **agent**: Agent 树（arena）、订阅转发、出站广播与故障升级
//! - **chart**: 图表数据模型与状态引擎（节点 / 类 / 边 / 页范围 / 批量更新）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与故障路由、运行时构建、优雅关闭
//! - **interact**: 交互模式状态机与 prompt 往返
//! - **message**: Command 路径、消息 / 信封、带类型标签的线格式
//! - **observability**: tracing 初始化
//! - **transport**: 通道观察者与 JSON 行 stdio 传输

pub mod agent;
pub mod chart;
pub mod config;
pub mod core;
pub mod interact;
pub mod message;
pub mod observability;
pub mod transport;

pub use crate::core::{ChartRuntime, RuntimeBuilder, SseqError};
