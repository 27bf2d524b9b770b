//! 错误类型与分类
//!
//! 与 FaultRouter 配合：协议错误回报给发起方，校验拒绝就地吸收，其它故障向上升级。

use thiserror::Error;

/// 消息路由、图表变更与交互过程中的全部错误
#[derive(Error, Debug)]
pub enum SseqError {
    #[error("Unknown mode \"{0}\"")]
    UnknownMode(String),

    #[error("Invalid mode command {0}")]
    InvalidModeCommand(String),

    #[error("Unknown type discriminant \"{0}\"")]
    UnknownType(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Missing argument \"{name}\" for {command}")]
    MissingArgument { command: String, name: String },

    #[error("Invalid argument \"{name}\" for {command}: {reason}")]
    InvalidArgument {
        command: String,
        name: String,
        reason: String,
    },

    /// 同一信封被标记两次已消费
    #[error("Envelope {0} consumed twice")]
    DoubleConsume(String),

    #[error("Unknown class {0}")]
    UnknownClass(usize),

    #[error("Unknown edge {0}")]
    UnknownEdge(usize),

    /// 用户点击的几何关系不合法（预期内的输入，不是系统故障）
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("A prompt is already outstanding on this agent")]
    PromptPending,

    #[error("Agent {0} not found")]
    AgentNotFound(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handler fault: {0}")]
    Fault(String),
}

/// 错误大类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 观察者的请求本身有问题：立刻回报给发起方
    Protocol,
    /// 用户输入不合法：就地记录，交互流程保持不变
    Validation,
    /// 其余异常：向最近的祖先故障处理器升级
    Fault,
}

impl SseqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SseqError::UnknownMode(_)
            | SseqError::InvalidModeCommand(_)
            | SseqError::UnknownType(_)
            | SseqError::MalformedMessage(_)
            | SseqError::MissingArgument { .. }
            | SseqError::InvalidArgument { .. }
            | SseqError::UnknownClass(_)
            | SseqError::UnknownEdge(_)
            | SseqError::PromptPending => ErrorKind::Protocol,
            SseqError::InvalidGeometry(_) => ErrorKind::Validation,
            SseqError::DoubleConsume(_)
            | SseqError::AgentNotFound(_)
            | SseqError::Serialization(_)
            | SseqError::Fault(_) => ErrorKind::Fault,
        }
    }
}

/// 故障去向（由 FaultRouter 给出）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultRoute {
    /// 以 `error.protocol` 回报给命令发起方
    ReportToOrigin,
    /// 仅记录日志
    Absorb,
    /// 交给最近的祖先处理，最终落到顶层 FaultSink
    Escalate,
}
