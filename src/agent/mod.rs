//! Agent 树：分层消息路由
//!
//! ## 结构
//!
//! - 树以 arena 存放节点，父子关系都是 `AgentId` 索引；父节点拥有子节点列表，子节点只记父节点索引
//! - 每个 Agent 声明订阅前缀（父节点据此向下转发）和一张静态路由表（命令前缀 -> 处理器）
//!
//! ## 路由
//!
//! - **入站**：本地处理器按注册顺序执行，第一个 `mark_used` 的处理器独占；未消费则转发给订阅匹配的子节点
//! - **出站**：发往父节点，父节点向其余订阅匹配的子树广播（每个接收者一份新副本），再继续向上
//! - **故障**：协议错误回报发起方，校验拒绝就地吸收，其它故障逐级交给祖先，无人处理时落到顶层 FaultSink

mod link;
mod root;
mod tree;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::SseqError;
use crate::message::{AgentPath, Command, Envelope};

pub use link::AgentLink;
pub use root::RootAgent;
pub use tree::{AgentId, AgentTree};

/// 树中的一个节点的行为
///
/// `routes` 返回按类型静态声明的路由表，顺序即注册顺序；同一命令的多个处理器按此顺序执行。
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// 路由表中处理器的标识（通常是一个无字段枚举）
    type Route: Copy + fmt::Debug + Send + Sync + 'static;

    /// 从父节点接受的入站命令前缀；根节点返回空列表
    fn subscriptions(&self) -> Vec<Command>;

    /// (命令前缀, 处理器) 列表
    fn routes(&self) -> &'static [(&'static str, Self::Route)];

    /// 执行一个处理器；需要独占信封时调用 `envelope.mark_used()`
    async fn handle(
        &self,
        route: Self::Route,
        envelope: &mut Envelope,
        link: &AgentLink,
    ) -> Result<(), SseqError>;

    /// 子孙节点的故障升级到这里时调用
    fn on_fault(&self, _fault: &Fault) -> FaultDisposition {
        FaultDisposition::Escalate
    }

    /// 是否接收自己发出的广播
    fn receives_own_broadcasts(&self) -> bool {
        false
    }
}

/// 祖先对升级故障的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    Handled,
    Escalate,
}

/// 一次处理器故障的报告
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    /// 出错的 Agent
    pub agent: AgentPath,
    /// 触发命令
    pub command: Command,
    /// 触发信封的来源
    pub origin: AgentPath,
    pub error: String,
}

/// 顶层故障汇：没有祖先认领的故障最终到这里
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &Fault);
}

/// 默认故障汇：写 error 日志
#[derive(Debug, Default)]
pub struct LogFaultSink;

impl FaultSink for LogFaultSink {
    fn report(&self, fault: &Fault) {
        tracing::error!(
            agent = %fault.agent,
            command = %fault.command,
            origin = %fault.origin,
            "Unhandled fault: {}",
            fault.error
        );
    }
}
