//! Agent 到所在树的句柄：发出站消息、回报后台流程的错误

use std::sync::Weak;

use super::tree::{upgrade, AgentId, Shared};
use crate::core::SseqError;
use crate::message::{AgentPath, Command, Message};

/// 弱引用所在的树：树被丢弃后发送静默失效
#[derive(Clone)]
pub struct AgentLink {
    shared: Weak<Shared>,
    id: AgentId,
    path: AgentPath,
}

impl AgentLink {
    pub(super) fn new(shared: Weak<Shared>, id: AgentId, path: AgentPath) -> Self {
        Self { shared, id, path }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn path(&self) -> &AgentPath {
        &self.path
    }

    /// 向父节点发出一条出站消息（入队，按发出顺序广播）
    pub fn send_outbound(&self, msg: Message) {
        match self.shared.upgrade() {
            Some(shared) => shared.enqueue_outbound(self.id, self.path.clone(), msg),
            None => tracing::debug!(agent = %self.path, "Tree dropped, outbound discarded"),
        }
    }

    /// 路由循环之外（如后台点击流程）产生的错误，按触发命令走故障路由
    pub async fn report_error(&self, origin: &AgentPath, command: &Command, err: SseqError) {
        match upgrade(&self.shared) {
            Some(tree) => tree.route_error(self.id, origin, command, err).await,
            None => tracing::warn!(agent = %self.path, "Tree dropped, error discarded: {}", err),
        }
    }
}
