//! 单个未决 prompt 的往返
//!
//! 发出 `interact.prompt` 后挂起调用方，直到同一 Agent 收到下一条 `interact.result`。
//! 同一时间只允许一个未决 prompt；超时或被取消都视为用户取消（返回 None）。

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::agent::AgentLink;
use crate::core::SseqError;
use crate::message::{Command, Message};

pub struct PromptSlot {
    pending: Mutex<Option<oneshot::Sender<Option<Value>>>>,
    timeout: Option<Duration>,
}

impl PromptSlot {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(None),
            timeout,
        }
    }

    /// 发出提示并等待回答；回答不是字符串（包括 null）时视为取消
    pub async fn prompt(
        &self,
        link: &AgentLink,
        msg: &str,
        default: &str,
    ) -> Result<Option<String>, SseqError> {
        let rx = {
            let mut pending = self.pending.lock().await;
            if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(SseqError::PromptPending);
            }
            let (tx, rx) = oneshot::channel();
            *pending = Some(tx);
            rx
        };

        link.send_outbound(
            Message::new(Command::topic("interact.prompt"))
                .with("msg", msg)
                .with("default", default),
        );

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(answer) => answer.ok().flatten(),
                Err(_) => {
                    tracing::info!(agent = %link.path(), "Prompt \"{}\" timed out", msg);
                    self.clear_stale().await;
                    None
                }
            },
            None => rx.await.ok().flatten(),
        };
        Ok(answer.and_then(|v| v.as_str().map(str::to_string)))
    }

    /// 交付结果；没有未决 prompt 时返回 false
    pub async fn resolve(&self, result: Option<Value>) -> bool {
        match self.pending.lock().await.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// 丢弃未决 prompt，等待方得到 None
    pub async fn clear(&self) {
        self.pending.lock().await.take();
    }

    /// 只丢弃等待方已离开的 prompt，不影响之后新发出的
    async fn clear_stale(&self) {
        let mut pending = self.pending.lock().await;
        if pending.as_ref().is_some_and(|tx| tx.is_closed()) {
            pending.take();
        }
    }

    pub async fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
