//! 传输层端点
//!
//! - **ChannelObserver**：挂在树上的叶子 Agent，把收到的每条消息按线格式送进 mpsc 通道
//! - **stdio**：JSON 行协议，stdin 读入后以观察者名义发出，通道里的消息写到 stdout

pub mod stdio;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agent::{Agent, AgentLink};
use crate::core::SseqError;
use crate::message::{Command, Envelope, Message};

/// 观察者默认订阅的前缀
pub const OBSERVER_TOPICS: &[&str] = &["chart", "display", "interact", "initialize", "error"];

#[derive(Debug, Clone, Copy)]
pub enum ObserverRoute {
    Deliver,
}

/// 把投递到这里的消息转发到通道（浏览器会话、REPL、测试等外部观察者的代理）
pub struct ChannelObserver {
    subscriptions: Vec<Command>,
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            subscriptions: OBSERVER_TOPICS.iter().map(|t| Command::topic(t)).collect(),
            tx,
        }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn with_subscriptions(mut self, topics: &[&str]) -> Self {
        self.subscriptions = topics.iter().map(|t| Command::topic(t)).collect();
        self
    }
}

#[async_trait]
impl Agent for ChannelObserver {
    type Route = ObserverRoute;

    fn subscriptions(&self) -> Vec<Command> {
        self.subscriptions.clone()
    }

    fn routes(&self) -> &'static [(&'static str, ObserverRoute)] {
        &[("*", ObserverRoute::Deliver)]
    }

    async fn handle(
        &self,
        route: ObserverRoute,
        envelope: &mut Envelope,
        link: &AgentLink,
    ) -> Result<(), SseqError> {
        match route {
            ObserverRoute::Deliver => {
                if self.tx.send(envelope.msg.clone()).is_err() {
                    tracing::debug!(agent = %link.path(), command = %envelope.command(), "Observer channel closed");
                }
                Ok(())
            }
        }
    }
}
