//! 根节点：不订阅任何前缀，只把直接投递的消息按订阅转发给子节点

use std::convert::Infallible;

use async_trait::async_trait;

use super::{Agent, AgentLink};
use crate::core::SseqError;
use crate::message::{Command, Envelope};

#[derive(Debug, Default)]
pub struct RootAgent;

#[async_trait]
impl Agent for RootAgent {
    type Route = Infallible;

    fn subscriptions(&self) -> Vec<Command> {
        Vec::new()
    }

    fn routes(&self) -> &'static [(&'static str, Infallible)] {
        &[]
    }

    async fn handle(
        &self,
        route: Infallible,
        _envelope: &mut Envelope,
        _link: &AgentLink,
    ) -> Result<(), SseqError> {
        match route {}
    }
}
