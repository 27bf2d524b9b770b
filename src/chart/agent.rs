//! 只读图表 Agent：持有 ChartState，新观察者接入时推送完整状态

use std::sync::Arc;

use async_trait::async_trait;

use super::state::ChartState;
use crate::agent::{Agent, AgentLink};
use crate::config::ChartSection;
use crate::core::SseqError;
use crate::message::{Command, Envelope};

#[derive(Debug, Clone, Copy)]
pub enum ChartRoute {
    ConsumeNewUser,
}

pub struct ChartAgent {
    chart: Arc<ChartState>,
}

impl ChartAgent {
    pub fn new(link: AgentLink, config: &ChartSection) -> Self {
        Self {
            chart: Arc::new(ChartState::new(link, config)),
        }
    }

    /// 供脚本 / 其它任务直接调用图表操作
    pub fn state(&self) -> Arc<ChartState> {
        Arc::clone(&self.chart)
    }
}

#[async_trait]
impl Agent for ChartAgent {
    type Route = ChartRoute;

    fn subscriptions(&self) -> Vec<Command> {
        vec![Command::topic("consume_new_user")]
    }

    fn routes(&self) -> &'static [(&'static str, ChartRoute)] {
        &[("consume_new_user", ChartRoute::ConsumeNewUser)]
    }

    async fn handle(
        &self,
        route: ChartRoute,
        _envelope: &mut Envelope,
        _link: &AgentLink,
    ) -> Result<(), SseqError> {
        match route {
            // 不消费：同一棵树上的每张图表都要推送自己的状态
            ChartRoute::ConsumeNewUser => {
                self.chart.consume_new_user().await;
                Ok(())
            }
        }
    }
}
