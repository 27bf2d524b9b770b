//! 运行时构建器：按配置组装 Agent 树（根 + 图表 Agent），并提供挂载观察者的入口

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentId, AgentTree, FaultSink, LogFaultSink, RootAgent};
use crate::chart::{ChartAgent, ChartState};
use crate::config::AppConfig;
use crate::core::SseqError;
use crate::interact::{InteractiveChartAgent, Interaction};
use crate::message::Message;
use crate::transport::ChannelObserver;

/// 组装好的 Agent 树与图表句柄
pub struct ChartRuntime {
    pub tree: AgentTree,
    pub root: AgentId,
    pub chart_id: AgentId,
    pub chart: Arc<ChartState>,
    /// 非交互式图表时为 None
    pub interaction: Option<Arc<Interaction>>,
}

impl ChartRuntime {
    /// 在根下挂一个观察者，返回它的 id 与接收端
    pub async fn attach_observer(
        &self,
        name: &str,
    ) -> Result<(AgentId, mpsc::UnboundedReceiver<Message>), SseqError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.attach_observer_with(name, tx).await?;
        Ok((id, rx))
    }

    /// 同上，但消息送入调用方提供的发送端
    pub async fn attach_observer_with(
        &self,
        name: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Result<AgentId, SseqError> {
        self.tree
            .attach(Some(self.root), name, |_| ChannelObserver::new(tx))
            .await
    }

    /// 在后台运行路由循环
    pub fn spawn_router(&self, token: CancellationToken) -> JoinHandle<()> {
        let tree = self.tree.clone();
        tokio::spawn(async move { tree.run(token).await })
    }
}

/// 运行时构建器
pub struct RuntimeBuilder {
    config: AppConfig,
    interactive: bool,
    fault_sink: Arc<dyn FaultSink>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            interactive: true,
            fault_sink: Arc::new(LogFaultSink),
        }
    }

    /// 关闭后挂载只读的 ChartAgent
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// 顶层故障汇（默认写日志）
    pub fn with_fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = sink;
        self
    }

    pub async fn build(self) -> Result<ChartRuntime, SseqError> {
        let tree = AgentTree::new(self.fault_sink);
        let root = tree.attach(None, &self.config.app.name, |_| RootAgent).await?;

        let chart_cfg = &self.config.chart;
        let mut chart = None;
        let mut interaction = None;
        let chart_id = if self.interactive {
            let interact_cfg = &self.config.interact;
            tree.attach(Some(root), &chart_cfg.name, |link| {
                let agent = InteractiveChartAgent::new(link, chart_cfg, interact_cfg);
                chart = Some(agent.state());
                interaction = Some(agent.interaction());
                agent
            })
            .await?
        } else {
            tree.attach(Some(root), &chart_cfg.name, |link| {
                let agent = ChartAgent::new(link, chart_cfg);
                chart = Some(agent.state());
                agent
            })
            .await?
        };
        let chart = chart.ok_or_else(|| SseqError::Fault("chart agent was not constructed".to_string()))?;

        tracing::info!(
            root = %self.config.app.name,
            chart = %chart_cfg.name,
            interactive = self.interactive,
            "Chart runtime built"
        );
        Ok(ChartRuntime {
            tree,
            root,
            chart_id,
            chart,
            interaction,
        })
    }
}
