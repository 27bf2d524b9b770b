//! 单元测试用：根 + 图表 + 观察者

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{ChartAgent, ChartState};
use crate::agent::{AgentId, AgentTree, LogFaultSink, RootAgent};
use crate::config::ChartSection;
use crate::message::Message;
use crate::transport::ChannelObserver;

pub(crate) struct ChartHarness {
    pub tree: AgentTree,
    pub root: AgentId,
    pub chart: Arc<ChartState>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl ChartHarness {
    /// 处理完队列后取出观察者收到的全部消息
    pub async fn collect(&self) -> Vec<Message> {
        self.tree.drain().await;
        let mut rx = self.rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

pub(crate) async fn chart_harness() -> ChartHarness {
    let tree = AgentTree::new(Arc::new(LogFaultSink));
    let root = tree.attach(None, "root", |_| RootAgent).await.unwrap();
    let mut chart = None;
    tree.attach(Some(root), "chart", |link| {
        let agent = ChartAgent::new(link, &ChartSection::default());
        chart = Some(agent.state());
        agent
    })
    .await
    .unwrap();
    let (observer, rx) = ChannelObserver::channel();
    tree.attach(Some(root), "observer", |_| observer).await.unwrap();

    ChartHarness {
        tree,
        root,
        chart: chart.unwrap(),
        rx: Mutex::new(rx),
    }
}
