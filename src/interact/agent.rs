//! 交互式图表 Agent：订阅全部入站消息，把点击、模式命令与 prompt 结果交给 Interaction

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::interaction::Interaction;
use super::mode::{Mode, ModeCommand};
use crate::agent::{Agent, AgentLink};
use crate::chart::{ChartState, ClassId};
use crate::config::{ChartSection, InteractSection};
use crate::core::SseqError;
use crate::message::wire::{WireObject, TYPE_FIELD};
use crate::message::{AgentPath, Command, Envelope, Message};

#[derive(Debug, Clone, Copy)]
pub enum InteractRoute {
    Click,
    SetMode,
    ModeCommand,
    PromptResult,
    ConsumeNewUser,
}

/// 排队等待执行的一次点击（模式在入队时已取定）
struct ClickJob {
    mode: Mode,
    x: f64,
    y: f64,
    class: Option<ClassId>,
    origin: AgentPath,
    command: Command,
}

pub struct InteractiveChartAgent {
    chart: Arc<ChartState>,
    interaction: Arc<Interaction>,
    clicks: mpsc::UnboundedSender<ClickJob>,
}

impl InteractiveChartAgent {
    /// 需要在 tokio 运行时内调用：点击 worker 在这里启动，Agent 被丢弃后随之退出
    pub fn new(link: AgentLink, chart: &ChartSection, interact: &InteractSection) -> Self {
        let state = Arc::new(ChartState::new(link.clone(), chart));
        let interaction = Arc::new(Interaction::new(Arc::clone(&state), link.clone(), interact));
        let (clicks, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_clicks(Arc::clone(&interaction), link, rx));
        Self {
            interaction,
            chart: state,
            clicks,
        }
    }

    pub fn state(&self) -> Arc<ChartState> {
        Arc::clone(&self.chart)
    }

    pub fn interaction(&self) -> Arc<Interaction> {
        Arc::clone(&self.interaction)
    }
}

#[async_trait]
impl Agent for InteractiveChartAgent {
    type Route = InteractRoute;

    fn subscriptions(&self) -> Vec<Command> {
        vec![Command::wildcard()]
    }

    // `interact.mode.set` 必须排在 `interact.mode` 之前：前者消费后者即不再执行
    fn routes(&self) -> &'static [(&'static str, InteractRoute)] {
        &[
            ("click", InteractRoute::Click),
            ("interact.mode.set", InteractRoute::SetMode),
            ("interact.mode", InteractRoute::ModeCommand),
            ("interact.result", InteractRoute::PromptResult),
            ("consume_new_user", InteractRoute::ConsumeNewUser),
        ]
    }

    async fn handle(
        &self,
        route: InteractRoute,
        envelope: &mut Envelope,
        link: &AgentLink,
    ) -> Result<(), SseqError> {
        match route {
            InteractRoute::Click => {
                envelope.mark_used()?;
                let x: f64 = envelope.msg.require("x", 0)?;
                let y: f64 = envelope.msg.require("y", 1)?;
                let class = clicked_class(&envelope.msg)?;
                // 模式在路由顺序中取定；点击按到达顺序逐个执行，可能挂起等待 prompt
                let job = ClickJob {
                    mode: self.interaction.mode().await,
                    x,
                    y,
                    class,
                    origin: envelope.source.clone(),
                    command: envelope.command().clone(),
                };
                self.clicks
                    .send(job)
                    .map_err(|_| SseqError::Fault("click worker stopped".to_string()))
            }
            InteractRoute::SetMode => {
                envelope.mark_used()?;
                let name: String = envelope.msg.require("mode", 0)?;
                self.interaction.set_mode(&name).await?;
                Ok(())
            }
            InteractRoute::ModeCommand => {
                envelope.mark_used()?;
                let sub = mode_subcommand(envelope.command());
                let mode = self.interaction.mode().await;
                let command = ModeCommand::parse(mode, &sub, &envelope.msg)?;
                self.interaction.on_mode_command(command).await
            }
            InteractRoute::PromptResult => {
                envelope.mark_used()?;
                let result = envelope.msg.get("result", 0).cloned();
                if !self.interaction.resolve_prompt(result).await {
                    tracing::debug!(agent = %link.path(), origin = %envelope.source, "Prompt result with no outstanding prompt");
                }
                Ok(())
            }
            InteractRoute::ConsumeNewUser => {
                self.chart.consume_new_user().await;
                Ok(())
            }
        }
    }
}

/// 单个 worker 串行处理点击；出错时按触发点击走故障路由
async fn run_clicks(
    interaction: Arc<Interaction>,
    link: AgentLink,
    mut rx: mpsc::UnboundedReceiver<ClickJob>,
) {
    while let Some(job) = rx.recv().await {
        if let Err(err) = interaction.on_click(job.mode, job.x, job.y, job.class).await {
            link.report_error(&job.origin, &job.command, err).await;
        }
    }
    tracing::debug!(agent = %link.path(), "Click worker stopped");
}

/// `interact.mode` 之后的部分（命令可能带有本 Agent 名字前缀）
fn mode_subcommand(command: &Command) -> Command {
    let segments = command.segments();
    match segments
        .windows(2)
        .position(|w| w[0] == "interact" && w[1] == "mode")
    {
        Some(pos) => command.suffix(pos + 2),
        None => Command::empty(),
    }
}

/// 点击参数中的 `chart_class`：类 id，或带 `type` 标签的 ChartClass 对象，或含 `id` 的映射
fn clicked_class(msg: &Message) -> Result<Option<ClassId>, SseqError> {
    let Some(value) = msg.get("chart_class", 2) else {
        return Ok(None);
    };
    let invalid = |reason: &str| SseqError::InvalidArgument {
        command: msg.cmd.to_string(),
        name: "chart_class".to_string(),
        reason: reason.to_string(),
    };
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|id| Some(id as ClassId))
            .ok_or_else(|| invalid("class id must be a non-negative integer")),
        Value::Object(map) if map.contains_key(TYPE_FIELD) => {
            match WireObject::from_value(value.clone())? {
                WireObject::ChartClass(class) => Ok(Some(class.id)),
                _ => Err(invalid("expected a ChartClass")),
            }
        }
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_u64)
            .map(|id| Some(id as ClassId))
            .ok_or_else(|| invalid("missing class id")),
        _ => Err(invalid("expected a class id or ChartClass")),
    }
}
