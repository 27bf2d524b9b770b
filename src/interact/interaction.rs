//! 交互会话与各模式的点击流程
//!
//! 会话锁只在单步内持有，不跨越 prompt 往返；取消因此可以在路由循环内立即执行。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::mode::{snap_to_grid, validate_differential, validate_extension, Mode, ModeCommand};
use super::prompt::PromptSlot;
use crate::agent::AgentLink;
use crate::chart::{ChartClass, ChartState, ClassFields, ClassId, EdgeFields, EdgeId};
use crate::config::InteractSection;
use crate::core::SseqError;
use crate::message::{Command, Message};

const DEFAULT_EDGE_COLOR: &str = "black";

/// 当前模式与各模式的未决状态
#[derive(Debug, Clone, PartialEq)]
pub struct InteractSession {
    pub mode: Mode,
    /// AddClass / AddEdge 的当前源
    pub interact_source: Option<ClassId>,
    pub extension_source: Option<ClassId>,
    pub differential_source: Option<ClassId>,
    pub nudge_target: Option<ClassId>,
    /// 最近创建的扩张边（弯曲度调整的对象）
    pub last_extension: Option<EdgeId>,
    /// 扩张颜色 prompt 的建议值，记住上一次的选择
    pub extension_color: String,
}

impl InteractSession {
    pub fn new(mode: Mode, extension_color: &str) -> Self {
        Self {
            mode,
            interact_source: None,
            extension_source: None,
            differential_source: None,
            nudge_target: None,
            last_extension: None,
            extension_color: extension_color.to_string(),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.interact_source.is_some()
            || self.extension_source.is_some()
            || self.differential_source.is_some()
            || self.nudge_target.is_some()
    }

    /// 清空所有未决的源 / 目标；可重复调用
    pub fn clear_pending(&mut self) {
        self.interact_source = None;
        self.extension_source = None;
        self.differential_source = None;
        self.nudge_target = None;
    }
}

pub struct Interaction {
    chart: Arc<ChartState>,
    link: AgentLink,
    session: Mutex<InteractSession>,
    prompt: PromptSlot,
    config: InteractSection,
}

impl Interaction {
    pub fn new(chart: Arc<ChartState>, link: AgentLink, config: &InteractSection) -> Self {
        let mode = Mode::from_name(&config.initial_mode).unwrap_or_else(|e| {
            tracing::warn!("{}, starting in {}", e, Mode::Idle);
            Mode::Idle
        });
        Self {
            chart,
            link,
            session: Mutex::new(InteractSession::new(mode, &config.extension_color)),
            prompt: PromptSlot::new(config.prompt_timeout()),
            config: config.clone(),
        }
    }

    pub fn chart(&self) -> &Arc<ChartState> {
        &self.chart
    }

    pub async fn mode(&self) -> Mode {
        self.session.lock().await.mode
    }

    pub async fn session(&self) -> InteractSession {
        self.session.lock().await.clone()
    }

    /// 切换模式；上一模式的未决状态一并清除
    pub async fn set_mode(&self, name: &str) -> Result<Mode, SseqError> {
        let mode = Mode::from_name(name)?;
        let had_pending = {
            let mut session = self.session.lock().await;
            let had_pending = session.has_pending();
            session.clear_pending();
            session.mode = mode;
            had_pending
        };
        tracing::info!(agent = %self.link.path(), "Interaction mode set to {}", mode);
        if had_pending {
            self.set_info("");
        }
        Ok(mode)
    }

    pub async fn resolve_prompt(&self, result: Option<Value>) -> bool {
        self.prompt.resolve(result).await
    }

    fn set_info(&self, info: &str) {
        self.link.send_outbound(Message::new(Command::topic("interact.mode.set_info")).with("info", info));
    }

    /// 取消：丢弃未决 prompt、清空未决状态、清空提示信息；从不失败
    pub async fn cancel(&self) {
        self.prompt.clear().await;
        self.session.lock().await.clear_pending();
        self.set_info("");
    }

    pub async fn on_mode_command(&self, command: ModeCommand) -> Result<(), SseqError> {
        match command {
            ModeCommand::Cancel => {
                self.cancel().await;
                Ok(())
            }
            ModeCommand::AdjustBend { delta } => {
                let Some(edge) = self.session.lock().await.last_extension else {
                    tracing::debug!("No extension to bend");
                    return Ok(());
                };
                self.chart.adjust_bend(edge, delta).await?;
                self.chart.flush_updates().await;
                Ok(())
            }
            ModeCommand::NudgeClass { x, y } => {
                let Some(class) = self.session.lock().await.nudge_target else {
                    tracing::debug!("No nudge target");
                    return Ok(());
                };
                self.chart.nudge_class(class, x, y).await?;
                self.chart.flush_updates().await;
                Ok(())
            }
        }
    }

    /// 按点击时的模式处理一次点击；`class` 为观察者解析出的被点中的类
    pub async fn on_click(
        &self,
        mode: Mode,
        x: f64,
        y: f64,
        class: Option<ClassId>,
    ) -> Result<(), SseqError> {
        let class = match class {
            Some(id) => Some(self.chart.class(id).await.ok_or(SseqError::UnknownClass(id))?),
            None => None,
        };
        tracing::debug!(mode = %mode, x, y, class = ?class.as_ref().map(|c| c.id), "Click");

        match (mode, class) {
            (Mode::Idle, _) => Ok(()),
            (Mode::AddClass, None) => self.add_class_at(x, y).await,
            (Mode::AddClass | Mode::Rename, Some(c)) => self.prompt_for_class_name(&c).await,
            (Mode::Recolor, Some(c)) => self.prompt_for_colors(&c).await,
            (Mode::AddEdge, Some(c)) => self.add_edge_click(&c).await,
            (Mode::AddExtension, Some(c)) => self.add_extension_click(&c).await,
            (Mode::AddDifferential, Some(c)) => self.add_differential_click(&c).await,
            (Mode::Nudge, Some(c)) => {
                self.session.lock().await.nudge_target = Some(c.id);
                self.set_info(&format!("Nudging class: \"{c}\"."));
                Ok(())
            }
            // 其余模式忽略空白处的点击
            (_, None) => Ok(()),
        }
    }

    async fn add_class_at(&self, x: f64, y: f64) -> Result<(), SseqError> {
        let Some((x, y)) = snap_to_grid(x, y, self.config.click_tolerance) else {
            tracing::debug!(x, y, "Click too far from a grid point");
            return Ok(());
        };
        let class = {
            let mut session = self.session.lock().await;
            let class = self.chart.add_class(x, y, ClassFields::default()).await;
            if let Some(source) = session.interact_source {
                self.chart
                    .add_structline(source, class.id, EdgeFields::default())
                    .await?;
            }
            session.interact_source = Some(class.id);
            class
        };
        self.set_info(&format!("Current source: \"{class}\"."));
        self.chart.flush_updates().await;
        Ok(())
    }

    async fn add_edge_click(&self, target: &ChartClass) -> Result<(), SseqError> {
        let mut session = self.session.lock().await;
        let pending = session.interact_source;
        match pending {
            None => {
                session.interact_source = Some(target.id);
                drop(session);
                self.set_info(&format!("Current source: \"{target}\"."));
            }
            Some(source) if source == target.id => {}
            Some(source) => {
                self.chart
                    .add_structline(source, target.id, EdgeFields::default())
                    .await?;
                session.interact_source = None;
                drop(session);
                self.set_info("");
                self.chart.flush_updates().await;
            }
        }
        Ok(())
    }

    async fn add_extension_click(&self, target: &ChartClass) -> Result<(), SseqError> {
        let (source, default_color) = {
            let mut session = self.session.lock().await;
            let pending = session.extension_source;
            match pending {
                Some(source) => (source, session.extension_color.clone()),
                None => {
                    session.extension_source = Some(target.id);
                    drop(session);
                    self.set_info(&format!("Current source: \"{target}\"."));
                    return Ok(());
                }
            }
        };
        let source_class = self
            .chart
            .class(source)
            .await
            .ok_or(SseqError::UnknownClass(source))?;
        validate_extension(&source_class, target)?;

        let Some(color) = self.prompt.prompt(&self.link, "Color?", &default_color).await? else {
            tracing::info!("Extension color prompt cancelled");
            return Ok(());
        };
        let edge = self
            .chart
            .add_extension(source, target.id, EdgeFields::colored(color.clone()))
            .await?;
        {
            let mut session = self.session.lock().await;
            session.extension_color = color;
            session.last_extension = Some(edge.id());
            session.extension_source = None;
        }
        self.chart.flush_updates().await;
        self.link
            .send_outbound(Message::new(Command::topic("interact.mode.extension.adjust_bend")));
        Ok(())
    }

    async fn add_differential_click(&self, target: &ChartClass) -> Result<(), SseqError> {
        let mut session = self.session.lock().await;
        let pending = session.differential_source;
        let Some(source) = pending else {
            session.differential_source = Some(target.id);
            drop(session);
            self.set_info(&format!("Current source: \"{target}\"."));
            return Ok(());
        };
        let source_class = self
            .chart
            .class(source)
            .await
            .ok_or(SseqError::UnknownClass(source))?;
        let page = validate_differential(&source_class, target)?;

        self.chart
            .add_differential(
                page,
                source,
                target.id,
                true,
                EdgeFields::colored(self.config.differential_color.clone()),
            )
            .await?;
        session.differential_source = None;
        drop(session);
        self.set_info("");
        self.chart.flush_updates().await;
        Ok(())
    }

    async fn prompt_for_class_name(&self, class: &ChartClass) -> Result<(), SseqError> {
        let Some(name) = self.prompt.prompt(&self.link, "Name?", &class.name).await? else {
            return Ok(());
        };
        self.chart.rename_class(class.id, &name).await?;
        self.chart.flush_updates().await;
        Ok(())
    }

    /// 先问类的颜色，再对每条关联边各问一次
    async fn prompt_for_colors(&self, class: &ChartClass) -> Result<(), SseqError> {
        let default = self
            .chart
            .class_color(class.id)
            .await
            .unwrap_or_else(|| DEFAULT_EDGE_COLOR.to_string());
        let question = format!("New color for {class}?");
        if let Some(color) = self.prompt.prompt(&self.link, &question, &default).await? {
            self.chart.set_class_color(class.id, &color).await?;
        }

        for edge_id in &class.edges {
            let Some(edge) = self.chart.edge(*edge_id).await else {
                continue;
            };
            let (s, t) = edge.endpoints();
            let question = format!(
                "New color for edge {} -- {}?",
                self.describe(s).await,
                self.describe(t).await
            );
            let default = edge.color().unwrap_or(DEFAULT_EDGE_COLOR).to_string();
            if let Some(color) = self.prompt.prompt(&self.link, &question, &default).await? {
                self.chart.set_edge_color(*edge_id, &color).await?;
            }
        }
        self.chart.flush_updates().await;
        Ok(())
    }

    async fn describe(&self, id: ClassId) -> String {
        match self.chart.class(id).await {
            Some(c) => c.to_string(),
            None => format!("#{id}"),
        }
    }
}
