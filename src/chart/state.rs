//! 图表状态引擎
//!
//! 每个变更操作修改 `ChartModel` 后恰好发出一条出站广播，描述最小增量。
//!
//! 锁：
//! - 页范围列表、脏集合各有一把独立互斥锁
//! - 节点去重缓存用读写锁（读多写少），写锁下二次检查
//! - 其余数据在 `model` 锁下修改
//!
//! 加锁顺序固定为 `node_cache` / `updates` / `page_list` 在前，`model` 在后；持有 `model` 时不再获取其它锁。

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::data::{
    ChartClass, ChartEdge, ChartElement, ChartModel, ChartNode, ClassId, Differential, DisplayState,
    EdgeId, Extension, NodeIndex, PageRange, Structline, INFINITY,
};
use crate::agent::AgentLink;
use crate::config::ChartSection;
use crate::core::SseqError;
use crate::message::wire::WireObject;
use crate::message::{Command, Message};

/// `add_class` 的可选字段
#[derive(Debug, Clone, Default)]
pub struct ClassFields {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// 加边时的可选字段
#[derive(Debug, Clone, Default)]
pub struct EdgeFields {
    pub color: Option<String>,
    /// 仅扩张边使用
    pub bend: Option<f64>,
}

impl EdgeFields {
    pub fn colored(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            bend: None,
        }
    }
}

/// 新用户接入时推送的完整状态
#[derive(Debug, Clone, Serialize)]
pub struct ChartSnapshot {
    pub name: String,
    pub nodes: Vec<ChartNode>,
    pub page_list: Vec<PageRange>,
    pub classes: Vec<WireObject>,
    pub edges: Vec<ChartEdge>,
    pub x_range: (i32, i32),
    pub y_range: (i32, i32),
    pub initial_x_range: (i32, i32),
    pub initial_y_range: (i32, i32),
}

pub struct ChartState {
    name: String,
    link: AgentLink,
    model: Mutex<ChartModel>,
    node_cache: RwLock<HashMap<ChartNode, NodeIndex>>,
    page_list: Mutex<Vec<PageRange>>,
    updates: Mutex<BTreeSet<ChartElement>>,
    display: Mutex<DisplayState>,
}

impl ChartState {
    /// 初始状态：节点 0 为默认圆形，页列表为 `[[2, ∞], [∞, ∞]]`
    pub fn new(link: AgentLink, config: &ChartSection) -> Self {
        let default_node = ChartNode::circle();
        let model = ChartModel {
            nodes: vec![default_node.clone()],
            x_range: config.initial_x_range,
            y_range: config.initial_y_range,
            initial_x_range: config.initial_x_range,
            initial_y_range: config.initial_y_range,
            ..ChartModel::default()
        };
        Self {
            name: config.name.clone(),
            link,
            model: Mutex::new(model),
            node_cache: RwLock::new(HashMap::from([(default_node, 0)])),
            page_list: Mutex::new(vec![
                PageRange(2, INFINITY),
                PageRange(INFINITY, INFINITY),
            ]),
            updates: Mutex::new(BTreeSet::new()),
            display: Mutex::new(DisplayState {
                background_color: config.background_color.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn broadcast(&self, msg: Message) {
        tracing::trace!(chart = %self.name, command = %msg.cmd, "Broadcast");
        self.link.send_outbound(msg);
    }

    /// 追加节点（不去重）
    pub async fn add_node(&self, node: ChartNode) -> NodeIndex {
        let mut model = self.model.lock().await;
        let idx = model.nodes.len();
        model.nodes.push(node.clone());
        self.broadcast(
            Message::new(Command::topic("chart.node.add"))
                .with("node", WireObject::ChartNode(node))
                .with("idx", idx),
        );
        idx
    }

    /// 相同节点只注册一次
    pub async fn intern_node(&self, node: ChartNode) -> NodeIndex {
        if let Some(idx) = self.node_cache.read().await.get(&node) {
            return *idx;
        }
        let mut cache = self.node_cache.write().await;
        // 等写锁期间可能已被别的调用者注册
        if let Some(idx) = cache.get(&node) {
            return *idx;
        }
        let idx = self.add_node(node.clone()).await;
        cache.insert(node, idx);
        idx
    }

    /// 按下界升序插入页范围；已存在时返回 None 且不广播
    ///
    /// 异步互斥锁无法在锁外窥视列表，存在性检查与插入都在同一次加锁内完成。
    pub async fn add_page_range(&self, range: PageRange) -> Option<usize> {
        let mut pages = self.page_list.lock().await;
        if pages.contains(&range) {
            return None;
        }
        let idx = pages
            .iter()
            .position(|p| p.lower() > range.lower())
            .unwrap_or(pages.len());
        pages.insert(idx, range);
        self.broadcast(
            Message::new(Command::topic("chart.insert_page_range"))
                .with("page_range", range)
                .with("idx", idx),
        );
        Some(idx)
    }

    pub async fn add_class(&self, x: i32, y: i32, fields: ClassFields) -> ChartClass {
        let node_list = match &fields.color {
            Some(color) => vec![self.intern_node(ChartNode::circle().with_color(color)).await],
            None => vec![0],
        };

        let mut model = self.model.lock().await;
        let id = model.classes.len();
        let mut class = ChartClass::new(id, x, y);
        class.node_list = node_list;
        if let Some(name) = fields.name {
            class.name = name;
        }
        model.classes.push(class.clone());
        model.classes_by_bidegree.entry((x, y)).or_default().push(id);
        self.broadcast(
            Message::new(Command::topic("chart.class.add"))
                .with("new_class", WireObject::ChartClass(class.clone())),
        );
        class
    }

    /// 标记为待广播；同一元素重复排队只保留一份
    pub async fn queue_update(&self, element: ChartElement) {
        self.updates.lock().await.insert(element);
    }

    pub async fn pending_updates(&self) -> usize {
        self.updates.lock().await.len()
    }

    /// 以一个批次广播当前全部脏元素（取最新内容），然后清空；返回批次大小
    pub async fn flush_updates(&self) -> usize {
        let mut updates = self.updates.lock().await;
        let to_update: Vec<WireObject> = {
            let model = self.model.lock().await;
            updates
                .iter()
                .filter_map(|element| match *element {
                    ChartElement::Class(id) => model.class(id).cloned().map(WireObject::ChartClass),
                    ChartElement::Edge(id) => model.edge(id).cloned().map(WireObject::from),
                })
                .collect()
        };
        if to_update.len() != updates.len() {
            tracing::warn!(chart = %self.name, "Dropped {} stale updates", updates.len() - to_update.len());
        }
        let count = to_update.len();
        self.broadcast(Message::new(Command::topic("chart.class.update")).with("to_update", to_update));
        updates.clear();
        count
    }

    async fn add_edge<F>(&self, build: F) -> Result<ChartEdge, SseqError>
    where
        F: FnOnce(EdgeId) -> ChartEdge,
    {
        let mut model = self.model.lock().await;
        let id = model.edges.len();
        let edge = build(id);
        let (source, target) = edge.endpoints();
        for class in [source, target] {
            if model.class(class).is_none() {
                return Err(SseqError::UnknownClass(class));
            }
        }

        model.edges.push(edge.clone());
        if let Some(c) = model.class_mut(source) {
            c.edges.push(id);
        }
        if target != source {
            if let Some(c) = model.class_mut(target) {
                c.edges.push(id);
            }
        }

        let mut msg = Message::new(Command::topic("chart.edge.add"));
        if let Value::Object(fields) = serde_json::to_value(&edge)? {
            msg.kwargs = fields;
        }
        self.broadcast(msg);
        Ok(edge)
    }

    pub async fn add_structline(
        &self,
        source: ClassId,
        target: ClassId,
        fields: EdgeFields,
    ) -> Result<ChartEdge, SseqError> {
        self.add_edge(|id| {
            ChartEdge::Structline(Structline {
                id,
                source,
                target,
                color: fields.color,
            })
        })
        .await
    }

    pub async fn add_extension(
        &self,
        source: ClassId,
        target: ClassId,
        fields: EdgeFields,
    ) -> Result<ChartEdge, SseqError> {
        self.add_edge(|id| {
            ChartEdge::Extension(Extension {
                id,
                source,
                target,
                color: fields.color,
                bend: fields.bend.unwrap_or(0.0),
            })
        })
        .await
    }

    /// `auto` 为真时先登记两端所在页、注册 `[page, page]` 并 flush，然后才广播加边
    pub async fn add_differential(
        &self,
        page: u32,
        source: ClassId,
        target: ClassId,
        auto: bool,
        fields: EdgeFields,
    ) -> Result<ChartEdge, SseqError> {
        if page == 0 {
            return Err(SseqError::InvalidArgument {
                command: "add_differential".to_string(),
                name: "page".to_string(),
                reason: "page must be positive".to_string(),
            });
        }
        if auto {
            {
                let mut model = self.model.lock().await;
                for class in [source, target] {
                    if model.class(class).is_none() {
                        return Err(SseqError::UnknownClass(class));
                    }
                }
                for class in [source, target] {
                    if let Some(c) = model.class_mut(class) {
                        c.add_page(page);
                    }
                }
            }
            self.queue_update(ChartElement::Class(source)).await;
            self.queue_update(ChartElement::Class(target)).await;
            self.add_page_range(PageRange::single(page)).await;
            self.flush_updates().await;
        }
        self.add_edge(|id| {
            ChartEdge::Differential(Differential {
                id,
                page,
                source,
                target,
                color: fields.color,
            })
        })
        .await
    }

    pub async fn set_x_range(&self, x_min: i32, x_max: i32) {
        self.model.lock().await.x_range = (x_min, x_max);
        self.broadcast(
            Message::new(Command::topic("chart.set_x_range"))
                .with("x_min", x_min)
                .with("x_max", x_max),
        );
    }

    pub async fn set_y_range(&self, y_min: i32, y_max: i32) {
        self.model.lock().await.y_range = (y_min, y_max);
        self.broadcast(
            Message::new(Command::topic("chart.set_y_range"))
                .with("y_min", y_min)
                .with("y_max", y_max),
        );
    }

    pub async fn set_initial_x_range(&self, x_min: i32, x_max: i32) {
        self.model.lock().await.initial_x_range = (x_min, x_max);
        self.broadcast(
            Message::new(Command::topic("chart.set_initial_x_range"))
                .with("x_min", x_min)
                .with("x_max", x_max),
        );
    }

    pub async fn set_initial_y_range(&self, y_min: i32, y_max: i32) {
        self.model.lock().await.initial_y_range = (y_min, y_max);
        self.broadcast(
            Message::new(Command::topic("chart.set_initial_y_range"))
                .with("y_min", y_min)
                .with("y_max", y_max),
        );
    }

    pub async fn set_background_color(&self, color: &str) {
        self.display.lock().await.background_color = color.to_string();
        self.broadcast(
            Message::new(Command::topic("display.set_background_color")).with("color", color),
        );
    }

    /// 按双次数和序号定位类并改名（排入脏集合，不立即广播）
    pub async fn set_class_name(&self, x: i32, y: i32, idx: usize, name: &str) -> Result<(), SseqError> {
        let id = {
            let mut model = self.model.lock().await;
            let id = model
                .classes_by_bidegree
                .get(&(x, y))
                .and_then(|ids| ids.get(idx))
                .copied()
                .ok_or_else(|| SseqError::InvalidArgument {
                    command: "set_class_name".to_string(),
                    name: "idx".to_string(),
                    reason: format!("no class {idx} in bidegree ({x}, {y})"),
                })?;
            if let Some(c) = model.class_mut(id) {
                c.name = name.to_string();
            }
            id
        };
        self.queue_update(ChartElement::Class(id)).await;
        Ok(())
    }

    pub async fn rename_class(&self, id: ClassId, name: &str) -> Result<(), SseqError> {
        self.update_class(id, |c| c.name = name.to_string()).await
    }

    pub async fn nudge_class(&self, id: ClassId, dx: f64, dy: f64) -> Result<(), SseqError> {
        self.update_class(id, |c| {
            c.x_nudge += dx;
            c.y_nudge += dy;
        })
        .await
    }

    /// 把类的每个渲染节点替换为同形状的指定颜色版本（经去重缓存注册）
    pub async fn set_class_color(&self, id: ClassId, color: &str) -> Result<(), SseqError> {
        let current: Vec<ChartNode> = {
            let model = self.model.lock().await;
            let class = model.class(id).ok_or(SseqError::UnknownClass(id))?;
            class
                .node_list
                .iter()
                .filter_map(|idx| model.nodes.get(*idx).cloned())
                .collect()
        };

        let mut node_list = Vec::with_capacity(current.len());
        for node in current {
            node_list.push(self.intern_node(node.with_color(color)).await);
        }
        self.update_class(id, move |c| c.node_list = node_list).await
    }

    /// 类首个渲染节点的颜色
    pub async fn class_color(&self, id: ClassId) -> Option<String> {
        let model = self.model.lock().await;
        let class = model.class(id)?;
        let node = model.nodes.get(*class.node_list.first()?)?;
        node.color.clone()
    }

    pub async fn set_edge_color(&self, id: EdgeId, color: &str) -> Result<(), SseqError> {
        {
            let mut model = self.model.lock().await;
            let edge = model.edge_mut(id).ok_or(SseqError::UnknownEdge(id))?;
            edge.set_color(Some(color.to_string()));
        }
        self.queue_update(ChartElement::Edge(id)).await;
        Ok(())
    }

    /// 在扩张边的弯曲度上累加，返回新值
    pub async fn adjust_bend(&self, id: EdgeId, delta: f64) -> Result<f64, SseqError> {
        let bend = {
            let mut model = self.model.lock().await;
            match model.edge_mut(id) {
                Some(ChartEdge::Extension(e)) => {
                    e.bend += delta;
                    e.bend
                }
                Some(_) => {
                    return Err(SseqError::InvalidArgument {
                        command: "adjust_bend".to_string(),
                        name: "edge".to_string(),
                        reason: format!("edge {id} is not an extension"),
                    })
                }
                None => return Err(SseqError::UnknownEdge(id)),
            }
        };
        self.queue_update(ChartElement::Edge(id)).await;
        Ok(bend)
    }

    async fn update_class<F>(&self, id: ClassId, apply: F) -> Result<(), SseqError>
    where
        F: FnOnce(&mut ChartClass),
    {
        {
            let mut model = self.model.lock().await;
            let class = model.class_mut(id).ok_or(SseqError::UnknownClass(id))?;
            apply(class);
        }
        self.queue_update(ChartElement::Class(id)).await;
        Ok(())
    }

    pub async fn class(&self, id: ClassId) -> Option<ChartClass> {
        self.model.lock().await.class(id).cloned()
    }

    pub async fn edge(&self, id: EdgeId) -> Option<ChartEdge> {
        self.model.lock().await.edge(id).cloned()
    }

    pub async fn classes_in_bidegree(&self, x: i32, y: i32) -> Vec<ChartClass> {
        let model = self.model.lock().await;
        model.classes_in_bidegree(x, y).into_iter().cloned().collect()
    }

    pub async fn class_by_idx(&self, x: i32, y: i32, idx: usize) -> Option<ChartClass> {
        self.classes_in_bidegree(x, y).await.into_iter().nth(idx)
    }

    pub async fn class_count(&self) -> usize {
        self.model.lock().await.classes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.model.lock().await.edges.len()
    }

    pub async fn nodes(&self) -> Vec<ChartNode> {
        self.model.lock().await.nodes.clone()
    }

    pub async fn page_list(&self) -> Vec<PageRange> {
        self.page_list.lock().await.clone()
    }

    /// 第 page 页上可见的边
    pub async fn edges_on_page(&self, page: u32) -> Vec<ChartEdge> {
        let model = self.model.lock().await;
        model
            .edges
            .iter()
            .filter(|e| e.visible_on(page))
            .cloned()
            .collect()
    }

    pub async fn x_range(&self) -> (i32, i32) {
        self.model.lock().await.x_range
    }

    pub async fn y_range(&self) -> (i32, i32) {
        self.model.lock().await.y_range
    }

    pub async fn display_state(&self) -> DisplayState {
        self.display.lock().await.clone()
    }

    pub async fn snapshot(&self) -> ChartSnapshot {
        let page_list = self.page_list.lock().await.clone();
        let model = self.model.lock().await;
        ChartSnapshot {
            name: self.name.clone(),
            nodes: model.nodes.clone(),
            page_list,
            classes: model
                .classes
                .iter()
                .cloned()
                .map(WireObject::ChartClass)
                .collect(),
            edges: model.edges.clone(),
            x_range: model.x_range,
            y_range: model.y_range,
            initial_x_range: model.initial_x_range,
            initial_y_range: model.initial_y_range,
        }
    }

    /// 向新接入的观察者推送完整状态
    pub async fn consume_new_user(&self) {
        let state = self.snapshot().await;
        let display_state = self.display_state().await;
        self.broadcast(
            Message::new(Command::topic("initialize.chart.state"))
                .with("state", state)
                .with("display_state", display_state),
        );
    }
}
