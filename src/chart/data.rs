//! 图表数据模型：节点、类、三种边与页范围
//!
//! 类与边之间只保存 id（类的 `edges` 是反向引用，不拥有边）；所有元素由 `ChartModel` 统一持有。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 「无穷」页码
pub const INFINITY: u32 = 65535;

pub type ClassId = usize;
pub type EdgeId = usize;
pub type NodeIndex = usize;

/// 渲染原语（形状 + 样式），按值去重
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartNode {
    pub shape: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

impl ChartNode {
    pub fn new(shape: &str) -> Self {
        Self {
            shape: shape.to_string(),
            color: None,
            fill: None,
            stroke: None,
            size: None,
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    pub fn circle() -> Self {
        Self::new("circle")
    }
}

/// 页范围：有序整数对，首元素不大于次元素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange(pub u32, pub u32);

impl PageRange {
    pub fn new(a: u32, b: u32) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn single(page: u32) -> Self {
        Self(page, page)
    }

    pub fn lower(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, page: u32) -> bool {
        self.0 <= page && page <= self.1
    }
}

/// 放置在整数双次数 (x, y) 上的数学对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartClass {
    pub id: ClassId,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub name: String,
    pub node_list: Vec<NodeIndex>,
    #[serde(default)]
    pub x_nudge: f64,
    #[serde(default)]
    pub y_nudge: f64,
    /// 参与的微分页
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// 关联边（反向引用）
    #[serde(skip)]
    pub edges: Vec<EdgeId>,
}

fn default_visible() -> bool {
    true
}

impl ChartClass {
    pub fn new(id: ClassId, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            name: String::new(),
            node_list: vec![0],
            x_nudge: 0.0,
            y_nudge: 0.0,
            pages: Vec::new(),
            visible: true,
            edges: Vec::new(),
        }
    }

    pub fn add_page(&mut self, page: u32) {
        if let Err(pos) = self.pages.binary_search(&page) {
            self.pages.insert(pos, page);
        }
    }
}

impl std::fmt::Display for ChartClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "({}, {})", self.x, self.y)
        } else {
            write!(f, "{} ({}, {})", self.name, self.x, self.y)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structline {
    pub id: EdgeId,
    pub source: ClassId,
    pub target: ClassId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Differential {
    pub id: EdgeId,
    pub page: u32,
    pub source: ClassId,
    pub target: ClassId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub id: EdgeId,
    pub source: ClassId,
    pub target: ClassId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub bend: f64,
}

/// 边：结构线 / 微分 / 扩张，id 在三种边之间共享编号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChartEdge {
    #[serde(rename = "ChartStructline")]
    Structline(Structline),
    #[serde(rename = "ChartDifferential")]
    Differential(Differential),
    #[serde(rename = "ChartExtension")]
    Extension(Extension),
}

impl ChartEdge {
    pub fn id(&self) -> EdgeId {
        match self {
            ChartEdge::Structline(e) => e.id,
            ChartEdge::Differential(e) => e.id,
            ChartEdge::Extension(e) => e.id,
        }
    }

    pub fn endpoints(&self) -> (ClassId, ClassId) {
        match self {
            ChartEdge::Structline(e) => (e.source, e.target),
            ChartEdge::Differential(e) => (e.source, e.target),
            ChartEdge::Extension(e) => (e.source, e.target),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChartEdge::Structline(_) => "ChartStructline",
            ChartEdge::Differential(_) => "ChartDifferential",
            ChartEdge::Extension(_) => "ChartExtension",
        }
    }

    pub fn color(&self) -> Option<&str> {
        match self {
            ChartEdge::Structline(e) => e.color.as_deref(),
            ChartEdge::Differential(e) => e.color.as_deref(),
            ChartEdge::Extension(e) => e.color.as_deref(),
        }
    }

    pub fn set_color(&mut self, color: Option<String>) {
        match self {
            ChartEdge::Structline(e) => e.color = color,
            ChartEdge::Differential(e) => e.color = color,
            ChartEdge::Extension(e) => e.color = color,
        }
    }

    /// 在第 page 页上是否可见：微分只在自身页之前（含）可见，其它边始终可见
    pub fn visible_on(&self, page: u32) -> bool {
        match self {
            ChartEdge::Differential(d) => page <= d.page,
            _ => true,
        }
    }
}

/// 待广播的脏元素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChartElement {
    Class(ClassId),
    Edge(EdgeId),
}

/// 节点、类、边与双次数索引（不含单独加锁的页列表 / 脏集合 / 节点缓存）
#[derive(Debug, Default)]
pub struct ChartModel {
    pub nodes: Vec<ChartNode>,
    pub classes: Vec<ChartClass>,
    pub classes_by_bidegree: HashMap<(i32, i32), Vec<ClassId>>,
    pub edges: Vec<ChartEdge>,
    pub x_range: (i32, i32),
    pub y_range: (i32, i32),
    pub initial_x_range: (i32, i32),
    pub initial_y_range: (i32, i32),
}

impl ChartModel {
    pub fn class(&self, id: ClassId) -> Option<&ChartClass> {
        self.classes.get(id)
    }

    pub fn class_mut(&mut self, id: ClassId) -> Option<&mut ChartClass> {
        self.classes.get_mut(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&ChartEdge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut ChartEdge> {
        self.edges.get_mut(id)
    }

    pub fn classes_in_bidegree(&self, x: i32, y: i32) -> Vec<&ChartClass> {
        self.classes_by_bidegree
            .get(&(x, y))
            .map(|ids| ids.iter().filter_map(|id| self.classes.get(*id)).collect())
            .unwrap_or_default()
    }
}

/// 显示状态（背景色等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub background_color: String,
}
