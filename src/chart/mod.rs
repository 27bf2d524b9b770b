//! 谱序列图表：数据模型与状态引擎

mod agent;
mod data;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use agent::{ChartAgent, ChartRoute};
pub use data::{
    ChartClass, ChartEdge, ChartElement, ChartModel, ChartNode, ClassId, Differential,
    DisplayState, EdgeId, Extension, NodeIndex, PageRange, Structline, INFINITY,
};
pub use state::{ChartSnapshot, ChartState, ClassFields, EdgeFields};
