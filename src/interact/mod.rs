//! 交互式编辑：模式状态机、prompt 往返与交互式图表 Agent
//!
//! 点击在路由循环内取定当前模式后进入本 Agent 的点击队列，由单个 worker 按到达顺序执行（可能挂起等待 prompt 结果）；
//! 模式切换与模式子命令都在路由循环内同步完成。

mod agent;
mod interaction;
pub mod mode;
mod prompt;

pub use agent::{InteractRoute, InteractiveChartAgent};
pub use interaction::{InteractSession, Interaction};
pub use mode::{Mode, ModeCommand};
pub use prompt::PromptSlot;
