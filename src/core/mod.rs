//! 核心层：错误与故障路由、运行时组装、优雅关闭

pub mod builder;
pub mod error;
pub mod recovery;
pub mod shutdown;

pub use builder::{ChartRuntime, RuntimeBuilder};
pub use error::{ErrorKind, FaultRoute, SseqError};
pub use recovery::FaultRouter;
pub use shutdown::{ChartDrain, DrainReport, ShutdownReason, ShutdownTrigger};
