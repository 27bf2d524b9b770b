//! 消息层：Command 主题路径、Envelope 在途消息、带类型标签的线格式编解码

mod command;
mod envelope;
pub mod wire;

pub use command::{any_matches, Command, WILDCARD};
pub use envelope::{AgentPath, Envelope, Message};
pub use wire::WireObject;
