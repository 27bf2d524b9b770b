//! 故障路由
//!
//! 根据 SseqError 的类别给出 FaultRoute，供 Agent 树决定是回报发起方、就地吸收还是向上升级。

use crate::core::{ErrorKind, FaultRoute, SseqError};

/// 将错误映射为去向
#[derive(Debug, Default, Clone, Copy)]
pub struct FaultRouter;

impl FaultRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, err: &SseqError) -> FaultRoute {
        match err.kind() {
            ErrorKind::Protocol => FaultRoute::ReportToOrigin,
            ErrorKind::Validation => FaultRoute::Absorb,
            ErrorKind::Fault => FaultRoute::Escalate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_unknown_mode() {
        let router = FaultRouter::new();
        let err = SseqError::UnknownMode("Bogus".to_string());
        assert_eq!(router.route(&err), FaultRoute::ReportToOrigin);
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn test_route_invalid_mode_command() {
        let router = FaultRouter::new();
        let err = SseqError::InvalidModeCommand("interact.mode.fly".to_string());
        assert_eq!(router.route(&err), FaultRoute::ReportToOrigin);
    }

    #[test]
    fn test_route_unknown_type() {
        let router = FaultRouter::new();
        let err = SseqError::UnknownType("Mystery".to_string());
        assert_eq!(router.route(&err), FaultRoute::ReportToOrigin);
    }

    #[test]
    fn test_route_invalid_geometry() {
        let router = FaultRouter::new();
        let err = SseqError::InvalidGeometry("dx = 2".to_string());
        assert_eq!(router.route(&err), FaultRoute::Absorb);
    }

    #[test]
    fn test_route_double_consume() {
        let router = FaultRouter::new();
        let err = SseqError::DoubleConsume("click".to_string());
        assert_eq!(router.route(&err), FaultRoute::Escalate);
    }

    #[test]
    fn test_route_fault() {
        let router = FaultRouter::new();
        let err = SseqError::Fault("boom".to_string());
        assert_eq!(router.route(&err), FaultRoute::Escalate);
    }
}
