//! 交互模式：封闭的模式枚举、模式子命令与点击几何校验

use std::fmt;

use crate::chart::ChartClass;
use crate::core::SseqError;
use crate::message::{Command, Message};

/// 当前对点击的解释方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Idle,
    AddClass,
    AddEdge,
    Rename,
    Recolor,
    AddExtension,
    AddDifferential,
    Nudge,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Idle,
        Mode::AddClass,
        Mode::AddEdge,
        Mode::Rename,
        Mode::Recolor,
        Mode::AddExtension,
        Mode::AddDifferential,
        Mode::Nudge,
    ];

    /// 线协议上的模式名（`interact.mode.set` 的 `mode` 参数）
    pub fn wire_name(&self) -> &'static str {
        match self {
            Mode::Idle => "NoMode",
            Mode::AddClass => "AddClassMode",
            Mode::AddEdge => "AddEdgeMode",
            Mode::Rename => "NameClassMode",
            Mode::Recolor => "ColorMode",
            Mode::AddExtension => "AddExtensionMode",
            Mode::AddDifferential => "AddDifferentialMode",
            Mode::Nudge => "NudgeClassMode",
        }
    }

    /// 接受线协议名，也接受枚举名（如 `AddClass`）
    pub fn from_name(name: &str) -> Result<Mode, SseqError> {
        Self::ALL
            .into_iter()
            .find(|m| m.wire_name() == name || format!("{m:?}") == name)
            .ok_or_else(|| SseqError::UnknownMode(name.to_string()))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// `interact.mode.<subcommand>` 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModeCommand {
    /// 所有模式都接受
    Cancel,
    /// 仅 AddExtension
    AdjustBend { delta: f64 },
    /// 仅 Nudge
    NudgeClass { x: f64, y: f64 },
}

impl ModeCommand {
    /// `sub` 是去掉 `interact.mode` 之后的部分；当前模式没有对应处理器时报 InvalidModeCommand
    pub fn parse(mode: Mode, sub: &Command, msg: &Message) -> Result<ModeCommand, SseqError> {
        let segments: Vec<&str> = sub.segments().iter().map(String::as_str).collect();
        match (mode, segments.as_slice()) {
            (_, ["cancel"]) => Ok(ModeCommand::Cancel),
            (Mode::AddExtension, ["extension", "adjust_bend"]) => Ok(ModeCommand::AdjustBend {
                delta: msg.require("delta", 0)?,
            }),
            (Mode::Nudge, ["nudge_class"]) => Ok(ModeCommand::NudgeClass {
                x: msg.require("x", 0)?,
                y: msg.require("y", 1)?,
            }),
            _ => Err(SseqError::InvalidModeCommand(msg.cmd.to_string())),
        }
    }
}

/// 点击坐标吸附到整数格点；任一方向偏差不小于 `tolerance` 时返回 None
pub fn snap_to_grid(x: f64, y: f64, tolerance: f64) -> Option<(i32, i32)> {
    let (rx, ry) = (x.round(), y.round());
    if (x - rx).abs() < tolerance && (y - ry).abs() < tolerance {
        Some((rx as i32, ry as i32))
    } else {
        None
    }
}

/// 扩张：Δx ∈ {0, 1, 3} 且 Δy ≥ 2
pub fn validate_extension(source: &ChartClass, target: &ChartClass) -> Result<(), SseqError> {
    let dx = i64::from(target.x) - i64::from(source.x);
    let dy = i64::from(target.y) - i64::from(source.y);
    if ![0, 1, 3].contains(&dx) {
        return Err(SseqError::InvalidGeometry(format!(
            "extension x-displacement {dx} not in {{0, 1, 3}}"
        )));
    }
    if dy < 2 {
        return Err(SseqError::InvalidGeometry(format!(
            "extension y-displacement {dy} is less than 2"
        )));
    }
    Ok(())
}

/// 微分：source.x == target.x + 1，返回页码 target.y - source.y（必须为正）
pub fn validate_differential(source: &ChartClass, target: &ChartClass) -> Result<u32, SseqError> {
    // 坐标差在 i64 里算，极端坐标不会溢出
    if i64::from(source.x) != i64::from(target.x) + 1 {
        return Err(SseqError::InvalidGeometry(format!(
            "differential from x = {} must land on x = {}, got {}",
            source.x,
            i64::from(source.x) - 1,
            target.x
        )));
    }
    let page = i64::from(target.y) - i64::from(source.y);
    u32::try_from(page)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| SseqError::InvalidGeometry(format!("differential page {page} is not positive")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_at(x: i32, y: i32) -> ChartClass {
        ChartClass::new(0, x, y)
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(Mode::from_name("AddClassMode").unwrap(), Mode::AddClass);
        assert_eq!(Mode::from_name("Nudge").unwrap(), Mode::Nudge);
        assert_eq!(Mode::from_name("NoMode").unwrap(), Mode::Idle);
        assert!(matches!(
            Mode::from_name("FlyMode"),
            Err(SseqError::UnknownMode(name)) if name == "FlyMode"
        ));
    }

    #[test]
    fn test_mode_command_per_mode() {
        let msg = Message::new(Command::topic("interact.mode.extension.adjust_bend")).with("delta", 2.5);
        let sub = Command::topic("extension.adjust_bend");
        assert_eq!(
            ModeCommand::parse(Mode::AddExtension, &sub, &msg).unwrap(),
            ModeCommand::AdjustBend { delta: 2.5 }
        );
        assert!(matches!(
            ModeCommand::parse(Mode::AddClass, &sub, &msg),
            Err(SseqError::InvalidModeCommand(_))
        ));

        let cancel = Message::new(Command::topic("interact.mode.cancel"));
        for mode in Mode::ALL {
            assert_eq!(
                ModeCommand::parse(mode, &Command::topic("cancel"), &cancel).unwrap(),
                ModeCommand::Cancel
            );
        }
    }

    #[test]
    fn test_nudge_positional_args() {
        let msg = Message::new(Command::topic("interact.mode.nudge_class"))
            .with_arg(serde_json::json!(1.0))
            .with_arg(serde_json::json!(-0.5));
        assert_eq!(
            ModeCommand::parse(Mode::Nudge, &Command::topic("nudge_class"), &msg).unwrap(),
            ModeCommand::NudgeClass { x: 1.0, y: -0.5 }
        );
    }

    #[test]
    fn test_snap_to_grid() {
        assert_eq!(snap_to_grid(2.1, 2.9, 0.3), Some((2, 3)));
        assert_eq!(snap_to_grid(-0.2, 0.0, 0.3), Some((0, 0)));
        assert_eq!(snap_to_grid(2.5, 3.0, 0.3), None);
        assert_eq!(snap_to_grid(2.0, 3.35, 0.3), None);
    }

    #[test]
    fn test_extension_geometry() {
        let s = class_at(0, 0);
        for (dx, dy) in [(0, 2), (1, 2), (3, 5)] {
            assert!(validate_extension(&s, &class_at(dx, dy)).is_ok(), "({dx}, {dy})");
        }
        for (dx, dy) in [(2, 2), (0, 1)] {
            assert!(matches!(
                validate_extension(&s, &class_at(dx, dy)),
                Err(SseqError::InvalidGeometry(_))
            ));
        }
    }

    #[test]
    fn test_differential_geometry() {
        assert_eq!(validate_differential(&class_at(1, 0), &class_at(0, 3)).unwrap(), 3);
        assert!(validate_differential(&class_at(1, 0), &class_at(1, 3)).is_err());
        assert!(validate_differential(&class_at(1, 3), &class_at(0, 3)).is_err());
    }

    #[test]
    fn test_geometry_at_coordinate_extremes() {
        let low = class_at(i32::MIN, i32::MIN);
        let high = class_at(i32::MAX, i32::MAX);
        assert!(matches!(
            validate_extension(&low, &high),
            Err(SseqError::InvalidGeometry(_))
        ));
        assert!(matches!(
            validate_extension(&high, &low),
            Err(SseqError::InvalidGeometry(_))
        ));
        assert!(matches!(
            validate_differential(&low, &high),
            Err(SseqError::InvalidGeometry(_))
        ));
        assert!(matches!(
            validate_differential(&class_at(i32::MIN, 0), &class_at(i32::MAX, 1)),
            Err(SseqError::InvalidGeometry(_))
        ));
        // 页码恰为 u32::MAX
        assert_eq!(
            validate_differential(&class_at(1, i32::MIN), &class_at(0, i32::MAX)).unwrap(),
            u32::MAX
        );
        assert!(matches!(
            validate_differential(&class_at(i32::MIN + 1, i32::MAX), &class_at(i32::MIN, i32::MIN)),
            Err(SseqError::InvalidGeometry(_))
        ));
    }
}
