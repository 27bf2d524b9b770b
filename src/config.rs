//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SSEQ__*` 覆盖（双下划线表示嵌套，如 `SSEQ__CHART__NAME=C2`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub chart: ChartSection,
    #[serde(default)]
    pub interact: InteractSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 关闭时收尾（跑空队列 + flush）的时限
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl AppSection {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn default_app_name() -> String {
    "sseq".to_string()
}

fn default_drain_timeout_secs() -> u64 {
    5
}

/// [chart] 段：图表名、初始显示范围、背景色
#[derive(Debug, Clone, Deserialize)]
pub struct ChartSection {
    #[serde(default = "default_chart_name")]
    pub name: String,
    #[serde(default = "default_range")]
    pub initial_x_range: (i32, i32),
    #[serde(default = "default_range")]
    pub initial_y_range: (i32, i32),
    #[serde(default = "default_background_color")]
    pub background_color: String,
}

impl Default for ChartSection {
    fn default() -> Self {
        Self {
            name: default_chart_name(),
            initial_x_range: default_range(),
            initial_y_range: default_range(),
            background_color: default_background_color(),
        }
    }
}

fn default_chart_name() -> String {
    "chart".to_string()
}

fn default_range() -> (i32, i32) {
    (0, 10)
}

fn default_background_color() -> String {
    "#FFFFFF".to_string()
}

/// [interact] 段：点击吸附容差、默认颜色、prompt 超时、初始模式
#[derive(Debug, Clone, Deserialize)]
pub struct InteractSection {
    /// 点击距整数格点的最大偏差（两个方向）
    #[serde(default = "default_click_tolerance")]
    pub click_tolerance: f64,
    /// 扩张边颜色的初始建议值（之后记住上一次的选择）
    #[serde(default = "default_extension_color")]
    pub extension_color: String,
    #[serde(default = "default_differential_color")]
    pub differential_color: String,
    /// 未设置时 prompt 无限等待
    #[serde(default)]
    pub prompt_timeout_secs: Option<u64>,
    #[serde(default = "default_initial_mode")]
    pub initial_mode: String,
}

impl Default for InteractSection {
    fn default() -> Self {
        Self {
            click_tolerance: default_click_tolerance(),
            extension_color: default_extension_color(),
            differential_color: default_differential_color(),
            prompt_timeout_secs: None,
            initial_mode: default_initial_mode(),
        }
    }
}

impl InteractSection {
    pub fn prompt_timeout(&self) -> Option<Duration> {
        self.prompt_timeout_secs.map(Duration::from_secs)
    }
}

fn default_click_tolerance() -> f64 {
    0.3
}

fn default_extension_color() -> String {
    "black".to_string()
}

fn default_differential_color() -> String {
    "blue".to_string()
}

fn default_initial_mode() -> String {
    "NoMode".to_string()
}

/// 从 config 目录加载配置，环境变量 SSEQ__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SSEQ__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SSEQ")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
