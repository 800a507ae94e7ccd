//! 配置管理模块
//!
//! 提供渲染器配置的加载、解析和校验。程序不接受命令行参数，
//! 所有设置来自可选的 TOML 配置文件，缺省值即内置常量。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1200
//! height = 900
//! title = "Frame Orchestrator"
//!
//! [graphics]
//! backend = "vulkan"        # vulkan, dx12 或 headless
//! buffering_count = 3
//! vsync = false             # false 时优先 mailbox，否则 fifo
//! acquire_timeout_ms = 1000
//! clear_color = [0.1, 0.1, 0.15, 1.0]
//!
//! [headless]
//! gpu_latency_ms = 4
//! frame_count = 120
//!
//! [logging]
//! level = "info"            # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 帧槽位数量上限
pub const MAX_BUFFERING_COUNT: u32 = 8;

/// 渲染器配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 无窗口后端配置
    #[serde(default)]
    pub headless: HeadlessConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackendKind,

    /// 帧槽位数量（同时也是请求的交换链图像数量）
    #[serde(default = "default_buffering_count")]
    pub buffering_count: u32,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// `begin_frame` 的等待期限（毫秒），0 表示无限等待
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// 清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackendKind {
    /// Vulkan 后端
    Vulkan,
    /// DirectX 12 后端
    Dx12,
    /// 模拟 GPU 时间线的无窗口后端
    Headless,
}

/// 无窗口后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    /// 每次提交的模拟 GPU 执行耗时（毫秒）
    #[serde(default = "default_gpu_latency_ms")]
    pub gpu_latency_ms: u64,

    /// 渲染的帧数
    #[serde(default = "default_frame_count")]
    pub frame_count: u64,

    /// 模拟交换链尺寸
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1200 }
fn default_height() -> u32 { 900 }
fn default_title() -> String { "Frame Orchestrator".to_string() }
fn default_backend() -> GraphicsBackendKind { GraphicsBackendKind::Vulkan }
fn default_buffering_count() -> u32 { 3 }
fn default_vsync() -> bool { false }
fn default_acquire_timeout_ms() -> u64 { 1000 }
fn default_clear_color() -> [f32; 4] { [0.1, 0.1, 0.15, 1.0] }
fn default_gpu_latency_ms() -> u64 { 4 }
fn default_frame_count() -> u64 { 120 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "frame_orchestrator.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            buffering_count: default_buffering_count(),
            vsync: default_vsync(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            clear_color: default_clear_color(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            gpu_latency_ms: default_gpu_latency_ms(),
            frame_count: default_frame_count(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.graphics.buffering_count < 2 || self.graphics.buffering_count > MAX_BUFFERING_COUNT {
            return Err(ConfigError::InvalidValue {
                field: "graphics.buffering_count".to_string(),
                reason: format!("Buffering count must be within 2..={}", MAX_BUFFERING_COUNT),
            }.into());
        }

        if self.headless.width == 0 || self.headless.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "headless.width/height".to_string(),
                reason: "Swapchain dimensions must be greater than 0".to_string(),
            }.into());
        }

        Ok(())
    }

    /// `begin_frame` 使用的等待期限
    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.graphics.acquire_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl GraphicsBackendKind {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackendKind::Vulkan => "Vulkan",
            GraphicsBackendKind::Dx12 => "DirectX 12",
            GraphicsBackendKind::Headless => "Headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1200);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.graphics.backend, GraphicsBackendKind::Vulkan);
        assert_eq!(config.graphics.buffering_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.buffering_count = 1;
        assert!(config.validate().is_err());

        config.graphics.buffering_count = MAX_BUFFERING_COUNT + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.acquire_timeout_ms = 0;
        assert!(config.validate().is_ok());
        assert_eq!(config.acquire_timeout(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "headless"
            buffering_count = 2

            [headless]
            frame_count = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackendKind::Headless);
        assert_eq!(config.graphics.buffering_count, 2);
        assert_eq!(config.headless.frame_count, 10);
        assert_eq!(config.headless.gpu_latency_ms, 4);
        assert_eq!(config.window.width, 1200);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.acquire_timeout(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let result = Config::from_toml_str("[graphics]\nbackend = \"metal\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = Config::from_file_or_default("definitely/not/here/config.toml");
        assert_eq!(config.graphics.buffering_count, 3);
    }
}
