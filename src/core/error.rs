//! 错误处理模块
//!
//! 定义了渲染器中使用的统一错误类型。
//!
//! # 错误分类
//!
//! - `Initialization`：设备、表面或资源创建失败，启动阶段致命
//! - `DeviceLost`：GPU 端的致命错误，进程内不可恢复
//! - `SurfaceLost` / `PresentLost`：表面失效（例如窗口尺寸变化），重建交换链后可恢复
//! - `AcquireTimeout`：等待帧槽位或交换链图像超过调用方给定的期限
//! - `OutOfMemory`：资源分配失败，调用方必须放弃本次加载
//! - `InvalidArgument`：编程错误（空数据、句柄状态不匹配等）

use std::fmt;
use std::time::Duration;

/// 渲染器统一的 Result 类型
pub type Result<T> = std::result::Result<T, RenderError>;

/// 渲染器的错误类型
#[derive(Debug)]
pub enum RenderError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
///
/// `operation` 字段记录失败的 API 调用名称，`status` 字段记录底层返回码，
/// 两者一起出现在日志中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// 设备/表面/资源创建失败
    Initialization { operation: String, status: String },

    /// 设备丢失（命令提交失败等）
    DeviceLost { operation: String, status: String },

    /// 获取交换链图像时表面失效
    SurfaceLost,

    /// 呈现时表面失效
    PresentLost,

    /// 等待超时
    AcquireTimeout { waited: Duration },

    /// 内存分配失败
    OutOfMemory { operation: String },

    /// 参数错误
    InvalidArgument(String),
}

impl GraphicsError {
    /// 创建初始化错误
    pub fn init(operation: impl Into<String>, status: impl fmt::Debug) -> Self {
        GraphicsError::Initialization {
            operation: operation.into(),
            status: format!("{:?}", status),
        }
    }

    /// 创建设备丢失错误
    pub fn device_lost(operation: impl Into<String>, status: impl fmt::Debug) -> Self {
        GraphicsError::DeviceLost {
            operation: operation.into(),
            status: format!("{:?}", status),
        }
    }

    /// 创建参数错误
    pub fn invalid(message: impl Into<String>) -> Self {
        GraphicsError::InvalidArgument(message.into())
    }

    /// 重建交换链或稍后重试即可恢复的错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphicsError::SurfaceLost | GraphicsError::PresentLost | GraphicsError::AcquireTimeout { .. }
        )
    }

    /// 需要重建交换链相关资源的错误
    pub fn needs_swapchain_rebuild(&self) -> bool {
        matches!(self, GraphicsError::SurfaceLost | GraphicsError::PresentLost)
    }
}

impl RenderError {
    /// 如果是图形错误则返回其引用
    pub fn as_graphics(&self) -> Option<&GraphicsError> {
        match self {
            RenderError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Config(e) => write!(f, "Configuration error: {}", e),
            RenderError::Graphics(e) => write!(f, "Graphics error: {}", e),
            RenderError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::Initialization { operation, status } => {
                write!(f, "{} failed (status: {})", operation, status)
            }
            GraphicsError::DeviceLost { operation, status } => {
                write!(f, "Device lost during {} (status: {})", operation, status)
            }
            GraphicsError::SurfaceLost => write!(f, "Surface lost while acquiring the next image"),
            GraphicsError::PresentLost => write!(f, "Surface lost while presenting"),
            GraphicsError::AcquireTimeout { waited } => {
                write!(f, "Timed out after {:?} waiting for a frame slot", waited)
            }
            GraphicsError::OutOfMemory { operation } => write!(f, "Out of memory during {}", operation),
            GraphicsError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            RenderError::Config(e) => Some(e),
            RenderError::Graphics(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err)
    }
}

impl From<ConfigError> for RenderError {
    fn from(err: ConfigError) -> Self {
        RenderError::Config(err)
    }
}

impl From<GraphicsError> for RenderError {
    fn from(err: GraphicsError) -> Self {
        RenderError::Graphics(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(GraphicsError::SurfaceLost.is_recoverable());
        assert!(GraphicsError::PresentLost.needs_swapchain_rebuild());
        assert!(GraphicsError::AcquireTimeout { waited: Duration::from_millis(5) }.is_recoverable());
        assert!(!GraphicsError::AcquireTimeout { waited: Duration::ZERO }.needs_swapchain_rebuild());
        assert!(!GraphicsError::device_lost("vkQueueSubmit", -4).is_recoverable());
        assert!(!GraphicsError::invalid("empty upload").is_recoverable());
    }

    #[test]
    fn test_display_names_operation_and_status() {
        let err: RenderError = GraphicsError::init("vkCreateDevice", "ERROR_INITIALIZATION_FAILED").into();
        let text = err.to_string();
        assert!(text.contains("vkCreateDevice"));
        assert!(text.contains("ERROR_INITIALIZATION_FAILED"));
        assert_eq!(err.as_graphics().map(|e| e.is_recoverable()), Some(false));
    }
}
