//! 核心功能模块
//!
//! 本模块提供渲染器的基础设施：日志系统、配置管理和错误处理。
//! 这些模块独立于具体的图形 API，任何后端都可以使用。
//!
//! # 模块组织
//!
//! - `log`：日志系统，基于 tracing 的结构化日志
//! - `config`：配置管理，从 TOML 配置文件加载设置
//! - `error`：错误处理，定义统一的错误类型

pub mod config;
pub mod error;
pub mod log;

// 重新导出常用类型，方便使用
pub use config::{Config, GraphicsBackendKind};
pub use error::{GraphicsError, RenderError, Result};
