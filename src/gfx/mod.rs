//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现，包括：
//! - Vulkan：跨平台的现代图形 API
//! - DirectX 12：Windows 平台的高性能图形 API
//! - headless：在 CPU 上模拟 GPU 时间线，不需要窗口和驱动
//!
//! 所有后端都实现了统一的 `GraphicsBackend` trait，
//! 帧编排器和资源上传不关心运行在哪一个后端上。

pub mod backend;
pub mod headless;
pub mod vulkan;
#[cfg(target_os = "windows")]
pub mod dx12;

use tracing::info;
use winit::window::Window;

use crate::core::config::{Config, GraphicsBackendKind};
use crate::core::error::{GraphicsError, Result};

pub use backend::{CommandContextId, GraphicsBackend};
pub use headless::{HeadlessBackend, HeadlessOptions};
pub use vulkan::VulkanBackend;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Backend;

/// 按配置创建图形后端
///
/// Vulkan 和 DirectX 12 需要窗口；无窗口后端忽略 `window`。
pub fn create_backend(config: &Config, window: Option<&Window>) -> Result<Box<dyn GraphicsBackend>> {
    let kind = config.graphics.backend;
    info!(backend = kind.name(), "Creating graphics backend");

    let backend: Box<dyn GraphicsBackend> = match kind {
        GraphicsBackendKind::Headless => Box::new(HeadlessBackend::new(HeadlessOptions::from_config(config))?),
        GraphicsBackendKind::Vulkan => Box::new(VulkanBackend::new(require_window(kind, window)?, config)?),
        #[cfg(target_os = "windows")]
        GraphicsBackendKind::Dx12 => Box::new(Dx12Backend::new(require_window(kind, window)?, config)?),
        #[cfg(not(target_os = "windows"))]
        GraphicsBackendKind::Dx12 => {
            return Err(GraphicsError::init("D3D12CreateDevice", "DirectX 12 is only available on Windows").into())
        }
    };
    Ok(backend)
}

fn require_window(kind: GraphicsBackendKind, window: Option<&Window>) -> Result<&Window> {
    window.ok_or_else(|| GraphicsError::invalid(format!("The {} backend needs a window", kind.name())).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_backend_needs_no_window() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackendKind::Headless;
        config.headless.width = 32;
        config.headless.height = 16;
        let backend = create_backend(&config, None).unwrap();
        assert_eq!(backend.name(), "Headless");
        assert_eq!(backend.swapchain_extent(), (32, 16));
        assert_eq!(backend.swapchain_image_count(), config.graphics.buffering_count);
    }

    #[test]
    fn test_windowed_backend_without_window_is_rejected() {
        let config = Config::default();
        assert_eq!(config.graphics.backend, GraphicsBackendKind::Vulkan);
        let err = create_backend(&config, None).err().unwrap();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::InvalidArgument(_))));
    }
}
