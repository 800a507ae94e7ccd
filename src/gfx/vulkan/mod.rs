//! Vulkan 图形后端
//!
//! 本模块包含所有 Vulkan 相关的代码：
//! - context：实例、表面、设备和队列
//! - swapchain：交换链及其获取/呈现信号量
//! - convert：资源状态、格式和错误码的转换
//! - backend：`GraphicsBackend` 的实现

mod backend;
mod context;
mod convert;
mod swapchain;

pub use backend::VulkanBackend;
