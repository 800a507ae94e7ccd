//! DirectX 12 图形后端
//!
//! 本模块包含所有 DirectX 12 相关的代码：
//! - context：DXGI 工厂、设备、命令队列和队列 fence
//! - swapchain：翻转模型交换链和 RTV 堆
//! - convert：资源状态、格式和错误码的转换
//! - backend：`GraphicsBackend` 的实现

mod backend;
mod context;
mod convert;
mod swapchain;

pub use backend::Dx12Backend;
