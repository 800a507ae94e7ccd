//! 图形后端的统一抽象接口
//!
//! 本模块定义了所有图形后端（Vulkan、DirectX 12、无窗口模拟后端）必须实现的统一接口。
//! 帧编排器和资源上传只依赖这一组能力，不关心具体的图形 API。
//!
//! # 能力划分
//!
//! - 资源：缓冲区和纹理的创建、写入和销毁
//! - 命令：每个命令上下文对应一个命令池/分配器加一个命令缓冲区/列表
//! - 队列：单一图形队列上的提交和 fence 时间线
//! - 交换链：获取图像、呈现以及尺寸变化后的重建
//!
//! trait 保持 object safe，`Box<dyn GraphicsBackend>` 同样实现了该 trait，
//! 运行时按配置选择后端时使用。

use std::time::Duration;

use crate::core::error::Result;
use crate::renderer::command::CommandList;
use crate::renderer::resource::{BufferDescriptor, BufferHandle, TextureDescriptor, TextureHandle};
use crate::renderer::sync::FenceValue;

/// 命令上下文标识
///
/// 一个命令上下文包含命令池（Vulkan）或命令分配器（DX12）以及从中分配的命令缓冲区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandContextId(pub(crate) u64);

/// 图形后端的统一接口
pub trait GraphicsBackend {
    /// 获取后端的名称
    ///
    /// 用于日志输出和调试（如 "Vulkan"、"DirectX 12"）。
    fn name(&self) -> &'static str;

    /// 创建缓冲区，内容未定义，状态为 `Undefined`
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle>;

    /// 写入 CPU 可见的缓冲区
    ///
    /// 只适用于 `MemoryType::HostVisible` 的缓冲区。
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// 创建二维纹理，状态为 `Undefined`
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// 创建命令上下文
    fn create_command_context(&mut self) -> Result<CommandContextId>;

    fn destroy_command_context(&mut self, context: CommandContextId);

    /// 重置命令上下文
    ///
    /// 调用方保证该上下文上一次提交的工作已经完成。
    fn reset_command_context(&mut self, context: CommandContextId) -> Result<()>;

    /// 把命令列表翻译为原生命令并关闭命令缓冲区
    fn encode(&mut self, context: CommandContextId, commands: &CommandList) -> Result<()>;

    /// 提交命令上下文，并在执行完成后把队列 fence 推进到 `signal`
    ///
    /// `present_image` 为本次提交写入、随后将要呈现的交换链图像；
    /// 提交会等待该图像的获取完成。此调用不会在 CPU 上等待 GPU。
    fn submit(&mut self, context: CommandContextId, signal: FenceValue, present_image: Option<u32>) -> Result<()>;

    /// GPU 已经完成的最大 fence 值
    fn completed_fence_value(&mut self) -> Result<FenceValue>;

    /// 阻塞等待 fence 达到 `value`
    ///
    /// `timeout` 为 `None` 时无限等待。返回 `false` 表示超时。
    fn wait_for_fence(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<bool>;

    /// 交换链图像数量
    fn swapchain_image_count(&self) -> u32;

    /// 交换链图像对应的纹理句柄
    fn swapchain_image(&self, index: u32) -> Result<TextureHandle>;

    /// 交换链尺寸
    fn swapchain_extent(&self) -> (u32, u32);

    /// 获取下一张可写的交换链图像
    ///
    /// 顺序由呈现引擎决定，不一定是轮转的。
    /// 表面失效时返回 `SurfaceLost`，超时返回 `AcquireTimeout`。
    fn acquire_next_image(&mut self, timeout: Option<Duration>) -> Result<u32>;

    /// 呈现交换链图像，表面失效时返回 `PresentLost`
    fn present(&mut self, image_index: u32) -> Result<()>;

    /// 按新尺寸重建交换链
    ///
    /// 调用前所有引用交换链图像的 GPU 工作必须已经完成。
    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()>;

    /// 等待队列上的所有工作完成
    fn wait_idle(&mut self) -> Result<()>;
}

impl<T: GraphicsBackend + ?Sized> GraphicsBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        (**self).create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write_buffer(buffer, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        (**self).destroy_buffer(buffer)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        (**self).create_texture(desc)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        (**self).destroy_texture(texture)
    }

    fn create_command_context(&mut self) -> Result<CommandContextId> {
        (**self).create_command_context()
    }

    fn destroy_command_context(&mut self, context: CommandContextId) {
        (**self).destroy_command_context(context)
    }

    fn reset_command_context(&mut self, context: CommandContextId) -> Result<()> {
        (**self).reset_command_context(context)
    }

    fn encode(&mut self, context: CommandContextId, commands: &CommandList) -> Result<()> {
        (**self).encode(context, commands)
    }

    fn submit(&mut self, context: CommandContextId, signal: FenceValue, present_image: Option<u32>) -> Result<()> {
        (**self).submit(context, signal, present_image)
    }

    fn completed_fence_value(&mut self) -> Result<FenceValue> {
        (**self).completed_fence_value()
    }

    fn wait_for_fence(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        (**self).wait_for_fence(value, timeout)
    }

    fn swapchain_image_count(&self) -> u32 {
        (**self).swapchain_image_count()
    }

    fn swapchain_image(&self, index: u32) -> Result<TextureHandle> {
        (**self).swapchain_image(index)
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        (**self).swapchain_extent()
    }

    fn acquire_next_image(&mut self, timeout: Option<Duration>) -> Result<u32> {
        (**self).acquire_next_image(timeout)
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        (**self).present(image_index)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize_swapchain(width, height)
    }

    fn wait_idle(&mut self) -> Result<()> {
        (**self).wait_idle()
    }
}
