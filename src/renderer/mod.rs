//! 渲染器模块
//!
//! 本模块提供与具体图形 API 无关的帧编排和资源上传。
//! 应用程序通过 `Renderer` 与底层图形 API（Vulkan、DirectX 12、无窗口后端）交互，
//! 而不需要关心具体使用的是哪个图形 API。
//!
//! # 架构设计
//!
//! - `RendererContext`：持有后端和 fence 时间线，显式传给每个操作
//! - `FrameOrchestrator`：获取图像 → 录制 → 提交 → 呈现 的帧循环
//! - `UploadContext`：经由暂存缓冲区把数据上传到 GPU 本地资源
//! - `DepthBuffer`：与交换链同尺寸的深度纹理，每帧清除，随交换链重建
//! - `Renderer`：把三者组合在一起，并负责按顺序释放所有 GPU 对象

pub mod command;
pub mod context;
pub mod depth;
pub mod frame;
pub mod resource;
pub mod swapchain;
pub mod sync;
pub mod upload;

use std::time::Duration;

use tracing::{debug, error, info};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::gfx::backend::GraphicsBackend;

use self::command::DepthAttachment;
use self::context::RendererContext;
use self::depth::DepthBuffer;
use self::frame::{FrameHandle, FrameOrchestrator, FrameStats};
use self::resource::{BufferDescriptor, BufferHandle, ResourceState, TextureDescriptor, TextureHandle};
use self::sync::FenceValue;
use self::upload::UploadContext;

/// 渲染器
///
/// 析构时先等待 GPU 空闲，再销毁命令上下文和上传过的资源，最后释放后端。
pub struct Renderer<B: GraphicsBackend> {
    context: RendererContext<B>,
    frames: FrameOrchestrator,
    uploads: UploadContext,
    depth: Option<DepthBuffer>,
    buffers: Vec<BufferHandle>,
    textures: Vec<TextureHandle>,
    clear_color: [f32; 4],
    acquire_timeout: Option<Duration>,
    shut_down: bool,
}

impl<B: GraphicsBackend> Renderer<B> {
    pub fn new(backend: B, config: &Config) -> Result<Self> {
        let mut context = RendererContext::new(backend);
        let frames = FrameOrchestrator::new(&mut context, config.graphics.buffering_count as usize)?;
        let mut frames = frames;
        let mut uploads = match UploadContext::new(&mut context) {
            Ok(uploads) => uploads,
            Err(err) => {
                frames.destroy(&mut context);
                return Err(err);
            }
        };
        let (width, height) = context.backend().swapchain_extent();
        let depth = match DepthBuffer::new(&mut context, width, height) {
            Ok(depth) => depth,
            Err(err) => {
                uploads.destroy(&mut context);
                frames.destroy(&mut context);
                return Err(err);
            }
        };

        info!(
            backend = context.backend().name(),
            slots = frames.slot_count(),
            images = context.backend().swapchain_image_count(),
            width,
            height,
            "Renderer initialized"
        );

        Ok(Self {
            context,
            frames,
            uploads,
            depth: Some(depth),
            buffers: Vec::new(),
            textures: Vec::new(),
            clear_color: config.graphics.clear_color,
            acquire_timeout: config.acquire_timeout(),
            shut_down: false,
        })
    }

    pub fn context(&self) -> &RendererContext<B> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RendererContext<B> {
        &mut self.context
    }

    pub fn backend(&self) -> &B {
        self.context.backend()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frames.stats()
    }

    /// 场景深度纹理，关闭之后为 `None`
    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth.as_ref().map(DepthBuffer::texture)
    }

    /// 创建 GPU 本地缓冲区并上传数据
    ///
    /// 缓冲区由渲染器持有，渲染器析构时释放。
    pub fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<BufferHandle> {
        let buffer = self.context.backend_mut().create_buffer(desc)?;
        if let Err(err) = self.uploads.upload_buffer(&mut self.context, buffer, desc, data, final_state) {
            self.context.backend_mut().destroy_buffer(buffer);
            return Err(err);
        }
        self.buffers.push(buffer);
        Ok(buffer)
    }

    /// 创建纹理并上传整条 mip 链
    pub fn create_texture_init(
        &mut self,
        desc: &TextureDescriptor,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<TextureHandle> {
        let texture = self.context.backend_mut().create_texture(desc)?;
        if let Err(err) = self.uploads.upload_texture(&mut self.context, texture, desc, data, final_state) {
            self.context.backend_mut().destroy_texture(texture);
            return Err(err);
        }
        self.textures.push(texture);
        Ok(texture)
    }

    /// 渲染一帧：清除获取到的交换链图像和深度缓冲并呈现
    pub fn render_frame(&mut self) -> Result<FenceValue> {
        let handle = self.frames.begin_frame(&mut self.context, self.acquire_timeout)?;
        let clear_color = self.clear_color;
        let depth = self.depth.as_ref();
        self.frames.record_commands(&mut self.context, &handle, |commands| {
            let attachment = depth.map(|depth| depth.prepare(commands)).transpose()?;
            record_clear(commands, &handle, clear_color, attachment)
        })?;
        let value = self.frames.submit(&mut self.context, &handle)?;
        if let Some(depth) = self.depth.as_mut() {
            depth.mark_submitted();
        }
        self.frames.present(&mut self.context, &handle)?;
        Ok(value)
    }

    /// 按新尺寸重建交换链（窗口尺寸变化或表面失效之后）
    pub fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.frames.wait_idle(&mut self.context)?;
        self.context.backend_mut().resize_swapchain(width, height)?;
        let image_count = self.context.backend().swapchain_image_count();
        self.frames.on_swapchain_rebuilt(image_count);
        // 表面可能不接受请求的尺寸，深度缓冲跟随实际范围
        let (actual_width, actual_height) = self.context.backend().swapchain_extent();
        if let Some(depth) = self.depth.as_mut() {
            depth.resize(&mut self.context, actual_width, actual_height)?;
        }
        debug!(
            width = actual_width,
            height = actual_height,
            requested_width = width,
            requested_height = height,
            images = image_count,
            "Swapchain rebuilt"
        );
        Ok(())
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn wait_idle(&mut self) -> Result<()> {
        self.frames.wait_idle(&mut self.context)
    }

    /// 等待 GPU 空闲后销毁命令上下文和上传过的资源
    ///
    /// 之后渲染器不能再渲染，后端在渲染器析构时释放。重复调用没有效果。
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Err(e) = self.frames.wait_idle(&mut self.context) {
            error!("Failed to wait for GPU during shutdown: {}", e);
        }

        self.frames.destroy(&mut self.context);
        self.uploads.destroy(&mut self.context);
        if let Some(depth) = self.depth.take() {
            depth.destroy(&mut self.context);
        }
        for buffer in self.buffers.drain(..) {
            self.context.backend_mut().destroy_buffer(buffer);
        }
        for texture in self.textures.drain(..) {
            self.context.backend_mut().destroy_texture(texture);
        }

        let stats = self.frames.stats();
        info!(
            frames = stats.frames_presented,
            blocking_waits = stats.blocking_waits,
            uploads = self.uploads.stats().uploads,
            "Renderer shut down"
        );
    }
}

/// 清屏命令：Present → RenderTarget，清除颜色与深度，RenderTarget → Present
fn record_clear(
    commands: &mut command::CommandList,
    handle: &FrameHandle,
    color: [f32; 4],
    depth: Option<DepthAttachment>,
) -> Result<()> {
    let target = handle.target();
    commands.transition(target, ResourceState::Present, ResourceState::RenderTarget)?;
    match depth {
        Some(depth) => commands.begin_render_pass_with_depth(target, Some(color), depth)?,
        None => commands.begin_render_pass(target, Some(color))?,
    }
    commands.end_render_pass()?;
    commands.transition(target, ResourceState::RenderTarget, ResourceState::Present)
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
