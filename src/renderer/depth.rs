//! 场景深度缓冲
//!
//! 与交换链同尺寸的 `D32Float` 纹理。每帧在渲染通道开始时清为 1.0，
//! 交换链重建时按新尺寸销毁并重新创建。
//!
//! 新建的深度纹理处于 `Undefined`，第一帧录制 `Undefined → DepthWrite`，
//! 之后一直停留在 `DepthWrite`。

use tracing::debug;

use crate::core::error::Result;
use crate::gfx::backend::GraphicsBackend;

use super::command::{CommandList, DepthAttachment};
use super::context::RendererContext;
use super::resource::{ResourceState, TextureDescriptor, TextureFormat, TextureHandle};

/// 深度清除值（最远）
pub const DEPTH_CLEAR_VALUE: f32 = 1.0;

pub struct DepthBuffer {
    texture: TextureHandle,
    extent: (u32, u32),
    /// 已有提交成功的帧把纹理转换到 `DepthWrite`
    initialized: bool,
}

impl DepthBuffer {
    pub fn new<B: GraphicsBackend>(ctx: &mut RendererContext<B>, width: u32, height: u32) -> Result<Self> {
        let desc = TextureDescriptor::new_2d(width, height, TextureFormat::D32Float).with_name("Scene Depth");
        let texture = ctx.backend_mut().create_texture(&desc)?;
        debug!(?texture, width, height, "Depth buffer created");
        Ok(Self {
            texture,
            extent: (width, height),
            initialized: false,
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// 录制进入 `DepthWrite` 的转换（仅第一帧需要），返回渲染通道使用的深度附件
    pub fn prepare(&self, commands: &mut CommandList) -> Result<DepthAttachment> {
        if !self.initialized {
            commands.transition(self.texture, ResourceState::Undefined, ResourceState::DepthWrite)?;
        }
        Ok(DepthAttachment {
            texture: self.texture,
            clear_depth: Some(DEPTH_CLEAR_VALUE),
        })
    }

    /// 录制了 `prepare` 的帧提交成功之后调用
    pub fn mark_submitted(&mut self) {
        self.initialized = true;
    }

    /// 按新尺寸重建，调用者保证 GPU 已经空闲
    pub fn resize<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>, width: u32, height: u32) -> Result<()> {
        if self.extent == (width, height) {
            return Ok(());
        }
        let replacement = Self::new(ctx, width, height)?;
        let old = std::mem::replace(self, replacement);
        old.destroy(ctx);
        Ok(())
    }

    pub fn destroy<B: GraphicsBackend>(self, ctx: &mut RendererContext<B>) {
        ctx.backend_mut().destroy_texture(self.texture);
    }
}
