//! GPU 资源上传
//!
//! 把 CPU 上的字节数据送入 GPU 本地的缓冲区或纹理（UploadToGPU）：
//!
//! 1. 校验数据：空数据或长度与目标不符直接返回 `InvalidArgument`，不分配任何资源
//! 2. 分配与数据等长的暂存缓冲区（CPU 可见），原样写入
//! 3. 录制：目标 `当前状态 → CopyDest`，复制（纹理每个 mip 等级一个区域），
//!    再 `CopyDest → 最终状态`。当前状态是同一目标上一次上传成功后的最终状态，
//!    首次上传为 `Undefined`
//! 4. 用下一个 fence 值提交，并同步等待完成
//! 5. 释放暂存缓冲区，失败路径同样释放
//!
//! 上传使用独立的命令上下文，与帧提交共享同一条 fence 时间线，彼此之间不会重叠。

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandContextId, GraphicsBackend};

use super::command::CommandList;
use super::context::RendererContext;
use super::resource::{
    BufferDescriptor, BufferHandle, ResourceRef, ResourceState, TextureDescriptor, TextureHandle,
};
use super::sync::FenceValue;

/// 上传统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub uploads: u64,
    pub bytes: u64,
}

/// 上传上下文
pub struct UploadContext {
    context: CommandContextId,
    stats: UploadStats,
    /// 上传过的目标最后所处的状态
    states: HashMap<ResourceRef, ResourceState>,
}

impl UploadContext {
    pub fn new<B: GraphicsBackend>(ctx: &mut RendererContext<B>) -> Result<Self> {
        let context = ctx.backend_mut().create_command_context()?;
        Ok(Self {
            context,
            stats: UploadStats::default(),
            states: HashMap::new(),
        })
    }

    /// 上传缓冲区数据
    ///
    /// `data` 的长度必须等于 `desc.size`。返回上传使用的 fence 值，函数返回时它已经完成。
    pub fn upload_buffer<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RendererContext<B>,
        target: BufferHandle,
        desc: &BufferDescriptor,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<FenceValue> {
        if data.is_empty() {
            return Err(GraphicsError::invalid("Upload data is empty").into());
        }
        if data.len() as u64 != desc.size {
            return Err(GraphicsError::invalid(format!(
                "Upload of {} bytes does not match buffer size {}",
                data.len(),
                desc.size
            ))
            .into());
        }

        let before = self.state_of(target);
        self.run(ctx, data, |commands, staging| {
            commands.transition(target, before, ResourceState::CopyDest)?;
            commands.copy_buffer(staging, 0, target, 0, data.len() as u64)?;
            commands.transition(target, ResourceState::CopyDest, final_state)
        })
        .map(|value| {
            self.states.insert(target.into(), final_state);
            value
        })
    }

    /// 上传纹理数据
    ///
    /// `data` 为按 mip 等级顺序紧密排列的像素，长度必须等于整条 mip 链的字节数。
    pub fn upload_texture<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RendererContext<B>,
        target: TextureHandle,
        desc: &TextureDescriptor,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<FenceValue> {
        if data.is_empty() {
            return Err(GraphicsError::invalid("Upload data is empty").into());
        }
        let chain = desc.mip_chain();
        if data.len() as u64 != chain.total_size() {
            return Err(GraphicsError::invalid(format!(
                "Upload of {} bytes does not match mip chain {}",
                data.len(),
                chain
            ))
            .into());
        }

        let before = self.state_of(target);
        self.run(ctx, data, |commands, staging| {
            commands.transition(target, before, ResourceState::CopyDest)?;
            for region in chain.regions() {
                commands.copy_buffer_to_texture(staging, region.offset, target, region.level, region.width, region.height)?;
            }
            commands.transition(target, ResourceState::CopyDest, final_state)
        })
        .map(|value| {
            self.states.insert(target.into(), final_state);
            value
        })
    }

    /// 上传上下文记录的目标状态，从未上传过的目标为 `Undefined`
    pub fn state_of(&self, resource: impl Into<ResourceRef>) -> ResourceState {
        self.states.get(&resource.into()).copied().unwrap_or(ResourceState::Undefined)
    }

    /// 目标被销毁或在别处转换了状态时，丢弃记录
    pub fn forget(&mut self, resource: impl Into<ResourceRef>) {
        self.states.remove(&resource.into());
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// 销毁上传命令上下文，调用前 GPU 必须空闲
    pub fn destroy<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>) {
        ctx.backend_mut().destroy_command_context(self.context);
        self.states.clear();
    }

    /// 分配暂存缓冲区，执行上传，无论成败都释放暂存缓冲区
    fn run<B, F>(&mut self, ctx: &mut RendererContext<B>, data: &[u8], record: F) -> Result<FenceValue>
    where
        B: GraphicsBackend,
        F: FnOnce(&mut CommandList, BufferHandle) -> Result<()>,
    {
        let staging = ctx.backend_mut().create_buffer(&BufferDescriptor::staging(data.len() as u64))?;
        let result = self.submit_and_wait(ctx, staging, data, record);
        ctx.backend_mut().destroy_buffer(staging);

        let value = result?;
        self.stats.uploads += 1;
        self.stats.bytes += data.len() as u64;
        debug!(bytes = data.len(), fence = value.value(), "Upload complete");
        Ok(value)
    }

    fn submit_and_wait<B, F>(
        &mut self,
        ctx: &mut RendererContext<B>,
        staging: BufferHandle,
        data: &[u8],
        record: F,
    ) -> Result<FenceValue>
    where
        B: GraphicsBackend,
        F: FnOnce(&mut CommandList, BufferHandle) -> Result<()>,
    {
        ctx.backend_mut().write_buffer(staging, 0, data)?;

        let mut commands = CommandList::new();
        commands.begin()?;
        record(&mut commands, staging)?;
        commands.end()?;

        ctx.backend_mut().reset_command_context(self.context)?;
        ctx.backend_mut().encode(self.context, &commands)?;
        let value = ctx.submit(self.context, None)?;
        trace!(fence = value.value(), commands = commands.len(), "Upload submitted");

        ctx.wait_for(value, None)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessBackend, HeadlessOptions};
    use crate::renderer::resource::{BufferUsageType, MipChain, TextureFormat};

    fn setup() -> (RendererContext<HeadlessBackend>, UploadContext) {
        let mut ctx = RendererContext::new(HeadlessBackend::new(HeadlessOptions::default()).unwrap());
        let uploads = UploadContext::new(&mut ctx).unwrap();
        (ctx, uploads)
    }

    fn vertex_buffer(ctx: &mut RendererContext<HeadlessBackend>, size: u64) -> (BufferHandle, BufferDescriptor) {
        let desc = BufferDescriptor::device_local(size, BufferUsageType::Vertex).with_name("Vertex Buffer");
        (ctx.backend_mut().create_buffer(&desc).unwrap(), desc)
    }

    #[test]
    fn test_buffer_upload() {
        let (mut ctx, mut uploads) = setup();
        let data: Vec<u8> = (0..64).collect();
        let (target, desc) = vertex_buffer(&mut ctx, 64);
        let buffers_before = ctx.backend().live_buffer_count();

        let value = uploads
            .upload_buffer(&mut ctx, target, &desc, &data, ResourceState::VertexBuffer)
            .unwrap();

        assert!(ctx.fences().is_completed(value));
        assert_eq!(ctx.backend().read_buffer(target).unwrap(), data);
        assert_eq!(ctx.backend().resource_state(target), Some(ResourceState::VertexBuffer));
        // 暂存缓冲区已经释放
        assert_eq!(ctx.backend().live_buffer_count(), buffers_before);
        assert!(ctx.backend().validation_errors().is_empty());
        assert_eq!(uploads.stats(), UploadStats { uploads: 1, bytes: 64 });
    }

    #[test]
    fn test_upload_is_idempotent() {
        let (mut ctx, mut uploads) = setup();
        let data = vec![0xAB; 32];
        let (first, desc) = vertex_buffer(&mut ctx, 32);
        let (second, _) = vertex_buffer(&mut ctx, 32);

        uploads.upload_buffer(&mut ctx, first, &desc, &data, ResourceState::IndexBuffer).unwrap();
        uploads.upload_buffer(&mut ctx, second, &desc, &data, ResourceState::IndexBuffer).unwrap();

        assert_eq!(ctx.backend().read_buffer(first), ctx.backend().read_buffer(second));
        assert_eq!(ctx.backend().read_buffer(first).unwrap(), data);
    }

    #[test]
    fn test_reupload_same_target() {
        let (mut ctx, mut uploads) = setup();
        let (target, desc) = vertex_buffer(&mut ctx, 8);

        uploads.upload_buffer(&mut ctx, target, &desc, &[3; 8], ResourceState::VertexBuffer).unwrap();
        assert_eq!(uploads.state_of(target), ResourceState::VertexBuffer);
        uploads.upload_buffer(&mut ctx, target, &desc, &[3; 8], ResourceState::VertexBuffer).unwrap();

        assert_eq!(ctx.backend().read_buffer(target).unwrap(), vec![3; 8]);
        assert_eq!(ctx.backend().resource_state(target), Some(ResourceState::VertexBuffer));
        assert!(ctx.backend().validation_errors().is_empty());
    }

    #[test]
    fn test_reupload_with_new_final_state() {
        let (mut ctx, mut uploads) = setup();
        let desc = TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba8Unorm);
        let target = ctx.backend_mut().create_texture(&desc).unwrap();

        uploads.upload_texture(&mut ctx, target, &desc, &[1; 16], ResourceState::ShaderResource).unwrap();
        uploads.upload_texture(&mut ctx, target, &desc, &[2; 16], ResourceState::CopySource).unwrap();

        assert_eq!(ctx.backend().read_texture(target).unwrap(), vec![2; 16]);
        assert_eq!(ctx.backend().resource_state(target), Some(ResourceState::CopySource));
        assert_eq!(uploads.state_of(target), ResourceState::CopySource);
        assert!(ctx.backend().validation_errors().is_empty());

        uploads.forget(target);
        assert_eq!(uploads.state_of(target), ResourceState::Undefined);
    }

    #[test]
    fn test_empty_upload_records_nothing() {
        let (mut ctx, mut uploads) = setup();
        let (target, desc) = vertex_buffer(&mut ctx, 16);
        let buffers_before = ctx.backend().live_buffer_count();

        let err = uploads
            .upload_buffer(&mut ctx, target, &desc, &[], ResourceState::VertexBuffer)
            .unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::InvalidArgument(_))));

        let texture_desc = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm);
        let texture = ctx.backend_mut().create_texture(&texture_desc).unwrap();
        assert!(uploads
            .upload_texture(&mut ctx, texture, &texture_desc, &[], ResourceState::ShaderResource)
            .is_err());

        ctx.backend_mut().wait_idle().unwrap();
        assert_eq!(ctx.backend().executed_submissions(), 0);
        assert_eq!(ctx.fences().current_value(), FenceValue::ZERO);
        assert_eq!(ctx.backend().live_buffer_count(), buffers_before);
        assert_eq!(ctx.backend().resource_state(target), Some(ResourceState::Undefined));
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let (mut ctx, mut uploads) = setup();
        let (target, desc) = vertex_buffer(&mut ctx, 16);
        assert!(uploads
            .upload_buffer(&mut ctx, target, &desc, &[1; 15], ResourceState::VertexBuffer)
            .is_err());

        let texture_desc = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm).with_full_mip_chain();
        let texture = ctx.backend_mut().create_texture(&texture_desc).unwrap();
        // 只有第 0 级的数据
        assert!(uploads
            .upload_texture(&mut ctx, texture, &texture_desc, &[0; 64], ResourceState::ShaderResource)
            .is_err());
        assert_eq!(ctx.fences().current_value(), FenceValue::ZERO);
    }

    #[test]
    fn test_texture_upload_with_mips() {
        let (mut ctx, mut uploads) = setup();
        let desc = TextureDescriptor::new_2d(8, 4, TextureFormat::Rgba8Unorm)
            .with_full_mip_chain()
            .with_name("Checker");
        let chain = MipChain::full(8, 4, 4);
        assert_eq!(desc.mip_levels, 4);

        let data: Vec<u8> = (0..chain.total_size()).map(|i| (i % 251) as u8).collect();
        let texture = ctx.backend_mut().create_texture(&desc).unwrap();
        uploads
            .upload_texture(&mut ctx, texture, &desc, &data, ResourceState::ShaderResource)
            .unwrap();

        assert_eq!(ctx.backend().read_texture(texture).unwrap(), data);
        assert_eq!(ctx.backend().resource_state(texture), Some(ResourceState::ShaderResource));
        assert!(ctx.backend().validation_errors().is_empty());
    }

    #[test]
    fn test_staging_released_when_submit_fails() {
        let (mut ctx, mut uploads) = setup();
        let (target, desc) = vertex_buffer(&mut ctx, 8);
        let buffers_before = ctx.backend().live_buffer_count();

        ctx.backend_mut().fail_next_submit();
        let err = uploads
            .upload_buffer(&mut ctx, target, &desc, &[7; 8], ResourceState::VertexBuffer)
            .unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::DeviceLost { .. })));
        assert_eq!(ctx.backend().live_buffer_count(), buffers_before);

        // 失败的上传不占用 fence 值，上传上下文仍然可用
        let value = uploads
            .upload_buffer(&mut ctx, target, &desc, &[7; 8], ResourceState::VertexBuffer)
            .unwrap();
        assert_eq!(value, FenceValue::new(1));
    }

    #[test]
    fn test_staging_allocation_failure() {
        let (mut ctx, mut uploads) = setup();
        let (target, desc) = vertex_buffer(&mut ctx, 8);

        ctx.backend_mut().fail_next_allocation();
        let err = uploads
            .upload_buffer(&mut ctx, target, &desc, &[1; 8], ResourceState::VertexBuffer)
            .unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::OutOfMemory { .. })));
        assert_eq!(uploads.stats().uploads, 0);
    }

    #[test]
    fn test_uploads_share_timeline_with_frames() {
        use crate::renderer::frame::FrameOrchestrator;

        let (mut ctx, mut uploads) = setup();
        let mut frames = FrameOrchestrator::new(&mut ctx, 2).unwrap();

        let handle = frames.begin_frame(&mut ctx, None).unwrap();
        frames
            .record_commands(&mut ctx, &handle, |commands| {
                commands.transition(handle.target(), ResourceState::Present, ResourceState::RenderTarget)?;
                commands.transition(handle.target(), ResourceState::RenderTarget, ResourceState::Present)
            })
            .unwrap();
        assert_eq!(frames.submit(&mut ctx, &handle).unwrap(), FenceValue::new(1));
        frames.present(&mut ctx, &handle).unwrap();

        let (target, desc) = vertex_buffer(&mut ctx, 4);
        let value = uploads
            .upload_buffer(&mut ctx, target, &desc, &[1, 2, 3, 4], ResourceState::VertexBuffer)
            .unwrap();
        assert_eq!(value, FenceValue::new(2));
        frames.wait_idle(&mut ctx).unwrap();
    }
}
