//! 通用类型到 Vulkan 类型的转换

use std::time::Duration;

use ash::vk;
use gpu_allocator::{AllocationError, MemoryLocation};

use crate::core::error::GraphicsError;
use crate::renderer::resource::{BufferUsageType, MemoryType, ResourceState, TextureFormat};

/// 资源状态在屏障中的含义：布局、访问掩码和管线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateAccess {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl StateAccess {
    const fn new(layout: vk::ImageLayout, access: vk::AccessFlags, stage: vk::PipelineStageFlags) -> Self {
        Self { layout, access, stage }
    }
}

/// 资源状态映射
///
/// 缓冲区只使用访问掩码和阶段，布局对缓冲区没有意义。
pub(crate) fn state_access(state: ResourceState) -> StateAccess {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

    match state {
        ResourceState::Undefined => StateAccess::new(L::UNDEFINED, A::empty(), S::TOP_OF_PIPE),
        ResourceState::CopySource => StateAccess::new(L::TRANSFER_SRC_OPTIMAL, A::TRANSFER_READ, S::TRANSFER),
        ResourceState::CopyDest => StateAccess::new(L::TRANSFER_DST_OPTIMAL, A::TRANSFER_WRITE, S::TRANSFER),
        ResourceState::VertexBuffer => StateAccess::new(L::UNDEFINED, A::VERTEX_ATTRIBUTE_READ, S::VERTEX_INPUT),
        ResourceState::IndexBuffer => StateAccess::new(L::UNDEFINED, A::INDEX_READ, S::VERTEX_INPUT),
        ResourceState::ConstantBuffer => StateAccess::new(
            L::UNDEFINED,
            A::UNIFORM_READ,
            S::VERTEX_SHADER | S::FRAGMENT_SHADER,
        ),
        ResourceState::ShaderResource => StateAccess::new(
            L::SHADER_READ_ONLY_OPTIMAL,
            A::SHADER_READ,
            S::VERTEX_SHADER | S::FRAGMENT_SHADER,
        ),
        ResourceState::RenderTarget => StateAccess::new(
            L::COLOR_ATTACHMENT_OPTIMAL,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::DepthWrite => StateAccess::new(
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        ),
        // 作为屏障源时与获取信号量的等待阶段衔接
        ResourceState::Present => StateAccess::new(L::PRESENT_SRC_KHR, A::empty(), S::COLOR_ATTACHMENT_OUTPUT),
    }
}

/// 作为屏障目标时，呈现状态之后没有更多的 GPU 访问
pub(crate) fn dst_stage(state: ResourceState) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        other => state_access(other).stage,
    }
}

pub(crate) fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
    }
}

/// 图像用途：深度纹理作为深度附件，其余作为采样源；两者都可以被清除或复制写入
pub(crate) fn image_usage(format: TextureFormat) -> vk::ImageUsageFlags {
    use vk::ImageUsageFlags as U;

    if format.is_depth() {
        U::DEPTH_STENCIL_ATTACHMENT | U::TRANSFER_DST
    } else {
        U::TRANSFER_DST | U::TRANSFER_SRC | U::SAMPLED
    }
}

pub(crate) fn image_aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// 交换链格式对应的纹理格式，未知格式按 4 字节 BGRA 处理
pub(crate) fn swapchain_texture_format(format: vk::Format) -> TextureFormat {
    match format {
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8Srgb,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8Srgb,
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        _ => TextureFormat::Bgra8Unorm,
    }
}

pub(crate) fn buffer_usage(usage: BufferUsageType) -> vk::BufferUsageFlags {
    use vk::BufferUsageFlags as U;

    let copy = U::TRANSFER_SRC | U::TRANSFER_DST;
    match usage {
        BufferUsageType::Vertex => U::VERTEX_BUFFER | copy,
        BufferUsageType::Index => U::INDEX_BUFFER | copy,
        BufferUsageType::Constant => U::UNIFORM_BUFFER | copy,
        BufferUsageType::Upload => U::TRANSFER_SRC,
    }
}

/// 内存类型对应的分配位置
pub(crate) fn memory_location(memory_type: MemoryType) -> MemoryLocation {
    match memory_type {
        MemoryType::DeviceLocal => MemoryLocation::GpuOnly,
        MemoryType::HostVisible => MemoryLocation::CpuToGpu,
    }
}

/// `None` 表示无限等待
pub(crate) fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |timeout| timeout.as_nanos().min(u64::MAX as u128) as u64)
}

/// 运行期 API 失败时的错误分类
pub(crate) fn runtime_error(operation: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory { operation: operation.to_string() }
        }
        other => GraphicsError::device_lost(operation, other),
    }
}

/// 内存分配器错误的分类
pub(crate) fn allocation_error(operation: &str, error: AllocationError) -> GraphicsError {
    match error {
        AllocationError::OutOfMemory | AllocationError::NoCompatibleMemoryTypeFound => GraphicsError::OutOfMemory {
            operation: format!("{} ({})", operation, error),
        },
        other => GraphicsError::device_lost(operation, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_layouts() {
        assert_eq!(state_access(ResourceState::CopyDest).layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(state_access(ResourceState::Present).layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(dst_stage(ResourceState::Present), vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(dst_stage(ResourceState::CopySource), vk::PipelineStageFlags::TRANSFER);
        assert!(state_access(ResourceState::Undefined).access.is_empty());
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(2))), 2_000_000);
        assert_eq!(timeout_ns(Some(Duration::MAX)), u64::MAX);
    }

    #[test]
    fn test_runtime_error_classification() {
        assert!(matches!(
            runtime_error("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory { .. }
        ));
        assert!(matches!(
            runtime_error("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost { .. }
        ));
    }

    #[test]
    fn test_allocation_error_classification() {
        assert!(matches!(
            allocation_error("allocate", AllocationError::OutOfMemory),
            GraphicsError::OutOfMemory { .. }
        ));
        assert!(matches!(
            allocation_error("allocate", AllocationError::Internal("broken".to_string())),
            GraphicsError::DeviceLost { .. }
        ));
        assert_eq!(memory_location(MemoryType::HostVisible), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(MemoryType::DeviceLocal), MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_depth_images() {
        assert_eq!(texture_format(TextureFormat::D32Float), vk::Format::D32_SFLOAT);
        assert_eq!(image_aspect(TextureFormat::D32Float), vk::ImageAspectFlags::DEPTH);
        assert!(image_usage(TextureFormat::D32Float).contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!image_usage(TextureFormat::Rgba8Srgb).contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert_eq!(
            state_access(ResourceState::DepthWrite).layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_upload_buffers_are_copy_sources_only() {
        assert_eq!(buffer_usage(BufferUsageType::Upload), vk::BufferUsageFlags::TRANSFER_SRC);
        assert!(buffer_usage(BufferUsageType::Vertex).contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(swapchain_texture_format(vk::Format::B8G8R8A8_SRGB), TextureFormat::Bgra8Srgb);
    }
}
