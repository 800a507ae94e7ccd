//! 通用类型到 DirectX 12 类型的转换

use windows::Win32::Foundation::E_OUTOFMEMORY;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET};

use crate::core::error::GraphicsError;
use crate::renderer::resource::{ResourceState, TextureFormat};

/// 纹理复制时源数据的行距对齐（D3D12_TEXTURE_DATA_PITCH_ALIGNMENT）
pub(crate) const ROW_PITCH_ALIGNMENT: u64 = D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as u64;

/// 纹理复制时源数据的起始偏移对齐（D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT）
pub(crate) const PLACEMENT_ALIGNMENT: u64 = D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT as u64;

/// 资源状态映射
///
/// `Undefined` 对应 `COMMON`，默认堆资源都在 `COMMON` 状态下创建。
pub(crate) fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Undefined => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::VertexBuffer | ResourceState::ConstantBuffer => {
            D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER
        }
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::ShaderResource => {
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
        }
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub(crate) fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        TextureFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        TextureFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// 紧密排列的一行数据复制到纹理时需要的行距
pub(crate) fn copy_row_pitch(width: u32, bytes_per_pixel: u32) -> u64 {
    align_up(u64::from(width) * u64::from(bytes_per_pixel), ROW_PITCH_ALIGNMENT)
}

/// 运行期 API 失败时的错误分类
pub(crate) fn runtime_error(operation: &str, error: &windows::core::Error) -> GraphicsError {
    if error.code() == E_OUTOFMEMORY {
        GraphicsError::OutOfMemory {
            operation: operation.to_string(),
        }
    } else {
        GraphicsError::device_lost(operation, error.code())
    }
}

/// 呈现失败的分类：设备级错误不可恢复，其余按表面失效处理
pub(crate) fn present_error(error: &windows::core::Error) -> GraphicsError {
    let code = error.code();
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
        GraphicsError::device_lost("IDXGISwapChain::Present", code)
    } else {
        GraphicsError::PresentLost
    }
}
