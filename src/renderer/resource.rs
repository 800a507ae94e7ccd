//! 资源管理模块
//!
//! 提供与图形 API 无关的资源描述：缓冲区、纹理、资源状态以及 Mip 链计算。
//! 后端根据这些描述创建原生资源，并以不透明句柄的形式交还给上层。

use std::fmt;

/// 缓冲区句柄
///
/// 由后端分配的不透明标识，只在创建它的后端内有效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// 纹理句柄
///
/// 交换链图像同样以纹理句柄的形式暴露。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl BufferHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl TextureHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 资源引用（用于状态转换）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

impl From<BufferHandle> for ResourceRef {
    fn from(handle: BufferHandle) -> Self {
        ResourceRef::Buffer(handle)
    }
}

impl From<TextureHandle> for ResourceRef {
    fn from(handle: TextureHandle) -> Self {
        ResourceRef::Texture(handle)
    }
}

/// 资源状态
///
/// 新创建的资源处于 `Undefined`，之后的每次使用都通过显式转换进入对应状态。
/// Vulkan 后端映射为 image layout / access mask，DX12 后端映射为 `D3D12_RESOURCE_STATES`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// 初始状态，内容未定义
    Undefined,
    /// 复制源
    CopySource,
    /// 复制目标
    CopyDest,
    /// 顶点缓冲区
    VertexBuffer,
    /// 索引缓冲区
    IndexBuffer,
    /// 常量缓冲区
    ConstantBuffer,
    /// 着色器读取
    ShaderResource,
    /// 渲染目标
    RenderTarget,
    /// 深度写入
    DepthWrite,
    /// 呈现
    Present,
}

impl ResourceState {
    /// 该状态是否只适用于纹理
    pub fn is_texture_only(&self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::DepthWrite
                | ResourceState::Present
                | ResourceState::ShaderResource
        )
    }

    /// 该状态是否只适用于缓冲区
    pub fn is_buffer_only(&self) -> bool {
        matches!(
            self,
            ResourceState::VertexBuffer | ResourceState::IndexBuffer | ResourceState::ConstantBuffer
        )
    }
}

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsageType {
    /// 顶点缓冲区
    Vertex,
    /// 索引缓冲区
    Index,
    /// 常量缓冲区（Uniform Buffer）
    Constant,
    /// 上传缓冲区（CPU -> GPU）
    Upload,
}

/// 缓冲区内存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// GPU本地内存（最快，仅GPU可访问）
    DeviceLocal,
    /// CPU可见且一致的内存（暂存缓冲区使用）
    HostVisible,
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 使用类型
    pub usage: BufferUsageType,
    /// 内存类型
    pub memory_type: MemoryType,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDescriptor {
    /// 创建新的缓冲区描述符
    pub fn new(size: u64, usage: BufferUsageType, memory_type: MemoryType) -> Self {
        Self {
            size,
            usage,
            memory_type,
            name: None,
        }
    }

    /// GPU 本地的目标缓冲区
    pub fn device_local(size: u64, usage: BufferUsageType) -> Self {
        Self::new(size, usage, MemoryType::DeviceLocal)
    }

    /// CPU 可写的暂存缓冲区
    pub fn staging(size: u64) -> Self {
        Self::new(size, BufferUsageType::Upload, MemoryType::HostVisible).with_name("Staging Buffer")
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 计算对齐后的大小（DirectX 12 常量缓冲区要求256字节对齐）
    pub fn aligned_size(&self) -> u64 {
        if self.usage == BufferUsageType::Constant {
            (self.size + 255) & !255
        } else {
            self.size
        }
    }
}

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// RGBA 8位无符号整数
    Rgba8Unorm,
    /// RGBA 8位sRGB
    Rgba8Srgb,
    /// BGRA 8位无符号整数
    Bgra8Unorm,
    /// BGRA 8位sRGB（交换链首选格式）
    Bgra8Srgb,
    /// R 8位无符号整数
    R8Unorm,
    /// RGBA 32位浮点
    Rgba32Float,
    /// 32位浮点深度
    D32Float,
}

impl TextureFormat {
    /// 每个像素的字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8Srgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8Srgb
            | TextureFormat::D32Float => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D32Float)
    }
}

/// 纹理描述信息（二维纹理）
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// Mip等级数量
    pub mip_levels: u32,
    /// 纹理格式
    pub format: TextureFormat,
    /// 调试名称
    pub name: Option<String>,
}

impl TextureDescriptor {
    /// 单个 mip 等级的二维纹理
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
            name: None,
        }
    }

    /// 使用完整的 mip 链
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = MipChain::level_count(self.width, self.height);
        self
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 该纹理的 mip 链布局
    pub fn mip_chain(&self) -> MipChain {
        MipChain::new(self.width, self.height, self.mip_levels, self.format.bytes_per_pixel())
    }
}

/// 单个 mip 等级在紧密排列的像素数据中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipRegion {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    /// 在整条 mip 链数据中的字节偏移
    pub offset: u64,
    /// 该等级的字节数
    pub size: u64,
}

/// Mip 链布局
///
/// 等级 i 的尺寸为 `max(1, w >> i) × max(1, h >> i)`（向下取整，与 Vulkan 和 D3D12 一致），
/// 各等级紧密排列，偏移量为之前所有等级字节数之和。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipChain {
    width: u32,
    height: u32,
    levels: u32,
    bytes_per_pixel: u32,
}

impl MipChain {
    pub fn new(width: u32, height: u32, levels: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            levels,
            bytes_per_pixel,
        }
    }

    /// 完整 mip 链
    pub fn full(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self::new(width, height, Self::level_count(width, height), bytes_per_pixel)
    }

    /// 完整 mip 链的等级数：floor(log2(max(w, h))) + 1
    pub fn level_count(width: u32, height: u32) -> u32 {
        let largest = width.max(height).max(1);
        u32::BITS - largest.leading_zeros()
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// 等级尺寸
    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        let w = self.width.checked_shr(level).unwrap_or(0).max(1);
        let h = self.height.checked_shr(level).unwrap_or(0).max(1);
        (w, h)
    }

    /// 等级字节数
    pub fn level_size(&self, level: u32) -> u64 {
        let (w, h) = self.level_extent(level);
        w as u64 * h as u64 * self.bytes_per_pixel as u64
    }

    /// 整条 mip 链的字节数
    pub fn total_size(&self) -> u64 {
        (0..self.levels).map(|level| self.level_size(level)).sum()
    }

    /// 按等级顺序列出每个等级的区域
    pub fn regions(&self) -> Vec<MipRegion> {
        let mut offset = 0;
        (0..self.levels)
            .map(|level| {
                let (width, height) = self.level_extent(level);
                let size = self.level_size(level);
                let region = MipRegion {
                    level,
                    width,
                    height,
                    offset,
                    size,
                };
                offset += size;
                region
            })
            .collect()
    }
}

impl fmt::Display for MipChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} levels, {} bytes)",
            self.width,
            self.height,
            self.levels,
            self.total_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor_alignment() {
        let desc = BufferDescriptor::new(100, BufferUsageType::Constant, MemoryType::HostVisible);
        assert_eq!(desc.aligned_size(), 256); // 对齐到256字节

        let desc2 = BufferDescriptor::new(300, BufferUsageType::Constant, MemoryType::DeviceLocal);
        assert_eq!(desc2.aligned_size(), 512);

        let desc3 = BufferDescriptor::device_local(100, BufferUsageType::Vertex);
        assert_eq!(desc3.aligned_size(), 100); // 顶点缓冲区不需要对齐

        let staging = BufferDescriptor::staging(64);
        assert_eq!(staging.memory_type, MemoryType::HostVisible);
        assert_eq!(staging.usage, BufferUsageType::Upload);
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(MipChain::level_count(1, 1), 1);
        assert_eq!(MipChain::level_count(2, 1), 2);
        assert_eq!(MipChain::level_count(256, 256), 9);
        assert_eq!(MipChain::level_count(300, 20), 9);
        assert_eq!(MipChain::level_count(1024, 512), 11);
    }

    #[test]
    fn test_mip_chain_total_size() {
        // 256x256 RGBA8: 4 * (256^2 + 128^2 + ... + 1)
        let chain = MipChain::full(256, 256, 4);
        let expected: u64 = (0..9)
            .map(|i| {
                let d = (256u64 >> i).max(1);
                d * d * 4
            })
            .sum();
        assert_eq!(chain.total_size(), expected);
        assert_eq!(chain.total_size(), 349_524);
    }

    #[test]
    fn test_mip_chain_non_square_clamps_to_one() {
        let chain = MipChain::full(8, 2, 1);
        assert_eq!(chain.levels(), 4);
        assert_eq!(chain.level_extent(0), (8, 2));
        assert_eq!(chain.level_extent(1), (4, 1));
        assert_eq!(chain.level_extent(2), (2, 1));
        assert_eq!(chain.level_extent(3), (1, 1));
        assert_eq!(chain.total_size(), 16 + 4 + 2 + 1);
    }

    #[test]
    fn test_mip_chain_odd_extent_rounds_down() {
        // 5x3 -> 2x1 -> 1x1，每级按 floor 减半
        let chain = MipChain::full(5, 3, 4);
        assert_eq!(chain.levels(), 3);
        assert_eq!(chain.level_extent(1), (2, 1));
        assert_eq!(chain.level_extent(2), (1, 1));
        assert_eq!(chain.total_size(), 4 * (15 + 2 + 1));

        let chain = MipChain::full(7, 7, 1);
        assert_eq!(chain.level_extent(1), (3, 3));
        assert_eq!(chain.level_extent(2), (1, 1));
        assert_eq!(chain.total_size(), 49 + 9 + 1);
    }

    #[test]
    fn test_mip_regions_are_packed() {
        let chain = MipChain::full(4, 4, 4);
        let regions = chain.regions();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].offset, 0);
        assert_eq!(regions[1].offset, 64);
        assert_eq!(regions[2].offset, 64 + 16);
        assert_eq!(regions[2].size, 4);
        assert_eq!(regions.iter().map(|r| r.size).sum::<u64>(), chain.total_size());
    }

    #[test]
    fn test_texture_descriptor_full_mip_chain() {
        let desc = TextureDescriptor::new_2d(64, 32, TextureFormat::Rgba8Unorm).with_full_mip_chain();
        assert_eq!(desc.mip_levels, 7);
        assert_eq!(desc.mip_chain().total_size(), MipChain::full(64, 32, 4).total_size());
    }

    #[test]
    fn test_state_kinds() {
        assert!(ResourceState::Present.is_texture_only());
        assert!(ResourceState::VertexBuffer.is_buffer_only());
        assert!(ResourceState::DepthWrite.is_texture_only());
        assert!(TextureFormat::D32Float.is_depth());
        assert_eq!(TextureFormat::D32Float.bytes_per_pixel(), 4);
        assert!(!ResourceState::CopyDest.is_texture_only());
        assert!(!ResourceState::CopyDest.is_buffer_only());
    }
}
