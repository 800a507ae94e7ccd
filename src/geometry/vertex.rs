/// 顶点定义模块
///
/// 演示网格使用的交错顶点格式，按字节原样上传到 GPU 顶点缓冲区。

use bytemuck::{Pod, Zeroable};

/// 交错顶点
///
/// 内存布局与 GPU 兼容，使用 `#[repr(C)]` 保证顺序和对齐。
///
/// # 内存布局
///
/// - position: 12 bytes (3 * f32)
/// - normal: 12 bytes (3 * f32)
/// - texcoord: 8 bytes (2 * f32)
/// - tangent: 12 bytes (3 * f32)
/// - **总计**: 44 bytes
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// 顶点位置 (x, y, z)
    pub position: [f32; 3],

    /// 单位法线
    pub normal: [f32; 3],

    /// 纹理坐标，范围 [0.0, 1.0]
    pub texcoord: [f32; 2],

    /// 沿 u 方向的单位切线，与法线正交
    pub tangent: [f32; 3],
}

impl Vertex {
    #[inline]
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2], tangent: [f32; 3]) -> Self {
        Self {
            position,
            normal,
            texcoord,
            tangent,
        }
    }

    /// 顶点步长（字节）
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_vertex_layout() {
        // 3*4 + 3*4 + 2*4 + 3*4 = 44 bytes
        assert_eq!(size_of::<Vertex>(), 44);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
        assert_eq!(Vertex::STRIDE, 44);
    }

    #[test]
    fn test_vertex_bytes_are_field_order() {
        let vertex = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.25], [1.0, 0.0, 0.0]);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&vertex));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.0, 1.0, 0.0, 0.5, 0.25, 1.0, 0.0, 0.0]);
    }
}
