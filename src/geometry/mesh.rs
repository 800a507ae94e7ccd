/// 网格数据结构模块
///
/// CPU 侧的网格数据容器，渲染器把它的顶点和索引字节上传到 GPU 缓冲区。

use super::vertex::Vertex;
use crate::core::error::{GraphicsError, Result};

/// CPU侧网格数据
///
/// 简单的数据持有者，不包含GPU资源。
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// 顶点数组
    pub vertices: Vec<Vertex>,

    /// 三角形顶点索引，每3个索引定义一个三角形
    pub indices: Vec<u32>,

    /// 网格名称，用作 GPU 缓冲区的调试名称
    pub name: Option<String>,
}

impl MeshData {
    /// 创建一个带容量预分配的网格数据
    pub fn with_capacity(name: impl Into<String>, vertex_capacity: usize, index_capacity: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_capacity),
            indices: Vec::with_capacity(index_capacity),
            name: Some(name.into()),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 顶点缓冲区的字节内容
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// 索引缓冲区的字节内容
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// 验证网格数据的有效性
    ///
    /// 索引数量必须是3的倍数，且所有索引都在顶点范围内。
    pub fn validate(&self) -> Result<()> {
        if self.indices.len() % 3 != 0 {
            return Err(GraphicsError::invalid(format!(
                "Index count must be a multiple of 3, got {}",
                self.indices.len()
            ))
            .into());
        }

        let vertex_count = self.vertices.len() as u32;
        if let Some((i, &index)) = self.indices.iter().enumerate().find(|&(_, &index)| index >= vertex_count) {
            return Err(GraphicsError::invalid(format!(
                "Index {} at position {} exceeds vertex count {}",
                index, i, vertex_count
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        let mut mesh = MeshData::with_capacity("Triangle", 3, 3);
        mesh.vertices = vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0], [1.0, 0.0, 0.0]),
        ];
        mesh.indices = vec![0, 1, 2];
        mesh
    }

    #[test]
    fn test_byte_views() {
        let mesh = triangle();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_bytes().len(), 3 * 44);
        assert_eq!(mesh.index_bytes().len(), 12);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_indices() {
        let mut mesh = triangle();
        mesh.indices = vec![0, 1];
        assert!(mesh.validate().is_err());

        mesh.indices = vec![0, 1, 3];
        assert!(mesh.validate().is_err());
    }
}
