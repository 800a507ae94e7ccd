/// 演示内容模块
///
/// 程序化生成的几何体和纹理，经由上传暂存路径送到 GPU。
///
/// # 模块结构
///
/// - `vertex`: 交错顶点格式
/// - `mesh`: CPU 侧网格数据
/// - `sphere`: UV 球体生成
/// - `texture`: 带完整 mip 链的棋盘格纹理

pub mod mesh;
pub mod sphere;
pub mod texture;
pub mod vertex;

// 重新导出常用类型
pub use mesh::MeshData;
pub use sphere::uv_sphere;
pub use texture::{checkerboard, TextureData};
pub use vertex::Vertex;
