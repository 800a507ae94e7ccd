//! 程序化 UV 球体
//!
//! 顶点按纬度环排列：`stacks + 1` 个环，每环 `slices + 1` 个顶点，
//! 接缝处的首尾两个顶点位置相同而纹理坐标不同。

use std::f32::consts::{PI, TAU};

use super::mesh::MeshData;
use super::vertex::Vertex;

/// 生成以原点为中心的 UV 球体
///
/// `slices` 为经线分段数（至少 3），`stacks` 为纬线分段数（至少 2），不足时按下限处理。
pub fn uv_sphere(radius: f32, slices: u32, stacks: u32) -> MeshData {
    let slices = slices.max(3);
    let stacks = stacks.max(2);

    let ring = slices + 1;
    let mut mesh = MeshData::with_capacity(
        "UV Sphere",
        (ring * (stacks + 1)) as usize,
        (slices * stacks * 6) as usize,
    );

    for stack in 0..=stacks {
        let v = stack as f32 / stacks as f32;
        let theta = v * PI;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for slice in 0..=slices {
            let u = slice as f32 / slices as f32;
            let phi = u * TAU;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let normal = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];
            let position = [normal[0] * radius, normal[1] * radius, normal[2] * radius];
            // d(position)/d(phi) 的方向，两极处同样有定义
            let tangent = [-sin_phi, 0.0, cos_phi];
            mesh.vertices.push(Vertex::new(position, normal, [u, v], tangent));
        }
    }

    for stack in 0..stacks {
        for slice in 0..slices {
            let top = stack * ring + slice;
            let bottom = top + ring;
            // 两极的退化三角形省略
            if stack != 0 {
                mesh.indices.extend_from_slice(&[top, bottom, top + 1]);
            }
            if stack != stacks - 1 {
                mesh.indices.extend_from_slice(&[top + 1, bottom, bottom + 1]);
            }
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length(v: [f32; 3]) -> f32 {
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    #[test]
    fn test_sphere_counts() {
        let mesh = uv_sphere(1.0, 16, 8);
        assert_eq!(mesh.vertex_count(), 17 * 9);
        // 中间的纬线带每格两个三角形，两极各一个
        assert_eq!(mesh.triangle_count(), 16 * 8 * 2 - 2 * 16);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_vertices_lie_on_the_sphere() {
        let radius = 2.5;
        let mesh = uv_sphere(radius, 12, 6);
        for vertex in &mesh.vertices {
            assert!((length(vertex.position) - radius).abs() < 1e-4);
            assert!((length(vertex.normal) - 1.0).abs() < 1e-4);
            assert!((length(vertex.tangent) - 1.0).abs() < 1e-4);
            assert!((0.0..=1.0).contains(&vertex.texcoord[0]));
            assert!((0.0..=1.0).contains(&vertex.texcoord[1]));
        }
    }

    #[test]
    fn test_segment_minimums() {
        let mesh = uv_sphere(1.0, 0, 0);
        assert_eq!(mesh.vertex_count(), 4 * 3);
        assert!(mesh.validate().is_ok());
    }
}
