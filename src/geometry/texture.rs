//! 程序化棋盘格纹理
//!
//! 生成 RGBA8 像素的完整 mip 链，各等级紧密排列，布局与 `MipChain` 一致。
//! 较小的等级对上一等级做 2x2 盒式滤波。

use crate::renderer::resource::{TextureDescriptor, TextureFormat};

/// 纹理描述加上整条 mip 链的像素数据
#[derive(Debug, Clone)]
pub struct TextureData {
    pub desc: TextureDescriptor,
    pub bytes: Vec<u8>,
}

/// 生成 `size × size` 的棋盘格纹理，每个格子 `cell` 像素
pub fn checkerboard(size: u32, cell: u32, light: [u8; 4], dark: [u8; 4]) -> TextureData {
    let size = size.max(1);
    let cell = cell.max(1);
    let desc = TextureDescriptor::new_2d(size, size, TextureFormat::Rgba8Srgb)
        .with_full_mip_chain()
        .with_name("Checkerboard");
    let chain = desc.mip_chain();

    let mut bytes = Vec::with_capacity(chain.total_size() as usize);
    let mut level: Vec<u8> = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if ((x / cell) + (y / cell)) % 2 == 0 { light } else { dark };
            level.extend_from_slice(&texel);
        }
    }

    let mut extent = (size, size);
    for index in 0..chain.levels() {
        if index > 0 {
            let next = chain.level_extent(index);
            level = downsample(&level, extent, next);
            extent = next;
        }
        bytes.extend_from_slice(&level);
    }

    TextureData { desc, bytes }
}

/// 2x2 盒式滤波；奇数边长时最后一行/列被重复采样
fn downsample(src: &[u8], (w, h): (u32, u32), (nw, nh): (u32, u32)) -> Vec<u8> {
    let texel = |x: u32, y: u32, c: usize| -> u32 {
        let x = x.min(w - 1);
        let y = y.min(h - 1);
        u32::from(src[((y * w + x) * 4) as usize + c])
    };

    let mut dst = Vec::with_capacity((nw * nh * 4) as usize);
    for y in 0..nh {
        for x in 0..nw {
            for c in 0..4 {
                let sum = texel(2 * x, 2 * y, c)
                    + texel(2 * x + 1, 2 * y, c)
                    + texel(2 * x, 2 * y + 1, c)
                    + texel(2 * x + 1, 2 * y + 1, c);
                dst.push(((sum + 2) / 4) as u8);
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    #[test]
    fn test_full_mip_chain_size() {
        let data = checkerboard(64, 8, WHITE, BLACK);
        assert_eq!(data.desc.mip_levels, 7);
        // 4 * (64² + 32² + ... + 1²)
        assert_eq!(data.bytes.len(), 4 * 5461);
        assert_eq!(data.desc.mip_chain().total_size(), data.bytes.len() as u64);
    }

    #[test]
    fn test_checker_pattern() {
        let data = checkerboard(4, 2, WHITE, BLACK);
        let pixel = |x: usize, y: usize| &data.bytes[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(pixel(0, 0), &WHITE);
        assert_eq!(pixel(2, 0), &BLACK);
        assert_eq!(pixel(0, 2), &BLACK);
        assert_eq!(pixel(3, 3), &WHITE);
    }

    #[test]
    fn test_smallest_mip_averages_to_grey() {
        let data = checkerboard(8, 1, WHITE, BLACK);
        let last = &data.bytes[data.bytes.len() - 4..];
        assert_eq!(last[3], 255);
        assert!((126..=129).contains(&last[0]));
    }
}
