//! 模拟 GPU 的资源存储
//!
//! 缓冲区和纹理以 `Vec<u8>` 的形式保存在内存中，并记录每个资源当前的状态。
//! 命令在模拟队列线程上执行，状态转换的 `before` 与记录状态不一致时
//! 视为校验错误，记录下来供测试检查。

use std::collections::HashMap;

use tracing::warn;

use crate::renderer::command::Command;
use crate::renderer::resource::{
    BufferDescriptor, BufferHandle, MemoryType, ResourceRef, ResourceState, TextureDescriptor, TextureFormat,
    TextureHandle,
};

pub(crate) struct BufferData {
    pub desc: BufferDescriptor,
    pub bytes: Vec<u8>,
}

pub(crate) struct TextureData {
    pub desc: TextureDescriptor,
    pub levels: Vec<Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct ResourceStore {
    pub buffers: HashMap<BufferHandle, BufferData>,
    pub textures: HashMap<TextureHandle, TextureData>,
    pub states: HashMap<ResourceRef, ResourceState>,
    pub validation_errors: Vec<String>,
}

impl ResourceStore {
    pub fn insert_buffer(&mut self, handle: BufferHandle, desc: &BufferDescriptor) {
        self.buffers.insert(
            handle,
            BufferData {
                desc: desc.clone(),
                bytes: vec![0; desc.size as usize],
            },
        );
        self.states.insert(handle.into(), ResourceState::Undefined);
    }

    pub fn insert_texture(&mut self, handle: TextureHandle, desc: &TextureDescriptor, state: ResourceState) {
        let chain = desc.mip_chain();
        let levels = (0..chain.levels())
            .map(|level| vec![0; chain.level_size(level) as usize])
            .collect();
        self.textures.insert(
            handle,
            TextureData {
                desc: desc.clone(),
                levels,
            },
        );
        self.states.insert(handle.into(), state);
    }

    pub fn remove_buffer(&mut self, handle: BufferHandle) -> bool {
        self.states.remove(&ResourceRef::from(handle));
        self.buffers.remove(&handle).is_some()
    }

    pub fn remove_texture(&mut self, handle: TextureHandle) -> bool {
        self.states.remove(&ResourceRef::from(handle));
        self.textures.remove(&handle).is_some()
    }

    /// 按顺序执行一个命令列表
    pub fn execute(&mut self, commands: &[Command]) {
        for command in commands {
            if let Err(message) = self.execute_one(command) {
                warn!(command = ?command, "Headless validation error: {}", message);
                self.validation_errors.push(message);
            }
        }
    }

    fn execute_one(&mut self, command: &Command) -> std::result::Result<(), String> {
        match *command {
            Command::Transition { resource, before, after } => {
                let current = self
                    .states
                    .get_mut(&resource)
                    .ok_or_else(|| format!("transition of unknown resource {:?}", resource))?;
                if *current != before {
                    let message = format!(
                        "{:?} is in {:?}, transition expected {:?}",
                        resource, current, before
                    );
                    *current = after;
                    return Err(message);
                }
                *current = after;
                Ok(())
            }
            Command::BeginRenderPass { target, clear_color, depth } => {
                self.expect_state(target.into(), ResourceState::RenderTarget)?;
                let extent = {
                    let texture = self
                        .textures
                        .get_mut(&target)
                        .ok_or_else(|| format!("render pass on unknown texture {:?}", target))?;
                    if texture.desc.format.is_depth() {
                        return Err(format!("{:?} is a depth texture and cannot be a color target", target));
                    }
                    if let Some(color) = clear_color {
                        fill(&mut texture.levels[0], &encode_texel(texture.desc.format, color));
                    }
                    (texture.desc.width, texture.desc.height)
                };

                let Some(depth) = depth else {
                    return Ok(());
                };
                self.expect_state(depth.texture.into(), ResourceState::DepthWrite)?;
                let texture = self
                    .textures
                    .get_mut(&depth.texture)
                    .ok_or_else(|| format!("render pass with unknown depth texture {:?}", depth.texture))?;
                if !texture.desc.format.is_depth() {
                    return Err(format!("{:?} is not a depth texture", depth.texture));
                }
                if (texture.desc.width, texture.desc.height) != extent {
                    return Err(format!(
                        "depth texture {:?} is {}x{}, color target is {}x{}",
                        depth.texture, texture.desc.width, texture.desc.height, extent.0, extent.1
                    ));
                }
                if let Some(value) = depth.clear_depth {
                    fill(&mut texture.levels[0], &value.to_le_bytes());
                }
                Ok(())
            }
            Command::EndRenderPass => Ok(()),
            Command::CopyBuffer { src, dst, src_offset, dst_offset, size } => {
                self.expect_state(src.into(), ResourceState::CopySource)
                    .or_else(|_| self.expect_host_visible(src))?;
                self.expect_state(dst.into(), ResourceState::CopyDest)?;
                let bytes = self.read_range(src, src_offset, size)?;
                let target = self
                    .buffers
                    .get_mut(&dst)
                    .ok_or_else(|| format!("copy into unknown buffer {:?}", dst))?;
                let start = dst_offset as usize;
                let end = start + size as usize;
                if end > target.bytes.len() {
                    return Err(format!("copy overruns buffer {:?} ({} > {})", dst, end, target.bytes.len()));
                }
                target.bytes[start..end].copy_from_slice(&bytes);
                Ok(())
            }
            Command::CopyBufferToTexture { src, src_offset, dst, mip_level, width, height } => {
                self.expect_state(src.into(), ResourceState::CopySource)
                    .or_else(|_| self.expect_host_visible(src))?;
                self.expect_state(dst.into(), ResourceState::CopyDest)?;
                let texture = self
                    .textures
                    .get(&dst)
                    .ok_or_else(|| format!("copy into unknown texture {:?}", dst))?;
                let chain = texture.desc.mip_chain();
                if mip_level >= chain.levels() {
                    return Err(format!("mip level {} out of range for {:?}", mip_level, dst));
                }
                if chain.level_extent(mip_level) != (width, height) {
                    return Err(format!(
                        "copy extent {}x{} does not match mip {} of {:?}",
                        width, height, mip_level, dst
                    ));
                }
                let size = chain.level_size(mip_level);
                let bytes = self.read_range(src, src_offset, size)?;
                if let Some(texture) = self.textures.get_mut(&dst) {
                    texture.levels[mip_level as usize].copy_from_slice(&bytes);
                }
                Ok(())
            }
        }
    }

    fn expect_state(&self, resource: ResourceRef, expected: ResourceState) -> std::result::Result<(), String> {
        match self.states.get(&resource) {
            Some(state) if *state == expected => Ok(()),
            Some(state) => Err(format!("{:?} is in {:?}, expected {:?}", resource, state, expected)),
            None => Err(format!("unknown resource {:?}", resource)),
        }
    }

    /// 暂存缓冲区在上传堆中，可以不经转换直接作为复制源
    fn expect_host_visible(&self, buffer: BufferHandle) -> std::result::Result<(), String> {
        match self.buffers.get(&buffer) {
            Some(data) if data.desc.memory_type == MemoryType::HostVisible => Ok(()),
            Some(_) => Err(format!("{:?} is not readable as a copy source", buffer)),
            None => Err(format!("unknown buffer {:?}", buffer)),
        }
    }

    fn read_range(&self, buffer: BufferHandle, offset: u64, size: u64) -> std::result::Result<Vec<u8>, String> {
        let data = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| format!("copy from unknown buffer {:?}", buffer))?;
        let start = offset as usize;
        let end = start + size as usize;
        data.bytes
            .get(start..end)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| format!("copy overruns buffer {:?} ({} > {})", buffer, end, data.bytes.len()))
    }

    /// 纹理所有等级按顺序拼接的内容
    pub fn texture_contents(&self, handle: TextureHandle) -> Option<Vec<u8>> {
        self.textures.get(&handle).map(|texture| texture.levels.concat())
    }
}

fn fill(level: &mut [u8], texel: &[u8]) {
    for chunk in level.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

/// 把清除颜色编码为一个像素
fn encode_texel(format: TextureFormat, color: [f32; 4]) -> Vec<u8> {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8Srgb => color.iter().map(|c| unorm(*c)).collect(),
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8Srgb => {
            vec![unorm(color[2]), unorm(color[1]), unorm(color[0]), unorm(color[3])]
        }
        TextureFormat::R8Unorm => vec![unorm(color[0])],
        TextureFormat::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        TextureFormat::D32Float => color[0].to_le_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::DepthAttachment;
    use crate::renderer::resource::BufferUsageType;

    #[test]
    fn test_transition_mismatch_is_recorded() {
        let mut store = ResourceStore::default();
        let buffer = BufferHandle(1);
        store.insert_buffer(buffer, &BufferDescriptor::device_local(16, BufferUsageType::Vertex));

        store.execute(&[Command::Transition {
            resource: buffer.into(),
            before: ResourceState::CopyDest,
            after: ResourceState::VertexBuffer,
        }]);

        assert_eq!(store.validation_errors.len(), 1);
        assert_eq!(store.states[&ResourceRef::from(buffer)], ResourceState::VertexBuffer);
    }

    #[test]
    fn test_copy_buffer_from_staging() {
        let mut store = ResourceStore::default();
        let staging = BufferHandle(1);
        let target = BufferHandle(2);
        store.insert_buffer(staging, &BufferDescriptor::new(4, BufferUsageType::Upload, MemoryType::HostVisible));
        store.insert_buffer(target, &BufferDescriptor::device_local(4, BufferUsageType::Index));
        store.buffers.get_mut(&staging).unwrap().bytes.copy_from_slice(&[1, 2, 3, 4]);

        store.execute(&[
            Command::Transition {
                resource: target.into(),
                before: ResourceState::Undefined,
                after: ResourceState::CopyDest,
            },
            Command::CopyBuffer { src: staging, dst: target, src_offset: 0, dst_offset: 0, size: 4 },
        ]);

        assert!(store.validation_errors.is_empty());
        assert_eq!(store.buffers[&target].bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_writes_bgra_texels() {
        let mut store = ResourceStore::default();
        let image = TextureHandle(7);
        store.insert_texture(image, &TextureDescriptor::new_2d(2, 1, TextureFormat::Bgra8Unorm), ResourceState::RenderTarget);

        store.execute(&[
            Command::BeginRenderPass { target: image, clear_color: Some([1.0, 0.0, 0.0, 1.0]), depth: None },
            Command::EndRenderPass,
        ]);

        assert!(store.validation_errors.is_empty());
        assert_eq!(store.texture_contents(image).unwrap(), vec![0, 0, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn test_depth_clear_requires_depth_write() {
        let mut store = ResourceStore::default();
        let image = TextureHandle(1);
        let depth = TextureHandle(2);
        store.insert_texture(image, &TextureDescriptor::new_2d(2, 1, TextureFormat::Bgra8Unorm), ResourceState::RenderTarget);
        store.insert_texture(depth, &TextureDescriptor::new_2d(2, 1, TextureFormat::D32Float), ResourceState::Undefined);
        let pass = Command::BeginRenderPass {
            target: image,
            clear_color: None,
            depth: Some(DepthAttachment { texture: depth, clear_depth: Some(1.0) }),
        };

        store.execute(&[pass.clone(), Command::EndRenderPass]);
        assert_eq!(store.validation_errors.len(), 1);
        assert_eq!(store.texture_contents(depth).unwrap(), vec![0; 8]);

        store.execute(&[
            Command::Transition {
                resource: depth.into(),
                before: ResourceState::Undefined,
                after: ResourceState::DepthWrite,
            },
            pass,
            Command::EndRenderPass,
        ]);
        assert_eq!(store.validation_errors.len(), 1);
        let one = 1.0f32.to_le_bytes();
        assert_eq!(store.texture_contents(depth).unwrap(), [one, one].concat());
    }
}
