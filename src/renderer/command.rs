//! 命令列表模块
//!
//! 提供与图形 API 无关的命令记录。上层把命令写入 [`CommandList`]，
//! 后端在 `encode` 时把它翻译为 Vulkan 命令缓冲区或 DX12 命令列表。
//!
//! `CommandList` 自身维护记录状态机：
//!
//! - 只有 `Recording` 状态可以写入命令
//! - 渲染通道内不允许复制命令，渲染通道不能嵌套
//! - 渲染通道未结束时不能 `end`

use crate::core::error::{GraphicsError, Result};

use super::resource::{BufferHandle, ResourceRef, ResourceState, TextureHandle};

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 初始状态
    Initial,
    /// 正在记录
    Recording,
    /// 已完成记录，可以交给后端编码
    Executable,
}

/// 渲染通道的深度附件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    /// 深度纹理，必须处于 `DepthWrite`
    pub texture: TextureHandle,
    /// 开始渲染通道时写入的深度值，`None` 表示保留原有内容
    pub clear_depth: Option<f32>,
}

/// 单条命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 资源状态转换
    Transition {
        resource: ResourceRef,
        before: ResourceState,
        after: ResourceState,
    },
    /// 开始渲染通道，可选地清除目标和深度附件
    BeginRenderPass {
        target: TextureHandle,
        clear_color: Option<[f32; 4]>,
        depth: Option<DepthAttachment>,
    },
    /// 结束渲染通道
    EndRenderPass,
    /// 缓冲区之间复制
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// 从缓冲区复制到纹理的某个 mip 等级（数据紧密排列）
    CopyBufferToTexture {
        src: BufferHandle,
        src_offset: u64,
        dst: TextureHandle,
        mip_level: u32,
        width: u32,
        height: u32,
    },
}

impl Command {
    /// 是否为传输命令
    pub fn is_transfer(&self) -> bool {
        matches!(self, Command::CopyBuffer { .. } | Command::CopyBufferToTexture { .. })
    }
}

/// 命令列表
///
/// 记录一帧或一次上传需要执行的命令。
#[derive(Debug)]
pub struct CommandList {
    state: CommandListState,
    /// 当前打开的渲染通道目标
    render_pass: Option<TextureHandle>,
    commands: Vec<Command>,
}

impl CommandList {
    /// 创建新的命令列表
    pub fn new() -> Self {
        Self {
            state: CommandListState::Initial,
            render_pass: None,
            commands: Vec::new(),
        }
    }

    /// 开始记录命令
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CommandListState::Initial | CommandListState::Executable => {
                self.commands.clear();
                self.render_pass = None;
                self.state = CommandListState::Recording;
                Ok(())
            }
            CommandListState::Recording => {
                Err(GraphicsError::invalid("Command list is already recording").into())
            }
        }
    }

    /// 结束记录命令
    pub fn end(&mut self) -> Result<()> {
        self.require_recording("end")?;
        if self.render_pass.is_some() {
            return Err(GraphicsError::invalid("Command list ended inside a render pass").into());
        }
        self.state = CommandListState::Executable;
        Ok(())
    }

    /// 资源状态转换
    ///
    /// `before == after` 时不记录任何命令。
    pub fn transition(
        &mut self,
        resource: impl Into<ResourceRef>,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.require_recording("transition")?;
        self.require_outside_pass("transition")?;

        let resource = resource.into();
        if after == ResourceState::Undefined {
            return Err(GraphicsError::invalid("Cannot transition a resource into Undefined").into());
        }
        let mismatched = match resource {
            ResourceRef::Buffer(_) => before.is_texture_only() || after.is_texture_only(),
            ResourceRef::Texture(_) => before.is_buffer_only() || after.is_buffer_only(),
        };
        if mismatched {
            return Err(GraphicsError::invalid(format!(
                "Transition {:?} -> {:?} does not apply to {:?}",
                before, after, resource
            ))
            .into());
        }
        if before == after {
            return Ok(());
        }

        self.commands.push(Command::Transition { resource, before, after });
        Ok(())
    }

    /// 开始渲染通道
    pub fn begin_render_pass(&mut self, target: TextureHandle, clear_color: Option<[f32; 4]>) -> Result<()> {
        self.push_render_pass(target, clear_color, None)
    }

    /// 开始带深度附件的渲染通道
    pub fn begin_render_pass_with_depth(
        &mut self,
        target: TextureHandle,
        clear_color: Option<[f32; 4]>,
        depth: DepthAttachment,
    ) -> Result<()> {
        if depth.texture == target {
            return Err(GraphicsError::invalid("Depth attachment cannot be the color target").into());
        }
        if let Some(value) = depth.clear_depth {
            if !(0.0..=1.0).contains(&value) {
                return Err(GraphicsError::invalid(format!("Depth clear value {} is outside [0, 1]", value)).into());
            }
        }
        self.push_render_pass(target, clear_color, Some(depth))
    }

    fn push_render_pass(
        &mut self,
        target: TextureHandle,
        clear_color: Option<[f32; 4]>,
        depth: Option<DepthAttachment>,
    ) -> Result<()> {
        self.require_recording("begin_render_pass")?;
        if self.render_pass.is_some() {
            return Err(GraphicsError::invalid("Already in render pass").into());
        }
        self.render_pass = Some(target);
        self.commands.push(Command::BeginRenderPass {
            target,
            clear_color,
            depth,
        });
        Ok(())
    }

    /// 结束渲染通道
    pub fn end_render_pass(&mut self) -> Result<()> {
        self.require_recording("end_render_pass")?;
        if self.render_pass.take().is_none() {
            return Err(GraphicsError::invalid("Not in render pass").into());
        }
        self.commands.push(Command::EndRenderPass);
        Ok(())
    }

    /// 缓冲区之间复制
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.require_recording("copy_buffer")?;
        self.require_outside_pass("copy_buffer")?;
        if size == 0 {
            return Err(GraphicsError::invalid("Buffer copy of zero bytes").into());
        }
        self.commands.push(Command::CopyBuffer {
            src,
            dst,
            src_offset,
            dst_offset,
            size,
        });
        Ok(())
    }

    /// 从缓冲区复制到纹理
    pub fn copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: TextureHandle,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.require_recording("copy_buffer_to_texture")?;
        self.require_outside_pass("copy_buffer_to_texture")?;
        if width == 0 || height == 0 {
            return Err(GraphicsError::invalid("Texture copy with an empty extent").into());
        }
        self.commands.push(Command::CopyBufferToTexture {
            src,
            src_offset,
            dst,
            mip_level,
            width,
            height,
        });
        Ok(())
    }

    /// 获取当前状态
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// 是否在渲染通道中
    pub fn is_in_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    /// 已记录的命令
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn require_recording(&self, operation: &str) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(GraphicsError::invalid(format!(
                "{} requires a recording command list (state: {:?})",
                operation, self.state
            ))
            .into());
        }
        Ok(())
    }

    fn require_outside_pass(&self, operation: &str) -> Result<()> {
        if self.render_pass.is_some() {
            return Err(GraphicsError::invalid(format!("{} is not allowed inside a render pass", operation)).into());
        }
        Ok(())
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_state_machine() {
        let mut list = CommandList::new();
        let target = TextureHandle(1);

        assert_eq!(list.state(), CommandListState::Initial);

        // 未开始记录时不能写入命令
        assert!(list.begin_render_pass(target, None).is_err());

        list.begin().unwrap();
        assert_eq!(list.state(), CommandListState::Recording);

        // 不能重复开始
        assert!(list.begin().is_err());

        list.begin_render_pass(target, Some([0.0, 0.0, 0.0, 1.0])).unwrap();
        assert!(list.is_in_render_pass());

        // 在渲染通道中不能结束命令列表
        assert!(list.end().is_err());

        list.end_render_pass().unwrap();
        assert!(!list.is_in_render_pass());

        list.end().unwrap();
        assert_eq!(list.state(), CommandListState::Executable);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_transfers_rejected_inside_render_pass() {
        let mut list = CommandList::new();
        list.begin().unwrap();
        list.begin_render_pass(TextureHandle(1), None).unwrap();

        assert!(list.copy_buffer(BufferHandle(1), 0, BufferHandle(2), 0, 16).is_err());
        assert!(list.copy_buffer_to_texture(BufferHandle(1), 0, TextureHandle(2), 0, 4, 4).is_err());
        assert!(list.begin_render_pass(TextureHandle(3), None).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_render_pass_with_depth() {
        let mut list = CommandList::new();
        list.begin().unwrap();

        let target = TextureHandle(1);
        let depth = DepthAttachment {
            texture: TextureHandle(2),
            clear_depth: Some(1.0),
        };
        // 深度附件不能是颜色目标，清除值必须在 [0, 1] 内
        let aliased = DepthAttachment {
            texture: target,
            ..depth
        };
        assert!(list.begin_render_pass_with_depth(target, None, aliased).is_err());
        let out_of_range = DepthAttachment {
            clear_depth: Some(2.0),
            ..depth
        };
        assert!(list.begin_render_pass_with_depth(target, None, out_of_range).is_err());
        assert!(!list.is_in_render_pass());

        list.begin_render_pass_with_depth(target, Some([0.0; 4]), depth).unwrap();
        list.end_render_pass().unwrap();
        list.end().unwrap();
        assert_eq!(
            list.commands()[0],
            Command::BeginRenderPass {
                target,
                clear_color: Some([0.0; 4]),
                depth: Some(depth),
            }
        );
    }

    #[test]
    fn test_transition_validation() {
        let mut list = CommandList::new();
        list.begin().unwrap();

        // 同状态转换不记录
        list.transition(BufferHandle(1), ResourceState::CopyDest, ResourceState::CopyDest).unwrap();
        assert!(list.is_empty());

        // 缓冲区不能进入纹理专属状态
        assert!(list.transition(BufferHandle(1), ResourceState::CopyDest, ResourceState::Present).is_err());
        // 纹理不能进入缓冲区专属状态
        assert!(list.transition(TextureHandle(1), ResourceState::CopyDest, ResourceState::VertexBuffer).is_err());
        // 不能转换回 Undefined
        assert!(list.transition(TextureHandle(1), ResourceState::CopyDest, ResourceState::Undefined).is_err());

        list.transition(TextureHandle(1), ResourceState::Undefined, ResourceState::CopyDest).unwrap();
        assert_eq!(
            list.commands()[0],
            Command::Transition {
                resource: ResourceRef::Texture(TextureHandle(1)),
                before: ResourceState::Undefined,
                after: ResourceState::CopyDest,
            }
        );
    }

    #[test]
    fn test_begin_clears_previous_recording() {
        let mut list = CommandList::new();
        list.begin().unwrap();
        list.copy_buffer(BufferHandle(1), 0, BufferHandle(2), 0, 8).unwrap();
        list.end().unwrap();
        assert!(list.commands()[0].is_transfer());

        list.begin().unwrap();
        assert!(list.is_empty());
        assert!(list.copy_buffer(BufferHandle(1), 0, BufferHandle(2), 0, 0).is_err());
    }
}
