//! DirectX 12 图形后端实现
//!
//! # 主要组件
//!
//! - `Dx12Backend`：实现 `GraphicsBackend`，持有设备上下文、交换链和全部 GPU 资源
//!
//! # 资源与堆
//!
//! - `HostVisible` 缓冲区位于上传堆，始终处于 `GENERIC_READ`，屏障对它们无效
//! - 其余资源位于默认堆，在 `COMMON` 状态下创建
//!
//! 纹理复制要求源数据行距按 256 字节对齐。暂存缓冲区中的数据是紧密排列的，
//! 编码时按对齐后的行距重新排列到内部上传缓冲区，这些缓冲区在命令上下文重置时释放。

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use winit::window::Window;

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandContextId, GraphicsBackend};
use crate::renderer::command::{Command, CommandList, CommandListState, DepthAttachment};
use crate::renderer::resource::{
    BufferDescriptor, BufferHandle, MemoryType, ResourceRef, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::renderer::sync::FenceValue;

use super::context::Dx12Context;
use super::convert::{
    align_up, copy_row_pitch, dxgi_format, present_error, resource_state, runtime_error, PLACEMENT_ALIGNMENT,
};
use super::swapchain::Dx12Swapchain;

struct Dx12Buffer {
    resource: ID3D12Resource,
    size: u64,
    host_visible: bool,
}

struct Dx12Texture {
    resource: ID3D12Resource,
    format: TextureFormat,
    /// 交换链图像在 RTV 堆中的位置
    render_target: Option<u32>,
    /// 深度纹理独占的单项 DSV 堆
    depth_view: Option<ID3D12DescriptorHeap>,
}

/// 命令分配器加一个图形命令列表
struct Dx12CommandContext {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    encoded: bool,
    in_flight: Option<u64>,
    /// 纹理复制使用的内部上传缓冲区，GPU 完成后随重置释放
    staging: Vec<ID3D12Resource>,
}

/// DirectX 12 图形后端
pub struct Dx12Backend {
    buffers: HashMap<BufferHandle, Dx12Buffer>,
    textures: HashMap<TextureHandle, Dx12Texture>,
    contexts: HashMap<CommandContextId, Dx12CommandContext>,
    swapchain_textures: Vec<TextureHandle>,
    swapchain: Dx12Swapchain,
    last_signal: u64,
    next_id: u64,
    // 最后析构
    context: Dx12Context,
}

fn buffer_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(resource.clone())),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

/// 释放屏障中持有的资源引用
fn release_barrier(barrier: D3D12_RESOURCE_BARRIER) {
    let transition = unsafe { ManuallyDrop::into_inner(barrier.Anonymous.Transition) };
    drop(ManuallyDrop::into_inner(transition.pResource));
}

unsafe fn map_resource(resource: &ID3D12Resource, operation: &str) -> Result<*mut u8> {
    let mut data: *mut std::ffi::c_void = std::ptr::null_mut();
    resource
        .Map(0, None, Some(&mut data))
        .map_err(|e| runtime_error(operation, &e))?;
    Ok(data.cast())
}

impl Dx12Backend {
    /// 为窗口创建 DirectX 12 后端
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let context = Dx12Context::new()?;
        let size = window.inner_size();
        let swapchain = Dx12Swapchain::new(
            &context,
            window,
            size.width,
            size.height,
            config.graphics.buffering_count,
            config.graphics.vsync,
        )?;

        let mut backend = Self {
            buffers: HashMap::new(),
            textures: HashMap::new(),
            contexts: HashMap::new(),
            swapchain_textures: Vec::new(),
            swapchain,
            last_signal: 0,
            next_id: 1,
            context,
        };
        backend.register_swapchain_images();

        info!(
            width = backend.swapchain.width,
            height = backend.swapchain.height,
            images = backend.swapchain.buffers.len(),
            "DX12 Backend initialization complete"
        );
        Ok(backend)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn register_swapchain_images(&mut self) {
        let buffers = self.swapchain.buffers.clone();
        for (index, resource) in buffers.into_iter().enumerate() {
            let handle = TextureHandle(self.allocate_id());
            self.textures.insert(
                handle,
                Dx12Texture {
                    resource,
                    format: TextureFormat::Rgba8Unorm,
                    render_target: Some(index as u32),
                    depth_view: None,
                },
            );
            self.swapchain_textures.push(handle);
        }
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&Dx12Buffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown buffer {:?}", handle)).into())
    }

    fn texture(&self, handle: TextureHandle) -> Result<&Dx12Texture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown texture {:?}", handle)).into())
    }

    fn create_committed(
        &self,
        heap_type: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
        clear_value: Option<&D3D12_CLEAR_VALUE>,
    ) -> Result<ID3D12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: heap_type,
            ..Default::default()
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.context.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                desc,
                state,
                clear_value.map(|value| value as *const D3D12_CLEAR_VALUE),
                &mut resource,
            )
        }
        .map_err(|e| runtime_error("CreateCommittedResource", &e))?;
        resource.ok_or_else(|| GraphicsError::device_lost("CreateCommittedResource", "no resource returned").into())
    }

    /// 为深度纹理创建单项 DSV 堆和视图
    fn create_depth_view(&self, resource: &ID3D12Resource) -> Result<ID3D12DescriptorHeap> {
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            NumDescriptors: 1,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        unsafe {
            let heap: ID3D12DescriptorHeap = self
                .context
                .device
                .CreateDescriptorHeap(&heap_desc)
                .map_err(|e| runtime_error("CreateDescriptorHeap", &e))?;
            self.context
                .device
                .CreateDepthStencilView(resource, None, heap.GetCPUDescriptorHandleForHeapStart());
            Ok(heap)
        }
    }

    fn barrier(&self, list: &ID3D12GraphicsCommandList, resource: &ID3D12Resource, before: D3D12_RESOURCE_STATES, after: D3D12_RESOURCE_STATES) {
        if before == after {
            return;
        }
        let barriers = [transition_barrier(resource, before, after)];
        unsafe { list.ResourceBarrier(&barriers) };
        let [barrier] = barriers;
        release_barrier(barrier);
    }

    /// 把紧密排列的行按复制要求的行距重新排列到新的上传缓冲区
    fn stage_rows(&self, src: &Dx12Buffer, src_offset: u64, row_bytes: u64, row_pitch: u64, rows: u32) -> Result<ID3D12Resource> {
        if !src.host_visible {
            return Err(GraphicsError::invalid("Texture copies with unaligned rows need a host-visible source").into());
        }
        let staging = self.create_committed(
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(row_pitch * u64::from(rows)),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
        )?;
        unsafe {
            let source = map_resource(&src.resource, "ID3D12Resource::Map")?;
            let target = match map_resource(&staging, "ID3D12Resource::Map") {
                Ok(target) => target,
                Err(e) => {
                    src.resource.Unmap(0, None);
                    return Err(e);
                }
            };
            for row in 0..u64::from(rows) {
                std::ptr::copy_nonoverlapping(
                    source.add((src_offset + row * row_bytes) as usize),
                    target.add((row * row_pitch) as usize),
                    row_bytes as usize,
                );
            }
            staging.Unmap(0, None);
            src.resource.Unmap(0, None);
        }
        Ok(staging)
    }

    fn record_command(
        &self,
        list: &ID3D12GraphicsCommandList,
        command: &Command,
        staging: &mut Vec<ID3D12Resource>,
    ) -> Result<()> {
        match *command {
            Command::Transition { resource, before, after } => match resource {
                ResourceRef::Buffer(handle) => {
                    let buffer = self.buffer(handle)?;
                    // 上传堆资源不能离开 GENERIC_READ
                    if !buffer.host_visible {
                        self.barrier(list, &buffer.resource, resource_state(before), resource_state(after));
                    }
                }
                ResourceRef::Texture(handle) => {
                    let texture = self.texture(handle)?;
                    self.barrier(list, &texture.resource, resource_state(before), resource_state(after));
                }
            },
            Command::BeginRenderPass {
                target,
                clear_color,
                depth,
            } => {
                let texture = self.texture(target)?;
                let index = texture
                    .render_target
                    .ok_or_else(|| GraphicsError::invalid(format!("Texture {:?} has no render target view", target)))?;
                let rtv = self.swapchain.rtv_handle(index);
                let dsv = match depth {
                    Some(DepthAttachment { texture, clear_depth }) => {
                        let heap = self
                            .texture(texture)?
                            .depth_view
                            .as_ref()
                            .ok_or_else(|| GraphicsError::invalid(format!("Texture {:?} has no depth stencil view", texture)))?;
                        Some((unsafe { heap.GetCPUDescriptorHandleForHeapStart() }, clear_depth))
                    }
                    None => None,
                };
                unsafe {
                    list.OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|(handle, _)| handle as *const _));
                    if let Some(color) = clear_color {
                        list.ClearRenderTargetView(rtv, &color, None);
                    }
                    if let Some((handle, Some(value))) = dsv {
                        list.ClearDepthStencilView(handle, D3D12_CLEAR_FLAG_DEPTH, value, 0, None);
                    }
                }
            }
            Command::EndRenderPass => {}
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => unsafe {
                list.CopyBufferRegion(&self.buffer(dst)?.resource, dst_offset, &self.buffer(src)?.resource, src_offset, size);
            },
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                mip_level,
                width,
                height,
            } => {
                let source = self.buffer(src)?;
                let texture = self.texture(dst)?;
                let bytes_per_pixel = texture.format.bytes_per_pixel();
                let row_bytes = u64::from(width) * u64::from(bytes_per_pixel);
                if src_offset + row_bytes * u64::from(height) > source.size {
                    return Err(GraphicsError::invalid(format!(
                        "Texture copy reads past the end of buffer {:?}",
                        src
                    ))
                    .into());
                }

                let row_pitch = copy_row_pitch(width, bytes_per_pixel);
                let (resource, offset) = if row_pitch == row_bytes && align_up(src_offset, PLACEMENT_ALIGNMENT) == src_offset {
                    (source.resource.clone(), src_offset)
                } else {
                    let repacked = self.stage_rows(source, src_offset, row_bytes, row_pitch, height)?;
                    staging.push(repacked.clone());
                    (repacked, 0)
                };

                let src_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(resource)),
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                            Offset: offset,
                            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                                Format: dxgi_format(texture.format),
                                Width: width,
                                Height: height,
                                Depth: 1,
                                RowPitch: row_pitch as u32,
                            },
                        },
                    },
                };
                let dst_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(texture.resource.clone())),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: mip_level,
                    },
                };
                unsafe { list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None) };
                drop(ManuallyDrop::into_inner(src_location.pResource));
                drop(ManuallyDrop::into_inner(dst_location.pResource));
            }
        }
        Ok(())
    }
}

impl GraphicsBackend for Dx12Backend {
    fn name(&self) -> &'static str {
        "DirectX 12"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(GraphicsError::invalid("Buffer size must be greater than 0").into());
        }

        let size = desc.aligned_size();
        let host_visible = desc.memory_type == MemoryType::HostVisible;
        let resource = if host_visible {
            self.create_committed(D3D12_HEAP_TYPE_UPLOAD, &buffer_desc(size), D3D12_RESOURCE_STATE_GENERIC_READ, None)?
        } else {
            self.create_committed(D3D12_HEAP_TYPE_DEFAULT, &buffer_desc(size), D3D12_RESOURCE_STATE_COMMON, None)?
        };

        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(
            handle,
            Dx12Buffer {
                resource,
                size,
                host_visible,
            },
        );
        debug!(buffer = handle.raw(), size, name = ?desc.name, "Created buffer");
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let target = self.buffer(buffer)?;
        if !target.host_visible {
            return Err(GraphicsError::invalid("Only host-visible buffers can be written by the CPU").into());
        }
        let len = data.len() as u64;
        if offset + len > target.size {
            return Err(GraphicsError::invalid(format!(
                "Write of {} bytes at offset {} overruns buffer of {} bytes",
                len, offset, target.size
            ))
            .into());
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let mapped = map_resource(&target.resource, "ID3D12Resource::Map")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
            target.resource.Unmap(0, None);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            warn!(buffer = buffer.raw(), "Destroying unknown buffer");
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(GraphicsError::invalid("Texture extent and mip count must be greater than 0").into());
        }
        let mip_levels = u16::try_from(desc.mip_levels)
            .map_err(|_| GraphicsError::invalid(format!("Too many mip levels: {}", desc.mip_levels)))?;
        let is_depth = desc.format.is_depth();

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: u64::from(desc.width),
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: mip_levels,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: if is_depth {
                D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
            } else {
                D3D12_RESOURCE_FLAG_NONE
            },
            ..Default::default()
        };
        // 深度纹理的优化清除值与渲染通道的默认清除值一致
        let clear_value = D3D12_CLEAR_VALUE {
            Format: DXGI_FORMAT_D32_FLOAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
            },
        };
        let resource = self.create_committed(
            D3D12_HEAP_TYPE_DEFAULT,
            &resource_desc,
            D3D12_RESOURCE_STATE_COMMON,
            is_depth.then_some(&clear_value),
        )?;
        let depth_view = if is_depth { Some(self.create_depth_view(&resource)?) } else { None };

        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            Dx12Texture {
                resource,
                format: desc.format,
                render_target: None,
                depth_view,
            },
        );
        debug!(
            texture = handle.raw(),
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            "Created texture"
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.swapchain_textures.contains(&texture) {
            warn!(texture = texture.raw(), "Swapchain images are owned by the swapchain");
            return;
        }
        if self.textures.remove(&texture).is_none() {
            warn!(texture = texture.raw(), "Destroying unknown texture");
        }
    }

    fn create_command_context(&mut self) -> Result<CommandContextId> {
        let device = &self.context.device;
        let (allocator, list) = unsafe {
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| runtime_error("CreateCommandAllocator", &e))?;
            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| runtime_error("CreateCommandList", &e))?;
            // 命令列表创建后处于录制状态，编码时再重新打开
            list.Close().map_err(|e| runtime_error("ID3D12GraphicsCommandList::Close", &e))?;
            (allocator, list)
        };

        let id = CommandContextId(self.allocate_id());
        self.contexts.insert(
            id,
            Dx12CommandContext {
                allocator,
                list,
                encoded: false,
                in_flight: None,
                staging: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_command_context(&mut self, context: CommandContextId) {
        let Some(target) = self.contexts.remove(&context) else {
            warn!(context = context.0, "Destroying unknown command context");
            return;
        };
        let completed = self.context.completed_value().unwrap_or(u64::MAX);
        if target.in_flight.map_or(false, |value| value > completed) {
            warn!(context = context.0, "Destroying a command context still in flight");
        }
    }

    fn reset_command_context(&mut self, context: CommandContextId) -> Result<()> {
        let completed = self.context.completed_value()?;
        let target = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if let Some(value) = target.in_flight {
            if value > completed {
                return Err(GraphicsError::invalid(format!(
                    "Command context reset while fence {} is pending (completed: {})",
                    value, completed
                ))
                .into());
            }
        }

        unsafe { target.allocator.Reset() }.map_err(|e| runtime_error("ID3D12CommandAllocator::Reset", &e))?;
        target.staging.clear();
        target.encoded = false;
        target.in_flight = None;
        Ok(())
    }

    fn encode(&mut self, context: CommandContextId, commands: &CommandList) -> Result<()> {
        if commands.state() != CommandListState::Executable {
            return Err(GraphicsError::invalid("Command list must be ended before encoding").into());
        }
        let target = self
            .contexts
            .get(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if target.encoded || target.in_flight.is_some() {
            return Err(GraphicsError::invalid("Command context must be reset before encoding").into());
        }
        let list = target.list.clone();
        unsafe { list.Reset(&target.allocator, None::<&ID3D12PipelineState>) }
            .map_err(|e| runtime_error("ID3D12GraphicsCommandList::Reset", &e))?;

        let mut staging = Vec::new();
        let recorded = commands
            .commands()
            .iter()
            .try_for_each(|command| self.record_command(&list, command, &mut staging));
        // 失败时同样关闭命令列表，上下文保持可重置
        let closed = unsafe { list.Close() }.map_err(|e| runtime_error("ID3D12GraphicsCommandList::Close", &e));
        recorded?;
        closed?;

        if let Some(target) = self.contexts.get_mut(&context) {
            target.staging.extend(staging);
            target.encoded = true;
        }
        trace!(context = context.0, commands = commands.len(), "Encoded command list");
        Ok(())
    }

    fn submit(&mut self, context: CommandContextId, signal: FenceValue, present_image: Option<u32>) -> Result<()> {
        let signal = signal.value();
        if signal <= self.last_signal {
            return Err(GraphicsError::invalid(format!(
                "Fence value {} does not advance the queue timeline (last: {})",
                signal, self.last_signal
            ))
            .into());
        }
        if let Some(image) = present_image {
            if image as usize >= self.swapchain_textures.len() {
                return Err(GraphicsError::invalid(format!("Swapchain image index {} out of range", image)).into());
            }
        }
        let target = self
            .contexts
            .get(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if !target.encoded {
            return Err(GraphicsError::invalid("Command context submitted without encoded commands").into());
        }

        let command_list: ID3D12CommandList = target.list.clone().into();
        unsafe { self.context.queue.ExecuteCommandLists(&[Some(command_list)]) };
        self.context.signal(signal)?;

        self.last_signal = signal;
        if let Some(target) = self.contexts.get_mut(&context) {
            target.encoded = false;
            target.in_flight = Some(signal);
        }
        trace!(context = context.0, fence = signal, image = ?present_image, "Submitted command list");
        Ok(())
    }

    fn completed_fence_value(&mut self) -> Result<FenceValue> {
        Ok(FenceValue::new(self.context.completed_value()?))
    }

    fn wait_for_fence(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        let target = value.value();
        if target > self.last_signal {
            return Err(GraphicsError::invalid(format!("Fence value {} was never submitted", target)).into());
        }
        self.context.wait(target, timeout)
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain_textures.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> Result<TextureHandle> {
        self.swapchain_textures
            .get(index as usize)
            .copied()
            .ok_or_else(|| GraphicsError::invalid(format!("Swapchain image index {} out of range", index)).into())
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        (self.swapchain.width, self.swapchain.height)
    }

    /// 翻转模型的后台缓冲区按呈现顺序轮转，不需要等待获取
    fn acquire_next_image(&mut self, _timeout: Option<Duration>) -> Result<u32> {
        Ok(self.swapchain.current_index())
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        let current = self.swapchain.current_index();
        if image_index != current {
            return Err(GraphicsError::invalid(format!(
                "Presenting image {} but the current back buffer is {}",
                image_index, current
            ))
            .into());
        }
        self.swapchain.present().map_err(|e| present_error(&e).into())
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.wait_idle()?;

        // ResizeBuffers 之前必须释放所有后台缓冲区引用
        for handle in self.swapchain_textures.drain(..) {
            self.textures.remove(&handle);
        }
        self.swapchain.resize(&self.context.device, width, height)?;
        self.register_swapchain_images();

        info!(
            width,
            height,
            images = self.swapchain.buffers.len(),
            "DX12 swapchain resized"
        );
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        if self.context.wait(self.last_signal, None)? {
            Ok(())
        } else {
            Err(GraphicsError::device_lost("wait_idle", "fence did not complete").into())
        }
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait(self.last_signal, None) {
            warn!(error = %e, "Failed to wait for the GPU during teardown");
        }
        let owned_textures = self.textures.len() - self.swapchain_textures.len();
        if !self.buffers.is_empty() || owned_textures > 0 {
            warn!(
                buffers = self.buffers.len(),
                textures = owned_textures,
                "Releasing resources that were never destroyed"
            );
        }
        self.contexts.clear();
        self.buffers.clear();
        self.textures.clear();
        info!("DX12 backend destroyed");
    }
}
