//! Vulkan 图形后端实现
//!
//! # 主要组件
//!
//! - `VulkanBackend`：实现 `GraphicsBackend`，持有设备上下文、交换链和全部 GPU 资源
//!
//! # 队列 fence 时间线
//!
//! Vulkan 1.1 没有时间线信号量，每次提交附带一个二值 `VkFence`，
//! 按提交顺序保存在 `pending` 中。同一队列上的提交按顺序完成，
//! 所以只需从队首轮询：已经发出信号的 fence 被重置后放回空闲池，
//! 对应的 fence 值即为已完成的值。
//!
//! # 显存
//!
//! 缓冲区和纹理的内存由 `gpu_allocator` 子分配：`DeviceLocal` 对应 `GpuOnly`，
//! `HostVisible` 对应持久映射的 `CpuToGpu`。交换链图像的内存归交换链所有。

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use tracing::{debug, info, trace, warn};
use winit::window::Window;

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandContextId, GraphicsBackend};
use crate::renderer::command::{Command, CommandList, CommandListState, DepthAttachment};
use crate::renderer::resource::{
    BufferDescriptor, BufferHandle, MemoryType, ResourceRef, ResourceState, TextureDescriptor, TextureHandle,
};
use crate::renderer::sync::FenceValue;

use super::context::VulkanContext;
use super::convert::{
    allocation_error, buffer_usage, dst_stage, image_aspect, image_usage, memory_location, runtime_error,
    state_access, swapchain_texture_format, texture_format, timeout_ns,
};
use super::swapchain::{SwapchainRequest, VulkanSwapchain};

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
    host_visible: bool,
}

struct VulkanTexture {
    image: vk::Image,
    /// 交换链图像的内存归交换链所有
    allocation: Option<Allocation>,
    mip_levels: u32,
    aspect: vk::ImageAspectFlags,
}

impl VulkanTexture {
    fn is_swapchain_image(&self) -> bool {
        self.allocation.is_none()
    }

    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// 命令池加一个主命令缓冲区
struct VulkanCommandContext {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    encoded: bool,
    /// 最近一次提交的 fence 值
    in_flight: Option<u64>,
}

/// Vulkan 图形后端
pub struct VulkanBackend {
    buffers: HashMap<BufferHandle, VulkanBuffer>,
    textures: HashMap<TextureHandle, VulkanTexture>,
    contexts: HashMap<CommandContextId, VulkanCommandContext>,
    swapchain: VulkanSwapchain,
    swapchain_textures: Vec<TextureHandle>,
    request: SwapchainRequest,
    free_fences: Vec<vk::Fence>,
    pending: VecDeque<(u64, vk::Fence)>,
    completed: u64,
    last_signal: u64,
    next_id: u64,
    /// 显存子分配器，必须先于逻辑设备析构
    allocator: Allocator,
    // 最后析构：其余对象都在 Drop 中先行销毁
    context: VulkanContext,
}

impl VulkanBackend {
    /// 为窗口创建 Vulkan 后端
    ///
    /// 交换链尺寸取窗口当前的物理尺寸，图像数量按 `buffering_count` 请求。
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let context = VulkanContext::new(window, &config.window.title)?;
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GraphicsError::init("gpu_allocator::vulkan::Allocator::new", e))?;
        debug!("GPU memory allocator initialized");

        let size = window.inner_size();
        let request = SwapchainRequest {
            width: size.width,
            height: size.height,
            image_count: config.graphics.buffering_count,
            vsync: config.graphics.vsync,
        };
        let loader = khr::Swapchain::new(&context.instance, &context.device);
        let swapchain = VulkanSwapchain::new(&context, loader, request, vk::SwapchainKHR::null())?;

        let mut backend = Self {
            buffers: HashMap::new(),
            textures: HashMap::new(),
            contexts: HashMap::new(),
            swapchain,
            swapchain_textures: Vec::new(),
            request,
            free_fences: Vec::new(),
            pending: VecDeque::new(),
            completed: 0,
            last_signal: 0,
            next_id: 1,
            allocator,
            context,
        };
        backend.register_swapchain_images();

        info!(
            width = backend.swapchain.extent.width,
            height = backend.swapchain.extent.height,
            images = backend.swapchain.images.len(),
            "Vulkan Backend initialization complete"
        );
        Ok(backend)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn register_swapchain_images(&mut self) {
        let images = self.swapchain.images.clone();
        for image in images {
            let handle = TextureHandle(self.allocate_id());
            self.textures.insert(
                handle,
                VulkanTexture {
                    image,
                    allocation: None,
                    mip_levels: 1,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            );
            self.swapchain_textures.push(handle);
        }
        trace!(
            format = ?swapchain_texture_format(self.swapchain.format),
            images = self.swapchain_textures.len(),
            "Registered swapchain images"
        );
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&VulkanBuffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown buffer {:?}", handle)).into())
    }

    fn texture(&self, handle: TextureHandle) -> Result<&VulkanTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown texture {:?}", handle)).into())
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| allocation_error("gpu_allocator::allocate", e).into())
    }

    fn free(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            warn!(error = %e, "Failed to free GPU allocation");
        }
    }

    /// 从队首回收已经发出信号的 fence
    fn poll_fences(&mut self) -> Result<()> {
        while let Some(&(value, fence)) = self.pending.front() {
            let signaled = unsafe { self.context.device.get_fence_status(fence) }
                .map_err(|e| runtime_error("vkGetFenceStatus", e))?;
            if !signaled {
                break;
            }
            self.pending.pop_front();
            self.recycle_fence(fence)?;
            self.completed = self.completed.max(value);
        }
        Ok(())
    }

    fn recycle_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.context.device.reset_fences(&[fence]) }.map_err(|e| runtime_error("vkResetFences", e))?;
        self.free_fences.push(fence);
        Ok(())
    }

    fn take_fence(&mut self) -> Result<vk::Fence> {
        if let Some(fence) = self.free_fences.pop() {
            return Ok(fence);
        }
        unsafe { self.context.device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| runtime_error("vkCreateFence", e).into())
    }

    fn record_command(&self, command_buffer: vk::CommandBuffer, command: &Command) -> Result<()> {
        let device = &self.context.device;
        match *command {
            Command::Transition { resource, before, after } => {
                let src = state_access(before);
                let dst = state_access(after);
                match resource {
                    ResourceRef::Buffer(handle) => {
                        let buffer = self.buffer(handle)?;
                        let barrier = vk::BufferMemoryBarrier::builder()
                            .src_access_mask(src.access)
                            .dst_access_mask(dst.access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer.buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE)
                            .build();
                        unsafe {
                            device.cmd_pipeline_barrier(
                                command_buffer,
                                src.stage,
                                dst_stage(after),
                                vk::DependencyFlags::empty(),
                                &[],
                                &[barrier],
                                &[],
                            );
                        }
                    }
                    ResourceRef::Texture(handle) => {
                        let texture = self.texture(handle)?;
                        // 交换链图像每帧都会被完整重写，不需要保留上一次呈现的内容
                        let old_layout = if texture.is_swapchain_image() && before == ResourceState::Present {
                            vk::ImageLayout::UNDEFINED
                        } else {
                            src.layout
                        };
                        self.image_barrier(
                            command_buffer,
                            texture,
                            (old_layout, src.access, src.stage),
                            (dst.layout, dst.access, dst_stage(after)),
                        );
                    }
                }
            }
            Command::BeginRenderPass {
                target,
                clear_color,
                depth,
            } => {
                let texture = self.texture(target)?;
                if let Some(color) = clear_color {
                    let value = vk::ClearColorValue { float32: color };
                    self.clear_image(command_buffer, texture, ResourceState::RenderTarget, |device, image, ranges| unsafe {
                        device.cmd_clear_color_image(
                            command_buffer,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &value,
                            ranges,
                        );
                    });
                }
                if let Some(DepthAttachment {
                    texture: depth,
                    clear_depth: Some(clear_depth),
                }) = depth
                {
                    let value = vk::ClearDepthStencilValue {
                        depth: clear_depth,
                        stencil: 0,
                    };
                    let texture = self.texture(depth)?;
                    self.clear_image(command_buffer, texture, ResourceState::DepthWrite, |device, image, ranges| unsafe {
                        device.cmd_clear_depth_stencil_image(
                            command_buffer,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &value,
                            ranges,
                        );
                    });
                }
            }
            Command::EndRenderPass => {}
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let region = vk::BufferCopy {
                    src_offset,
                    dst_offset,
                    size,
                };
                unsafe {
                    device.cmd_copy_buffer(command_buffer, self.buffer(src)?.buffer, self.buffer(dst)?.buffer, &[region]);
                }
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                mip_level,
                width,
                height,
            } => {
                let region = vk::BufferImageCopy {
                    buffer_offset: src_offset,
                    // 0 表示紧密排列
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: self.texture(dst)?.aspect,
                        mip_level,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D { width, height, depth: 1 },
                };
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        command_buffer,
                        self.buffer(src)?.buffer,
                        self.texture(dst)?.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
        }
        Ok(())
    }

    fn image_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        texture: &VulkanTexture,
        src: (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
        dst: (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(src.0)
            .new_layout(dst.0)
            .src_access_mask(src.1)
            .dst_access_mask(dst.1)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image)
            .subresource_range(texture.full_range())
            .build();
        unsafe {
            self.context.device.cmd_pipeline_barrier(
                command_buffer,
                src.2,
                dst.2,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// 渲染通道的清除：附件处于 `resting` 状态，借助传输布局清除后再转回
    fn clear_image<F>(&self, command_buffer: vk::CommandBuffer, texture: &VulkanTexture, resting: ResourceState, clear: F)
    where
        F: FnOnce(&ash::Device, vk::Image, &[vk::ImageSubresourceRange]),
    {
        let target = state_access(resting);
        let transfer = state_access(ResourceState::CopyDest);

        self.image_barrier(
            command_buffer,
            texture,
            (target.layout, target.access, target.stage),
            (transfer.layout, transfer.access, transfer.stage),
        );
        clear(&self.context.device, texture.image, &[texture.full_range()]);
        self.image_barrier(
            command_buffer,
            texture,
            (transfer.layout, transfer.access, transfer.stage),
            (target.layout, target.access, target.stage),
        );
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(GraphicsError::invalid("Buffer size must be greater than 0").into());
        }

        let size = desc.aligned_size();
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer =
            unsafe { self.context.device.create_buffer(&info, None) }.map_err(|e| runtime_error("vkCreateBuffer", e))?;

        let requirements = unsafe { self.context.device.get_buffer_memory_requirements(buffer) };
        let name = desc.name.as_deref().unwrap_or("Buffer");
        let allocation = match self.allocate(name, requirements, memory_location(desc.memory_type), true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.context.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.context
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.context.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(runtime_error("vkBindBufferMemory", e).into());
        }

        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(
            handle,
            VulkanBuffer {
                buffer,
                allocation,
                size,
                host_visible: desc.memory_type == MemoryType::HostVisible,
            },
        );
        debug!(buffer = handle.raw(), size, name = ?desc.name, "Created buffer");
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown buffer {:?}", buffer)))?;
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

        // CpuToGpu 分配由分配器持久映射
        let mapped = target
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| GraphicsError::device_lost("gpu_allocator::mapped_slice_mut", "allocation is not mapped"))?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.remove(&buffer) {
            Some(target) => {
                unsafe { self.context.device.destroy_buffer(target.buffer, None) };
                self.free(target.allocation);
            }
            None => warn!(buffer = buffer.raw(), "Destroying unknown buffer"),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(GraphicsError::invalid("Texture extent and mip count must be greater than 0").into());
        }

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(texture_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage(desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image =
            unsafe { self.context.device.create_image(&info, None) }.map_err(|e| runtime_error("vkCreateImage", e))?;

        let requirements = unsafe { self.context.device.get_image_memory_requirements(image) };
        let name = desc.name.as_deref().unwrap_or("Texture");
        // 最优平铺的图像不是线性资源
        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.context.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.context
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.context.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(runtime_error("vkBindImageMemory", e).into());
        }

        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            VulkanTexture {
                image,
                allocation: Some(allocation),
                mip_levels: desc.mip_levels,
                aspect: image_aspect(desc.format),
            },
        );
        debug!(
            texture = handle.raw(),
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            format = ?desc.format,
            "Created texture"
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.swapchain_textures.contains(&texture) {
            warn!(texture = texture.raw(), "Swapchain images are owned by the swapchain");
            return;
        }
        match self.textures.remove(&texture) {
            Some(VulkanTexture {
                image,
                allocation: Some(allocation),
                ..
            }) => {
                unsafe { self.context.device.destroy_image(image, None) };
                self.free(allocation);
            }
            _ => warn!(texture = texture.raw(), "Destroying unknown texture"),
        }
    }

    fn create_command_context(&mut self) -> Result<CommandContextId> {
        let device = &self.context.device;
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.context.physical_device.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool =
            unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| runtime_error("vkCreateCommandPool", e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(GraphicsError::device_lost("vkAllocateCommandBuffers", "no command buffer returned").into());
            }
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(runtime_error("vkAllocateCommandBuffers", e).into());
            }
        };

        let id = CommandContextId(self.allocate_id());
        self.contexts.insert(
            id,
            VulkanCommandContext {
                pool,
                command_buffer,
                encoded: false,
                in_flight: None,
            },
        );
        Ok(id)
    }

    fn destroy_command_context(&mut self, context: CommandContextId) {
        let Some(target) = self.contexts.remove(&context) else {
            warn!(context = context.0, "Destroying unknown command context");
            return;
        };
        if target.in_flight.map_or(false, |value| value > self.completed) {
            warn!(context = context.0, "Destroying a command context still in flight");
        }
        unsafe { self.context.device.destroy_command_pool(target.pool, None) };
    }

    fn reset_command_context(&mut self, context: CommandContextId) -> Result<()> {
        self.poll_fences()?;
        let completed = self.completed;
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

        unsafe {
            self.context
                .device
                .reset_command_pool(target.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| runtime_error("vkResetCommandPool", e))?;
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
        let command_buffer = target.command_buffer;

        let device = &self.context.device;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(|e| runtime_error("vkBeginCommandBuffer", e))?;

        for command in commands.commands() {
            self.record_command(command_buffer, command)?;
        }

        unsafe { self.context.device.end_command_buffer(command_buffer) }
            .map_err(|e| runtime_error("vkEndCommandBuffer", e))?;

        if let Some(target) = self.contexts.get_mut(&context) {
            target.encoded = true;
        }
        trace!(context = context.0, commands = commands.len(), "Encoded command buffer");
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
        let target = self
            .contexts
            .get(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if !target.encoded {
            return Err(GraphicsError::invalid("Command context submitted without encoded commands").into());
        }
        let command_buffers = [target.command_buffer];

        let (wait_semaphores, signal_semaphores) = match present_image {
            Some(image) => {
                let acquire = self
                    .swapchain
                    .pending_acquire(image)
                    .ok_or_else(|| GraphicsError::invalid(format!("Swapchain image {} was not acquired", image)))?;
                (vec![acquire], vec![self.swapchain.render_finished(image)])
            }
            None => (Vec::new(), Vec::new()),
        };
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];

        let fence = self.take_fence()?;
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        if let Err(e) = unsafe { self.context.device.queue_submit(self.context.queue, &[submit_info], fence) } {
            self.free_fences.push(fence);
            return Err(runtime_error("vkQueueSubmit", e).into());
        }

        self.pending.push_back((signal, fence));
        self.last_signal = signal;
        if let Some(target) = self.contexts.get_mut(&context) {
            target.encoded = false;
            target.in_flight = Some(signal);
        }
        if let Some(image) = present_image {
            self.swapchain.consume_acquire(image, signal);
        }
        trace!(context = context.0, fence = signal, image = ?present_image, "Submitted command buffer");
        Ok(())
    }

    fn completed_fence_value(&mut self) -> Result<FenceValue> {
        self.poll_fences()?;
        Ok(FenceValue::new(self.completed))
    }

    fn wait_for_fence(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        let target = value.value();
        self.poll_fences()?;
        if self.completed >= target {
            return Ok(true);
        }

        let Some(&(_, fence)) = self.pending.iter().find(|(pending, _)| *pending >= target) else {
            return Err(GraphicsError::invalid(format!("Fence value {} was never submitted", target)).into());
        };
        match unsafe { self.context.device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Ok(false),
            Err(e) => return Err(runtime_error("vkWaitForFences", e).into()),
        }

        self.poll_fences()?;
        Ok(self.completed >= target)
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
        (self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn acquire_next_image(&mut self, timeout: Option<Duration>) -> Result<u32> {
        let started = Instant::now();
        let (semaphore_index, last_use) = self
            .swapchain
            .next_acquire_semaphore()
            .ok_or_else(|| GraphicsError::invalid("No acquire semaphore available"))?;

        // 信号量上一次被等待的提交必须完成才能再次发出
        if let Some(value) = last_use {
            if !self.wait_for_fence(FenceValue::new(value), timeout)? {
                return Err(GraphicsError::AcquireTimeout {
                    waited: started.elapsed(),
                }
                .into());
            }
        }

        let remaining = timeout.map(|timeout| timeout.saturating_sub(started.elapsed()));
        let semaphore = self.swapchain.acquire_semaphore(semaphore_index);
        let result = unsafe {
            self.swapchain.loader.acquire_next_image(
                self.swapchain.handle,
                timeout_ns(remaining),
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!(image = index, "Acquired image from a suboptimal swapchain");
                }
                self.swapchain.mark_acquired(index, semaphore_index);
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Err(GraphicsError::SurfaceLost.into())
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(GraphicsError::AcquireTimeout {
                waited: started.elapsed(),
            }
            .into()),
            Err(e) => Err(runtime_error("vkAcquireNextImageKHR", e).into()),
        }
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        if image_index as usize >= self.swapchain.images.len() {
            return Err(GraphicsError::invalid(format!("Swapchain image index {} out of range", image_index)).into());
        }

        let wait_semaphores = [self.swapchain.render_finished(image_index)];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain.loader.queue_present(self.context.queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                debug!(image = image_index, "Presented to a suboptimal swapchain");
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Err(GraphicsError::PresentLost.into())
            }
            Err(e) => Err(runtime_error("vkQueuePresentKHR", e).into()),
        }
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.wait_idle()?;

        for handle in self.swapchain_textures.drain(..) {
            self.textures.remove(&handle);
        }

        let request = SwapchainRequest {
            width,
            height,
            ..self.request
        };
        let loader = self.swapchain.loader.clone();
        let rebuilt = VulkanSwapchain::new(&self.context, loader, request, self.swapchain.handle);
        // 无论新交换链是否创建成功，旧交换链都已退役
        self.swapchain.destroy(&self.context.device);
        self.swapchain = rebuilt?;
        self.request = request;
        self.register_swapchain_images();

        info!(
            width = self.swapchain.extent.width,
            height = self.swapchain.extent.height,
            images = self.swapchain.images.len(),
            "Vulkan swapchain rebuilt"
        );
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.context.device.queue_wait_idle(self.context.queue) }
            .map_err(|e| runtime_error("vkQueueWaitIdle", e))?;
        while let Some((value, fence)) = self.pending.pop_front() {
            self.recycle_fence(fence)?;
            self.completed = self.completed.max(value);
        }
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                warn!(status = ?e, "vkDeviceWaitIdle failed during teardown");
            }
        }

        let owned_textures = self.textures.values().filter(|t| !t.is_swapchain_image()).count();
        if !self.buffers.is_empty() || owned_textures > 0 {
            warn!(
                buffers = self.buffers.len(),
                textures = owned_textures,
                "Releasing resources that were never destroyed"
            );
        }

        let mut allocations = Vec::new();
        unsafe {
            for (_, context) in self.contexts.drain() {
                device.destroy_command_pool(context.pool, None);
            }
            for (_, buffer) in self.buffers.drain() {
                device.destroy_buffer(buffer.buffer, None);
                allocations.push(buffer.allocation);
            }
            for (_, texture) in self.textures.drain() {
                if let Some(allocation) = texture.allocation {
                    device.destroy_image(texture.image, None);
                    allocations.push(allocation);
                }
            }
            for fence in self.free_fences.drain(..).chain(self.pending.drain(..).map(|(_, fence)| fence)) {
                device.destroy_fence(fence, None);
            }
        }
        // 分配器本身随字段析构，早于逻辑设备
        for allocation in allocations {
            if let Err(e) = self.allocator.free(allocation) {
                warn!(error = %e, "Failed to free GPU allocation during teardown");
            }
        }
        self.swapchain.destroy(device);
        info!("Vulkan backend destroyed");
    }
}
