//! 无窗口后端
//!
//! 不依赖任何图形驱动，在 CPU 上模拟一个异步执行的 GPU：
//!
//! - 资源是内存中的字节数组，命令在独立的队列线程上按提交顺序执行
//! - 队列 fence 由队列线程在执行完提交后推进，CPU 通过条件变量等待
//! - 交换链是一组纹理，获取顺序默认轮转，也可以预先指定任意顺序
//!
//! 帧编排器和资源上传的单元测试全部运行在这个后端上；
//! 配置 `backend = "headless"` 时主程序也可以在没有窗口的环境中运行。

mod queue;
mod store;

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandContextId, GraphicsBackend};
use crate::renderer::command::{Command, CommandList, CommandListState};
use crate::renderer::resource::{
    BufferDescriptor, BufferHandle, MemoryType, ResourceRef, ResourceState, TextureDescriptor, TextureFormat,
    TextureHandle,
};
use crate::renderer::sync::FenceValue;

pub use queue::GpuControl;
use queue::{lock, QueueOp, QueueShared};

/// 无窗口后端的创建参数
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    /// 每次提交的模拟执行耗时
    pub gpu_latency: Duration,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            image_count: 3,
            gpu_latency: Duration::ZERO,
        }
    }
}

impl HeadlessOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.headless.width,
            height: config.headless.height,
            image_count: config.graphics.buffering_count,
            gpu_latency: Duration::from_millis(config.headless.gpu_latency_ms),
        }
    }
}

/// 命令上下文在模拟后端中的状态
enum ContextState {
    /// 已重置，可以编码
    Reset,
    /// 已编码，等待提交
    Encoded(Vec<Command>),
    /// 已提交，在 fence 达到该值之前不能重置
    Submitted(u64),
}

/// 注入的故障，只影响下一次对应调用
#[derive(Default)]
struct Faults {
    allocation: bool,
    submit: bool,
}

/// 交换链获取状态
struct HeadlessSwapchain {
    images: Vec<TextureHandle>,
    extent: (u32, u32),
    /// 下一次轮转获取的图像
    cursor: u32,
    /// 预先指定的获取顺序，优先于轮转
    scripted: VecDeque<u32>,
    /// 已获取但尚未呈现的图像
    held: Vec<bool>,
    surface_lost: bool,
}

/// 无窗口后端
pub struct HeadlessBackend {
    shared: Arc<QueueShared>,
    control: GpuControl,
    sender: Option<Sender<QueueOp>>,
    worker: Option<JoinHandle<()>>,
    next_id: u64,
    contexts: HashMap<CommandContextId, ContextState>,
    swapchain: HeadlessSwapchain,
    image_count: u32,
    last_signal: u64,
    faults: Faults,
}

impl HeadlessBackend {
    /// 创建后端并启动模拟队列线程
    pub fn new(options: HeadlessOptions) -> Result<Self> {
        if options.image_count == 0 || options.width == 0 || options.height == 0 {
            return Err(GraphicsError::invalid("Headless swapchain needs at least one non-empty image").into());
        }

        let shared = Arc::new(QueueShared::default());
        let control = GpuControl::default();
        let (sender, receiver) = mpsc::channel();

        let worker = {
            let shared = shared.clone();
            let control = control.clone();
            let latency = options.gpu_latency;
            std::thread::Builder::new()
                .name("headless-gpu".to_string())
                .spawn(move || queue::run_queue(receiver, shared, control, latency))?
        };

        let mut backend = Self {
            shared,
            control,
            sender: Some(sender),
            worker: Some(worker),
            next_id: 1,
            contexts: HashMap::new(),
            swapchain: HeadlessSwapchain {
                images: Vec::new(),
                extent: (options.width, options.height),
                cursor: 0,
                scripted: VecDeque::new(),
                held: Vec::new(),
                surface_lost: false,
            },
            image_count: options.image_count,
            last_signal: 0,
            faults: Faults::default(),
        };
        backend.create_swapchain_images(options.width, options.height);

        info!(
            width = options.width,
            height = options.height,
            images = options.image_count,
            latency_ms = options.gpu_latency.as_millis() as u64,
            "Headless backend initialized"
        );
        Ok(backend)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_swapchain_images(&mut self, width: u32, height: u32) {
        let mut store = lock(&self.shared.store);
        for image in self.swapchain.images.drain(..) {
            store.remove_texture(image);
        }
        drop(store);

        let images: Vec<TextureHandle> = (0..self.image_count)
            .map(|_| TextureHandle(self.allocate_id()))
            .collect();

        let mut store = lock(&self.shared.store);
        for (index, image) in images.iter().enumerate() {
            let desc = TextureDescriptor::new_2d(width, height, TextureFormat::Bgra8Srgb)
                .with_name(format!("Swapchain Image {}", index));
            // 与 DX12 一致，交换链图像以呈现状态开始
            store.insert_texture(*image, &desc, ResourceState::Present);
        }
        drop(store);

        self.swapchain.images = images;
        self.swapchain.extent = (width, height);
        self.swapchain.cursor = 0;
        self.swapchain.scripted.clear();
        self.swapchain.held = vec![false; self.image_count as usize];
        self.swapchain.surface_lost = false;
    }

    fn send(&self, op: QueueOp) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or_else(|| GraphicsError::device_lost("queue", "headless queue stopped"))?
            .send(op)
            .map_err(|_| GraphicsError::device_lost("queue", "headless queue thread exited").into())
    }

    fn take_allocation_fault(&mut self, operation: &str) -> Result<()> {
        if std::mem::take(&mut self.faults.allocation) {
            return Err(GraphicsError::OutOfMemory {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ---- 测试和诊断用的接口 ----

    /// GPU 暂停/放行控制
    pub fn gpu_control(&self) -> GpuControl {
        self.control.clone()
    }

    /// 指定之后获取交换链图像的顺序
    pub fn script_acquire_order(&mut self, order: impl IntoIterator<Item = u32>) {
        self.swapchain.scripted.extend(order);
    }

    /// 让表面失效，直到下一次 `resize_swapchain`
    pub fn lose_surface(&mut self) {
        warn!("Headless surface marked as lost");
        self.swapchain.surface_lost = true;
    }

    /// 下一次资源分配返回 `OutOfMemory`
    pub fn fail_next_allocation(&mut self) {
        self.faults.allocation = true;
    }

    /// 下一次提交返回 `DeviceLost`
    pub fn fail_next_submit(&mut self) {
        self.faults.submit = true;
    }

    /// 已经执行呈现的图像索引，按呈现顺序
    pub fn presented_images(&self) -> Vec<u32> {
        lock(&self.shared.presented).clone()
    }

    /// 队列线程已经执行完的提交次数
    pub fn executed_submissions(&self) -> u64 {
        *lock(&self.shared.executed_submissions)
    }

    /// 读取缓冲区内容
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        lock(&self.shared.store).buffers.get(&buffer).map(|data| data.bytes.clone())
    }

    /// 读取纹理全部 mip 等级（按等级顺序拼接）
    pub fn read_texture(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        lock(&self.shared.store).texture_contents(texture)
    }

    /// 资源当前所处的状态（以 GPU 已执行的命令为准）
    pub fn resource_state(&self, resource: impl Into<ResourceRef>) -> Option<ResourceState> {
        let resource: ResourceRef = resource.into();
        lock(&self.shared.store).states.get(&resource).copied()
    }

    /// 仍然存活的缓冲区数量
    pub fn live_buffer_count(&self) -> usize {
        lock(&self.shared.store).buffers.len()
    }

    /// 仍然存活的纹理数量（包括交换链图像）
    pub fn live_texture_count(&self) -> usize {
        lock(&self.shared.store).textures.len()
    }

    /// 仍然存活的命令上下文数量
    pub fn live_context_count(&self) -> usize {
        self.contexts.len()
    }

    /// 执行命令时发现的资源状态错误
    pub fn validation_errors(&self) -> Vec<String> {
        lock(&self.shared.store).validation_errors.clone()
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(GraphicsError::invalid("Buffer size must be greater than 0").into());
        }
        self.take_allocation_fault("create_buffer")?;

        let handle = BufferHandle(self.allocate_id());
        lock(&self.shared.store).insert_buffer(handle, desc);
        debug!(buffer = handle.raw(), size = desc.size, name = ?desc.name, "Created buffer");
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mut store = lock(&self.shared.store);
        let target = store
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown buffer {:?}", buffer)))?;
        if target.desc.memory_type != MemoryType::HostVisible {
            return Err(GraphicsError::invalid("Only host-visible buffers can be written by the CPU").into());
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.bytes.len() {
            return Err(GraphicsError::invalid(format!(
                "Write of {} bytes at offset {} overruns buffer of {} bytes",
                data.len(),
                offset,
                target.bytes.len()
            ))
            .into());
        }
        target.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if !lock(&self.shared.store).remove_buffer(buffer) {
            warn!(buffer = buffer.raw(), "Destroying unknown buffer");
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(GraphicsError::invalid("Texture extent and mip count must be greater than 0").into());
        }
        self.take_allocation_fault("create_texture")?;

        let handle = TextureHandle(self.allocate_id());
        lock(&self.shared.store).insert_texture(handle, desc, ResourceState::Undefined);
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
        if !lock(&self.shared.store).remove_texture(texture) {
            warn!(texture = texture.raw(), "Destroying unknown texture");
        }
    }

    fn create_command_context(&mut self) -> Result<CommandContextId> {
        let id = CommandContextId(self.allocate_id());
        self.contexts.insert(id, ContextState::Reset);
        Ok(id)
    }

    fn destroy_command_context(&mut self, context: CommandContextId) {
        if let Some(ContextState::Submitted(value)) = self.contexts.remove(&context) {
            if self.shared.fence.completed() < value {
                warn!(context = context.0, fence = value, "Destroying a command context still in flight");
            }
        }
    }

    fn reset_command_context(&mut self, context: CommandContextId) -> Result<()> {
        let completed = self.shared.fence.completed();
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if let ContextState::Submitted(value) = state {
            if *value > completed {
                return Err(GraphicsError::invalid(format!(
                    "Command context reset while fence {} is pending (completed: {})",
                    value, completed
                ))
                .into());
            }
        }
        *state = ContextState::Reset;
        Ok(())
    }

    fn encode(&mut self, context: CommandContextId, commands: &CommandList) -> Result<()> {
        if commands.state() != CommandListState::Executable {
            return Err(GraphicsError::invalid("Command list must be ended before encoding").into());
        }
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        if !matches!(state, ContextState::Reset) {
            return Err(GraphicsError::invalid("Command context must be reset before encoding").into());
        }
        *state = ContextState::Encoded(commands.commands().to_vec());
        Ok(())
    }

    fn submit(&mut self, context: CommandContextId, signal: FenceValue, present_image: Option<u32>) -> Result<()> {
        if std::mem::take(&mut self.faults.submit) {
            return Err(GraphicsError::device_lost("submit", "injected failure").into());
        }
        if signal.value() <= self.last_signal {
            return Err(GraphicsError::invalid(format!(
                "Fence value {} does not advance the queue timeline (last: {})",
                signal, self.last_signal
            ))
            .into());
        }
        if let Some(index) = present_image {
            if !self.swapchain.held.get(index as usize).copied().unwrap_or(false) {
                return Err(GraphicsError::invalid(format!("Swapchain image {} was not acquired", index)).into());
            }
        }

        let state = self
            .contexts
            .get_mut(&context)
            .ok_or_else(|| GraphicsError::invalid(format!("Unknown command context {:?}", context)))?;
        let commands = match std::mem::replace(state, ContextState::Submitted(signal.value())) {
            ContextState::Encoded(commands) => commands,
            previous => {
                *state = previous;
                return Err(GraphicsError::invalid("Command context has nothing encoded").into());
            }
        };

        self.send(QueueOp::Execute {
            commands,
            signal: signal.value(),
        })?;
        self.last_signal = signal.value();
        Ok(())
    }

    fn completed_fence_value(&mut self) -> Result<FenceValue> {
        Ok(FenceValue::new(self.shared.fence.completed()))
    }

    fn wait_for_fence(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<bool> {
        if value.value() > self.last_signal {
            return Err(GraphicsError::invalid(format!(
                "Waiting for fence {} that was never submitted (last: {})",
                value, self.last_signal
            ))
            .into());
        }
        Ok(self.shared.fence.wait(value.value(), timeout))
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain.images.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> Result<TextureHandle> {
        self.swapchain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| GraphicsError::invalid(format!("Swapchain image {} out of range", index)).into())
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.swapchain.extent
    }

    fn acquire_next_image(&mut self, timeout: Option<Duration>) -> Result<u32> {
        if self.swapchain.surface_lost {
            return Err(GraphicsError::SurfaceLost.into());
        }

        let count = self.swapchain.images.len() as u32;
        let index = match self.swapchain.scripted.front().copied() {
            Some(index) if index < count && !self.swapchain.held[index as usize] => {
                self.swapchain.scripted.pop_front();
                index
            }
            Some(index) if index >= count => {
                self.swapchain.scripted.pop_front();
                return Err(GraphicsError::invalid(format!("Scripted image {} out of range", index)).into());
            }
            Some(_) => {
                return Err(GraphicsError::AcquireTimeout {
                    waited: timeout.unwrap_or_default(),
                }
                .into())
            }
            None => {
                let free = (0..count)
                    .map(|step| (self.swapchain.cursor + step) % count)
                    .find(|index| !self.swapchain.held[*index as usize]);
                match free {
                    Some(index) => {
                        self.swapchain.cursor = (index + 1) % count;
                        index
                    }
                    None => {
                        return Err(GraphicsError::AcquireTimeout {
                            waited: timeout.unwrap_or_default(),
                        }
                        .into())
                    }
                }
            }
        };

        self.swapchain.held[index as usize] = true;
        Ok(index)
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        if self.swapchain.surface_lost {
            return Err(GraphicsError::PresentLost.into());
        }
        match self.swapchain.held.get_mut(image_index as usize) {
            Some(held) if *held => *held = false,
            _ => {
                return Err(GraphicsError::invalid(format!(
                    "Presenting swapchain image {} that was not acquired",
                    image_index
                ))
                .into())
            }
        }
        self.send(QueueOp::Present { image_index })
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::invalid("Swapchain extent must be greater than 0").into());
        }
        self.wait_idle()?;
        self.create_swapchain_images(width, height);
        info!(width, height, "Headless swapchain recreated");
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        // 呈现操作排在最后一次提交之后，等队列清空而不只是等 fence
        let (done, finished) = mpsc::channel();
        self.send(QueueOp::Flush(done))?;
        finished
            .recv()
            .map_err(|_| GraphicsError::device_lost("wait_idle", "headless queue thread exited"))?;
        Ok(())
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        // 暂停中的队列线程无法退出
        self.control.resume();
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Headless GPU queue thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::BufferUsageType;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(HeadlessOptions::default()).unwrap()
    }

    #[test]
    fn test_acquire_is_round_robin_by_default() {
        let mut backend = backend();
        for expected in [0, 1, 2, 0] {
            let index = backend.acquire_next_image(None).unwrap();
            assert_eq!(index, expected);
            backend.present(index).unwrap();
        }
    }

    #[test]
    fn test_scripted_acquire_order() {
        let mut backend = backend();
        backend.script_acquire_order([2, 0]);
        assert_eq!(backend.acquire_next_image(None).unwrap(), 2);
        // 图像 0 可用，脚本继续
        assert_eq!(backend.acquire_next_image(None).unwrap(), 0);
        // 脚本耗尽后回到轮转，跳过仍被持有的图像
        assert_eq!(backend.acquire_next_image(None).unwrap(), 1);
        assert!(backend.acquire_next_image(Some(Duration::from_millis(1))).is_err());
    }

    #[test]
    fn test_lost_surface_until_resize() {
        let mut backend = backend();
        backend.lose_surface();
        let err = backend.acquire_next_image(None).unwrap_err();
        assert_eq!(err.as_graphics(), Some(&GraphicsError::SurfaceLost));

        backend.resize_swapchain(32, 16).unwrap();
        assert_eq!(backend.swapchain_extent(), (32, 16));
        assert!(backend.acquire_next_image(None).is_ok());
    }

    #[test]
    fn test_submit_executes_and_signals() {
        let mut backend = backend();
        let staging = backend.create_buffer(&BufferDescriptor::staging(4)).unwrap();
        let target = backend
            .create_buffer(&BufferDescriptor::device_local(4, BufferUsageType::Vertex))
            .unwrap();
        backend.write_buffer(staging, 0, &[9, 8, 7, 6]).unwrap();

        let mut list = CommandList::new();
        list.begin().unwrap();
        list.transition(target, ResourceState::Undefined, ResourceState::CopyDest).unwrap();
        list.copy_buffer(staging, 0, target, 0, 4).unwrap();
        list.transition(target, ResourceState::CopyDest, ResourceState::VertexBuffer).unwrap();
        list.end().unwrap();

        let context = backend.create_command_context().unwrap();
        backend.encode(context, &list).unwrap();
        backend.submit(context, FenceValue::new(1), None).unwrap();
        assert!(backend.wait_for_fence(FenceValue::new(1), None).unwrap());

        assert_eq!(backend.read_buffer(target).unwrap(), vec![9, 8, 7, 6]);
        assert_eq!(backend.resource_state(target), Some(ResourceState::VertexBuffer));
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn test_reset_rejected_while_in_flight() {
        let mut backend = backend();
        let control = backend.gpu_control();
        control.pause();

        let mut list = CommandList::new();
        list.begin().unwrap();
        list.end().unwrap();

        let context = backend.create_command_context().unwrap();
        backend.encode(context, &list).unwrap();
        backend.submit(context, FenceValue::new(1), None).unwrap();
        assert!(backend.reset_command_context(context).is_err());

        control.resume();
        backend.wait_idle().unwrap();
        backend.reset_command_context(context).unwrap();
    }

    #[test]
    fn test_fence_values_must_advance() {
        let mut backend = backend();
        let mut list = CommandList::new();
        list.begin().unwrap();
        list.end().unwrap();

        let context = backend.create_command_context().unwrap();
        backend.encode(context, &list).unwrap();
        assert!(backend.submit(context, FenceValue::ZERO, None).is_err());
        backend.submit(context, FenceValue::new(1), None).unwrap();
    }
}
