//! 帧编排器
//!
//! 驱动每一帧的 获取图像 → 录制命令 → 提交 → 呈现 流程，
//! 并保证 CPU 不会改写 GPU 仍在使用的资源。
//!
//! # 帧槽位
//!
//! N 个帧槽位（N = 缓冲数量，至少为 2）轮转使用，每个槽位拥有一个命令上下文
//! 和它最近一次提交的 fence 值。槽位状态：
//!
//! ```text
//! Idle → Recording → Submitted → Presented → Idle
//! ```
//!
//! 槽位在被再次选中、且它上一次提交的 fence 值已经完成时回到 `Idle`。
//!
//! # 同步
//!
//! `begin_frame` 依次等待两个条件：所选槽位的上一次提交完成，
//! 以及呈现引擎返回的图像上一次被写入的提交完成。两者都在调用方给定的期限内进行，
//! 超时返回 `AcquireTimeout`。如果图像已经获取但等待超时，该图像会留给下一次调用，
//! 呈现引擎交出的图像不会丢失。

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CommandContextId, GraphicsBackend};

use super::command::CommandList;
use super::context::{RendererContext, WaitOutcome};
use super::resource::TextureHandle;
use super::swapchain::SwapchainImages;
use super::sync::FenceValue;

/// 帧槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Presented,
}

/// 帧槽位
#[derive(Debug)]
struct FrameSlot {
    context: CommandContextId,
    state: SlotState,
    /// 当前帧的命令是否已经录制
    recorded: bool,
    /// 最近一次提交的 fence 值
    last_fence: Option<FenceValue>,
}

/// 一次 `begin_frame` 返回的帧句柄
///
/// 句柄只对产生它的那一帧有效，之后的 `record_commands`、`submit`、`present`
/// 都会核对句柄与当前帧是否一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle {
    slot: usize,
    image_index: u32,
    image: TextureHandle,
    frame_number: u64,
    wait_target: Option<FenceValue>,
    blocked: bool,
}

impl FrameHandle {
    /// 帧槽位索引
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// 交换链图像索引
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// 交换链图像对应的纹理
    pub fn target(&self) -> TextureHandle {
        self.image
    }

    /// 帧序号，从 1 开始
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// 本帧开始前需要完成的 fence 值（槽位和图像两者中较大的一个）
    ///
    /// 槽位和图像都从未被使用过时为 `None`。
    pub fn wait_target(&self) -> Option<FenceValue> {
        self.wait_target
    }

    /// 本帧开始前是否真正阻塞等待过 GPU
    pub fn blocked(&self) -> bool {
        self.blocked
    }
}

/// 帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_begun: u64,
    pub frames_submitted: u64,
    pub frames_presented: u64,
    /// 开始后未提交、被下一次 `begin_frame` 丢弃的帧
    pub frames_discarded: u64,
    /// 真正阻塞等待 GPU 的次数
    pub blocking_waits: u64,
}

/// 帧编排器
pub struct FrameOrchestrator {
    slots: Vec<FrameSlot>,
    images: SwapchainImages,
    next_slot: usize,
    frame_number: u64,
    /// 已经获取、但因等待超时没有交给调用方的图像
    parked_image: Option<u32>,
    /// 已经开始、尚未呈现的帧
    current: Option<FrameHandle>,
    stats: FrameStats,
}

impl FrameOrchestrator {
    /// 创建编排器，为每个槽位创建一个命令上下文
    pub fn new<B: GraphicsBackend>(ctx: &mut RendererContext<B>, buffering_count: usize) -> Result<Self> {
        if buffering_count < 2 {
            return Err(GraphicsError::invalid(format!(
                "At least 2 frame slots required (got {})",
                buffering_count
            ))
            .into());
        }

        let mut slots: Vec<FrameSlot> = Vec::with_capacity(buffering_count);
        for _ in 0..buffering_count {
            let context = match ctx.backend_mut().create_command_context() {
                Ok(context) => context,
                Err(err) => {
                    for slot in &slots {
                        ctx.backend_mut().destroy_command_context(slot.context);
                    }
                    return Err(err);
                }
            };
            slots.push(FrameSlot {
                context,
                state: SlotState::Idle,
                recorded: false,
                last_fence: None,
            });
        }

        let images = SwapchainImages::new(ctx.backend().swapchain_image_count());
        debug!(
            slots = buffering_count,
            images = images.len(),
            backend = ctx.backend().name(),
            "Frame orchestrator created"
        );

        Ok(Self {
            slots,
            images,
            next_slot: 0,
            frame_number: 0,
            parked_image: None,
            current: None,
            stats: FrameStats::default(),
        })
    }

    /// 开始新的一帧
    ///
    /// `timeout` 为 `None` 时无限等待。超时或表面失效时返回错误，
    /// 槽位选择和帧序号都不会改变，可以直接重试。
    pub fn begin_frame<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RendererContext<B>,
        timeout: Option<Duration>,
    ) -> Result<FrameHandle> {
        if self.slots.is_empty() {
            return Err(GraphicsError::invalid("Frame orchestrator already destroyed").into());
        }

        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);

        self.discard_unsubmitted();

        let slot_index = self.next_slot;
        let mut blocked = false;

        // 1. 槽位上一次的提交必须完成
        let slot_target = self.slots[slot_index].last_fence;
        if let Some(value) = slot_target {
            match ctx.wait_for(value, remaining(deadline))? {
                WaitOutcome::TimedOut => {
                    debug!(slot = slot_index, fence = value.value(), "Timed out waiting for frame slot");
                    return Err(GraphicsError::AcquireTimeout { waited: started.elapsed() }.into());
                }
                WaitOutcome::Waited => blocked = true,
                WaitOutcome::AlreadyComplete => {}
            }
        }

        // 2. 获取交换链图像（优先使用上一次留下的图像）
        let image_index = match self.parked_image {
            Some(index) => index,
            None => ctx.backend_mut().acquire_next_image(remaining(deadline))?,
        };

        // 3. 图像上一次被写入的提交必须完成
        let image_target = self.images.wait_target(image_index);
        if let Some(value) = image_target {
            match ctx.wait_for(value, remaining(deadline))? {
                WaitOutcome::TimedOut => {
                    debug!(
                        image = image_index,
                        fence = value.value(),
                        "Timed out waiting for swapchain image, keeping it for the next frame"
                    );
                    self.parked_image = Some(image_index);
                    return Err(GraphicsError::AcquireTimeout { waited: started.elapsed() }.into());
                }
                WaitOutcome::Waited => blocked = true,
                WaitOutcome::AlreadyComplete => {}
            }
        }

        let image = match ctx.backend().swapchain_image(image_index) {
            Ok(image) => image,
            Err(err) => {
                self.parked_image = Some(image_index);
                return Err(err);
            }
        };
        self.parked_image = None;
        self.images.retire(ctx.fences().completed_value());

        let slot = &mut self.slots[slot_index];
        slot.state = SlotState::Recording;
        slot.recorded = false;

        self.next_slot = (slot_index + 1) % self.slots.len();
        self.frame_number += 1;
        self.stats.frames_begun += 1;
        if blocked {
            self.stats.blocking_waits += 1;
            debug!(
                frame = self.frame_number,
                slot = slot_index,
                waited_us = started.elapsed().as_micros() as u64,
                "Blocked on GPU before starting frame"
            );
        }

        let handle = FrameHandle {
            slot: slot_index,
            image_index,
            image,
            frame_number: self.frame_number,
            wait_target: slot_target.max(image_target),
            blocked,
        };
        self.current = Some(handle);

        trace!(
            frame = handle.frame_number,
            slot = slot_index,
            image = image_index,
            wait_target = ?handle.wait_target,
            "Frame begun"
        );
        Ok(handle)
    }

    /// 录制当前帧的命令
    ///
    /// 先重置槽位的命令上下文，再在新的命令列表上运行 `record`，
    /// 结束后交给后端编码。同一帧可以重复录制，后一次覆盖前一次。
    pub fn record_commands<B, F>(&mut self, ctx: &mut RendererContext<B>, handle: &FrameHandle, record: F) -> Result<()>
    where
        B: GraphicsBackend,
        F: FnOnce(&mut CommandList) -> Result<()>,
    {
        self.check_current(handle, SlotState::Recording, "record_commands")?;
        let slot = &mut self.slots[handle.slot];

        ctx.backend_mut().reset_command_context(slot.context)?;
        slot.recorded = false;

        let mut commands = CommandList::new();
        commands.begin()?;
        record(&mut commands)?;
        commands.end()?;

        ctx.backend_mut().encode(slot.context, &commands)?;
        slot.recorded = true;

        trace!(frame = handle.frame_number, commands = commands.len(), "Frame recorded");
        Ok(())
    }

    /// 提交当前帧，返回本次提交的 fence 值
    ///
    /// 不在 CPU 上等待 GPU。
    pub fn submit<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>, handle: &FrameHandle) -> Result<FenceValue> {
        self.check_current(handle, SlotState::Recording, "submit")?;
        if !self.slots[handle.slot].recorded {
            return Err(GraphicsError::invalid(format!(
                "Frame {} submitted before recording commands",
                handle.frame_number
            ))
            .into());
        }

        let slot = &mut self.slots[handle.slot];
        let value = ctx.submit(slot.context, Some(handle.image_index))?;
        slot.last_fence = Some(value);
        slot.state = SlotState::Submitted;
        self.images.mark_in_flight(handle.image_index, value);
        self.stats.frames_submitted += 1;

        trace!(frame = handle.frame_number, fence = value.value(), "Frame submitted");
        Ok(value)
    }

    /// 呈现当前帧
    ///
    /// 表面失效时返回 `PresentLost`，该帧视为结束，调用方需要重建交换链。
    pub fn present<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>, handle: &FrameHandle) -> Result<()> {
        self.check_current(handle, SlotState::Submitted, "present")?;

        let result = ctx.backend_mut().present(handle.image_index);
        self.slots[handle.slot].state = SlotState::Presented;
        self.current = None;
        result?;

        self.stats.frames_presented += 1;
        trace!(frame = handle.frame_number, image = handle.image_index, "Frame presented");
        Ok(())
    }

    /// 等待所有提交完成，所有槽位回到 `Idle`
    pub fn wait_idle<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>) -> Result<()> {
        ctx.wait_idle()?;
        self.discard_unsubmitted();
        for slot in &mut self.slots {
            if slot.state != SlotState::Recording {
                slot.state = SlotState::Idle;
            }
        }
        self.images.retire(ctx.fences().completed_value());
        Ok(())
    }

    /// 交换链重建后调用
    ///
    /// 调用前所有引用旧交换链图像的提交必须已经完成。
    pub fn on_swapchain_rebuilt(&mut self, image_count: u32) {
        self.discard_unsubmitted();
        self.parked_image = None;
        self.images.reset(image_count);
        debug!(images = image_count, "Frame orchestrator reset swapchain image tracking");
    }

    /// 销毁所有槽位的命令上下文
    ///
    /// 调用前 GPU 必须空闲。
    pub fn destroy<B: GraphicsBackend>(&mut self, ctx: &mut RendererContext<B>) {
        for slot in self.slots.drain(..) {
            ctx.backend_mut().destroy_command_context(slot.context);
        }
        self.current = None;
        self.parked_image = None;
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|slot| slot.state)
    }

    /// 下一次 `begin_frame` 将使用的槽位
    pub fn next_slot(&self) -> usize {
        self.next_slot
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// 开始后未提交的帧回到 `Idle`，它的图像留给下一帧，槽位也重新使用
    fn discard_unsubmitted(&mut self) {
        let Some(handle) = self.current else {
            return;
        };
        let slot = &mut self.slots[handle.slot];
        if slot.state != SlotState::Recording {
            return;
        }

        warn!(frame = handle.frame_number, slot = handle.slot, "Discarding a frame that was never submitted");
        slot.state = SlotState::Idle;
        slot.recorded = false;
        self.current = None;
        self.parked_image = Some(handle.image_index);
        self.next_slot = handle.slot;
        self.stats.frames_discarded += 1;
    }

    fn check_current(&self, handle: &FrameHandle, expected: SlotState, operation: &str) -> Result<()> {
        if self.current.as_ref() != Some(handle) {
            return Err(GraphicsError::invalid(format!(
                "{}: frame handle {} is not the current frame",
                operation, handle.frame_number
            ))
            .into());
        }
        let state = self.slots[handle.slot].state;
        if state != expected {
            return Err(GraphicsError::invalid(format!(
                "{}: frame slot {} is {:?}, expected {:?}",
                operation, handle.slot, state, expected
            ))
            .into());
        }
        Ok(())
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessBackend, HeadlessOptions};
    use crate::renderer::resource::ResourceState;

    const SHORT: Option<Duration> = Some(Duration::from_millis(20));

    fn setup(slots: usize, images: u32) -> (RendererContext<HeadlessBackend>, FrameOrchestrator) {
        let backend = HeadlessBackend::new(HeadlessOptions {
            image_count: images,
            ..HeadlessOptions::default()
        })
        .unwrap();
        let mut ctx = RendererContext::new(backend);
        let frames = FrameOrchestrator::new(&mut ctx, slots).unwrap();
        (ctx, frames)
    }

    fn clear_frame(commands: &mut CommandList, handle: &FrameHandle) -> Result<()> {
        commands.transition(handle.target(), ResourceState::Present, ResourceState::RenderTarget)?;
        commands.begin_render_pass(handle.target(), Some([0.2, 0.4, 0.6, 1.0]))?;
        commands.end_render_pass()?;
        commands.transition(handle.target(), ResourceState::RenderTarget, ResourceState::Present)
    }

    fn run_frame(
        ctx: &mut RendererContext<HeadlessBackend>,
        frames: &mut FrameOrchestrator,
        timeout: Option<Duration>,
    ) -> Result<FrameHandle> {
        let handle = frames.begin_frame(ctx, timeout)?;
        frames.record_commands(ctx, &handle, |commands| clear_frame(commands, &handle))?;
        frames.submit(ctx, &handle)?;
        frames.present(ctx, &handle)?;
        Ok(handle)
    }

    fn expect_timeout(result: Result<FrameHandle>) {
        match result {
            Err(err) => assert!(matches!(err.as_graphics(), Some(GraphicsError::AcquireTimeout { .. }))),
            Ok(handle) => panic!("expected a timeout, got frame {}", handle.frame_number()),
        }
    }

    #[test]
    fn test_rejects_single_buffering() {
        let mut ctx = RendererContext::new(HeadlessBackend::new(HeadlessOptions::default()).unwrap());
        assert!(FrameOrchestrator::new(&mut ctx, 1).is_err());
    }

    #[test]
    fn test_wait_targets_for_triple_buffering() {
        let (mut ctx, mut frames) = setup(3, 3);

        let targets: Vec<Option<u64>> = (0..5)
            .map(|_| run_frame(&mut ctx, &mut frames, None).unwrap())
            .map(|handle| handle.wait_target().map(|value| value.value()))
            .collect();

        assert_eq!(targets, vec![None, None, None, Some(1), Some(2)]);
        frames.wait_idle(&mut ctx).unwrap();
        assert!(ctx.backend().validation_errors().is_empty());
    }

    #[test]
    fn test_slots_are_reused_round_robin() {
        let (mut ctx, mut frames) = setup(2, 2);
        let slots: Vec<usize> = (0..5)
            .map(|_| run_frame(&mut ctx, &mut frames, None).unwrap().slot())
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_busy_slot_times_out_until_gpu_progresses() {
        let (mut ctx, mut frames) = setup(2, 2);
        let control = ctx.backend().gpu_control();
        control.pause();

        run_frame(&mut ctx, &mut frames, None).unwrap();
        run_frame(&mut ctx, &mut frames, None).unwrap();

        // 第 N+1 帧需要第 1 帧的 fence
        expect_timeout(run_frame(&mut ctx, &mut frames, SHORT));
        assert_eq!(frames.frame_number(), 2);
        assert_eq!(frames.next_slot(), 0);
        assert_eq!(frames.slot_state(0), Some(SlotState::Presented));

        control.release(1);
        let handle = frames.begin_frame(&mut ctx, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(handle.slot(), 0);
        assert_eq!(handle.wait_target(), Some(FenceValue::new(1)));
        assert_eq!(handle.frame_number(), 3);

        control.resume();
        frames.record_commands(&mut ctx, &handle, |commands| clear_frame(commands, &handle)).unwrap();
        frames.submit(&mut ctx, &handle).unwrap();
        frames.present(&mut ctx, &handle).unwrap();
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_blocking_wait_is_reported() {
        let backend = HeadlessBackend::new(HeadlessOptions {
            image_count: 2,
            gpu_latency: Duration::from_millis(30),
            ..HeadlessOptions::default()
        })
        .unwrap();
        let mut ctx = RendererContext::new(backend);
        let mut frames = FrameOrchestrator::new(&mut ctx, 2).unwrap();

        run_frame(&mut ctx, &mut frames, None).unwrap();
        run_frame(&mut ctx, &mut frames, None).unwrap();
        let third = run_frame(&mut ctx, &mut frames, None).unwrap();

        // 第一帧的模拟执行需要 30ms，第三帧开始时一定还没有完成
        assert!(third.blocked());
        assert_eq!(frames.stats().blocking_waits, 1);
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_presentation_follows_submission_order() {
        let (mut ctx, mut frames) = setup(3, 3);
        ctx.backend_mut().script_acquire_order([1, 0, 2, 2, 0, 1]);

        let mut submitted = Vec::new();
        for _ in 0..8 {
            submitted.push(run_frame(&mut ctx, &mut frames, None).unwrap().image_index());
        }
        frames.wait_idle(&mut ctx).unwrap();

        assert_eq!(&submitted[..6], &[1, 0, 2, 2, 0, 1]);
        assert_eq!(ctx.backend().presented_images(), submitted);
        assert_eq!(frames.stats().frames_presented, 8);
    }

    #[test]
    fn test_image_fence_tracked_independently_of_slot() {
        let (mut ctx, mut frames) = setup(3, 3);
        ctx.backend_mut().script_acquire_order([0, 1, 2, 2]);

        for _ in 0..3 {
            run_frame(&mut ctx, &mut frames, None).unwrap();
        }

        // 第 4 帧使用槽位 0（fence 1），但呈现引擎交回的是图像 2（fence 3）
        let handle = run_frame(&mut ctx, &mut frames, None).unwrap();
        assert_eq!(handle.slot(), 0);
        assert_eq!(handle.image_index(), 2);
        assert_eq!(handle.wait_target(), Some(FenceValue::new(3)));
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_image_kept_after_timeout() {
        let (mut ctx, mut frames) = setup(2, 3);
        let control = ctx.backend().gpu_control();
        control.pause();

        run_frame(&mut ctx, &mut frames, None).unwrap(); // 槽位 0，图像 0，fence 1
        run_frame(&mut ctx, &mut frames, None).unwrap(); // 槽位 1，图像 1，fence 2
        control.release(1);
        ctx.wait_for(FenceValue::new(1), None).unwrap();

        // 槽位 0 空闲，但呈现引擎交回仍在使用的图像 1
        ctx.backend_mut().script_acquire_order([1]);
        expect_timeout(frames.begin_frame(&mut ctx, SHORT));
        // 再次尝试不会重新获取图像
        expect_timeout(frames.begin_frame(&mut ctx, SHORT));

        control.resume();
        let handle = frames.begin_frame(&mut ctx, None).unwrap();
        assert_eq!(handle.image_index(), 1);
        assert_eq!(handle.slot(), 0);
        assert_eq!(handle.wait_target(), Some(FenceValue::new(2)));
    }

    #[test]
    fn test_surface_lost_leaves_state_untouched() {
        let (mut ctx, mut frames) = setup(3, 3);
        run_frame(&mut ctx, &mut frames, None).unwrap();

        ctx.backend_mut().lose_surface();
        let err = frames.begin_frame(&mut ctx, None).unwrap_err();
        assert!(err.as_graphics().map_or(false, |e| e.needs_swapchain_rebuild()));
        assert_eq!(frames.next_slot(), 1);
        assert_eq!(frames.frame_number(), 1);
        assert_eq!(frames.stats().frames_begun, 1);

        // 重建之后与从未失败过一样
        frames.wait_idle(&mut ctx).unwrap();
        ctx.backend_mut().resize_swapchain(32, 32).unwrap();
        frames.on_swapchain_rebuilt(ctx.backend().swapchain_image_count());

        let handle = run_frame(&mut ctx, &mut frames, None).unwrap();
        assert_eq!(handle.slot(), 1);
        assert_eq!(handle.image_index(), 0);
        assert_eq!(handle.wait_target(), None);
        frames.wait_idle(&mut ctx).unwrap();
        assert!(ctx.backend().validation_errors().is_empty());
    }

    #[test]
    fn test_present_lost_ends_frame() {
        let (mut ctx, mut frames) = setup(2, 2);
        let handle = frames.begin_frame(&mut ctx, None).unwrap();
        frames.record_commands(&mut ctx, &handle, |commands| clear_frame(commands, &handle)).unwrap();
        frames.submit(&mut ctx, &handle).unwrap();

        ctx.backend_mut().lose_surface();
        let err = frames.present(&mut ctx, &handle).unwrap_err();
        assert_eq!(err.as_graphics(), Some(&GraphicsError::PresentLost));
        assert_eq!(frames.slot_state(0), Some(SlotState::Presented));
        assert!(frames.present(&mut ctx, &handle).is_err());
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_unsubmitted_frame_is_discarded() {
        let (mut ctx, mut frames) = setup(2, 2);
        let abandoned = frames.begin_frame(&mut ctx, None).unwrap();
        frames.record_commands(&mut ctx, &abandoned, |commands| clear_frame(commands, &abandoned)).unwrap();

        let handle = frames.begin_frame(&mut ctx, None).unwrap();
        assert_eq!(handle.slot(), abandoned.slot());
        assert_eq!(handle.image_index(), abandoned.image_index());
        assert_eq!(frames.stats().frames_discarded, 1);

        // 旧句柄失效
        assert!(frames.submit(&mut ctx, &abandoned).is_err());
        frames.record_commands(&mut ctx, &handle, |commands| clear_frame(commands, &handle)).unwrap();
        frames.submit(&mut ctx, &handle).unwrap();
        frames.present(&mut ctx, &handle).unwrap();
        frames.wait_idle(&mut ctx).unwrap();
        assert_eq!(ctx.backend().presented_images(), vec![abandoned.image_index()]);
    }

    #[test]
    fn test_out_of_order_calls_are_invalid() {
        let (mut ctx, mut frames) = setup(2, 2);
        let handle = frames.begin_frame(&mut ctx, None).unwrap();

        // 未录制不能提交
        let err = frames.submit(&mut ctx, &handle).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::InvalidArgument(_))));
        // 未提交不能呈现
        assert!(frames.present(&mut ctx, &handle).is_err());

        // 录制失败后不能提交
        assert!(frames
            .record_commands(&mut ctx, &handle, |commands| commands.end_render_pass())
            .is_err());
        assert!(frames.submit(&mut ctx, &handle).is_err());

        // 渲染通道没有结束
        assert!(frames
            .record_commands(&mut ctx, &handle, |commands| commands.begin_render_pass(handle.target(), None))
            .is_err());

        frames.record_commands(&mut ctx, &handle, |commands| clear_frame(commands, &handle)).unwrap();
        frames.submit(&mut ctx, &handle).unwrap();
        // 重复提交
        assert!(frames.submit(&mut ctx, &handle).is_err());
        frames.present(&mut ctx, &handle).unwrap();
        frames.wait_idle(&mut ctx).unwrap();
    }

    #[test]
    fn test_wait_idle_returns_slots_to_idle() {
        let (mut ctx, mut frames) = setup(3, 3);
        for _ in 0..4 {
            run_frame(&mut ctx, &mut frames, None).unwrap();
        }
        frames.wait_idle(&mut ctx).unwrap();
        assert!((0..3).all(|slot| frames.slot_state(slot) == Some(SlotState::Idle)));
        assert!(ctx.fences().is_idle());

        let stats = frames.stats();
        assert_eq!(stats.frames_begun, 4);
        assert_eq!(stats.frames_submitted, 4);
        assert_eq!(stats.frames_presented, 4);
    }
}
