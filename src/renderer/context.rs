//! 渲染上下文
//!
//! `RendererContext` 持有图形后端（设备、队列、交换链）和队列 fence 时间线，
//! 以显式参数的形式传给帧编排器和资源上传的每一个操作。

use std::time::Duration;

use tracing::trace;

use crate::core::error::Result;
use crate::gfx::backend::{CommandContextId, GraphicsBackend};

use super::sync::{FenceManager, FenceValue};

/// 等待 fence 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 调用时已经完成，没有阻塞
    AlreadyComplete,
    /// 阻塞等待后完成
    Waited,
    /// 超时
    TimedOut,
}

impl WaitOutcome {
    pub fn is_complete(&self) -> bool {
        !matches!(self, WaitOutcome::TimedOut)
    }
}

/// 渲染上下文
pub struct RendererContext<B: GraphicsBackend> {
    backend: B,
    fences: FenceManager,
}

impl<B: GraphicsBackend> RendererContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            fences: FenceManager::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// 队列 fence 时间线
    pub fn fences(&self) -> &FenceManager {
        &self.fences
    }

    /// 用下一个 fence 值提交命令上下文
    ///
    /// 提交失败时该值归还时间线，后续提交不会留下永远不会完成的值。
    pub fn submit(&mut self, context: CommandContextId, present_image: Option<u32>) -> Result<FenceValue> {
        let value = self.fences.next_value();
        if let Err(err) = self.backend.submit(context, value, present_image) {
            self.fences.rollback(value);
            return Err(err);
        }
        trace!(fence = value.value(), image = ?present_image, "Submitted command context");
        Ok(value)
    }

    /// 检查 fence 值是否已完成，必要时向后端查询
    pub fn is_completed(&mut self, value: FenceValue) -> Result<bool> {
        if self.fences.is_completed(value) {
            return Ok(true);
        }
        let completed = self.backend.completed_fence_value()?;
        self.fences.update_completed_value(completed);
        Ok(completed >= value)
    }

    /// 等待 fence 值完成
    ///
    /// `timeout` 为 `None` 时无限等待。
    pub fn wait_for(&mut self, value: FenceValue, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if self.is_completed(value)? {
            return Ok(WaitOutcome::AlreadyComplete);
        }
        if self.backend.wait_for_fence(value, timeout)? {
            self.fences.update_completed_value(value);
            Ok(WaitOutcome::Waited)
        } else {
            Ok(WaitOutcome::TimedOut)
        }
    }

    /// 等待所有已发放的 fence 值完成
    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.fences.update_completed_value(self.fences.current_value());
        Ok(())
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessBackend, HeadlessOptions};
    use crate::renderer::command::CommandList;

    fn submit_empty(ctx: &mut RendererContext<HeadlessBackend>, context: CommandContextId) -> FenceValue {
        let mut list = CommandList::new();
        list.begin().unwrap();
        list.end().unwrap();
        ctx.backend_mut().reset_command_context(context).unwrap();
        ctx.backend_mut().encode(context, &list).unwrap();
        ctx.submit(context, None).unwrap()
    }

    #[test]
    fn test_submissions_share_one_timeline() {
        let mut ctx = RendererContext::new(HeadlessBackend::new(HeadlessOptions::default()).unwrap());
        let a = ctx.backend_mut().create_command_context().unwrap();
        let b = ctx.backend_mut().create_command_context().unwrap();

        assert_eq!(submit_empty(&mut ctx, a), FenceValue::new(1));
        assert_eq!(submit_empty(&mut ctx, b), FenceValue::new(2));
        ctx.wait_idle().unwrap();
        assert_eq!(submit_empty(&mut ctx, a), FenceValue::new(3));
    }

    #[test]
    fn test_failed_submit_returns_value() {
        let mut ctx = RendererContext::new(HeadlessBackend::new(HeadlessOptions::default()).unwrap());
        let context = ctx.backend_mut().create_command_context().unwrap();

        ctx.backend_mut().fail_next_submit();
        let mut list = CommandList::new();
        list.begin().unwrap();
        list.end().unwrap();
        ctx.backend_mut().encode(context, &list).unwrap();
        assert!(ctx.submit(context, None).is_err());
        assert_eq!(ctx.fences().current_value(), FenceValue::ZERO);

        assert_eq!(ctx.submit(context, None).unwrap(), FenceValue::new(1));
    }

    #[test]
    fn test_wait_outcomes() {
        let mut ctx = RendererContext::new(HeadlessBackend::new(HeadlessOptions::default()).unwrap());
        let context = ctx.backend_mut().create_command_context().unwrap();
        let control = ctx.backend().gpu_control();

        control.pause();
        let value = submit_empty(&mut ctx, context);
        assert_eq!(
            ctx.wait_for(value, Some(Duration::from_millis(10))).unwrap(),
            WaitOutcome::TimedOut
        );

        control.resume();
        assert!(ctx.wait_for(value, None).unwrap().is_complete());
        assert_eq!(ctx.wait_for(value, None).unwrap(), WaitOutcome::AlreadyComplete);
    }
}
