//! GPU 同步机制模块
//!
//! 提供队列级别的 Fence 时间线，用于 CPU-GPU 同步。
//!
//! 整个图形队列只有一条时间线：每次提交（帧提交和资源上传）都分配
//! `上一次的值 + 1`，提交完成后 GPU 把 fence 推进到该值。
//! 帧槽位和交换链图像只记录自己最近一次提交对应的值，
//! 因此每个槽位观察到的值序列同样严格递增。

use std::sync::atomic::{AtomicU64, Ordering};

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 时间线的起点，任何提交都不会使用
    pub const ZERO: FenceValue = FenceValue(0);

    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for FenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fence 管理器
///
/// CPU 侧的时间线簿记：发放新的 fence 值，并缓存后端最近一次报告的完成值，
/// 避免对已知完成的值再次查询后端。
///
/// # 示例
///
/// ```rust
/// use frame_orchestrator::renderer::sync::FenceManager;
///
/// let fences = FenceManager::new();
/// let value = fences.next_value();
/// // backend.submit(ctx, value, None)?;
/// fences.update_completed_value(value);
/// assert!(fences.is_completed(value));
/// ```
#[derive(Debug, Default)]
pub struct FenceManager {
    /// 最近一次发放的Fence值（CPU侧）
    current_value: AtomicU64,
    /// 已知完成的Fence值（GPU侧）
    completed_value: AtomicU64,
}

impl FenceManager {
    /// 创建新的Fence管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次发放的Fence值
    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    /// 已知完成的Fence值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.completed_value.load(Ordering::Acquire))
    }

    /// 获取下一个Fence值并递增计数器
    pub fn next_value(&self) -> FenceValue {
        let value = self.current_value.fetch_add(1, Ordering::AcqRel);
        FenceValue::new(value + 1)
    }

    /// 把提交失败时分配出去的值还回时间线
    ///
    /// 只有当 `value` 是最近一次发放的值时才生效，否则时间线上会留下空洞。
    pub fn rollback(&self, value: FenceValue) {
        let _ = self.current_value.compare_exchange(
            value.value(),
            value.value().saturating_sub(1),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 更新已完成的Fence值
    ///
    /// 完成值只会前进，较旧的报告会被忽略。
    pub fn update_completed_value(&self, value: FenceValue) {
        self.completed_value.fetch_max(value.value(), Ordering::AcqRel);
    }

    /// 检查特定Fence值是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// 是否所有发放过的值都已完成
    pub fn is_idle(&self) -> bool {
        self.completed_value() >= self.current_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);

        let next = fence.next();
        assert_eq!(next.value(), 2);
        assert_eq!(fence.value(), 1); // 原值不变
        assert_eq!(FenceValue::default(), FenceValue::ZERO);
    }

    #[test]
    fn test_fence_manager() {
        let manager = FenceManager::new();

        assert_eq!(manager.current_value().value(), 0);
        assert_eq!(manager.completed_value().value(), 0);
        assert!(manager.is_idle());

        let v1 = manager.next_value();
        assert_eq!(v1.value(), 1);
        assert_eq!(manager.current_value().value(), 1);

        let v2 = manager.next_value();
        assert_eq!(v2.value(), 2);
        assert!(!manager.is_idle());

        // 模拟GPU完成
        manager.update_completed_value(v1);
        assert!(manager.is_completed(v1));
        assert!(!manager.is_completed(v2));

        manager.update_completed_value(v2);
        assert!(manager.is_completed(v2));
        assert!(manager.is_idle());
    }

    #[test]
    fn test_completed_value_never_regresses() {
        let manager = FenceManager::new();
        manager.update_completed_value(FenceValue::new(5));
        manager.update_completed_value(FenceValue::new(3));
        assert_eq!(manager.completed_value(), FenceValue::new(5));
    }

    #[test]
    fn test_rollback_only_latest_value() {
        let manager = FenceManager::new();
        let v1 = manager.next_value();
        let v2 = manager.next_value();

        manager.rollback(v1);
        assert_eq!(manager.current_value(), v2);

        manager.rollback(v2);
        assert_eq!(manager.current_value(), v1);
        assert_eq!(manager.next_value(), v2);
    }

    #[test]
    fn test_fence_ordering() {
        let f1 = FenceValue::new(1);
        let f2 = FenceValue::new(2);
        let f3 = FenceValue::new(1);

        assert!(f1 < f2);
        assert!(f2 > f1);
        assert_eq!(f1, f3);
    }
}
