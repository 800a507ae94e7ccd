//! 模拟图形队列
//!
//! 一个工作线程按提交顺序消费队列操作，模拟异步执行的 GPU：
//! 执行命令列表，然后把 fence 推进到提交时给定的值；呈现操作只记录图像索引。
//!
//! [`GpuControl`] 可以暂停 GPU 并按次数放行提交，测试用它构造
//! "GPU 尚未完成" 的场景。

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::renderer::command::Command;

use super::store::ResourceStore;

/// 队列操作
pub(crate) enum QueueOp {
    /// 执行命令并推进 fence
    Execute { commands: Vec<Command>, signal: u64 },
    /// 呈现交换链图像
    Present { image_index: u32 },
    /// 之前的所有操作处理完毕后通知
    Flush(Sender<()>),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 队列 fence
#[derive(Default)]
pub(crate) struct QueueFence {
    completed: Mutex<u64>,
    signaled: Condvar,
}

impl QueueFence {
    pub fn completed(&self) -> u64 {
        *lock(&self.completed)
    }

    fn signal(&self, value: u64) {
        let mut completed = lock(&self.completed);
        *completed = (*completed).max(value);
        self.signaled.notify_all();
    }

    /// 等待 fence 达到 `value`，超时返回 `false`
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let guard = lock(&self.completed);
        match timeout {
            None => {
                let _guard = self
                    .signaled
                    .wait_while(guard, |completed| *completed < value)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (guard, _) = self
                    .signaled
                    .wait_timeout_while(guard, timeout, |completed| *completed < value)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard >= value
            }
        }
    }
}

/// GPU 放行预算：`None` 表示自由运行，`Some(n)` 表示还允许完成 n 次提交
#[derive(Default)]
struct Budget {
    remaining: Option<u64>,
}

/// 模拟 GPU 的暂停/放行控制
#[derive(Clone, Default)]
pub struct GpuControl {
    inner: Arc<(Mutex<Budget>, Condvar)>,
}

impl GpuControl {
    /// 暂停 GPU，之后的提交停留在队列中
    pub fn pause(&self) {
        let (budget, _) = &*self.inner;
        lock(budget).remaining = Some(0);
    }

    /// 恢复自由运行
    pub fn resume(&self) {
        let (budget, changed) = &*self.inner;
        lock(budget).remaining = None;
        changed.notify_all();
    }

    /// 暂停状态下放行 `count` 次提交
    pub fn release(&self, count: u64) {
        let (budget, changed) = &*self.inner;
        let mut budget = lock(budget);
        if let Some(remaining) = budget.remaining.as_mut() {
            *remaining += count;
        }
        changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        let (budget, _) = &*self.inner;
        lock(budget).remaining.is_some()
    }

    /// 等到允许执行下一次提交
    fn acquire_permit(&self) {
        let (budget, changed) = &*self.inner;
        let mut budget = changed
            .wait_while(lock(budget), |budget| budget.remaining == Some(0))
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = budget.remaining.as_mut() {
            *remaining -= 1;
        }
    }
}

/// 工作线程共享的状态
#[derive(Default)]
pub(crate) struct QueueShared {
    pub fence: QueueFence,
    pub store: Mutex<ResourceStore>,
    pub presented: Mutex<Vec<u32>>,
    pub executed_submissions: Mutex<u64>,
}

/// 工作线程主循环，发送端关闭后退出
pub(crate) fn run_queue(receiver: Receiver<QueueOp>, shared: Arc<QueueShared>, control: GpuControl, latency: Duration) {
    debug!(latency_ms = latency.as_millis() as u64, "Headless GPU queue started");

    for op in receiver {
        match op {
            QueueOp::Execute { commands, signal } => {
                control.acquire_permit();
                let started = Instant::now();
                if !latency.is_zero() {
                    std::thread::sleep(latency);
                }
                lock(&shared.store).execute(&commands);
                *lock(&shared.executed_submissions) += 1;
                shared.fence.signal(signal);
                trace!(
                    fence = signal,
                    commands = commands.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Headless GPU executed submission"
                );
            }
            QueueOp::Present { image_index } => {
                lock(&shared.presented).push(image_index);
                trace!(image = image_index, "Headless GPU presented image");
            }
            QueueOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Headless GPU queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_fence_wait_timeout() {
        let fence = QueueFence::default();
        assert!(!fence.wait(1, Some(Duration::from_millis(10))));
        fence.signal(2);
        assert!(fence.wait(1, Some(Duration::from_millis(10))));
        assert!(fence.wait(2, None));
        // 较小的值不会让 fence 回退
        fence.signal(1);
        assert_eq!(fence.completed(), 2);
    }

    #[test]
    fn test_paused_queue_runs_released_submissions_only() {
        let shared = Arc::new(QueueShared::default());
        let control = GpuControl::default();
        control.pause();

        let (sender, receiver) = mpsc::channel();
        let worker = {
            let shared = shared.clone();
            let control = control.clone();
            std::thread::spawn(move || run_queue(receiver, shared, control, Duration::ZERO))
        };

        sender.send(QueueOp::Execute { commands: Vec::new(), signal: 1 }).unwrap();
        sender.send(QueueOp::Execute { commands: Vec::new(), signal: 2 }).unwrap();
        assert!(!shared.fence.wait(1, Some(Duration::from_millis(20))));

        control.release(1);
        assert!(shared.fence.wait(1, Some(Duration::from_secs(5))));
        assert!(!shared.fence.wait(2, Some(Duration::from_millis(20))));

        control.resume();
        assert!(shared.fence.wait(2, Some(Duration::from_secs(5))));

        drop(sender);
        worker.join().unwrap();
        assert_eq!(*lock(&shared.executed_submissions), 2);
    }
}
