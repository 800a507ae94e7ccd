//! DirectX 12 设备上下文
//!
//! # 初始化流程
//!
//! 1. 启用调试层（Debug 模式）
//! 2. 创建 DXGI 工厂
//! 3. 创建 D3D12 设备
//! 4. 创建直接命令队列
//! 5. 创建队列 fence 和等待事件
//!
//! 队列 fence 的值就是帧编排器分配的 fence 值，每次提交之后在队列上 `Signal`。

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};

/// DirectX 12 设备上下文
pub(crate) struct Dx12Context {
    pub factory: IDXGIFactory4,
    pub device: ID3D12Device,
    pub queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_event: HANDLE,
}

impl Dx12Context {
    pub fn new() -> Result<Self> {
        unsafe {
            // 1. 启用调试层（仅 Debug 模式）
            #[cfg(debug_assertions)]
            {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(_) => warn!("Failed to enable DX12 Debug Layer"),
                }
            }

            // 2. 创建 DXGI 工厂
            let flags = if cfg!(debug_assertions) {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 =
                CreateDXGIFactory2(flags).map_err(|e| GraphicsError::init("CreateDXGIFactory2", e.code()))?;

            // 3. 创建 D3D12 设备
            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::init("D3D12CreateDevice", e.code()))?;
            let device = device.ok_or_else(|| GraphicsError::init("D3D12CreateDevice", "no device returned"))?;
            debug!("D3D12 Device created successfully");

            // 4. 创建命令队列
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| GraphicsError::init("CreateCommandQueue", e.code()))?;

            // 5. 创建同步对象
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| GraphicsError::init("CreateFence", e.code()))?;
            let fence_event =
                CreateEventA(None, false, false, None).map_err(|e| GraphicsError::init("CreateEventA", e.code()))?;

            info!("DX12 device initialization complete");
            Ok(Self {
                factory,
                device,
                queue,
                fence,
                fence_event,
            })
        }
    }

    /// 在队列上发出 fence 值
    pub fn signal(&self, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(&self.fence, value) }
            .map_err(|e| GraphicsError::device_lost("ID3D12CommandQueue::Signal", e.code()).into())
    }

    /// GPU 已经完成的 fence 值
    ///
    /// 设备移除后 `GetCompletedValue` 返回 `u64::MAX`。
    pub fn completed_value(&self) -> Result<u64> {
        let value = unsafe { self.fence.GetCompletedValue() };
        if value == u64::MAX {
            let reason = unsafe { self.device.GetDeviceRemovedReason() };
            return Err(GraphicsError::device_lost("ID3D12Fence::GetCompletedValue", reason).into());
        }
        Ok(value)
    }

    /// 等待 fence 达到 `value`，超时返回 `false`
    ///
    /// 自动复位事件可能残留上一次超时等待之后才到达的通知，醒来后总是重新检查完成值。
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if self.completed_value()? >= value {
                return Ok(true);
            }
            unsafe { self.fence.SetEventOnCompletion(value, self.fence_event) }
                .map_err(|e| GraphicsError::device_lost("ID3D12Fence::SetEventOnCompletion", e.code()))?;

            let millis = match deadline {
                None => INFINITE,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    // 向上取整，避免把不足 1ms 的剩余时间当成 0
                    remaining.as_micros().div_ceil(1000).min(u128::from(INFINITE - 1)) as u32
                }
            };
            let result = unsafe { WaitForSingleObject(self.fence_event, millis) };
            if result == WAIT_TIMEOUT {
                return Ok(self.completed_value()? >= value);
            }
            if result != WAIT_OBJECT_0 {
                return Err(GraphicsError::device_lost("WaitForSingleObject", result).into());
            }
        }
    }
}

impl Drop for Dx12Context {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = CloseHandle(self.fence_event) {
                warn!(status = ?e.code(), "Failed to close fence event");
            }
        }
        debug!("DX12 context destroyed");
    }
}
