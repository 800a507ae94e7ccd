//! DXGI 交换链和渲染目标视图

use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};
use tracing::debug;
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use winit::window::Window;

use crate::core::error::{GraphicsError, Result};

use super::context::Dx12Context;

/// 翻转模型交换链要求的缓冲区数量范围
const MIN_BUFFER_COUNT: u32 = 2;
const MAX_BUFFER_COUNT: u32 = 16;

/// 交换链的像素格式
pub(crate) const SWAPCHAIN_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

pub(crate) struct Dx12Swapchain {
    pub swap_chain: IDXGISwapChain3,
    pub buffers: Vec<ID3D12Resource>,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
    pub width: u32,
    pub height: u32,
    sync_interval: u32,
}

impl Dx12Swapchain {
    pub fn new(
        context: &Dx12Context,
        window: &Window,
        width: u32,
        height: u32,
        buffer_count: u32,
        vsync: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::invalid("Swapchain extent must be greater than 0").into());
        }
        let buffer_count = buffer_count.clamp(MIN_BUFFER_COUNT, MAX_BUFFER_COUNT);

        let hwnd = match window.raw_window_handle() {
            RawWindowHandle::Win32(handle) => HWND(handle.hwnd),
            other => {
                return Err(GraphicsError::init("CreateSwapChainForHwnd", format!("unsupported window handle {:?}", other)).into())
            }
        };

        unsafe {
            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: SWAPCHAIN_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: buffer_count,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 = context
                .factory
                .CreateSwapChainForHwnd(&context.queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::init("CreateSwapChainForHwnd", e.code()))?;
            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .map_err(|e| GraphicsError::init("IDXGISwapChain3", e.code()))?;

            // 全屏切换由窗口自己处理
            if let Err(e) = context.factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) {
                debug!(status = ?e.code(), "MakeWindowAssociation failed");
            }

            let rtv_heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: buffer_count,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                ..Default::default()
            };
            let rtv_heap: ID3D12DescriptorHeap = context
                .device
                .CreateDescriptorHeap(&rtv_heap_desc)
                .map_err(|e| GraphicsError::init("CreateDescriptorHeap", e.code()))?;
            let rtv_descriptor_size =
                context.device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;

            let mut swapchain = Self {
                swap_chain,
                buffers: Vec::new(),
                rtv_heap,
                rtv_descriptor_size,
                width,
                height,
                sync_interval: u32::from(vsync),
            };
            swapchain.create_views(&context.device, buffer_count)?;
            Ok(swapchain)
        }
    }

    /// 取回后台缓冲区并为每一个创建 RTV
    fn create_views(&mut self, device: &ID3D12Device, buffer_count: u32) -> Result<()> {
        self.buffers.clear();
        unsafe {
            for i in 0..buffer_count {
                let surface: ID3D12Resource = self
                    .swap_chain
                    .GetBuffer(i)
                    .map_err(|e| GraphicsError::init("IDXGISwapChain::GetBuffer", e.code()))?;
                device.CreateRenderTargetView(&surface, None, self.rtv_handle(i));
                self.buffers.push(surface);
            }
        }
        Ok(())
    }

    pub fn rtv_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + index as usize * self.rtv_descriptor_size,
        }
    }

    /// 呈现引擎下一张可写的后台缓冲区
    pub fn current_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    pub fn present(&self) -> windows::core::Result<()> {
        unsafe { self.swap_chain.Present(self.sync_interval, DXGI_PRESENT(0)).ok() }
    }

    /// 调整后台缓冲区尺寸
    ///
    /// 调用前对后台缓冲区的所有引用都必须释放，包括 GPU 上未完成的工作。
    pub fn resize(&mut self, device: &ID3D12Device, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::invalid("Swapchain extent must be greater than 0").into());
        }
        let buffer_count = self.buffers.len() as u32;
        self.buffers.clear();
        unsafe {
            self.swap_chain
                .ResizeBuffers(buffer_count, width, height, SWAPCHAIN_FORMAT, DXGI_SWAP_CHAIN_FLAG(0))
                .map_err(|e| GraphicsError::device_lost("IDXGISwapChain::ResizeBuffers", e.code()))?;
        }
        self.width = width;
        self.height = height;
        self.create_views(device, buffer_count)
    }
}
