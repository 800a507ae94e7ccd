//! Vulkan 交换链
//!
//! 除了交换链本身，还持有两组信号量：
//!
//! - 获取信号量：`vkAcquireNextImageKHR` 发出，写入该图像的提交等待。
//!   数量比图像多一个，组成环；复用前必须确认等待它的提交已经完成
//! - 渲染完成信号量：每张图像一个，写入该图像的提交发出，呈现等待

use ash::extensions::khr;
use ash::vk;
use tracing::debug;

use crate::core::error::{GraphicsError, Result};

use super::context::VulkanContext;

/// 表面支持的交换链参数
pub(crate) struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(context: &VulkanContext) -> Result<Self> {
        let loader = &context.surface_loader;
        let device = context.physical_device.handle;
        let surface = context.surface;
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(device, surface)
                    .map_err(|e| surface_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?,
                formats: loader
                    .get_physical_device_surface_formats(device, surface)
                    .map_err(|e| surface_error("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(device, surface)
                    .map_err(|e| surface_error("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?,
            })
        }
    }
}

fn surface_error(operation: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        other => GraphicsError::init(operation, other),
    }
}

/// 优先 B8G8R8A8_SRGB + SRGB_NONLINEAR，否则使用表面报告的第一个格式
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// 关闭垂直同步时优先 MAILBOX，FIFO 总是可用
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// 表面给定了当前尺寸时必须使用它，否则把请求的尺寸限制在允许范围内
pub(crate) fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// `max_image_count` 为 0 表示没有上限
pub(crate) fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// 交换链创建参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwapchainRequest {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    pub vsync: bool,
}

/// Vulkan 交换链
pub(crate) struct VulkanSwapchain {
    pub loader: khr::Swapchain,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    acquire_semaphores: Vec<vk::Semaphore>,
    /// 最近一次等待该获取信号量的提交
    semaphore_last_use: Vec<Option<u64>>,
    /// 图像已获取、尚未被提交等待的获取信号量
    pending_acquire: Vec<Option<usize>>,
    render_finished: Vec<vk::Semaphore>,
    next_semaphore: usize,
}

impl VulkanSwapchain {
    /// 创建交换链，`old` 不为空时替换旧交换链
    pub fn new(
        context: &VulkanContext,
        loader: khr::Swapchain,
        request: SwapchainRequest,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let support = SwapchainSupport::query(context)?;
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| GraphicsError::init("vkGetPhysicalDeviceSurfaceFormatsKHR", "no surface formats"))?;
        let present_mode = choose_present_mode(&support.present_modes, request.vsync);
        let extent = choose_extent(&support.capabilities, request.width, request.height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GraphicsError::invalid("Cannot create a swapchain with a zero-sized extent").into());
        }
        let image_count = choose_image_count(&support.capabilities, request.image_count);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // 清屏通过传输命令完成
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| match e {
            vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => GraphicsError::SurfaceLost,
            other => GraphicsError::init("vkCreateSwapchainKHR", other),
        })?;

        let mut swapchain = Self {
            loader,
            handle,
            images: Vec::new(),
            format: surface_format.format,
            extent,
            acquire_semaphores: Vec::new(),
            semaphore_last_use: Vec::new(),
            pending_acquire: Vec::new(),
            render_finished: Vec::new(),
            next_semaphore: 0,
        };
        if let Err(e) = swapchain.create_sync_objects(&context.device) {
            swapchain.destroy(&context.device);
            return Err(e);
        }

        debug!(
            width = extent.width,
            height = extent.height,
            images = swapchain.images.len(),
            format = ?surface_format.format,
            present_mode = ?present_mode,
            "Vulkan swapchain created"
        );
        Ok(swapchain)
    }

    fn create_sync_objects(&mut self, device: &ash::Device) -> Result<()> {
        self.images = unsafe { self.loader.get_swapchain_images(self.handle) }
            .map_err(|e| GraphicsError::init("vkGetSwapchainImagesKHR", e))?;

        let image_count = self.images.len();
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..image_count + 1 {
            let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
                .map_err(|e| GraphicsError::init("vkCreateSemaphore", e))?;
            self.acquire_semaphores.push(semaphore);
        }
        for _ in 0..image_count {
            let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
                .map_err(|e| GraphicsError::init("vkCreateSemaphore", e))?;
            self.render_finished.push(semaphore);
        }
        self.semaphore_last_use = vec![None; image_count + 1];
        self.pending_acquire = vec![None; image_count];
        Ok(())
    }

    /// 下一个可用于获取的信号量，以及复用前需要等待的 fence 值
    ///
    /// 仍被某张已获取图像占用的信号量会被跳过。
    pub fn next_acquire_semaphore(&self) -> Option<(usize, Option<u64>)> {
        let count = self.acquire_semaphores.len();
        (0..count)
            .map(|offset| (self.next_semaphore + offset) % count)
            .find(|index| !self.pending_acquire.contains(&Some(*index)))
            .map(|index| (index, self.semaphore_last_use[index]))
    }

    pub fn acquire_semaphore(&self, index: usize) -> vk::Semaphore {
        self.acquire_semaphores[index]
    }

    /// 记录图像由哪个获取信号量发出
    pub fn mark_acquired(&mut self, image_index: u32, semaphore: usize) {
        self.pending_acquire[image_index as usize] = Some(semaphore);
        self.next_semaphore = (semaphore + 1) % self.acquire_semaphores.len();
    }

    /// 写入图像的提交需要等待的获取信号量
    pub fn pending_acquire(&self, image_index: u32) -> Option<vk::Semaphore> {
        self.pending_acquire
            .get(image_index as usize)
            .copied()
            .flatten()
            .map(|index| self.acquire_semaphores[index])
    }

    /// 提交成功后记录获取信号量已被等待
    pub fn consume_acquire(&mut self, image_index: u32, signal: u64) {
        if let Some(index) = self.pending_acquire[image_index as usize].take() {
            self.semaphore_last_use[index] = Some(signal);
        }
    }

    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize]
    }

    /// 销毁信号量和交换链，调用前设备必须空闲
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for semaphore in self.acquire_semaphores.drain(..).chain(self.render_finished.drain(..)) {
                device.destroy_semaphore(semaphore, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
        self.semaphore_last_use.clear();
        self.pending_acquire.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|f| f.format);
        assert_eq!(chosen(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(chosen(&[unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(chosen(&[]), None);
    }

    #[test]
    fn test_present_mode_follows_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_and_image_count() {
        let fixed = capabilities((800, 600), 2, 0);
        assert_eq!(choose_extent(&fixed, 1024, 768), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_image_count(&fixed, 3), 3);

        let free = capabilities((u32::MAX, u32::MAX), 3, 4);
        assert_eq!(choose_extent(&free, 8000, 0), vk::Extent2D { width: 4096, height: 1 });
        assert_eq!(choose_image_count(&free, 2), 3);
        assert_eq!(choose_image_count(&free, 8), 4);
    }
}
