//! Vulkan 设备上下文
//!
//! 负责创建并持有实例、窗口表面、物理设备、逻辑设备和图形队列。
//!
//! # 初始化流程
//!
//! 1. 加载 Vulkan 库并创建实例（启用窗口系统需要的表面扩展）
//! 2. 创建窗口表面（Surface）
//! 3. 选择物理设备（优先独立显卡，要求同一队列族同时支持图形和呈现）
//! 4. 创建逻辑设备和队列
//!
//! 析构顺序与创建顺序相反：逻辑设备 → 表面 → 实例。
//! 所有从设备创建的对象（包括显存分配器）必须在 `VulkanContext` 析构之前销毁。

use std::ffi::{c_char, CStr, CString};

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use tracing::{debug, info, warn};
use winit::window::Window;

use crate::core::error::{GraphicsError, Result};

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// 选中的物理设备
pub(crate) struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_family_index: u32,
}

/// Vulkan 设备上下文
pub(crate) struct VulkanContext {
    // entry 必须比 instance 活得久
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: khr::Surface,
    pub surface: vk::SurfaceKHR,
    pub physical_device: PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
}

impl VulkanContext {
    /// 为窗口创建 Vulkan 上下文
    pub fn new(window: &Window, application_name: &str) -> Result<Self> {
        // 1. 加载 Vulkan 库
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GraphicsError::init("vkGetInstanceProcAddr", e))?;

        // 2. 创建实例
        let display_handle = window.raw_display_handle();
        let instance = create_instance(&entry, application_name, display_handle)?;
        debug!("Vulkan instance created");

        // 3. 创建窗口表面
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window.raw_window_handle(), None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(GraphicsError::init("vkCreateSurfaceKHR", e).into());
            }
        };
        debug!("Vulkan surface created");

        // 4. 选择物理设备和队列族
        let physical_device = match pick_physical_device(&instance, &surface_loader, surface) {
            Ok(physical_device) => physical_device,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };
        info!(
            device_name = %physical_device.name,
            device_type = ?physical_device.device_type,
            queue_family_index = physical_device.queue_family_index,
            "Using device"
        );

        // 5. 创建逻辑设备和队列
        let device = match create_device(&instance, &physical_device) {
            Ok(device) => device,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };
        let queue = unsafe { device.get_device_queue(physical_device.queue_family_index, 0) };
        debug!("Vulkan logical device created");

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            physical_device,
            device,
            queue,
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan context destroyed");
    }
}

fn create_instance(
    entry: &ash::Entry,
    application_name: &str,
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name = CString::new(application_name).unwrap_or_default();
    let engine_name = CString::new("Frame Orchestrator").unwrap_or_default();
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(0)
        .engine_name(&engine_name)
        .engine_version(0)
        .api_version(vk::make_api_version(0, 1, 1, 0));

    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| GraphicsError::init("vkEnumerateInstanceExtensionProperties", e))?
        .to_vec();

    // 调试构建下，验证层可用时启用
    let mut layers: Vec<*const c_char> = Vec::new();
    if cfg!(debug_assertions) {
        if validation_layer_available(entry) {
            layers.push(VALIDATION_LAYER.as_ptr());
            debug!("Vulkan validation layer enabled");
        } else {
            warn!("Vulkan validation layer requested but not installed");
        }
    }

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None) }
        .map_err(|e| GraphicsError::init("vkCreateInstance", e).into())
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let Ok(layers) = entry.enumerate_instance_layer_properties() else {
        return false;
    };
    layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
}

/// 优先级：独立显卡 > 集成显卡 > 虚拟显卡 > CPU > 其他
fn device_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name())
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| GraphicsError::init("vkEnumeratePhysicalDevices", e))?;

    devices
        .into_iter()
        .filter(|&device| supports_swapchain(instance, device))
        .filter_map(|device| {
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            families
                .iter()
                .enumerate()
                .position(|(index, family)| {
                    family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                        && unsafe {
                            surface_loader
                                .get_physical_device_surface_support(device, index as u32, surface)
                                .unwrap_or(false)
                        }
                })
                .map(|index| (device, index as u32))
        })
        .map(|(device, queue_family_index)| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            PhysicalDevice {
                handle: device,
                name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned(),
                device_type: properties.device_type,
                queue_family_index,
            }
        })
        .min_by_key(|device| device_rank(device.device_type))
        .ok_or_else(|| GraphicsError::init("vkEnumeratePhysicalDevices", "no device with graphics and present support").into())
}

fn create_device(instance: &ash::Instance, physical_device: &PhysicalDevice) -> Result<ash::Device> {
    let priorities = [1.0f32];
    let queue_info = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(physical_device.queue_family_index)
        .queue_priorities(&priorities)
        .build()];
    let extensions = [khr::Swapchain::name().as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_info)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device.handle, &create_info, None) }
        .map_err(|e| GraphicsError::init("vkCreateDevice", e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_rank_prefers_discrete() {
        let mut types = vec![
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        types.sort_by_key(|&t| device_rank(t));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[2], vk::PhysicalDeviceType::CPU);
    }
}
