// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, adapter, logical device and the single
//! graphics + present queue. Immutable once built; every other component
//! borrows it through the [`Gpu`] trait.

use std::ffi::CString;

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::capabilities::{self, as_ptrs};
use crate::debug::{DebugMessenger, DiagnosticsSink, SinkSlot};
use crate::error::SetupError;
use crate::gpu::{DrawTarget, Gpu, ShaderSet, Submission, SwapchainRequest};
use crate::pipeline;

/// Settings consumed while creating the context.
pub struct ContextConfig {
    pub app_name: String,
    pub validation: bool,
    pub sink: Box<dyn DiagnosticsSink>,
}

/// Index of the first family with graphics that can also present.
///
/// `families` pairs each family's flags with its present support.
pub fn pick_queue_family(families: &[(vk::QueueFlags, bool)]) -> Result<u32, SetupError> {
    if families.is_empty() {
        return Err(SetupError::NoQueueFamilies);
    }
    families
        .iter()
        .position(|(flags, present)| flags.contains(vk::QueueFlags::GRAPHICS) && *present)
        .map(|i| i as u32)
        .ok_or(SetupError::NoGraphicsPresentQueue)
}

pub struct DeviceContext {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    queue_family: u32,
    device: ash::Device,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    // Read by the driver through the messenger's user data; dropped last.
    _sink: Option<SinkSlot>,
}

impl DeviceContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: ContextConfig,
    ) -> Result<Self> {
        let dh = display.display_handle().map_err(SetupError::from)?.as_raw();
        let wh = window.window_handle().map_err(SetupError::from)?.as_raw();

        let entry = unsafe { Entry::load() }.map_err(SetupError::from)?;

        let window_exts = ash_window::enumerate_required_extensions(dh)
            .context("enumerate_required_extensions")?;
        let window_exts = unsafe { capabilities::static_names(window_exts) };

        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("enumerate_instance_layer_properties")?;
        let layers = capabilities::validation_layers(
            config.validation,
            &capabilities::layer_names(&available_layers),
        );
        let debug_wanted = !layers.is_empty();

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("enumerate_instance_extension_properties")?;
        let instance_exts = capabilities::instance_requirements(&window_exts, debug_wanted)
            .resolve(&capabilities::extension_names(&available_exts))?;

        let sink = debug_wanted.then(|| SinkSlot::new(config.sink));
        let instance = unsafe {
            create_instance(
                &entry,
                &config.app_name,
                &instance_exts,
                &layers,
                sink.as_ref(),
            )
        }
        .context("create_instance")?;

        let debug = match &sink {
            Some(slot) => match unsafe { DebugMessenger::new(&entry, &instance, slot) } {
                Ok(m) => Some(m),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e).context("create_debug_utils_messenger");
                }
            },
            None => None,
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { destroy_instance_chain(&instance, debug) };
                return Err(SetupError::Surface(e).into());
            }
        };

        let picked = unsafe { pick_device_and_queue(&instance, &surface_loader, surface) }
            .and_then(|(phys, family)| {
                let device = unsafe { create_device(&instance, phys, family) }?;
                Ok((phys, family, device))
            });
        let (phys, queue_family, device) = match picked {
            Ok(v) => v,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance_chain(&instance, debug);
                }
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name =
            unsafe { std::ffi::CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        info!(
            "Vulkan device: {} (api {}.{}), queue family {}",
            name,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            queue_family
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            queue_family,
            device,
            queue,
            swapchain_loader,
            _sink: sink,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }
}

unsafe fn create_instance(
    entry: &Entry,
    app_name: &str,
    extensions: &[&std::ffi::CStr],
    layers: &[&std::ffi::CStr],
    sink: Option<&SinkSlot>,
) -> Result<Instance> {
    let app = CString::new(app_name).unwrap_or_else(|_| CString::from(c"prism"));
    let engine = c"prism";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: engine.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let ext_ptrs = as_ptrs(extensions);
    let layer_ptrs = as_ptrs(layers);
    // Chained so instance creation and destruction are covered too.
    let debug_ci = sink.map(SinkSlot::create_info);

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: debug_ci
            .as_ref()
            .map_or(std::ptr::null(), |ci| ci as *const _ as *const std::ffi::c_void),
        flags: capabilities::instance_flags(extensions),
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { entry.create_instance(&create_info, None)? })
}

unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(SetupError::NoPhysicalDevice.into());
    }

    let mut last_err = SetupError::NoGraphicsPresentQueue;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let families: Vec<_> = qprops
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let present = unsafe {
                    surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
                }
                .unwrap_or(false);
                (q.queue_flags, present)
            })
            .collect();
        match pick_queue_family(&families) {
            Ok(family) => return Ok((phys, family)),
            Err(e) => last_err = e,
        }
    }
    Err(last_err.into())
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let offered = unsafe { instance.enumerate_device_extension_properties(phys) }
        .context("enumerate_device_extension_properties")?;
    let device_exts = capabilities::device_requirements()
        .resolve(&capabilities::extension_names(&offered))?;
    let ext_ptrs = as_ptrs(&device_exts);

    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?)
}

unsafe fn destroy_instance_chain(instance: &Instance, debug: Option<DebugMessenger>) {
    if let Some(mut m) = debug {
        unsafe { m.destroy() };
    }
    unsafe { instance.destroy_instance(None) };
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            if let Some(mut m) = self.debug.take() {
                m.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

impl Gpu for DeviceContext {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
        }
    }

    fn create_swapchain(&self, r: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: r.min_image_count,
            image_format: r.format.format,
            image_color_space: r.format.color_space,
            image_extent: r.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: r.pre_transform,
            composite_alpha: r.composite_alpha,
            present_mode: r.present_mode,
            clipped: vk::TRUE,
            old_swapchain: r.old_swapchain,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_render_pass(&self, format: vk::Format) -> VkResult<vk::RenderPass> {
        unsafe { pipeline::create_render_pass(&self.device, format) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_graphics_pipeline(
        &self,
        render_pass: vk::RenderPass,
        shaders: &ShaderSet,
    ) -> VkResult<(vk::PipelineLayout, vk::Pipeline)> {
        unsafe { pipeline::create_triangle_pipeline(&self.device, render_pass, shaders) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: self.queue_family,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[buffer]) }
    }

    fn record_triangle(&self, buffer: vk::CommandBuffer, target: &DrawTarget) -> VkResult<()> {
        unsafe { pipeline::record_triangle(&self.device, buffer, target) }
    }

    fn submit(&self, s: &Submission) -> VkResult<()> {
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.wait_semaphore,
            p_wait_dst_stage_mask: &s.wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.signal_semaphore,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&info), s.fence)
        }
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}
