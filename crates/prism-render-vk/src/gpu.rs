// SPDX-License-Identifier: CEPL-1.0
//! The seam between the presentation engine and the device.
//!
//! Swapchain, frame pool and presenter code only ever talk to a `&impl Gpu`,
//! never to `ash::Device` directly. `DeviceContext` is the real
//! implementation; tests drive the same code through a recording mock.

use ash::prelude::VkResult;
use ash::vk;

/// Everything the swapchain manager decides before creating a chain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainRequest {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Inputs for recording the single triangle pass into one command buffer.
#[derive(Clone, Copy, Debug)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// One queue submission: wait `wait_semaphore` at `wait_stage`, run
/// `command_buffer`, signal `signal_semaphore`, then `fence`.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// SPIR-V words for the two triangle stages.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

pub trait Gpu {
    // --- surface / chain ---------------------------------------------------
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Blocks without timeout. `Ok((index, true))` means suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// `Ok(true)` means suboptimal.
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // --- views / targets -----------------------------------------------------
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_render_pass(&self, format: vk::Format) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Builds the fixed triangle pipeline. Shader modules do not outlive the call.
    fn create_graphics_pipeline(
        &self,
        render_pass: vk::RenderPass,
        shaders: &ShaderSet,
    ) -> VkResult<(vk::PipelineLayout, vk::Pipeline)>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    // --- synchronization -----------------------------------------------------
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // --- recording -------------------------------------------------------------
    /// A transient pool on the graphics queue family.
    fn create_command_pool(&self) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer);
    fn record_triangle(&self, buffer: vk::CommandBuffer, target: &DrawTarget) -> VkResult<()>;

    // --- queue -----------------------------------------------------------------
    fn submit(&self, submission: &Submission) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;
}
