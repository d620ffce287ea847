// SPDX-License-Identifier: CEPL-1.0
//! Driverless `Gpu` for unit tests.
//!
//! Hands out unique fake handles, records every call, and simulates just
//! enough of the GPU timeline to catch ordering bugs: a submission stays in
//! flight until its fence is waited on or the queue/device is idled, and any
//! destroy/reset touching in-flight work is reported as a violation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::gpu::{DrawTarget, Gpu, ShaderSet, Submission, SwapchainRequest};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    SurfaceCapabilities,
    CreateSwapchain { min_image_count: u32, extent: (u32, u32), old: u64 },
    DestroySwapchain(u64),
    Acquire { semaphore: u64 },
    Present { image_index: u32, wait: u64 },
    Create(&'static str, u64),
    Destroy(&'static str, u64),
    WaitFence(u64),
    ResetFence(u64),
    ResetPool(u64),
    Record { buffer: u64, framebuffer: u64, extent: (u32, u32) },
    Submit { buffer: u64, wait: u64, signal: u64, fence: u64 },
    QueueWaitIdle,
    DeviceWaitIdle,
}

struct InFlight {
    fence: u64,
    touches: Vec<u64>,
}

pub struct MockGpu {
    next_id: Cell<u64>,
    pub caps: RefCell<vk::SurfaceCapabilitiesKHR>,
    pub formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    acquire_script: RefCell<VecDeque<VkResult<(u32, bool)>>>,
    present_script: RefCell<VecDeque<VkResult<bool>>>,
    fail_swapchain: Cell<Option<vk::Result>>,
    fail_fence_wait: Cell<Option<vk::Result>>,
    pub last_request: Cell<Option<SwapchainRequest>>,
    chains: RefCell<HashMap<u64, Vec<vk::Image>>>,
    next_image: RefCell<HashMap<u64, u32>>,
    live: RefCell<HashMap<u64, &'static str>>,
    created: RefCell<HashMap<&'static str, usize>>,
    destroyed: RefCell<HashMap<&'static str, usize>>,
    signaled: RefCell<HashSet<u64>>,
    in_flight: RefCell<Vec<InFlight>>,
    buffer_pool: RefCell<HashMap<u64, u64>>,
    recorded: RefCell<HashMap<u64, u64>>,
    events: RefCell<Vec<Event>>,
    violations: RefCell<Vec<String>>,
}

impl MockGpu {
    /// A surface with `min_image_count == 2`, unbounded max and the given extent.
    pub fn new(width: u32, height: u32) -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width, height },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };
        Self {
            next_id: Cell::new(0),
            caps: RefCell::new(caps),
            formats: RefCell::new(vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }]),
            acquire_script: RefCell::new(VecDeque::new()),
            present_script: RefCell::new(VecDeque::new()),
            fail_swapchain: Cell::new(None),
            fail_fence_wait: Cell::new(None),
            last_request: Cell::new(None),
            chains: RefCell::new(HashMap::new()),
            next_image: RefCell::new(HashMap::new()),
            live: RefCell::new(HashMap::new()),
            created: RefCell::new(HashMap::new()),
            destroyed: RefCell::new(HashMap::new()),
            signaled: RefCell::new(HashSet::new()),
            in_flight: RefCell::new(Vec::new()),
            buffer_pool: RefCell::new(HashMap::new()),
            recorded: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::new()),
            violations: RefCell::new(Vec::new()),
        }
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        self.caps.borrow_mut().current_extent = vk::Extent2D { width, height };
    }

    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.acquire_script.borrow_mut().push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.present_script.borrow_mut().push_back(result);
    }

    pub fn fail_next_swapchain(&self, result: vk::Result) {
        self.fail_swapchain.set(Some(result));
    }

    pub fn fail_next_fence_wait(&self, result: vk::Result) {
        self.fail_fence_wait.set(Some(result));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn created(&self, kind: &'static str) -> usize {
        self.created.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: &'static str) -> usize {
        self.destroyed.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_of(&self, kind: &'static str) -> usize {
        self.live.borrow().values().filter(|k| **k == kind).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.borrow().clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.borrow().len()
    }

    fn log(&self, e: Event) {
        self.events.borrow_mut().push(e);
    }

    fn violation(&self, msg: String) {
        self.violations.borrow_mut().push(msg);
    }

    fn alloc<H: Handle>(&self, kind: &'static str) -> H {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.live.borrow_mut().insert(id, kind);
        *self.created.borrow_mut().entry(kind).or_default() += 1;
        self.log(Event::Create(kind, id));
        H::from_raw(id)
    }

    fn release<H: Handle>(&self, kind: &'static str, handle: H) {
        let id = handle.as_raw();
        if id == 0 {
            self.violation(format!("destroy of null {kind}"));
            return;
        }
        if self.live.borrow_mut().remove(&id).is_none() {
            self.violation(format!("destroy of dead or unknown {kind} {id}"));
            return;
        }
        if self.in_flight.borrow().iter().any(|f| f.touches.contains(&id)) {
            self.violation(format!("{kind} {id} destroyed while GPU work using it is in flight"));
        }
        *self.destroyed.borrow_mut().entry(kind).or_default() += 1;
        self.log(Event::Destroy(kind, id));
    }

    fn retire_all(&self) {
        let mut flights = self.in_flight.borrow_mut();
        let mut signaled = self.signaled.borrow_mut();
        for f in flights.drain(..) {
            signaled.insert(f.fence);
        }
    }
}

impl Gpu for MockGpu {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.log(Event::SurfaceCapabilities);
        Ok(*self.caps.borrow())
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.borrow().clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        if let Some(err) = self.fail_swapchain.take() {
            return Err(err);
        }
        self.last_request.set(Some(*request));
        let old = request.old_swapchain.as_raw();
        if old != 0 && !self.live.borrow().contains_key(&old) {
            self.violation(format!("old swapchain {old} is not alive"));
        }
        let sc: vk::SwapchainKHR = self.alloc("swapchain");
        self.log(Event::CreateSwapchain {
            min_image_count: request.min_image_count,
            extent: (request.extent.width, request.extent.height),
            old,
        });
        // Images belong to the chain and are never destroyed individually.
        let images = (0..request.min_image_count)
            .map(|i| vk::Image::from_raw(sc.as_raw() * 1000 + u64::from(i)))
            .collect();
        self.chains.borrow_mut().insert(sc.as_raw(), images);
        Ok(sc)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.chains
            .borrow()
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release("swapchain", swapchain);
        self.chains.borrow_mut().remove(&swapchain.as_raw());
        self.log(Event::DestroySwapchain(swapchain.as_raw()));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.log(Event::Acquire { semaphore: signal.as_raw() });
        if !self.live.borrow().contains_key(&signal.as_raw()) {
            self.violation(format!("acquire signals dead semaphore {}", signal.as_raw()));
        }
        if let Some(scripted) = self.acquire_script.borrow_mut().pop_front() {
            return scripted;
        }
        let count = self
            .chains
            .borrow()
            .get(&swapchain.as_raw())
            .map(|imgs| imgs.len() as u32)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let mut next = self.next_image.borrow_mut();
        let cursor = next.entry(swapchain.as_raw()).or_insert(0);
        let index = *cursor % count;
        *cursor = cursor.wrapping_add(1);
        Ok((index, false))
    }

    fn present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.log(Event::Present { image_index, wait: wait.as_raw() });
        self.present_script.borrow_mut().pop_front().unwrap_or(Ok(false))
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        Ok(self.alloc("image_view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release("image_view", view);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        Ok(self.alloc("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release("framebuffer", framebuffer);
    }

    fn create_render_pass(&self, _format: vk::Format) -> VkResult<vk::RenderPass> {
        Ok(self.alloc("render_pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release("render_pass", render_pass);
    }

    fn create_graphics_pipeline(
        &self,
        _render_pass: vk::RenderPass,
        _shaders: &ShaderSet,
    ) -> VkResult<(vk::PipelineLayout, vk::Pipeline)> {
        Ok((self.alloc("pipeline_layout"), self.alloc("pipeline")))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release("pipeline", pipeline);
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release("pipeline_layout", layout);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.alloc("fence");
        if signaled {
            self.signaled.borrow_mut().insert(fence.as_raw());
        }
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.release("fence", fence);
        self.signaled.borrow_mut().remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let id = fence.as_raw();
        self.log(Event::WaitFence(id));
        if let Some(result) = self.fail_fence_wait.take() {
            return Err(result);
        }
        let mut flights = self.in_flight.borrow_mut();
        if let Some(pos) = flights.iter().position(|f| f.fence == id) {
            flights.remove(pos);
            self.signaled.borrow_mut().insert(id);
        } else if !self.signaled.borrow().contains(&id) {
            self.violation(format!("wait on fence {id} that nothing will signal"));
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let id = fence.as_raw();
        self.log(Event::ResetFence(id));
        if self.in_flight.borrow().iter().any(|f| f.fence == id) {
            self.violation(format!("reset of in-flight fence {id}"));
        }
        self.signaled.borrow_mut().remove(&id);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.alloc("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release("semaphore", semaphore);
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        Ok(self.alloc("command_pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release("command_pool", pool);
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        let id = pool.as_raw();
        self.log(Event::ResetPool(id));
        if self.in_flight.borrow().iter().any(|f| f.touches.contains(&id)) {
            self.violation(format!("reset of command pool {id} with work in flight"));
        }
        Ok(())
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let buffer: vk::CommandBuffer = self.alloc("command_buffer");
        self.buffer_pool
            .borrow_mut()
            .insert(buffer.as_raw(), pool.as_raw());
        Ok(buffer)
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        self.release("command_buffer", buffer);
        self.buffer_pool.borrow_mut().remove(&buffer.as_raw());
    }

    fn record_triangle(&self, buffer: vk::CommandBuffer, target: &DrawTarget) -> VkResult<()> {
        self.log(Event::Record {
            buffer: buffer.as_raw(),
            framebuffer: target.framebuffer.as_raw(),
            extent: (target.extent.width, target.extent.height),
        });
        self.recorded
            .borrow_mut()
            .insert(buffer.as_raw(), target.framebuffer.as_raw());
        Ok(())
    }

    fn submit(&self, s: &Submission) -> VkResult<()> {
        let fence = s.fence.as_raw();
        self.log(Event::Submit {
            buffer: s.command_buffer.as_raw(),
            wait: s.wait_semaphore.as_raw(),
            signal: s.signal_semaphore.as_raw(),
            fence,
        });
        if self.in_flight.borrow().iter().any(|f| f.fence == fence) {
            self.violation(format!("fence {fence} submitted while already in flight"));
        }
        if self.signaled.borrow().contains(&fence) {
            self.violation(format!("fence {fence} submitted without being reset"));
        }
        let buffer = s.command_buffer.as_raw();
        let mut touches = vec![
            buffer,
            s.wait_semaphore.as_raw(),
            s.signal_semaphore.as_raw(),
            fence,
        ];
        if let Some(pool) = self.buffer_pool.borrow().get(&buffer) {
            touches.push(*pool);
        }
        if let Some(fb) = self.recorded.borrow().get(&buffer) {
            touches.push(*fb);
        }
        self.in_flight.borrow_mut().push(InFlight { fence, touches });
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        self.log(Event::QueueWaitIdle);
        self.retire_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.log(Event::DeviceWaitIdle);
        self.retire_all();
        Ok(())
    }
}
