// SPDX-License-Identifier: CEPL-1.0
//! The per-tick acquire → record → submit → present loop and the resize
//! protocol that recovers from a stale surface.

use anyhow::{anyhow, bail, Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, error, info, warn};

use crate::frame::{FramePool, SemaphoreRecycler};
use crate::gpu::{DrawTarget, Gpu, ShaderSet, Submission};
use crate::swapchain::{resolve_extent, same_extent, SwapchainManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Resizing,
}

/// What one call to [`Presenter::update`] achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The image was handed to the presentation engine. A stale present also
    /// lands here; the resize runs at the start of the next tick.
    Presented { image_index: u32 },
    /// No image could be acquired, even after a resize. The queue was idled.
    Skipped { status: vk::Result },
    /// Rendering was submitted but the present call failed outright.
    PresentFailed { image_index: u32, status: vk::Result },
}

fn is_stale(status: vk::Result) -> bool {
    status == vk::Result::ERROR_OUT_OF_DATE_KHR || status == vk::Result::SUBOPTIMAL_KHR
}

pub struct Presenter {
    swapchain: SwapchainManager,
    frames: FramePool,
    recycler: SemaphoreRecycler,
    render_pass: Option<vk::RenderPass>,
    pipeline_layout: Option<vk::PipelineLayout>,
    pipeline: Option<vk::Pipeline>,
    shaders: ShaderSet,
    clear_color: [f32; 4],
    /// Window size as last reported by the platform; only consulted when the
    /// surface lets us pick the extent.
    requested_extent: vk::Extent2D,
    phase: Phase,
    resize_pending: bool,
}

impl Presenter {
    /// Builds the chain, frame slots, render pass, pipeline and framebuffers.
    /// Everything created so far is released again if a step fails.
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        requested_extent: vk::Extent2D,
        shaders: ShaderSet,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let mut presenter = Self {
            swapchain: SwapchainManager::new(),
            frames: FramePool::new(),
            recycler: SemaphoreRecycler::new(),
            render_pass: None,
            pipeline_layout: None,
            pipeline: None,
            shaders,
            clear_color,
            requested_extent,
            phase: Phase::Idle,
            resize_pending: false,
        };
        if let Err(e) = presenter.init(gpu) {
            presenter.destroy(gpu);
            return Err(e);
        }
        Ok(presenter)
    }

    fn init<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        self.swapchain
            .build(gpu, self.requested_extent, &mut self.frames)?;
        self.create_pipeline(gpu)?;
        let render_pass = self.render_pass.ok_or_else(|| anyhow!("render pass missing"))?;
        self.swapchain.init_framebuffers(gpu, render_pass)
    }

    fn create_pipeline<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        let render_pass = gpu
            .create_render_pass(self.swapchain.format())
            .context("create_render_pass")?;
        self.render_pass = Some(render_pass);
        let (layout, pipeline) = gpu
            .create_graphics_pipeline(render_pass, &self.shaders)
            .context("create_graphics_pipelines")?;
        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn destroy_pipeline<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if let Some(p) = self.pipeline.take() {
            gpu.destroy_pipeline(p);
        }
        if let Some(l) = self.pipeline_layout.take() {
            gpu.destroy_pipeline_layout(l);
        }
        if let Some(rp) = self.render_pass.take() {
            gpu.destroy_render_pass(rp);
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn recycler(&self) -> &SemaphoreRecycler {
        &self.recycler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn set_requested_extent(&mut self, extent: vk::Extent2D) {
        self.requested_extent = extent;
    }

    /// Acquires the next image into its frame slot.
    ///
    /// The inner result is the acquire status: on `Err` the fresh semaphore
    /// went back to the recycler and no slot was touched. `Ok((_, true))`
    /// means suboptimal; the image is still ours. The outer error is a
    /// failed fence wait or pool reset.
    pub fn acquire_next_image<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
    ) -> Result<VkResult<(u32, bool)>> {
        self.phase = Phase::Acquiring;
        let semaphore = self
            .recycler
            .acquire_semaphore(gpu)
            .context("create_semaphore")?;

        let (index, suboptimal) = match gpu.acquire_next_image(self.swapchain.handle(), semaphore) {
            Ok(acquired) => acquired,
            Err(status) => {
                self.recycler.release_to_pool(semaphore);
                return Ok(Err(status));
            }
        };

        let Some(slot) = self.frames.slot_mut(index as usize) else {
            // The semaphore has a pending signal; only an idle device makes it safe to drop.
            gpu.device_wait_idle().context("device_wait_idle")?;
            gpu.destroy_semaphore(semaphore);
            bail!("acquired image {index} has no frame slot");
        };

        // The slot owns the new semaphore before anything below can fail.
        let previous = slot.acquire_semaphore.replace(semaphore);
        let (fence, pool) = (slot.fence, slot.command_pool);
        let reclaimed = (|| -> Result<()> {
            if let Some(fence) = fence {
                gpu.wait_for_fence(fence).context("wait_for_fences")?;
                gpu.reset_fence(fence).context("reset_fences")?;
            }
            if let Some(pool) = pool {
                gpu.reset_command_pool(pool).context("reset_command_pool")?;
            }
            Ok(())
        })();
        if let Some(previous) = previous {
            self.recycler.release_to_pool(previous);
        }
        reclaimed?;
        Ok(Ok((index, suboptimal)))
    }

    /// Rebuilds the chain if the surface extent moved away from the cached one.
    ///
    /// Returns `Ok(false)` without touching anything when there is no chain
    /// or the extent is unchanged.
    pub fn resize<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<bool> {
        if self.swapchain.state().is_empty() {
            return Ok(false);
        }
        let previous_phase = self.phase;
        self.phase = Phase::Resizing;

        let caps = gpu
            .surface_capabilities()
            .context("get_physical_device_surface_capabilities")?;
        let cached = self.swapchain.extent();
        let hint = if caps.current_extent.width == u32::MAX {
            self.requested_extent
        } else {
            cached
        };
        let target = resolve_extent(&caps, hint);
        if same_extent(target, cached) {
            debug!("resize: extent unchanged at {}x{}", cached.width, cached.height);
            self.phase = previous_phase;
            return Ok(false);
        }

        gpu.device_wait_idle().context("device_wait_idle")?;
        self.swapchain.teardown_framebuffers(gpu)?;

        let old_format = self.swapchain.format();
        self.swapchain.rebuild(gpu, target, &mut self.frames)?;
        if self.swapchain.format() != old_format {
            info!(
                "resize: surface format changed {:?} → {:?}, rebuilding pipeline",
                old_format,
                self.swapchain.format()
            );
            self.destroy_pipeline(gpu);
            self.create_pipeline(gpu)?;
        }
        let render_pass = self.render_pass.ok_or_else(|| anyhow!("render pass missing"))?;
        self.swapchain.init_framebuffers(gpu, render_pass)?;

        let extent = self.swapchain.extent();
        info!(
            "resize: {}x{} → {}x{}, {} images",
            cached.width,
            cached.height,
            extent.width,
            extent.height,
            self.frames.len()
        );
        self.phase = previous_phase;
        Ok(true)
    }

    /// Records the triangle pass for `image_index` and submits it.
    pub fn render_triangle<G: Gpu + ?Sized>(&mut self, gpu: &G, image_index: u32) -> Result<()> {
        self.phase = Phase::Recording;
        let index = image_index as usize;
        let framebuffer = self
            .swapchain
            .framebuffer(index)
            .ok_or_else(|| anyhow!("no framebuffer for image {image_index}"))?;
        let (Some(render_pass), Some(pipeline)) = (self.render_pass, self.pipeline) else {
            bail!("pipeline not built");
        };
        let extent = self.swapchain.extent();
        let clear_color = self.clear_color;

        let slot = self
            .frames
            .slot_mut(index)
            .ok_or_else(|| anyhow!("no frame slot for image {image_index}"))?;
        let (Some(command_buffer), Some(fence), Some(wait_semaphore)) =
            (slot.command_buffer, slot.fence, slot.acquire_semaphore)
        else {
            bail!("frame slot {image_index} is not ready for recording");
        };

        let target = DrawTarget {
            render_pass,
            framebuffer,
            pipeline,
            extent,
            clear_color,
        };
        gpu.record_triangle(command_buffer, &target)
            .context("record command buffer")?;

        let signal_semaphore = match slot.release_semaphore {
            Some(s) => s,
            None => {
                let s = gpu.create_semaphore().context("create_semaphore")?;
                slot.release_semaphore = Some(s);
                s
            }
        };

        gpu.submit(&Submission {
            command_buffer,
            wait_semaphore,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore,
            fence,
        })
        .context("queue_submit")?;
        self.phase = Phase::Submitted;
        Ok(())
    }

    /// Presents `image_index` once its release semaphore fires.
    pub fn present<G: Gpu + ?Sized>(&mut self, gpu: &G, image_index: u32) -> VkResult<bool> {
        self.phase = Phase::Presenting;
        let wait = self
            .frames
            .slot(image_index as usize)
            .and_then(|slot| slot.release_semaphore)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        gpu.present(self.swapchain.handle(), image_index, wait)
    }

    /// One loop iteration. The frame delta is accepted for the caller's
    /// frame pacing and does not influence rendering.
    pub fn update<G: Gpu + ?Sized>(&mut self, gpu: &G, _delta_time: f32) -> Result<TickOutcome> {
        if std::mem::take(&mut self.resize_pending) {
            self.resize(gpu)?;
        }

        let mut acquired = self.acquire_next_image(gpu)?;
        if let Err(status) = acquired {
            if is_stale(status) {
                debug!("acquire: {status:?}, running resize before retry");
                self.resize(gpu)?;
                acquired = self.acquire_next_image(gpu)?;
            }
        }

        let (image_index, suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(status) => {
                if !is_stale(status) {
                    error!("acquire_next_image failed: {status:?}");
                }
                gpu.queue_wait_idle().context("queue_wait_idle")?;
                self.phase = Phase::Idle;
                return Ok(TickOutcome::Skipped { status });
            }
        };
        if suboptimal {
            debug!("acquire: suboptimal, resize deferred to next tick");
            self.resize_pending = true;
        }

        self.render_triangle(gpu, image_index)?;

        let outcome = match self.present(gpu, image_index) {
            Ok(false) => TickOutcome::Presented { image_index },
            Ok(true) => {
                debug!("present: suboptimal, resize deferred to next tick");
                self.resize_pending = true;
                TickOutcome::Presented { image_index }
            }
            Err(status) if is_stale(status) => {
                debug!("present: {status:?}, resize deferred to next tick");
                self.resize_pending = true;
                TickOutcome::Presented { image_index }
            }
            Err(status) => {
                error!("failed to present swapchain image {image_index}: {status:?}");
                TickOutcome::PresentFailed {
                    image_index,
                    status,
                }
            }
        };
        self.phase = Phase::Idle;
        Ok(outcome)
    }

    /// Idles the device, then releases everything in reverse dependency
    /// order. Safe to call more than once.
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if let Err(e) = gpu.device_wait_idle() {
            warn!("device_wait_idle before teardown: {e:?}");
        }
        self.swapchain.destroy_framebuffers(gpu);
        self.frames.destroy(gpu);
        self.recycler.destroy(gpu);
        self.destroy_pipeline(gpu);
        self.swapchain.destroy(gpu);
        self.phase = Phase::Idle;
        self.resize_pending = false;
    }
}
