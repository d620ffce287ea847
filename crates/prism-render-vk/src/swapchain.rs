// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Context, Result};
use ash::vk;
use tracing::{debug, info, warn};

use crate::error::SetupError;
use crate::frame::FramePool;
use crate::gpu::{Gpu, SwapchainRequest};

/// The presentable image chain and everything derived from its images.
///
/// `image_views` and `framebuffers` have one entry per chain image once
/// initialization completes; both are empty when torn down.
#[derive(Debug, Default)]
pub struct SwapchainState {
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub handle: vk::SwapchainKHR,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainState {
    pub fn is_empty(&self) -> bool {
        self.handle == vk::SwapchainKHR::null()
    }

    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }
}

pub fn same_extent(a: vk::Extent2D, b: vk::Extent2D) -> bool {
    a.width == b.width && a.height == b.height
}

/// One more than the minimum so we are never stuck waiting on the
/// presentation engine, unless the surface caps the count (0 = no cap).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 && desired > caps.max_image_count {
        caps.max_image_count
    } else {
        desired
    }
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|m| caps.supported_composite_alpha.contains(*m))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// The extent the chain must be created with.
///
/// `u32::MAX` means the swapchain decides, so the cached extent is clamped
/// into the allowed range. A zero-sized current extent also defers to the
/// cached extent.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, cached: vk::Extent2D) -> vk::Extent2D {
    let current = caps.current_extent;
    if current.width == u32::MAX {
        vk::Extent2D {
            width: cached
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: cached
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else if current.width == 0 || current.height == 0 {
        cached
    } else {
        current
    }
}

/// 8-bit sRGB first, otherwise whatever the driver lists first.
pub fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<(vk::SurfaceFormatKHR, &'static str)> {
    let preferred = [
        (vk::Format::R8G8B8A8_SRGB, "rgba8_srgb"),
        (vk::Format::B8G8R8A8_SRGB, "bgra8_srgb"),
        (vk::Format::A8B8G8R8_SRGB_PACK32, "abgr8_srgb_pack32"),
    ];
    for (want, reason) in preferred {
        if let Some(f) = formats
            .iter()
            .copied()
            .find(|f| f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        {
            return Some((f, reason));
        }
    }
    formats.first().copied().map(|f| (f, "driver_default"))
}

/// Owns the image chain, its views and the per-image framebuffers.
#[derive(Debug, Default)]
pub struct SwapchainManager {
    state: SwapchainState,
}

impl SwapchainManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SwapchainState {
        &self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.state.extent
    }

    pub fn format(&self) -> vk::Format {
        self.state.format.format
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.state.handle
    }

    pub fn framebuffer(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.state.framebuffers.get(image_index).copied()
    }

    /// Creates the chain, replacing the current one if there is one.
    ///
    /// `requested` is used whenever the surface leaves the size to us. When
    /// an old chain exists it is handed to the driver as `old_swapchain`;
    /// afterwards its views and the frame slots of its images are retired
    /// and it is destroyed. `frames` is resized to the new image count.
    pub fn build<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        requested: vk::Extent2D,
        frames: &mut FramePool,
    ) -> Result<()> {
        if !self.state.framebuffers.is_empty() {
            self.teardown_framebuffers(gpu)?;
        }

        let caps = gpu
            .surface_capabilities()
            .context("get_physical_device_surface_capabilities")?;
        let formats = gpu
            .surface_formats()
            .context("get_physical_device_surface_formats")?;
        let (format, reason) = pick_surface_format(&formats).ok_or(SetupError::NoSurfaceFormats)?;
        let extent = resolve_extent(&caps, requested);

        let request = SwapchainRequest {
            min_image_count: choose_image_count(&caps),
            format,
            extent,
            pre_transform: choose_pre_transform(&caps),
            composite_alpha: choose_composite_alpha(&caps),
            present_mode: vk::PresentModeKHR::FIFO,
            old_swapchain: self.state.handle,
        };
        info!(
            "swapchain: format {:?} / {:?} ({}), present_mode: FIFO, extent: {}x{}, images(min={} → picked={})",
            format.format,
            format.color_space,
            reason,
            extent.width,
            extent.height,
            caps.min_image_count,
            request.min_image_count
        );

        let new_handle = gpu.create_swapchain(&request).context("create_swapchain")?;
        let old_handle = std::mem::replace(&mut self.state.handle, new_handle);

        if old_handle != vk::SwapchainKHR::null() {
            for view in self.state.image_views.drain(..) {
                gpu.destroy_image_view(view);
            }
            let old_count = match gpu.swapchain_images(old_handle) {
                Ok(images) => images.len(),
                Err(e) => {
                    warn!("get_swapchain_images(old): {e:?}; retiring every frame slot");
                    frames.len()
                }
            };
            frames.retire_first(gpu, old_count);
            gpu.destroy_swapchain(old_handle);
            debug!("swapchain: retired old chain ({} images)", old_count);
        }

        self.state.extent = extent;
        self.state.format = format;

        let images = gpu
            .swapchain_images(new_handle)
            .context("get_swapchain_images")?;
        frames
            .resize(gpu, images.len())
            .context("frame slot allocation")?;
        for image in images {
            let view = gpu
                .create_image_view(image, format.format)
                .context("create_image_view")?;
            self.state.image_views.push(view);
        }
        Ok(())
    }

    /// Replaces a live chain, handing the old one to the driver for reuse.
    /// Framebuffers must be torn down first.
    pub fn rebuild<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        requested: vk::Extent2D,
        frames: &mut FramePool,
    ) -> Result<()> {
        if self.state.is_empty() {
            bail!("rebuild without a swapchain");
        }
        self.build(gpu, requested, frames)
    }

    pub fn init_framebuffers<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        debug_assert!(self.state.framebuffers.is_empty());
        for &view in &self.state.image_views {
            let fb = gpu
                .create_framebuffer(render_pass, view, self.state.extent)
                .context("create_framebuffer")?;
            self.state.framebuffers.push(fb);
        }
        Ok(())
    }

    /// Waits for the queue to drain, then destroys every framebuffer.
    pub fn teardown_framebuffers<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        gpu.queue_wait_idle().context("queue_wait_idle")?;
        self.destroy_framebuffers(gpu);
        Ok(())
    }

    pub fn destroy_framebuffers<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for fb in self.state.framebuffers.drain(..) {
            gpu.destroy_framebuffer(fb);
        }
    }

    /// Destroys views and the chain. The device must already be idle.
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        self.destroy_framebuffers(gpu);
        for view in self.state.image_views.drain(..) {
            gpu.destroy_image_view(view);
        }
        if self.state.handle != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.state.handle);
            self.state.handle = vk::SwapchainKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_gpu::{Event, MockGpu};
    use ash::vk::Handle;

    fn caps() -> vk::SurfaceCapabilitiesKHR {
        let gpu = MockGpu::new(800, 600);
        let caps = *gpu.caps.borrow();
        caps
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut c = caps();
        c.min_image_count = 2;
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn pre_transform_prefers_identity() {
        let mut c = caps();
        c.supported_transforms =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        c.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::IDENTITY);
        c.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn composite_alpha_follows_preference_order() {
        let mut c = caps();
        c.supported_composite_alpha =
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(choose_composite_alpha(&c), vk::CompositeAlphaFlagsKHR::INHERIT);
        c.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(&c),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
    }

    #[test]
    fn extent_resolution() {
        let mut c = caps();
        c.current_extent = extent(1024, 768);
        assert!(same_extent(resolve_extent(&c, extent(800, 600)), extent(1024, 768)));

        c.current_extent = extent(u32::MAX, u32::MAX);
        c.max_image_extent = extent(640, 480);
        assert!(same_extent(resolve_extent(&c, extent(800, 600)), extent(640, 480)));

        c.current_extent = extent(0, 0);
        assert!(same_extent(resolve_extent(&c, extent(800, 600)), extent(800, 600)));
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let (f, _) = pick_surface_format(&[unorm, srgb]).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_SRGB);
        let (f, reason) = pick_surface_format(&[unorm]).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(reason, "driver_default");
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn build_requests_fifo_and_creates_one_view_per_image() {
        let gpu = MockGpu::new(800, 600);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        sc.build(&gpu, extent(800, 600), &mut frames).unwrap();

        let req = gpu.last_request.get().unwrap();
        assert_eq!(req.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(req.min_image_count, 3);
        assert_eq!(req.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
        assert_eq!(req.composite_alpha, vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert_eq!(req.old_swapchain, vk::SwapchainKHR::null());

        assert_eq!(sc.state().image_count(), 3);
        assert_eq!(frames.len(), 3);
        assert!(sc.state().framebuffers.is_empty());
        sc.init_framebuffers(&gpu, vk::RenderPass::from_raw(999)).unwrap();
        assert_eq!(sc.state().framebuffers.len(), 3);
    }

    #[test]
    fn rebuild_at_same_extent_keeps_structure() {
        let gpu = MockGpu::new(800, 600);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        sc.build(&gpu, extent(800, 600), &mut frames).unwrap();
        let first_handle = sc.handle();
        let first_format = sc.format();
        let first_count = sc.state().image_count();

        sc.rebuild(&gpu, sc.extent(), &mut frames).unwrap();

        assert_ne!(sc.handle(), first_handle);
        assert_eq!(sc.format(), first_format);
        assert_eq!(sc.state().image_count(), first_count);
        assert_eq!(frames.len(), first_count);
        assert!(same_extent(sc.extent(), extent(800, 600)));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn rebuild_needs_a_live_chain() {
        let gpu = MockGpu::new(800, 600);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        assert!(sc.rebuild(&gpu, extent(800, 600), &mut frames).is_err());
        assert!(gpu.events().is_empty(), "{:?}", gpu.events());
        assert!(frames.is_empty());
    }

    #[test]
    fn rebuild_hands_over_then_destroys_old_chain() {
        let gpu = MockGpu::new(800, 600);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        sc.build(&gpu, extent(800, 600), &mut frames).unwrap();
        let old = sc.handle().as_raw();
        gpu.clear_events();

        sc.rebuild(&gpu, sc.extent(), &mut frames).unwrap();
        let events = gpu.events();

        let created = events
            .iter()
            .position(|e| matches!(e, Event::CreateSwapchain { old: o, .. } if *o == old))
            .expect("old chain passed to create_swapchain");
        let destroyed = events
            .iter()
            .position(|e| *e == Event::DestroySwapchain(old))
            .expect("old chain destroyed");
        let last_view_destroyed = events
            .iter()
            .rposition(|e| matches!(e, Event::Destroy("image_view", _)))
            .unwrap();
        assert!(created < last_view_destroyed);
        assert!(last_view_destroyed < destroyed);
        assert_eq!(gpu.live_of("swapchain"), 1);
        assert_eq!(gpu.live_of("image_view"), 3);
    }

    #[test]
    fn zero_extent_falls_back_to_cached() {
        let gpu = MockGpu::new(0, 0);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        sc.build(&gpu, extent(800, 600), &mut frames).unwrap();

        let req = gpu.last_request.get().unwrap();
        assert!(same_extent(req.extent, extent(800, 600)));
        assert!(same_extent(sc.extent(), extent(800, 600)));
    }

    #[test]
    fn creation_failure_is_an_error() {
        let gpu = MockGpu::new(800, 600);
        gpu.fail_next_swapchain(vk::Result::ERROR_INITIALIZATION_FAILED);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        let err = sc.build(&gpu, extent(800, 600), &mut frames).unwrap_err();
        assert!(format!("{err:#}").contains("create_swapchain"));
        assert!(sc.state().is_empty());
    }

    #[test]
    fn no_surface_formats_is_a_setup_error() {
        let gpu = MockGpu::new(800, 600);
        gpu.formats.borrow_mut().clear();
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        let err = sc.build(&gpu, extent(800, 600), &mut frames).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn destroy_releases_everything() {
        let gpu = MockGpu::new(800, 600);
        let mut frames = FramePool::new();
        let mut sc = SwapchainManager::new();
        sc.build(&gpu, extent(800, 600), &mut frames).unwrap();
        sc.init_framebuffers(&gpu, vk::RenderPass::from_raw(999)).unwrap();
        sc.destroy(&gpu);
        frames.destroy(&gpu);
        sc.destroy(&gpu);
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }
}
