// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: a single triangle presented through a manually
//! synchronized swapchain.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use prism_render::{FrameStatus, RenderSize, Renderer};

pub mod capabilities;
pub mod context;
pub mod debug;
mod error;
pub mod frame;
pub mod gpu;
#[cfg(test)]
mod mock_gpu;
mod pipeline;
pub mod presenter;
pub mod shader;
pub mod swapchain;

pub use context::{ContextConfig, DeviceContext};
pub use debug::{DiagnosticsSink, MessageKind, NullSink, Severity, TracingSink};
pub use error::SetupError;
pub use presenter::{Presenter, TickOutcome};
pub use shader::ShaderSource;

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.033, 1.0];

/// Construction-time knobs for [`VkRenderer`].
pub struct VkOptions {
    pub app_name: String,
    pub validation: bool,
    pub shaders: ShaderSource,
    pub clear_color: [f32; 4],
    pub sink: Box<dyn DiagnosticsSink>,
}

fn env_flag(value: Option<String>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

impl VkOptions {
    /// Defaults, overridden by `PRISM_VALIDATION` and `PRISM_SHADER_DIR`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("PRISM_VALIDATION").ok(),
            std::env::var("PRISM_SHADER_DIR").ok(),
        )
    }

    fn from_vars(validation: Option<String>, shader_dir: Option<String>) -> Self {
        Self {
            app_name: "prism".to_string(),
            validation: env_flag(validation).unwrap_or(cfg!(debug_assertions)),
            shaders: shader_dir
                .filter(|d| !d.is_empty())
                .map(|d| ShaderSource::Dir(PathBuf::from(d)))
                .unwrap_or_default(),
            clear_color: DEFAULT_CLEAR_COLOR,
            sink: Box::new(TracingSink),
        }
    }
}

impl Default for VkOptions {
    fn default() -> Self {
        Self::from_env()
    }
}

fn to_extent(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

pub fn frame_status(outcome: TickOutcome) -> FrameStatus {
    match outcome {
        TickOutcome::Presented { .. } => FrameStatus::Presented,
        TickOutcome::Skipped { .. } => FrameStatus::Skipped,
        TickOutcome::PresentFailed { status, .. } => FrameStatus::PresentFailed(format!("{status:?}")),
    }
}

pub struct VkRenderer {
    // Declared before the context so it is torn down first.
    presenter: Presenter,
    ctx: DeviceContext,
}

impl VkRenderer {
    pub fn with_options(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: VkOptions,
    ) -> Result<Self> {
        let shaders = options.shaders.load().context("load triangle shaders")?;
        let ctx = DeviceContext::new(
            window,
            display,
            ContextConfig {
                app_name: options.app_name,
                validation: options.validation,
                sink: options.sink,
            },
        )?;
        let presenter = Presenter::new(&ctx, to_extent(size), shaders, options.clear_color)
            .context("swapchain and pipeline setup")?;
        let extent = presenter.extent();
        info!(
            "renderer ready: {}x{}, {} images",
            extent.width,
            extent.height,
            presenter.frames().len()
        );
        Ok(Self { presenter, ctx })
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_options(window, display, size, VkOptions::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            return Ok(());
        }
        self.presenter.set_requested_extent(to_extent(size));
        self.presenter.resize(&self.ctx)?;
        Ok(())
    }

    fn update(&mut self, delta_time: f32) -> Result<FrameStatus> {
        let outcome = self.presenter.update(&self.ctx, delta_time)?;
        Ok(frame_status(outcome))
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.presenter.set_clear_color(rgba);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.presenter.destroy(&self.ctx);
    }
}
