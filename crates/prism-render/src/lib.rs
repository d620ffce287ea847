// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// A minimised window reports a zero-sized drawable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What one tick of the presentation loop achieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and handed to the presentation engine.
    Presented,
    /// No image could be acquired this tick; the next tick retries.
    Skipped,
    /// The frame was rendered but presentation failed.
    PresentFailed(String),
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self>
    where
        Self: Sized;

    /// The drawable changed size. Backends re-check their surface and only
    /// rebuild when it actually differs.
    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Runs one iteration of the presentation loop. `delta_time` is the
    /// elapsed time since the previous tick in seconds.
    fn update(&mut self, delta_time: f32) -> Result<FrameStatus>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
