// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Failures that abort renderer construction. Nothing here is retried.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("required {scope} extensions are missing: {}", .missing.join(", "))]
    MissingExtensions {
        scope: &'static str,
        missing: Vec<String>,
    },

    #[error("no Vulkan physical device available")]
    NoPhysicalDevice,

    #[error("physical device reports no queue families")]
    NoQueueFamilies,

    #[error("no queue family supports both graphics and present")]
    NoGraphicsPresentQueue,

    #[error("window surface creation failed: {0}")]
    Surface(vk::Result),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("surface offers no formats")]
    NoSurfaceFormats,

    #[error("shader {name}: {reason}")]
    Shader { name: String, reason: String },
}
