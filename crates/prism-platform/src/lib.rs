// SPDX-License-Identifier: CEPL-1.0
//! Platform window collaborator: re-exports winit and answers "what is the
//! current drawable extent" for a window.
pub use winit;

use prism_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Current drawable extent of `window` in physical pixels.
pub fn drawable_size(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_one_to_one() {
        let s = to_render_size(PhysicalSize::new(1280, 720));
        assert_eq!(s, RenderSize { width: 1280, height: 720 });
        assert!(to_render_size(PhysicalSize::new(0, 0)).is_empty());
    }
}
