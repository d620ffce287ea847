// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use prism_core::{init_tracing, FrameTimer};
use prism_platform::drawable_size;
use prism_render::{FrameStatus, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use tracing::{debug, error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, Args, Settings};

struct App {
    settings: Settings,
    // Dropped before the window it renders into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    timer: FrameTimer,
    presented: u64,
    paused: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(settings: Settings) -> Self {
        App {
            settings,
            renderer: None,
            window: None,
            render_size: RenderSize {
                width: 1,
                height: 1,
            },
            timer: FrameTimer::new(),
            presented: 0,
            paused: false,
            exiting: false,
            failure: None,
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop, failure: Option<anyhow::Error>) {
        self.exiting = true;
        if failure.is_some() {
            self.failure = failure;
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let dt = self.timer.tick();
        match renderer.update(dt) {
            Ok(FrameStatus::Presented) => {
                self.timer.frame_presented();
                self.presented += 1;
            }
            Ok(FrameStatus::Skipped) => debug!("frame skipped"),
            Ok(FrameStatus::PresentFailed(status)) => warn!("present failed: {status}"),
            Err(e) => {
                error!("render error: {e:#}");
                self.shutdown(event_loop, Some(e));
                return;
            }
        }

        let limit = self.settings.max_frames;
        if limit > 0 && self.presented >= limit {
            info!("presented {} frames, exiting", self.presented);
            self.shutdown(event_loop, None);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attrs = Window::default_attributes()
                .with_title("prism")
                .with_inner_size(LogicalSize::new(800.0, 600.0));
            let window = match event_loop.create_window(attrs) {
                Ok(w) => w,
                Err(e) => {
                    error!("create_window: {e}");
                    self.shutdown(event_loop, Some(anyhow::anyhow!("create_window: {e}")));
                    return;
                }
            };

            let size = drawable_size(&window);
            self.render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            let renderer = match VkRenderer::with_options(
                &window,
                &window,
                self.render_size,
                self.settings.vk_options(),
            ) {
                Ok(r) => r,
                Err(e) => {
                    error!("vk init failed: {e:#}");
                    self.window = Some(window);
                    self.shutdown(event_loop, Some(e));
                    return;
                }
            };
            info!(
                "window {}x{}, frame limit {}",
                self.render_size.width, self.render_size.height, self.settings.max_frames
            );

            self.window = Some(window);
            self.renderer = Some(renderer);
        }

        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop, None);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = prism_platform::to_render_size(new_size);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    self.timer.reset_window();
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if !self.paused {
                    if let Some(renderer) = &mut self.renderer {
                        if let Err(e) = renderer.resize(self.render_size) {
                            error!("resize failed: {e:#}");
                            self.shutdown(event_loop, Some(e));
                            return;
                        }
                    }
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                self.tick(event_loop);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        // FIFO presentation paces the loop.
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(fps) = self.timer.fps() {
            info!("fps ~ {}", fps);
        }
    }
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let settings = Settings::resolve(&args, &cfg);
    debug!("settings: {:?}", settings);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(settings);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
