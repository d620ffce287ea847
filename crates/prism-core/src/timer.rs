// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Measures the time between ticks of the presentation loop and keeps a
/// once-per-second frame rate estimate.
#[derive(Debug)]
pub struct FrameTimer {
    last_tick: Instant,
    window_start: Instant,
    frames_in_window: u32,
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_tick: now,
            window_start: now,
            frames_in_window: 0,
        }
    }

    /// Seconds elapsed since the previous call (or since construction).
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f32 {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        delta.as_secs_f32()
    }

    /// Counts one presented frame.
    pub fn frame_presented(&mut self) {
        self.frames_in_window = self.frames_in_window.saturating_add(1);
    }

    /// Returns the frame count of the last full second, once per second.
    pub fn fps(&mut self) -> Option<u32> {
        self.fps_at(Instant::now())
    }

    fn fps_at(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) < Duration::from_secs(1) {
            return None;
        }
        let frames = self.frames_in_window;
        self.frames_in_window = 0;
        self.window_start = now;
        Some(frames)
    }

    /// Drops the current fps window, e.g. after the window was paused.
    pub fn reset_window(&mut self) {
        self.frames_in_window = 0;
        self.window_start = Instant::now();
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
