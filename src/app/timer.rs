use std::time::{Duration, Instant};
use chrono::{Datelike, Local, Timelike};
use glam::Vec4;

/// Frames are averaged over at least this long before the fps readout changes.
pub const FPS_WINDOW: Duration = Duration::from_millis(166);

/// Wall clock for the render loop: total time, frame delta and a smoothed fps count.
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    delta: f32,

    window_start: Instant,
    window_frames: u32,
    fps: u32,
    fps_updated: bool,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    fn started_at(now: Instant) -> Self {
        Self {
            start: now,
            last_tick: now,
            delta: 0.0,

            window_start: now,
            window_frames: 0,
            fps: 0,
            fps_updated: false,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Counts one frame ending at `now`.
    pub fn tick_at(&mut self, now: Instant) {
        self.delta = now.saturating_duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        self.window_frames += 1;
        let window = now.saturating_duration_since(self.window_start);
        if window > FPS_WINDOW {
            self.fps = (self.window_frames as f32 / window.as_secs_f32()).round() as u32;
            self.fps_updated = true;
            self.window_frames = 0;
            self.window_start = now;
        }
    }

    /// Seconds since the timer started, as of the last tick.
    pub fn elapsed(&self) -> f32 {
        self.last_tick.saturating_duration_since(self.start).as_secs_f32()
    }

    /// Seconds between the last two ticks.
    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// True once after every fps recomputation.
    pub fn take_fps_updated(&mut self) -> bool {
        std::mem::take(&mut self.fps_updated)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Local date as year, month counted from 0, day of month and seconds of the minute.
pub fn local_date() -> Vec4 {
    date_vec(&Local::now())
}

fn date_vec<T: Datelike + Timelike>(now: &T) -> Vec4 {
    Vec4::new(
        now.year() as f32,
        now.month0() as f32,
        now.day() as f32,
        now.second() as f32,
    )
}
