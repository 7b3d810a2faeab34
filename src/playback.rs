use crate::error::{Error, Result};
use crate::motion::Motion;
use crate::types::*;

/// Playback clock of a motion: play/pause, stepping, seeking and a speed multiplier.
/// Time is in clip seconds, so with a speed of 0.5 one wall clock second advances `0.5 * fps`
/// frames.
#[derive(Debug, Clone)]
pub struct Player {
    pub time: f64,
    pub playing: bool,
    speed: f64,
    fps: f64,
    num_frames: usize,
    loop_mode: LoopMode,
}

fn check_speed(speed: f64) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "playback speed must be a positive number, got {speed}"
        )));
    }
    Ok(())
}

impl Player {
    pub fn new(motion: &Motion, speed: f64) -> Result<Self> {
        check_speed(speed)?;
        Ok(Player {
            time: 0.0,
            playing: true,
            speed,
            fps: motion.fps,
            num_frames: motion.num_frames(),
            loop_mode: motion.loop_mode,
        })
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        check_speed(speed)?;
        self.speed = speed;
        Ok(())
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn length(&self) -> f64 {
        if self.num_frames < 2 {
            return 0.0;
        }
        (self.num_frames - 1) as f64 / self.fps
    }

    /// Move the clock forward by `dt` wall clock seconds.
    pub fn advance(&mut self, dt: f64) {
        if !self.playing {
            return;
        }
        let length = self.length();
        if length <= 0.0 {
            self.time = 0.0;
            return;
        }
        self.time += dt * self.speed;
        match self.loop_mode {
            LoopMode::Wrap => self.time = self.time.rem_euclid(length),
            LoopMode::Clamp => {
                if self.time >= length {
                    self.time = length;
                    self.playing = false;
                }
            }
        }
    }

    pub fn toggle(&mut self) {
        //// replaying a clamped clip that ran to the end starts it over
        if !self.playing && self.loop_mode == LoopMode::Clamp && self.time >= self.length() {
            self.time = 0.0;
        }
        self.playing = !self.playing;
    }

    /// Pause and move by whole frames. `Wrap` cycles around the clip, `Clamp` stops at its ends.
    pub fn step(&mut self, delta: i64) {
        self.playing = false;
        if self.num_frames == 0 {
            return;
        }
        let n = self.num_frames as i64;
        let frame = self.current_frame() as i64 + delta;
        let frame = match self.loop_mode {
            LoopMode::Wrap => frame.rem_euclid(n),
            LoopMode::Clamp => frame.clamp(0, n - 1),
        };
        self.time = frame as f64 / self.fps;
    }

    pub fn seek_frame(&mut self, frame: Index) {
        let frame = frame.min(self.num_frames.saturating_sub(1));
        self.time = frame as f64 / self.fps;
    }

    pub fn restart(&mut self) {
        self.time = 0.0;
        self.playing = true;
    }

    /// Frame shown at the current time (the last frame at or before it).
    pub fn current_frame(&self) -> Index {
        if self.num_frames == 0 {
            return 0;
        }
        let frame = (self.time * self.fps + 1e-6).floor().max(0.0) as Index;
        frame.min(self.num_frames - 1)
    }
}
