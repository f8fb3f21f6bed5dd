//! Per-frame "keep running" signal.
//!
//! The host app supplies a callback that is polled once per frame. When it
//! returns `false` the app exits cleanly.

use bevy::prelude::*;

type FrameCallback = Box<dyn FnMut() -> bool + Send + Sync>;

/// Polled once per frame by [`frame_control_system`].
#[derive(Resource)]
pub struct FrameControl {
    callback: FrameCallback,
    frames: u64,
}

impl FrameControl {
    pub fn new(callback: impl FnMut() -> bool + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            frames: 0,
        }
    }

    /// Run for a fixed number of frames, then stop.
    pub fn frame_limit(limit: u64) -> Self {
        let mut remaining = limit;
        Self::new(move || {
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            true
        })
    }

    /// Advance one frame; `false` means the app should exit.
    pub fn update(&mut self) -> bool {
        let keep_running = (self.callback)();
        if keep_running {
            self.frames += 1;
        }
        keep_running
    }

    /// Frames that returned `true` so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for FrameControl {
    fn default() -> Self {
        Self::new(|| true)
    }
}

pub fn frame_control_system(
    mut control: ResMut<FrameControl>,
    mut exit: EventWriter<AppExit>,
) {
    if !control.update() {
        info!("Frame callback requested exit after {} frames", control.frames());
        exit.write(AppExit::Success);
    }
}

/// Adds [`frame_control_system`]; keeps any [`FrameControl`] already inserted.
pub struct FrameControlPlugin;

impl Plugin for FrameControlPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FrameControl>();
        app.add_systems(Last, frame_control_system);
    }
}
