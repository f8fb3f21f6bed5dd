//! First-person fly camera.
//!
//! - Left mouse drag: look around (yaw and pitch, degrees)
//! - W/A/S/D: move on the horizontal plane
//! - Space / Left Shift: move up / down

use bevy::input::mouse::AccumulatedMouseMotion;
use bevy::prelude::*;

/// Pitch limit in degrees.
pub const MAX_PITCH: f32 = 89.0;

pub const DEFAULT_FOV_DEGREES: f32 = 45.0;
pub const DEFAULT_NEAR: f32 = 0.001;
pub const DEFAULT_FAR: f32 = 1000.0;

/// Spawn alongside `Camera3d` and [`fly_projection`].
#[derive(Component, Clone, Debug)]
pub struct FlyCamera {
    /// Horizontal angle in degrees; -90 looks down -Z.
    pub yaw: f32,
    /// Vertical angle in degrees, clamped to [`MAX_PITCH`].
    pub pitch: f32,
    /// Degrees per pixel of mouse motion
    pub sensitivity: f32,
    /// Units per second
    pub speed: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            yaw: -90.0,
            pitch: 0.0,
            sensitivity: 0.05,
            speed: 5.0,
        }
    }
}

/// Perspective projection with the fly camera defaults.
pub fn fly_projection() -> Projection {
    Projection::Perspective(PerspectiveProjection {
        fov: DEFAULT_FOV_DEGREES.to_radians(),
        near: DEFAULT_NEAR,
        far: DEFAULT_FAR,
        ..default()
    })
}

impl FlyCamera {
    /// Unit view direction.
    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    /// Horizontal forward direction, ignoring pitch.
    pub fn forward_flat(&self) -> Vec3 {
        let yaw = self.yaw.to_radians();
        Vec3::new(yaw.cos(), 0.0, yaw.sin())
    }

    /// Horizontal right direction.
    pub fn right_flat(&self) -> Vec3 {
        let forward = self.forward_flat();
        Vec3::new(-forward.z, 0.0, forward.x)
    }

    /// Add yaw and pitch in degrees.
    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        self.yaw += yaw;
        self.pitch = (self.pitch + pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Point `transform` along [`Self::front`].
    pub fn apply_to(&self, transform: &mut Transform) {
        let target = transform.translation + self.front();
        transform.look_at(target, Vec3::Y);
    }
}

/// Movement for one frame from the pressed keys, before scaling by speed.
pub fn movement_direction(camera: &FlyCamera, keys: &ButtonInput<KeyCode>) -> Vec3 {
    let forward = camera.forward_flat();
    let right = camera.right_flat();
    let mut direction = Vec3::ZERO;
    if keys.pressed(KeyCode::KeyW) {
        direction += forward;
    }
    if keys.pressed(KeyCode::KeyS) {
        direction -= forward;
    }
    if keys.pressed(KeyCode::KeyD) {
        direction += right;
    }
    if keys.pressed(KeyCode::KeyA) {
        direction -= right;
    }
    if keys.pressed(KeyCode::Space) {
        direction += Vec3::Y;
    }
    if keys.pressed(KeyCode::ShiftLeft) {
        direction -= Vec3::Y;
    }
    direction
}

/// System that moves and turns fly cameras from keyboard and mouse input.
pub fn fly_camera_system(
    time: Res<Time>,
    keys: Res<ButtonInput<KeyCode>>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mut query: Query<(&mut FlyCamera, &mut Transform)>,
) {
    for (mut camera, mut transform) in query.iter_mut() {
        if mouse_button.pressed(MouseButton::Left) {
            let delta = mouse_motion.delta * camera.sensitivity;
            // Screen Y grows downward
            camera.rotate(delta.x, -delta.y);
        }

        let movement = movement_direction(&camera, &keys);
        transform.translation += movement * camera.speed * time.delta_secs();
        camera.apply_to(&mut transform);
    }
}

/// Plugin that adds fly camera controls.
pub struct FlyCameraPlugin;

impl Plugin for FlyCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, fly_camera_system);
    }
}
