//! Cameras for 3D scenes.
//!
//! [`Camera`] is a perspective camera oriented by yaw and pitch; [`OrthoCamera`] is its
//! orthographic sibling. Both compile into a [`CompiledCamera`] holding the two
//! matrices shaders use, `clip_from_view` and `view_from_world`.
//!
//! Depth follows wgpu conventions: normalized device z runs from 0 (near) to 1 (far).

use crate::device::Size;
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

/// Steepest pitch a camera may take; straight up or down has no defined yaw.
const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Unit vector for a yaw/pitch pair. Yaw 0 and pitch 0 look down -Z; positive yaw
/// turns toward +X, positive pitch toward +Y.
pub fn direction_from_yaw_pitch(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}

/// Yaw and pitch that look along `direction`.
pub fn yaw_pitch_from_direction(direction: Vec3) -> (f32, f32) {
    let d = direction.normalize_or_zero();
    let pitch = d.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH);
    let yaw = d.x.atan2(-d.z);
    (yaw, pitch)
}

/// An up vector usable for a view looking along `direction`.
pub(crate) fn up_for(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// A perspective camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Radians.
    pub yaw: f32,
    /// Radians.
    pub pitch: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            yaw: 0.0,
            pitch: 0.0,
            fov: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        (self.yaw, self.pitch) = yaw_pitch_from_direction(target - self.position);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees;
        self
    }

    pub fn with_range(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn forward(&self) -> Vec3 {
        direction_from_yaw_pitch(self.yaw, self.pitch.clamp(-MAX_PITCH, MAX_PITCH))
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Up, orthogonal to forward and right.
    pub fn up(&self) -> Vec3 {
        self.right().cross(self.forward()).normalize()
    }

    pub fn compile(&self, window: Size) -> CompiledCamera {
        let forward = self.forward();
        CompiledCamera {
            clip_from_view: Mat4::perspective_rh(
                self.fov.to_radians(),
                window.aspect(),
                self.near,
                self.far,
            ),
            view_from_world: Mat4::look_to_rh(self.position, forward, Vec3::Y),
            position: self.position,
            in_dir: forward,
        }
    }
}

/// An orthographic camera; `size` is the height of the view volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthoCamera {
    pub position: Vec3,
    pub direction: Vec3,
    pub size: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrthoCamera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            size: 100.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl OrthoCamera {
    pub fn compile(&self, window: Size) -> CompiledCamera {
        let half_height = self.size / 2.0;
        let half_width = half_height * window.aspect();
        let direction = self.direction.normalize_or(Vec3::NEG_Z);
        CompiledCamera {
            clip_from_view: Mat4::orthographic_rh(
                -half_width,
                half_width,
                -half_height,
                half_height,
                self.near,
                self.far,
            ),
            view_from_world: Mat4::look_to_rh(self.position, direction, up_for(direction)),
            position: self.position,
            in_dir: direction,
        }
    }
}

/// Camera matrices ready for shaders.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompiledCamera {
    /// Also known as the projection matrix.
    pub clip_from_view: Mat4,
    /// Also known as the view matrix.
    pub view_from_world: Mat4,
    pub position: Vec3,
    /// Unit view direction.
    pub in_dir: Vec3,
}

impl CompiledCamera {
    pub fn clip_from_world(&self) -> Mat4 {
        self.clip_from_view * self.view_from_world
    }

    /// World-space corners of the view frustum: the near plane first, then the far
    /// plane, each in (-x -y), (+x -y), (-x +y), (+x +y) order.
    pub fn frustum_corners(&self) -> [Vec3; 8] {
        let world_from_clip = self.clip_from_world().inverse();
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let x = if i & 1 == 0 { -1.0 } else { 1.0 };
            let y = if i & 2 == 0 { -1.0 } else { 1.0 };
            let z = if i & 4 == 0 { 0.0 } else { 1.0 };
            *corner = world_from_clip.project_point3(Vec3::new(x, y, z));
        }
        corners
    }

    /// Pixel coordinate of a world position, origin at the top left.
    pub fn screen_from_world(&self, world: Vec3, resolution: Vec2) -> Vec2 {
        let clip = self.clip_from_world() * world.extend(1.0);
        let ndc = clip.xy() / clip.w;
        Vec2::new(
            (ndc.x + 1.0) * 0.5 * resolution.x,
            (1.0 - ndc.y) * 0.5 * resolution.y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::new();
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(camera.right().abs_diff_eq(Vec3::X, 1e-6));
        assert!(camera.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn looking_at_points_toward_target() {
        let camera = Camera::new()
            .at(Vec3::new(0.0, 2.0, 0.0))
            .looking_at(Vec3::new(3.0, 2.0, -3.0));
        let expected = Vec3::new(1.0, 0.0, -1.0).normalize();
        assert!(camera.forward().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn yaw_pitch_round_trip() {
        let direction = Vec3::new(0.3, -0.5, 0.8).normalize();
        let (yaw, pitch) = yaw_pitch_from_direction(direction);
        assert!(direction_from_yaw_pitch(yaw, pitch).abs_diff_eq(direction, 1e-5));
    }

    #[test]
    fn frustum_corners_span_near_and_far() {
        let camera = Camera::new().at(Vec3::ZERO).with_range(1.0, 10.0);
        let corners = camera.compile(Size::new(100, 100)).frustum_corners();

        for near in &corners[..4] {
            assert!((near.z + 1.0).abs() < 1e-4, "{near}");
        }
        for far in &corners[4..] {
            assert!((far.z + 10.0).abs() < 1e-3, "{far}");
        }
        // square window, 45 degree fov
        let half = (22.5_f32).to_radians().tan();
        assert!(corners[3].abs_diff_eq(Vec3::new(half, half, -1.0), 1e-4));
    }

    #[test]
    fn screen_center_maps_to_half_resolution() {
        let compiled = Camera::new().at(Vec3::ZERO).compile(Size::new(200, 100));
        let screen = compiled.screen_from_world(Vec3::new(0.0, 0.0, -5.0), Vec2::new(200.0, 100.0));
        assert!(screen.abs_diff_eq(Vec2::new(100.0, 50.0), 1e-3));
    }

    #[test]
    fn vertical_ortho_camera_picks_another_up() {
        let camera = OrthoCamera {
            direction: Vec3::NEG_Y,
            ..Default::default()
        };
        let compiled = camera.compile(Size::new(1, 1));
        assert!(compiled.view_from_world.is_finite());
    }
}
