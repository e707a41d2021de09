//! What gets drawn each frame.
//!
//! A [`World`] is a flat description rebuilt or edited by the application as it
//! likes: meshes with materials and transforms, instanced batches, lights, an
//! optional skybox and debug lines. The renderer reads it; it never keeps
//! references into it between frames.
//!
//! # Transforms
//!
//! [`Transform`] uses a builder pattern:
//!
//! ```
//! use tessera::{Quat, Transform, Vec3};
//!
//! let transform = Transform::new()
//!     .position(Vec3::new(0.0, 1.0, -5.0))
//!     .rotation(Quat::from_rotation_y(0.5))
//!     .uniform_scale(2.0);
//! ```

use crate::camera::{CompiledCamera, direction_from_yaw_pitch, up_for};
use crate::device::{MeshId, TextureId};
use crate::material::Material;
use glam::{Mat4, Quat, Vec3, Vec4};

/// Position, rotation and scale of an object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// World-space position (translation).
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Scale factors for each axis.
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Creates an identity transform (origin, no rotation, unit scale).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transform positioned at the given location.
    ///
    /// ```
    /// use tessera::{Transform, Vec3};
    ///
    /// let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
    /// assert_eq!(transform.position, Vec3::new(1.0, 2.0, 3.0));
    /// ```
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Sets the rotation; see glam's `Quat::from_rotation_*` and `Quat::from_axis_angle`.
    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets non-uniform scale factors for each axis.
    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the same scale on all axes.
    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// The world-from-local matrix: scale, then rotate, then translate.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// How a mesh turns to face the camera.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Billboarding {
    #[default]
    None,
    /// Faces the camera position.
    Screen,
    /// Aligned with the camera view direction; cheaper, slightly wrong near the edges.
    ScreenFast,
    /// Turns around +Y toward the camera position.
    AxialY,
    /// Turns around +Y, aligned with the camera view direction.
    AxialYFast,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshId,
    pub material: Material,
    pub transform: Transform,
    /// Outline color; outlined meshes get a silhouette drawn around them.
    pub outline: Option<Vec3>,
    pub billboarding: Billboarding,
}

impl MeshInstance {
    pub fn new(mesh: MeshId, material: Material) -> Self {
        Self {
            mesh,
            material,
            transform: Transform::default(),
            outline: None,
            billboarding: Billboarding::None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_outline(mut self, color: Vec3) -> Self {
        self.outline = Some(color);
        self
    }

    pub fn with_billboarding(mut self, billboarding: Billboarding) -> Self {
        self.billboarding = billboarding;
        self
    }

    /// World matrix for this frame, with billboarding applied.
    pub fn world_from_local(&self, camera: &CompiledCamera) -> Mat4 {
        let t = &self.transform;
        let rotation = match self.billboarding {
            Billboarding::None => return t.matrix(),
            Billboarding::Screen => {
                fixed_right_basis((t.position - camera.position).normalize_or(camera.in_dir), Vec3::Y)
            }
            Billboarding::ScreenFast => fixed_right_basis(camera.in_dir, Vec3::Y),
            Billboarding::AxialY => {
                fixed_up_basis((t.position - camera.position).normalize_or(camera.in_dir), Vec3::Y)
            }
            Billboarding::AxialYFast => fixed_up_basis(camera.in_dir, Vec3::Y),
        };
        Mat4::from_translation(t.position) * rotation * Mat4::from_scale(t.scale)
    }
}

fn basis(right: Vec3, up: Vec3, normal: Vec3) -> Mat4 {
    Mat4::from_cols(right.extend(0.0), up.extend(0.0), normal.extend(0.0), Vec4::W)
}

/// Keeps `normal`, recomputes up.
fn fixed_right_basis(normal: Vec3, up: Vec3) -> Mat4 {
    let right = normal.cross(up).normalize_or(Vec3::X);
    let up = right.cross(normal).normalize_or(Vec3::Y);
    basis(right, up, normal)
}

/// Keeps `up`, recomputes the normal.
fn fixed_up_basis(normal: Vec3, up: Vec3) -> Mat4 {
    let right = normal.cross(up).normalize_or(Vec3::X);
    let normal = right.cross(up).normalize_or(Vec3::Z);
    basis(right, up, normal)
}

/// One mesh drawn many times in a single call.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedMesh {
    pub mesh: MeshId,
    pub material: Material,
    pub transforms: Vec<Transform>,
}

impl InstancedMesh {
    pub fn new(mesh: MeshId, material: Material) -> Self {
        Self {
            mesh,
            material,
            transforms: Vec::new(),
        }
    }

    pub fn with_instance(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn matrices(&self) -> Vec<Mat4> {
        self.transforms.iter().map(Transform::matrix).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels.
    pub direction: Vec3,
    pub color: Vec3,
    pub specular_strength: f32,
    pub diffuse_strength: f32,
    pub casts_shadow: bool,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3) -> Self {
        Self {
            direction,
            color,
            specular_strength: 1.0,
            diffuse_strength: 1.0,
            casts_shadow: false,
        }
    }

    pub fn with_shadow(mut self) -> Self {
        self.casts_shadow = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Distance where falloff begins.
    pub min_range: f32,
    /// Distance where the light reaches zero.
    pub max_range: f32,
    pub color: Vec3,
    pub specular_strength: f32,
    pub diffuse_strength: f32,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            min_range: 10.0,
            max_range: 20.0,
            color,
            specular_strength: 1.0,
            diffuse_strength: 1.0,
        }
    }

    pub fn with_range(mut self, min_range: f32, max_range: f32) -> Self {
        self.min_range = min_range;
        self.max_range = max_range;
        self
    }
}

/// A spot light shaped like a camera frustum, optionally projecting a cookie
/// texture. Outside the frustum it contributes nothing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrustumLight {
    pub position: Vec3,
    /// Radians, same convention as [`Camera`](crate::Camera).
    pub yaw: f32,
    /// Radians.
    pub pitch: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub min_range: f32,
    /// Also the far plane of the frustum.
    pub max_range: f32,
    pub color: Vec3,
    pub specular_strength: f32,
    pub diffuse_strength: f32,
    /// Multiplies the light across the frustum; white when unset.
    pub cookie: Option<TextureId>,
}

impl FrustumLight {
    /// Near plane of the light's projection.
    pub const NEAR: f32 = 0.1;

    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            fov: 10.0,
            aspect: 1.0,
            min_range: 10.0,
            max_range: 20.0,
            color,
            specular_strength: 1.0,
            diffuse_strength: 1.0,
            cookie: None,
        }
    }

    pub fn looking(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32, aspect: f32) -> Self {
        self.fov = fov_degrees;
        self.aspect = aspect;
        self
    }

    pub fn with_range(mut self, min_range: f32, max_range: f32) -> Self {
        self.min_range = min_range;
        self.max_range = max_range;
        self
    }

    pub fn with_cookie(mut self, cookie: TextureId) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn direction(&self) -> Vec3 {
        direction_from_yaw_pitch(self.yaw, self.pitch)
    }

    /// Projection used to place fragments inside the light's frustum.
    pub fn clip_from_world(&self) -> Mat4 {
        let direction = self.direction();
        let clip_from_view = Mat4::perspective_rh(
            self.fov.to_radians(),
            self.aspect,
            Self::NEAR,
            self.max_range.max(Self::NEAR * 2.0),
        );
        clip_from_view * Mat4::look_to_rh(self.position, direction, up_for(direction))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lights {
    /// Ambient light color.
    pub color: Vec3,
    pub ambient_strength: f32,
    pub directional: Vec<DirectionalLight>,
    pub point: Vec<PointLight>,
    pub frustum: Vec<FrustumLight>,
}

impl Default for Lights {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            ambient_strength: 0.029,
            directional: Vec::new(),
            point: Vec::new(),
            frustum: Vec::new(),
        }
    }
}

impl Lights {
    pub fn ambient(&self) -> Vec3 {
        self.color * self.ambient_strength
    }

    /// The first directional light, if it casts shadows. The lit shader shadows
    /// only directional light 0.
    pub fn shadow_caster(&self) -> Option<&DirectionalLight> {
        self.directional.first().filter(|light| light.casts_shadow)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Skybox {
    /// A cube around the origin, drawn from the inside.
    pub mesh: MeshId,
    pub cubemap: TextureId,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LineStyle {
    /// Depth tested like any geometry.
    #[default]
    Normal,
    /// Drawn on top of everything.
    AlwaysVisible,
    /// Solid where visible, dashed where hidden behind geometry.
    DashedWhenHidden,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DebugLine {
    pub from: Vec3,
    pub to: Vec3,
    pub color: Vec3,
    pub style: LineStyle,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct World {
    pub meshes: Vec<MeshInstance>,
    pub instanced: Vec<InstancedMesh>,
    pub lights: Lights,
    pub skybox: Option<Skybox>,
    pub debug_lines: Vec<DebugLine>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: MeshInstance) -> &mut Self {
        self.meshes.push(mesh);
        self
    }

    pub fn add_instanced(&mut self, batch: InstancedMesh) -> &mut Self {
        self.instanced.push(batch);
        self
    }

    pub fn add_line(&mut self, from: Vec3, to: Vec3, color: Vec3, style: LineStyle) -> &mut Self {
        self.debug_lines.push(DebugLine {
            from,
            to,
            color,
            style,
        });
        self
    }

    pub fn has_outlines(&self) -> bool {
        self.meshes.iter().any(|m| m.outline.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::device::Size;

    fn camera_at(position: Vec3) -> CompiledCamera {
        Camera::new()
            .at(position)
            .looking_at(Vec3::ZERO)
            .compile(Size::new(100, 100))
    }

    #[test]
    fn transform_matrix_applies_scale_then_translation() {
        let t = Transform::new()
            .position(Vec3::new(1.0, 0.0, 0.0))
            .uniform_scale(2.0);
        let p = t.matrix().transform_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!(p.abs_diff_eq(Vec3::new(3.0, 2.0, 2.0), 1e-6));
    }

    #[test]
    fn unbillboarded_mesh_uses_its_transform() {
        let mesh = MeshInstance::new(MeshId(0), Material::default())
            .with_transform(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
        let camera = camera_at(Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(mesh.world_from_local(&camera), mesh.transform.matrix());
    }

    #[test]
    fn screen_billboard_points_its_z_axis_along_the_view_ray() {
        let mesh = MeshInstance::new(MeshId(0), Material::default())
            .with_transform(Transform::from_position(Vec3::new(2.0, 0.0, 0.0)))
            .with_billboarding(Billboarding::Screen);
        let camera = camera_at(Vec3::new(2.0, 0.0, 5.0));
        let m = mesh.world_from_local(&camera);

        assert!(m.z_axis.truncate().abs_diff_eq(Vec3::NEG_Z, 1e-5));
        assert!(m.w_axis.truncate().abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn axial_billboard_keeps_up() {
        let mesh = MeshInstance::new(MeshId(0), Material::default())
            .with_billboarding(Billboarding::AxialY);
        let camera = camera_at(Vec3::new(3.0, 4.0, 3.0));
        let m = mesh.world_from_local(&camera);

        assert!(m.y_axis.truncate().abs_diff_eq(Vec3::Y, 1e-6));
        assert!(m.z_axis.y.abs() < 1e-5);
    }

    #[test]
    fn fast_billboards_follow_view_direction() {
        let camera = camera_at(Vec3::new(0.0, 0.0, 5.0));
        let far_left = MeshInstance::new(MeshId(0), Material::default())
            .with_transform(Transform::from_position(Vec3::new(-20.0, 0.0, 0.0)))
            .with_billboarding(Billboarding::ScreenFast);
        let m = far_left.world_from_local(&camera);
        assert!(m.z_axis.truncate().abs_diff_eq(camera.in_dir, 1e-5));
    }

    #[test]
    fn only_a_flagged_first_light_casts_shadows() {
        let mut lights = Lights::default();
        assert!(lights.shadow_caster().is_none());

        lights.directional.push(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE));
        assert!(lights.shadow_caster().is_none());

        lights.directional[0] = lights.directional[0].with_shadow();
        assert!(lights.shadow_caster().is_some());
    }

    #[test]
    fn frustum_light_projects_along_its_direction() {
        let light = FrustumLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE)
            .looking(0.0, -std::f32::consts::FRAC_PI_2)
            .with_range(1.0, 5.0);
        assert!(light.direction().abs_diff_eq(Vec3::NEG_Y, 1e-6));

        let clip = light.clip_from_world() * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);

        // outside the 10 degree cone
        let clip = light.clip_from_world() * Vec3::new(1.0, 0.0, 0.0).extend(1.0);
        assert!((clip.x / clip.w).abs() > 1.0);
    }

    #[test]
    fn frustum_light_ends_at_max_range() {
        let light = FrustumLight::new(Vec3::ZERO, Vec3::ONE).with_range(1.0, 5.0);
        let beyond = light.clip_from_world() * (light.direction() * 6.0).extend(1.0);
        assert!(beyond.z / beyond.w > 1.0);
    }
}
