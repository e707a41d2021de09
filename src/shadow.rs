//! Cameras for the directional shadow map.

use crate::camera::{CompiledCamera, OrthoCamera, up_for};
use crate::device::Size;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// How the shadow map camera is placed.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShadowCamera {
    /// A fixed-size orthographic camera `offset` units behind the viewer along the light.
    FollowViewer {
        offset: f32,
        size: f32,
        near: f32,
        far: f32,
    },
    /// The smallest light-aligned box containing the whole view frustum.
    TightFit,
}

impl Default for ShadowCamera {
    fn default() -> Self {
        ShadowCamera::FollowViewer {
            offset: 10.0,
            size: 20.0,
            near: 0.1,
            far: 30.0,
        }
    }
}

impl ShadowCamera {
    pub fn compile(&self, camera: &CompiledCamera, light_direction: Vec3) -> CompiledCamera {
        match *self {
            ShadowCamera::FollowViewer {
                offset,
                size,
                near,
                far,
            } => shadow_camera_follow(camera, light_direction, offset, size, near, far),
            ShadowCamera::TightFit => shadow_camera_tight_fit(camera, light_direction).camera,
        }
    }
}

/// An orthographic shadow camera centered on the viewer and pulled back against the light.
pub fn shadow_camera_follow(
    camera: &CompiledCamera,
    light_direction: Vec3,
    offset: f32,
    size: f32,
    near: f32,
    far: f32,
) -> CompiledCamera {
    let direction = light_direction.normalize_or(Vec3::NEG_Y);
    OrthoCamera {
        position: camera.position - direction * offset,
        direction,
        size,
        near,
        far,
    }
    .compile(Size::new(1, 1))
}

/// Result of fitting a shadow camera around a view frustum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowFit {
    pub camera: CompiledCamera,
    /// Light-space bounds of the frustum.
    pub min: Vec3,
    pub max: Vec3,
    /// The frustum corners in light space.
    pub light_space_corners: [Vec3; 8],
}

/// Fits an orthographic light camera tightly around the frustum of `camera`.
pub fn shadow_camera_tight_fit(camera: &CompiledCamera, light_direction: Vec3) -> ShadowFit {
    let corners = camera.frustum_corners();
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;

    let direction = light_direction.normalize_or(Vec3::NEG_Y);
    let view_from_world = Mat4::look_to_rh(center, direction, up_for(direction));

    let light_space_corners = corners.map(|corner| view_from_world.transform_point3(corner));
    let (min, max) = light_space_corners.iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(min, max), corner| (min.min(*corner), max.max(*corner)),
    );

    // view space looks down -z, so the nearest corner has the largest z
    let clip_from_view = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, -max.z, -min.z);

    ShadowFit {
        camera: CompiledCamera {
            clip_from_view,
            view_from_world,
            position: center,
            in_dir: direction,
        },
        min,
        max,
        light_space_corners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn viewer() -> CompiledCamera {
        Camera::new()
            .at(Vec3::new(2.0, 3.0, 8.0))
            .looking_at(Vec3::ZERO)
            .with_range(0.5, 20.0)
            .compile(Size::new(1280, 720))
    }

    #[test]
    fn corners_lie_inside_the_fitted_box() {
        let fit = shadow_camera_tight_fit(&viewer(), Vec3::new(-0.3, -1.0, -0.2));
        for corner in fit.light_space_corners {
            assert!(corner.cmpge(fit.min - 1e-4).all(), "{corner} below {}", fit.min);
            assert!(corner.cmple(fit.max + 1e-4).all(), "{corner} above {}", fit.max);
        }
    }

    #[test]
    fn corners_project_inside_clip_space() {
        let view = viewer();
        let fit = shadow_camera_tight_fit(&view, Vec3::new(0.5, -1.0, 0.0));
        let clip_from_world = fit.camera.clip_from_world();
        for corner in view.frustum_corners() {
            let ndc = clip_from_world.project_point3(corner);
            assert!(ndc.x.abs() <= 1.0 + 1e-3 && ndc.y.abs() <= 1.0 + 1e-3, "{ndc}");
            assert!((-1e-3..=1.0 + 1e-3).contains(&ndc.z), "{ndc}");
        }
    }

    #[test]
    fn vertical_light_still_fits() {
        let fit = shadow_camera_tight_fit(&viewer(), Vec3::NEG_Y);
        assert!(fit.camera.view_from_world.is_finite());
        assert!(fit.camera.clip_from_view.is_finite());
    }

    #[test]
    fn follow_camera_sits_behind_viewer_along_light() {
        let view = viewer();
        let light = Vec3::new(0.0, -1.0, 0.0);
        let shadow = shadow_camera_follow(&view, light, 10.0, 20.0, 0.1, 30.0);
        assert!(shadow.position.abs_diff_eq(view.position + Vec3::new(0.0, 10.0, 0.0), 1e-5));
        assert!(shadow.in_dir.abs_diff_eq(light, 1e-6));

        // the viewer itself is inside the shadow volume
        let ndc = shadow.clip_from_world().project_point3(view.position);
        assert!(ndc.x.abs() < 1.0 && ndc.y.abs() < 1.0 && (0.0..1.0).contains(&ndc.z));
    }

    #[test]
    fn default_shadow_follows_viewer() {
        assert!(matches!(ShadowCamera::default(), ShadowCamera::FollowViewer { offset, .. } if offset == 10.0));
    }
}
