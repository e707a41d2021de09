//! Surface materials.
//!
//! A material decides which shader draws a mesh and what goes into its uniforms.
//! The set is closed: [`Material::Unlit`] for flat colored or textured surfaces and
//! [`Material::Default`] for Phong-lit ones.
//!
//! Any material whose alpha is below [`ALPHA_TRANSPARENCY_LIMIT`] is drawn in the
//! transparent step, after every opaque mesh, sorted back to front.

use crate::device::TextureId;
use glam::Vec3;

/// Alpha values below this make a material transparent.
pub const ALPHA_TRANSPARENCY_LIMIT: f32 = 0.99;

#[derive(Clone, Debug, PartialEq)]
pub struct UnlitMaterial {
    pub color: Vec3,
    pub alpha: f32,
    /// Multiplied with `color`; white when absent.
    pub texture: Option<TextureId>,
}

impl Default for UnlitMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            alpha: 1.0,
            texture: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DefaultMaterial {
    pub color: Vec3,
    pub alpha: f32,
    /// Multiplied with the ambient light.
    pub ambient_tint: Vec3,
    pub specular_color: Vec3,
    pub shininess: f32,
    pub emissive_factor: f32,
    pub diffuse: Option<TextureId>,
    pub specular: Option<TextureId>,
    pub emissive: Option<TextureId>,
}

impl Default for DefaultMaterial {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            alpha: 1.0,
            ambient_tint: Vec3::ONE,
            specular_color: Vec3::ONE,
            shininess: 32.0,
            emissive_factor: 0.0,
            diffuse: None,
            specular: None,
            emissive: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Material {
    Unlit(UnlitMaterial),
    Default(DefaultMaterial),
}

impl Default for Material {
    fn default() -> Self {
        Material::Default(DefaultMaterial::default())
    }
}

impl Material {
    pub fn unlit(color: Vec3) -> Self {
        Material::Unlit(UnlitMaterial {
            color,
            ..Default::default()
        })
    }

    pub fn lit(color: Vec3) -> Self {
        Material::Default(DefaultMaterial {
            color,
            ..Default::default()
        })
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        match &mut self {
            Material::Unlit(m) => m.alpha = alpha,
            Material::Default(m) => m.alpha = alpha,
        }
        self
    }

    pub fn alpha(&self) -> f32 {
        match self {
            Material::Unlit(m) => m.alpha,
            Material::Default(m) => m.alpha,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha() < ALPHA_TRANSPARENCY_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparency_threshold() {
        assert!(!Material::lit(Vec3::ONE).is_transparent());
        assert!(!Material::unlit(Vec3::ONE).with_alpha(0.995).is_transparent());
        assert!(Material::unlit(Vec3::ONE).with_alpha(0.5).is_transparent());
        assert!(Material::lit(Vec3::ONE).with_alpha(0.98).is_transparent());
    }

    #[test]
    fn lit_defaults() {
        let Material::Default(m) = Material::default() else {
            panic!("default material should be lit");
        };
        assert_eq!(m.shininess, 32.0);
        assert_eq!(m.emissive_factor, 0.0);
        assert!(m.diffuse.is_none());
    }
}
