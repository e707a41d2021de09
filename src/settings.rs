//! Renderer configuration.
//!
//! Settings are plain data with defaults, loadable from TOML:
//!
//! ```toml
//! msaa = 4
//! hdr = true
//! number_of_point_lights = 8
//!
//! [shadow]
//! kind = "tight_fit"
//! ```

use crate::shadow::ShadowCamera;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Sample count of the world framebuffer; 1 disables multisampling.
    pub msaa: u32,
    /// Render the world and effects into 16-bit float buffers.
    pub hdr: bool,
    pub gamma: f32,
    pub number_of_directional_lights: u32,
    pub number_of_point_lights: u32,
    /// Each frustum light also takes a cookie texture slot in the lit shader.
    pub number_of_frustum_lights: u32,
    pub shadow_map_resolution: u32,
    pub shadow: ShadowCamera,
    /// RGB color the world framebuffer is cleared to.
    pub clear_color: [f32; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            msaa: 4,
            hdr: false,
            gamma: 2.2,
            number_of_directional_lights: 5,
            number_of_point_lights: 5,
            number_of_frustum_lights: 5,
            shadow_map_resolution: 1024,
            shadow: ShadowCamera::default(),
            clear_color: [0.0, 0.0, 0.0],
        }
    }
}

impl RenderSettings {
    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn with_msaa(mut self, samples: u32) -> Self {
        self.msaa = samples;
        self
    }

    pub fn with_hdr(mut self, hdr: bool) -> Self {
        self.hdr = hdr;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_lights(mut self, directional: u32, point: u32) -> Self {
        self.number_of_directional_lights = directional;
        self.number_of_point_lights = point;
        self
    }

    pub fn with_frustum_lights(mut self, frustum: u32) -> Self {
        self.number_of_frustum_lights = frustum;
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowCamera) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_shadow_map_resolution(mut self, resolution: u32) -> Self {
        self.shadow_map_resolution = resolution;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 3]) -> Self {
        self.clear_color = color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = RenderSettings::from_toml_str("").unwrap();
        assert_eq!(settings, RenderSettings::default());
        assert_eq!(settings.msaa, 4);
        assert_eq!(settings.shadow_map_resolution, 1024);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let settings = RenderSettings::from_toml_str(
            "msaa = 1\nhdr = true\nnumber_of_point_lights = 8\n\n[shadow]\nkind = \"tight_fit\"\n",
        )
        .unwrap();
        assert_eq!(settings.msaa, 1);
        assert!(settings.hdr);
        assert_eq!(settings.number_of_point_lights, 8);
        assert_eq!(settings.number_of_directional_lights, 5);
        assert_eq!(settings.number_of_frustum_lights, 5);
        assert_eq!(settings.shadow, ShadowCamera::TightFit);
    }

    #[test]
    fn follow_viewer_shadow_reads_its_fields() {
        let settings = RenderSettings::from_toml_str(
            "[shadow]\nkind = \"follow_viewer\"\noffset = 5.0\nsize = 40.0\nnear = 1.0\nfar = 50.0\n",
        )
        .unwrap();
        assert_eq!(
            settings.shadow,
            ShadowCamera::FollowViewer {
                offset: 5.0,
                size: 40.0,
                near: 1.0,
                far: 50.0
            }
        );
    }

    #[test]
    fn bad_value_is_a_parse_error() {
        let err = RenderSettings::from_toml_str("msaa = \"lots\"").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RenderSettings::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, SettingsError::Io(_)));
    }

    #[test]
    fn builders_chain() {
        let settings = RenderSettings::default()
            .with_msaa(1)
            .with_hdr(true)
            .with_lights(1, 2)
            .with_frustum_lights(3)
            .with_gamma(1.0);
        assert_eq!(settings.msaa, 1);
        assert!(settings.hdr);
        assert_eq!(settings.number_of_directional_lights, 1);
        assert_eq!(settings.number_of_point_lights, 2);
        assert_eq!(settings.number_of_frustum_lights, 3);
        assert_eq!(settings.gamma, 1.0);
    }
}
