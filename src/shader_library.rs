//! The built-in shaders.
//!
//! Every world shader is compiled in one attribute compilation group, so a mesh
//! uploaded once can be drawn by any of them: lit, unlit, depth-only, skybox and
//! the single-color outline shader all read the same vertex buffer. Each world
//! shader defines `world_from_local(v)`, which the instanced variants read from
//! the per-instance matrix and everything else from a uniform.
//!
//! Post-processing shaders draw a generated fullscreen triangle and have no vertex
//! input at all.

use crate::device::{RenderDevice, TextureKind};
use crate::camera::CompiledCamera;
use crate::settings::RenderSettings;
use crate::shader::{ShaderProgram, ShaderSource, TextureSlot};
use crate::state::{MAX_TEXTURES_SUPPORTED, RenderContext};
use crate::uniform::{Uniform, UniformBufferDescription, UniformType};
use crate::vertex_layout::{
    AttributeKind, AttributeRequestSet, CompiledGeometryLayout, InstanceAttribute,
    compile_geometry_layout, compile_registry, compile_shader_layout,
};
use std::fmt::Write;

/// Gaussian samples taken per blur direction.
pub const BLUR_SAMPLES: u32 = 10;

/// Texture slots the lit shader uses before the frustum light cookies.
const LIT_MATERIAL_TEXTURES: usize = 4;

/// Frustum lights beyond this have no texture slot left for their cookie.
pub const MAX_FRUSTUM_LIGHTS: u32 = (MAX_TEXTURES_SUPPORTED - LIT_MATERIAL_TEXTURES) as u32;

const INSTANCE_TRANSFORM: &str = "world_from_local";

const FULLSCREEN_WGSL: &str = include_str!("shaders/fullscreen.wgsl");

pub fn lit_attributes() -> AttributeRequestSet {
    AttributeRequestSet::new()
        .with(AttributeKind::Position3, "position")
        .with(AttributeKind::Normal3, "normal")
        .with(AttributeKind::Color3, "color")
        .with(AttributeKind::Texture2, "uv")
}

pub fn basic_attributes() -> AttributeRequestSet {
    AttributeRequestSet::new()
        .with(AttributeKind::Position3, "position")
        .with(AttributeKind::Color3, "color")
        .with(AttributeKind::Texture2, "uv")
}

pub fn position_attributes() -> AttributeRequestSet {
    AttributeRequestSet::new().with(AttributeKind::Position3, "position")
}

fn camera_uniforms() -> UniformBufferDescription {
    UniformBufferDescription::new()
        .with(UniformType::Mat4, "u_clip_from_view")
        .with(UniformType::Mat4, "u_view_from_world")
}

/// Camera uniforms plus the model matrix unless the transform comes per instance.
fn model_uniforms(instanced: bool) -> UniformBufferDescription {
    let uniforms = camera_uniforms();
    if instanced {
        uniforms
    } else {
        uniforms.with(UniformType::Mat4, "u_world_from_local")
    }
}

fn world_from_local_fn(instanced: bool) -> String {
    let value = if instanced {
        format!("load_{INSTANCE_TRANSFORM}(v)")
    } else {
        "u.u_world_from_local".to_string()
    };
    format!("fn world_from_local(v: VertexInput) -> mat4x4<f32> {{\n    return {value};\n}}\n")
}

/// Prepends generated definitions to a shader body.
fn with_header(header: &str, body: &str) -> String {
    format!("{header}\n{body}")
}

/// Which of the world shader variants to build.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Variant {
    Opaque,
    Transparent,
    Instanced,
}

impl Variant {
    fn instanced(self) -> bool {
        self == Variant::Instanced
    }

    fn suffix(self) -> &'static str {
        match self {
            Variant::Opaque => "",
            Variant::Transparent => " transparent",
            Variant::Instanced => " instanced",
        }
    }

    /// Opaque shaders write alpha 1.0.
    fn header(self) -> String {
        format!(
            "const USE_ALPHA: bool = {};\n{}",
            self != Variant::Opaque,
            world_from_local_fn(self.instanced())
        )
    }

    fn instance_attribute(self) -> Option<InstanceAttribute> {
        self.instanced()
            .then(|| InstanceAttribute::transform(INSTANCE_TRANSFORM))
    }
}

/// The three variants of a world material shader.
#[derive(Debug)]
pub struct ShaderVariants<T> {
    pub opaque: T,
    pub transparent: T,
    pub instanced: T,
}

impl<T> ShaderVariants<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.opaque, &self.transparent, &self.instanced].into_iter()
    }
}

#[derive(Debug)]
pub struct CameraUniforms {
    pub clip_from_view: Uniform,
    pub view_from_world: Uniform,
}

impl CameraUniforms {
    fn probe(program: &mut ShaderProgram) -> Self {
        Self {
            clip_from_view: program.uniform("u_clip_from_view"),
            view_from_world: program.uniform("u_view_from_world"),
        }
    }

    pub fn set(&self, program: &ShaderProgram, ctx: &mut RenderContext<'_>, camera: &CompiledCamera) {
        program.set_mat4(ctx, &self.clip_from_view, camera.clip_from_view);
        program.set_mat4(ctx, &self.view_from_world, camera.view_from_world);
    }
}

#[derive(Debug)]
pub struct UnlitShader {
    pub program: ShaderProgram,
    pub camera: CameraUniforms,
    /// Invalid for the instanced variant.
    pub world_from_local: Uniform,
    pub tint_color: Uniform,
    pub diffuse: TextureSlot,
}

/// Handles for the light arrays of the lit shader.
#[derive(Debug)]
pub struct LightUniforms {
    pub view_position: Uniform,
    pub ambient_light: Uniform,
    pub light_clip_from_world: Uniform,
    pub directional_direction: Uniform,
    pub directional_diffuse: Uniform,
    pub directional_specular: Uniform,
    pub point_position: Uniform,
    pub point_diffuse: Uniform,
    pub point_specular: Uniform,
    /// x is where falloff starts, y where the light reaches zero.
    pub point_range: Uniform,
    pub frustum_position: Uniform,
    pub frustum_diffuse: Uniform,
    pub frustum_specular: Uniform,
    pub frustum_range: Uniform,
    pub frustum_clip_from_world: Uniform,
    pub directional_count: u32,
    pub point_count: u32,
    pub frustum_count: u32,
}

#[derive(Debug)]
pub struct DefaultShader {
    pub program: ShaderProgram,
    pub camera: CameraUniforms,
    pub world_from_local: Uniform,
    pub tint_color: Uniform,
    pub ambient_tint: Uniform,
    pub specular_color: Uniform,
    pub shininess: Uniform,
    pub emissive_factor: Uniform,
    pub lights: LightUniforms,
    pub diffuse: TextureSlot,
    pub specular: TextureSlot,
    pub emissive: TextureSlot,
    pub shadow_map: TextureSlot,
    /// One per frustum light.
    pub frustum_cookies: Vec<TextureSlot>,
}

#[derive(Debug)]
pub struct DepthShader {
    pub program: ShaderProgram,
    pub camera: CameraUniforms,
    pub world_from_local: Uniform,
}

#[derive(Debug)]
pub struct SingleColorShader {
    pub program: ShaderProgram,
    pub camera: CameraUniforms,
    pub world_from_local: Uniform,
    pub tint_color: Uniform,
}

#[derive(Debug)]
pub struct SkyboxShader {
    pub program: ShaderProgram,
    pub camera: CameraUniforms,
    pub skybox: TextureSlot,
}

/// Draws a framebuffer to the screen, applying gamma.
#[derive(Debug)]
pub struct RealizeShader {
    pub program: ShaderProgram,
    pub gamma: Uniform,
    pub input: TextureSlot,
}

/// A fullscreen effect shader. Every one samples `input` and declares
/// `u_factor`, `u_resolution` and `u_time`.
#[derive(Debug)]
pub struct PostProcShader {
    pub program: ShaderProgram,
    pub factor: Uniform,
    pub resolution: Uniform,
    pub time: Uniform,
    pub input: TextureSlot,
}

/// The built-in fullscreen effect shaders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PostProcKind {
    Invert,
    Grayscale,
    Damage,
    ColorGrade,
    Tonemap,
    BlurVertical,
    BlurHorizontal,
}

impl PostProcKind {
    pub const ALL: [PostProcKind; 7] = [
        PostProcKind::Invert,
        PostProcKind::Grayscale,
        PostProcKind::Damage,
        PostProcKind::ColorGrade,
        PostProcKind::Tonemap,
        PostProcKind::BlurVertical,
        PostProcKind::BlurHorizontal,
    ];

    fn name(self) -> &'static str {
        match self {
            PostProcKind::Invert => "pp invert",
            PostProcKind::Grayscale => "pp grayscale",
            PostProcKind::Damage => "pp damage",
            PostProcKind::ColorGrade => "pp color grade",
            PostProcKind::Tonemap => "pp tonemap",
            PostProcKind::BlurVertical => "pp blur vertical",
            PostProcKind::BlurHorizontal => "pp blur horizontal",
        }
    }

    fn extra_uniforms(self) -> UniformBufferDescription {
        let floats = |names: &[&str]| {
            names
                .iter()
                .fold(UniformBufferDescription::new(), |desc, name| {
                    desc.with(UniformType::Float, *name)
                })
        };
        match self {
            PostProcKind::Invert | PostProcKind::Grayscale => UniformBufferDescription::new(),
            PostProcKind::Damage => floats(&[
                "u_vignette_radius",
                "u_vignette_smoothness",
                "u_vignette_darkening",
                "u_noise_scale",
            ]),
            PostProcKind::ColorGrade => floats(&["u_brightness", "u_contrast", "u_saturation"]),
            PostProcKind::Tonemap => floats(&["u_exposure"]),
            PostProcKind::BlurVertical | PostProcKind::BlurHorizontal => {
                floats(&["u_blur_size", "u_std_dev"])
            }
        }
    }

    fn body(self) -> String {
        let blur = |direction: &str| {
            with_header(
                &format!(
                    "const BLUR_SAMPLES: i32 = {BLUR_SAMPLES};\nconst BLUR_DIRECTION: vec2<f32> = {direction};\n"
                ),
                include_str!("shaders/pp_blur.wgsl"),
            )
        };
        match self {
            PostProcKind::Invert => include_str!("shaders/pp_invert.wgsl").to_string(),
            PostProcKind::Grayscale => include_str!("shaders/pp_grayscale.wgsl").to_string(),
            PostProcKind::Damage => include_str!("shaders/pp_damage.wgsl").to_string(),
            PostProcKind::ColorGrade => include_str!("shaders/pp_color_grade.wgsl").to_string(),
            PostProcKind::Tonemap => include_str!("shaders/pp_tonemap.wgsl").to_string(),
            PostProcKind::BlurVertical => blur("vec2<f32>(0.0, 1.0)"),
            PostProcKind::BlurHorizontal => blur("vec2<f32>(1.0, 0.0)"),
        }
    }
}

/// Builds a fullscreen shader source: no vertex input, one `input` texture, the
/// shared fullscreen vertex stage, and `fragment` which must define `fs_main`
/// taking a `FullscreenOutput`.
pub fn fullscreen_source(
    name: &str,
    uniforms: UniformBufferDescription,
    fragment: &str,
) -> ShaderSource {
    ShaderSource::new(name, AttributeRequestSet::new(), with_header(FULLSCREEN_WGSL, fragment))
        .with_uniforms(uniforms)
        .with_texture("input", TextureKind::D2)
}

/// Standard uniforms every effect shader declares.
pub fn effect_uniforms() -> UniformBufferDescription {
    UniformBufferDescription::new()
        .with(UniformType::Float, "u_factor")
        .with(UniformType::Vec2, "u_resolution")
        .with(UniformType::Float, "u_time")
}

/// Compiles a shader built by [`fullscreen_source`].
pub fn load_fullscreen(device: &mut dyn RenderDevice, source: &ShaderSource) -> ShaderProgram {
    let registry = compile_registry(&[], [&source.attributes]);
    let layout = compile_shader_layout(&registry, &source.attributes, None);
    ShaderProgram::load(device, source, &layout, &compile_geometry_layout(&registry))
}

fn load_postproc(device: &mut dyn RenderDevice, kind: PostProcKind) -> PostProcShader {
    let mut uniforms = effect_uniforms();
    for member in kind.extra_uniforms().members() {
        uniforms = uniforms.with(member.ty, member.name.clone());
    }
    let source = fullscreen_source(kind.name(), uniforms, &kind.body());
    let mut program = load_fullscreen(device, &source);
    PostProcShader {
        factor: program.uniform("u_factor"),
        resolution: program.uniform("u_resolution"),
        time: program.uniform("u_time"),
        input: program.texture("input"),
        program,
    }
}

/// Light array sizes baked into the lit shader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct LightCounts {
    directional: u32,
    point: u32,
    frustum: u32,
}

impl LightCounts {
    fn from_settings(settings: &RenderSettings) -> Self {
        let mut frustum = settings.number_of_frustum_lights;
        if frustum > MAX_FRUSTUM_LIGHTS {
            log::warn!("{frustum} frustum lights requested, only {MAX_FRUSTUM_LIGHTS} fit");
            frustum = MAX_FRUSTUM_LIGHTS;
        }
        Self {
            directional: settings.number_of_directional_lights,
            point: settings.number_of_point_lights,
            frustum,
        }
    }
}

/// Generated accessors for the light arrays; each returns a zero value when the
/// array is empty and indexes only when there is more than one element.
fn light_accessors(counts: LightCounts) -> String {
    let LightCounts {
        directional,
        point,
        frustum,
    } = counts;
    let mut src = format!(
        "const DIRECTIONAL_LIGHTS: u32 = {directional}u;\nconst POINT_LIGHTS: u32 = {point}u;\nconst FRUSTUM_LIGHTS: u32 = {frustum}u;\n"
    );
    let accessors = [
        ("directional_light_direction", "u_directional_light_direction", directional, "vec3<f32>", ".xyz"),
        ("directional_light_diffuse", "u_directional_light_diffuse", directional, "vec3<f32>", ".xyz"),
        ("directional_light_specular", "u_directional_light_specular", directional, "vec3<f32>", ".xyz"),
        ("point_light_position", "u_point_light_position", point, "vec3<f32>", ".xyz"),
        ("point_light_diffuse", "u_point_light_diffuse", point, "vec3<f32>", ".xyz"),
        ("point_light_specular", "u_point_light_specular", point, "vec3<f32>", ".xyz"),
        ("point_light_range", "u_point_light_range", point, "vec2<f32>", ".xy"),
        ("frustum_light_position", "u_frustum_light_position", frustum, "vec3<f32>", ".xyz"),
        ("frustum_light_diffuse", "u_frustum_light_diffuse", frustum, "vec3<f32>", ".xyz"),
        ("frustum_light_specular", "u_frustum_light_specular", frustum, "vec3<f32>", ".xyz"),
        ("frustum_light_range", "u_frustum_light_range", frustum, "vec2<f32>", ".xy"),
        ("frustum_light_clip_from_world", "u_frustum_light_clip_from_world", frustum, "mat4x4<f32>", ""),
    ];
    for (function, member, count, ty, swizzle) in accessors {
        let value = match count {
            0 => format!("{ty}()"),
            1 => format!("u.{member}{swizzle}"),
            _ => format!("u.{member}[i]{swizzle}"),
        };
        let _ = writeln!(src, "fn {function}(i: u32) -> {ty} {{\n    return {value};\n}}");
    }
    src.push_str(&cookie_accessor(frustum));
    src
}

/// WGSL can't index separate textures dynamically, so the cookie lookup is a
/// switch over every frustum slot.
fn cookie_accessor(frustum: u32) -> String {
    let mut src = String::from("fn frustum_light_cookie(i: u32, uv: vec2<f32>) -> vec3<f32> {\n");
    if frustum == 0 {
        src.push_str("    return vec3<f32>();\n}\n");
        return src;
    }
    src.push_str("    switch i {\n");
    for i in 0..frustum {
        let _ = writeln!(
            src,
            "        case {i}u: {{ return textureSampleLevel(t_{name}, s_{name}, uv, 0.0).rgb; }}",
            name = cookie_texture(i)
        );
    }
    src.push_str("        default: { return vec3<f32>(); }\n    }\n}\n");
    src
}

fn cookie_texture(index: u32) -> String {
    format!("frustum_cookie_{index}")
}

fn light_uniforms(uniforms: UniformBufferDescription, counts: LightCounts) -> UniformBufferDescription {
    let LightCounts {
        directional,
        point,
        frustum,
    } = counts;
    let mut uniforms = uniforms
        .with(UniformType::Vec3, "u_view_position")
        .with(UniformType::Vec3, "u_ambient_light")
        .with(UniformType::Mat4, "u_light_clip_from_world");
    if directional > 0 {
        for name in [
            "u_directional_light_direction",
            "u_directional_light_diffuse",
            "u_directional_light_specular",
        ] {
            uniforms = uniforms.with_array(UniformType::Vec3, name, directional);
        }
    }
    if point > 0 {
        for name in [
            "u_point_light_position",
            "u_point_light_diffuse",
            "u_point_light_specular",
        ] {
            uniforms = uniforms.with_array(UniformType::Vec3, name, point);
        }
        uniforms = uniforms.with_array(UniformType::Vec2, "u_point_light_range", point);
    }
    if frustum > 0 {
        for name in [
            "u_frustum_light_position",
            "u_frustum_light_diffuse",
            "u_frustum_light_specular",
        ] {
            uniforms = uniforms.with_array(UniformType::Vec3, name, frustum);
        }
        uniforms = uniforms
            .with_array(UniformType::Vec2, "u_frustum_light_range", frustum)
            .with_array(UniformType::Mat4, "u_frustum_light_clip_from_world", frustum);
    }
    uniforms
}

/// Probes a light array only if the shader was built with it.
fn probe_if(program: &mut ShaderProgram, name: &str, present: bool) -> Uniform {
    if present {
        program.uniform(name)
    } else {
        Uniform::invalid(name)
    }
}

/// Every built-in shader.
#[derive(Debug)]
pub struct ShaderLibrary {
    pub unlit: ShaderVariants<UnlitShader>,
    pub default: ShaderVariants<DefaultShader>,
    pub depth: DepthShader,
    pub depth_instanced: DepthShader,
    pub single_color: SingleColorShader,
    pub skybox: SkyboxShader,
    pub realize: RealizeShader,
    postproc: Vec<(PostProcKind, PostProcShader)>,
    geometry_layout: CompiledGeometryLayout,
}

impl ShaderLibrary {
    /// Compiles every built-in shader. Failures are logged and leave the shader
    /// unloaded; check [`ShaderLibrary::is_loaded`].
    pub fn load(device: &mut dyn RenderDevice, settings: &RenderSettings) -> Self {
        let lit = lit_attributes();
        let basic = basic_attributes();
        let position = position_attributes();
        let registry = compile_registry(&[], [&lit, &basic, &position]);
        let geometry_layout = compile_geometry_layout(&registry);

        let mut load = |source: &ShaderSource, variant: Variant| {
            let layout = compile_shader_layout(&registry, &source.attributes, variant.instance_attribute());
            ShaderProgram::load(device, source, &layout, &geometry_layout)
        };

        let mut unlit = |variant: Variant| {
            let source = ShaderSource::new(
                format!("unlit{}", variant.suffix()),
                basic.clone(),
                with_header(&variant.header(), include_str!("shaders/unlit.wgsl")),
            )
            .with_uniforms(model_uniforms(variant.instanced()).with(UniformType::Vec4, "u_tint_color"))
            .with_texture("diffuse", TextureKind::D2);
            let mut program = load(&source, variant);
            UnlitShader {
                camera: CameraUniforms::probe(&mut program),
                world_from_local: probe_if(&mut program, "u_world_from_local", !variant.instanced()),
                tint_color: program.uniform("u_tint_color"),
                diffuse: program.texture("diffuse"),
                program,
            }
        };
        let unlit = ShaderVariants {
            opaque: unlit(Variant::Opaque),
            transparent: unlit(Variant::Transparent),
            instanced: unlit(Variant::Instanced),
        };

        let counts = LightCounts::from_settings(settings);
        let LightCounts {
            directional,
            point,
            frustum,
        } = counts;
        let mut lit_shader = |variant: Variant| {
            let header = format!("{}{}", variant.header(), light_accessors(counts));
            let uniforms = model_uniforms(variant.instanced())
                .with(UniformType::Vec4, "u_tint_color")
                .with(UniformType::Vec3, "u_ambient_tint")
                .with(UniformType::Vec3, "u_specular_color")
                .with(UniformType::Float, "u_shininess")
                .with(UniformType::Float, "u_emissive_factor");
            let source = ShaderSource::new(
                format!("default{}", variant.suffix()),
                lit.clone(),
                with_header(&header, include_str!("shaders/default.wgsl")),
            )
            .with_uniforms(light_uniforms(uniforms, counts))
            .with_texture("diffuse", TextureKind::D2)
            .with_texture("specular", TextureKind::D2)
            .with_texture("emissive", TextureKind::D2)
            .with_texture("shadow_map", TextureKind::Depth);
            let source = (0..frustum).fold(source, |source, i| {
                source.with_texture(cookie_texture(i), TextureKind::D2)
            });
            let mut program = load(&source, variant);
            let lights = LightUniforms {
                view_position: program.uniform("u_view_position"),
                ambient_light: program.uniform("u_ambient_light"),
                light_clip_from_world: program.uniform("u_light_clip_from_world"),
                directional_direction: probe_if(&mut program, "u_directional_light_direction", directional > 0),
                directional_diffuse: probe_if(&mut program, "u_directional_light_diffuse", directional > 0),
                directional_specular: probe_if(&mut program, "u_directional_light_specular", directional > 0),
                point_position: probe_if(&mut program, "u_point_light_position", point > 0),
                point_diffuse: probe_if(&mut program, "u_point_light_diffuse", point > 0),
                point_specular: probe_if(&mut program, "u_point_light_specular", point > 0),
                point_range: probe_if(&mut program, "u_point_light_range", point > 0),
                frustum_position: probe_if(&mut program, "u_frustum_light_position", frustum > 0),
                frustum_diffuse: probe_if(&mut program, "u_frustum_light_diffuse", frustum > 0),
                frustum_specular: probe_if(&mut program, "u_frustum_light_specular", frustum > 0),
                frustum_range: probe_if(&mut program, "u_frustum_light_range", frustum > 0),
                frustum_clip_from_world: probe_if(&mut program, "u_frustum_light_clip_from_world", frustum > 0),
                directional_count: directional,
                point_count: point,
                frustum_count: frustum,
            };
            DefaultShader {
                camera: CameraUniforms::probe(&mut program),
                world_from_local: probe_if(&mut program, "u_world_from_local", !variant.instanced()),
                tint_color: program.uniform("u_tint_color"),
                ambient_tint: program.uniform("u_ambient_tint"),
                specular_color: program.uniform("u_specular_color"),
                shininess: program.uniform("u_shininess"),
                emissive_factor: program.uniform("u_emissive_factor"),
                lights,
                diffuse: program.texture("diffuse"),
                specular: program.texture("specular"),
                emissive: program.texture("emissive"),
                shadow_map: program.texture("shadow_map"),
                frustum_cookies: (0..frustum).map(|i| program.texture(&cookie_texture(i))).collect(),
                program,
            }
        };
        let default = ShaderVariants {
            opaque: lit_shader(Variant::Opaque),
            transparent: lit_shader(Variant::Transparent),
            instanced: lit_shader(Variant::Instanced),
        };

        let mut depth = |variant: Variant| {
            let source = ShaderSource::new(
                format!("depth{}", variant.suffix()),
                position.clone(),
                with_header(
                    &world_from_local_fn(variant.instanced()),
                    include_str!("shaders/depth.wgsl"),
                ),
            )
            .with_uniforms(model_uniforms(variant.instanced()));
            let mut program = load(&source, variant);
            DepthShader {
                camera: CameraUniforms::probe(&mut program),
                world_from_local: probe_if(&mut program, "u_world_from_local", !variant.instanced()),
                program,
            }
        };
        let depth_plain = depth(Variant::Opaque);
        let depth_instanced = depth(Variant::Instanced);

        let single_color = {
            let source = ShaderSource::new(
                "single color",
                position.clone(),
                include_str!("shaders/single_color.wgsl"),
            )
            .with_uniforms(model_uniforms(false).with(UniformType::Vec4, "u_tint_color"));
            let mut program = load(&source, Variant::Opaque);
            SingleColorShader {
                camera: CameraUniforms::probe(&mut program),
                world_from_local: program.uniform("u_world_from_local"),
                tint_color: program.uniform("u_tint_color"),
                program,
            }
        };

        let skybox = {
            let source = ShaderSource::new("skybox", position.clone(), include_str!("shaders/skybox.wgsl"))
                .with_uniforms(camera_uniforms())
                .with_texture("skybox", TextureKind::Cube);
            let mut program = load(&source, Variant::Opaque);
            SkyboxShader {
                camera: CameraUniforms::probe(&mut program),
                skybox: program.texture("skybox"),
                program,
            }
        };

        let realize = {
            let source = fullscreen_source(
                "realize",
                UniformBufferDescription::new().with(UniformType::Float, "u_gamma"),
                include_str!("shaders/pp_realize.wgsl"),
            );
            let mut program = load_fullscreen(device, &source);
            RealizeShader {
                gamma: program.uniform("u_gamma"),
                input: program.texture("input"),
                program,
            }
        };

        let postproc = PostProcKind::ALL
            .iter()
            .map(|&kind| (kind, load_postproc(device, kind)))
            .collect();

        Self {
            unlit,
            default,
            depth: depth_plain,
            depth_instanced,
            single_color,
            skybox,
            realize,
            postproc,
            geometry_layout,
        }
    }

    /// Vertex layout of every mesh drawn by the world shaders.
    pub fn geometry_layout(&self) -> &CompiledGeometryLayout {
        &self.geometry_layout
    }

    pub fn postproc(&self, kind: PostProcKind) -> Option<&PostProcShader> {
        self.postproc.iter().find(|(k, _)| *k == kind).map(|(_, shader)| shader)
    }

    pub fn postproc_mut(&mut self, kind: PostProcKind) -> Option<&mut PostProcShader> {
        self.postproc
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, shader)| shader)
    }

    /// Every program in the library.
    pub fn programs(&self) -> impl Iterator<Item = &ShaderProgram> {
        self.unlit
            .iter()
            .map(|s| &s.program)
            .chain(self.default.iter().map(|s| &s.program))
            .chain([
                &self.depth.program,
                &self.depth_instanced.program,
                &self.single_color.program,
                &self.skybox.program,
                &self.realize.program,
            ])
            .chain(self.postproc.iter().map(|(_, s)| &s.program))
    }

    pub fn is_loaded(&self) -> bool {
        self.programs().all(ShaderProgram::is_loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::line_drawer::LineDrawer;

    #[test]
    fn all_shaders_load_on_a_healthy_device() {
        let mut device = HeadlessDevice::new();
        let library = ShaderLibrary::load(&mut device, &RenderSettings::default());
        assert!(library.is_loaded());
        assert_eq!(library.programs().count(), 18);
    }

    #[test]
    fn one_failing_shader_fails_the_library() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("pp grayscale");
        let library = ShaderLibrary::load(&mut device, &RenderSettings::default());
        assert!(!library.is_loaded());
    }

    #[test]
    fn instanced_variants_read_the_instance_matrix() {
        assert!(world_from_local_fn(true).contains("load_world_from_local(v)"));
        assert!(world_from_local_fn(false).contains("u.u_world_from_local"));
    }

    #[test]
    fn instanced_variants_have_no_model_uniform() {
        let mut device = HeadlessDevice::new();
        let library = ShaderLibrary::load(&mut device, &RenderSettings::default());
        assert!(library.default.opaque.world_from_local.is_valid());
        assert!(!library.default.instanced.world_from_local.is_valid());
        assert!(!library.depth_instanced.world_from_local.is_valid());
    }

    #[test]
    fn light_accessors_adapt_to_array_size() {
        let src = light_accessors(LightCounts {
            directional: 0,
            point: 1,
            frustum: 0,
        });
        assert!(src.contains("const DIRECTIONAL_LIGHTS: u32 = 0u;"));
        assert!(src.contains("return vec3<f32>();"));
        assert!(src.contains("return u.u_point_light_position.xyz;"));
        assert!(src.contains("return mat4x4<f32>();"));

        let src = light_accessors(LightCounts {
            directional: 5,
            point: 5,
            frustum: 5,
        });
        assert!(src.contains("return u.u_directional_light_direction[i].xyz;"));
        assert!(src.contains("return u.u_point_light_range[i].xy;"));
        assert!(src.contains("return u.u_frustum_light_clip_from_world[i];"));
    }

    #[test]
    fn cookie_lookup_covers_every_frustum_slot() {
        let src = cookie_accessor(2);
        assert!(src.contains("case 0u: { return textureSampleLevel(t_frustum_cookie_0, s_frustum_cookie_0, uv, 0.0).rgb; }"));
        assert!(src.contains("case 1u:"));
        assert!(!src.contains("case 2u:"));
        assert!(!cookie_accessor(0).contains("switch"));
    }

    #[test]
    fn frustum_cookies_follow_the_material_textures() {
        let mut device = HeadlessDevice::new();
        let settings = RenderSettings::default().with_frustum_lights(3);
        let library = ShaderLibrary::load(&mut device, &settings);
        let shader = &library.default.opaque;

        assert_eq!(shader.lights.frustum_count, 3);
        assert_eq!(shader.frustum_cookies.len(), 3);
        assert_eq!(shader.frustum_cookies[0].index(), Some(4));
        assert_eq!(shader.frustum_cookies[2].index(), Some(6));
        assert_eq!(
            shader.lights.frustum_clip_from_world.prop().map(|p| p.array_count),
            Some(3)
        );
    }

    #[test]
    fn frustum_lights_are_capped_by_texture_slots() {
        let mut device = HeadlessDevice::new();
        let settings = RenderSettings::default().with_frustum_lights(40);
        let library = ShaderLibrary::load(&mut device, &settings);
        assert!(library.is_loaded());
        assert_eq!(library.default.opaque.lights.frustum_count, MAX_FRUSTUM_LIGHTS);
        assert_eq!(library.default.opaque.frustum_cookies.len(), MAX_FRUSTUM_LIGHTS as usize);
    }

    #[test]
    fn light_arrays_follow_settings() {
        let mut device = HeadlessDevice::new();
        let settings = RenderSettings::default().with_lights(2, 0);
        let library = ShaderLibrary::load(&mut device, &settings);
        let lights = &library.default.opaque.lights;

        assert_eq!(lights.directional_count, 2);
        assert_eq!(lights.directional_direction.prop().map(|p| p.array_count), Some(2));
        assert!(!lights.point_position.is_valid());
        assert_eq!(lights.frustum_count, 5);
    }

    fn validate_wgsl(name: &str, source: &str) {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|err| panic!("{name} does not parse:\n{}", err.emit_to_string(source)));
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .unwrap_or_else(|err| panic!("{name} does not validate: {err:?}"));
    }

    #[test]
    fn built_in_shaders_are_valid_wgsl() {
        // no lights, a single light, and full arrays take different accessor paths
        let light_setups = [
            RenderSettings::default().with_lights(0, 0).with_frustum_lights(0),
            RenderSettings::default().with_lights(1, 1).with_frustum_lights(1),
            RenderSettings::default(),
        ];
        for settings in light_setups {
            let mut device = HeadlessDevice::new();
            ShaderLibrary::load(&mut device, &settings);
            LineDrawer::load(&mut device);

            let mut compiled = 0;
            for (name, source) in device.shader_sources() {
                validate_wgsl(name, source);
                compiled += 1;
            }
            assert_eq!(compiled, 19);
        }
    }

    #[test]
    fn world_shaders_share_one_vertex_layout() {
        let mut device = HeadlessDevice::new();
        let library = ShaderLibrary::load(&mut device, &RenderSettings::default());
        let layout = library.geometry_layout();
        assert_eq!(layout.offset_of(AttributeKind::Position3), Some(0));
        assert_eq!(layout.offset_of(AttributeKind::Normal3), Some(12));
        assert_eq!(layout.offset_of(AttributeKind::Color3), Some(24));
        assert_eq!(layout.offset_of(AttributeKind::Texture2), Some(36));
        assert_eq!(layout.stride(), 44);
    }
}
