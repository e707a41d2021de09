//! The frame renderer.
//!
//! [`Renderer`] owns a device, the built-in shaders and the effect stack. Each
//! [`Renderer::render`] runs the shadow pass, then hands the world draw to the
//! effect stack, which calls it once per frame into the world framebuffer.
//!
//! The world itself is drawn in a fixed order:
//!
//! | step | what | state |
//! |------|------|-------|
//! | 1 | opaque meshes | depth `Less`, blending off, outlined meshes write stencil 1 |
//! | 2 | opaque instanced batches | as step 1, no stencil writes |
//! | 3 | debug lines | per [`LineStyle`] |
//! | 4 | skybox | depth `LessEqual`, no depth writes, front faces culled |
//! | 5 | transparent meshes, far to near, then transparent batches | blending on |
//! | 6 | outlines | stencil `NotEqual 1`, depth test off, scaled by [`OUTLINE_SCALE`] |

use crate::camera::{Camera, CompiledCamera};
use crate::device::{
    ClearRequest, FrameBufferDesc, MeshId, RenderCommand, RenderDevice, RenderTarget, Size,
    TextureBinding, TextureData, TextureId,
};
use crate::framebuffer::FrameBuffer;
use crate::geometry::{Geometry, extract};
use crate::line_drawer::LineDrawer;
use crate::material::Material;
use crate::postproc::{Effect, EffectHandle, EffectStack, PassContext};
use crate::settings::RenderSettings;
use crate::shader::ShaderProgram;
use crate::shader_library::{CameraUniforms, DefaultShader, ShaderLibrary, ShaderVariants};
use crate::state::{Blend, Compare, CullFace, GraphicsState, RenderContext, RenderMode, StencilAction};
use crate::uniform::UniformValue;
use crate::world::{Billboarding, Lights, LineStyle, MeshInstance, World};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::cell::Cell;
use std::marker::PhantomData;

/// How much bigger than its mesh an outline is drawn.
pub const OUTLINE_SCALE: f32 = 1.1;

/// Dash and gap length, in pixels, of hidden [`LineStyle::DashedWhenHidden`] lines.
const HIDDEN_LINE_DASH: f32 = 20.0;

/// Which variant of a material shader a draw uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Opaque,
    Transparent,
    Instanced,
}

fn pick<T>(variants: &ShaderVariants<T>, stage: Stage) -> &T {
    match stage {
        Stage::Opaque => &variants.opaque,
        Stage::Transparent => &variants.transparent,
        Stage::Instanced => &variants.instanced,
    }
}

/// Everything a world draw reads besides the shaders.
struct FrameInputs<'a> {
    world: &'a World,
    camera: &'a CompiledCamera,
    white: TextureId,
    shadow: Option<TextureBinding>,
    light_clip_from_world: Mat4,
    clear_color: Vec4,
}

/// Renders [`World`]s through an [`EffectStack`] on a [`RenderDevice`].
///
/// # Example
///
/// ```
/// use tessera::*;
///
/// let mut renderer = Renderer::new(HeadlessDevice::new(), RenderSettings::default());
/// let cube = renderer.make_mesh(&Geometry::cube(1.0));
/// renderer.add_effect(|shaders| BlurEffect::new(shaders).with_factor(1.0));
///
/// let mut world = World::new();
/// world.add_mesh(MeshInstance::new(cube, Material::lit(Vec3::ONE)));
/// renderer.render(&world, &Camera::new().looking_at(Vec3::ZERO));
///
/// assert!(renderer.is_loaded());
/// assert_eq!(renderer.effects().task_count(), 2);
/// ```
pub struct Renderer<D: RenderDevice> {
    device: D,
    state: GraphicsState,
    settings: RenderSettings,
    shaders: ShaderLibrary,
    lines: LineDrawer,
    white: TextureId,
    shadow_map: Option<FrameBuffer>,
    /// Depth 1.0 everywhere, bound when nothing casts shadows.
    no_shadow: Option<FrameBuffer>,
    no_shadow_cleared: bool,
    light_clip_from_world: Mat4,
    effects: EffectStack,
    /// The state cache assumes a single user.
    _not_sync: PhantomData<Cell<()>>,
}

impl<D: RenderDevice> Renderer<D> {
    /// Compiles every built-in shader on `device`. Check [`Renderer::is_loaded`]
    /// afterwards; failed shaders are logged and skipped at draw time.
    ///
    /// The light counts in `settings` are baked into the lit shaders here.
    pub fn new(mut device: D, settings: RenderSettings) -> Self {
        let shaders = ShaderLibrary::load(&mut device, &settings);
        let lines = LineDrawer::load(&mut device);
        let white = device.create_texture(
            "white",
            &TextureData::Rgba {
                width: 1,
                height: 1,
                pixels: &[255; 4],
            },
        );
        let no_shadow = FrameBuffer::create(&mut device, "no shadow", FrameBufferDesc::shadow_map(1));
        log::info!("renderer ready, shaders loaded: {}", shaders.is_loaded() && lines.is_loaded());

        Self {
            device,
            state: GraphicsState::new(),
            settings,
            shaders,
            lines,
            white,
            shadow_map: None,
            no_shadow,
            no_shadow_cleared: false,
            light_clip_from_world: Mat4::IDENTITY,
            effects: EffectStack::new(),
            _not_sync: PhantomData,
        }
    }

    /// Whether every shader compiled.
    pub fn is_loaded(&self) -> bool {
        self.shaders.is_loaded() && self.lines.is_loaded()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// msaa, hdr, gamma, clear color and shadow changes apply on the next frame.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn effects(&self) -> &EffectStack {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectStack {
        &mut self.effects
    }

    /// The shadow map of the last frame that had a shadow caster.
    pub fn shadow_map(&self) -> Option<&FrameBuffer> {
        self.shadow_map.as_ref()
    }

    /// Uploads `geometry` in the layout every world shader reads.
    pub fn make_mesh(&mut self, geometry: &Geometry) -> MeshId {
        let extracted = extract(geometry, self.shaders.geometry_layout());
        self.device.create_mesh(&extracted)
    }

    pub fn make_texture(&mut self, label: &str, data: &TextureData<'_>) -> TextureId {
        self.device.create_texture(label, data)
    }

    /// Appends an effect built against the shader library.
    ///
    /// ```
    /// # use tessera::*;
    /// # let mut renderer = Renderer::new(HeadlessDevice::new(), RenderSettings::default());
    /// let damage = renderer.add_effect(SimpleEffect::damage);
    /// let invert = renderer.add_effect(|_| SimpleEffect::invert().with_factor(0.5));
    /// ```
    pub fn add_effect<T: Effect>(&mut self, make: impl FnOnce(&mut ShaderLibrary) -> T) -> EffectHandle<T> {
        let effect = make(&mut self.shaders);
        self.effects.add_effect(effect)
    }

    /// Advances effect time.
    pub fn update(&mut self, dt: f32) {
        self.effects.update(dt);
    }

    fn clear_color(&self) -> Vec4 {
        Vec3::from_array(self.settings.clear_color).extend(1.0)
    }

    /// Renders `world` through the effect stack and presents.
    pub fn render(&mut self, world: &World, camera: &Camera) {
        let window = self.device.screen_size();
        let camera = camera.compile(window);
        let shadow = self.render_shadows(world, &camera);
        let frame = FrameInputs {
            world,
            camera: &camera,
            white: self.white,
            shadow,
            light_clip_from_world: self.light_clip_from_world,
            clear_color: self.clear_color(),
        };

        let lines = &mut self.lines;
        let mut pass = PassContext {
            ctx: RenderContext::new(&mut self.device, &mut self.state),
            shaders: &self.shaders,
            settings: &self.settings,
            window_size: window,
        };
        self.effects
            .render(&mut pass, &mut |pass: &mut PassContext<'_>| draw_world(pass, lines, &frame));
        self.device.end_frame();
    }

    /// Renders `world` straight to the screen, skipping every effect, and presents.
    pub fn render_world(&mut self, world: &World, camera: &CompiledCamera) {
        let window = self.device.screen_size();
        let shadow = self.render_shadows(world, camera);
        let frame = FrameInputs {
            world,
            camera,
            white: self.white,
            shadow,
            light_clip_from_world: self.light_clip_from_world,
            clear_color: self.clear_color(),
        };

        let mut pass = PassContext {
            ctx: RenderContext::new(&mut self.device, &mut self.state),
            shaders: &self.shaders,
            settings: &self.settings,
            window_size: window,
        };
        pass.ctx.execute(RenderCommand::BindTarget(RenderTarget::Screen));
        pass.ctx.execute(RenderCommand::Viewport(window));
        draw_world(&mut pass, &mut self.lines, &frame);
        self.device.end_frame();
    }

    /// Renders the shadow map if the world has a shadow caster and returns what
    /// the lit shaders should sample as their shadow map.
    pub fn render_shadows(&mut self, world: &World, camera: &CompiledCamera) -> Option<TextureBinding> {
        let Some(light) = world.lights.shadow_caster() else {
            return self.no_shadow_binding();
        };

        let resolution = self.settings.shadow_map_resolution;
        if self
            .shadow_map
            .as_ref()
            .is_some_and(|fb| fb.size() != Size::new(resolution, resolution))
        {
            if let Some(old) = self.shadow_map.take() {
                old.destroy(&mut self.device);
            }
        }
        if self.shadow_map.is_none() {
            self.shadow_map =
                FrameBuffer::create(&mut self.device, "shadow map", FrameBufferDesc::shadow_map(resolution));
            if self.shadow_map.is_none() {
                return self.no_shadow_binding();
            }
        }
        let Some(shadow_map) = &self.shadow_map else {
            return None;
        };

        let light_camera = self.settings.shadow.compile(camera, light.direction);
        self.light_clip_from_world = light_camera.clip_from_world();

        let mut ctx = RenderContext::new(&mut self.device, &mut self.state);
        ctx.execute(RenderCommand::BindTarget(shadow_map.target()));
        ctx.execute(RenderCommand::Viewport(shadow_map.size()));
        ctx.states()
            .cull_face(true)
            .cull_face_mode(CullFace::Front)
            .render_mode(RenderMode::Fill)
            .depth_test(true)
            .depth_mask(true)
            .depth_func(Compare::Less)
            .blending(false)
            .stencil_test(false);
        ctx.execute(RenderCommand::Clear(ClearRequest::depth()));

        let depth = &self.shaders.depth;
        if depth.program.is_loaded() {
            depth.program.use_program(&mut ctx);
            depth.camera.set(&depth.program, &mut ctx, &light_camera);
            for mesh in world
                .meshes
                .iter()
                .filter(|m| !m.material.is_transparent() && m.billboarding == Billboarding::None)
            {
                depth
                    .program
                    .set_mat4(&mut ctx, &depth.world_from_local, mesh.transform.matrix());
                ctx.execute(RenderCommand::DrawMesh(mesh.mesh));
            }
        }

        let depth = &self.shaders.depth_instanced;
        if depth.program.is_loaded() {
            depth.program.use_program(&mut ctx);
            depth.camera.set(&depth.program, &mut ctx, &light_camera);
            for batch in world.instanced.iter().filter(|b| !b.material.is_transparent()) {
                ctx.execute(RenderCommand::DrawInstanced {
                    mesh: batch.mesh,
                    transforms: batch.matrices(),
                });
            }
        }

        Some(shadow_map.depth_binding())
    }

    fn no_shadow_binding(&mut self) -> Option<TextureBinding> {
        let fb = self.no_shadow.as_ref()?;
        if !self.no_shadow_cleared {
            let mut ctx = RenderContext::new(&mut self.device, &mut self.state);
            ctx.execute(RenderCommand::BindTarget(fb.target()));
            ctx.execute(RenderCommand::Viewport(fb.size()));
            ctx.states().depth_mask(true);
            ctx.execute(RenderCommand::Clear(ClearRequest::depth()));
            self.no_shadow_cleared = true;
        }
        Some(fb.depth_binding())
    }

    /// Releases every framebuffer the renderer owns.
    pub fn destroy(&mut self) {
        self.effects.destroy(&mut self.device);
        for fb in [self.shadow_map.take(), self.no_shadow.take()].into_iter().flatten() {
            fb.destroy(&mut self.device);
        }
    }
}

/// Binds `program` and sets its camera; false when the program isn't loaded.
fn set_camera(ctx: &mut RenderContext<'_>, program: &ShaderProgram, uniforms: &CameraUniforms, camera: &CompiledCamera) -> bool {
    if !program.is_loaded() {
        return false;
    }
    program.use_program(ctx);
    uniforms.set(program, ctx, camera);
    true
}

fn set_lights(ctx: &mut RenderContext<'_>, shader: &DefaultShader, frame: &FrameInputs<'_>) {
    let program = &shader.program;
    let uniforms = &shader.lights;
    let lights: &Lights = &frame.world.lights;
    program.set_vec3(ctx, &uniforms.view_position, frame.camera.position);
    program.set_vec3(ctx, &uniforms.ambient_light, lights.ambient());
    program.set_mat4(ctx, &uniforms.light_clip_from_world, frame.light_clip_from_world);

    // unused slots stay black
    for i in 0..uniforms.directional_count {
        let (direction, diffuse, specular) = match lights.directional.get(i as usize) {
            Some(light) => (
                light.direction.normalize_or(Vec3::NEG_Y),
                light.color * light.diffuse_strength,
                light.color * light.specular_strength,
            ),
            None => (Vec3::NEG_Y, Vec3::ZERO, Vec3::ZERO),
        };
        program.set_at(ctx, &uniforms.directional_direction, i, UniformValue::Vec3(direction));
        program.set_at(ctx, &uniforms.directional_diffuse, i, UniformValue::Vec3(diffuse));
        program.set_at(ctx, &uniforms.directional_specular, i, UniformValue::Vec3(specular));
    }
    for i in 0..uniforms.point_count {
        let (position, diffuse, specular, range) = match lights.point.get(i as usize) {
            Some(light) => (
                light.position,
                light.color * light.diffuse_strength,
                light.color * light.specular_strength,
                Vec2::new(light.min_range, light.max_range),
            ),
            None => (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO, Vec2::new(0.0, 1.0)),
        };
        program.set_at(ctx, &uniforms.point_position, i, UniformValue::Vec3(position));
        program.set_at(ctx, &uniforms.point_diffuse, i, UniformValue::Vec3(diffuse));
        program.set_at(ctx, &uniforms.point_specular, i, UniformValue::Vec3(specular));
        program.set_at(ctx, &uniforms.point_range, i, UniformValue::Vec2(range));
    }
    for i in 0..uniforms.frustum_count {
        let (position, diffuse, specular, range, clip_from_world) = match lights.frustum.get(i as usize) {
            Some(light) => (
                light.position,
                light.color * light.diffuse_strength,
                light.color * light.specular_strength,
                Vec2::new(light.min_range, light.max_range),
                light.clip_from_world(),
            ),
            // a zero matrix puts every fragment behind the light
            None => (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO, Vec2::new(0.0, 1.0), Mat4::ZERO),
        };
        program.set_at(ctx, &uniforms.frustum_position, i, UniformValue::Vec3(position));
        program.set_at(ctx, &uniforms.frustum_diffuse, i, UniformValue::Vec3(diffuse));
        program.set_at(ctx, &uniforms.frustum_specular, i, UniformValue::Vec3(specular));
        program.set_at(ctx, &uniforms.frustum_range, i, UniformValue::Vec2(range));
        program.set_at(ctx, &uniforms.frustum_clip_from_world, i, UniformValue::Mat4(clip_from_world));
    }
}

/// Camera and lights only change once per frame; shaders keep their uniforms
/// between draws.
fn set_frame_uniforms(ctx: &mut RenderContext<'_>, shaders: &ShaderLibrary, frame: &FrameInputs<'_>) {
    for shader in shaders.unlit.iter() {
        set_camera(ctx, &shader.program, &shader.camera, frame.camera);
    }
    for shader in shaders.default.iter() {
        if set_camera(ctx, &shader.program, &shader.camera, frame.camera) {
            set_lights(ctx, shader, frame);
        }
    }
    let single = &shaders.single_color;
    set_camera(ctx, &single.program, &single.camera, frame.camera);
    let skybox = &shaders.skybox;
    set_camera(ctx, &skybox.program, &skybox.camera, frame.camera);
}

/// Binds the material's shader for `stage` and sets its per-draw uniforms.
/// `world_from_local` is `None` for instanced draws.
fn bind_material(
    ctx: &mut RenderContext<'_>,
    shaders: &ShaderLibrary,
    material: &Material,
    stage: Stage,
    world_from_local: Option<Mat4>,
    frame: &FrameInputs<'_>,
) {
    let texture = |id: Option<TextureId>| TextureBinding::Texture(id.unwrap_or(frame.white));
    match material {
        Material::Unlit(m) => {
            let shader = pick(&shaders.unlit, stage);
            let program = &shader.program;
            program.use_program(ctx);
            if let Some(model) = world_from_local {
                program.set_mat4(ctx, &shader.world_from_local, model);
            }
            program.set_vec4(ctx, &shader.tint_color, m.color.extend(m.alpha));
            program.bind_texture(ctx, shader.diffuse, texture(m.texture));
        }
        Material::Default(m) => {
            let shader = pick(&shaders.default, stage);
            let program = &shader.program;
            program.use_program(ctx);
            if let Some(model) = world_from_local {
                program.set_mat4(ctx, &shader.world_from_local, model);
            }
            program.set_vec4(ctx, &shader.tint_color, m.color.extend(m.alpha));
            program.set_vec3(ctx, &shader.ambient_tint, m.ambient_tint);
            program.set_vec3(ctx, &shader.specular_color, m.specular_color);
            program.set_float(ctx, &shader.shininess, m.shininess);
            program.set_float(ctx, &shader.emissive_factor, m.emissive_factor);
            program.bind_texture(ctx, shader.diffuse, texture(m.diffuse));
            program.bind_texture(ctx, shader.specular, texture(m.specular));
            program.bind_texture(ctx, shader.emissive, texture(m.emissive));
            if let Some(shadow) = frame.shadow {
                program.bind_texture(ctx, shader.shadow_map, shadow);
            }
            let frustum = &frame.world.lights.frustum;
            for (i, slot) in shader.frustum_cookies.iter().enumerate() {
                let cookie = frustum.get(i).and_then(|light| light.cookie);
                program.bind_texture(ctx, *slot, texture(cookie));
            }
        }
    }
}

/// Outlined meshes mark their pixels with stencil 1; the rest leave the stencil alone.
fn stencil_for(ctx: &mut RenderContext<'_>, outlined: bool) {
    if outlined {
        ctx.states()
            .stencil_func(Compare::Always, 1, 0xFF)
            .stencil_mask(0xFF);
    } else {
        ctx.states().stencil_mask(0x00);
    }
}

fn draw_lines(ctx: &mut RenderContext<'_>, lines: &mut LineDrawer, world: &World, style: LineStyle) {
    for line in world.debug_lines.iter().filter(|l| l.style == style) {
        lines.line(ctx, line.from, line.to, line.color);
    }
    lines.flush(ctx);
}

/// Draws the world into the bound target. Clears it first.
fn draw_world(pass: &mut PassContext<'_>, lines: &mut LineDrawer, frame: &FrameInputs<'_>) {
    let shaders = pass.shaders;
    let window = pass.window_size;
    let ctx = &mut pass.ctx;
    let world = frame.world;
    let camera = frame.camera;
    let has_outlines = world.has_outlines();

    ctx.states()
        .cull_face(true)
        .cull_face_mode(CullFace::Back)
        .render_mode(RenderMode::Fill)
        .stencil_test(has_outlines)
        .stencil_mask(0xFF)
        .depth_test(true)
        .depth_mask(true)
        .depth_func(Compare::Less)
        .stencil_op(StencilAction::Keep, StencilAction::Replace, StencilAction::Replace)
        .blend_mode(Blend::SrcAlpha, Blend::OneMinusSrcAlpha)
        .blending(false);
    ctx.execute(RenderCommand::Clear(ClearRequest::all(frame.clear_color)));

    set_frame_uniforms(ctx, shaders, frame);

    // 1. opaque
    let mut transparent: Vec<&MeshInstance> = Vec::new();
    for mesh in &world.meshes {
        if mesh.material.is_transparent() {
            transparent.push(mesh);
            continue;
        }
        stencil_for(ctx, mesh.outline.is_some());
        bind_material(ctx, shaders, &mesh.material, Stage::Opaque, Some(mesh.world_from_local(camera)), frame);
        ctx.execute(RenderCommand::DrawMesh(mesh.mesh));
    }

    // 2. instanced
    ctx.states().stencil_mask(0x00);
    let mut transparent_batches = Vec::new();
    for batch in &world.instanced {
        if batch.material.is_transparent() {
            transparent_batches.push(batch);
            continue;
        }
        bind_material(ctx, shaders, &batch.material, Stage::Instanced, None, frame);
        ctx.execute(RenderCommand::DrawInstanced {
            mesh: batch.mesh,
            transforms: batch.matrices(),
        });
    }

    // 3. debug lines
    if !world.debug_lines.is_empty() {
        lines.begin(ctx, camera);
        ctx.states().depth_test(true).depth_func(Compare::Less);
        draw_lines(ctx, lines, world, LineStyle::Normal);

        ctx.states().depth_test(false);
        draw_lines(ctx, lines, world, LineStyle::AlwaysVisible);

        // visible parts solid, then hidden parts dashed
        ctx.states().depth_test(true);
        draw_lines(ctx, lines, world, LineStyle::DashedWhenHidden);
        if world.debug_lines.iter().any(|l| l.style == LineStyle::DashedWhenHidden) {
            let resolution = Vec2::new(window.width as f32, window.height as f32);
            lines.set_line_to_dash(ctx, resolution, HIDDEN_LINE_DASH, HIDDEN_LINE_DASH);
            ctx.states().depth_func(Compare::Greater).depth_mask(false);
            draw_lines(ctx, lines, world, LineStyle::DashedWhenHidden);
            lines.set_line_to_solid(ctx);
            ctx.states().depth_func(Compare::Less).depth_mask(true);
        }
    }

    // 4. skybox
    if let Some(skybox) = &world.skybox {
        let shader = &shaders.skybox;
        ctx.states()
            .depth_test(true)
            .depth_mask(false)
            .depth_func(Compare::LessEqual)
            .blending(false)
            .stencil_mask(0x00)
            .cull_face_mode(CullFace::Front);
        shader.program.use_program(ctx);
        shader
            .program
            .bind_texture(ctx, shader.skybox, TextureBinding::Texture(skybox.cubemap));
        ctx.execute(RenderCommand::DrawMesh(skybox.mesh));
        ctx.states().cull_face_mode(CullFace::Back).depth_func(Compare::Less);
    }

    // 5. transparent, far to near
    transparent.sort_by(|a, b| {
        let da = camera.position.distance_squared(a.transform.position);
        let db = camera.position.distance_squared(b.transform.position);
        db.total_cmp(&da)
    });
    ctx.states()
        .blending(true)
        .depth_mask(true)
        .depth_func(Compare::Less)
        .cull_face_mode(CullFace::Back);
    for mesh in transparent {
        stencil_for(ctx, mesh.outline.is_some());
        bind_material(
            ctx,
            shaders,
            &mesh.material,
            Stage::Transparent,
            Some(mesh.world_from_local(camera)),
            frame,
        );
        ctx.execute(RenderCommand::DrawMesh(mesh.mesh));
    }
    ctx.states().stencil_mask(0x00);
    for batch in transparent_batches {
        bind_material(ctx, shaders, &batch.material, Stage::Instanced, None, frame);
        ctx.execute(RenderCommand::DrawInstanced {
            mesh: batch.mesh,
            transforms: batch.matrices(),
        });
    }

    // 6. outlines
    if has_outlines {
        let shader = &shaders.single_color;
        ctx.states()
            .stencil_func(Compare::NotEqual, 1, 0xFF)
            .stencil_mask(0x00)
            .depth_test(false);
        shader.program.use_program(ctx);
        for mesh in &world.meshes {
            let Some(color) = mesh.outline else {
                continue;
            };
            let model = mesh.world_from_local(camera) * Mat4::from_scale(Vec3::splat(OUTLINE_SCALE));
            shader.program.set_mat4(ctx, &shader.world_from_local, model);
            shader.program.set_vec4(ctx, &shader.tint_color, color.extend(1.0));
            ctx.execute(RenderCommand::DrawMesh(mesh.mesh));
        }
        ctx.states().depth_test(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FrameBufferId, HeadlessDevice};
    use crate::postproc::{BlurEffect, SimpleEffect};
    use crate::state::StateChange;
    use crate::world::{DirectionalLight, FrustumLight, InstancedMesh, Skybox, Transform};

    const OPAQUE: MeshId = MeshId(100);
    const OUTLINED: MeshId = MeshId(101);
    const BATCH: MeshId = MeshId(102);
    const SKY: MeshId = MeshId(103);
    const NEAR: MeshId = MeshId(104);
    const FAR: MeshId = MeshId(105);
    const MIDDLE: MeshId = MeshId(106);

    fn renderer() -> Renderer<HeadlessDevice> {
        Renderer::new(HeadlessDevice::new(), RenderSettings::default())
    }

    fn camera() -> CompiledCamera {
        Camera::new().at(Vec3::ZERO).looking_at(Vec3::NEG_Z).compile(Size::new(800, 600))
    }

    fn at(z: f32) -> Transform {
        Transform::from_position(Vec3::new(0.0, 0.0, z))
    }

    fn glass() -> Material {
        Material::lit(Vec3::ONE).with_alpha(0.5)
    }

    fn full_world() -> World {
        let mut world = World::new();
        world
            .add_mesh(MeshInstance::new(NEAR, glass()).with_transform(at(-1.0)))
            .add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)).with_transform(at(-3.0)))
            .add_mesh(MeshInstance::new(FAR, glass()).with_transform(at(-10.0)))
            .add_mesh(
                MeshInstance::new(OUTLINED, Material::unlit(Vec3::X))
                    .with_transform(at(-4.0))
                    .with_outline(Vec3::Y),
            )
            .add_mesh(MeshInstance::new(MIDDLE, glass()).with_transform(at(-5.0)))
            .add_instanced(InstancedMesh::new(BATCH, Material::lit(Vec3::ONE)).with_instance(at(-2.0)))
            .add_line(Vec3::ZERO, Vec3::X, Vec3::ONE, LineStyle::Normal);
        world.skybox = Some(Skybox {
            mesh: SKY,
            cubemap: TextureId(0),
        });
        world
    }

    #[derive(Debug, PartialEq)]
    enum Draw {
        Mesh(MeshId),
        Instanced(MeshId),
        Lines,
    }

    fn draws(commands: &[RenderCommand]) -> Vec<Draw> {
        commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::DrawMesh(mesh) => Some(Draw::Mesh(*mesh)),
                RenderCommand::DrawInstanced { mesh, .. } => Some(Draw::Instanced(*mesh)),
                RenderCommand::DrawLines(_) => Some(Draw::Lines),
                _ => None,
            })
            .collect()
    }

    fn position_of(commands: &[RenderCommand], wanted: &RenderCommand) -> usize {
        commands.iter().rposition(|c| c == wanted).unwrap()
    }

    #[test]
    fn world_draws_in_six_steps() {
        let mut renderer = renderer();
        renderer.render_world(&full_world(), &camera());

        assert_eq!(
            draws(renderer.device().commands()),
            vec![
                Draw::Mesh(OPAQUE),
                Draw::Mesh(OUTLINED),
                Draw::Instanced(BATCH),
                Draw::Lines,
                Draw::Mesh(SKY),
                Draw::Mesh(FAR),
                Draw::Mesh(MIDDLE),
                Draw::Mesh(NEAR),
                Draw::Mesh(OUTLINED),
            ]
        );
        assert_eq!(renderer.device().frames(), 1);
    }

    #[test]
    fn outlined_mesh_writes_stencil() {
        let mut renderer = renderer();
        renderer.render_world(&full_world(), &camera());
        let commands = renderer.device().commands();

        let first_outlined = commands
            .iter()
            .position(|c| *c == RenderCommand::DrawMesh(OUTLINED))
            .unwrap();
        let before = &commands[..first_outlined];
        assert!(before.contains(&RenderCommand::State(StateChange::StencilTest(true))));
        assert!(before.contains(&RenderCommand::State(StateChange::StencilMask(0xFF))));
    }

    #[test]
    fn outline_pass_tests_stencil_without_depth() {
        let mut renderer = renderer();
        renderer.render_world(&full_world(), &camera());
        let commands = renderer.device().commands();

        let near = position_of(commands, &RenderCommand::DrawMesh(NEAR));
        let outline = position_of(commands, &RenderCommand::DrawMesh(OUTLINED));
        let between = &commands[near..outline];
        assert!(between.iter().any(|c| matches!(
            c,
            RenderCommand::State(StateChange::StencilFunc(f)) if f.compare == Compare::NotEqual && f.reference == 1
        )));
        assert!(between.contains(&RenderCommand::State(StateChange::DepthTest(false))));
        assert_eq!(
            commands[outline + 1..].first(),
            Some(&RenderCommand::State(StateChange::DepthTest(true)))
        );
    }

    #[test]
    fn outline_is_scaled_up() {
        let mut renderer = renderer();
        let camera = camera();
        renderer.render_world(&full_world(), &camera);
        let commands = renderer.device().commands();
        let outline = position_of(commands, &RenderCommand::DrawMesh(OUTLINED));

        let expected = at(-4.0).matrix() * Mat4::from_scale(Vec3::splat(OUTLINE_SCALE));
        let model = commands[..outline]
            .iter()
            .rev()
            .find_map(|c| match c {
                RenderCommand::SetUniform {
                    value: UniformValue::Mat4(m),
                    ..
                } => Some(*m),
                _ => None,
            })
            .unwrap();
        assert!(model.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn skybox_is_drawn_from_inside_without_depth_writes() {
        let mut renderer = renderer();
        renderer.render_world(&full_world(), &camera());
        let commands = renderer.device().commands();

        let lines = commands
            .iter()
            .position(|c| matches!(c, RenderCommand::DrawLines(_)))
            .unwrap();
        let sky = position_of(commands, &RenderCommand::DrawMesh(SKY));
        let between = &commands[lines..sky];
        for change in [
            StateChange::DepthFunc(Compare::LessEqual),
            StateChange::DepthMask(false),
            StateChange::CullFaceMode(CullFace::Front),
        ] {
            assert!(between.contains(&RenderCommand::State(change)), "{change:?}");
        }
    }

    #[test]
    fn transparent_meshes_blend() {
        let mut renderer = renderer();
        renderer.render_world(&full_world(), &camera());
        let commands = renderer.device().commands();

        let sky = position_of(commands, &RenderCommand::DrawMesh(SKY));
        let far = position_of(commands, &RenderCommand::DrawMesh(FAR));
        let between = &commands[sky..far];
        assert!(between.contains(&RenderCommand::State(StateChange::Blending(true))));
        assert!(between.contains(&RenderCommand::State(StateChange::DepthMask(true))));
        assert!(between.contains(&RenderCommand::State(StateChange::CullFaceMode(CullFace::Back))));
    }

    #[test]
    fn no_stencil_without_outlines() {
        let mut renderer = renderer();
        let mut world = World::new();
        world.add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)));
        renderer.render_world(&world, &camera());

        let changes = renderer.device().state_changes();
        assert!(changes.contains(&StateChange::StencilTest(false)));
        assert!(!changes.contains(&StateChange::StencilTest(true)));
    }

    #[test]
    fn hidden_lines_are_redrawn_dashed() {
        let mut renderer = renderer();
        let mut world = World::new();
        world.add_line(Vec3::ZERO, Vec3::X, Vec3::ONE, LineStyle::DashedWhenHidden);
        renderer.render_world(&world, &camera());
        let commands = renderer.device().commands();

        assert_eq!(draws(commands), vec![Draw::Lines, Draw::Lines]);
        let second = position_of(commands, &RenderCommand::DrawLines(vec![
            crate::device::LineVertex::new(Vec3::ZERO, Vec3::ONE),
            crate::device::LineVertex::new(Vec3::X, Vec3::ONE),
        ]));
        assert!(
            commands[..second].contains(&RenderCommand::State(StateChange::DepthFunc(Compare::Greater)))
        );
    }

    #[test]
    fn failing_shader_is_reported() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("skybox");
        let renderer = Renderer::new(device, RenderSettings::default());
        assert!(!renderer.is_loaded());
        assert!(!renderer.shaders().is_loaded());

        let mut device = HeadlessDevice::new();
        device.fail_shader("lines");
        let renderer = Renderer::new(device, RenderSettings::default());
        assert!(renderer.shaders().is_loaded());
        assert!(!renderer.is_loaded());
    }

    fn shadowed_world() -> World {
        let mut world = World::new();
        world
            .add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)))
            .add_mesh(MeshInstance::new(NEAR, glass()))
            .add_mesh(
                MeshInstance::new(FAR, Material::lit(Vec3::ONE)).with_billboarding(Billboarding::Screen),
            );
        world
            .lights
            .directional
            .push(DirectionalLight::new(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE).with_shadow());
        world
    }

    #[test]
    fn shadow_pass_draws_opaque_meshes_first() {
        let mut renderer = renderer();
        renderer.render(&shadowed_world(), &Camera::new());
        let shadow_map = renderer.shadow_map().unwrap();
        assert_eq!(shadow_map.size(), Size::new(1024, 1024));
        let shadow_id = shadow_map.id();
        let commands = renderer.device().commands();

        let start = position_of(
            commands,
            &RenderCommand::BindTarget(RenderTarget::FrameBuffer(shadow_id)),
        );
        assert_eq!(start, 0);
        let shadow_draws: Vec<_> = commands
            .iter()
            .take_while(|c| !matches!(c, RenderCommand::BindTarget(t) if *t != RenderTarget::FrameBuffer(shadow_id)))
            .collect();
        assert!(shadow_draws.contains(&&RenderCommand::State(StateChange::CullFaceMode(CullFace::Front))));
        assert_eq!(draws(&shadow_draws.into_iter().cloned().collect::<Vec<_>>()), vec![Draw::Mesh(OPAQUE)]);

        assert!(commands.contains(&RenderCommand::BindTexture {
            slot: 3,
            texture: TextureBinding::FrameBufferDepth(shadow_id),
        }));
    }

    #[test]
    fn no_caster_binds_the_empty_shadow_map() {
        let mut renderer = renderer();
        let mut world = World::new();
        world.add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)));
        world
            .lights
            .directional
            .push(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE));
        renderer.render(&world, &Camera::new());

        assert!(renderer.shadow_map().is_none());
        // the first framebuffer created is the 1x1 fallback
        let fallback = TextureBinding::FrameBufferDepth(FrameBufferId(0));
        assert!(renderer.device().commands().contains(&RenderCommand::BindTexture {
            slot: 3,
            texture: fallback,
        }));
    }

    fn uploads(renderer: &Renderer<HeadlessDevice>, uniform: &crate::uniform::Uniform) -> Vec<(u32, UniformValue)> {
        let shader = &renderer.shaders().default.opaque;
        let id = shader.program.id().unwrap();
        let prop = uniform.prop().unwrap();
        renderer
            .device()
            .commands()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::SetUniform {
                    shader,
                    prop: p,
                    index,
                    value,
                } if *shader == id && *p == prop => Some((*index, *value)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unused_frustum_slots_upload_black() {
        let mut renderer = renderer();
        let cookie = renderer.make_texture(
            "cookie",
            &TextureData::Rgba {
                width: 1,
                height: 1,
                pixels: &[255, 0, 0, 255],
            },
        );
        let mut world = World::new();
        world.add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)));
        let light = FrustumLight::new(Vec3::Y, Vec3::new(1.0, 0.5, 0.0)).with_cookie(cookie);
        world.lights.frustum.push(light);
        renderer.render(&world, &Camera::new());

        let lights = &renderer.shaders().default.opaque.lights;
        assert_eq!(lights.frustum_count, 5);
        let diffuse = uploads(&renderer, &lights.frustum_diffuse);
        assert_eq!(diffuse.len(), 5);
        assert_eq!(diffuse[0], (0, UniformValue::Vec3(Vec3::new(1.0, 0.5, 0.0))));
        for (index, value) in &diffuse[1..] {
            assert_eq!(*value, UniformValue::Vec3(Vec3::ZERO), "slot {index}");
        }
        let specular = uploads(&renderer, &lights.frustum_specular);
        assert!(specular[1..].iter().all(|(_, v)| *v == UniformValue::Vec3(Vec3::ZERO)));

        let clip = uploads(&renderer, &lights.frustum_clip_from_world);
        assert_eq!(clip[0], (0, UniformValue::Mat4(light.clip_from_world())));
        assert_eq!(clip[4], (4, UniformValue::Mat4(Mat4::ZERO)));
    }

    #[test]
    fn frustum_cookies_fall_back_to_white() {
        let mut renderer = renderer();
        let cookie = renderer.make_texture(
            "cookie",
            &TextureData::Rgba {
                width: 1,
                height: 1,
                pixels: &[255, 0, 0, 255],
            },
        );
        let mut world = World::new();
        world.add_mesh(MeshInstance::new(OPAQUE, Material::lit(Vec3::ONE)));
        world
            .lights
            .frustum
            .push(FrustumLight::new(Vec3::Y, Vec3::ONE).with_cookie(cookie));
        renderer.render(&world, &Camera::new());

        let bound = |slot: u32| {
            renderer.device().commands().iter().find_map(|c| match c {
                RenderCommand::BindTexture { slot: s, texture } if *s == slot => Some(*texture),
                _ => None,
            })
        };
        assert_eq!(bound(4), Some(TextureBinding::Texture(cookie)));
        // the material has no diffuse texture either, so slot 0 holds white
        let white = bound(0);
        assert!(white.is_some());
        assert_eq!(bound(5), white);
        assert_eq!(bound(8), white);
    }

    #[test]
    fn render_goes_through_the_effect_chain() {
        let mut renderer = renderer();
        renderer.add_effect(|shaders| BlurEffect::new(shaders).with_factor(1.0));
        let invert = renderer.add_effect(|_| SimpleEffect::invert().with_factor(1.0));
        let mut world = World::new();
        world.add_mesh(MeshInstance::new(OPAQUE, Material::unlit(Vec3::ONE)));

        renderer.render(&world, &Camera::new());
        assert_eq!(renderer.effects().task_count(), 3);
        let fullscreen = renderer
            .device()
            .commands()
            .iter()
            .filter(|c| **c == RenderCommand::DrawFullscreen)
            .count();
        // realize, blur vertical, blur horizontal, invert
        assert_eq!(fullscreen, 4);

        renderer.effects_mut().effect_mut(invert).unwrap().factor.factor = 0.0;
        renderer.device_mut().clear_commands();
        renderer.render(&world, &Camera::new());
        assert_eq!(renderer.effects().task_count(), 2);
        assert_eq!(renderer.device().frames(), 2);
    }

    #[test]
    fn update_advances_enabled_effects() {
        let mut renderer = renderer();
        let damage = renderer.add_effect(|shaders| SimpleEffect::damage(shaders).with_factor(1.0));
        renderer.update(0.25);
        assert_eq!(renderer.effects().effect(damage).unwrap().time(), 0.25);
    }

    #[test]
    fn shadow_map_follows_resolution_changes() {
        let mut renderer = renderer();
        let world = shadowed_world();
        renderer.render(&world, &Camera::new());
        renderer.settings_mut().shadow_map_resolution = 512;
        renderer.render(&world, &Camera::new());
        assert_eq!(renderer.shadow_map().unwrap().size(), Size::new(512, 512));
    }

    #[test]
    fn destroy_releases_all_framebuffers() {
        let mut renderer = renderer();
        renderer.add_effect(|_| SimpleEffect::grayscale().with_factor(1.0));
        renderer.render(&shadowed_world(), &Camera::new());
        assert!(renderer.device().live_framebuffers() > 0);
        renderer.destroy();
        assert_eq!(renderer.device().live_framebuffers(), 0);
    }
}
