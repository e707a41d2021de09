//! Opens a window and renders a small demo scene.
//!
//! Keys 1 to 5 toggle blur, invert, grayscale, damage and color grading. Settings
//! are read from `tessera.toml` in the working directory when it exists.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use tessera::{
    BlurEffect, Camera, DirectionalLight, Effect, EffectHandle, FrustumLight, Geometry, GpuContext,
    InstancedMesh, LineStyle, Material, MeshInstance, PointLight, Quat, RenderSettings, Renderer,
    SimpleEffect, Size, Skybox, TextureData, Transform, Vec3, WgpuDevice, World,
};

const SETTINGS_PATH: &str = "tessera.toml";

struct Effects {
    blur: EffectHandle<BlurEffect>,
    invert: EffectHandle<SimpleEffect>,
    grayscale: EffectHandle<SimpleEffect>,
    damage: EffectHandle<SimpleEffect>,
    color_grade: EffectHandle<SimpleEffect>,
}

struct Viewer {
    window: Arc<Window>,
    renderer: Renderer<WgpuDevice>,
    world: World,
    effects: Effects,
}

#[derive(Default)]
struct App {
    viewer: Option<Viewer>,
    start_time: Option<Instant>,
    last_frame: Option<Instant>,
}

fn load_settings() -> RenderSettings {
    if !std::path::Path::new(SETTINGS_PATH).exists() {
        return RenderSettings::default();
    }
    match RenderSettings::load(SETTINGS_PATH) {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("ignoring {SETTINGS_PATH}: {err}");
            RenderSettings::default()
        }
    }
}

/// A vertical gradient from `horizon` to `zenith`, one flat color per face.
fn sky_faces(horizon: [u8; 3], zenith: [u8; 3]) -> [Vec<u8>; 6] {
    let face = |c: [u8; 3]| c.iter().copied().chain([255]).collect::<Vec<u8>>();
    let mid = [
        ((horizon[0] as u16 + zenith[0] as u16) / 2) as u8,
        ((horizon[1] as u16 + zenith[1] as u16) / 2) as u8,
        ((horizon[2] as u16 + zenith[2] as u16) / 2) as u8,
    ];
    [
        face(mid),
        face(mid),
        face(zenith),
        face(horizon),
        face(mid),
        face(mid),
    ]
}

fn build_world(renderer: &mut Renderer<WgpuDevice>) -> World {
    let cube = renderer.make_mesh(&Geometry::cube(1.0));
    let sphere = renderer.make_mesh(&Geometry::sphere(32, 16));
    let floor = renderer.make_mesh(&Geometry::plane(40.0));
    let sky_mesh = renderer.make_mesh(&Geometry::cube(2.0));

    let faces = sky_faces([170, 190, 210], [40, 80, 160]);
    let cubemap = renderer.make_texture(
        "sky",
        &TextureData::Cube {
            size: 1,
            faces: [&faces[0], &faces[1], &faces[2], &faces[3], &faces[4], &faces[5]],
        },
    );

    let mut world = World::new();
    world.skybox = Some(Skybox {
        mesh: sky_mesh,
        cubemap,
    });
    world
        .add_mesh(MeshInstance::new(floor, Material::lit(Vec3::splat(0.6))))
        .add_mesh(
            MeshInstance::new(cube, Material::lit(Vec3::new(0.9, 0.3, 0.2)))
                .with_transform(Transform::from_position(Vec3::new(-2.0, 0.5, 0.0)))
                .with_outline(Vec3::new(1.0, 0.8, 0.1)),
        )
        .add_mesh(
            MeshInstance::new(sphere, Material::lit(Vec3::new(0.2, 0.5, 0.9)))
                .with_transform(Transform::from_position(Vec3::new(2.0, 1.0, 0.0)).uniform_scale(2.0)),
        )
        .add_mesh(
            MeshInstance::new(cube, Material::unlit(Vec3::new(0.3, 1.0, 0.6)).with_alpha(0.4))
                .with_transform(Transform::from_position(Vec3::new(0.0, 0.75, 2.0)).uniform_scale(1.5)),
        );

    let mut pillars = InstancedMesh::new(cube, Material::lit(Vec3::splat(0.8)));
    for i in 0..12 {
        let angle = i as f32 / 12.0 * TAU;
        pillars = pillars.with_instance(
            Transform::from_position(Vec3::new(angle.cos() * 8.0, 1.5, angle.sin() * 8.0))
                .rotation(Quat::from_rotation_y(-angle))
                .scale(Vec3::new(0.5, 3.0, 0.5)),
        );
    }
    world.add_instanced(pillars);

    world
        .add_line(Vec3::ZERO, Vec3::X * 3.0, Vec3::X, LineStyle::Normal)
        .add_line(Vec3::ZERO, Vec3::Y * 3.0, Vec3::Y, LineStyle::AlwaysVisible)
        .add_line(Vec3::ZERO, Vec3::Z * 3.0, Vec3::Z, LineStyle::DashedWhenHidden);

    world.lights.directional.push(
        DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.95, 0.85)).with_shadow(),
    );
    world.lights.point.push(
        PointLight::new(Vec3::new(0.0, 2.0, -3.0), Vec3::new(1.0, 0.4, 0.2)).with_range(2.0, 6.0),
    );
    world.lights.frustum.push(
        FrustumLight::new(Vec3::new(0.0, 6.0, 4.0), Vec3::new(0.4, 0.6, 1.0))
            .looking(0.0, -1.0)
            .with_fov(30.0, 1.0)
            .with_range(8.0, 14.0),
    );
    world
}

impl Viewer {
    fn new(event_loop: &ActiveEventLoop) -> Result<Self, Box<dyn std::error::Error>> {
        let window = Arc::new(
            event_loop.create_window(Window::default_attributes().with_title("tessera viewer"))?,
        );
        let inner = window.inner_size();
        let gpu = GpuContext::new(window.clone(), Size::new(inner.width, inner.height))?;

        let mut renderer = Renderer::new(WgpuDevice::new(gpu), load_settings());
        if !renderer.is_loaded() {
            log::error!("some shaders failed to load, see above");
        }

        let effects = Effects {
            blur: renderer.add_effect(BlurEffect::new),
            invert: renderer.add_effect(|_| SimpleEffect::invert()),
            grayscale: renderer.add_effect(|_| SimpleEffect::grayscale()),
            damage: renderer.add_effect(SimpleEffect::damage),
            color_grade: renderer.add_effect(SimpleEffect::color_grade),
        };
        let world = build_world(&mut renderer);

        Ok(Self {
            window,
            renderer,
            world,
            effects,
        })
    }

    fn toggle<T: Effect>(&mut self, handle: EffectHandle<T>, factor: impl FnOnce(&mut T) -> &mut f32) {
        if let Some(mut effect) = self.renderer.effects_mut().effect_mut(handle) {
            let value = factor(&mut effect);
            *value = if *value > 0.5 { 0.0 } else { 1.0 };
        }
    }

    fn key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Digit1 => self.toggle(self.effects.blur, |e| &mut e.factor.factor),
            KeyCode::Digit2 => self.toggle(self.effects.invert, |e| &mut e.factor.factor),
            KeyCode::Digit3 => self.toggle(self.effects.grayscale, |e| &mut e.factor.factor),
            KeyCode::Digit4 => self.toggle(self.effects.damage, |e| &mut e.factor.factor),
            KeyCode::Digit5 => self.toggle(self.effects.color_grade, |e| &mut e.factor.factor),
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        match Viewer::new(event_loop) {
            Ok(viewer) => {
                viewer.window.request_redraw();
                self.viewer = Some(viewer);
                self.start_time = Some(Instant::now());
            }
            Err(err) => {
                log::error!("failed to start: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewer) = &mut self.viewer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                viewer.renderer.destroy();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                viewer
                    .renderer
                    .device_mut()
                    .resize(Size::new(size.width, size.height));
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        viewer.key(code);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = self.last_frame.map_or(0.0, |last| (now - last).as_secs_f32());
                self.last_frame = Some(now);
                let time = self.start_time.map_or(0.0, |start| (now - start).as_secs_f32());

                let orbit = time * 0.2;
                let camera = Camera::new()
                    .at(Vec3::new(orbit.cos() * 12.0, 5.0, orbit.sin() * 12.0))
                    .looking_at(Vec3::ZERO);

                viewer.renderer.update(dt);
                viewer.renderer.render(&viewer.world, &camera);
                viewer.window.request_redraw();
            }
            _ => (),
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .filter_module("wgpu_core", log::LevelFilter::Warn)
        .init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)
}
