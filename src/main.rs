// =============================================================================
// SIMPLE RENDER SYSTEM - Vulkan scene renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, camera, scene)                   │
// │    └── Renderer (swapchain, per-frame command buffers)          │
// │          └── SimpleRenderSystem (pipeline + layout)             │
// │                └── GameObjects (transform + model)              │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Poll shader watcher, update camera from keyboard
// 2. begin_frame (wait fence, acquire image, begin command buffer)
// 3. Write this frame's global uniform buffer
// 4. Record render pass: bind pipeline, bind set 0, push + draw per object
// 5. end_frame (submit, present, recreate swapchain if needed)
//
// =============================================================================

mod backend;
mod config;
mod hot_reload;
mod input;
mod renderer;
mod scene;
mod systems;

use anyhow::{Context, Result};
use ash::vk;
use backend::descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use backend::swapchain::SwapchainSettings;
use backend::{Buffer, VulkanDevice};
use config::{Config, RenderMode};
use glam::Vec3;
use gpu_allocator::MemoryLocation;
use hot_reload::ShaderWatcher;
use input::{parse_key_code, KeyboardMovementController};
use renderer::Renderer;
use scene::{Camera, FrameInfo, GameObject, GlobalUbo, Model, ModelBuilder, Transform};
use std::f32::consts::TAU;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use systems::SimpleRenderSystem;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

/// Long stalls (dragging the window, breakpoints) shouldn't teleport the camera
const MAX_FRAME_TIME: f32 = 0.25;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; errors are reported once logging is up
    let (config, config_error) = Config::load();

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::debug!("Config: {:?}", config);
    log::info!("Starting simple render system");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Render mode: {:?}, present mode: {}",
        config.scene.render_mode,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Writes every log line to stderr and a log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize logging; `RUST_LOG` overrides the default `info` level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    let mut file_error = None;
    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(TeeWriter { file })));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Could not open log file {:?}: {}", config.debug.log_file, e);
    }
}

// =============================================================================
// GPU STATE
// =============================================================================

/// Set 0 resources: one uniform buffer slot and descriptor set per frame in flight
struct GlobalResources {
    sets: Vec<vk::DescriptorSet>,
    /// One aligned `GlobalUbo` instance per frame slot
    ubo_buffer: Buffer,
    pool: DescriptorPool,
    layout: DescriptorSetLayout,
}

impl GlobalResources {
    fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> Result<Self> {
        let layout = DescriptorSetLayout::builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )?
            .build(device.clone())?;

        let pool = DescriptorPool::builder()
            .max_sets(frames_in_flight as u32)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames_in_flight as u32)
            .build(device.clone())?;

        let ubo_buffer = Buffer::new(
            device.clone(),
            "global ubo",
            std::mem::size_of::<GlobalUbo>() as vk::DeviceSize,
            frames_in_flight as u32,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            device.properties.limits.min_uniform_buffer_offset_alignment,
        )?;

        let mut globals = Self {
            sets: Vec::new(),
            ubo_buffer,
            pool,
            layout,
        };
        globals.write_sets()?;
        Ok(globals)
    }

    /// Reset the pool and point one set per frame slot at its slice of the buffer
    fn write_sets(&mut self) -> Result<()> {
        self.pool.reset_pool()?;
        self.sets = (0..self.ubo_buffer.instance_count())
            .map(|index| {
                DescriptorWriter::new(&self.layout, &self.pool)
                    .write_buffer(0, self.ubo_buffer.descriptor_info_for_index(index)?)?
                    .build()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Upload `ubo` for `frame_index` and return that frame's set
    fn update(&mut self, frame_index: usize, ubo: &GlobalUbo) -> Result<vk::DescriptorSet> {
        let set = *self
            .sets
            .get(frame_index)
            .with_context(|| format!("No descriptor set for frame {}", frame_index))?;
        self.ubo_buffer
            .write_to_index(bytemuck::bytes_of(ubo), frame_index as u32)?;
        Ok(set)
    }
}

/// Everything that needs a live device.
///
/// Field order is drop order: systems and scene resources go before the
/// renderer, the device goes last.
struct GpuState {
    render_system: SimpleRenderSystem,
    game_objects: Vec<GameObject>,
    globals: Option<GlobalResources>,
    shader_watcher: Option<ShaderWatcher>,
    renderer: Renderer,
    device: Arc<VulkanDevice>,
}

impl GpuState {
    fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Validation layers only in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, window)?;

        let size = window.inner_size();
        let settings = SwapchainSettings {
            present_mode: config.get_present_mode(),
            max_frames_in_flight: config.graphics.frames_in_flight(),
        };
        let renderer = Renderer::new(
            device.clone(),
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            settings,
            config.graphics.clear_color,
        )?;

        let globals = match config.scene.render_mode {
            RenderMode::Lit => Some(GlobalResources::new(device.clone(), renderer.frames_in_flight())?),
            RenderMode::Flat => None,
        };

        let render_system = create_render_system(&device, &renderer, globals.as_ref(), config)?;
        let game_objects = load_game_objects(&device, config)?;

        let shader_watcher = if config.shaders.hot_reload {
            match ShaderWatcher::new(&config.shaders.directory) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            render_system,
            game_objects,
            globals,
            shader_watcher,
            renderer,
            device,
        })
    }

    /// Rebuild the render system if compiled shaders changed; keep the old one on failure
    fn reload_shaders_if_changed(&mut self, config: &Config) {
        let changed = self
            .shader_watcher
            .as_ref()
            .is_some_and(|watcher| watcher.poll_changed());
        if !changed {
            return;
        }

        log::info!("Shaders changed, rebuilding pipeline");
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle before shader reload failed: {:?}", e);
            return;
        }

        match create_render_system(&self.device, &self.renderer, self.globals.as_ref(), config) {
            Ok(render_system) => self.render_system = render_system,
            Err(e) => log::error!("Shader reload failed, keeping previous pipeline: {:#}", e),
        }
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {:?}", e);
        }
    }
}

fn create_render_system(
    device: &Arc<VulkanDevice>,
    renderer: &Renderer,
    globals: Option<&GlobalResources>,
    config: &Config,
) -> Result<SimpleRenderSystem> {
    SimpleRenderSystem::new(
        device.clone(),
        renderer.swapchain_render_pass(),
        globals.map(|g| g.layout.handle()),
        &config.shaders.paths(config.scene.render_mode),
        config.graphics.polygon_mode(device.supports_wireframe()),
    )
}

fn load_game_objects(device: &Arc<VulkanDevice>, config: &Config) -> Result<Vec<GameObject>> {
    let cube = Arc::new(Model::new(device.clone(), &ModelBuilder::cube(Vec3::ZERO))?);
    let mut game_objects = Vec::new();

    match config.scene.render_mode {
        // No camera: the cube is placed straight into clip space
        RenderMode::Flat => {
            let mut object = GameObject::with_model(cube);
            object.transform.translation = Vec3::new(0.0, 0.0, 0.5);
            object.transform.scale = Vec3::splat(0.5);
            game_objects.push(object);
        }
        RenderMode::Lit => {
            let mut object = GameObject::with_model(cube.clone());
            object.transform.translation = Vec3::new(0.0, 0.0, 2.5);
            object.transform.scale = Vec3::splat(0.5);
            game_objects.push(object);

            let mut small = GameObject::with_model(cube);
            small.transform.translation = Vec3::new(1.2, 0.3, 3.0);
            small.transform.scale = Vec3::splat(0.25);
            game_objects.push(small);

            if let Some(path) = &config.scene.model_path {
                let model = Model::load_obj(device.clone(), path)
                    .with_context(|| format!("Failed to load scene model {:?}", path))?;
                let mut object = GameObject::with_model(Arc::new(model));
                object.transform.translation = Vec3::new(-1.2, 0.5, 2.5);
                object.transform.scale = Vec3::splat(2.0);
                game_objects.push(object);
            }
        }
    }

    log::info!("Scene has {} game objects", game_objects.len());
    Ok(game_objects)
}

fn animate(game_objects: &mut [GameObject], dt: f32) {
    for object in game_objects {
        let rotation = &mut object.transform.rotation;
        rotation.y = (rotation.y + 0.5 * dt).rem_euclid(TAU);
        rotation.x = (rotation.x + 0.25 * dt).rem_euclid(TAU);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct.
///
/// IMPORTANT: `gpu` must drop before `window`; the surface belongs to it.
pub struct App {
    config: Config,
    quit_key: KeyCode,
    fullscreen_key: KeyCode,

    gpu: Option<GpuState>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    camera: Camera,
    viewer: Transform,
    controller: KeyboardMovementController,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

fn configured_key(name: &str, fallback: KeyCode) -> KeyCode {
    parse_key_code(name).unwrap_or_else(|| {
        log::warn!("Unknown key '{}', using {:?}", name, fallback);
        fallback
    })
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            quit_key: configured_key(&config.controls.quit_key, KeyCode::Escape),
            fullscreen_key: configured_key(&config.controls.fullscreen_key, KeyCode::F11),
            controller: KeyboardMovementController::new(
                config.controls.move_speed,
                config.controls.look_speed,
            ),
            is_fullscreen: config.window.fullscreen,
            config,
            gpu: None,
            window: None,
            camera: Camera::default(),
            viewer: Transform::default(),
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame; `Ok(false)` when nothing was drawn
    fn render_frame(&mut self) -> Result<bool> {
        let now = Instant::now();
        let dt = now
            .duration_since(self.last_frame_time)
            .as_secs_f32()
            .min(MAX_FRAME_TIME);
        self.last_frame_time = now;

        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(false);
        };

        gpu.reload_shaders_if_changed(&self.config);

        self.controller.move_in_plane_xz(dt, &mut self.viewer);
        self.camera
            .set_view_yxz(self.viewer.translation, self.viewer.rotation);
        let camera_config = &self.config.camera;
        self.camera.set_perspective_projection(
            camera_config.fov_y_degrees.to_radians(),
            gpu.renderer.aspect_ratio(),
            camera_config.near,
            camera_config.far,
        );

        animate(&mut gpu.game_objects, dt);

        let Some(command_buffer) = gpu.renderer.begin_frame()? else {
            return Ok(false);
        };
        let frame_index = gpu.renderer.frame_index();

        gpu.renderer.begin_swap_chain_render_pass(command_buffer)?;

        let stats = match gpu.globals.as_mut() {
            Some(globals) => {
                let ubo = self.config.lighting.global_ubo(self.camera.projection_view());
                let frame_info = FrameInfo {
                    frame_index,
                    frame_time: dt,
                    command_buffer,
                    camera: &self.camera,
                    global_descriptor_set: Some(globals.update(frame_index, &ubo)?),
                    game_objects: &gpu.game_objects,
                };
                gpu.render_system.render_game_objects(&frame_info)?
            }
            None => gpu
                .render_system
                .render_game_objects_in(command_buffer, &gpu.game_objects)?,
        };
        log::trace!("Frame {}: {:?}", frame_index, stats);

        gpu.renderer.end_swap_chain_render_pass(command_buffer)?;
        gpu.renderer.end_frame()?;

        Ok(true)
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The following Resized event rebuilds the swapchain
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    1000.0 / fps.max(f32::EPSILON),
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match GpuState::new(&self.config, &window) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.last_frame_time = Instant::now();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref gpu) = self.gpu {
                    if let Err(e) = gpu.device.wait_idle() {
                        log::error!("wait_idle failed on close request: {:?}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut gpu) = self.gpu {
                    gpu.renderer.mark_resized(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    });
                }
            }

            WindowEvent::Focused(false) => self.controller.release_all(),

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    // A failed frame leaves the command buffer mid-recording
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                self.controller.handle_event(&event);

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if key == self.quit_key {
                            log::info!("{:?} pressed, exiting...", key);
                            event_loop.exit();
                        } else if key == self.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // GPU resources (surface included) before the window
        self.gpu = None;
        self.window = None;
        log::info!("Cleanup complete");
    }
}
