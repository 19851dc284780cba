// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; missing keys take the defaults below. A missing
// or unparsable file falls back to defaults with a warning.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::backend::ShaderPaths;
use crate::scene::GlobalUbo;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub camera: CameraConfig,
    pub lighting: LightingConfig,
    pub shaders: ShaderConfig,
    pub scene: SceneConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Simple Render System".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Draw edges only (needs `fillModeNonSolid`)
    pub wireframe: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.01, 0.01, 0.01, 1.0],
            max_frames_in_flight: 2,
            wireframe: false,
        }
    }
}

impl GraphicsConfig {
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.max(1)
    }

    /// LINE when wireframe is configured and the device can draw it
    pub fn polygon_mode(&self, wireframe_supported: bool) -> vk::PolygonMode {
        match (self.wireframe, wireframe_supported) {
            (true, true) => vk::PolygonMode::LINE,
            (true, false) => {
                log::warn!("Wireframe requested but fillModeNonSolid is unsupported, drawing filled");
                vk::PolygonMode::FILL
            }
            (false, _) => vk::PolygonMode::FILL,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "render_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Key bindings and camera speeds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
    /// World units per second
    pub move_speed: f32,
    /// Radians per second
    pub look_speed: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 50.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Point light + ambient term, copied into the global uniform buffer
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// rgb + intensity
    pub ambient: [f32; 4],
    pub light_position: [f32; 3],
    /// rgb + intensity
    pub light_color: [f32; 4],
}

impl Default for LightingConfig {
    fn default() -> Self {
        let ubo = GlobalUbo::default();
        Self {
            ambient: ubo.ambient_light_color.to_array(),
            light_position: ubo.light_position.truncate().to_array(),
            light_color: ubo.light_color.to_array(),
        }
    }
}

impl LightingConfig {
    pub fn global_ubo(&self, projection_view: Mat4) -> GlobalUbo {
        GlobalUbo {
            projection_view,
            ambient_light_color: Vec4::from_array(self.ambient),
            light_position: Vec3::from_array(self.light_position).extend(1.0),
            light_color: Vec4::from_array(self.light_color),
        }
    }
}

/// Compiled SPIR-V locations, relative to `directory`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
    pub lit_vertex: String,
    pub lit_fragment: String,
    pub flat_vertex: String,
    pub flat_fragment: String,
    /// Rebuild pipelines when a .spv file in `directory` changes
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders"),
            lit_vertex: "simple_shader.vert.spv".to_string(),
            lit_fragment: "simple_shader.frag.spv".to_string(),
            flat_vertex: "flat_shader.vert.spv".to_string(),
            flat_fragment: "flat_shader.frag.spv".to_string(),
            hot_reload: false,
        }
    }
}

impl ShaderConfig {
    pub fn paths(&self, mode: RenderMode) -> ShaderPaths {
        let (vertex, fragment) = match mode {
            RenderMode::Lit => (&self.lit_vertex, &self.lit_fragment),
            RenderMode::Flat => (&self.flat_vertex, &self.flat_fragment),
        };
        ShaderPaths {
            vertex: self.directory.join(vertex),
            fragment: self.directory.join(fragment),
        }
    }
}

/// Which render system variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Global uniform buffer at set 0, point light + ambient
    #[default]
    Lit,
    /// Push constants only, vertex color
    Flat,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SceneConfig {
    pub render_mode: RenderMode,
    /// Extra OBJ model placed in front of the cubes
    pub model_path: Option<PathBuf>,
}

impl Config {
    /// Load `config.toml`, see [`Config::load_or_default`]
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    /// Defaults plus the load error when the file is unreadable or invalid
    ///
    /// Runs before the logger exists, so the error is handed back for the
    /// caller to report once logging is up.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path; a missing file gives defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.frames_in_flight(), 2);
        assert_eq!(config.scene.render_mode, RenderMode::Lit);
        assert!(config.scene.model_path.is_none());
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 800

            [graphics]
            present_mode = "Mailbox"
            wireframe = true

            [scene]
            render_mode = "flat"
            model_path = "models/smooth_vase.obj"
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.polygon_mode(true), vk::PolygonMode::LINE);
        assert_eq!(config.scene.render_mode, RenderMode::Flat);
        assert_eq!(
            config.scene.model_path.as_deref(),
            Some(Path::new("models/smooth_vase.obj"))
        );
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml_str("[graphics]\npresent_mode = \"vsync-ish\"\n").unwrap();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0\n").unwrap();
        assert_eq!(config.graphics.frames_in_flight(), 1);
    }

    #[test]
    fn wireframe_falls_back_to_fill_without_device_support() {
        let config = Config::from_toml_str("[graphics]\nwireframe = true\n").unwrap();
        assert_eq!(config.graphics.polygon_mode(false), vk::PolygonMode::FILL);
        let config = Config::default();
        assert_eq!(config.graphics.polygon_mode(true), vk::PolygonMode::FILL);
    }

    #[test]
    fn invalid_file_gives_defaults_and_the_error() {
        let path = std::env::temp_dir()
            .join(format!("simple-render-system-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1280);
        let message = format!("{:#}", error.expect("parse error should be reported"));
        assert!(message.contains("Failed to parse config file"), "{}", message);
    }

    #[test]
    fn missing_file_gives_defaults_without_error() {
        let path = std::env::temp_dir().join("simple-render-system-does-not-exist.toml");
        let (config, error) = Config::load_or_default(&path);
        assert!(error.is_none());
        assert_eq!(config.graphics.frames_in_flight(), 2);
    }

    #[test]
    fn bad_render_mode_is_a_parse_error() {
        assert!(Config::from_toml_str("[scene]\nrender_mode = \"raytraced\"\n").is_err());
    }

    #[test]
    fn shader_paths_join_directory() {
        let shaders = ShaderConfig {
            directory: PathBuf::from("build/spv"),
            ..Default::default()
        };
        let flat = shaders.paths(RenderMode::Flat);
        assert_eq!(flat.vertex, PathBuf::from("build/spv/flat_shader.vert.spv"));
        assert_eq!(flat.fragment, PathBuf::from("build/spv/flat_shader.frag.spv"));
        let lit = shaders.paths(RenderMode::Lit);
        assert_eq!(lit.vertex, PathBuf::from("build/spv/simple_shader.vert.spv"));
    }

    #[test]
    fn lighting_defaults_match_uniform_defaults() {
        let lighting = LightingConfig::default();
        assert_eq!(lighting.ambient, [1.0, 1.0, 1.0, 0.02]);
        assert_eq!(lighting.light_position, [-1.0, -1.0, -1.0]);
        assert_eq!(lighting.global_ubo(Mat4::IDENTITY), GlobalUbo::default());
    }
}
