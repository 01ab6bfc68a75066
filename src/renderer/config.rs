use std::path::PathBuf;
use std::time::Duration;
use clap::{ArgAction, Parser};
use crate::renderer::resources::shader::ShaderStage;

/// Number of frames the CPU may record ahead of the GPU.
pub const BUFFERING_DEPTH: usize = 3;

/// Number of input image channels bound to the toy shader.
pub const CHANNEL_COUNT: usize = 4;

pub const APP_NAME: &str = "vktoy";

/// Contains configuration options for the renderer like the resolution, asset directories and timeouts
#[derive(Debug, Clone, Parser)]
#[command(name = APP_NAME, version, about = "Live preview for full-screen fragment shaders")]
pub struct RenderConfig {
    /// Directory holding toy.vert, toy.frag and their compiled .spv files
    #[arg(long, default_value = "shaders")]
    pub shader_dir: PathBuf,

    /// Directory holding the channel0..channel3 input images
    #[arg(long, default_value = "textures")]
    pub texture_dir: PathBuf,

    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Upper bound on waiting for a frame's fence before the GPU is treated as hung
    #[arg(long, default_value_t = 1000)]
    pub fence_timeout_ms: u64,

    /// Poll interval for asset directories on platforms without change notifications
    #[arg(long, default_value_t = 250)]
    pub watch_interval_ms: u64,

    /// Enable the Khronos validation layer and fail on validation errors
    #[arg(long, default_value_t = cfg!(debug_assertions), action = ArgAction::Set)]
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::parse_from([APP_NAME])
    }
}

impl RenderConfig {
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn paths(&self) -> ResourcePaths {
        ResourcePaths {
            shader_dir: self.shader_dir.clone(),
            texture_dir: self.texture_dir.clone(),
        }
    }
}

/// Fixed asset filenames resolved against the configured directories.
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    pub shader_dir: PathBuf,
    pub texture_dir: PathBuf,
}

impl ResourcePaths {
    pub const CHANNEL_STEMS: [&'static str; CHANNEL_COUNT] =
        ["channel0", "channel1", "channel2", "channel3"];
    pub const CHANNEL_EXTENSION: &'static str = "png";

    pub fn shader_source(&self, stage: ShaderStage) -> PathBuf {
        self.shader_dir.join(Self::source_name(stage))
    }

    pub fn shader_spirv(&self, stage: ShaderStage) -> PathBuf {
        self.shader_dir.join(format!("{}.spv", Self::source_name(stage)))
    }

    /// Startup location of a channel image.
    pub fn channel_image(&self, channel: usize) -> PathBuf {
        self.texture_dir.join(format!(
            "{}.{}",
            Self::CHANNEL_STEMS[channel],
            Self::CHANNEL_EXTENSION
        ))
    }

    pub fn texture(&self, filename: &str) -> PathBuf {
        self.texture_dir.join(filename)
    }

    /// Shader filenames watched for changes, compared with their extension.
    pub fn shader_watch_list() -> Vec<String> {
        [ShaderStage::Vertex, ShaderStage::Fragment]
            .into_iter()
            .map(|stage| Self::source_name(stage).to_owned())
            .collect()
    }

    /// Channel image names watched for changes, compared without their extension.
    pub fn channel_watch_list() -> Vec<String> {
        Self::CHANNEL_STEMS.iter().map(|s| s.to_string()).collect()
    }

    /// Maps a changed filename such as `channel2.jpg` to its channel index.
    pub fn channel_for_file(filename: &str) -> Option<usize> {
        let stem = crop_extension(filename);
        Self::CHANNEL_STEMS.iter().position(|s| *s == stem)
    }

    fn source_name(stage: ShaderStage) -> &'static str {
        match stage {
            ShaderStage::Vertex => "toy.vert",
            ShaderStage::Fragment => "toy.frag",
        }
    }
}

/// Strips everything from the last `.` onwards.
pub fn crop_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) => &filename[..idx],
        None => filename,
    }
}
