use std::path::PathBuf;
use std::time::Duration;
use ash::vk;
use thiserror::Error;
use crate::renderer::resources::shader::ShaderStage;

/// Fatal renderer failures that callers may want to tell apart.
///
/// These travel inside a [`color_eyre::Report`] and can be recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No memory type matches type bits {type_bits:#b} with properties {flags:?}")]
    NoCompatibleMemory {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("Failed to create {kind}: {reason}")]
    ResourceCreationFailed {
        kind: &'static str,
        reason: String,
    },

    #[error("Fence was not signaled within {timeout:?}; the GPU is assumed hung")]
    FenceTimeout { timeout: Duration },

    #[error("Watcher for {} did not stop within {timeout:?}", directory.display())]
    WatcherStopTimeout {
        directory: PathBuf,
        timeout: Duration,
    },

    #[error("Uniform payload of {len} bytes exceeds the {capacity} byte slice")]
    UniformPayloadTooLarge { len: usize, capacity: usize },

    #[error("No physical device found")]
    NoPhysicalDevice,

    #[error("Physical device exposes no graphics queue family")]
    NoGraphicsQueue,

    #[error("Queue family {family} cannot present to the window surface")]
    PresentationUnsupported { family: u32 },

    #[error("Validation layer reported an error: {0}")]
    ValidationFailed(String),
}

impl RenderError {
    /// Maps a failed `vkCreate*` call for use with `map_err`.
    pub fn creation(kind: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
        move |err| RenderError::ResourceCreationFailed {
            kind,
            reason: err.to_string(),
        }
    }
}

/// Recoverable failures while loading assets from disk.
///
/// The hot-reload path logs these and keeps the last good GPU state.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Image file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Failed to decode image {}: {reason}", path.display())]
    ImageDecode { path: PathBuf, reason: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} shader failed to compile:\n{log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("No GLSL compiler is available in this build")]
    CompilerUnavailable,
}
