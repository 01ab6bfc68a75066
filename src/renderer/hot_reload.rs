use std::fs;
use std::path::Path;
use color_eyre::{Report, Result};
use crate::renderer::config::ResourcePaths;
use crate::renderer::error::AssetError;
use crate::renderer::image_loader::{DecodedImage, ImageDecoder};
use crate::renderer::resources::shader::{ShaderBytecode, ShaderStage};
use crate::renderer::shader_compiler::ShaderCompiler;

/// GPU-side operations a reload needs. Errors returned from these are fatal, except
/// from [`ReloadBackend::rebuild_pipeline`], which must keep the previous pipeline on failure.
pub trait ReloadBackend {
    fn wait_idle(&mut self) -> Result<()>;
    fn replace_channel(&mut self, channel: usize, image: &DecodedImage) -> Result<()>;
    fn rebuild_image_set(&mut self) -> Result<()>;
    fn rebuild_pipeline(&mut self, bytecode: &ShaderBytecode) -> Result<()>;
}

/// What a reload pass changed, plus the asset failures it skipped over.
#[derive(Debug, Default)]
pub struct ReloadOutcome {
    pub channels_reloaded: Vec<usize>,
    pub image_set_rebuilt: bool,
    pub pipeline_rebuilt: bool,
    pub failures: Vec<Report>,
}

/// Turns changed filenames into targeted GPU rebuilds
pub struct HotReloadCoordinator {
    paths: ResourcePaths,
    decoder: Box<dyn ImageDecoder>,
    compiler: Box<dyn ShaderCompiler>,
}

impl HotReloadCoordinator {
    pub fn new(
        paths: ResourcePaths,
        decoder: Box<dyn ImageDecoder>,
        compiler: Box<dyn ShaderCompiler>,
    ) -> Self {
        Self {
            paths,
            decoder,
            compiler,
        }
    }

    pub fn paths(&self) -> &ResourcePaths {
        &self.paths
    }

    pub fn decoder(&self) -> &dyn ImageDecoder {
        self.decoder.as_ref()
    }

    /// Reloads each channel named in `changed`, then rebuilds the channel descriptor set
    /// once if any channel was replaced. Unreadable images leave their channel as it was.
    pub fn on_image_changes(
        &self,
        changed: &[String],
        backend: &mut dyn ReloadBackend,
    ) -> Result<ReloadOutcome> {
        let mut outcome = ReloadOutcome::default();

        let mut channels: Vec<(usize, &str)> = changed
            .iter()
            .filter_map(|name| ResourcePaths::channel_for_file(name).map(|c| (c, name.as_str())))
            .collect();
        channels.sort_by_key(|(channel, _)| *channel);
        channels.dedup_by_key(|(channel, _)| *channel);
        if channels.is_empty() {
            return Ok(outcome);
        }

        backend.wait_idle()?;

        for (channel, name) in channels {
            let path = self.paths.texture(name);
            match self.decoder.load(&path) {
                Ok(image) => {
                    backend.replace_channel(channel, &image)?;
                    log::info!(
                        "Reloaded channel {channel} from {} ({}x{})",
                        path.display(),
                        image.width,
                        image.height,
                    );
                    outcome.channels_reloaded.push(channel);
                }
                Err(err) => {
                    log::warn!("Channel {channel} not reloaded: {err}");
                    outcome.failures.push(err.into());
                }
            }
        }

        if !outcome.channels_reloaded.is_empty() {
            backend.rebuild_image_set()?;
            outcome.image_set_rebuilt = true;
        }

        Ok(outcome)
    }

    /// Recompiles both stages from source when any watched shader changed and rebuilds the
    /// pipeline once, only if both compiled.
    pub fn on_shader_changes(
        &self,
        changed: &[String],
        backend: &mut dyn ReloadBackend,
    ) -> Result<ReloadOutcome> {
        let mut outcome = ReloadOutcome::default();

        let watched = ResourcePaths::shader_watch_list();
        if !changed.iter().any(|name| watched.contains(name)) {
            return Ok(outcome);
        }

        backend.wait_idle()?;

        let bytecode = match self.compile_sources() {
            Ok(bytecode) => bytecode,
            Err(err) => {
                log::error!("Shader reload skipped, keeping the running pipeline: {err}");
                outcome.failures.push(err.into());
                return Ok(outcome);
            }
        };

        match backend.rebuild_pipeline(&bytecode) {
            Ok(()) => outcome.pipeline_rebuilt = true,
            Err(err) => {
                log::error!("Pipeline rebuild failed, keeping the running pipeline: {err:#}");
                outcome.failures.push(err);
            }
        }

        Ok(outcome)
    }

    /// Compiles `toy.vert` and `toy.frag` from the shader directory.
    pub fn compile_sources(&self) -> Result<ShaderBytecode, AssetError> {
        Ok(ShaderBytecode {
            vertex: self.compile_stage(ShaderStage::Vertex)?,
            fragment: self.compile_stage(ShaderStage::Fragment)?,
        })
    }

    fn compile_stage(&self, stage: ShaderStage) -> Result<Vec<u32>, AssetError> {
        let path = self.paths.shader_source(stage);
        let source = read_source(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stage.to_string());
        self.compiler.compile(&source, stage, &name)
    }
}

fn read_source(path: &Path) -> Result<String, AssetError> {
    fs::read_to_string(path).map_err(|source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;
    use color_eyre::eyre::eyre;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        WaitIdle,
        ReplaceChannel(usize, u32, u32),
        RebuildImageSet,
        RebuildPipeline,
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        fail_pipeline: bool,
    }

    impl ReloadBackend for MockBackend {
        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn replace_channel(&mut self, channel: usize, image: &DecodedImage) -> Result<()> {
            self.calls.push(Call::ReplaceChannel(channel, image.width, image.height));
            Ok(())
        }

        fn rebuild_image_set(&mut self) -> Result<()> {
            self.calls.push(Call::RebuildImageSet);
            Ok(())
        }

        fn rebuild_pipeline(&mut self, _bytecode: &ShaderBytecode) -> Result<()> {
            self.calls.push(Call::RebuildPipeline);
            if self.fail_pipeline {
                return Err(eyre!("pipeline creation failed"));
            }
            Ok(())
        }
    }

    /// Serves images by filename from memory.
    struct MockDecoder(HashMap<String, (u32, u32)>);

    impl ImageDecoder for MockDecoder {
        fn load(&self, path: &Path) -> Result<DecodedImage, AssetError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            match self.0.get(&name) {
                Some(&(width, height)) => Ok(DecodedImage {
                    pixels: vec![0; (width * height * 4) as usize],
                    width,
                    height,
                }),
                None => Err(AssetError::ImageNotFound(path.to_path_buf())),
            }
        }
    }

    /// Fails any source containing `broken`; counts invocations.
    struct MockCompiler(Rc<RefCell<Vec<ShaderStage>>>);

    impl ShaderCompiler for MockCompiler {
        fn compile(&self, source: &str, stage: ShaderStage, _name: &str) -> Result<Vec<u32>, AssetError> {
            self.0.borrow_mut().push(stage);
            if source.contains("broken") {
                return Err(AssetError::ShaderCompile {
                    stage,
                    log: "syntax error".into(),
                });
            }
            Ok(vec![0x0723_0203])
        }
    }

    fn coordinator(
        shader_dir: PathBuf,
        images: &[(&str, (u32, u32))],
    ) -> (HotReloadCoordinator, Rc<RefCell<Vec<ShaderStage>>>) {
        let compiled = Rc::new(RefCell::new(Vec::new()));
        let paths = ResourcePaths {
            shader_dir,
            texture_dir: PathBuf::from("textures"),
        };
        let decoder = MockDecoder(
            images.iter().map(|(name, size)| (name.to_string(), *size)).collect(),
        );
        let coordinator = HotReloadCoordinator::new(
            paths,
            Box::new(decoder),
            Box::new(MockCompiler(compiled.clone())),
        );
        (coordinator, compiled)
    }

    fn write_shaders(dir: &Path, vert: &str, frag: &str) {
        fs::write(dir.join("toy.vert"), vert).unwrap();
        fs::write(dir.join("toy.frag"), frag).unwrap();
    }

    #[test]
    fn single_channel_change_reloads_only_that_channel() {
        let (coordinator, _) = coordinator(PathBuf::from("shaders"), &[("channel0.png", (64, 32))]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_image_changes(&["channel0.png".to_string()], &mut backend)
            .unwrap();

        assert_eq!(outcome.channels_reloaded, vec![0]);
        assert!(outcome.image_set_rebuilt);
        assert_eq!(
            backend.calls,
            vec![Call::WaitIdle, Call::ReplaceChannel(0, 64, 32), Call::RebuildImageSet]
        );
    }

    #[test]
    fn channel_matching_ignores_extension() {
        let (coordinator, _) = coordinator(PathBuf::from("shaders"), &[("channel3.jpg", (8, 8))]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_image_changes(&["channel3.jpg".to_string(), "notes.txt".to_string()], &mut backend)
            .unwrap();

        assert_eq!(outcome.channels_reloaded, vec![3]);
    }

    #[test]
    fn missing_image_keeps_channel_and_skips_set_rebuild() {
        let (coordinator, _) = coordinator(PathBuf::from("shaders"), &[]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_image_changes(&["channel1.png".to_string()], &mut backend)
            .unwrap();

        assert!(outcome.channels_reloaded.is_empty());
        assert!(!outcome.image_set_rebuilt);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].downcast_ref::<AssetError>(),
            Some(AssetError::ImageNotFound(_))
        ));
        assert_eq!(backend.calls, vec![Call::WaitIdle]);
    }

    #[test]
    fn unrelated_files_do_not_touch_the_gpu() {
        let (coordinator, _) = coordinator(PathBuf::from("shaders"), &[]);
        let mut backend = MockBackend::default();

        coordinator.on_image_changes(&["readme.md".to_string()], &mut backend).unwrap();
        coordinator.on_shader_changes(&["toy.frag.spv".to_string()], &mut backend).unwrap();

        assert!(backend.calls.is_empty());
    }

    #[test]
    fn two_shader_changes_rebuild_once() {
        let dir = tempfile::tempdir().unwrap();
        write_shaders(dir.path(), "void main() {}", "void main() {}");
        let (coordinator, compiled) = coordinator(dir.path().to_path_buf(), &[]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_shader_changes(&["toy.vert".to_string(), "toy.frag".to_string()], &mut backend)
            .unwrap();

        assert!(outcome.pipeline_rebuilt);
        assert_eq!(backend.calls, vec![Call::WaitIdle, Call::RebuildPipeline]);
        assert_eq!(*compiled.borrow(), vec![ShaderStage::Vertex, ShaderStage::Fragment]);
    }

    #[test]
    fn compile_failure_leaves_pipeline_alone() {
        let dir = tempfile::tempdir().unwrap();
        write_shaders(dir.path(), "void main() {}", "broken");
        let (coordinator, _) = coordinator(dir.path().to_path_buf(), &[]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_shader_changes(&["toy.frag".to_string()], &mut backend)
            .unwrap();

        assert!(!outcome.pipeline_rebuilt);
        assert!(!backend.calls.contains(&Call::RebuildPipeline));
        assert!(matches!(
            outcome.failures[0].downcast_ref::<AssetError>(),
            Some(AssetError::ShaderCompile { stage: ShaderStage::Fragment, .. })
        ));
    }

    #[test]
    fn failed_pipeline_build_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_shaders(dir.path(), "void main() {}", "void main() {}");
        let (coordinator, _) = coordinator(dir.path().to_path_buf(), &[]);
        let mut backend = MockBackend {
            fail_pipeline: true,
            ..Default::default()
        };

        let outcome = coordinator
            .on_shader_changes(&["toy.vert".to_string()], &mut backend)
            .unwrap();

        assert!(!outcome.pipeline_rebuilt);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[test]
    fn missing_source_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, compiled) = coordinator(dir.path().to_path_buf(), &[]);
        let mut backend = MockBackend::default();

        let outcome = coordinator
            .on_shader_changes(&["toy.vert".to_string()], &mut backend)
            .unwrap();

        assert!(compiled.borrow().is_empty());
        assert!(matches!(
            outcome.failures[0].downcast_ref::<AssetError>(),
            Some(AssetError::Read { .. })
        ));
    }
}
