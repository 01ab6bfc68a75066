use crate::renderer::error::AssetError;
use crate::renderer::resources::shader::ShaderStage;

/// Turns GLSL source text into SPIR-V words.
pub trait ShaderCompiler {
    fn compile(&self, source: &str, stage: ShaderStage, name: &str) -> Result<Vec<u32>, AssetError>;
}

/// Runtime GLSL compiler targeting Vulkan, entry point `main`.
#[derive(Default)]
pub struct GlslCompiler;

#[cfg(feature = "shaderc")]
impl ShaderCompiler for GlslCompiler {
    fn compile(&self, source: &str, stage: ShaderStage, name: &str) -> Result<Vec<u32>, AssetError> {
        let compiler = shaderc::Compiler::new().ok_or(AssetError::CompilerUnavailable)?;
        let mut options = shaderc::CompileOptions::new().ok_or(AssetError::CompilerUnavailable)?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );

        let kind = match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        };

        let artifact = compiler
            .compile_into_spirv(source, kind, name, "main", Some(&options))
            .map_err(|e| AssetError::ShaderCompile {
                stage,
                log: e.to_string(),
            })?;

        if artifact.get_num_warnings() > 0 {
            log::warn!("{}: {}", name, artifact.get_warning_messages());
        }

        Ok(artifact.as_binary().to_vec())
    }
}

#[cfg(not(feature = "shaderc"))]
impl ShaderCompiler for GlslCompiler {
    fn compile(&self, _source: &str, _stage: ShaderStage, _name: &str) -> Result<Vec<u32>, AssetError> {
        Err(AssetError::CompilerUnavailable)
    }
}

#[cfg(all(test, feature = "shaderc"))]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn compiles_fullscreen_vertex_shader() {
        let source = r#"
            #version 450
            void main() {
                vec2 uv = vec2((gl_VertexIndex << 1) & 2, gl_VertexIndex & 2);
                gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
            }
        "#;
        let words = GlslCompiler.compile(source, ShaderStage::Vertex, "toy.vert").unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn bundled_toy_shaders_compile() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
        for (file, stage) in [("toy.vert", ShaderStage::Vertex), ("toy.frag", ShaderStage::Fragment)] {
            let source = std::fs::read_to_string(dir.join(file)).unwrap();
            let words = GlslCompiler.compile(&source, stage, file).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn reports_compile_log_on_failure() {
        let source = "#version 450\nvoid main() { this is not glsl }\n";
        let err = GlslCompiler
            .compile(source, ShaderStage::Fragment, "toy.frag")
            .unwrap_err();
        match err {
            AssetError::ShaderCompile { stage, log } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
