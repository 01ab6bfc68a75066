use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::error::AssetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// SPIR-V words for both stages of the toy pipeline.
#[derive(Debug, Clone)]
pub struct ShaderBytecode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBytecode {
    /// Reads precompiled `.spv` files.
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self, AssetError> {
        Ok(Self {
            vertex: read_spirv(vertex)?,
            fragment: read_spirv(fragment)?,
        })
    }
}

/// Vertex and fragment shader modules of the toy pipeline
pub struct GraphicsShader {
    pub vert_mod: vk::ShaderModule,
    pub frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    pub fn new(bytecode: &ShaderBytecode, device: Arc<ash::Device>) -> Result<Self> {
        let vert_mod = create_shader_module(&bytecode.vertex, &device)?;
        let frag_mod = match create_shader_module(&bytecode.fragment, &device) {
            Ok(module) => module,
            Err(err) => {
                unsafe { device.destroy_shader_module(vert_mod, None) };
                return Err(err);
            }
        };
        Ok(Self { vert_mod, frag_mod, device })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

fn read_spirv(path: &Path) -> Result<Vec<u32>, AssetError> {
    let read_err = |source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(read_err)?;
    ash::util::read_spv(&mut file).map_err(read_err)
}

fn create_shader_module(code: &[u32], device: &ash::Device) -> Result<vk::ShaderModule> {
    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_spirv_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toy.vert.spv");
        let words: [u32; 3] = [0x0723_0203, 0x0001_0000, 42];
        File::create(&path)
            .unwrap()
            .write_all(bytemuck::cast_slice(&words))
            .unwrap();

        assert_eq!(read_spirv(&path).unwrap(), words);
    }

    #[test]
    fn missing_spirv_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_spirv(&dir.path().join("absent.spv")).unwrap_err();
        assert!(matches!(err, AssetError::Read { .. }));
    }

    #[test]
    fn stage_flags() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }
}
