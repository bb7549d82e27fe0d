//! Triangle shaders.
//!
//! The GLSL sources under `shaders/` are compiled to SPIR-V by the build
//! script and embedded here. Setting `render.shader_dir` swaps in
//! `triangle.vert.spv` / `triangle.frag.spv` from disk instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use viewer_rhi::RhiResult;
use viewer_rhi::device::Device;
use viewer_rhi::shader::{Shader, ShaderStage};

/// Embedded vertex stage.
pub const TRIANGLE_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));

/// Embedded fragment stage.
pub const TRIANGLE_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

pub const ENTRY_POINT: &str = "main";

/// Vertex and fragment modules for the triangle pipeline.
///
/// Modules are kept alive across swapchain rebuilds so the pipeline can be
/// recreated without reloading bytecode.
pub struct ShaderSet {
    pub vertex: Shader,
    pub fragment: Shader,
}

impl ShaderSet {
    /// Embedded shaders, or the pair found in `shader_dir` when given.
    pub fn load(device: Arc<Device>, shader_dir: Option<&Path>) -> RhiResult<Self> {
        match shader_dir {
            Some(dir) => {
                let (vert_path, frag_path) = shader_paths(dir);
                info!("Loading shaders from {}", dir.display());
                Ok(Self {
                    vertex: Shader::from_spirv_file(
                        device.clone(),
                        &vert_path,
                        ShaderStage::Vertex,
                        ENTRY_POINT,
                    )?,
                    fragment: Shader::from_spirv_file(
                        device,
                        &frag_path,
                        ShaderStage::Fragment,
                        ENTRY_POINT,
                    )?,
                })
            }
            None => Ok(Self {
                vertex: Shader::from_spirv_bytes(
                    device.clone(),
                    TRIANGLE_VERT_SPV,
                    ShaderStage::Vertex,
                    ENTRY_POINT,
                )?,
                fragment: Shader::from_spirv_bytes(
                    device,
                    TRIANGLE_FRAG_SPV,
                    ShaderStage::Fragment,
                    ENTRY_POINT,
                )?,
            }),
        }
    }
}

/// `(vertex, fragment)` SPIR-V paths inside an override directory.
pub fn shader_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join("triangle.vert.spv"), dir.join("triangle.frag.spv"))
}
