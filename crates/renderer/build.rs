use std::{env, fs, path::Path};

use anyhow::{Context, Result, anyhow};
use naga::{
    ShaderStage,
    back::spv,
    front::glsl::{Frontend, Options},
    valid::{Capabilities, ValidationFlags, Validator},
};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=shaders");

    compile_shaders()
}

/// Compiles every `.vert`/`.frag` under `shaders/` to `$OUT_DIR/<name>.spv`,
/// e.g. `triangle.vert` becomes `triangle.vert.spv`.
fn compile_shaders() -> Result<()> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let out_dir = env::var("OUT_DIR")?;
    let shaders_in_dir = Path::new(&manifest_dir).join("shaders");

    for entry in fs::read_dir(&shaders_in_dir)? {
        let path = entry?.path();
        println!("cargo:rerun-if-changed={}", path.display());

        let shader_stage = match path.extension().and_then(|ext| ext.to_str()) {
            Some("vert") => ShaderStage::Vertex,
            Some("frag") => ShaderStage::Fragment,
            _ => continue,
        };

        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read shader {}", path.display()))?;

        let mut frontend = Frontend::default();
        let module = frontend
            .parse(&Options::from(shader_stage), &source)
            .map_err(|e| anyhow!("Failed to parse {}: {:?}", path.display(), e))?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let info = validator
            .validate(&module)
            .map_err(|e| anyhow!("Failed to validate {}: {:?}", path.display(), e))?;

        // GLSL sources already use Vulkan clip space.
        let mut options = spv::Options::default();
        options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);

        let words = spv::write_vec(&module, &info, &options, None)
            .map_err(|e| anyhow!("Failed to emit SPIR-V for {}: {:?}", path.display(), e))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Shader file name is not valid UTF-8: {:?}", path))?;
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        fs::write(Path::new(&out_dir).join(format!("{file_name}.spv")), bytes)?;
    }

    Ok(())
}
