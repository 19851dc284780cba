// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Modules are loaded from disk at
// runtime so they can be rebuilt and hot reloaded without recompiling.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words
pub fn parse_spirv(code: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
        .context("SPIR-V byte length is not a multiple of 4")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => anyhow::bail!("Invalid SPIR-V magic number {:#010x}", other),
        None => anyhow::bail!("Empty SPIR-V module"),
    }
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = parse_spirv(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Read a compiled `.spv` file and create a shader module from it
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let code = std::fs::read(path)
        .with_context(|| format!("Failed to read shader file: {:?}", path))?;
    log::debug!("Loaded shader {:?} ({} bytes)", path, code.len());
    create_shader_module(device, &code)
        .with_context(|| format!("Failed to load shader: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_spirv_header() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_module() {
        let bytes = [0x03, 0x02, 0x23];
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_non_spirv_data() {
        let bytes = b"#version 450\n\0\0\0";
        assert!(parse_spirv(bytes).is_err());
        assert!(parse_spirv(&[]).is_err());
    }
}
