use std::path::{Path, PathBuf};

use anyhow::Context;
use radiance_crate_tools::resource::RadiancePath;
use serde::{Deserialize, Serialize};

/// 渲染层的配置，可以从 toml 文件中读取，缺省的字段使用默认值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// 共享 SRV heap 的容量
    pub max_textures: u32,
    /// RTV heap 的容量
    pub max_render_targets: u32,
    /// mip 生成器 UAV heap 的容量
    pub max_uav_textures: u32,
    /// 一帧内最多排队的 mip 生成任务数
    pub max_mips_per_frame: u32,
    pub frames_count: u32,

    pub cubemap_size: u32,
    pub irradiance_map_size: u32,
    /// 相对路径基于 assets 目录
    pub environment_map: PathBuf,
    /// 编译后的 SPIR-V 所在目录，相对路径基于工作区根目录
    pub shader_dir: PathBuf,

    pub render_width: u32,
    pub render_height: u32,
    /// tonemapping 的曝光，范围 `[0, 10]`
    pub exposure: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_textures: 128,
            max_render_targets: 16,
            max_uav_textures: 256,
            max_mips_per_frame: 64,
            frames_count: 3,
            cubemap_size: 512,
            irradiance_map_size: 512,
            environment_map: PathBuf::from("textures/colorful_studio_4k.hdr"),
            shader_dir: PathBuf::from("shader/.build"),
            render_width: 1280,
            render_height: 720,
            exposure: 1.0,
        }
    }
}

// new & init
impl RenderSettings {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("failed to read settings {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse settings {}", path.display()))
    }

    /// 文件不存在时使用默认值
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            log::info!("settings {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

// tools
impl RenderSettings {
    /// `name` 不带 `.spv` 后缀，例如 `MipGenerator.comp`
    pub fn shader_path(&self, name: &str) -> PathBuf {
        RadiancePath::resolve(&self.shader_dir).join(format!("{name}.spv"))
    }

    pub fn environment_map_path(&self) -> PathBuf {
        if self.environment_map.is_absolute() {
            self.environment_map.clone()
        } else {
            RadiancePath::assets_path(&self.environment_map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: RenderSettings = toml::from_str("max_textures = 8\ncubemap_size = 64\n").unwrap();
        assert_eq!(settings.max_textures, 8);
        assert_eq!(settings.cubemap_size, 64);
        assert_eq!(settings.max_mips_per_frame, 64);
        assert_eq!(settings.shader_dir, PathBuf::from("shader/.build"));
        assert_eq!(settings.exposure, 1.0);
    }

    #[test]
    fn test_exposure_from_toml() {
        let settings: RenderSettings = toml::from_str("exposure = 2.5").unwrap();
        assert_eq!(settings.exposure, 2.5);
        assert_eq!(settings.render_width, 1280);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let path = std::env::temp_dir().join("radiance-settings-that-does-not-exist.toml");
        assert_eq!(RenderSettings::load_or_default(&path).unwrap(), RenderSettings::default());
    }

    #[test]
    fn test_from_file_reports_parse_error() {
        let path = std::env::temp_dir().join(format!("radiance-settings-{}.toml", std::process::id()));
        std::fs::write(&path, "max_textures = \"many\"").unwrap();
        let err = RenderSettings::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse settings"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_shader_path() {
        let settings = RenderSettings::default();
        assert!(settings.shader_path("MipGenerator.comp").ends_with("shader/.build/MipGenerator.comp.spv"));
    }
}
