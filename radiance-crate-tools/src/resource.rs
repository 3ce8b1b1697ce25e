use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let hdr = RadiancePath::assets_path("textures/colorful_studio_4k.hdr"); // assets/textures/...
/// let shader = RadiancePath::shader_build_path("MipGenerator.comp");      // shader/.build/MipGenerator.comp.spv
/// ```
pub struct RadiancePath {}
impl RadiancePath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // radiance-crate-tools 位于工作区根目录下
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| manifest_dir.to_path_buf())
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: impl AsRef<Path>) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 获取 `shader/.build/` 目录下编译后的 SPIR-V 路径
    pub fn shader_build_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("shader").join(".build").join(format!("{filename}.spv"))
    }

    /// 相对路径基于工作区根目录解析，绝对路径原样返回
    pub fn resolve(path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() { path.to_path_buf() } else { Self::workspace_path().join(path) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path_appends_spv() {
        let path = RadiancePath::shader_build_path("MipGenerator.comp");
        assert!(path.ends_with("shader/.build/MipGenerator.comp.spv"));
    }

    #[test]
    fn test_resolve_keeps_absolute_path() {
        let abs = std::env::temp_dir().join("radiance.toml");
        assert_eq!(RadiancePath::resolve(&abs), abs);
        assert!(RadiancePath::resolve("radiance.toml").starts_with(RadiancePath::workspace_path()));
    }
}
