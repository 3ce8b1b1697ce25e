/// 与后端无关的像素格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GfxFormat {
    #[default]
    Unknown,
    R8G8B8A8Unorm,
    R16G16B16A16Float,
    R32G32B32A32Float,
    /// 通常只作为顶点位置格式
    R32G32B32Float,
    /// 通常只作为 index 格式
    R32Uint,
    D32Float,
}

impl GfxFormat {
    /// 单个像素（或顶点元素）占用的字节数
    #[inline]
    pub const fn pixel_size(self) -> u32 {
        match self {
            GfxFormat::Unknown => 0,
            GfxFormat::R8G8B8A8Unorm => 4,
            GfxFormat::R16G16B16A16Float => 8,
            GfxFormat::R32G32B32A32Float => 16,
            GfxFormat::R32G32B32Float => 12,
            GfxFormat::R32Uint => 4,
            GfxFormat::D32Float => 4,
        }
    }

    #[inline]
    pub const fn is_depth(self) -> bool {
        matches!(self, GfxFormat::D32Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_size() {
        assert_eq!(GfxFormat::R8G8B8A8Unorm.pixel_size(), 4);
        assert_eq!(GfxFormat::R32G32B32A32Float.pixel_size(), 16);
        assert_eq!(GfxFormat::R32G32B32Float.pixel_size(), 12);
        assert_eq!(GfxFormat::Unknown.pixel_size(), 0);
        assert!(GfxFormat::D32Float.is_depth());
    }
}
