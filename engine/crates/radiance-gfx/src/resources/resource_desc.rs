use crate::basic::format::GfxFormat;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct GfxResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 1 << 0;
        const ALLOW_UNORDERED_ACCESS = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceDimension {
    Buffer,
    Texture2D,
}

/// 资源所在的内存类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxHeapType {
    /// GPU 本地内存
    Default,
    /// CPU 可写，持久映射
    Upload,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxClearValue {
    pub format: GfxFormat,
    pub color: [f32; 4],
}

/// 资源描述
///
/// 对于 buffer，`width` 是字节数，其余字段为 1；
/// 对于 texture，`depth_or_array_size` 是 array layer 数量
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxResourceDesc {
    pub dimension: GfxResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: GfxFormat,
    pub flags: GfxResourceFlags,
}

// new & init
impl GfxResourceDesc {
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: GfxResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: GfxFormat::Unknown,
            flags: GfxResourceFlags::empty(),
        }
    }

    pub fn texture_2d(width: u32, height: u32, format: GfxFormat, mip_levels: u16) -> Self {
        Self {
            dimension: GfxResourceDimension::Texture2D,
            width: width as u64,
            height,
            depth_or_array_size: 1,
            mip_levels: mip_levels.max(1),
            format,
            flags: GfxResourceFlags::empty(),
        }
    }

    #[inline]
    pub fn with_array_size(mut self, array_size: u16) -> Self {
        self.depth_or_array_size = array_size;
        self
    }

    #[inline]
    pub fn with_flags(mut self, flags: GfxResourceFlags) -> Self {
        self.flags |= flags;
        self
    }
}

// getters
impl GfxResourceDesc {
    #[inline]
    pub fn is_buffer(&self) -> bool {
        self.dimension == GfxResourceDimension::Buffer
    }

    /// 六个面、正方形：可以作为 cubemap 使用
    #[inline]
    pub fn is_cube_compatible(&self) -> bool {
        !self.is_buffer() && self.depth_or_array_size % 6 == 0 && self.width == self.height as u64
    }

    /// 第 `level` 级 mip 的尺寸，每一维最小为 1
    #[inline]
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        let width = (self.width as u32).checked_shr(level).unwrap_or(0).max(1);
        let height = self.height.checked_shr(level).unwrap_or(0).max(1);
        (width, height)
    }

    /// mip 0 单个 array slice 的紧凑行字节数
    #[inline]
    pub fn row_pitch(&self) -> u32 {
        self.width as u32 * self.format.pixel_size()
    }
}

// tools
impl GfxResourceDesc {
    /// 完整 mip 链的级数：`floor(log2(max(w, h))) + 1`
    pub fn full_mip_count(width: u32, height: u32) -> u16 {
        let max = width.max(height).max(1);
        (u32::BITS - max.leading_zeros()) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_count() {
        assert_eq!(GfxResourceDesc::full_mip_count(1, 1), 1);
        assert_eq!(GfxResourceDesc::full_mip_count(4, 4), 3);
        assert_eq!(GfxResourceDesc::full_mip_count(100, 64), 7);
        assert_eq!(GfxResourceDesc::full_mip_count(4096, 2048), 13);
    }

    #[test]
    fn test_mip_extent_floors_at_one() {
        let desc = GfxResourceDesc::texture_2d(100, 4, GfxFormat::R8G8B8A8Unorm, 7);
        assert_eq!(desc.mip_extent(0), (100, 4));
        assert_eq!(desc.mip_extent(1), (50, 2));
        assert_eq!(desc.mip_extent(3), (12, 1));
        assert_eq!(desc.mip_extent(6), (1, 1));
        assert_eq!(desc.mip_extent(40), (1, 1));
    }

    #[test]
    fn test_cube_compatible() {
        let cube = GfxResourceDesc::texture_2d(512, 512, GfxFormat::R32G32B32A32Float, 1).with_array_size(6);
        assert!(cube.is_cube_compatible());
        let rect = GfxResourceDesc::texture_2d(512, 256, GfxFormat::R32G32B32A32Float, 1).with_array_size(6);
        assert!(!rect.is_cube_compatible());
        assert!(!GfxResourceDesc::buffer(64).is_cube_compatible());
    }
}
