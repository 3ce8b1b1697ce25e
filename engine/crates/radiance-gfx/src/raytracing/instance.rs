use bytemuck::{Pod, Zeroable};

/// 硬件要求的 TLAS 实例布局，共 64 字节
///
/// transform 为行主序的 3x4 矩阵
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GfxRaytracingInstance {
    pub transform: [[f32; 4]; 3],
    /// 低 24 位为 instance id，高 8 位为 mask
    pub instance_id_and_mask: u32,
    /// 低 24 位为 hit group 偏移，高 8 位为 flags
    pub hit_group_offset_and_flags: u32,
    pub acceleration_structure: u64,
}

const LOW_24_BITS: u32 = 0x00FF_FFFF;

impl GfxRaytracingInstance {
    pub fn new(
        transform: glam::Mat4,
        instance_id: u32,
        mask: u8,
        hit_group_offset: u32,
        flags: u8,
        acceleration_structure: u64,
    ) -> Self {
        // glam 为列主序，转置后取前三行
        let rows = transform.transpose().to_cols_array_2d();
        Self {
            transform: [rows[0], rows[1], rows[2]],
            instance_id_and_mask: (instance_id & LOW_24_BITS) | ((mask as u32) << 24),
            hit_group_offset_and_flags: (hit_group_offset & LOW_24_BITS) | ((flags as u32) << 24),
            acceleration_structure,
        }
    }

    /// 单位变换、mask 0xFF、id 0
    pub fn identity(acceleration_structure: u64) -> Self {
        Self::new(glam::Mat4::IDENTITY, 0, 0xFF, 0, 0, acceleration_structure)
    }

    #[inline]
    pub fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & LOW_24_BITS
    }

    #[inline]
    pub fn mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_layout_is_64_bytes() {
        assert_eq!(std::mem::size_of::<GfxRaytracingInstance>(), 64);
    }

    #[test]
    fn test_identity_instance() {
        let instance = GfxRaytracingInstance::identity(0xABCD_0000);
        assert_eq!(
            instance.transform,
            [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]]
        );
        assert_eq!(instance.mask(), 0xFF);
        assert_eq!(instance.instance_id(), 0);
        assert_eq!(instance.acceleration_structure, 0xABCD_0000);
    }

    #[test]
    fn test_translation_lands_in_last_column() {
        let instance =
            GfxRaytracingInstance::new(glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)), 7, 0x0F, 0, 0, 0);
        assert_eq!(instance.transform[0][3], 1.0);
        assert_eq!(instance.transform[1][3], 2.0);
        assert_eq!(instance.transform[2][3], 3.0);
        assert_eq!(instance.instance_id(), 7);
        assert_eq!(instance.mask(), 0x0F);
    }
}
