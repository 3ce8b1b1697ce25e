use radiance_gfx::{
    GfxResult,
    device::GfxPipelineLibrary,
    pipelines::root_signature::{GfxDescriptorRangeType, GfxRootSignatureDesc, GfxStaticSampler},
    resources::handles::GfxRootSignatureHandle,
};

use crate::render_settings::RenderSettings;

/// 公共 root signature 中 constant buffer 的数量
pub const COMMON_CB_COUNT: u32 = 4;
/// 纹理 SRV table 的 root parameter 序号
pub const SRV_TABLE_INDEX: u32 = COMMON_CB_COUNT;
/// UAV table 的 root parameter 序号
pub const UAV_TABLE_INDEX: u32 = COMMON_CB_COUNT + 1;

/// 第 `i` 个 constant buffer 的 root parameter 序号，对应 shader 中的 `b{i}`
#[inline]
pub const fn cb_root_param_index(i: u32) -> u32 {
    i
}

/// `[CBV b0..b3, SRV table t0, UAV table u0]` 以及一个 linear-wrap 的 static sampler
pub fn common_root_signature_desc(settings: &RenderSettings) -> GfxRootSignatureDesc {
    let mut desc = GfxRootSignatureDesc::new();
    for i in 0..COMMON_CB_COUNT {
        desc = desc.cbv(i);
    }
    desc.table(GfxDescriptorRangeType::Srv, settings.max_textures, 0)
        .table(GfxDescriptorRangeType::Uav, settings.max_uav_textures, 0)
        .static_sampler(GfxStaticSampler::linear_wrap(0))
}

pub fn create_common_root_signature(
    pipelines: &dyn GfxPipelineLibrary,
    settings: &RenderSettings,
) -> GfxResult<GfxRootSignatureHandle> {
    pipelines.create_root_signature(&common_root_signature_desc(settings), "CommonRootSignature")
}

#[cfg(test)]
mod tests {
    use radiance_gfx::pipelines::root_signature::GfxRootParameter;

    use super::*;

    #[test]
    fn test_common_layout() {
        let settings = RenderSettings::default();
        let desc = common_root_signature_desc(&settings);
        assert_eq!(desc.parameters.len(), 6);
        assert_eq!(
            desc.parameters[cb_root_param_index(0) as usize],
            GfxRootParameter::ConstantBufferView { shader_register: 0 }
        );
        assert_eq!(
            desc.parameters[UAV_TABLE_INDEX as usize],
            GfxRootParameter::DescriptorTable {
                range_type: GfxDescriptorRangeType::Uav,
                num_descriptors: settings.max_uav_textures,
                base_shader_register: 0,
            }
        );
        assert_eq!(desc.static_samplers.len(), 1);
    }
}
