//! 抽象类型到 Vulkan 类型的映射

use ash::vk;

use crate::{
    basic::format::GfxFormat,
    pipelines::root_signature::{GfxAddressMode, GfxFilter},
    resources::resource_state::GfxResourceState,
};

pub(crate) fn vk_format(format: GfxFormat) -> vk::Format {
    match format {
        GfxFormat::Unknown => vk::Format::UNDEFINED,
        GfxFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        GfxFormat::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
        GfxFormat::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
        GfxFormat::R32G32B32Float => vk::Format::R32G32B32_SFLOAT,
        GfxFormat::R32Uint => vk::Format::R32_UINT,
        GfxFormat::D32Float => vk::Format::D32_SFLOAT,
    }
}

#[inline]
pub(crate) fn vk_aspect(format: GfxFormat) -> vk::ImageAspectFlags {
    if format.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR }
}

pub(crate) fn vk_filter(filter: GfxFilter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        GfxFilter::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        GfxFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

pub(crate) fn vk_address_mode(mode: GfxAddressMode) -> vk::SamplerAddressMode {
    match mode {
        GfxAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        GfxAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

/// 资源状态对应的 pipeline stage、access mask 以及 image layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct VkResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

const SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
);

// new & 常量定义
impl VkResourceState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 尚未初始化的 image
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const COMMON: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
        vk::ImageLayout::GENERAL,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// compute 与光追 shader
    pub const SHADER_READ_NON_FRAGMENT: Self =
        Self::new(SHADER_STAGES, vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    pub const SHADER_READ_ALL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const STORAGE_READ_WRITE: Self = Self::new(
        SHADER_STAGES,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    pub const COLOR_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const GENERIC_READ: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::MEMORY_READ,
        vk::ImageLayout::GENERAL,
    );

    pub const ACCELERATION_STRUCTURE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR.as_raw()
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw()
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );
}

impl From<GfxResourceState> for VkResourceState {
    fn from(state: GfxResourceState) -> Self {
        match state {
            GfxResourceState::Common => Self::COMMON,
            GfxResourceState::CopyDest => Self::TRANSFER_DST,
            GfxResourceState::CopySource => Self::TRANSFER_SRC,
            GfxResourceState::PixelShaderResource => Self::SHADER_READ_FRAGMENT,
            GfxResourceState::NonPixelShaderResource => Self::SHADER_READ_NON_FRAGMENT,
            GfxResourceState::AllShaderResource => Self::SHADER_READ_ALL,
            GfxResourceState::UnorderedAccess => Self::STORAGE_READ_WRITE,
            GfxResourceState::RenderTarget => Self::COLOR_ATTACHMENT_READ_WRITE,
            GfxResourceState::GenericRead => Self::GENERIC_READ,
            GfxResourceState::RaytracingAccelerationStructure => Self::ACCELERATION_STRUCTURE,
        }
    }
}

// tools
impl VkResourceState {
    /// 用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access
            & !(vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::TRANSFER_READ
                | vk::AccessFlags2::MEMORY_READ
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_layouts() {
        assert_eq!(
            VkResourceState::from(GfxResourceState::CopyDest).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(VkResourceState::from(GfxResourceState::UnorderedAccess).layout, vk::ImageLayout::GENERAL);
        assert_eq!(
            VkResourceState::from(GfxResourceState::NonPixelShaderResource).layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_src_access_drops_reads() {
        let uav = VkResourceState::from(GfxResourceState::UnorderedAccess);
        assert_eq!(uav.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(VkResourceState::from(GfxResourceState::PixelShaderResource).src_access(), vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(vk_format(GfxFormat::R32G32B32A32Float), vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(vk_aspect(GfxFormat::D32Float), vk::ImageAspectFlags::DEPTH);
    }
}
