use crate::{
    basic::format::GfxFormat,
    resources::handles::{GfxGpuAddress, GfxResourceHandle},
};

/// 一组三角形
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxRaytracingGeometryDesc {
    pub vertex_buffer: GfxGpuAddress,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub vertex_format: GfxFormat,
    pub index_buffer: GfxGpuAddress,
    pub index_count: u32,
    pub index_format: GfxFormat,
    pub opaque: bool,
}

impl GfxRaytracingGeometryDesc {
    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct GfxAccelerationStructureBuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        const ALLOW_UPDATE = 1 << 2;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxAccelerationStructureInputs {
    BottomLevel {
        geometries: Vec<GfxRaytracingGeometryDesc>,
        flags: GfxAccelerationStructureBuildFlags,
    },
    TopLevel {
        instance_count: u32,
        /// 实例数组（[`crate::raytracing::instance::GfxRaytracingInstance`]）的地址
        instances: GfxGpuAddress,
        flags: GfxAccelerationStructureBuildFlags,
    },
}

impl GfxAccelerationStructureInputs {
    #[inline]
    pub fn level_name(&self) -> &'static str {
        match self {
            GfxAccelerationStructureInputs::BottomLevel { .. } => "bottom-level",
            GfxAccelerationStructureInputs::TopLevel { .. } => "top-level",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GfxPrebuildInfo {
    pub result_data_max_size: u64,
    pub scratch_data_size: u64,
}

impl GfxPrebuildInfo {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.result_data_max_size == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxBuildAccelerationStructureDesc {
    pub inputs: GfxAccelerationStructureInputs,
    /// 以 RaytracingAccelerationStructure 状态创建的 buffer
    pub dest: GfxResourceHandle,
    pub scratch: GfxGpuAddress,
}
