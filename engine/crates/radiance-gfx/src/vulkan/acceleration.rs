use ash::vk;
use itertools::Itertools;

use crate::{
    basic::format::GfxFormat,
    raytracing::acceleration_inputs::{GfxAccelerationStructureBuildFlags, GfxAccelerationStructureInputs},
    vulkan::conv,
};

/// 由抽象输入得到的 Vulkan 几何描述，prebuild 与 build 共用
pub(crate) struct VkAccelerationGeometry {
    ty: vk::AccelerationStructureTypeKHR,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    geometries: Vec<vk::AccelerationStructureGeometryKHR<'static>>,
    pub(crate) ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
}

impl VkAccelerationGeometry {
    pub fn new(inputs: &GfxAccelerationStructureInputs) -> Self {
        match inputs {
            GfxAccelerationStructureInputs::BottomLevel { geometries, flags } => {
                let (geometries, ranges): (Vec<_>, Vec<_>) = geometries
                    .iter()
                    .map(|g| {
                        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                            .vertex_format(conv::vk_format(g.vertex_format))
                            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                                device_address: g.vertex_buffer,
                            })
                            .vertex_stride(g.vertex_stride)
                            .max_vertex(g.vertex_count.saturating_sub(1))
                            .index_type(match g.index_format {
                                GfxFormat::R32Uint => vk::IndexType::UINT32,
                                _ => vk::IndexType::NONE_KHR,
                            })
                            .index_data(vk::DeviceOrHostAddressConstKHR {
                                device_address: g.index_buffer,
                            });
                        let geometry = vk::AccelerationStructureGeometryKHR::default()
                            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                            .flags(if g.opaque {
                                vk::GeometryFlagsKHR::OPAQUE
                            } else {
                                vk::GeometryFlagsKHR::empty()
                            });
                        let range = vk::AccelerationStructureBuildRangeInfoKHR::default()
                            .primitive_count(g.triangle_count());
                        (geometry, range)
                    })
                    .unzip();
                Self {
                    ty: vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    flags: vk_build_flags(*flags),
                    geometries,
                    ranges,
                }
            }
            GfxAccelerationStructureInputs::TopLevel {
                instance_count,
                instances,
                flags,
            } => {
                let geometry = vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR {
                        instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                            .array_of_pointers(false)
                            .data(vk::DeviceOrHostAddressConstKHR {
                                device_address: *instances,
                            }),
                    });
                Self {
                    ty: vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                    flags: vk_build_flags(*flags),
                    geometries: vec![geometry],
                    ranges: vec![vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(*instance_count)],
                }
            }
        }
    }

    /// 每个 geometry 的最大 primitive 数量
    pub fn max_primitive_counts(&self) -> Vec<u32> {
        self.ranges.iter().map(|range| range.primitive_count).collect_vec()
    }

    /// dst 与 scratch 尚未填写
    pub fn build_info(&self) -> vk::AccelerationStructureBuildGeometryInfoKHR<'_> {
        vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(self.ty)
            .flags(self.flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&self.geometries)
    }
}

fn vk_build_flags(flags: GfxAccelerationStructureBuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(GfxAccelerationStructureBuildFlags::PREFER_FAST_TRACE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(GfxAccelerationStructureBuildFlags::PREFER_FAST_BUILD) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(GfxAccelerationStructureBuildFlags::ALLOW_UPDATE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    vk_flags
}
