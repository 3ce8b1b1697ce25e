//! 光追加速结构的构建
//!
//! # 构建过程
//!
//! 1. 收集每个 mesh 的三角形几何信息
//! 2. 分别查询 BLAS 与 TLAS 所需的尺寸，任意一个为空则放弃构建
//! 3. 分配一个 scratch buffer，大小取两者 scratch 需求的最大值，BLAS 与 TLAS 依次复用
//! 4. 分配 BLAS / TLAS 的结果 buffer
//! 5. 写入引用 BLAS 地址的实例数据
//! 6. 录制：build BLAS → BLAS 的 UAV barrier → build TLAS → execute → flush
//!
//! 步骤顺序由类型保证：[`AccelerationStructureBuilder`] 只能按
//! `Gathered → Prebuilt → Allocated` 的顺序推进

use std::rc::Rc;

use radiance_gfx::{
    GfxError, GfxResult,
    basic::format::GfxFormat,
    commands::barrier::GfxBarrier,
    device::GfxDevice,
    raytracing::{
        acceleration_inputs::{
            GfxAccelerationStructureBuildFlags, GfxAccelerationStructureInputs, GfxBuildAccelerationStructureDesc,
            GfxPrebuildInfo, GfxRaytracingGeometryDesc,
        },
        instance::GfxRaytracingInstance,
    },
    resources::{
        handles::GfxGpuAddress,
        owned_resource::GfxOwnedResource,
        resource_desc::{GfxHeapType, GfxResourceDesc, GfxResourceFlags},
        resource_state::GfxResourceState,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::render_context::RenderContext;

/// 一个 mesh 的三角形数据，index 固定为 R32
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtMeshGeometry {
    pub vertex_buffer: GfxGpuAddress,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: GfxFormat,
    pub index_buffer: GfxGpuAddress,
    pub index_count: u32,
}

impl RtMeshGeometry {
    fn to_desc(self) -> GfxRaytracingGeometryDesc {
        GfxRaytracingGeometryDesc {
            vertex_buffer: self.vertex_buffer,
            vertex_stride: self.vertex_stride,
            vertex_count: self.vertex_count,
            vertex_format: self.vertex_format,
            index_buffer: self.index_buffer,
            index_count: self.index_count,
            index_format: GfxFormat::R32Uint,
            opaque: true,
        }
    }
}

/// 尚未查询尺寸
pub struct Gathered;

/// 已经得到两级加速结构的尺寸
pub struct Prebuilt {
    bottom: GfxPrebuildInfo,
    top: GfxPrebuildInfo,
}

/// 所有 buffer 都已分配
pub struct Allocated {
    blas: GfxOwnedResource,
    tlas: GfxOwnedResource,
    scratch: GfxOwnedResource,
    instances: GfxUploadBuffer,
}

pub struct AccelerationStructureBuilder<S> {
    device: Rc<dyn GfxDevice>,
    geometries: Vec<GfxRaytracingGeometryDesc>,
    flags: GfxAccelerationStructureBuildFlags,
    instance_transform: glam::Mat4,
    name: String,
    state: S,
}

/// 构建完成的 BLAS / TLAS，以及构建时用到的 buffer
pub struct AccelerationStructures {
    pub blas: GfxOwnedResource,
    pub tlas: GfxOwnedResource,
    pub scratch: GfxOwnedResource,
    pub instances: GfxUploadBuffer,
}

impl AccelerationStructures {
    #[inline]
    pub fn tlas_address(&self) -> GfxResult<GfxGpuAddress> {
        self.tlas.gpu_address()
    }

    #[inline]
    pub fn blas_address(&self) -> GfxResult<GfxGpuAddress> {
        self.blas.gpu_address()
    }
}

impl<S> AccelerationStructureBuilder<S> {
    fn advance<T>(self, state: T) -> AccelerationStructureBuilder<T> {
        AccelerationStructureBuilder {
            device: self.device,
            geometries: self.geometries,
            flags: self.flags,
            instance_transform: self.instance_transform,
            name: self.name,
            state,
        }
    }

    fn bottom_inputs(&self) -> GfxAccelerationStructureInputs {
        GfxAccelerationStructureInputs::BottomLevel {
            geometries: self.geometries.clone(),
            flags: self.flags,
        }
    }

    fn top_inputs(&self, instances: GfxGpuAddress) -> GfxAccelerationStructureInputs {
        GfxAccelerationStructureInputs::TopLevel {
            instance_count: 1,
            instances,
            flags: self.flags,
        }
    }
}

// builder
impl AccelerationStructureBuilder<Gathered> {
    pub fn new(device: &Rc<dyn GfxDevice>, name: impl Into<String>) -> Self {
        Self {
            device: device.clone(),
            geometries: Vec::new(),
            flags: GfxAccelerationStructureBuildFlags::PREFER_FAST_TRACE,
            instance_transform: glam::Mat4::IDENTITY,
            name: name.into(),
            state: Gathered,
        }
    }

    pub fn add_geometry(mut self, geometry: RtMeshGeometry) -> Self {
        self.geometries.push(geometry.to_desc());
        self
    }

    pub fn with_flags(mut self, flags: GfxAccelerationStructureBuildFlags) -> Self {
        self.flags = flags;
        self
    }

    /// TLAS 中唯一实例的变换，默认为单位矩阵
    pub fn with_instance_transform(mut self, transform: glam::Mat4) -> Self {
        self.instance_transform = transform;
        self
    }

    /// 查询两级加速结构的尺寸，结果尺寸为 0 时返回 [`GfxError::EmptyPrebuild`]
    pub fn prebuild(self) -> GfxResult<AccelerationStructureBuilder<Prebuilt>> {
        let bottom = self.device.acceleration_structure_prebuild_info(&self.bottom_inputs());
        if bottom.is_empty() {
            return Err(GfxError::EmptyPrebuild { level: "bottom-level" });
        }
        // 尺寸只与实例数量有关，此时实例 buffer 尚未分配
        let top = self.device.acceleration_structure_prebuild_info(&self.top_inputs(0));
        if top.is_empty() {
            return Err(GfxError::EmptyPrebuild { level: "top-level" });
        }

        log::info!(
            "`{}` prebuild: blas {} bytes, tlas {} bytes, scratch {} / {} bytes",
            self.name,
            bottom.result_data_max_size,
            top.result_data_max_size,
            bottom.scratch_data_size,
            top.scratch_data_size
        );
        Ok(self.advance(Prebuilt { bottom, top }))
    }
}

impl AccelerationStructureBuilder<Prebuilt> {
    #[inline]
    pub fn bottom_prebuild_info(&self) -> GfxPrebuildInfo {
        self.state.bottom
    }

    #[inline]
    pub fn top_prebuild_info(&self) -> GfxPrebuildInfo {
        self.state.top
    }

    /// scratch 同时服务两次构建，取两者的最大值
    #[inline]
    pub fn scratch_size(&self) -> u64 {
        self.state.bottom.scratch_data_size.max(self.state.top.scratch_data_size)
    }

    pub fn allocate(self) -> GfxResult<AccelerationStructureBuilder<Allocated>> {
        let scratch = GfxOwnedResource::create(
            &self.device,
            GfxHeapType::Default,
            &GfxResourceDesc::buffer(self.scratch_size()).with_flags(GfxResourceFlags::ALLOW_UNORDERED_ACCESS),
            GfxResourceState::UnorderedAccess,
            None,
            format!("{}::scratch", self.name),
        )?;
        let create_result = |size: u64, suffix: &str| {
            GfxOwnedResource::create(
                &self.device,
                GfxHeapType::Default,
                &GfxResourceDesc::buffer(size).with_flags(GfxResourceFlags::ALLOW_UNORDERED_ACCESS),
                GfxResourceState::RaytracingAccelerationStructure,
                None,
                format!("{}::{}", self.name, suffix),
            )
        };
        let blas = create_result(self.state.bottom.result_data_max_size, "blas")?;
        let tlas = create_result(self.state.top.result_data_max_size, "tlas")?;

        let instances = GfxUploadBuffer::new(
            &self.device,
            size_of::<GfxRaytracingInstance>() as u64,
            GfxUploadUsage::Raw,
            1,
            format!("{}::instances", self.name),
        )?;
        let instance = GfxRaytracingInstance::new(self.instance_transform, 0, 0xFF, 0, 0, blas.gpu_address()?);
        instances.upload_data(0, &instance)?;

        Ok(self.advance(Allocated {
            blas,
            tlas,
            scratch,
            instances,
        }))
    }
}

impl AccelerationStructureBuilder<Allocated> {
    /// 录制构建命令并同步等待完成
    pub fn build(self, ctx: &mut RenderContext) -> GfxResult<AccelerationStructures> {
        let Allocated {
            blas,
            tlas,
            scratch,
            instances,
        } = &self.state;
        let scratch_address = scratch.gpu_address()?;

        ctx.scoped_event("BuildAccelerationStructures", |ctx| {
            ctx.cmd.build_raytracing_acceleration_structure(&GfxBuildAccelerationStructureDesc {
                inputs: self.bottom_inputs(),
                dest: blas.handle(),
                scratch: scratch_address,
            });
            // TLAS 读取 BLAS，并且复用同一块 scratch
            ctx.cmd.resource_barrier(&[GfxBarrier::uav(blas.handle())]);
            ctx.cmd.build_raytracing_acceleration_structure(&GfxBuildAccelerationStructureDesc {
                inputs: self.top_inputs(instances.gpu_address(0)),
                dest: tlas.handle(),
                scratch: scratch_address,
            });
        });
        ctx.cmd.execute()?;
        ctx.cmd.flush()?;

        ctx.log.info(&format!("`{}` acceleration structures built", self.name));
        let Allocated {
            blas,
            tlas,
            scratch,
            instances,
        } = self.state;
        Ok(AccelerationStructures {
            blas,
            tlas,
            scratch,
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use radiance_gfx::mock::GfxRecordedCommand;

    use super::*;
    use crate::test_utils::TestRig;

    fn quad() -> RtMeshGeometry {
        RtMeshGeometry {
            vertex_buffer: 0x2000_0000,
            vertex_count: 4,
            vertex_stride: 12,
            vertex_format: GfxFormat::R32G32B32Float,
            index_buffer: 0x3000_0000,
            index_count: 6,
        }
    }

    #[test]
    fn test_tlas_is_built_after_blas_barrier() {
        let mut rig = TestRig::new();
        let structures = AccelerationStructureBuilder::new(&rig.device, "scene")
            .add_geometry(quad())
            .prebuild()
            .unwrap()
            .allocate()
            .unwrap()
            .build(&mut rig.ctx())
            .unwrap();

        let cmd = &rig.cmd;
        let is_build = |level: &'static str| {
            move |c: &GfxRecordedCommand| {
                matches!(c, GfxRecordedCommand::BuildAccelerationStructure(desc) if desc.inputs.level_name() == level)
            }
        };
        let blas_build = cmd.position(is_build("bottom-level")).unwrap();
        let barrier = cmd
            .position(|c| *c == GfxRecordedCommand::ResourceBarrier(vec![GfxBarrier::uav(structures.blas.handle())]))
            .unwrap();
        let tlas_build = cmd.position(is_build("top-level")).unwrap();
        let execute = cmd.position(|c| *c == GfxRecordedCommand::Execute).unwrap();
        let flush = cmd.position(|c| *c == GfxRecordedCommand::Flush).unwrap();
        assert!(blas_build < barrier && barrier < tlas_build && tlas_build < execute && execute < flush);

        // 两次构建共用同一块 scratch，TLAS 读取实例 buffer
        let scratch = structures.scratch.gpu_address().unwrap();
        let GfxRecordedCommand::BuildAccelerationStructure(top) = &cmd.commands()[tlas_build] else {
            unreachable!()
        };
        assert_eq!(top.scratch, scratch);
        assert_eq!(top.dest, structures.tlas.handle());
        assert_eq!(
            top.inputs,
            GfxAccelerationStructureInputs::TopLevel {
                instance_count: 1,
                instances: structures.instances.gpu_address(0),
                flags: GfxAccelerationStructureBuildFlags::PREFER_FAST_TRACE,
            }
        );
        let GfxRecordedCommand::BuildAccelerationStructure(bottom) = &cmd.commands()[blas_build] else {
            unreachable!()
        };
        assert_eq!(bottom.scratch, scratch);
    }

    #[test]
    fn test_scratch_is_max_of_both_levels() {
        let rig = TestRig::new();
        rig.mock.set_prebuild_info(
            Some(GfxPrebuildInfo {
                result_data_max_size: 1024,
                scratch_data_size: 300,
            }),
            Some(GfxPrebuildInfo {
                result_data_max_size: 512,
                scratch_data_size: 900,
            }),
        );
        let prebuilt = AccelerationStructureBuilder::new(&rig.device, "scene").add_geometry(quad()).prebuild().unwrap();
        assert_eq!(prebuilt.scratch_size(), 900);

        let allocated = prebuilt.allocate().unwrap();
        let scratch = rig.mock.resource(allocated.state.scratch.handle()).unwrap();
        assert_eq!(scratch.desc.width, 900);
        assert_eq!(scratch.initial_state, GfxResourceState::UnorderedAccess);
        let blas = rig.mock.resource(allocated.state.blas.handle()).unwrap();
        assert_eq!(blas.desc.width, 1024);
        assert!(blas.desc.flags.contains(GfxResourceFlags::ALLOW_UNORDERED_ACCESS));
        assert_eq!(blas.initial_state, GfxResourceState::RaytracingAccelerationStructure);
    }

    #[test]
    fn test_instance_references_blas() {
        let rig = TestRig::new();
        let allocated = AccelerationStructureBuilder::new(&rig.device, "scene")
            .add_geometry(quad())
            .with_instance_transform(glam::Mat4::from_translation(glam::vec3(0.0, -1.0, 0.0)))
            .prebuild()
            .unwrap()
            .allocate()
            .unwrap();

        let bytes = rig.mock.resource_bytes(allocated.state.instances.resource_handle()).unwrap();
        let instance: GfxRaytracingInstance = bytemuck::pod_read_unaligned(&bytes[..64]);
        assert_eq!(instance.acceleration_structure, allocated.state.blas.gpu_address().unwrap());
        assert_eq!(instance.mask(), 0xFF);
        assert_eq!(instance.transform[1][3], -1.0);
    }

    #[test]
    fn test_empty_prebuild_aborts() {
        let rig = TestRig::new();
        let result = AccelerationStructureBuilder::new(&rig.device, "empty").prebuild();
        assert!(matches!(result, Err(GfxError::EmptyPrebuild { level: "bottom-level" })));

        rig.mock.set_prebuild_info(
            None,
            Some(GfxPrebuildInfo {
                result_data_max_size: 0,
                scratch_data_size: 64,
            }),
        );
        let result = AccelerationStructureBuilder::new(&rig.device, "scene").add_geometry(quad()).prebuild();
        assert!(matches!(result, Err(GfxError::EmptyPrebuild { level: "top-level" })));
    }
}
