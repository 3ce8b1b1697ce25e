use crate::{
    basic::format::GfxFormat,
    commands::barrier::GfxBarrier,
    descriptors::view_desc::GfxGpuDescriptorHandle,
    error::GfxResult,
    raytracing::acceleration_inputs::GfxBuildAccelerationStructureDesc,
    resources::handles::{
        GfxDescriptorHeapHandle, GfxGpuAddress, GfxPipelineHandle, GfxRayTracingPipelineHandle,
        GfxResourceHandle, GfxRootSignatureHandle,
    },
};

/// buffer 到 texture 某个 subresource 的拷贝布局
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTextureCopyLayout {
    /// 数据在 buffer 中的起始偏移
    pub offset: u64,
    pub row_pitch: u32,
    pub width: u32,
    pub height: u32,
    pub format: GfxFormat,
    pub mip_level: u32,
    pub array_slice: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GfxGpuAddressRange {
    pub start: GfxGpuAddress,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GfxGpuAddressRangeAndStride {
    pub start: GfxGpuAddress,
    pub size: u64,
    pub stride: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDispatchRaysDesc {
    pub ray_generation: GfxGpuAddressRange,
    pub miss: GfxGpuAddressRangeAndStride,
    pub hit_group: GfxGpuAddressRangeAndStride,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// 录制 GPU 命令的接口
///
/// root parameter 的序号与创建 root signature 时参数的顺序一致
pub trait GfxCommandList {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]);

    /// 目标 texture 必须处于 CopyDest 状态
    fn copy_buffer_to_texture(&mut self, dst: GfxResourceHandle, src: GfxResourceHandle, layout: &GfxTextureCopyLayout);

    fn set_descriptor_heaps(&mut self, heaps: &[GfxDescriptorHeapHandle]);

    /// compute 与 ray tracing 共用的 root signature
    fn set_compute_root_signature(&mut self, root_signature: GfxRootSignatureHandle);

    fn set_pipeline_state(&mut self, pipeline: GfxPipelineHandle);

    fn set_compute_root_descriptor_table(&mut self, root_index: u32, table: GfxGpuDescriptorHandle);

    fn set_compute_root_constant_buffer_view(&mut self, root_index: u32, address: GfxGpuAddress);

    fn set_compute_root_shader_resource_view(&mut self, root_index: u32, address: GfxGpuAddress);

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32);

    fn build_raytracing_acceleration_structure(&mut self, desc: &GfxBuildAccelerationStructureDesc);

    fn set_ray_tracing_pipeline(&mut self, pipeline: GfxRayTracingPipelineHandle);

    fn dispatch_rays(&mut self, desc: &GfxDispatchRaysDesc);

    fn begin_event(&mut self, name: &str);

    fn end_event(&mut self);

    /// 提交目前录制的命令，之后可以继续录制
    fn execute(&mut self) -> GfxResult<()>;

    /// 提交目前录制的命令，并等待 GPU 执行完毕
    fn flush(&mut self) -> GfxResult<()>;
}

/// 用 begin_event / end_event 包裹 `f` 中录制的命令
pub fn scoped_event<C, R>(cmd: &mut C, name: &str, f: impl FnOnce(&mut C) -> R) -> R
where
    C: GfxCommandList + ?Sized,
{
    cmd.begin_event(name);
    let result = f(cmd);
    cmd.end_event();
    result
}
