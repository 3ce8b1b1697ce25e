use std::path::Path;

use crate::{
    descriptors::view_desc::{GfxDescriptorHeapDesc, GfxDescriptorHeapType, GfxViewDesc},
    error::GfxResult,
    pipelines::{
        pipeline_desc::{GfxComputePipelineDesc, GfxRayTracingPipeline, GfxRayTracingPipelineDesc},
        root_signature::GfxRootSignatureDesc,
    },
    raytracing::acceleration_inputs::{GfxAccelerationStructureInputs, GfxPrebuildInfo},
    resources::{
        handles::{
            GfxDescriptorHeapHandle, GfxGpuAddress, GfxPipelineHandle, GfxResourceHandle, GfxRootSignatureHandle,
        },
        resource_desc::{GfxClearValue, GfxHeapType, GfxResourceDesc},
        resource_state::GfxResourceState,
    },
};

/// 设备相关的对齐与大小限制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDeviceLimits {
    pub constant_buffer_alignment: u64,
    pub shader_identifier_size: u32,
    pub shader_record_alignment: u32,
    pub shader_table_alignment: u32,
}

/// 创建资源、descriptor heap 以及写入 descriptor 的接口
///
/// 所有方法都只需要 `&self`：实现者内部自行处理可变状态，
/// 使得 device 可以通过 `Rc<dyn GfxDevice>` 被多个对象共享
pub trait GfxDevice {
    fn limits(&self) -> GfxDeviceLimits;

    /// 相邻 descriptor slot 之间的字节间距
    fn descriptor_increment_size(&self, ty: GfxDescriptorHeapType) -> u32;

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc, name: &str) -> GfxResult<GfxDescriptorHeapHandle>;

    fn destroy_descriptor_heap(&self, heap: GfxDescriptorHeapHandle);

    /// `resource` 为 None 时写入 null view
    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapHandle,
        index: u32,
        resource: Option<GfxResourceHandle>,
        view: &GfxViewDesc,
    ) -> GfxResult<()>;

    fn create_committed_resource(
        &self,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        clear_value: Option<&GfxClearValue>,
        name: &str,
    ) -> GfxResult<GfxResourceHandle>;

    fn destroy_resource(&self, resource: GfxResourceHandle);

    fn resource_desc(&self, resource: GfxResourceHandle) -> GfxResult<GfxResourceDesc>;

    fn gpu_virtual_address(&self, resource: GfxResourceHandle) -> GfxResult<GfxGpuAddress>;

    /// 写入 Upload heap 中资源的映射内存
    fn write_mapped(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()>;

    fn acceleration_structure_prebuild_info(&self, inputs: &GfxAccelerationStructureInputs) -> GfxPrebuildInfo;
}

/// 创建 root signature 与 pipeline 的接口
pub trait GfxPipelineLibrary {
    fn create_root_signature(&self, desc: &GfxRootSignatureDesc, name: &str) -> GfxResult<GfxRootSignatureHandle>;

    /// 同名的 compute pipeline 只会被创建一次
    fn get_or_create_compute_pso(
        &self,
        name: &str,
        shader_path: &Path,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<GfxPipelineHandle>;

    fn compute_pso(&self, name: &str) -> Option<GfxPipelineHandle>;

    fn create_ray_tracing_pipeline(
        &self,
        desc: &GfxRayTracingPipelineDesc,
        name: &str,
    ) -> GfxResult<GfxRayTracingPipeline>;

    /// 导出名（shader 或 hit group）对应的 shader identifier
    fn shader_identifier(&self, pipeline: &GfxRayTracingPipeline, export: &str) -> GfxResult<Vec<u8>>;
}
