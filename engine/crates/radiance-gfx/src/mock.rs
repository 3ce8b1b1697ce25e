//! 不依赖 GPU 的后端：记录所有的设备调用与录制的命令，供上层组件的单元测试使用

use std::{
    cell::{Cell, RefCell},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use slotmap::SlotMap;

use crate::{
    basic::align::align_up,
    commands::{
        barrier::GfxBarrier,
        command_list::{GfxCommandList, GfxDispatchRaysDesc, GfxTextureCopyLayout},
    },
    descriptors::view_desc::{GfxDescriptorHeapDesc, GfxDescriptorHeapType, GfxGpuDescriptorHandle, GfxViewDesc},
    device::{GfxDevice, GfxDeviceLimits, GfxPipelineLibrary},
    error::{GfxError, GfxResult},
    pipelines::{
        pipeline_desc::{GfxComputePipelineDesc, GfxRayTracingPipeline, GfxRayTracingPipelineDesc},
        root_signature::GfxRootSignatureDesc,
    },
    raytracing::acceleration_inputs::{
        GfxAccelerationStructureInputs, GfxBuildAccelerationStructureDesc, GfxPrebuildInfo,
    },
    resources::{
        handles::{
            GfxDescriptorHeapHandle, GfxGpuAddress, GfxPipelineHandle, GfxRayTracingPipelineHandle,
            GfxResourceHandle, GfxRootSignatureHandle,
        },
        resource_desc::{GfxClearValue, GfxHeapType, GfxResourceDesc},
        resource_state::GfxResourceState,
    },
};

pub const MOCK_LIMITS: GfxDeviceLimits = GfxDeviceLimits {
    constant_buffer_alignment: 256,
    shader_identifier_size: 32,
    shader_record_alignment: 32,
    shader_table_alignment: 64,
};

pub const MOCK_DESCRIPTOR_STRIDE: u32 = 32;

const MOCK_ADDRESS_BASE: GfxGpuAddress = 0x1000_0000;
const MOCK_ADDRESS_ALIGNMENT: u64 = 4096;

#[derive(Clone, Debug)]
pub struct MockResource {
    pub heap_type: GfxHeapType,
    pub desc: GfxResourceDesc,
    pub initial_state: GfxResourceState,
    pub clear_value: Option<GfxClearValue>,
    pub name: String,
    pub address: GfxGpuAddress,
    pub bytes: Vec<u8>,
}

/// 某个 descriptor slot 上最后一次写入的内容
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockDescriptorWrite {
    pub resource: Option<GfxResourceHandle>,
    pub view: GfxViewDesc,
}

#[derive(Clone, Debug)]
pub struct MockDescriptorHeap {
    pub desc: GfxDescriptorHeapDesc,
    pub name: String,
    pub slots: Vec<Option<MockDescriptorWrite>>,
    /// 按时间顺序记录的所有写入
    pub history: Vec<(u32, MockDescriptorWrite)>,
}

#[derive(Clone, Debug)]
pub struct MockComputePipeline {
    pub name: String,
    pub shader_path: PathBuf,
    pub desc: GfxComputePipelineDesc,
}

#[derive(Default)]
pub struct MockGfxDevice {
    resources: RefCell<SlotMap<GfxResourceHandle, MockResource>>,
    heaps: RefCell<SlotMap<GfxDescriptorHeapHandle, MockDescriptorHeap>>,
    root_signatures: RefCell<SlotMap<GfxRootSignatureHandle, GfxRootSignatureDesc>>,
    compute_pipelines: RefCell<SlotMap<GfxPipelineHandle, MockComputePipeline>>,
    compute_pipeline_names: RefCell<IndexMap<String, GfxPipelineHandle>>,
    rt_pipelines: RefCell<SlotMap<GfxRayTracingPipelineHandle, GfxRayTracingPipelineDesc>>,
    next_address: Cell<GfxGpuAddress>,
    bottom_prebuild: Cell<Option<GfxPrebuildInfo>>,
    top_prebuild: Cell<Option<GfxPrebuildInfo>>,
}

// new & init
impl MockGfxDevice {
    pub fn new() -> Self {
        Self {
            next_address: Cell::new(MOCK_ADDRESS_BASE),
            ..Default::default()
        }
    }

    /// 覆盖 prebuild 的返回值；None 表示按几何数量估算
    pub fn set_prebuild_info(&self, bottom: Option<GfxPrebuildInfo>, top: Option<GfxPrebuildInfo>) {
        self.bottom_prebuild.set(bottom);
        self.top_prebuild.set(top);
    }
}

// inspection
impl MockGfxDevice {
    pub fn live_resource_count(&self) -> usize {
        self.resources.borrow().len()
    }

    pub fn resource(&self, handle: GfxResourceHandle) -> Option<MockResource> {
        self.resources.borrow().get(handle).cloned()
    }

    pub fn resource_bytes(&self, handle: GfxResourceHandle) -> Option<Vec<u8>> {
        self.resources.borrow().get(handle).map(|res| res.bytes.clone())
    }

    pub fn resource_by_name(&self, name: &str) -> Option<GfxResourceHandle> {
        self.resources.borrow().iter().find(|(_, res)| res.name == name).map(|(handle, _)| handle)
    }

    pub fn descriptor_slot(&self, heap: GfxDescriptorHeapHandle, index: u32) -> Option<MockDescriptorWrite> {
        self.heaps.borrow().get(heap).and_then(|heap| heap.slots.get(index as usize).copied().flatten())
    }

    pub fn descriptor_history(&self, heap: GfxDescriptorHeapHandle) -> Vec<(u32, MockDescriptorWrite)> {
        self.heaps.borrow().get(heap).map(|heap| heap.history.clone()).unwrap_or_default()
    }

    pub fn live_heap_count(&self) -> usize {
        self.heaps.borrow().len()
    }

    pub fn root_signature(&self, handle: GfxRootSignatureHandle) -> Option<GfxRootSignatureDesc> {
        self.root_signatures.borrow().get(handle).cloned()
    }

    pub fn compute_pipeline(&self, handle: GfxPipelineHandle) -> Option<MockComputePipeline> {
        self.compute_pipelines.borrow().get(handle).cloned()
    }

    pub fn compute_pipeline_count(&self) -> usize {
        self.compute_pipelines.borrow().len()
    }

    pub fn ray_tracing_pipeline(&self, handle: GfxRayTracingPipelineHandle) -> Option<GfxRayTracingPipelineDesc> {
        self.rt_pipelines.borrow().get(handle).cloned()
    }

    /// 确定性的 shader identifier：首字节为导出名的长度，其余为导出名的字节
    pub fn fake_shader_identifier(export: &str) -> Vec<u8> {
        let mut identifier = vec![0u8; MOCK_LIMITS.shader_identifier_size as usize];
        identifier[0] = export.len() as u8;
        for (dst, src) in identifier[1..].iter_mut().zip(export.bytes()) {
            *dst = src;
        }
        identifier
    }
}

impl GfxDevice for MockGfxDevice {
    fn limits(&self) -> GfxDeviceLimits {
        MOCK_LIMITS
    }

    fn descriptor_increment_size(&self, _ty: GfxDescriptorHeapType) -> u32 {
        MOCK_DESCRIPTOR_STRIDE
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc, name: &str) -> GfxResult<GfxDescriptorHeapHandle> {
        Ok(self.heaps.borrow_mut().insert(MockDescriptorHeap {
            desc: *desc,
            name: name.to_string(),
            slots: vec![None; desc.capacity as usize],
            history: Vec::new(),
        }))
    }

    fn destroy_descriptor_heap(&self, heap: GfxDescriptorHeapHandle) {
        self.heaps.borrow_mut().remove(heap);
    }

    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapHandle,
        index: u32,
        resource: Option<GfxResourceHandle>,
        view: &GfxViewDesc,
    ) -> GfxResult<()> {
        if let Some(resource) = resource {
            if !self.resources.borrow().contains_key(resource) {
                return Err(GfxError::InvalidHandle("resource"));
            }
        }
        let mut heaps = self.heaps.borrow_mut();
        let heap = heaps.get_mut(heap).ok_or(GfxError::InvalidHandle("descriptor heap"))?;
        let len = heap.slots.len() as u64;
        let slot = heap.slots.get_mut(index as usize).ok_or(GfxError::OutOfRange {
            what: "descriptor slot",
            index: index as u64,
            len,
        })?;
        let write = MockDescriptorWrite { resource, view: *view };
        *slot = Some(write);
        heap.history.push((index, write));
        Ok(())
    }

    fn create_committed_resource(
        &self,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        clear_value: Option<&GfxClearValue>,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        let size = if desc.is_buffer() {
            desc.width
        } else {
            desc.width * desc.height as u64 * desc.depth_or_array_size as u64 * desc.format.pixel_size() as u64
        };
        let address = self.next_address.get();
        self.next_address.set(align_up(address + size.max(1), MOCK_ADDRESS_ALIGNMENT));

        let bytes = if heap_type == GfxHeapType::Upload { vec![0; size as usize] } else { Vec::new() };
        Ok(self.resources.borrow_mut().insert(MockResource {
            heap_type,
            desc: *desc,
            initial_state,
            clear_value: clear_value.copied(),
            name: name.to_string(),
            address,
            bytes,
        }))
    }

    fn destroy_resource(&self, resource: GfxResourceHandle) {
        self.resources.borrow_mut().remove(resource);
    }

    fn resource_desc(&self, resource: GfxResourceHandle) -> GfxResult<GfxResourceDesc> {
        self.resources.borrow().get(resource).map(|res| res.desc).ok_or(GfxError::InvalidHandle("resource"))
    }

    fn gpu_virtual_address(&self, resource: GfxResourceHandle) -> GfxResult<GfxGpuAddress> {
        self.resources.borrow().get(resource).map(|res| res.address).ok_or(GfxError::InvalidHandle("resource"))
    }

    fn write_mapped(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut resources = self.resources.borrow_mut();
        let res = resources.get_mut(resource).ok_or(GfxError::InvalidHandle("resource"))?;
        if res.heap_type != GfxHeapType::Upload {
            return Err(GfxError::Unsupported(format!("`{}` is not mappable", res.name)));
        }
        let end = offset as usize + data.len();
        if end > res.bytes.len() {
            return Err(GfxError::OutOfRange {
                what: "mapped byte",
                index: end as u64,
                len: res.bytes.len() as u64,
            });
        }
        res.bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &GfxAccelerationStructureInputs) -> GfxPrebuildInfo {
        match inputs {
            GfxAccelerationStructureInputs::BottomLevel { geometries, .. } => {
                self.bottom_prebuild.get().unwrap_or_else(|| {
                    let triangles: u64 = geometries.iter().map(|g| g.triangle_count() as u64).sum();
                    GfxPrebuildInfo {
                        result_data_max_size: triangles * 256,
                        scratch_data_size: triangles * 128,
                    }
                })
            }
            GfxAccelerationStructureInputs::TopLevel { instance_count, .. } => {
                self.top_prebuild.get().unwrap_or_else(|| GfxPrebuildInfo {
                    result_data_max_size: *instance_count as u64 * 128,
                    scratch_data_size: *instance_count as u64 * 64,
                })
            }
        }
    }
}

impl GfxPipelineLibrary for MockGfxDevice {
    fn create_root_signature(&self, desc: &GfxRootSignatureDesc, _name: &str) -> GfxResult<GfxRootSignatureHandle> {
        Ok(self.root_signatures.borrow_mut().insert(desc.clone()))
    }

    fn get_or_create_compute_pso(
        &self,
        name: &str,
        shader_path: &Path,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<GfxPipelineHandle> {
        if let Some(handle) = self.compute_pso(name) {
            return Ok(handle);
        }
        if !self.root_signatures.borrow().contains_key(desc.root_signature) {
            return Err(GfxError::InvalidHandle("root signature"));
        }
        let handle = self.compute_pipelines.borrow_mut().insert(MockComputePipeline {
            name: name.to_string(),
            shader_path: shader_path.to_path_buf(),
            desc: desc.clone(),
        });
        self.compute_pipeline_names.borrow_mut().insert(name.to_string(), handle);
        Ok(handle)
    }

    fn compute_pso(&self, name: &str) -> Option<GfxPipelineHandle> {
        self.compute_pipeline_names.borrow().get(name).copied()
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &GfxRayTracingPipelineDesc,
        name: &str,
    ) -> GfxResult<GfxRayTracingPipeline> {
        if !self.root_signatures.borrow().contains_key(desc.global_root_signature) {
            return Err(GfxError::InvalidHandle("root signature"));
        }
        let handle = self.rt_pipelines.borrow_mut().insert(desc.clone());
        Ok(GfxRayTracingPipeline::new(handle, name))
    }

    fn shader_identifier(&self, pipeline: &GfxRayTracingPipeline, export: &str) -> GfxResult<Vec<u8>> {
        let pipelines = self.rt_pipelines.borrow();
        let desc = pipelines.get(pipeline.handle()).ok_or(GfxError::InvalidHandle("ray tracing pipeline"))?;
        let exported = desc.exports.iter().any(|e| e.name == export) || desc.hit_groups.iter().any(|g| g.name == export);
        if !exported {
            return Err(GfxError::MissingShaderExport(export.to_string()));
        }
        Ok(Self::fake_shader_identifier(export))
    }
}

/// 录制下来的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum GfxRecordedCommand {
    ResourceBarrier(Vec<GfxBarrier>),
    CopyBufferToTexture {
        dst: GfxResourceHandle,
        src: GfxResourceHandle,
        layout: GfxTextureCopyLayout,
    },
    SetDescriptorHeaps(Vec<GfxDescriptorHeapHandle>),
    SetComputeRootSignature(GfxRootSignatureHandle),
    SetPipelineState(GfxPipelineHandle),
    SetComputeRootDescriptorTable {
        root_index: u32,
        table: GfxGpuDescriptorHandle,
    },
    SetComputeRootConstantBufferView {
        root_index: u32,
        address: GfxGpuAddress,
    },
    SetComputeRootShaderResourceView {
        root_index: u32,
        address: GfxGpuAddress,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BuildAccelerationStructure(GfxBuildAccelerationStructureDesc),
    SetRayTracingPipeline(GfxRayTracingPipelineHandle),
    DispatchRays(GfxDispatchRaysDesc),
    BeginEvent(String),
    EndEvent,
    Execute,
    Flush,
}

#[derive(Default)]
pub struct MockCommandList {
    commands: Vec<GfxRecordedCommand>,
}

impl MockCommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[GfxRecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GfxRecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn dispatches(&self) -> Vec<(u32, u32, u32)> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxRecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect()
    }

    /// 所有 barrier 按录制顺序展开
    pub fn barriers(&self) -> Vec<GfxBarrier> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxRecordedCommand::ResourceBarrier(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn position(&self, pred: impl Fn(&GfxRecordedCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(pred)
    }

    pub fn count(&self, pred: impl Fn(&GfxRecordedCommand) -> bool) -> usize {
        self.commands.iter().filter(|cmd| pred(cmd)).count()
    }
}

impl GfxCommandList for MockCommandList {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]) {
        self.commands.push(GfxRecordedCommand::ResourceBarrier(barriers.to_vec()));
    }

    fn copy_buffer_to_texture(&mut self, dst: GfxResourceHandle, src: GfxResourceHandle, layout: &GfxTextureCopyLayout) {
        self.commands.push(GfxRecordedCommand::CopyBufferToTexture {
            dst,
            src,
            layout: *layout,
        });
    }

    fn set_descriptor_heaps(&mut self, heaps: &[GfxDescriptorHeapHandle]) {
        self.commands.push(GfxRecordedCommand::SetDescriptorHeaps(heaps.to_vec()));
    }

    fn set_compute_root_signature(&mut self, root_signature: GfxRootSignatureHandle) {
        self.commands.push(GfxRecordedCommand::SetComputeRootSignature(root_signature));
    }

    fn set_pipeline_state(&mut self, pipeline: GfxPipelineHandle) {
        self.commands.push(GfxRecordedCommand::SetPipelineState(pipeline));
    }

    fn set_compute_root_descriptor_table(&mut self, root_index: u32, table: GfxGpuDescriptorHandle) {
        self.commands.push(GfxRecordedCommand::SetComputeRootDescriptorTable { root_index, table });
    }

    fn set_compute_root_constant_buffer_view(&mut self, root_index: u32, address: GfxGpuAddress) {
        self.commands.push(GfxRecordedCommand::SetComputeRootConstantBufferView { root_index, address });
    }

    fn set_compute_root_shader_resource_view(&mut self, root_index: u32, address: GfxGpuAddress) {
        self.commands.push(GfxRecordedCommand::SetComputeRootShaderResourceView { root_index, address });
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.commands.push(GfxRecordedCommand::Dispatch {
            x: group_count_x,
            y: group_count_y,
            z: group_count_z,
        });
    }

    fn build_raytracing_acceleration_structure(&mut self, desc: &GfxBuildAccelerationStructureDesc) {
        self.commands.push(GfxRecordedCommand::BuildAccelerationStructure(desc.clone()));
    }

    fn set_ray_tracing_pipeline(&mut self, pipeline: GfxRayTracingPipelineHandle) {
        self.commands.push(GfxRecordedCommand::SetRayTracingPipeline(pipeline));
    }

    fn dispatch_rays(&mut self, desc: &GfxDispatchRaysDesc) {
        self.commands.push(GfxRecordedCommand::DispatchRays(*desc));
    }

    fn begin_event(&mut self, name: &str) {
        self.commands.push(GfxRecordedCommand::BeginEvent(name.to_string()));
    }

    fn end_event(&mut self) {
        self.commands.push(GfxRecordedCommand::EndEvent);
    }

    fn execute(&mut self) -> GfxResult<()> {
        self.commands.push(GfxRecordedCommand::Execute);
        Ok(())
    }

    fn flush(&mut self) -> GfxResult<()> {
        self.commands.push(GfxRecordedCommand::Flush);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::pipeline_desc::{GfxHitGroupDesc, GfxShaderExport, GfxShaderStage};

    #[test]
    fn test_compute_pso_is_created_once() {
        let device = MockGfxDevice::new();
        let root_signature = device.create_root_signature(&GfxRootSignatureDesc::new().cbv(0), "rs").unwrap();
        let desc = GfxComputePipelineDesc {
            root_signature,
            entry_point: "main".to_string(),
        };

        let first = device.get_or_create_compute_pso("blur", Path::new("blur.comp.spv"), &desc).unwrap();
        let second = device.get_or_create_compute_pso("blur", Path::new("other.comp.spv"), &desc).unwrap();
        assert_eq!(first, second);
        assert_eq!(device.compute_pipeline_count(), 1);
        assert_eq!(device.compute_pso("blur"), Some(first));
        assert_eq!(device.compute_pso("sharpen"), None);
    }

    #[test]
    fn test_shader_identifier_requires_export() {
        let device = MockGfxDevice::new();
        let root_signature = device.create_root_signature(&GfxRootSignatureDesc::new(), "rs").unwrap();
        let pipeline = device
            .create_ray_tracing_pipeline(
                &GfxRayTracingPipelineDesc {
                    library_path: PathBuf::from("rt.spv"),
                    exports: vec![GfxShaderExport::new("Raygen", GfxShaderStage::RayGen)],
                    hit_groups: vec![GfxHitGroupDesc {
                        name: "HitGroup".to_string(),
                        closest_hit: None,
                        any_hit: None,
                    }],
                    max_payload_size: 16,
                    max_attribute_size: 8,
                    max_recursion_depth: 1,
                    global_root_signature: root_signature,
                },
                "rt",
            )
            .unwrap();

        assert_eq!(
            device.shader_identifier(&pipeline, "Raygen").unwrap(),
            MockGfxDevice::fake_shader_identifier("Raygen")
        );
        assert!(device.shader_identifier(&pipeline, "HitGroup").is_ok());
        assert!(matches!(
            device.shader_identifier(&pipeline, "Miss"),
            Err(GfxError::MissingShaderExport(name)) if name == "Miss"
        ));
    }

    #[test]
    fn test_scoped_event_brackets_commands() {
        let mut cmd = MockCommandList::new();
        let value = crate::commands::command_list::scoped_event(&mut cmd, "pass", |cmd| {
            cmd.dispatch(1, 2, 3);
            7
        });
        assert_eq!(value, 7);
        assert_eq!(
            cmd.commands(),
            &[
                GfxRecordedCommand::BeginEvent("pass".to_string()),
                GfxRecordedCommand::Dispatch { x: 1, y: 2, z: 3 },
                GfxRecordedCommand::EndEvent,
            ]
        );
    }
}
