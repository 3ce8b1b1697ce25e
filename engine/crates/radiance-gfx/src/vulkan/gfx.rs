use std::{cell::RefCell, mem::ManuallyDrop, path::Path, rc::Rc};

use ash::vk;
use slotmap::SlotMap;

use crate::{
    basic::align::align_up,
    descriptors::view_desc::{GfxDescriptorHeapDesc, GfxDescriptorHeapType, GfxViewDesc},
    device::{GfxDevice, GfxDeviceLimits, GfxPipelineLibrary},
    error::{GfxError, GfxResult},
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
    vulkan::{
        VkResultExt,
        acceleration::VkAccelerationGeometry,
        debug_messenger::VkDebugMsger,
        descriptor_heap::{VkBindlessLayout, VkDescriptorHeap},
        device::VkDeviceFunctions,
        instance::VkInstance,
        physical_device::VkPhysicalDevice,
        pipelines::VkPipelineStore,
        resources::VkResource,
    },
};

/// Vulkan 后端的设备与 pipeline 库
///
/// 所有 Vulkan 对象都由这里统一持有，外部只能拿到 slotmap 的 handle
pub struct VkGfx {
    pub(crate) resources: RefCell<SlotMap<GfxResourceHandle, VkResource>>,
    pub(crate) heaps: RefCell<SlotMap<GfxDescriptorHeapHandle, VkDescriptorHeap>>,
    pub(crate) pipelines: RefCell<VkPipelineStore>,
    bindless: VkBindlessLayout,

    allocator: ManuallyDrop<vk_mem::Allocator>,

    pub(crate) queue: vk::Queue,
    pub(crate) queue_family_index: u32,

    pub(crate) device: VkDeviceFunctions,
    physical_device: VkPhysicalDevice,
    debug_msger: Option<VkDebugMsger>,
    instance: Option<VkInstance>,
    _entry: ash::Entry,
}

// new & init
impl VkGfx {
    pub fn new(app_name: &str, enable_validation: bool) -> GfxResult<Rc<Self>> {
        let _span = tracy_client::span!("VkGfx::new");

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GfxError::Unsupported(format!("failed to load vulkan entry: {e}")))?;
        let instance = VkInstance::new(&entry, app_name, enable_validation)?;
        let debug_msger = VkDebugMsger::new(&entry, &instance.ash_instance)?;
        let physical_device = VkPhysicalDevice::new_discrete_physical_device(&instance.ash_instance)?;
        let queue_family_index = physical_device.gfx_queue_family_index;
        let device = VkDeviceFunctions::new(&instance.ash_instance, physical_device.vk_handle, queue_family_index)?;
        let queue = unsafe { device.device.get_device_queue(queue_family_index, 0) };

        // vma 需要引用 instance 与 device，因此在其他部分初始化完成后再创建
        let allocator = {
            let mut vma_ci =
                vk_mem::AllocatorCreateInfo::new(&instance.ash_instance, &device.device, physical_device.vk_handle);
            vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
            vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
            unsafe { vk_mem::Allocator::new(vma_ci) }.or_gfx("vmaCreateAllocator")?
        };
        let bindless = VkBindlessLayout::new(&device)?;

        Ok(Rc::new(Self {
            resources: RefCell::new(SlotMap::with_key()),
            heaps: RefCell::new(SlotMap::with_key()),
            pipelines: RefCell::new(VkPipelineStore::default()),
            bindless,
            allocator: ManuallyDrop::new(allocator),
            queue,
            queue_family_index,
            device,
            physical_device,
            debug_msger: Some(debug_msger),
            instance: Some(instance),
            _entry: entry,
        }))
    }
}

impl Drop for VkGfx {
    fn drop(&mut self) {
        log::info!("destroying vulkan backend");
        self.device.wait_idle();

        for (_, resource) in self.resources.get_mut().drain() {
            resource.destroy(&self.device, &self.allocator);
        }
        for (_, heap) in self.heaps.get_mut().drain() {
            heap.destroy(&self.device);
        }
        self.pipelines.get_mut().destroy(&self.device);
        self.bindless.destroy(&self.device);

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
        }
        self.device.destroy();
        if let Some(debug_msger) = self.debug_msger.take() {
            debug_msger.destroy();
        }
        if let Some(instance) = self.instance.take() {
            instance.destroy();
        }
    }
}

// getters
impl VkGfx {
    #[inline]
    pub fn device_name(&self) -> String {
        self.physical_device
            .basic_props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl GfxDevice for VkGfx {
    fn limits(&self) -> GfxDeviceLimits {
        let rt_props = &self.physical_device.rt_pipeline_props;
        let min_ubo_alignment = self.physical_device.basic_props.limits.min_uniform_buffer_offset_alignment;
        GfxDeviceLimits {
            constant_buffer_alignment: min_ubo_alignment.max(256),
            shader_identifier_size: rt_props.shader_group_handle_size,
            shader_record_alignment: rt_props.shader_group_handle_alignment,
            shader_table_alignment: rt_props.shader_group_base_alignment,
        }
    }

    /// bindless set 中以数组下标寻址
    fn descriptor_increment_size(&self, _ty: GfxDescriptorHeapType) -> u32 {
        1
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc, name: &str) -> GfxResult<GfxDescriptorHeapHandle> {
        let heap = VkDescriptorHeap::new(&self.device, &self.bindless, desc, name)?;
        Ok(self.heaps.borrow_mut().insert(heap))
    }

    fn destroy_descriptor_heap(&self, heap: GfxDescriptorHeapHandle) {
        if let Some(heap) = self.heaps.borrow_mut().remove(heap) {
            // set 可能仍被 GPU 使用
            self.device.wait_idle();
            heap.destroy(&self.device);
        }
    }

    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapHandle,
        index: u32,
        resource: Option<GfxResourceHandle>,
        view: &GfxViewDesc,
    ) -> GfxResult<()> {
        let resources = self.resources.borrow();
        let image = match resource {
            Some(handle) => {
                let resource = resources.get(handle).ok_or(GfxError::InvalidHandle("resource"))?;
                Some((resource.vk_image()?, &resource.desc))
            }
            None => None,
        };
        let mut heaps = self.heaps.borrow_mut();
        let heap = heaps.get_mut(heap).ok_or(GfxError::InvalidHandle("descriptor heap"))?;
        heap.write(&self.device, index, image, view)
    }

    fn create_committed_resource(
        &self,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        clear_value: Option<&GfxClearValue>,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        let _span = tracy_client::span!("VkGfx::create_committed_resource");
        if let Some(clear_value) = clear_value {
            log::trace!("`{}` optimized clear value: {:?}", name, clear_value.color);
        }
        let resource = VkResource::new(&self.device, &self.allocator, heap_type, desc, initial_state, name)?;
        Ok(self.resources.borrow_mut().insert(resource))
    }

    fn destroy_resource(&self, resource: GfxResourceHandle) {
        if let Some(resource) = self.resources.borrow_mut().remove(resource) {
            // 资源可能仍被 GPU 使用
            self.device.wait_idle();
            resource.destroy(&self.device, &self.allocator);
        }
    }

    fn resource_desc(&self, resource: GfxResourceHandle) -> GfxResult<GfxResourceDesc> {
        self.resources.borrow().get(resource).map(|res| res.desc).ok_or(GfxError::InvalidHandle("resource"))
    }

    fn gpu_virtual_address(&self, resource: GfxResourceHandle) -> GfxResult<GfxGpuAddress> {
        self.resources.borrow().get(resource).ok_or(GfxError::InvalidHandle("resource"))?.gpu_address()
    }

    fn write_mapped(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        self.resources
            .borrow()
            .get(resource)
            .ok_or(GfxError::InvalidHandle("resource"))?
            .write_mapped(&self.allocator, offset, data)
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &GfxAccelerationStructureInputs) -> GfxPrebuildInfo {
        let geometry = VkAccelerationGeometry::new(inputs);
        let build_info = geometry.build_info();
        let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.device.acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &geometry.max_primitive_counts(), // 每一个 geometry 里面的最大 primitive 数量
                &mut size_info,
            );
        }
        let scratch_alignment =
            (self.physical_device.acc_struct_props.min_acceleration_structure_scratch_offset_alignment as u64).max(1);
        GfxPrebuildInfo {
            result_data_max_size: size_info.acceleration_structure_size,
            scratch_data_size: align_up(size_info.build_scratch_size, scratch_alignment),
        }
    }
}

impl GfxPipelineLibrary for VkGfx {
    fn create_root_signature(&self, desc: &GfxRootSignatureDesc, name: &str) -> GfxResult<GfxRootSignatureHandle> {
        self.pipelines.borrow_mut().create_root_signature(&self.device, &self.bindless, desc, name)
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
        let _span = tracy_client::span!("VkGfx::create_compute_pipeline");
        log::info!("create compute pipeline `{}` from {}", name, shader_path.display());
        self.pipelines.borrow_mut().create_compute_pipeline(
            &self.device,
            name,
            shader_path,
            &desc.entry_point,
            desc.root_signature,
        )
    }

    fn compute_pso(&self, name: &str) -> Option<GfxPipelineHandle> {
        self.pipelines.borrow().compute_names.get(name).copied()
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &GfxRayTracingPipelineDesc,
        name: &str,
    ) -> GfxResult<GfxRayTracingPipeline> {
        let _span = tracy_client::span!("VkGfx::create_ray_tracing_pipeline");
        log::info!("create ray tracing pipeline `{}` from {}", name, desc.library_path.display());
        let handle = self.pipelines.borrow_mut().create_ray_tracing_pipeline(
            &self.device,
            &self.physical_device.rt_pipeline_props,
            desc,
            name,
        )?;
        Ok(GfxRayTracingPipeline::new(handle, name))
    }

    fn shader_identifier(&self, pipeline: &GfxRayTracingPipeline, export: &str) -> GfxResult<Vec<u8>> {
        self.pipelines
            .borrow()
            .ray_tracing
            .get(pipeline.handle())
            .ok_or(GfxError::InvalidHandle("ray tracing pipeline"))?
            .shader_identifier(export)
    }
}
