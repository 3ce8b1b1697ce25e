use std::{ffi::CString, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    basic::color::LabelColor,
    commands::{
        barrier::GfxBarrier,
        command_list::{GfxCommandList, GfxDispatchRaysDesc, GfxTextureCopyLayout},
    },
    descriptors::view_desc::GfxGpuDescriptorHandle,
    error::{GfxError, GfxResult},
    raytracing::acceleration_inputs::GfxBuildAccelerationStructureDesc,
    resources::handles::{
        GfxDescriptorHeapHandle, GfxGpuAddress, GfxPipelineHandle, GfxRayTracingPipelineHandle, GfxResourceHandle,
        GfxRootSignatureHandle,
    },
    vulkan::{
        VkGfx, VkResultExt,
        acceleration::VkAccelerationGeometry,
        barrier::{VkBufferBarrier, VkImageBarrier},
        conv::{self, VkResourceState},
        pipelines::{ROOT_PARAMETER_SIZE, ROOT_STAGES},
        resources::VkResourceKind,
    },
};

/// 当前绑定的 root signature
#[derive(Clone, Copy)]
struct VkBoundRootSignature {
    layout: vk::PipelineLayout,
    sampler_set: Option<vk::DescriptorSet>,
}

/// 一次录制，多次提交的 command list
///
/// execute 之后会自动开始新的 command buffer，flush 会等待队列空闲并回收已提交的 command buffer
pub struct VkCommandList {
    gfx: Rc<VkGfx>,
    name: String,

    pool: vk::CommandPool,
    current: vk::CommandBuffer,
    in_flight: Vec<vk::CommandBuffer>,

    bound_heap: Option<vk::DescriptorSet>,
    bound_root_signature: Option<VkBoundRootSignature>,
}

// new & init
impl VkCommandList {
    pub fn new(gfx: &Rc<VkGfx>, name: impl AsRef<str>) -> GfxResult<Self> {
        let name = name.as_ref().to_string();
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(gfx.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { gfx.device.device.create_command_pool(&pool_ci, None) }.or_gfx("vkCreateCommandPool")?;
        gfx.device.set_object_debug_name(pool, &format!("CommandPool::{name}"));

        let mut cmd = Self {
            gfx: gfx.clone(),
            name,
            pool,
            current: vk::CommandBuffer::null(),
            in_flight: Vec::new(),
            bound_heap: None,
            bound_root_signature: None,
        };
        cmd.current = cmd.begin_new_buffer()?;
        Ok(cmd)
    }

    fn begin_new_buffer(&mut self) -> GfxResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { self.gfx.device.device.allocate_command_buffers(&alloc_info) }
            .or_gfx("vkAllocateCommandBuffers")?[0];
        self.gfx.device.set_object_debug_name(buffer, &format!("CommandBuffer::{}", self.name));

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.gfx.device.device.begin_command_buffer(buffer, &begin_info) }.or_gfx("vkBeginCommandBuffer")?;

        // 新的 command buffer 不继承任何绑定
        self.bound_heap = None;
        self.bound_root_signature = None;
        Ok(buffer)
    }
}

impl Drop for VkCommandList {
    fn drop(&mut self) {
        log::debug!("destroying command list: {}", self.name);
        self.gfx.device.wait_idle();
        unsafe {
            let device = &self.gfx.device.device;
            // 未提交的录制内容直接丢弃
            let _ = device.end_command_buffer(self.current);
            self.in_flight.push(self.current);
            device.free_command_buffers(self.pool, &self.in_flight);
            device.destroy_command_pool(self.pool, None);
        }
    }
}

// tools
impl VkCommandList {
    /// descriptor heap 与 root signature 都确定之后才能绑定 descriptor set
    fn bind_descriptor_sets(&self) {
        let (Some(heap_set), Some(root_signature)) = (self.bound_heap, self.bound_root_signature) else {
            return;
        };
        let sets = match root_signature.sampler_set {
            Some(sampler_set) => vec![heap_set, sampler_set],
            None => vec![heap_set],
        };
        for bind_point in [vk::PipelineBindPoint::COMPUTE, vk::PipelineBindPoint::RAY_TRACING_KHR] {
            unsafe {
                self.gfx.device.device.cmd_bind_descriptor_sets(
                    self.current,
                    bind_point,
                    root_signature.layout,
                    0,
                    &sets,
                    &[],
                );
            }
        }
    }

    fn push_root_parameter(&self, root_index: u32, bytes: &[u8]) {
        let Some(root_signature) = self.bound_root_signature else {
            log::error!("[{}] root parameter {} set without a root signature", self.name, root_index);
            return;
        };
        unsafe {
            self.gfx.device.device.cmd_push_constants(
                self.current,
                root_signature.layout,
                ROOT_STAGES,
                root_index * ROOT_PARAMETER_SIZE,
                bytes,
            );
        }
    }

    fn record_barriers(&self, barriers: &[GfxBarrier]) -> GfxResult<()> {
        let mut resources = self.gfx.resources.borrow_mut();
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut memory_barriers = Vec::new();

        for barrier in barriers {
            match *barrier {
                GfxBarrier::Transition {
                    resource,
                    before,
                    after,
                } => {
                    let resource = resources.get_mut(resource).ok_or(GfxError::InvalidHandle("resource"))?;
                    let first_use = resource.take_uninitialized_layout();
                    let src = if first_use { VkResourceState::UNDEFINED } else { VkResourceState::from(before) };
                    let dst = VkResourceState::from(after);
                    match &resource.kind {
                        VkResourceKind::Texture { image, .. } => image_barriers.push(
                            *VkImageBarrier::new()
                                .image(*image)
                                .image_aspect_flag(conv::vk_aspect(resource.desc.format))
                                .layout_transfer(src.layout, dst.layout)
                                .src_mask(src.stage, src.src_access())
                                .dst_mask(dst.stage, dst.access)
                                .inner(),
                        ),
                        VkResourceKind::Buffer { buffer, .. } => buffer_barriers.push(
                            *VkBufferBarrier::new()
                                .buffer(*buffer)
                                .src_mask(src.stage, src.src_access())
                                .dst_mask(dst.stage, dst.access)
                                .inner(),
                        ),
                    }
                }
                GfxBarrier::Uav { .. } => {
                    let state = VkResourceState::STORAGE_READ_WRITE;
                    memory_barriers.push(
                        vk::MemoryBarrier2::default()
                            .src_stage_mask(state.stage)
                            .src_access_mask(state.src_access())
                            .dst_stage_mask(state.stage)
                            .dst_access_mask(state.access),
                    );
                }
            }
        }

        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .memory_barriers(&memory_barriers);
        unsafe {
            self.gfx.device.device.cmd_pipeline_barrier2(self.current, &dependency_info);
        }
        Ok(())
    }

    fn record_copy_buffer_to_texture(
        &self,
        dst: GfxResourceHandle,
        src: GfxResourceHandle,
        layout: &GfxTextureCopyLayout,
    ) -> GfxResult<()> {
        let mut resources = self.gfx.resources.borrow_mut();
        let src_buffer = resources.get(src).ok_or(GfxError::InvalidHandle("resource"))?.vk_buffer()?;
        let dst_resource = resources.get_mut(dst).ok_or(GfxError::InvalidHandle("resource"))?;
        let dst_image = dst_resource.vk_image()?;
        let aspect = conv::vk_aspect(dst_resource.desc.format);

        // copy 之前 image 必须已经离开 UNDEFINED layout
        if dst_resource.take_uninitialized_layout() {
            let dst_state = VkResourceState::TRANSFER_DST;
            let barrier = *VkImageBarrier::new()
                .image(dst_image)
                .image_aspect_flag(aspect)
                .layout_transfer(vk::ImageLayout::UNDEFINED, dst_state.layout)
                .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
                .dst_mask(dst_state.stage, dst_state.access)
                .inner();
            let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
            unsafe {
                self.gfx.device.device.cmd_pipeline_barrier2(self.current, &dependency_info);
            }
        }

        let pixel_size = layout.format.pixel_size().max(1);
        let region = vk::BufferImageCopy::default()
            .buffer_offset(layout.offset)
            .buffer_row_length(layout.row_pitch / pixel_size)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: layout.mip_level,
                base_array_layer: layout.array_slice,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: layout.width,
                height: layout.height,
                depth: 1,
            });
        unsafe {
            self.gfx.device.device.cmd_copy_buffer_to_image(
                self.current,
                src_buffer,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
        Ok(())
    }

    fn record_build_acceleration_structure(&self, desc: &GfxBuildAccelerationStructureDesc) -> GfxResult<()> {
        let dst = self
            .gfx
            .resources
            .borrow()
            .get(desc.dest)
            .ok_or(GfxError::InvalidHandle("resource"))?
            .acceleration_structure()?;
        let geometry = VkAccelerationGeometry::new(&desc.inputs);
        let build_info = geometry
            .build_info()
            .dst_acceleration_structure(dst)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: desc.scratch,
            });

        let label = CString::new(format!("build {}", desc.inputs.level_name())).unwrap_or_default();
        unsafe {
            self.gfx.device.debug_utils.cmd_begin_debug_utils_label(
                self.current,
                &vk::DebugUtilsLabelEXT::default().label_name(&label).color(LabelColor::COLOR_BUILD.into()),
            );
            self.gfx.device.acceleration_structure.cmd_build_acceleration_structures(
                self.current,
                std::slice::from_ref(&build_info),
                &[geometry.ranges.as_slice()],
            );
            self.gfx.device.debug_utils.cmd_end_debug_utils_label(self.current);
        }
        Ok(())
    }

    fn record_submit(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("VkCommandList::execute");
        let device = &self.gfx.device.device;
        unsafe { device.end_command_buffer(self.current) }.or_gfx("vkEndCommandBuffer")?;

        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(self.current);
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&cmd_info));
        unsafe { device.queue_submit2(self.gfx.queue, std::slice::from_ref(&submit_info), vk::Fence::null()) }
            .or_gfx("vkQueueSubmit2")?;

        self.in_flight.push(self.current);
        self.current = self.begin_new_buffer()?;
        Ok(())
    }
}

/// 录制失败时资源的跟踪状态已经前进，与实际执行的命令不再一致：debug 下直接中止
fn report_recording(cmd_name: &str, what: &str, result: GfxResult<()>) {
    if let Err(e) = &result {
        log::error!("[{cmd_name}] {what} failed: {e}");
    }
    debug_assert!(result.is_ok(), "[{cmd_name}] {what} failed");
}

impl GfxCommandList for VkCommandList {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]) {
        if barriers.is_empty() {
            return;
        }
        report_recording(&self.name, "resource barrier", self.record_barriers(barriers));
    }

    fn copy_buffer_to_texture(&mut self, dst: GfxResourceHandle, src: GfxResourceHandle, layout: &GfxTextureCopyLayout) {
        report_recording(&self.name, "copy buffer to texture", self.record_copy_buffer_to_texture(dst, src, layout));
    }

    fn set_descriptor_heaps(&mut self, heaps: &[GfxDescriptorHeapHandle]) {
        let gfx_heaps = self.gfx.heaps.borrow();
        // 只有 shader-visible heap 有对应的 descriptor set
        let sets = heaps
            .iter()
            .filter_map(|heap| gfx_heaps.get(*heap))
            .filter(|heap| heap.desc.shader_visible)
            .map(|heap| heap.set)
            .collect_vec();
        drop(gfx_heaps);
        if sets.len() > 1 {
            log::error!("[{}] only one shader visible heap can be bound", self.name);
            return;
        }
        self.bound_heap = sets.first().copied();
        self.bind_descriptor_sets();
    }

    fn set_compute_root_signature(&mut self, root_signature: GfxRootSignatureHandle) {
        let bound = self.gfx.pipelines.borrow().root_signatures.get(root_signature).map(|rs| VkBoundRootSignature {
            layout: rs.layout,
            sampler_set: rs.sampler_set,
        });
        match bound {
            Some(bound) => {
                self.bound_root_signature = Some(bound);
                self.bind_descriptor_sets();
            }
            None => log::error!("[{}] invalid root signature handle", self.name),
        }
    }

    fn set_pipeline_state(&mut self, pipeline: GfxPipelineHandle) {
        let Some(pipeline) = self.gfx.pipelines.borrow().compute.get(pipeline).map(|p| p.pipeline) else {
            log::error!("[{}] invalid compute pipeline handle", self.name);
            return;
        };
        unsafe {
            self.gfx.device.device.cmd_bind_pipeline(self.current, vk::PipelineBindPoint::COMPUTE, pipeline);
        }
    }

    /// bindless 下 descriptor table 只是一个起始下标
    fn set_compute_root_descriptor_table(&mut self, root_index: u32, table: GfxGpuDescriptorHandle) {
        if !self.gfx.heaps.borrow().contains_key(table.heap) {
            log::error!("[{}] invalid descriptor heap handle", self.name);
            return;
        }
        let index = table.offset as u32;
        self.push_root_parameter(root_index, bytemuck::bytes_of(&index));
    }

    fn set_compute_root_constant_buffer_view(&mut self, root_index: u32, address: GfxGpuAddress) {
        self.push_root_parameter(root_index, bytemuck::bytes_of(&address));
    }

    fn set_compute_root_shader_resource_view(&mut self, root_index: u32, address: GfxGpuAddress) {
        self.push_root_parameter(root_index, bytemuck::bytes_of(&address));
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.gfx.device.device.cmd_dispatch(self.current, group_count_x, group_count_y, group_count_z);
        }
    }

    fn build_raytracing_acceleration_structure(&mut self, desc: &GfxBuildAccelerationStructureDesc) {
        report_recording(&self.name, "build acceleration structure", self.record_build_acceleration_structure(desc));
    }

    fn set_ray_tracing_pipeline(&mut self, pipeline: GfxRayTracingPipelineHandle) {
        let Some(pipeline) = self.gfx.pipelines.borrow().ray_tracing.get(pipeline).map(|p| p.pipeline) else {
            log::error!("[{}] invalid ray tracing pipeline handle", self.name);
            return;
        };
        unsafe {
            self.gfx.device.device.cmd_bind_pipeline(self.current, vk::PipelineBindPoint::RAY_TRACING_KHR, pipeline);
        }
    }

    fn dispatch_rays(&mut self, desc: &GfxDispatchRaysDesc) {
        // raygen 区域的 stride 必须等于 size
        let raygen = vk::StridedDeviceAddressRegionKHR::default()
            .device_address(desc.ray_generation.start)
            .stride(desc.ray_generation.size)
            .size(desc.ray_generation.size);
        let miss = vk::StridedDeviceAddressRegionKHR::default()
            .device_address(desc.miss.start)
            .stride(desc.miss.stride)
            .size(desc.miss.size);
        let hit = vk::StridedDeviceAddressRegionKHR::default()
            .device_address(desc.hit_group.start)
            .stride(desc.hit_group.stride)
            .size(desc.hit_group.size);
        let callable = vk::StridedDeviceAddressRegionKHR::default();
        unsafe {
            self.gfx.device.ray_tracing_pipeline.cmd_trace_rays(
                self.current,
                &raygen,
                &miss,
                &hit,
                &callable,
                desc.width,
                desc.height,
                desc.depth,
            );
        }
    }

    fn begin_event(&mut self, name: &str) {
        let name = CString::new(name).unwrap_or_default();
        unsafe {
            self.gfx.device.debug_utils.cmd_begin_debug_utils_label(
                self.current,
                &vk::DebugUtilsLabelEXT::default().label_name(&name).color(LabelColor::COLOR_EVENT.into()),
            );
        }
    }

    fn end_event(&mut self) {
        unsafe {
            self.gfx.device.debug_utils.cmd_end_debug_utils_label(self.current);
        }
    }

    fn execute(&mut self) -> GfxResult<()> {
        self.record_submit()
    }

    fn flush(&mut self) -> GfxResult<()> {
        self.record_submit()?;
        let _span = tracy_client::span!("VkCommandList::flush");
        unsafe {
            self.gfx.device.device.queue_wait_idle(self.gfx.queue).or_gfx("vkQueueWaitIdle")?;
            if !self.in_flight.is_empty() {
                self.gfx.device.device.free_command_buffers(self.pool, &self.in_flight);
            }
        }
        self.in_flight.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_recording_is_silent() {
        report_recording("cmd", "resource barrier", Ok(()));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "resource barrier failed")]
    fn test_failed_recording_aborts_in_debug() {
        report_recording("cmd", "resource barrier", Err(GfxError::InvalidHandle("resource")));
    }
}
