use std::{ffi::CString, path::Path};

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    error::{GfxError, GfxResult},
    pipelines::{
        pipeline_desc::{GfxRayTracingPipelineDesc, GfxShaderStage},
        root_signature::{GfxRootSignatureDesc, GfxStaticSampler},
    },
    resources::handles::{GfxPipelineHandle, GfxRayTracingPipelineHandle, GfxRootSignatureHandle},
    vulkan::{VkResultExt, conv, descriptor_heap::VkBindlessLayout, device::VkDeviceFunctions},
};

/// 每个 root parameter 在 push constant 中占用的字节数
pub(crate) const ROOT_PARAMETER_SIZE: u32 = 8;

/// push constant 对所有可能用到的 stage 可见
pub(crate) const ROOT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::COMPUTE.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::ANY_HIT_KHR.as_raw(),
);

/// set 0 为 bindless set；存在 static sampler 时 set 1 为 immutable sampler set
pub(crate) struct VkRootSignature {
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) sampler_set: Option<vk::DescriptorSet>,
    sampler_set_layout: vk::DescriptorSetLayout,
    sampler_pool: vk::DescriptorPool,
    samplers: Vec<vk::Sampler>,
}

pub(crate) struct VkComputePipeline {
    pub(crate) pipeline: vk::Pipeline,
}

pub(crate) struct VkRayTracingPipeline {
    pub(crate) pipeline: vk::Pipeline,
    /// 导出名 -> shader group 序号
    group_indices: IndexMap<String, u32>,
    /// 所有 shader group 的 handle，按 group 序号排列
    group_handles: Vec<u8>,
    handle_size: u32,
}

impl VkRayTracingPipeline {
    pub fn shader_identifier(&self, export: &str) -> GfxResult<Vec<u8>> {
        let group = *self.group_indices.get(export).ok_or_else(|| GfxError::MissingShaderExport(export.to_string()))?;
        let start = (group * self.handle_size) as usize;
        Ok(self.group_handles[start..start + self.handle_size as usize].to_vec())
    }
}

#[derive(Default)]
pub(crate) struct VkPipelineStore {
    pub(crate) root_signatures: SlotMap<GfxRootSignatureHandle, VkRootSignature>,
    pub(crate) compute: SlotMap<GfxPipelineHandle, VkComputePipeline>,
    pub(crate) compute_names: IndexMap<String, GfxPipelineHandle>,
    pub(crate) ray_tracing: SlotMap<GfxRayTracingPipelineHandle, VkRayTracingPipeline>,
}

// root signature
impl VkPipelineStore {
    pub fn create_root_signature(
        &mut self,
        device: &VkDeviceFunctions,
        bindless: &VkBindlessLayout,
        desc: &GfxRootSignatureDesc,
        name: &str,
    ) -> GfxResult<GfxRootSignatureHandle> {
        let mut root_signature = VkRootSignature {
            layout: vk::PipelineLayout::null(),
            sampler_set: None,
            sampler_set_layout: vk::DescriptorSetLayout::null(),
            sampler_pool: vk::DescriptorPool::null(),
            samplers: Vec::new(),
        };
        if let Err(e) = Self::init_root_signature(&mut root_signature, device, bindless, desc, name) {
            root_signature.destroy(device);
            return Err(e);
        }
        Ok(self.root_signatures.insert(root_signature))
    }

    fn init_root_signature(
        root_signature: &mut VkRootSignature,
        device: &VkDeviceFunctions,
        bindless: &VkBindlessLayout,
        desc: &GfxRootSignatureDesc,
        name: &str,
    ) -> GfxResult<()> {
        let mut set_layouts = vec![bindless.set_layout];

        if !desc.static_samplers.is_empty() {
            for sampler in &desc.static_samplers {
                root_signature.samplers.push(create_sampler(device, sampler)?);
            }
            let bindings = desc
                .static_samplers
                .iter()
                .zip(&root_signature.samplers)
                .map(|(sampler_desc, sampler)| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(sampler_desc.shader_register)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .descriptor_count(1)
                        .stage_flags(ROOT_STAGES)
                        .immutable_samplers(std::slice::from_ref(sampler))
                })
                .collect_vec();
            let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            root_signature.sampler_set_layout = unsafe { device.device.create_descriptor_set_layout(&layout_ci, None) }
                .or_gfx("vkCreateDescriptorSetLayout")?;

            let pool_sizes = [vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: bindings.len() as u32,
            }];
            let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes);
            root_signature.sampler_pool =
                unsafe { device.device.create_descriptor_pool(&pool_ci, None) }.or_gfx("vkCreateDescriptorPool")?;

            let layouts = [root_signature.sampler_set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(root_signature.sampler_pool)
                .set_layouts(&layouts);
            let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
                .or_gfx("vkAllocateDescriptorSets")?;
            root_signature.sampler_set = sets.first().copied();
            set_layouts.push(root_signature.sampler_set_layout);
        }

        let push_constant_size = (desc.parameters.len() as u32 * ROOT_PARAMETER_SIZE).max(ROOT_PARAMETER_SIZE);
        let push_constant_range =
            vk::PushConstantRange::default().stage_flags(ROOT_STAGES).offset(0).size(push_constant_size);
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        root_signature.layout =
            unsafe { device.device.create_pipeline_layout(&layout_ci, None) }.or_gfx("vkCreatePipelineLayout")?;
        device.set_object_debug_name(root_signature.layout, &format!("PipelineLayout::{name}"));
        Ok(())
    }
}

// compute pipeline
impl VkPipelineStore {
    pub fn create_compute_pipeline(
        &mut self,
        device: &VkDeviceFunctions,
        name: &str,
        shader_path: &Path,
        entry_point: &str,
        root_signature: GfxRootSignatureHandle,
    ) -> GfxResult<GfxPipelineHandle> {
        let layout = self
            .root_signatures
            .get(root_signature)
            .ok_or(GfxError::InvalidHandle("root signature"))?
            .layout;

        let entry_point = CString::new(entry_point)
            .map_err(|_| GfxError::Unsupported(format!("entry point of `{name}` contains NUL")))?;
        let module = load_shader_module(device, shader_path)?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(layout);

        let pipeline = unsafe {
            device.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        unsafe {
            device.device.destroy_shader_module(module, None);
        }
        let pipeline = pipeline.map_err(|(_, e)| e).or_gfx("vkCreateComputePipelines")?[0];
        device.set_object_debug_name(pipeline, &format!("ComputePipeline::{name}"));

        let handle = self.compute.insert(VkComputePipeline { pipeline });
        self.compute_names.insert(name.to_string(), handle);
        Ok(handle)
    }
}

// ray tracing pipeline
impl VkPipelineStore {
    pub fn create_ray_tracing_pipeline(
        &mut self,
        device: &VkDeviceFunctions,
        rt_props: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,
        desc: &GfxRayTracingPipelineDesc,
        name: &str,
    ) -> GfxResult<GfxRayTracingPipelineHandle> {
        let layout = self
            .root_signatures
            .get(desc.global_root_signature)
            .ok_or(GfxError::InvalidHandle("root signature"))?
            .layout;

        let entry_names: Vec<CString> = desc
            .exports
            .iter()
            .map(|export| {
                CString::new(export.name.as_str())
                    .map_err(|_| GfxError::Unsupported(format!("export `{}` contains NUL", export.name)))
            })
            .collect::<GfxResult<_>>()?;

        let module = load_shader_module(device, &desc.library_path)?;
        let stage_infos = desc
            .exports
            .iter()
            .zip(&entry_names)
            .map(|(export, entry_name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk_shader_stage(export.stage))
                    .module(module)
                    .name(entry_name)
            })
            .collect_vec();

        let stage_index = |export: &str| desc.exports.iter().position(|e| e.name == export).map(|i| i as u32);

        // raygen 与 miss 各自成为一个 general group，之后是 hit group
        let mut group_indices = IndexMap::new();
        let mut shader_groups = Vec::new();
        for (index, export) in desc.exports.iter().enumerate() {
            if matches!(export.stage, GfxShaderStage::RayGen | GfxShaderStage::Miss) {
                group_indices.insert(export.name.clone(), shader_groups.len() as u32);
                shader_groups.push(
                    vk::RayTracingShaderGroupCreateInfoKHR::default()
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(index as u32)
                        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                        .any_hit_shader(vk::SHADER_UNUSED_KHR)
                        .intersection_shader(vk::SHADER_UNUSED_KHR),
                );
            }
        }
        for hit_group in &desc.hit_groups {
            let lookup = |export: &Option<String>| -> GfxResult<u32> {
                match export {
                    Some(export) => stage_index(export).ok_or_else(|| GfxError::MissingShaderExport(export.clone())),
                    None => Ok(vk::SHADER_UNUSED_KHR),
                }
            };
            let closest_hit = lookup(&hit_group.closest_hit);
            let any_hit = lookup(&hit_group.any_hit);
            let (closest_hit, any_hit) = match (closest_hit, any_hit) {
                (Ok(closest_hit), Ok(any_hit)) => (closest_hit, any_hit),
                (Err(e), _) | (_, Err(e)) => {
                    unsafe { device.device.destroy_shader_module(module, None) };
                    return Err(e);
                }
            };
            group_indices.insert(hit_group.name.clone(), shader_groups.len() as u32);
            shader_groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(closest_hit)
                    .any_hit_shader(any_hit)
                    .intersection_shader(vk::SHADER_UNUSED_KHR),
            );
        }

        log::debug!(
            "ray tracing pipeline `{}`: payload {} bytes, attributes {} bytes",
            name,
            desc.max_payload_size,
            desc.max_attribute_size
        );
        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&shader_groups)
            .layout(layout)
            // 这个仅仅是用来分配栈内存的，并不会在超过递归深度后让调用被丢弃
            .max_pipeline_ray_recursion_depth(desc.max_recursion_depth);

        let pipeline = unsafe {
            device.ray_tracing_pipeline.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        unsafe {
            device.device.destroy_shader_module(module, None);
        }
        let pipeline = pipeline.map_err(|(_, e)| e).or_gfx("vkCreateRayTracingPipelinesKHR")?[0];
        device.set_object_debug_name(pipeline, &format!("RayTracingPipeline::{name}"));

        let handle_size = rt_props.shader_group_handle_size;
        let group_count = shader_groups.len() as u32;
        let group_handles = unsafe {
            device.ray_tracing_pipeline.get_ray_tracing_shader_group_handles(
                pipeline,
                0,
                group_count,
                (group_count * handle_size) as usize,
            )
        };
        let group_handles = match group_handles {
            Ok(handles) => handles,
            Err(e) => {
                unsafe { device.device.destroy_pipeline(pipeline, None) };
                return Err(GfxError::device("vkGetRayTracingShaderGroupHandlesKHR", e.as_raw(), format!("{e:?}")));
            }
        };

        Ok(self.ray_tracing.insert(VkRayTracingPipeline {
            pipeline,
            group_indices,
            group_handles,
            handle_size,
        }))
    }
}

// destroy
impl VkPipelineStore {
    pub fn destroy(&mut self, device: &VkDeviceFunctions) {
        unsafe {
            for (_, pipeline) in self.ray_tracing.drain() {
                device.device.destroy_pipeline(pipeline.pipeline, None);
            }
            for (_, pipeline) in self.compute.drain() {
                device.device.destroy_pipeline(pipeline.pipeline, None);
            }
        }
        self.compute_names.clear();
        for (_, root_signature) in self.root_signatures.drain() {
            root_signature.destroy(device);
        }
    }
}

impl VkRootSignature {
    fn destroy(self, device: &VkDeviceFunctions) {
        unsafe {
            if self.layout != vk::PipelineLayout::null() {
                device.device.destroy_pipeline_layout(self.layout, None);
            }
            if self.sampler_pool != vk::DescriptorPool::null() {
                device.device.destroy_descriptor_pool(self.sampler_pool, None);
            }
            if self.sampler_set_layout != vk::DescriptorSetLayout::null() {
                device.device.destroy_descriptor_set_layout(self.sampler_set_layout, None);
            }
            for sampler in self.samplers {
                device.device.destroy_sampler(sampler, None);
            }
        }
    }
}

fn vk_shader_stage(stage: GfxShaderStage) -> vk::ShaderStageFlags {
    match stage {
        GfxShaderStage::RayGen => vk::ShaderStageFlags::RAYGEN_KHR,
        GfxShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
        GfxShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        GfxShaderStage::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
    }
}

fn load_shader_module(device: &VkDeviceFunctions, path: &Path) -> GfxResult<vk::ShaderModule> {
    let mut file = std::fs::File::open(path)?;
    let shader_code = ash::util::read_spv(&mut file)?;
    let shader_module_ci = vk::ShaderModuleCreateInfo::default().code(&shader_code);
    let module =
        unsafe { device.device.create_shader_module(&shader_module_ci, None) }.or_gfx("vkCreateShaderModule")?;
    device.set_object_debug_name(module, &path.to_string_lossy());
    Ok(module)
}

fn create_sampler(device: &VkDeviceFunctions, desc: &GfxStaticSampler) -> GfxResult<vk::Sampler> {
    let (filter, mipmap_mode) = conv::vk_filter(desc.filter);
    let address_mode = conv::vk_address_mode(desc.address_mode);
    let sampler_ci = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .max_lod(vk::LOD_CLAMP_NONE);
    unsafe { device.device.create_sampler(&sampler_ci, None) }.or_gfx("vkCreateSampler")
}
