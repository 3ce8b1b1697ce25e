use ash::vk;

use crate::{
    descriptors::view_desc::{GfxDescriptorHeapDesc, GfxSrvDimension, GfxUavDimension, GfxViewDesc},
    error::{GfxError, GfxResult},
    resources::resource_desc::GfxResourceDesc,
    vulkan::{VkResultExt, conv, device::VkDeviceFunctions},
};

pub(crate) const BINDLESS_SAMPLED_BINDING: u32 = 0;
pub(crate) const BINDLESS_STORAGE_BINDING: u32 = 1;
/// 单个 shader-visible heap 的最大容量
pub(crate) const MAX_BINDLESS_DESCRIPTORS: u32 = 4096;

/// 所有 shader-visible heap 共用的 descriptor set layout
pub(crate) struct VkBindlessLayout {
    pub(crate) set_layout: vk::DescriptorSetLayout,
}

impl VkBindlessLayout {
    pub fn new(device: &VkDeviceFunctions) -> GfxResult<Self> {
        let bindings = [
            (BINDLESS_SAMPLED_BINDING, vk::DescriptorType::SAMPLED_IMAGE),
            (BINDLESS_STORAGE_BINDING, vk::DescriptorType::STORAGE_IMAGE),
        ]
        .map(|(binding, ty)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(MAX_BINDLESS_DESCRIPTORS)
                .stage_flags(vk::ShaderStageFlags::ALL)
        });
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 2];
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_ci);
        let set_layout = unsafe { device.device.create_descriptor_set_layout(&layout_ci, None) }
            .or_gfx("vkCreateDescriptorSetLayout")?;
        device.set_object_debug_name(set_layout, "bindless-layout");
        Ok(Self { set_layout })
    }

    pub fn destroy(&self, device: &VkDeviceFunctions) {
        unsafe {
            device.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// shader-visible heap 持有一个 bindless descriptor set；
/// CPU-only heap 只保存每个 slot 的 image view
pub(crate) struct VkDescriptorHeap {
    pub(crate) desc: GfxDescriptorHeapDesc,
    pool: vk::DescriptorPool,
    pub(crate) set: vk::DescriptorSet,
    views: Vec<vk::ImageView>,
    /// 被覆写的 view 可能仍被已提交的命令使用，统一在 heap 销毁时释放
    retired_views: Vec<vk::ImageView>,
}

// new & init
impl VkDescriptorHeap {
    pub fn new(
        device: &VkDeviceFunctions,
        bindless: &VkBindlessLayout,
        desc: &GfxDescriptorHeapDesc,
        name: &str,
    ) -> GfxResult<Self> {
        let mut heap = Self {
            desc: *desc,
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            views: vec![vk::ImageView::null(); desc.capacity as usize],
            retired_views: Vec::new(),
        };
        if !desc.shader_visible {
            return Ok(heap);
        }
        if desc.capacity > MAX_BINDLESS_DESCRIPTORS {
            return Err(GfxError::Unsupported(format!(
                "heap `{name}` capacity {} exceeds {MAX_BINDLESS_DESCRIPTORS}",
                desc.capacity
            )));
        }

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_BINDLESS_DESCRIPTORS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_BINDLESS_DESCRIPTORS,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        heap.pool = unsafe { device.device.create_descriptor_pool(&pool_ci, None) }.or_gfx("vkCreateDescriptorPool")?;
        device.set_object_debug_name(heap.pool, &format!("DescriptorPool::{name}"));

        let set_layouts = [bindless.set_layout];
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(heap.pool).set_layouts(&set_layouts);
        let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) };
        match sets {
            Ok(sets) => heap.set = sets[0],
            Err(e) => {
                heap.destroy(device);
                return Err(GfxError::device("vkAllocateDescriptorSets", e.as_raw(), format!("{e:?}")));
            }
        }
        device.set_object_debug_name(heap.set, &format!("DescriptorSet::{name}"));
        Ok(heap)
    }

    pub fn destroy(self, device: &VkDeviceFunctions) {
        unsafe {
            for view in self.views.into_iter().chain(self.retired_views) {
                if view != vk::ImageView::null() {
                    device.device.destroy_image_view(view, None);
                }
            }
            if self.pool != vk::DescriptorPool::null() {
                device.device.destroy_descriptor_pool(self.pool, None);
            }
        }
    }
}

// tools
impl VkDescriptorHeap {
    /// `image` 为 None 时写入 null descriptor
    pub fn write(
        &mut self,
        device: &VkDeviceFunctions,
        index: u32,
        image: Option<(vk::Image, &GfxResourceDesc)>,
        view: &GfxViewDesc,
    ) -> GfxResult<()> {
        let len = self.views.len() as u64;
        let slot = self.views.get_mut(index as usize).ok_or(GfxError::OutOfRange {
            what: "descriptor slot",
            index: index as u64,
            len,
        })?;

        let image_view = match image {
            Some((image, resource_desc)) => create_image_view(device, image, resource_desc, view)?,
            None => vk::ImageView::null(),
        };
        let old_view = std::mem::replace(slot, image_view);
        if old_view != vk::ImageView::null() {
            self.retired_views.push(old_view);
        }

        if !self.desc.shader_visible {
            return Ok(());
        }
        let (binding, ty, layout) = match view {
            GfxViewDesc::Srv(_) => (
                BINDLESS_SAMPLED_BINDING,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            GfxViewDesc::Uav(_) => {
                (BINDLESS_STORAGE_BINDING, vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL)
            }
            GfxViewDesc::Rtv(_) => {
                return Err(GfxError::Unsupported("render target view in a shader-visible heap".to_string()));
            }
        };
        let image_info = [vk::DescriptorImageInfo::default().image_view(image_view).image_layout(layout)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(index)
            .descriptor_type(ty)
            .image_info(&image_info);
        unsafe {
            device.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }
}

fn create_image_view(
    device: &VkDeviceFunctions,
    image: vk::Image,
    resource_desc: &GfxResourceDesc,
    view: &GfxViewDesc,
) -> GfxResult<vk::ImageView> {
    let (view_type, base_mip_level, level_count, base_array_layer, layer_count) = match view {
        GfxViewDesc::Srv(srv) => match srv.dimension {
            GfxSrvDimension::Texture2D {
                most_detailed_mip,
                mip_levels,
            } => (vk::ImageViewType::TYPE_2D, most_detailed_mip, mip_levels, 0, 1),
            GfxSrvDimension::Texture2DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
            } => (vk::ImageViewType::TYPE_2D_ARRAY, most_detailed_mip, mip_levels, first_array_slice, array_size),
            GfxSrvDimension::TextureCube {
                most_detailed_mip,
                mip_levels,
            } => (vk::ImageViewType::CUBE, most_detailed_mip, mip_levels, 0, 6),
        },
        GfxViewDesc::Uav(uav) => match uav.dimension {
            GfxUavDimension::Texture2D { mip_slice } => (vk::ImageViewType::TYPE_2D, mip_slice, 1, 0, 1),
            GfxUavDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (vk::ImageViewType::TYPE_2D_ARRAY, mip_slice, 1, first_array_slice, array_size),
        },
        GfxViewDesc::Rtv(rtv) => (vk::ImageViewType::TYPE_2D, rtv.mip_slice, 1, 0, 1),
    };

    let format = match view.format() {
        crate::basic::format::GfxFormat::Unknown => resource_desc.format,
        format => format,
    };
    let view_ci = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(conv::vk_format(format))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: conv::vk_aspect(format),
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        });
    unsafe { device.device.create_image_view(&view_ci, None) }.or_gfx("vkCreateImageView")
}
