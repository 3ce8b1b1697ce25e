use ash::vk;
use vk_mem::Alloc;

use crate::{
    error::{GfxError, GfxResult},
    resources::{
        resource_desc::{GfxHeapType, GfxResourceDesc, GfxResourceFlags},
        resource_state::GfxResourceState,
    },
    vulkan::{VkResultExt, conv, device::VkDeviceFunctions},
};

/// buffer 起始地址的对齐，同时满足 constant buffer 与加速结构的要求
const BUFFER_ALIGNMENT: vk::DeviceSize = 256;

pub(crate) enum VkResourceKind {
    Buffer {
        buffer: vk::Buffer,
        allocation: vk_mem::Allocation,
        /// 只有 Upload heap 中的 buffer 才会被映射
        mapped: Option<*mut u8>,
        address: vk::DeviceAddress,
        /// 以 RaytracingAccelerationStructure 状态创建的 buffer 同时持有一个加速结构
        acceleration_structure: Option<vk::AccelerationStructureKHR>,
    },
    Texture {
        image: vk::Image,
        allocation: vk_mem::Allocation,
        /// 第一次 barrier 之前 image 处于 UNDEFINED layout
        layout_initialized: bool,
    },
}

pub(crate) struct VkResource {
    pub desc: GfxResourceDesc,
    pub kind: VkResourceKind,
    pub name: String,
}

// new & init
impl VkResource {
    pub fn new(
        device: &VkDeviceFunctions,
        allocator: &vk_mem::Allocator,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<Self> {
        let kind = if desc.is_buffer() {
            Self::new_buffer(device, allocator, heap_type, desc, initial_state, name)?
        } else {
            if heap_type != GfxHeapType::Default {
                return Err(GfxError::Unsupported(format!("texture `{name}` must live in the default heap")));
            }
            Self::new_texture(device, allocator, desc, name)?
        };
        Ok(Self {
            desc: *desc,
            kind,
            name: name.to_string(),
        })
    }

    fn new_buffer(
        device: &VkDeviceFunctions,
        allocator: &vk_mem::Allocator,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<VkResourceKind> {
        let is_acceleration_structure = initial_state == GfxResourceState::RaytracingAccelerationStructure;

        let mut usage = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        if heap_type == GfxHeapType::Upload {
            usage |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
        }
        if is_acceleration_structure {
            usage |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
        }

        let buffer_ci = vk::BufferCreateInfo::default().size(desc.width).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: match heap_type {
                GfxHeapType::Upload => vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                GfxHeapType::Default => vk_mem::AllocationCreateFlags::empty(),
            },
            ..Default::default()
        };
        let (buffer, mut allocation) =
            unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, BUFFER_ALIGNMENT) }
                .or_gfx("vmaCreateBuffer")?;
        device.set_object_debug_name(buffer, &format!("Buffer::{name}"));

        let mapped = match heap_type {
            GfxHeapType::Upload => Some(unsafe { allocator.map_memory(&mut allocation) }.or_gfx("vmaMapMemory")?),
            GfxHeapType::Default => None,
        };

        let mut address =
            unsafe { device.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer)) };

        let acceleration_structure = if is_acceleration_structure {
            let as_ci = vk::AccelerationStructureCreateInfoKHR::default()
                .ty(vk::AccelerationStructureTypeKHR::GENERIC)
                .buffer(buffer)
                .size(desc.width);
            let handle = unsafe { device.acceleration_structure.create_acceleration_structure(&as_ci, None) }
                .or_gfx("vkCreateAccelerationStructureKHR")?;
            device.set_object_debug_name(handle, &format!("AccelerationStructure::{name}"));
            address = unsafe {
                device.acceleration_structure.get_acceleration_structure_device_address(
                    &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle),
                )
            };
            Some(handle)
        } else {
            None
        };

        Ok(VkResourceKind::Buffer {
            buffer,
            allocation,
            mapped,
            address,
            acceleration_structure,
        })
    }

    fn new_texture(
        device: &VkDeviceFunctions,
        allocator: &vk_mem::Allocator,
        desc: &GfxResourceDesc,
        name: &str,
    ) -> GfxResult<VkResourceKind> {
        let mut usage =
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC;
        if desc.flags.contains(GfxResourceFlags::ALLOW_UNORDERED_ACCESS) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if desc.flags.contains(GfxResourceFlags::ALLOW_RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        let flags = if desc.is_cube_compatible() {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .flags(flags)
            .format(conv::vk_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width as u32,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels as u32)
            .array_layers(desc.depth_or_array_size as u32)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe { allocator.create_image(&image_ci, &alloc_ci) }.or_gfx("vmaCreateImage")?;
        device.set_object_debug_name(image, &format!("Image::{name}"));

        Ok(VkResourceKind::Texture {
            image,
            allocation,
            layout_initialized: false,
        })
    }

    pub fn destroy(mut self, device: &VkDeviceFunctions, allocator: &vk_mem::Allocator) {
        log::debug!("destroying resource: {}", self.name);
        unsafe {
            match &mut self.kind {
                VkResourceKind::Buffer {
                    buffer,
                    allocation,
                    mapped,
                    acceleration_structure,
                    ..
                } => {
                    if let Some(acceleration_structure) = acceleration_structure {
                        device.acceleration_structure.destroy_acceleration_structure(*acceleration_structure, None);
                    }
                    if mapped.is_some() {
                        allocator.unmap_memory(allocation);
                    }
                    allocator.destroy_buffer(*buffer, allocation);
                }
                VkResourceKind::Texture { image, allocation, .. } => {
                    allocator.destroy_image(*image, allocation);
                }
            }
        }
    }
}

// getters
impl VkResource {
    pub fn gpu_address(&self) -> GfxResult<vk::DeviceAddress> {
        match &self.kind {
            VkResourceKind::Buffer { address, .. } => Ok(*address),
            VkResourceKind::Texture { .. } => {
                Err(GfxError::Unsupported(format!("texture `{}` has no gpu address", self.name)))
            }
        }
    }

    pub fn vk_buffer(&self) -> GfxResult<vk::Buffer> {
        match &self.kind {
            VkResourceKind::Buffer { buffer, .. } => Ok(*buffer),
            VkResourceKind::Texture { .. } => Err(GfxError::Unsupported(format!("`{}` is not a buffer", self.name))),
        }
    }

    pub fn vk_image(&self) -> GfxResult<vk::Image> {
        match &self.kind {
            VkResourceKind::Texture { image, .. } => Ok(*image),
            VkResourceKind::Buffer { .. } => Err(GfxError::Unsupported(format!("`{}` is not a texture", self.name))),
        }
    }

    pub fn acceleration_structure(&self) -> GfxResult<vk::AccelerationStructureKHR> {
        match &self.kind {
            VkResourceKind::Buffer {
                acceleration_structure: Some(handle),
                ..
            } => Ok(*handle),
            _ => Err(GfxError::Unsupported(format!("`{}` is not an acceleration structure", self.name))),
        }
    }
}

// tools
impl VkResource {
    pub fn write_mapped(&self, allocator: &vk_mem::Allocator, offset: u64, data: &[u8]) -> GfxResult<()> {
        let VkResourceKind::Buffer {
            mapped: Some(ptr),
            allocation,
            ..
        } = &self.kind
        else {
            return Err(GfxError::Unsupported(format!("`{}` is not mappable", self.name)));
        };
        let end = offset + data.len() as u64;
        if end > self.desc.width {
            return Err(GfxError::OutOfRange {
                what: "mapped byte",
                index: end,
                len: self.desc.width,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        allocator.flush_allocation(allocation, offset, data.len() as vk::DeviceSize).or_gfx("vmaFlushAllocation")
    }

    /// 第一次使用 image 时返回 true，并将其标记为已初始化
    pub fn take_uninitialized_layout(&mut self) -> bool {
        match &mut self.kind {
            VkResourceKind::Texture { layout_initialized, .. } => !std::mem::replace(layout_initialized, true),
            VkResourceKind::Buffer { .. } => false,
        }
    }
}
