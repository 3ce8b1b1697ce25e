use std::{ffi::CStr, ptr::null_mut};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult},
    vulkan::VkResultExt,
};

/// 表示一张物理显卡
pub(crate) struct VkPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 当前 gpu 的 ray tracing 属性
    pub(crate) rt_pipeline_props: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,

    /// 当前 gpu 的加速结构属性
    pub(crate) acc_struct_props: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,

    /// graphics | compute | transfer 全能的 queue family
    pub(crate) gfx_queue_family_index: u32,
}

impl VkPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn new_discrete_physical_device(instance: &ash::Instance) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.or_gfx("vkEnumeratePhysicalDevices")?;
        pdevices
            .into_iter()
            .filter_map(|pdevice| VkPhysicalDevice::new(pdevice, instance))
            .find_or_first(VkPhysicalDevice::is_discrete_gpu)
            .ok_or_else(|| GfxError::Unsupported("no gpu with a graphics queue".to_string()))
    }

    /// 不包含全能 queue family 的 gpu 直接跳过
    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut acc_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let basic_props = {
                let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt_props).push_next(&mut acc_props);
                instance.get_physical_device_properties2(pdevice, &mut props2);
                props2.properties
            };
            rt_props.p_next = null_mut();
            acc_props.p_next = null_mut();

            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", physical_device_name);
            log::debug!("physical device ray tracing props:\n{:#?}", rt_props);
            log::debug!("physical device acceleration structure props:\n{:#?}", acc_props);

            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
            let gfx_queue_family_index =
                queue_family_props.iter().position(|props| props.queue_flags.contains(required))? as u32;

            Some(Self {
                vk_handle: pdevice,
                basic_props,
                rt_pipeline_props: rt_props,
                acc_struct_props: acc_props,
                gfx_queue_family_index,
            })
        }
    }

    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}
