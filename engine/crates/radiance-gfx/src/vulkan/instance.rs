use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult},
    vulkan::{VkResultExt, debug_messenger::VkDebugMsger},
};

pub(crate) struct VkInstance {
    pub(crate) ash_instance: ash::Instance,
}

impl VkInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(vk_entry: &ash::Entry, app_name: &str, enable_validation: bool) -> GfxResult<Self> {
        let app_name = CString::new(app_name).map_err(|_| GfxError::Unsupported("app name contains NUL".into()))?;
        let engine_name = c"Radiance";
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry)?;
        log::info!(
            "instance extensions: {}",
            enabled_extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let enabled_layers = Self::get_layers(vk_entry, enable_validation)?;
        log::info!(
            "instance layers: {}",
            enabled_layers.iter().map(|layer| format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) })).join("")
        );

        let mut debug_utils_messenger_ci = VkDebugMsger::debug_utils_messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers)
            .push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.or_gfx("vkCreateInstance")?;
        Ok(Self { ash_instance })
    }

    pub fn destroy(self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// 构造过程
impl VkInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props =
            unsafe { vk_entry.enumerate_instance_extension_properties(None) }.or_gfx("vkEnumerateInstanceExtensionProperties")?;

        Self::basic_instance_exts()
            .into_iter()
            .map(|ext| {
                let supported = all_ext_props
                    .iter()
                    .any(|supported_ext| ext == unsafe { CStr::from_ptr(supported_ext.extension_name.as_ptr()) });
                if supported {
                    Ok(ext.as_ptr())
                } else {
                    Err(GfxError::Unsupported(format!("instance extension {ext:?} is missing")))
                }
            })
            .collect()
    }

    /// validation layer 不存在时只给出警告
    fn get_layers(vk_entry: &ash::Entry, enable_validation: bool) -> GfxResult<Vec<*const c_char>> {
        if !enable_validation {
            return Ok(Vec::new());
        }
        let all_layer_props =
            unsafe { vk_entry.enumerate_instance_layer_properties() }.or_gfx("vkEnumerateInstanceLayerProperties")?;

        let validation = c"VK_LAYER_KHRONOS_validation";
        let supported = all_layer_props
            .iter()
            .any(|available_layer| validation == unsafe { CStr::from_ptr(available_layer.layer_name.as_ptr()) });
        if supported {
            Ok(vec![validation.as_ptr()])
        } else {
            log::warn!("validation layer is not available");
            Ok(Vec::new())
        }
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        // debug messenger、object debug name 以及 command buffer label 都依赖这个 extension
        vec![vk::EXT_DEBUG_UTILS_NAME]
    }
}
