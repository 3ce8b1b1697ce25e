//! Vulkan 后端
//!
//! 将 D3D12 风格的抽象映射到 Vulkan：
//! - shader-visible descriptor heap 对应一个 bindless descriptor set（binding 0 为 sampled image，binding 1 为 storage image）
//! - root signature 对应 pipeline layout：set 0 为 bindless set，set 1 为 static sampler；
//!   每个 root parameter 占用 8 字节 push constant
//! - 资源状态映射为 stage / access / image layout

pub mod command_list;
pub mod gfx;

mod acceleration;
mod barrier;
mod conv;
mod debug_messenger;
mod descriptor_heap;
mod device;
mod instance;
mod physical_device;
mod pipelines;
mod resources;

use ash::vk;

use crate::error::{GfxError, GfxResult};

pub use command_list::VkCommandList;
pub use gfx::VkGfx;

pub(crate) trait VkResultExt<T> {
    fn or_gfx(self, call: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn or_gfx(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|e| GfxError::device(call, e.as_raw(), format!("{e:?}")))
    }
}
