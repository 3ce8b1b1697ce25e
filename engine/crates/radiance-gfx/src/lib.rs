//! Radiance 的 GFX 层
//!
//! 分为三部分：
//! - 与后端无关的描述类型（格式、资源描述、资源状态、view、barrier、root signature、加速结构输入）
//! - 三个协作者接口：[`device::GfxDevice`]、[`device::GfxPipelineLibrary`]、[`commands::command_list::GfxCommandList`]
//! - 建立在接口之上的核心簿记类型：descriptor heap、upload buffer、带状态跟踪的资源
//!
//! Vulkan 后端位于 [`vulkan`]；`mock` feature 提供一个录制命令的后端，用于上层的单元测试。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod raytracing;
pub mod resources;
pub mod vulkan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{GfxError, GfxResult};
