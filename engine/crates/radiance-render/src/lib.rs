//! Radiance 的渲染层
//!
//! 建立在 `radiance-gfx` 的三个协作者接口之上，负责：
//! - 纹理与 render target 的创建、上传以及 descriptor slot 的分配
//! - 按帧批量的 mip 生成
//! - 等距柱状投影环境贴图到 cubemap / irradiance map 的转换
//! - 光追加速结构、shader table 的构建与一次光追 dispatch
//! - HDR render target 的 tonemapping

pub mod log_sink;
pub mod raytracing;
pub mod render_context;
pub mod render_settings;
pub mod root_signatures;
pub mod texture;
pub mod tonemapper;

#[cfg(test)]
mod test_utils;
