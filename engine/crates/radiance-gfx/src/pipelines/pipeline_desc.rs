use std::path::PathBuf;

use crate::resources::handles::{GfxRayTracingPipelineHandle, GfxRootSignatureHandle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxComputePipelineDesc {
    pub root_signature: GfxRootSignatureHandle,
    pub entry_point: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxShaderStage {
    RayGen,
    Miss,
    ClosestHit,
    AnyHit,
}

/// shader library 中导出的一个入口
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxShaderExport {
    pub name: String,
    pub stage: GfxShaderStage,
}

impl GfxShaderExport {
    pub fn new(name: impl Into<String>, stage: GfxShaderStage) -> Self {
        Self {
            name: name.into(),
            stage,
        }
    }
}

/// 三角形 hit group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxHitGroupDesc {
    pub name: String,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxRayTracingPipelineDesc {
    /// 编译好的 shader library
    pub library_path: PathBuf,
    pub exports: Vec<GfxShaderExport>,
    pub hit_groups: Vec<GfxHitGroupDesc>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
    pub global_root_signature: GfxRootSignatureHandle,
}

/// 已经创建完成的光追管线
///
/// 只能由 [`crate::device::GfxPipelineLibrary::create_ray_tracing_pipeline`] 得到，
/// 因此持有该类型即意味着 shader identifier 可以被查询
#[derive(Debug)]
pub struct GfxRayTracingPipeline {
    handle: GfxRayTracingPipelineHandle,
    name: String,
}

impl GfxRayTracingPipeline {
    pub(crate) fn new(handle: GfxRayTracingPipelineHandle, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }

    #[inline]
    pub fn handle(&self) -> GfxRayTracingPipelineHandle {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
