use std::rc::Rc;

use itertools::Itertools;
use radiance_gfx::{
    GfxResult,
    basic::align::align_up,
    commands::command_list::{GfxDispatchRaysDesc, GfxGpuAddressRange, GfxGpuAddressRangeAndStride},
    device::{GfxDevice, GfxPipelineLibrary},
    pipelines::pipeline_desc::GfxRayTracingPipeline,
    resources::upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
};

pub const RAYGEN_EXPORT: &str = "Raygen";
pub const MISS_EXPORT: &str = "Miss";
pub const CLOSEST_HIT_EXPORT: &str = "ClosestHit";
pub const TRIANGLE_HIT_GROUP: &str = "TriangleHitGroup";

/// 一段固定步长的 shader record
///
/// 每条 record 只包含 shader identifier，长度按 record 对齐要求向上取整
pub struct ShaderTable {
    buffer: GfxUploadBuffer,
    record_size: u64,
    record_count: u32,
}

// new & init
impl ShaderTable {
    /// 只能传入已经创建完成的 pipeline：identifier 在 pipeline 创建之后才能查询
    pub fn new(
        device: &Rc<dyn GfxDevice>,
        pipelines: &dyn GfxPipelineLibrary,
        pipeline: &GfxRayTracingPipeline,
        exports: &[&str],
        name: &str,
    ) -> GfxResult<Self> {
        let limits = device.limits();
        let record_size = align_up(limits.shader_identifier_size as u64, limits.shader_record_alignment as u64);

        let mut records = vec![0u8; record_size as usize * exports.len()];
        for (record, export) in records.chunks_exact_mut(record_size as usize).zip_eq(exports) {
            let identifier = pipelines.shader_identifier(pipeline, export)?;
            record[..identifier.len()].copy_from_slice(&identifier);
        }

        let buffer = GfxUploadBuffer::new(device, records.len() as u64, GfxUploadUsage::ShaderTable, 1, name)?;
        buffer.upload_bytes(0, &records)?;
        log::debug!("shader table `{}`: {} record(s) of {} bytes", name, exports.len(), record_size);

        Ok(Self {
            buffer,
            record_size,
            record_count: exports.len() as u32,
        })
    }
}

// getters
impl ShaderTable {
    #[inline]
    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    #[inline]
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    #[inline]
    pub fn buffer(&self) -> &GfxUploadBuffer {
        &self.buffer
    }

    #[inline]
    pub fn address_range(&self) -> GfxGpuAddressRange {
        GfxGpuAddressRange {
            start: self.buffer.gpu_address(0),
            size: self.record_size * self.record_count as u64,
        }
    }

    #[inline]
    pub fn address_range_and_stride(&self) -> GfxGpuAddressRangeAndStride {
        let range = self.address_range();
        GfxGpuAddressRangeAndStride {
            start: range.start,
            size: range.size,
            stride: self.record_size,
        }
    }
}

/// raygen / miss / hit group 三张表
pub struct ShaderTables {
    pub raygen: ShaderTable,
    pub miss: ShaderTable,
    pub hit_group: ShaderTable,
}

impl ShaderTables {
    pub fn new(
        device: &Rc<dyn GfxDevice>,
        pipelines: &dyn GfxPipelineLibrary,
        pipeline: &GfxRayTracingPipeline,
    ) -> GfxResult<Self> {
        Ok(Self {
            raygen: ShaderTable::new(device, pipelines, pipeline, &[RAYGEN_EXPORT], "RaygenShaderTable")?,
            miss: ShaderTable::new(device, pipelines, pipeline, &[MISS_EXPORT], "MissShaderTable")?,
            hit_group: ShaderTable::new(device, pipelines, pipeline, &[TRIANGLE_HIT_GROUP], "HitGroupShaderTable")?,
        })
    }

    pub fn dispatch_rays_desc(&self, width: u32, height: u32) -> GfxDispatchRaysDesc {
        GfxDispatchRaysDesc {
            ray_generation: self.raygen.address_range(),
            miss: self.miss.address_range_and_stride(),
            hit_group: self.hit_group.address_range_and_stride(),
            width,
            height,
            depth: 1,
        }
    }
}
