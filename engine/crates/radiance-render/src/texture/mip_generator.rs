use bytemuck::{Pod, Zeroable};
use itertools::Itertools;
use radiance_gfx::{
    GfxError, GfxResult,
    basic::format::GfxFormat,
    descriptors::{
        descriptor_heap::{GfxDescriptorHeap, GfxDescriptorSlot},
        view_desc::GfxViewDesc,
    },
    pipelines::pipeline_desc::GfxComputePipelineDesc,
    resources::{
        handles::{GfxPipelineHandle, GfxRootSignatureHandle},
        resource_desc::GfxResourceFlags,
        resource_state::GfxResourceState,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::{
    render_context::RenderContext,
    root_signatures::{UAV_TABLE_INDEX, cb_root_param_index, create_common_root_signature},
    texture::texture_manager::TextureManager,
};

const MIP_GEN_PSO_NAME: &str = "MipGenerator";
const MIP_GEN_GROUP_SIZE: u32 = 32;

/// 每个 dispatch 的常量，对应 shader 中的 `cbuffer MipGenData : register(b0)`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MipGenData {
    /// 源 mip 在 UAV table 中的 slot，目标 mip 为 `base_mip + 1`
    pub base_mip: u32,
    /// 目标 mip 的尺寸
    pub width: u32,
    pub height: u32,
    _pad: u32,
}

impl MipGenData {
    pub fn new(base_mip: u32, width: u32, height: u32) -> Self {
        Self {
            base_mip,
            width,
            height,
            _pad: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct MipJob {
    resource_idx: usize,
    data: MipGenData,
    cb_index: u32,
}

/// 按帧收集 mip 生成任务，在 [`MipGenerator::flush`] 时一次性提交
pub struct MipGenerator {
    uav_heap: GfxDescriptorHeap,
    root_signature: GfxRootSignatureHandle,
    pso: GfxPipelineHandle,
    /// 每个任务一个 slot
    constants: GfxUploadBuffer,
    jobs: Vec<MipJob>,
    capacity: u32,
}

// new & init
impl MipGenerator {
    pub fn new(ctx: &RenderContext) -> GfxResult<Self> {
        let settings = ctx.settings;
        let null_uav = GfxViewDesc::uav_texture_2d(GfxFormat::R32G32B32A32Float, 0);
        let uav_heap = GfxDescriptorHeap::new_shader_visible(ctx.device, settings.max_uav_textures, &null_uav, "MipUavHeap")?;

        let root_signature = create_common_root_signature(ctx.pipelines, settings)?;
        let pso = ctx.pipelines.get_or_create_compute_pso(
            MIP_GEN_PSO_NAME,
            &settings.shader_path("MipGenerator.comp"),
            &GfxComputePipelineDesc {
                root_signature,
                entry_point: "main".to_string(),
            },
        )?;

        let constants = GfxUploadBuffer::new(
            ctx.device,
            size_of::<MipGenData>() as u64,
            GfxUploadUsage::ConstantBuffer,
            settings.max_mips_per_frame,
            "MipGenConstants",
        )?;

        Ok(Self {
            uav_heap,
            root_signature,
            pso,
            constants,
            jobs: Vec::with_capacity(settings.max_mips_per_frame as usize),
            capacity: settings.max_mips_per_frame,
        })
    }
}

// getters
impl MipGenerator {
    /// 当前批次中排队的任务数量
    #[inline]
    pub fn queued_jobs(&self) -> u32 {
        self.jobs.len() as u32
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 第 `index` 个排队任务的常量
    #[inline]
    pub fn job_data(&self, index: usize) -> Option<MipGenData> {
        self.jobs.get(index).map(|job| job.data)
    }

    #[inline]
    pub fn uav_heap(&self) -> &GfxDescriptorHeap {
        &self.uav_heap
    }
}

// tools
impl MipGenerator {
    /// 为 `resource_idx` 的每一级 mip 创建 UAV，并追加 `mip_levels - 1` 个任务
    ///
    /// 资源没有 `ALLOW_UNORDERED_ACCESS` 时返回 [`GfxError::Unsupported`]；
    /// 超出每帧容量时返回 [`GfxError::MipBatchOverflow`]，批次保持不变
    pub fn generate_mips(&mut self, ctx: &mut RenderContext, textures: &TextureManager, resource_idx: usize) -> GfxResult<()> {
        let resource = textures.resource(resource_idx).ok_or(GfxError::InvalidHandle("texture"))?;
        let desc = *resource.desc();
        let mip_levels = desc.mip_levels as u32;
        if mip_levels <= 1 {
            ctx.log.warn(&format!("`{}` has a single mip level, nothing to generate", resource.name()));
            return Ok(());
        }

        if !desc.flags.contains(GfxResourceFlags::ALLOW_UNORDERED_ACCESS) {
            let err = GfxError::Unsupported(format!("`{}` does not allow unordered access", resource.name()));
            ctx.log.error(&err.to_string());
            return Err(err);
        }

        let requested = mip_levels - 1;
        let queued = self.queued_jobs();
        if queued + requested > self.capacity {
            let err = GfxError::MipBatchOverflow {
                queued,
                requested,
                capacity: self.capacity,
            };
            ctx.log.error(&err.to_string());
            return Err(err);
        }

        let first_slot = self.uav_heap.allocate_range(mip_levels)?;
        for mip in 0..mip_levels {
            self.uav_heap.write_view(
                first_slot.offset(mip),
                Some(resource.handle()),
                &GfxViewDesc::uav_texture_2d(desc.format, mip),
            )?;
        }

        for mip in 0..requested {
            let (width, height) = desc.mip_extent(mip + 1);
            let data = MipGenData::new(first_slot.index() + mip, width, height);
            let cb_index = queued + mip;
            self.constants.upload_data(cb_index, &data)?;
            self.jobs.push(MipJob {
                resource_idx,
                data,
                cb_index,
            });
        }

        log::debug!("queue {} mip job(s) for `{}`", requested, resource.name());
        Ok(())
    }

    /// 提交所有排队任务并等待完成；批次为空时什么都不做
    pub fn flush(&mut self, ctx: &mut RenderContext, textures: &mut TextureManager) -> GfxResult<()> {
        if self.jobs.is_empty() {
            return Ok(());
        }

        let resource_indices = self.jobs.iter().map(|job| job.resource_idx).unique().collect_vec();
        let mut prior_states = Vec::with_capacity(resource_indices.len());
        let mut barriers = Vec::with_capacity(resource_indices.len());
        for &idx in &resource_indices {
            let resource = textures.resource_mut(idx).ok_or(GfxError::InvalidHandle("texture"))?;
            prior_states.push(resource.state());
            barriers.extend(resource.barrier(GfxResourceState::UnorderedAccess));
        }

        let uav_table = self.uav_heap.gpu_handle(GfxDescriptorSlot(0));
        ctx.scoped_event("GenerateMips", |ctx| -> GfxResult<()> {
            if !barriers.is_empty() {
                ctx.cmd.resource_barrier(&barriers);
            }

            ctx.cmd.set_compute_root_signature(self.root_signature);
            ctx.cmd.set_pipeline_state(self.pso);
            ctx.cmd.set_descriptor_heaps(&[self.uav_heap.handle()]);
            ctx.cmd.set_compute_root_descriptor_table(UAV_TABLE_INDEX, uav_table);

            let mut previous: Option<usize> = None;
            for job in &self.jobs {
                // 同一资源的下一级 mip 读取上一级的输出
                if previous == Some(job.resource_idx) {
                    let resource = textures.resource(job.resource_idx).ok_or(GfxError::InvalidHandle("texture"))?;
                    ctx.cmd.resource_barrier(&[resource.uav_barrier()]);
                }
                previous = Some(job.resource_idx);

                ctx.cmd.set_compute_root_constant_buffer_view(
                    cb_root_param_index(0),
                    self.constants.gpu_address(job.cb_index),
                );
                ctx.cmd.dispatch(
                    job.data.width.div_ceil(MIP_GEN_GROUP_SIZE),
                    job.data.height.div_ceil(MIP_GEN_GROUP_SIZE),
                    1,
                );
            }

            let mut restore = Vec::with_capacity(resource_indices.len());
            for (&idx, &state) in resource_indices.iter().zip(&prior_states) {
                let resource = textures.resource_mut(idx).ok_or(GfxError::InvalidHandle("texture"))?;
                restore.extend(resource.barrier(state));
            }
            if !restore.is_empty() {
                ctx.cmd.resource_barrier(&restore);
            }
            Ok(())
        })?;

        log::debug!("flush {} mip job(s)", self.jobs.len());
        self.jobs.clear();
        self.uav_heap.reset();
        ctx.cmd.flush()
    }
}

#[cfg(test)]
mod tests {
    use radiance_gfx::{
        commands::barrier::GfxBarrier, mock::GfxRecordedCommand, resources::resource_desc::GfxResourceDesc,
    };

    use super::*;
    use crate::{
        test_utils::{TestRig, white_png},
        texture::{image_source::ImageSource, texture_manager::TextureOptions},
    };

    fn mipped_texture(rig: &mut TestRig, textures: &mut TextureManager, w: u32, h: u32, mips: u16) -> usize {
        let png = white_png(w, h);
        let options = TextureOptions {
            generate_mips: true,
            max_mip_levels: Some(mips),
        };
        textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), options).unwrap().resource_idx
    }

    #[test]
    fn test_three_mips_give_two_dispatches() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let idx = mipped_texture(&mut rig, &mut textures, 128, 64, 3);
        rig.cmd.take_commands();

        mips.generate_mips(&mut rig.ctx(), &textures, idx).unwrap();
        assert_eq!(mips.queued_jobs(), 2);
        assert_eq!(mips.job_data(0), Some(MipGenData::new(0, 64, 32)));
        assert_eq!(mips.job_data(1), Some(MipGenData::new(1, 32, 16)));
        assert!(rig.cmd.commands().is_empty());

        // 每一级 mip 一个 UAV，包括 mip 0
        let heap = mips.uav_heap().handle();
        for mip in 0..3 {
            let write = rig.mock.descriptor_slot(heap, mip).unwrap();
            assert_eq!(write.view, GfxViewDesc::uav_texture_2d(GfxFormat::R8G8B8A8Unorm, mip));
            assert_eq!(write.resource, Some(textures.resource(idx).unwrap().handle()));
        }

        mips.flush(&mut rig.ctx(), &mut textures).unwrap();
        assert_eq!(rig.cmd.dispatches(), vec![(2, 1, 1), (1, 1, 1)]);
        assert_eq!(mips.queued_jobs(), 0);
        assert_eq!(rig.cmd.commands().last(), Some(&GfxRecordedCommand::Flush));
    }

    #[test]
    fn test_flush_barriers_and_constants() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let idx = mipped_texture(&mut rig, &mut textures, 16, 16, 3);
        let handle = textures.resource(idx).unwrap().handle();
        mips.generate_mips(&mut rig.ctx(), &textures, idx).unwrap();
        rig.cmd.take_commands();

        mips.flush(&mut rig.ctx(), &mut textures).unwrap();
        assert_eq!(
            rig.cmd.barriers(),
            vec![
                GfxBarrier::transition(
                    handle,
                    GfxResourceState::PixelShaderResource,
                    GfxResourceState::UnorderedAccess
                ),
                GfxBarrier::uav(handle),
                GfxBarrier::transition(
                    handle,
                    GfxResourceState::UnorderedAccess,
                    GfxResourceState::PixelShaderResource
                ),
            ]
        );
        assert_eq!(textures.resource(idx).unwrap().state(), GfxResourceState::PixelShaderResource);

        let cbvs = rig
            .cmd
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                GfxRecordedCommand::SetComputeRootConstantBufferView { address, .. } => Some(*address),
                _ => None,
            })
            .collect_vec();
        assert_eq!(cbvs, vec![mips.constants.gpu_address(0), mips.constants.gpu_address(1)]);

        let bytes = rig.mock.resource_bytes(mips.constants.resource_handle()).unwrap();
        let stride = mips.constants.element_stride() as usize;
        let second: MipGenData = bytemuck::pod_read_unaligned(&bytes[stride..stride + size_of::<MipGenData>()]);
        assert_eq!(second, MipGenData::new(1, 4, 4));
    }

    #[test]
    fn test_pipeline_bound_once_inside_event() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let a = mipped_texture(&mut rig, &mut textures, 64, 64, 4);
        let b = mipped_texture(&mut rig, &mut textures, 32, 32, 2);
        mips.generate_mips(&mut rig.ctx(), &textures, a).unwrap();
        mips.generate_mips(&mut rig.ctx(), &textures, b).unwrap();
        assert_eq!(mips.job_data(3), Some(MipGenData::new(4, 16, 16)));
        rig.cmd.take_commands();

        mips.flush(&mut rig.ctx(), &mut textures).unwrap();
        let cmd = &rig.cmd;
        assert_eq!(cmd.count(|c| matches!(c, GfxRecordedCommand::SetPipelineState(_))), 1);
        assert_eq!(cmd.dispatches().len(), 4);
        assert_eq!(cmd.commands()[0], GfxRecordedCommand::BeginEvent("GenerateMips".to_string()));
        let end = cmd.position(|c| *c == GfxRecordedCommand::EndEvent).unwrap();
        let last_dispatch = cmd.commands().iter().rposition(|c| matches!(c, GfxRecordedCommand::Dispatch { .. })).unwrap();
        assert!(last_dispatch < end);
        assert!(matches!(
            cmd.commands()[1],
            GfxRecordedCommand::ResourceBarrier(ref barriers) if barriers.len() == 2
        ));
        let pipeline = rig.mock.compute_pipeline(mips.pso).unwrap();
        assert_eq!(pipeline.name, "MipGenerator");
        assert!(pipeline.shader_path.ends_with("MipGenerator.comp.spv"));
    }

    #[test]
    fn test_overflow_is_reported_before_any_dispatch() {
        let mut rig = TestRig::new();
        rig.settings.max_mips_per_frame = 4;
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let a = mipped_texture(&mut rig, &mut textures, 8, 8, 4);
        let b = mipped_texture(&mut rig, &mut textures, 8, 8, 3);
        rig.cmd.take_commands();

        mips.generate_mips(&mut rig.ctx(), &textures, a).unwrap();
        let err = mips.generate_mips(&mut rig.ctx(), &textures, b).unwrap_err();
        assert!(matches!(
            err,
            GfxError::MipBatchOverflow {
                queued: 3,
                requested: 2,
                capacity: 4
            }
        ));
        assert_eq!(mips.queued_jobs(), 3);
        assert_eq!(mips.uav_heap().allocated_count(), 4);
        assert!(rig.cmd.dispatches().is_empty());
        assert!(rig.log.contains("mip generation batch overflow"));
    }

    #[test]
    fn test_render_target_without_uav_flag_is_rejected() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let desc = GfxResourceDesc::texture_2d(64, 64, GfxFormat::R16G16B16A16Float, 3);
        let rt = textures.create_rt(&mut rig.ctx(), &desc, "MippedTarget", None).unwrap();

        let err = mips.generate_mips(&mut rig.ctx(), &textures, rt.resource_idx).unwrap_err();
        assert!(matches!(err, GfxError::Unsupported(_)));
        assert_eq!(mips.queued_jobs(), 0);
        assert_eq!(mips.uav_heap().allocated_count(), 0);
        assert!(rig.mock.descriptor_history(mips.uav_heap().handle()).iter().all(|(_, write)| write.resource.is_none()));
        assert!(rig.log.contains("does not allow unordered access"));
    }

    #[test]
    fn test_flush_empty_batch_is_noop() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();

        mips.flush(&mut rig.ctx(), &mut textures).unwrap();
        assert!(rig.cmd.commands().is_empty());
    }

    #[test]
    fn test_flush_rewinds_uav_slots() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut mips = MipGenerator::new(&rig.ctx()).unwrap();
        let idx = mipped_texture(&mut rig, &mut textures, 8, 8, 2);

        mips.generate_mips(&mut rig.ctx(), &textures, idx).unwrap();
        mips.flush(&mut rig.ctx(), &mut textures).unwrap();
        assert_eq!(mips.uav_heap().allocated_count(), 0);

        mips.generate_mips(&mut rig.ctx(), &textures, idx).unwrap();
        assert_eq!(mips.job_data(0), Some(MipGenData::new(0, 4, 4)));
    }
}
