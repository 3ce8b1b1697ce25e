use bytemuck::{Pod, Zeroable};
use radiance_gfx::{
    GfxError, GfxResult,
    basic::format::GfxFormat,
    descriptors::descriptor_heap::GfxDescriptorSlot,
    pipelines::{
        pipeline_desc::GfxComputePipelineDesc,
        root_signature::{GfxDescriptorRangeType, GfxRootSignatureDesc, GfxStaticSampler},
    },
    resources::{
        handles::{GfxGpuAddress, GfxPipelineHandle, GfxRootSignatureHandle},
        resource_desc::{GfxClearValue, GfxResourceDesc, GfxResourceFlags},
        resource_state::GfxResourceState,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::{
    render_context::RenderContext,
    texture::texture_manager::{TexResourceData, TextureManager},
};

const TONEMAPPER_PSO_NAME: &str = "Tonemapper";
const TONEMAPPER_GROUP_SIZE: u32 = 8;

const ROOT_PARAM_CONSTANTS: u32 = 0;
const ROOT_PARAM_SRV_TABLE: u32 = 1;
const ROOT_PARAM_UAV_TABLE: u32 = 2;

pub const HDR_FORMAT: GfxFormat = GfxFormat::R16G16B16A16Float;
pub const LDR_FORMAT: GfxFormat = GfxFormat::R8G8B8A8Unorm;
pub const MAX_EXPOSURE: f32 = 10.0;

/// 对应 shader 中的 `cbuffer TonemapperData : register(b0)`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TonemapperData {
    pub exposure: f32,
    /// HDR 纹理在共享 heap 中的 SRV slot
    pub hdr_tex_index: u32,
    /// 输出纹理在共享 heap 中的 UAV slot
    pub output_tex_index: u32,
    _pad: u32,
}

impl TonemapperData {
    pub fn new(exposure: f32, hdr_tex_index: u32, output_tex_index: u32) -> Self {
        Self {
            exposure,
            hdr_tex_index,
            output_tex_index,
            _pad: 0,
        }
    }
}

/// 把 HDR render target 按曝光映射到 LDR 输出
///
/// HDR 目标由 tonemapper 创建，场景（光栅或光追）渲染到它上面；
/// 常量按帧存放，每一帧使用自己的 slot
pub struct Tonemapper {
    hdr_target: TexResourceData,
    output: TexResourceData,
    output_uav: u32,
    root_signature: GfxRootSignatureHandle,
    pso: GfxPipelineHandle,
    constants: GfxUploadBuffer,
    frames_count: u32,
    exposure: f32,
    width: u32,
    height: u32,
}

// new & init
impl Tonemapper {
    pub fn new(ctx: &mut RenderContext, textures: &mut TextureManager, width: u32, height: u32) -> GfxResult<Self> {
        let settings = ctx.settings;

        // 光追直接写入 HDR 目标，因此需要 UAV
        let hdr_desc =
            GfxResourceDesc::texture_2d(width, height, HDR_FORMAT, 1).with_flags(GfxResourceFlags::ALLOW_UNORDERED_ACCESS);
        let clear = GfxClearValue {
            format: HDR_FORMAT,
            color: [0.0, 0.0, 0.0, 1.0],
        };
        let hdr_target = textures.create_rt(ctx, &hdr_desc, "HDRTexture", Some(&clear))?;

        let output_desc =
            GfxResourceDesc::texture_2d(width, height, LDR_FORMAT, 1).with_flags(GfxResourceFlags::ALLOW_UNORDERED_ACCESS);
        let output = textures.create_rt(ctx, &output_desc, "TonemappedOutput", None)?;
        let output_uav = textures.create_uav(output.resource_idx, 0)?;

        let root_signature = ctx.pipelines.create_root_signature(
            &GfxRootSignatureDesc::new()
                .cbv(0)
                .table(GfxDescriptorRangeType::Srv, settings.max_textures, 0)
                .table(GfxDescriptorRangeType::Uav, settings.max_textures, 0)
                .static_sampler(GfxStaticSampler::linear_wrap(0)),
            "TonemapperRootSignature",
        )?;
        let pso = ctx.pipelines.get_or_create_compute_pso(
            TONEMAPPER_PSO_NAME,
            &settings.shader_path("Tonemapper.comp"),
            &GfxComputePipelineDesc {
                root_signature,
                entry_point: "main".to_string(),
            },
        )?;

        let constants = GfxUploadBuffer::new(
            ctx.device,
            size_of::<TonemapperData>() as u64,
            GfxUploadUsage::ConstantBuffer,
            settings.frames_count,
            "TonemapperConstants",
        )?;

        Ok(Self {
            hdr_target,
            output,
            output_uav,
            root_signature,
            pso,
            constants,
            frames_count: settings.frames_count.max(1),
            exposure: settings.exposure.clamp(0.0, MAX_EXPOSURE),
            width,
            height,
        })
    }
}

// getters
impl Tonemapper {
    /// 场景渲染的目标
    #[inline]
    pub fn hdr_target(&self) -> TexResourceData {
        self.hdr_target
    }

    #[inline]
    pub fn output(&self) -> TexResourceData {
        self.output
    }

    #[inline]
    pub fn output_uav(&self) -> u32 {
        self.output_uav
    }

    #[inline]
    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    #[inline]
    pub fn constants_address(&self, frame_index: u32) -> GfxGpuAddress {
        self.constants.gpu_address(frame_index % self.frames_count)
    }
}

// tools
impl Tonemapper {
    /// 限制在 `[0, MAX_EXPOSURE]`
    pub fn set_exposure(&mut self, exposure: f32) {
        self.exposure = exposure.clamp(0.0, MAX_EXPOSURE);
    }

    /// 录制一次 tonemapping
    ///
    /// HDR 目标在 pass 期间处于 NonPixelShaderResource，输出处于 UnorderedAccess，
    /// pass 结束后两者都回到之前的状态
    pub fn render(&self, ctx: &mut RenderContext, textures: &mut TextureManager, frame_index: u32) -> GfxResult<()> {
        let frame = frame_index % self.frames_count;
        let data = TonemapperData::new(self.exposure, self.hdr_target.srv_offset, self.output_uav);
        self.constants.upload_data(frame, &data)?;

        let passes = [
            (self.hdr_target.resource_idx, GfxResourceState::NonPixelShaderResource),
            (self.output.resource_idx, GfxResourceState::UnorderedAccess),
        ];
        let mut prior_states = Vec::with_capacity(passes.len());
        let mut barriers = Vec::with_capacity(passes.len());
        for (idx, state) in passes {
            let resource = textures.resource_mut(idx).ok_or(GfxError::InvalidHandle("texture"))?;
            prior_states.push(resource.state());
            barriers.extend(resource.barrier(state));
        }

        let heap = textures.descriptor_heap();
        let table = heap.gpu_handle(GfxDescriptorSlot(0));
        let heap_handle = heap.handle();
        ctx.scoped_event("Tonemapping", |ctx| -> GfxResult<()> {
            if !barriers.is_empty() {
                ctx.cmd.resource_barrier(&barriers);
            }

            ctx.cmd.set_compute_root_signature(self.root_signature);
            ctx.cmd.set_pipeline_state(self.pso);
            ctx.cmd.set_descriptor_heaps(&[heap_handle]);
            ctx.cmd.set_compute_root_constant_buffer_view(ROOT_PARAM_CONSTANTS, self.constants.gpu_address(frame));
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_SRV_TABLE, table);
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_UAV_TABLE, table);
            ctx.cmd.dispatch(
                self.width.div_ceil(TONEMAPPER_GROUP_SIZE),
                self.height.div_ceil(TONEMAPPER_GROUP_SIZE),
                1,
            );

            let mut restore = Vec::with_capacity(passes.len());
            for ((idx, _), state) in passes.iter().zip(prior_states) {
                let resource = textures.resource_mut(*idx).ok_or(GfxError::InvalidHandle("texture"))?;
                restore.extend(resource.barrier(state));
            }
            if !restore.is_empty() {
                ctx.cmd.resource_barrier(&restore);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use radiance_gfx::{commands::barrier::GfxBarrier, mock::GfxRecordedCommand};

    use super::*;
    use crate::test_utils::TestRig;

    fn cbv_addresses(commands: &[GfxRecordedCommand]) -> Vec<GfxGpuAddress> {
        commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxRecordedCommand::SetComputeRootConstantBufferView { address, .. } => Some(*address),
                _ => None,
            })
            .collect_vec()
    }

    #[test]
    fn test_hdr_target_barrier_pair() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let tonemapper = Tonemapper::new(&mut rig.ctx(), &mut textures, 64, 36).unwrap();
        let hdr = textures.resource(tonemapper.hdr_target().resource_idx).unwrap().handle();
        let output = textures.resource(tonemapper.output().resource_idx).unwrap().handle();
        assert_eq!(textures.resource(tonemapper.hdr_target().resource_idx).unwrap().desc().format, HDR_FORMAT);

        tonemapper.render(&mut rig.ctx(), &mut textures, 0).unwrap();
        assert_eq!(
            rig.cmd.barriers(),
            vec![
                GfxBarrier::transition(hdr, GfxResourceState::RenderTarget, GfxResourceState::NonPixelShaderResource),
                GfxBarrier::transition(output, GfxResourceState::RenderTarget, GfxResourceState::UnorderedAccess),
                GfxBarrier::transition(hdr, GfxResourceState::NonPixelShaderResource, GfxResourceState::RenderTarget),
                GfxBarrier::transition(output, GfxResourceState::UnorderedAccess, GfxResourceState::RenderTarget),
            ]
        );
        assert_eq!(
            textures.resource(tonemapper.hdr_target().resource_idx).unwrap().state(),
            GfxResourceState::RenderTarget
        );

        let commands = rig.cmd.commands();
        assert_eq!(commands.first(), Some(&GfxRecordedCommand::BeginEvent("Tonemapping".to_string())));
        assert_eq!(commands.last(), Some(&GfxRecordedCommand::EndEvent));
        assert_eq!(rig.cmd.dispatches(), vec![(8, 5, 1)]);
    }

    #[test]
    fn test_restores_unordered_access_after_trace() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let tonemapper = Tonemapper::new(&mut rig.ctx(), &mut textures, 16, 16).unwrap();
        let idx = tonemapper.hdr_target().resource_idx;
        let barrier = textures.resource_mut(idx).unwrap().barrier(GfxResourceState::UnorderedAccess);
        assert!(barrier.is_some());

        tonemapper.render(&mut rig.ctx(), &mut textures, 0).unwrap();
        let hdr = textures.resource(idx).unwrap();
        assert_eq!(hdr.state(), GfxResourceState::UnorderedAccess);
        assert_eq!(
            rig.cmd.barriers()[0],
            GfxBarrier::transition(
                hdr.handle(),
                GfxResourceState::UnorderedAccess,
                GfxResourceState::NonPixelShaderResource
            )
        );
    }

    #[test]
    fn test_per_frame_constants() {
        let mut rig = TestRig::new();
        rig.settings.exposure = 2.5;
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut tonemapper = Tonemapper::new(&mut rig.ctx(), &mut textures, 16, 16).unwrap();

        tonemapper.render(&mut rig.ctx(), &mut textures, 0).unwrap();
        tonemapper.set_exposure(4.0);
        tonemapper.render(&mut rig.ctx(), &mut textures, 1).unwrap();
        // frames_count = 3，第 3 帧复用 slot 0
        tonemapper.render(&mut rig.ctx(), &mut textures, 3).unwrap();

        assert_eq!(
            cbv_addresses(rig.cmd.commands()),
            vec![
                tonemapper.constants.gpu_address(0),
                tonemapper.constants.gpu_address(1),
                tonemapper.constants.gpu_address(0),
            ]
        );
        assert_ne!(tonemapper.constants.gpu_address(0), tonemapper.constants.gpu_address(1));
        assert_eq!(tonemapper.constants_address(3), tonemapper.constants.gpu_address(0));

        let bytes = rig.mock.resource_bytes(tonemapper.constants.resource_handle()).unwrap();
        let stride = tonemapper.constants.element_stride() as usize;
        let read = |slot: usize| -> TonemapperData {
            bytemuck::pod_read_unaligned(&bytes[slot * stride..slot * stride + size_of::<TonemapperData>()])
        };
        let hdr_slot = tonemapper.hdr_target().srv_offset;
        assert_eq!(read(1), TonemapperData::new(4.0, hdr_slot, tonemapper.output_uav()));
        assert_eq!(read(0).exposure, 4.0);
        assert_eq!(read(2), TonemapperData::default());
    }

    #[test]
    fn test_exposure_is_clamped() {
        let mut rig = TestRig::new();
        rig.settings.exposure = 50.0;
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut tonemapper = Tonemapper::new(&mut rig.ctx(), &mut textures, 8, 8).unwrap();
        assert_eq!(tonemapper.exposure(), MAX_EXPOSURE);

        tonemapper.set_exposure(-1.0);
        assert_eq!(tonemapper.exposure(), 0.0);
    }

    #[test]
    fn test_pipeline_and_views() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let tonemapper = Tonemapper::new(&mut rig.ctx(), &mut textures, 8, 8).unwrap();

        let pipeline = rig.mock.compute_pipeline(tonemapper.pso).unwrap();
        assert_eq!(pipeline.name, "Tonemapper");
        assert!(pipeline.shader_path.ends_with("Tonemapper.comp.spv"));

        // HDR SRV、输出 SRV、输出 UAV
        assert_eq!(textures.descriptor_heap().allocated_count(), 3);
        let write = rig.mock.descriptor_slot(textures.descriptor_heap().handle(), tonemapper.output_uav()).unwrap();
        assert_eq!(write.view, radiance_gfx::descriptors::view_desc::GfxViewDesc::uav_texture_2d(LDR_FORMAT, 0));
        assert!(textures.rtv_handle(tonemapper.hdr_target().resource_idx).is_some());
    }
}
