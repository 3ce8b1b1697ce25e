use bytemuck::{Pod, Zeroable};
use radiance_gfx::{
    GfxError, GfxResult,
    basic::format::GfxFormat,
    commands::barrier::GfxBarrier,
    descriptors::{
        descriptor_heap::{GfxDescriptorHeap, GfxDescriptorSlot},
        view_desc::GfxViewDesc,
    },
    pipelines::{
        pipeline_desc::GfxComputePipelineDesc,
        root_signature::{GfxDescriptorRangeType, GfxRootSignatureDesc, GfxStaticSampler},
    },
    resources::{
        handles::{GfxPipelineHandle, GfxRootSignatureHandle},
        resource_state::GfxResourceState,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::{
    render_context::RenderContext,
    texture::{
        image_source::ImageSource,
        texture_manager::{TexResourceData, TextureManager, TextureOptions},
    },
};

const CUBEMAP_FORMAT: GfxFormat = GfxFormat::R32G32B32A32Float;
const GROUP_SIZE: u32 = 32;
const CUBE_FACES: u32 = 6;

const ROOT_PARAM_CB: u32 = 0;
const ROOT_PARAM_SRV_TABLE: u32 = 1;
const ROOT_PARAM_UAV_TABLE: u32 = 2;

// 4 个 slot 的固定布局；每个 pass 的 table 为 (SRV, UAV) 相邻的两个 slot
const SLOT_SOURCE_SRV: u32 = 0;
const SLOT_CUBEMAP_UAV: u32 = 1;
const SLOT_CUBEMAP_SRV: u32 = 2;
const SLOT_IRRADIANCE_UAV: u32 = 3;
const SLOT_COUNT: u32 = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EnvMapData {
    /// (等距柱状图宽, 高, cubemap 宽, 高)
    pub eq_map_cube_map_wh: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ConvolutionData {
    pub size: f32,
    _pad: [f32; 3],
}

/// 等距柱状投影的环境贴图，以及由它得到的 cubemap 与 irradiance map
///
/// 创建后处于未转换状态，[`EnvironmentMap::convert_to_cubemap`] 之后 cubemap 与 irradiance map 才有内容
pub struct EnvironmentMap {
    source: TexResourceData,
    cubemap: TexResourceData,
    irradiance: TexResourceData,
    cubemap_size: u32,
    irradiance_size: u32,

    heap: GfxDescriptorHeap,
    root_signature: GfxRootSignatureHandle,
    convert_pso: GfxPipelineHandle,
    convolution_pso: GfxPipelineHandle,
    env_map_cb: GfxUploadBuffer,
    convolution_cb: GfxUploadBuffer,

    converted: bool,
}

// new & init
impl EnvironmentMap {
    pub fn new(
        ctx: &mut RenderContext,
        textures: &mut TextureManager,
        source: ImageSource<'_>,
        cubemap_size: u32,
        irradiance_size: u32,
    ) -> GfxResult<Self> {
        // 资源尚不存在，先用 null view 占位
        let mut heap = GfxDescriptorHeap::new_shader_visible_with(
            ctx.device,
            SLOT_COUNT,
            |slot| match slot {
                SLOT_SOURCE_SRV => GfxViewDesc::srv_texture_2d(CUBEMAP_FORMAT, 1),
                SLOT_CUBEMAP_SRV => GfxViewDesc::srv_texture_cube(CUBEMAP_FORMAT, 1),
                _ => GfxViewDesc::uav_texture_2d_array(CUBEMAP_FORMAT, 0, CUBE_FACES),
            },
            "EnvMapHeap",
        )?;
        let first = heap.allocate_range(SLOT_COUNT)?;
        debug_assert_eq!(first, GfxDescriptorSlot(0));

        let source = textures.create_texture(
            ctx,
            source,
            TextureOptions {
                generate_mips: true,
                max_mip_levels: None,
            },
        )?;
        let cubemap = textures.create_cubemap(ctx, cubemap_size, CUBEMAP_FORMAT, true, "EnvCubemap")?;
        let irradiance = textures.create_cubemap(ctx, irradiance_size, CUBEMAP_FORMAT, true, "IrradianceMap")?;

        let resource_of = |data: &TexResourceData| textures.resource(data.resource_idx).ok_or(GfxError::InvalidHandle("texture"));
        let source_res = resource_of(&source)?;
        let cubemap_res = resource_of(&cubemap)?;
        let irradiance_res = resource_of(&irradiance)?;

        let source_desc = *source_res.desc();
        heap.write_view(
            GfxDescriptorSlot(SLOT_SOURCE_SRV),
            Some(source_res.handle()),
            &GfxViewDesc::srv_texture_2d(source_desc.format, source_desc.mip_levels as u32),
        )?;
        heap.write_view(
            GfxDescriptorSlot(SLOT_CUBEMAP_UAV),
            Some(cubemap_res.handle()),
            &GfxViewDesc::uav_texture_2d_array(CUBEMAP_FORMAT, 0, CUBE_FACES),
        )?;
        heap.write_view(
            GfxDescriptorSlot(SLOT_CUBEMAP_SRV),
            Some(cubemap_res.handle()),
            &GfxViewDesc::srv_texture_cube(CUBEMAP_FORMAT, 1),
        )?;
        heap.write_view(
            GfxDescriptorSlot(SLOT_IRRADIANCE_UAV),
            Some(irradiance_res.handle()),
            &GfxViewDesc::uav_texture_2d_array(CUBEMAP_FORMAT, 0, CUBE_FACES),
        )?;

        let root_signature = ctx.pipelines.create_root_signature(
            &GfxRootSignatureDesc::new()
                .cbv(0)
                .table(GfxDescriptorRangeType::Srv, 1, 0)
                .table(GfxDescriptorRangeType::Uav, 1, 0)
                .static_sampler(GfxStaticSampler::linear_wrap(0)),
            "EnvMapRootSignature",
        )?;
        let pso_desc = GfxComputePipelineDesc {
            root_signature,
            entry_point: "main".to_string(),
        };
        let convert_pso = ctx.pipelines.get_or_create_compute_pso(
            "EnvMapConversion",
            &ctx.settings.shader_path("EquirectToCubemap.comp"),
            &pso_desc,
        )?;
        let convolution_pso = ctx.pipelines.get_or_create_compute_pso(
            "IrradianceConvolution",
            &ctx.settings.shader_path("IrradianceConvolution.comp"),
            &pso_desc,
        )?;

        let env_map_cb = GfxUploadBuffer::new(
            ctx.device,
            size_of::<EnvMapData>() as u64,
            GfxUploadUsage::ConstantBuffer,
            1,
            "EnvMapData",
        )?;
        env_map_cb.upload_data(
            0,
            &EnvMapData {
                eq_map_cube_map_wh: [
                    source_desc.width as f32,
                    source_desc.height as f32,
                    cubemap_size as f32,
                    cubemap_size as f32,
                ],
            },
        )?;
        let convolution_cb = GfxUploadBuffer::new(
            ctx.device,
            size_of::<ConvolutionData>() as u64,
            GfxUploadUsage::ConstantBuffer,
            1,
            "ConvolutionData",
        )?;
        convolution_cb.upload_data(
            0,
            &ConvolutionData {
                size: irradiance_size as f32,
                _pad: [0.0; 3],
            },
        )?;

        Ok(Self {
            source,
            cubemap,
            irradiance,
            cubemap_size,
            irradiance_size,
            heap,
            root_signature,
            convert_pso,
            convolution_pso,
            env_map_cb,
            convolution_cb,
            converted: false,
        })
    }
}

// getters
impl EnvironmentMap {
    #[inline]
    pub fn is_converted(&self) -> bool {
        self.converted
    }

    #[inline]
    pub fn source_texture(&self) -> TexResourceData {
        self.source
    }

    #[inline]
    pub fn cubemap(&self) -> TexResourceData {
        self.cubemap
    }

    #[inline]
    pub fn irradiance_map(&self) -> TexResourceData {
        self.irradiance
    }

    #[inline]
    pub fn descriptor_heap(&self) -> &GfxDescriptorHeap {
        &self.heap
    }
}

// tools
impl EnvironmentMap {
    /// 等距柱状图 → cubemap → irradiance map，前后各 flush 一次
    ///
    /// 每次调用都会重新执行全部 pass
    pub fn convert_to_cubemap(&mut self, ctx: &mut RenderContext, textures: &mut TextureManager) -> GfxResult<()> {
        ctx.cmd.flush()?;

        let cubemap_prior = Self::state_of(textures, &self.cubemap)?;
        let irradiance_prior = Self::state_of(textures, &self.irradiance)?;
        let source_prior = Self::state_of(textures, &self.source)?;

        let heaps = [self.heap.handle()];
        let table = |slot: u32| self.heap.gpu_handle(GfxDescriptorSlot(slot));

        ctx.scoped_event("ConvertToCubemap", |ctx| -> GfxResult<()> {
            let barriers = [
                Self::transition(textures, &self.cubemap, GfxResourceState::UnorderedAccess)?,
                Self::transition(textures, &self.source, GfxResourceState::NonPixelShaderResource)?,
                Self::transition(textures, &self.irradiance, GfxResourceState::UnorderedAccess)?,
            ];
            Self::record_barriers(ctx, &barriers);

            ctx.cmd.set_compute_root_signature(self.root_signature);
            ctx.cmd.set_pipeline_state(self.convert_pso);
            ctx.cmd.set_descriptor_heaps(&heaps);
            ctx.cmd.set_compute_root_constant_buffer_view(ROOT_PARAM_CB, self.env_map_cb.gpu_address(0));
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_SRV_TABLE, table(SLOT_SOURCE_SRV));
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_UAV_TABLE, table(SLOT_CUBEMAP_UAV));
            let groups = self.cubemap_size.div_ceil(GROUP_SIZE);
            ctx.cmd.dispatch(groups, groups, CUBE_FACES);

            let barriers = [
                Self::transition(textures, &self.cubemap, GfxResourceState::NonPixelShaderResource)?,
                Self::transition(textures, &self.source, source_prior)?,
            ];
            Self::record_barriers(ctx, &barriers);
            Ok(())
        })?;

        ctx.scoped_event("Convolution", |ctx| {
            ctx.cmd.set_pipeline_state(self.convolution_pso);
            ctx.cmd.set_compute_root_constant_buffer_view(ROOT_PARAM_CB, self.convolution_cb.gpu_address(0));
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_SRV_TABLE, table(SLOT_CUBEMAP_SRV));
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_UAV_TABLE, table(SLOT_IRRADIANCE_UAV));
            let groups = self.irradiance_size.div_ceil(GROUP_SIZE);
            ctx.cmd.dispatch(groups, groups, CUBE_FACES);
        });

        let barriers = [
            Self::transition(textures, &self.cubemap, cubemap_prior)?,
            Self::transition(textures, &self.irradiance, irradiance_prior)?,
        ];
        Self::record_barriers(ctx, &barriers);

        ctx.cmd.flush()?;
        self.converted = true;
        ctx.log.info(&format!(
            "environment map converted: cubemap {0}x{0}, irradiance {1}x{1}",
            self.cubemap_size, self.irradiance_size
        ));
        Ok(())
    }

    /// 只在尚未转换时执行转换，返回本次是否执行了转换
    pub fn ensure_converted(&mut self, ctx: &mut RenderContext, textures: &mut TextureManager) -> GfxResult<bool> {
        if self.converted {
            return Ok(false);
        }
        self.convert_to_cubemap(ctx, textures)?;
        Ok(true)
    }

    fn state_of(textures: &TextureManager, data: &TexResourceData) -> GfxResult<GfxResourceState> {
        textures
            .resource(data.resource_idx)
            .map(|res| res.state())
            .ok_or(GfxError::InvalidHandle("texture"))
    }

    fn transition(
        textures: &mut TextureManager,
        data: &TexResourceData,
        state: GfxResourceState,
    ) -> GfxResult<Option<GfxBarrier>> {
        let resource = textures.resource_mut(data.resource_idx).ok_or(GfxError::InvalidHandle("texture"))?;
        Ok(resource.barrier(state))
    }

    fn record_barriers(ctx: &mut RenderContext, barriers: &[Option<GfxBarrier>]) {
        let barriers: Vec<_> = barriers.iter().flatten().copied().collect();
        if !barriers.is_empty() {
            ctx.cmd.resource_barrier(&barriers);
        }
    }
}

#[cfg(test)]
mod tests {
    use radiance_gfx::mock::GfxRecordedCommand;

    use super::*;
    use crate::test_utils::{TestRig, white_png};

    fn env_map(rig: &mut TestRig, textures: &mut TextureManager) -> EnvironmentMap {
        let png = white_png(64, 32);
        EnvironmentMap::new(&mut rig.ctx(), textures, ImageSource::Memory(&png), 64, 16).unwrap()
    }

    #[test]
    fn test_heap_is_populated_in_two_phases() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let env = env_map(&mut rig, &mut textures);
        assert!(!env.is_converted());

        let heap = env.descriptor_heap();
        assert!(heap.is_fully_initialized());
        let history = rig.mock.descriptor_history(heap.handle());
        assert_eq!(history.len(), 8);
        // 前 4 次为 null 占位，后 4 次绑定真实资源
        assert!(history[..4].iter().all(|(_, write)| write.resource.is_none()));
        assert!(history[4..].iter().all(|(_, write)| write.resource.is_some()));

        let cube = textures.resource(env.cubemap().resource_idx).unwrap().handle();
        let irradiance = textures.resource(env.irradiance_map().resource_idx).unwrap().handle();
        assert_eq!(rig.mock.descriptor_slot(heap.handle(), SLOT_CUBEMAP_UAV).unwrap().resource, Some(cube));
        assert_eq!(rig.mock.descriptor_slot(heap.handle(), SLOT_CUBEMAP_SRV).unwrap().resource, Some(cube));
        assert_eq!(
            rig.mock.descriptor_slot(heap.handle(), SLOT_IRRADIANCE_UAV).unwrap().view,
            GfxViewDesc::uav_texture_2d_array(CUBEMAP_FORMAT, 0, 6)
        );
        assert_eq!(
            rig.mock.descriptor_slot(heap.handle(), SLOT_IRRADIANCE_UAV).unwrap().resource,
            Some(irradiance)
        );

        let source = textures.resource(env.source_texture().resource_idx).unwrap();
        assert_eq!(source.desc().mip_levels, 7);
    }

    #[test]
    fn test_convert_records_both_passes() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut env = env_map(&mut rig, &mut textures);
        rig.cmd.take_commands();

        env.convert_to_cubemap(&mut rig.ctx(), &mut textures).unwrap();
        assert!(env.is_converted());

        let cmd = &rig.cmd;
        assert_eq!(cmd.commands().first(), Some(&GfxRecordedCommand::Flush));
        assert_eq!(cmd.commands().last(), Some(&GfxRecordedCommand::Flush));
        assert_eq!(cmd.dispatches(), vec![(2, 2, 6), (1, 1, 6)]);

        let source = textures.resource(env.source_texture().resource_idx).unwrap().handle();
        let cube = textures.resource(env.cubemap().resource_idx).unwrap().handle();
        let irradiance = textures.resource(env.irradiance_map().resource_idx).unwrap().handle();
        use GfxResourceState::*;
        assert_eq!(
            cmd.barriers(),
            vec![
                GfxBarrier::transition(cube, Common, UnorderedAccess),
                GfxBarrier::transition(source, PixelShaderResource, NonPixelShaderResource),
                GfxBarrier::transition(irradiance, Common, UnorderedAccess),
                GfxBarrier::transition(cube, UnorderedAccess, NonPixelShaderResource),
                GfxBarrier::transition(source, NonPixelShaderResource, PixelShaderResource),
                GfxBarrier::transition(cube, NonPixelShaderResource, Common),
                GfxBarrier::transition(irradiance, UnorderedAccess, Common),
            ]
        );

        // 第二个 pass 读取 cubemap SRV、写入 irradiance UAV
        let tables = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                GfxRecordedCommand::SetComputeRootDescriptorTable { root_index, table } => Some((*root_index, table.offset)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(tables, vec![(1, 0), (2, 32), (1, 64), (2, 96)]);

        let first_dispatch = cmd.position(|c| matches!(c, GfxRecordedCommand::Dispatch { .. })).unwrap();
        let convolution = cmd.position(|c| *c == GfxRecordedCommand::BeginEvent("Convolution".to_string())).unwrap();
        assert!(first_dispatch < convolution);
    }

    #[test]
    fn test_constants_are_uploaded() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let env = env_map(&mut rig, &mut textures);

        let bytes = rig.mock.resource_bytes(env.env_map_cb.resource_handle()).unwrap();
        let data: EnvMapData = bytemuck::pod_read_unaligned(&bytes[..size_of::<EnvMapData>()]);
        assert_eq!(data.eq_map_cube_map_wh, [64.0, 32.0, 64.0, 64.0]);

        let bytes = rig.mock.resource_bytes(env.convolution_cb.resource_handle()).unwrap();
        let data: ConvolutionData = bytemuck::pod_read_unaligned(&bytes[..size_of::<ConvolutionData>()]);
        assert_eq!(data.size, 16.0);
    }

    #[test]
    fn test_conversion_is_unguarded_but_ensure_is_not() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let mut env = env_map(&mut rig, &mut textures);
        rig.cmd.take_commands();

        assert!(env.ensure_converted(&mut rig.ctx(), &mut textures).unwrap());
        assert!(!env.ensure_converted(&mut rig.ctx(), &mut textures).unwrap());
        assert_eq!(rig.cmd.dispatches().len(), 2);

        env.convert_to_cubemap(&mut rig.ctx(), &mut textures).unwrap();
        assert_eq!(rig.cmd.dispatches().len(), 4);
    }

    #[test]
    fn test_decode_failure_propagates() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let result = EnvironmentMap::new(&mut rig.ctx(), &mut textures, ImageSource::Memory(b"not an image"), 64, 16);
        assert!(matches!(result, Err(GfxError::ImageDecode { .. })));
        assert!(rig.log.contains("failed to decode"));
    }
}
