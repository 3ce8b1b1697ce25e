use bytemuck::{Pod, Zeroable};
use radiance_gfx::{
    GfxResult,
    descriptors::view_desc::GfxGpuDescriptorHandle,
    pipelines::{
        pipeline_desc::{GfxHitGroupDesc, GfxRayTracingPipeline, GfxRayTracingPipelineDesc, GfxShaderExport, GfxShaderStage},
        root_signature::{GfxDescriptorRangeType, GfxRootSignatureDesc},
    },
    resources::{
        handles::{GfxGpuAddress, GfxRootSignatureHandle},
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::{
    raytracing::{
        acceleration_builder::AccelerationStructures,
        shader_table::{CLOSEST_HIT_EXPORT, MISS_EXPORT, RAYGEN_EXPORT, ShaderTables, TRIANGLE_HIT_GROUP},
    },
    render_context::RenderContext,
};

const ROOT_PARAM_TLAS: u32 = 0;
const ROOT_PARAM_OUTPUT: u32 = 1;
const ROOT_PARAM_SCENE: u32 = 2;

/// 光追 shader 读取的场景常量，对应 `cbuffer SceneConstants : register(b0)`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub inv_view_proj: glam::Mat4,
    pub camera_position: glam::Vec4,
    pub light_direction: glam::Vec4,
}

impl Default for SceneConstants {
    fn default() -> Self {
        Self {
            inv_view_proj: glam::Mat4::IDENTITY,
            camera_position: glam::Vec4::new(0.0, 1.0, -3.0, 1.0),
            light_direction: glam::Vec4::new(-0.5, -1.0, 0.5, 0.0).normalize(),
        }
    }
}

/// 光追管线、shader table 以及每帧的场景常量
pub struct RayTracingScene {
    root_signature: GfxRootSignatureHandle,
    pipeline: GfxRayTracingPipeline,
    shader_tables: ShaderTables,
    scene_constants: GfxUploadBuffer,
}

// new & init
impl RayTracingScene {
    pub fn new(ctx: &RenderContext) -> GfxResult<Self> {
        let root_signature = ctx.pipelines.create_root_signature(
            &GfxRootSignatureDesc::new()
                .srv(0)
                .table(GfxDescriptorRangeType::Uav, 1, 0)
                .cbv(0),
            "RaytracingGlobalRootSignature",
        )?;

        let pipeline = ctx.pipelines.create_ray_tracing_pipeline(
            &GfxRayTracingPipelineDesc {
                library_path: ctx.settings.shader_path("Raytracing"),
                exports: vec![
                    GfxShaderExport::new(RAYGEN_EXPORT, GfxShaderStage::RayGen),
                    GfxShaderExport::new(MISS_EXPORT, GfxShaderStage::Miss),
                    GfxShaderExport::new(CLOSEST_HIT_EXPORT, GfxShaderStage::ClosestHit),
                ],
                hit_groups: vec![GfxHitGroupDesc {
                    name: TRIANGLE_HIT_GROUP.to_string(),
                    closest_hit: Some(CLOSEST_HIT_EXPORT.to_string()),
                    any_hit: None,
                }],
                // float4 color
                max_payload_size: 16,
                // 三角形重心坐标
                max_attribute_size: 8,
                max_recursion_depth: 1,
                global_root_signature: root_signature,
            },
            "Raytracing",
        )?;
        let shader_tables = ShaderTables::new(ctx.device, ctx.pipelines, &pipeline)?;

        let scene_constants = GfxUploadBuffer::new(
            ctx.device,
            size_of::<SceneConstants>() as u64,
            GfxUploadUsage::ConstantBuffer,
            ctx.settings.frames_count,
            "SceneConstants",
        )?;
        for frame in 0..ctx.settings.frames_count {
            scene_constants.upload_data(frame, &SceneConstants::default())?;
        }

        Ok(Self {
            root_signature,
            pipeline,
            shader_tables,
            scene_constants,
        })
    }
}

// getters
impl RayTracingScene {
    #[inline]
    pub fn pipeline(&self) -> &GfxRayTracingPipeline {
        &self.pipeline
    }

    #[inline]
    pub fn shader_tables(&self) -> &ShaderTables {
        &self.shader_tables
    }

    #[inline]
    pub fn scene_constants_address(&self, frame: u32) -> GfxGpuAddress {
        self.scene_constants.gpu_address(frame)
    }
}

// tools
impl RayTracingScene {
    pub fn update_scene_constants(&self, frame: u32, constants: &SceneConstants) -> GfxResult<()> {
        self.scene_constants.upload_data(frame, constants)
    }

    /// 录制一次 `width x height` 的光追 dispatch，结果写入 `output_table` 指向的 UAV
    pub fn trace(
        &self,
        ctx: &mut RenderContext,
        structures: &AccelerationStructures,
        output_table: GfxGpuDescriptorHandle,
        scene_cb: GfxGpuAddress,
        width: u32,
        height: u32,
    ) -> GfxResult<()> {
        let tlas = structures.tlas_address()?;
        let desc = self.shader_tables.dispatch_rays_desc(width, height);

        ctx.scoped_event("Raytracing", |ctx| {
            ctx.cmd.set_compute_root_signature(self.root_signature);
            ctx.cmd.set_descriptor_heaps(&[output_table.heap]);
            ctx.cmd.set_ray_tracing_pipeline(self.pipeline.handle());
            ctx.cmd.set_compute_root_shader_resource_view(ROOT_PARAM_TLAS, tlas);
            ctx.cmd.set_compute_root_descriptor_table(ROOT_PARAM_OUTPUT, output_table);
            ctx.cmd.set_compute_root_constant_buffer_view(ROOT_PARAM_SCENE, scene_cb);
            ctx.cmd.dispatch_rays(&desc);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use radiance_gfx::{
        basic::format::GfxFormat,
        mock::GfxRecordedCommand,
        pipelines::root_signature::GfxRootParameter,
    };

    use super::*;
    use crate::{
        raytracing::acceleration_builder::{AccelerationStructureBuilder, RtMeshGeometry},
        test_utils::TestRig,
        texture::texture_manager::TextureManager,
    };

    #[test]
    fn test_pipeline_layout() {
        let mut rig = TestRig::new();
        let scene = RayTracingScene::new(&rig.ctx()).unwrap();

        let desc = rig.mock.ray_tracing_pipeline(scene.pipeline().handle()).unwrap();
        assert_eq!(desc.max_payload_size, 16);
        assert_eq!(desc.max_attribute_size, 8);
        assert_eq!(desc.max_recursion_depth, 1);
        assert_eq!(desc.hit_groups[0].name, "TriangleHitGroup");
        assert!(desc.library_path.ends_with("Raytracing.spv"));

        let root = rig.mock.root_signature(desc.global_root_signature).unwrap();
        assert_eq!(
            root.parameters,
            vec![
                GfxRootParameter::ShaderResourceView { shader_register: 0 },
                GfxRootParameter::DescriptorTable {
                    range_type: GfxDescriptorRangeType::Uav,
                    num_descriptors: 1,
                    base_shader_register: 0,
                },
                GfxRootParameter::ConstantBufferView { shader_register: 0 },
            ]
        );
    }

    #[test]
    fn test_trace_records_dispatch() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let scene = RayTracingScene::new(&rig.ctx()).unwrap();
        let structures = AccelerationStructureBuilder::new(&rig.device, "scene")
            .add_geometry(RtMeshGeometry {
                vertex_buffer: 0x2000_0000,
                vertex_count: 3,
                vertex_stride: 12,
                vertex_format: GfxFormat::R32G32B32Float,
                index_buffer: 0x3000_0000,
                index_count: 3,
            })
            .prebuild()
            .unwrap()
            .allocate()
            .unwrap()
            .build(&mut rig.ctx())
            .unwrap();

        let output = textures
            .create_cubemap(&mut rig.ctx(), 8, GfxFormat::R32G32B32A32Float, true, "unused")
            .unwrap();
        let uav = textures.create_uav(output.resource_idx, 0).unwrap();
        let table = textures.srv_gpu_handle(uav);
        rig.cmd.take_commands();

        let scene_cb = scene.scene_constants_address(1);
        scene.trace(&mut rig.ctx(), &structures, table, scene_cb, 64, 32).unwrap();

        let commands = rig.cmd.commands();
        assert_eq!(commands.first(), Some(&GfxRecordedCommand::BeginEvent("Raytracing".to_string())));
        assert_eq!(commands.last(), Some(&GfxRecordedCommand::EndEvent));
        assert!(commands.contains(&GfxRecordedCommand::SetComputeRootShaderResourceView {
            root_index: 0,
            address: structures.tlas_address().unwrap(),
        }));
        assert!(commands.contains(&GfxRecordedCommand::SetComputeRootConstantBufferView {
            root_index: 2,
            address: scene_cb,
        }));
        assert!(commands.contains(&GfxRecordedCommand::SetRayTracingPipeline(scene.pipeline().handle())));

        let GfxRecordedCommand::DispatchRays(desc) = &commands[commands.len() - 2] else {
            panic!("expected dispatch rays");
        };
        assert_eq!(*desc, scene.shader_tables().dispatch_rays_desc(64, 32));
    }

    #[test]
    fn test_scene_constants_per_frame() {
        let mut rig = TestRig::new();
        let scene = RayTracingScene::new(&rig.ctx()).unwrap();
        let stride = scene.scene_constants_address(1) - scene.scene_constants_address(0);
        assert_eq!(stride, 256);

        let constants = SceneConstants {
            camera_position: glam::Vec4::new(1.0, 2.0, 3.0, 1.0),
            ..Default::default()
        };
        scene.update_scene_constants(2, &constants).unwrap();
        let bytes = rig.mock.resource_bytes(scene.scene_constants.resource_handle()).unwrap();
        let read: SceneConstants = bytemuck::pod_read_unaligned(&bytes[512..512 + size_of::<SceneConstants>()]);
        assert_eq!(read, constants);
    }
}
