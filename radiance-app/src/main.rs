use std::rc::Rc;

use radiance_crate_tools::init_log::init_log;
use radiance_gfx::{
    basic::format::GfxFormat,
    device::GfxDevice,
    resources::{
        resource_state::GfxResourceState,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
    vulkan::{VkCommandList, VkGfx},
};
use radiance_render::{
    log_sink::LogFacadeSink,
    raytracing::{
        acceleration_builder::{AccelerationStructureBuilder, AccelerationStructures, RtMeshGeometry},
        rt_scene::RayTracingScene,
    },
    render_context::RenderContext,
    render_settings::RenderSettings,
    texture::{
        environment_map::EnvironmentMap,
        image_source::ImageSource,
        mip_generator::MipGenerator,
        texture_manager::TextureManager,
    },
    tonemapper::Tonemapper,
};

const SETTINGS_FILE: &str = "radiance.toml";

/// y = 0 平面上的 2x2 四边形
const FLOOR_VERTICES: [[f32; 3]; 4] = [[-1.0, 0.0, -1.0], [1.0, 0.0, -1.0], [1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]];
const FLOOR_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// 光追几何所引用的 buffer，需要活到加速结构构建完成之后
struct FloorMesh {
    vertices: GfxUploadBuffer,
    indices: GfxUploadBuffer,
}

impl FloorMesh {
    fn new(device: &Rc<dyn GfxDevice>) -> anyhow::Result<Self> {
        let vertices = GfxUploadBuffer::new(
            device,
            size_of_val(&FLOOR_VERTICES) as u64,
            GfxUploadUsage::Raw,
            1,
            "FloorVertices",
        )?;
        vertices.upload_slice(0, &FLOOR_VERTICES)?;
        let indices =
            GfxUploadBuffer::new(device, size_of_val(&FLOOR_INDICES) as u64, GfxUploadUsage::Raw, 1, "FloorIndices")?;
        indices.upload_slice(0, &FLOOR_INDICES)?;
        Ok(Self { vertices, indices })
    }

    fn geometry(&self) -> RtMeshGeometry {
        RtMeshGeometry {
            vertex_buffer: self.vertices.gpu_address(0),
            vertex_count: FLOOR_VERTICES.len() as u32,
            vertex_stride: size_of::<[f32; 3]>() as u64,
            vertex_format: GfxFormat::R32G32B32Float,
            index_buffer: self.indices.gpu_address(0),
            index_count: FLOOR_INDICES.len() as u32,
        }
    }
}

/// 加载环境贴图、生成 mip 并转换为 cubemap；解码失败时跳过
fn prepare_environment(
    ctx: &mut RenderContext,
    textures: &mut TextureManager,
    mips: &mut MipGenerator,
) -> anyhow::Result<Option<EnvironmentMap>> {
    let _span = tracy_client::span!("prepare_environment");

    let path = ctx.settings.environment_map_path();
    let (cubemap_size, irradiance_size) = (ctx.settings.cubemap_size, ctx.settings.irradiance_map_size);
    let mut env = match EnvironmentMap::new(ctx, textures, ImageSource::File(&path), cubemap_size, irradiance_size) {
        Ok(env) => env,
        Err(e @ radiance_gfx::GfxError::ImageDecode { .. }) => {
            log::warn!("skip environment map: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    mips.generate_mips(ctx, textures, env.source_texture().resource_idx)?;
    mips.flush(ctx, textures)?;
    env.ensure_converted(ctx, textures)?;
    Ok(Some(env))
}

fn build_acceleration_structures(ctx: &mut RenderContext, floor: &FloorMesh) -> anyhow::Result<AccelerationStructures> {
    let _span = tracy_client::span!("build_acceleration_structures");

    let structures = AccelerationStructureBuilder::new(ctx.device, "Floor")
        .add_geometry(floor.geometry())
        .prebuild()?
        .allocate()?
        .build(ctx)?;
    Ok(structures)
}

fn run(ctx: &mut RenderContext) -> anyhow::Result<()> {
    let mut textures = TextureManager::new(ctx.device, ctx.settings)?;
    let mut mips = MipGenerator::new(ctx)?;

    let env = prepare_environment(ctx, &mut textures, &mut mips)?;

    let floor = FloorMesh::new(ctx.device)?;
    let structures = build_acceleration_structures(ctx, &floor)?;

    let (width, height) = (ctx.settings.render_width, ctx.settings.render_height);
    // 光追直接写入 tonemapper 的 HDR 目标
    let tonemapper = Tonemapper::new(ctx, &mut textures, width, height)?;
    let output = tonemapper.hdr_target();
    let output_uav = textures.create_uav(output.resource_idx, 0)?;

    let scene = RayTracingScene::new(ctx)?;
    {
        let _span = tracy_client::span!("trace");
        let output_res = textures
            .resource_mut(output.resource_idx)
            .ok_or_else(|| anyhow::anyhow!("missing ray tracing output"))?;
        if let Some(barrier) = output_res.barrier(GfxResourceState::UnorderedAccess) {
            ctx.cmd.resource_barrier(&[barrier]);
        }
        scene.trace(
            ctx,
            &structures,
            textures.srv_gpu_handle(output_uav),
            scene.scene_constants_address(0),
            width,
            height,
        )?;
    }
    {
        let _span = tracy_client::span!("tonemap");
        tonemapper.render(ctx, &mut textures, 0)?;
        ctx.cmd.flush()?;
    }
    textures.release_staging();
    tracy_client::frame_mark();

    log::info!(
        "done: {} texture(s), environment map {}, blas @ {:#x}, tlas @ {:#x}, output {}x{} at exposure {}",
        textures.texture_count(),
        match &env {
            Some(env) if env.is_converted() => "converted",
            Some(_) => "not converted",
            None => "skipped",
        },
        structures.blas_address()?,
        structures.tlas_address()?,
        width,
        height,
        tonemapper.exposure()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("MainThread");

    let settings_path = std::env::current_exe()?.with_file_name(SETTINGS_FILE);
    let settings = RenderSettings::load_or_default(&settings_path)?;

    let gfx = VkGfx::new("radiance-demo", cfg!(debug_assertions))?;
    log::info!("device: {}", gfx.device_name());
    let mut cmd = VkCommandList::new(&gfx, "MainCommandList")?;
    let device: Rc<dyn GfxDevice> = gfx.clone();
    let sink = LogFacadeSink::default();

    let mut ctx = RenderContext {
        device: &device,
        pipelines: &*gfx,
        cmd: &mut cmd,
        log: &sink,
        settings: &settings,
    };
    run(&mut ctx)
}
