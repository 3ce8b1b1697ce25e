use std::rc::Rc;

use radiance_gfx::{
    GfxError, GfxResult,
    basic::format::GfxFormat,
    commands::command_list::GfxTextureCopyLayout,
    descriptors::{
        descriptor_heap::{GfxDescriptorHeap, GfxDescriptorSlot},
        view_desc::{GfxCpuDescriptorHandle, GfxDescriptorHeapType, GfxGpuDescriptorHandle, GfxViewDesc},
    },
    device::GfxDevice,
    resources::{
        owned_resource::GfxOwnedResource,
        resource_desc::{GfxClearValue, GfxHeapType, GfxResourceDesc, GfxResourceFlags},
        resource_state::GfxResourceState,
        tracked_resource::GfxTrackedResource,
        upload_buffer::{GfxUploadBuffer, GfxUploadUsage},
    },
};

use crate::{
    render_context::RenderContext,
    render_settings::RenderSettings,
    texture::image_source::{ImageSource, decode_image},
};

/// 创建资源后返回给调用方的稳定索引
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexResourceData {
    /// [`TextureManager::resource`] 的参数
    pub resource_idx: usize,
    /// 共享 heap 中 SRV 的 slot
    pub srv_offset: u32,
    /// RTV heap 中的 slot，只有 render target 才有
    pub rtv_offset: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureOptions {
    /// 分配完整的 mip 链并允许 UAV 访问，只上传 mip 0
    pub generate_mips: bool,
    /// 限制 mip 链的长度
    pub max_mip_levels: Option<u16>,
}

struct ManagedTexture {
    resource: GfxTrackedResource,
    rtv_slot: Option<GfxDescriptorSlot>,
}

/// 管理纹理、cubemap 与 render target
///
/// 持有共享的 shader-visible heap；slot 只追加分配，不会回收
pub struct TextureManager {
    device: Rc<dyn GfxDevice>,
    srv_heap: GfxDescriptorHeap,
    rtv_heap: GfxDescriptorHeap,
    textures: Vec<ManagedTexture>,
    /// 上传用的 staging buffer，需要保留到 copy 在 GPU 上执行完成
    staging: Vec<GfxUploadBuffer>,
}

// new & init
impl TextureManager {
    pub fn new(device: &Rc<dyn GfxDevice>, settings: &RenderSettings) -> GfxResult<Self> {
        let null_srv = GfxViewDesc::srv_texture_2d(GfxFormat::R8G8B8A8Unorm, 1);
        let srv_heap = GfxDescriptorHeap::new_shader_visible(device, settings.max_textures, &null_srv, "TexturesHeap")?;
        let rtv_heap = GfxDescriptorHeap::new_cpu_only(
            device,
            GfxDescriptorHeapType::Rtv,
            settings.max_render_targets,
            "RenderTargetsHeap",
        )?;

        Ok(Self {
            device: device.clone(),
            srv_heap,
            rtv_heap,
            textures: Vec::new(),
            staging: Vec::new(),
        })
    }
}

// getters
impl TextureManager {
    #[inline]
    pub fn resource(&self, resource_idx: usize) -> Option<&GfxTrackedResource> {
        self.textures.get(resource_idx).map(|tex| &tex.resource)
    }

    #[inline]
    pub fn resource_mut(&mut self, resource_idx: usize) -> Option<&mut GfxTrackedResource> {
        self.textures.get_mut(resource_idx).map(|tex| &mut tex.resource)
    }

    pub fn rtv_handle(&self, resource_idx: usize) -> Option<GfxCpuDescriptorHandle> {
        let slot = self.textures.get(resource_idx)?.rtv_slot?;
        Some(self.rtv_heap.cpu_handle(slot))
    }

    #[inline]
    pub fn srv_gpu_handle(&self, srv_offset: u32) -> GfxGpuDescriptorHandle {
        self.srv_heap.gpu_handle(GfxDescriptorSlot(srv_offset))
    }

    #[inline]
    pub fn descriptor_heap(&self) -> &GfxDescriptorHeap {
        &self.srv_heap
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn staging_count(&self) -> usize {
        self.staging.len()
    }
}

// tools
impl TextureManager {
    /// 解码并上传纹理
    ///
    /// 录制的命令：copy（目标处于 CopyDest）→ 转换到 PixelShaderResource。
    /// 解码失败时通过 log sink 报告，并返回错误
    pub fn create_texture(
        &mut self,
        ctx: &mut RenderContext,
        source: ImageSource<'_>,
        options: TextureOptions,
    ) -> GfxResult<TexResourceData> {
        let name = source.name();
        let image = match decode_image(source) {
            Ok(image) => image,
            Err(e) => {
                ctx.log.error(&format!("failed to decode `{name}`: {e}"));
                return Err(e);
            }
        };

        let (mip_levels, flags) = if options.generate_mips {
            let full = GfxResourceDesc::full_mip_count(image.width, image.height);
            let mips = options.max_mip_levels.map_or(full, |max| full.min(max.max(1)));
            (mips, GfxResourceFlags::ALLOW_UNORDERED_ACCESS)
        } else {
            (1, GfxResourceFlags::empty())
        };
        let desc =
            GfxResourceDesc::texture_2d(image.width, image.height, image.format, mip_levels).with_flags(flags);

        let staging = GfxUploadBuffer::new(
            &self.device,
            image.pixels.len() as u64,
            GfxUploadUsage::Raw,
            1,
            format!("{name}::staging"),
        )?;
        staging.upload_bytes(0, &image.pixels)?;

        let mut resource = self.create_tracked(&desc, GfxResourceState::CopyDest, None, &name)?;
        // 录制命令之前先拿到 slot，heap 已满时命令流保持不变
        let srv_slot = self.srv_heap.allocate()?;
        ctx.cmd.copy_buffer_to_texture(
            resource.handle(),
            staging.resource_handle(),
            &GfxTextureCopyLayout {
                offset: 0,
                row_pitch: image.row_pitch(),
                width: image.width,
                height: image.height,
                format: image.format,
                mip_level: 0,
                array_slice: 0,
            },
        );
        if let Some(barrier) = resource.barrier(GfxResourceState::PixelShaderResource) {
            ctx.cmd.resource_barrier(&[barrier]);
        }

        // 命令已引用这两个资源，之后的失败也不能释放它们
        self.staging.push(staging);
        let handle = resource.handle();
        let resource_idx = self.push(resource, None);
        self.srv_heap.write_view(srv_slot, Some(handle), &GfxViewDesc::srv_texture_2d(image.format, mip_levels as u32))?;

        ctx.log.info(&format!("texture `{}` {}x{} with {} mip(s)", name, image.width, image.height, mip_levels));
        Ok(TexResourceData {
            resource_idx,
            srv_offset: srv_slot.index(),
            rtv_offset: None,
        })
    }

    /// 6 个 array slice 的 2D 纹理，不上传数据，由调用方通过 compute 填充
    pub fn create_cubemap(
        &mut self,
        ctx: &mut RenderContext,
        size: u32,
        format: GfxFormat,
        allow_uav: bool,
        name: &str,
    ) -> GfxResult<TexResourceData> {
        let flags = if allow_uav { GfxResourceFlags::ALLOW_UNORDERED_ACCESS } else { GfxResourceFlags::empty() };
        let desc = GfxResourceDesc::texture_2d(size, size, format, 1).with_array_size(6).with_flags(flags);

        let resource = self.create_tracked(&desc, GfxResourceState::Common, None, name)?;
        let srv_slot = self.srv_heap.create_view(resource.handle(), &GfxViewDesc::srv_texture_cube(format, 1))?;
        let resource_idx = self.push(resource, None);

        ctx.log.info(&format!("cubemap `{name}` {size}x{size}"));
        Ok(TexResourceData {
            resource_idx,
            srv_offset: srv_slot.index(),
            rtv_offset: None,
        })
    }

    /// 同时拥有 RTV 与 SRV 的 render target，初始状态为 RenderTarget
    pub fn create_rt(
        &mut self,
        ctx: &mut RenderContext,
        desc: &GfxResourceDesc,
        name: &str,
        clear_value: Option<&GfxClearValue>,
    ) -> GfxResult<TexResourceData> {
        let desc = desc.with_flags(desc.flags | GfxResourceFlags::ALLOW_RENDER_TARGET);

        let resource = self.create_tracked(&desc, GfxResourceState::RenderTarget, clear_value, name)?;
        let rtv_slot = self.rtv_heap.create_view(resource.handle(), &GfxViewDesc::rtv_texture_2d(desc.format))?;
        let srv_slot = self
            .srv_heap
            .create_view(resource.handle(), &GfxViewDesc::srv_texture_2d(desc.format, desc.mip_levels as u32))?;
        let resource_idx = self.push(resource, Some(rtv_slot));

        ctx.log.info(&format!("render target `{}` {}x{}", name, desc.width, desc.height));
        Ok(TexResourceData {
            resource_idx,
            srv_offset: srv_slot.index(),
            rtv_offset: Some(rtv_slot.index()),
        })
    }

    /// 在共享 heap 中为 `resource_idx` 的某个 mip 发布一个 UAV，返回 slot
    pub fn create_uav(&mut self, resource_idx: usize, mip_slice: u32) -> GfxResult<u32> {
        let resource = self.resource(resource_idx).ok_or(GfxError::InvalidHandle("texture"))?;
        if !resource.desc().flags.contains(GfxResourceFlags::ALLOW_UNORDERED_ACCESS) {
            return Err(GfxError::Unsupported(format!("`{}` does not allow unordered access", resource.name())));
        }
        let view = GfxViewDesc::uav_texture_2d(resource.desc().format, mip_slice);
        let handle = resource.handle();
        Ok(self.srv_heap.create_view(handle, &view)?.index())
    }

    /// 在所有上传命令执行完成（flush）之后调用
    pub fn release_staging(&mut self) {
        if !self.staging.is_empty() {
            log::debug!("release {} staging buffer(s)", self.staging.len());
        }
        self.staging.clear();
    }

    fn create_tracked(
        &self,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        clear_value: Option<&GfxClearValue>,
        name: &str,
    ) -> GfxResult<GfxTrackedResource> {
        let resource =
            GfxOwnedResource::create(&self.device, GfxHeapType::Default, desc, initial_state, clear_value, name)?;
        Ok(GfxTrackedResource::new(resource, *desc, initial_state))
    }

    fn push(&mut self, resource: GfxTrackedResource, rtv_slot: Option<GfxDescriptorSlot>) -> usize {
        self.textures.push(ManagedTexture { resource, rtv_slot });
        self.textures.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use radiance_gfx::{
        commands::barrier::GfxBarrier, descriptors::descriptor_heap::GfxDescriptorSlotState,
        mock::GfxRecordedCommand,
    };

    use super::*;
    use crate::test_utils::{TestRig, white_png};

    #[test]
    fn test_create_texture_from_white_png() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(4, 4);

        let data = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();
        assert_eq!(data, TexResourceData { resource_idx: 0, srv_offset: 0, rtv_offset: None });

        let resource = textures.resource(0).unwrap();
        assert_eq!((resource.desc().width, resource.desc().height), (4, 4));
        assert_eq!(resource.desc().format, GfxFormat::R8G8B8A8Unorm);
        assert_eq!(resource.desc().mip_levels, 1);
        assert_eq!(resource.state(), GfxResourceState::PixelShaderResource);
        assert_eq!(
            textures.descriptor_heap().slot_state(GfxDescriptorSlot(0)),
            Some(GfxDescriptorSlotState::Bound(resource.handle()))
        );

        // copy 之后才转换状态
        let commands = rig.cmd.commands();
        assert_eq!(commands.len(), 2);
        let GfxRecordedCommand::CopyBufferToTexture { dst, src, layout } = &commands[0] else {
            panic!("expected a copy, got {:?}", commands[0]);
        };
        assert_eq!(*dst, resource.handle());
        assert_eq!(layout.row_pitch, 16);
        assert_eq!(rig.mock.resource_bytes(*src).unwrap(), vec![255u8; 64]);
        assert_eq!(
            commands[1],
            GfxRecordedCommand::ResourceBarrier(vec![GfxBarrier::transition(
                resource.handle(),
                GfxResourceState::CopyDest,
                GfxResourceState::PixelShaderResource
            )])
        );
        assert_eq!(textures.staging_count(), 1);
    }

    #[test]
    fn test_srv_slots_are_append_only() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(2, 2);

        for expected in 0..4u32 {
            let data =
                textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();
            assert_eq!(data.srv_offset, expected);
            assert_eq!(textures.srv_gpu_handle(data.srv_offset).offset, expected as u64 * 32);
        }
        assert_eq!(textures.descriptor_heap().allocated_count(), 4);
    }

    #[test]
    fn test_decode_failure_is_logged_and_returned() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();

        let result = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(b"garbage"), TextureOptions::default());
        assert!(matches!(result, Err(GfxError::ImageDecode { .. })));
        assert!(rig.log.contains("[ERROR] failed to decode"));
        assert!(rig.cmd.commands().is_empty());
        assert_eq!(textures.texture_count(), 0);
        assert_eq!(textures.descriptor_heap().allocated_count(), 0);
    }

    #[test]
    fn test_heap_full_records_nothing() {
        let mut rig = TestRig::new();
        rig.settings.max_textures = 1;
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(4, 4);
        textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();
        let live = rig.mock.live_resource_count();
        rig.cmd.take_commands();

        let result = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default());
        assert!(matches!(result, Err(GfxError::DescriptorHeapFull { capacity: 1, requested: 1, .. })));
        assert!(rig.cmd.commands().is_empty());
        assert_eq!(textures.texture_count(), 1);
        assert_eq!(textures.staging_count(), 1);
        assert_eq!(rig.mock.live_resource_count(), live);
    }

    #[test]
    fn test_recorded_copy_targets_live_resources() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(4, 4);
        textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();

        let GfxRecordedCommand::CopyBufferToTexture { dst, src, .. } = &rig.cmd.commands()[0] else {
            panic!("expected a copy, got {:?}", rig.cmd.commands()[0]);
        };
        assert!(rig.mock.resource(*dst).is_some());
        assert!(rig.mock.resource(*src).is_some());
    }

    #[test]
    fn test_mip_chain_is_clamped() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(16, 8);

        let full = TextureOptions { generate_mips: true, max_mip_levels: None };
        let data = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), full).unwrap();
        let desc = *textures.resource(data.resource_idx).unwrap().desc();
        assert_eq!(desc.mip_levels, 5);
        assert!(desc.flags.contains(GfxResourceFlags::ALLOW_UNORDERED_ACCESS));

        let clamped = TextureOptions { generate_mips: true, max_mip_levels: Some(3) };
        let data = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), clamped).unwrap();
        assert_eq!(textures.resource(data.resource_idx).unwrap().desc().mip_levels, 3);
    }

    #[test]
    fn test_create_cubemap() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();

        let data =
            textures.create_cubemap(&mut rig.ctx(), 64, GfxFormat::R32G32B32A32Float, true, "EnvCubemap").unwrap();
        let resource = textures.resource(data.resource_idx).unwrap();
        assert_eq!(resource.desc().depth_or_array_size, 6);
        assert!(resource.desc().is_cube_compatible());
        assert_eq!(
            rig.mock.descriptor_slot(textures.descriptor_heap().handle(), data.srv_offset).unwrap().view,
            GfxViewDesc::srv_texture_cube(GfxFormat::R32G32B32A32Float, 1)
        );
        assert!(rig.cmd.commands().is_empty());
    }

    #[test]
    fn test_create_rt_has_both_views() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let clear = GfxClearValue { format: GfxFormat::R16G16B16A16Float, color: [0.1, 0.2, 0.3, 1.0] };

        let desc = GfxResourceDesc::texture_2d(32, 16, GfxFormat::R16G16B16A16Float, 1);
        let data = textures.create_rt(&mut rig.ctx(), &desc, "HDRTexture", Some(&clear)).unwrap();
        assert_eq!(data.rtv_offset, Some(0));
        assert_eq!(data.srv_offset, 0);
        assert_eq!(textures.rtv_handle(data.resource_idx).unwrap().offset, 0);

        let resource = textures.resource(data.resource_idx).unwrap();
        assert_eq!(resource.state(), GfxResourceState::RenderTarget);
        assert!(resource.desc().flags.contains(GfxResourceFlags::ALLOW_RENDER_TARGET));
        assert_eq!(rig.mock.resource(resource.handle()).unwrap().clear_value, Some(clear));
    }

    #[test]
    fn test_release_staging_frees_upload_buffers() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(4, 4);
        textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();

        let live = rig.mock.live_resource_count();
        textures.release_staging();
        assert_eq!(textures.staging_count(), 0);
        assert_eq!(rig.mock.live_resource_count(), live - 1);
    }

    #[test]
    fn test_create_uav_requires_flag() {
        let mut rig = TestRig::new();
        let mut textures = TextureManager::new(&rig.device, &rig.settings).unwrap();
        let png = white_png(4, 4);
        let plain = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), TextureOptions::default()).unwrap();
        assert!(textures.create_uav(plain.resource_idx, 0).is_err());

        let options = TextureOptions { generate_mips: true, max_mip_levels: None };
        let mipped = textures.create_texture(&mut rig.ctx(), ImageSource::Memory(&png), options).unwrap();
        assert_eq!(textures.create_uav(mipped.resource_idx, 0).unwrap(), 2);
    }
}
