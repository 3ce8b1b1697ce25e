use std::rc::Rc;

use bytemuck::Pod;

use crate::{
    basic::align::align_up,
    device::GfxDevice,
    error::{GfxError, GfxResult},
    resources::{
        handles::{GfxGpuAddress, GfxResourceHandle},
        owned_resource::GfxOwnedResource,
        resource_desc::{GfxHeapType, GfxResourceDesc},
        resource_state::GfxResourceState,
    },
};

/// upload buffer 中元素的对齐方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxUploadUsage {
    /// 紧凑排列
    Raw,
    /// 每个元素按 constant buffer 的对齐要求排列（通常为 256）
    ConstantBuffer,
    /// 每个元素按 shader table 的对齐要求排列
    ShaderTable,
}

/// 持久映射、CPU 可写的 buffer，包含 `element_count` 个等大小的元素
///
/// 第 i 个元素的 GPU 地址为 `base + i * element_stride`
pub struct GfxUploadBuffer {
    resource: GfxOwnedResource,
    base_address: GfxGpuAddress,
    element_size: u64,
    element_stride: u64,
    element_count: u32,
    usage: GfxUploadUsage,
}

// new & init
impl GfxUploadBuffer {
    pub fn new(
        device: &Rc<dyn GfxDevice>,
        element_size: u64,
        usage: GfxUploadUsage,
        element_count: u32,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let limits = device.limits();
        let alignment = match usage {
            GfxUploadUsage::Raw => 1,
            GfxUploadUsage::ConstantBuffer => limits.constant_buffer_alignment,
            GfxUploadUsage::ShaderTable => limits.shader_table_alignment as u64,
        };
        let element_stride = align_up(element_size.max(1), alignment);
        let size = element_stride * element_count as u64;

        let resource = GfxOwnedResource::create(
            device,
            GfxHeapType::Upload,
            &GfxResourceDesc::buffer(size),
            GfxResourceState::GenericRead,
            None,
            name,
        )?;
        let base_address = resource.gpu_address()?;

        Ok(Self {
            resource,
            base_address,
            element_size,
            element_stride,
            element_count,
            usage,
        })
    }
}

// getters
impl GfxUploadBuffer {
    #[inline]
    pub fn resource_handle(&self) -> GfxResourceHandle {
        self.resource.handle()
    }

    #[inline]
    pub fn element_stride(&self) -> u64 {
        self.element_stride
    }

    #[inline]
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    #[inline]
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    #[inline]
    pub fn usage(&self) -> GfxUploadUsage {
        self.usage
    }

    #[inline]
    pub fn size_in_bytes(&self) -> u64 {
        self.element_stride * self.element_count as u64
    }

    /// 第 `index` 个元素的 GPU 地址
    #[inline]
    pub fn gpu_address(&self, index: u32) -> GfxGpuAddress {
        debug_assert!(index < self.element_count);
        self.base_address + index as u64 * self.element_stride
    }
}

// tools
impl GfxUploadBuffer {
    #[inline]
    pub fn upload_data<T: Pod>(&self, index: u32, data: &T) -> GfxResult<()> {
        self.upload_bytes(index, bytemuck::bytes_of(data))
    }

    #[inline]
    pub fn upload_slice<T: Pod>(&self, index: u32, data: &[T]) -> GfxResult<()> {
        self.upload_bytes(index, bytemuck::cast_slice(data))
    }

    /// 写入第 `index` 个元素，`bytes` 不能超过 element size
    pub fn upload_bytes(&self, index: u32, bytes: &[u8]) -> GfxResult<()> {
        if index >= self.element_count {
            return Err(GfxError::OutOfRange {
                what: "upload buffer element",
                index: index as u64,
                len: self.element_count as u64,
            });
        }
        if bytes.len() as u64 > self.element_size {
            return Err(GfxError::OutOfRange {
                what: "upload buffer byte",
                index: bytes.len() as u64,
                len: self.element_size,
            });
        }
        self.resource.device().write_mapped(self.resource.handle(), index as u64 * self.element_stride, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGfxDevice;

    #[test]
    fn test_constant_buffer_elements_are_aligned() {
        let mock = Rc::new(MockGfxDevice::new());
        let device: Rc<dyn GfxDevice> = mock.clone();
        let cb = GfxUploadBuffer::new(&device, 16, GfxUploadUsage::ConstantBuffer, 4, "cb").unwrap();

        assert_eq!(cb.element_stride(), 256);
        assert_eq!(cb.size_in_bytes(), 1024);
        for i in 0..4 {
            assert_eq!(cb.gpu_address(i) % 256, 0);
            assert_eq!(cb.gpu_address(i) - cb.gpu_address(0), i as u64 * 256);
        }
    }

    #[test]
    fn test_upload_writes_at_stride_offset() {
        let mock = Rc::new(MockGfxDevice::new());
        let device: Rc<dyn GfxDevice> = mock.clone();
        let cb = GfxUploadBuffer::new(&device, 8, GfxUploadUsage::ConstantBuffer, 2, "cb").unwrap();

        cb.upload_data(1, &[7u32, 9u32]).unwrap();
        let bytes = mock.resource_bytes(cb.resource_handle()).unwrap();
        assert_eq!(&bytes[256..264], bytemuck::bytes_of(&[7u32, 9u32]));
        assert!(bytes[0..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_upload_out_of_range_is_error() {
        let device: Rc<dyn GfxDevice> = Rc::new(MockGfxDevice::new());
        let raw = GfxUploadBuffer::new(&device, 4, GfxUploadUsage::Raw, 1, "raw").unwrap();

        assert!(matches!(raw.upload_data(1, &1u32), Err(GfxError::OutOfRange { .. })));
        assert!(matches!(raw.upload_data(0, &1u64), Err(GfxError::OutOfRange { .. })));
        assert!(raw.upload_data(0, &1u32).is_ok());
    }

    #[test]
    fn test_drop_releases_resource() {
        let mock = Rc::new(MockGfxDevice::new());
        let device: Rc<dyn GfxDevice> = mock.clone();
        {
            let _raw = GfxUploadBuffer::new(&device, 4, GfxUploadUsage::Raw, 1, "raw").unwrap();
            assert_eq!(mock.live_resource_count(), 1);
        }
        assert_eq!(mock.live_resource_count(), 0);
    }
}
