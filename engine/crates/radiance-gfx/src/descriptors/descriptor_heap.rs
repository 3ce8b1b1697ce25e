use std::rc::Rc;

use crate::{
    descriptors::view_desc::{
        GfxCpuDescriptorHandle, GfxDescriptorHeapDesc, GfxDescriptorHeapType, GfxGpuDescriptorHandle, GfxViewDesc,
    },
    device::GfxDevice,
    error::{GfxError, GfxResult},
    resources::handles::{GfxDescriptorHeapHandle, GfxResourceHandle},
};

/// heap 中的 slot 序号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxDescriptorSlot(pub u32);

impl GfxDescriptorSlot {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn offset(self, count: u32) -> Self {
        Self(self.0 + count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxDescriptorSlotState {
    /// 写入的是 null view
    Unbound,
    Bound(GfxResourceHandle),
}

/// 固定容量、只追加分配的 descriptor heap
///
/// shader-visible 的 heap 在创建时每个 slot 都会被写入 null view，
/// 因此 shader 通过 table 访问到尚未绑定的 slot 时行为是确定的
pub struct GfxDescriptorHeap {
    handle: GfxDescriptorHeapHandle,
    device: Rc<dyn GfxDevice>,
    desc: GfxDescriptorHeapDesc,
    stride: u32,
    next_free: u32,
    slots: Vec<GfxDescriptorSlotState>,
    /// 每个 slot 是否都已经写入过（至少是 null view）
    fully_initialized: bool,
    name: String,
}

// new & init
impl GfxDescriptorHeap {
    /// 所有 slot 写入同一种 null view
    pub fn new_shader_visible(
        device: &Rc<dyn GfxDevice>,
        capacity: u32,
        null_view: &GfxViewDesc,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::new_shader_visible_with(device, capacity, |_| *null_view, name)
    }

    /// 每个 slot 的 null view 由 `null_view_of(slot)` 决定
    pub fn new_shader_visible_with(
        device: &Rc<dyn GfxDevice>,
        capacity: u32,
        null_view_of: impl Fn(u32) -> GfxViewDesc,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let desc = GfxDescriptorHeapDesc {
            ty: GfxDescriptorHeapType::CbvSrvUav,
            capacity,
            shader_visible: true,
        };
        let mut heap = Self::create(device, desc, name.as_ref())?;
        for index in 0..capacity {
            device.write_descriptor(heap.handle, index, None, &null_view_of(index))?;
        }
        heap.fully_initialized = true;
        Ok(heap)
    }

    /// CPU-only heap 不会被 shader 访问，不需要 null 初始化
    pub fn new_cpu_only(
        device: &Rc<dyn GfxDevice>,
        ty: GfxDescriptorHeapType,
        capacity: u32,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let desc = GfxDescriptorHeapDesc {
            ty,
            capacity,
            shader_visible: false,
        };
        let mut heap = Self::create(device, desc, name.as_ref())?;
        heap.fully_initialized = true;
        Ok(heap)
    }

    fn create(device: &Rc<dyn GfxDevice>, desc: GfxDescriptorHeapDesc, name: &str) -> GfxResult<Self> {
        let handle = device.create_descriptor_heap(&desc, name)?;
        Ok(Self {
            handle,
            device: device.clone(),
            stride: device.descriptor_increment_size(desc.ty),
            next_free: 0,
            slots: vec![GfxDescriptorSlotState::Unbound; desc.capacity as usize],
            fully_initialized: false,
            desc,
            name: name.to_string(),
        })
    }
}

impl Drop for GfxDescriptorHeap {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.handle);
    }
}

// getters
impl GfxDescriptorHeap {
    #[inline]
    pub fn handle(&self) -> GfxDescriptorHeapHandle {
        self.handle
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.next_free
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 只有该值为 true 的 heap 才可以绑定到 command list
    #[inline]
    pub fn is_fully_initialized(&self) -> bool {
        self.fully_initialized
    }

    #[inline]
    pub fn slot_state(&self, slot: GfxDescriptorSlot) -> Option<GfxDescriptorSlotState> {
        self.slots.get(slot.index() as usize).copied()
    }

    #[inline]
    pub fn cpu_handle(&self, slot: GfxDescriptorSlot) -> GfxCpuDescriptorHandle {
        GfxCpuDescriptorHandle {
            heap: self.handle,
            offset: slot.index() as u64 * self.stride as u64,
        }
    }

    /// 下一次 [`GfxDescriptorHeap::allocate`] 将返回的 slot 的 CPU 句柄
    #[inline]
    pub fn next_free_cpu_handle(&self) -> GfxCpuDescriptorHandle {
        self.cpu_handle(GfxDescriptorSlot(self.next_free))
    }

    #[inline]
    pub fn gpu_handle(&self, slot: GfxDescriptorSlot) -> GfxGpuDescriptorHandle {
        debug_assert!(self.desc.shader_visible, "gpu handle of cpu-only heap `{}`", self.name);
        GfxGpuDescriptorHandle {
            heap: self.handle,
            offset: slot.index() as u64 * self.stride as u64,
        }
    }
}

// tools
impl GfxDescriptorHeap {
    #[inline]
    pub fn allocate(&mut self) -> GfxResult<GfxDescriptorSlot> {
        self.allocate_range(1)
    }

    /// 分配 `count` 个连续 slot，返回第一个
    pub fn allocate_range(&mut self, count: u32) -> GfxResult<GfxDescriptorSlot> {
        let end = match self.next_free.checked_add(count) {
            Some(end) if end <= self.desc.capacity => end,
            _ => {
                return Err(GfxError::DescriptorHeapFull {
                    name: self.name.clone(),
                    capacity: self.desc.capacity,
                    requested: count,
                });
            }
        };
        let first = GfxDescriptorSlot(self.next_free);
        self.next_free = end;
        Ok(first)
    }

    /// 回收所有 slot，下一次分配重新从 0 开始
    ///
    /// 已写入的 view 保持不变，调用方在再次绑定前需要覆写它们
    pub fn reset(&mut self) {
        self.next_free = 0;
    }

    /// 分配一个 slot 并写入 `resource` 的 view
    pub fn create_view(&mut self, resource: GfxResourceHandle, view: &GfxViewDesc) -> GfxResult<GfxDescriptorSlot> {
        let slot = self.allocate()?;
        self.write_view(slot, Some(resource), view)?;
        Ok(slot)
    }

    /// 覆写一个已分配的 slot；`resource` 为 None 时写入 null view
    pub fn write_view(
        &mut self,
        slot: GfxDescriptorSlot,
        resource: Option<GfxResourceHandle>,
        view: &GfxViewDesc,
    ) -> GfxResult<()> {
        if slot.index() >= self.next_free {
            return Err(GfxError::OutOfRange {
                what: "descriptor slot",
                index: slot.index() as u64,
                len: self.next_free as u64,
            });
        }
        debug_assert_eq!(view.heap_type(), self.desc.ty);

        self.device.write_descriptor(self.handle, slot.index(), resource, view)?;
        self.slots[slot.index() as usize] = match resource {
            Some(resource) => GfxDescriptorSlotState::Bound(resource),
            None => GfxDescriptorSlotState::Unbound,
        };
        Ok(())
    }
}
