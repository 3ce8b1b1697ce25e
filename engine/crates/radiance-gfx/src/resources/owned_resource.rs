use std::rc::Rc;

use crate::{
    device::GfxDevice,
    error::GfxResult,
    resources::{
        handles::{GfxGpuAddress, GfxResourceHandle},
        resource_desc::{GfxClearValue, GfxHeapType, GfxResourceDesc},
        resource_state::GfxResourceState,
    },
};

/// 独占一个 GPU 资源，drop 时归还给 device
pub struct GfxOwnedResource {
    handle: GfxResourceHandle,
    device: Rc<dyn GfxDevice>,
    name: String,
}

// new & init
impl GfxOwnedResource {
    pub fn create(
        device: &Rc<dyn GfxDevice>,
        heap_type: GfxHeapType,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        clear_value: Option<&GfxClearValue>,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let name = name.as_ref().to_string();
        let handle = device.create_committed_resource(heap_type, desc, initial_state, clear_value, &name)?;
        Ok(Self {
            handle,
            device: device.clone(),
            name,
        })
    }
}

impl Drop for GfxOwnedResource {
    fn drop(&mut self) {
        log::trace!("release resource: {}", self.name);
        self.device.destroy_resource(self.handle);
    }
}

// getters
impl GfxOwnedResource {
    #[inline]
    pub fn handle(&self) -> GfxResourceHandle {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn device(&self) -> &Rc<dyn GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn gpu_address(&self) -> GfxResult<GfxGpuAddress> {
        self.device.gpu_virtual_address(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGfxDevice;

    #[test]
    fn test_drop_releases_resource() {
        let mock = Rc::new(MockGfxDevice::new());
        let device: Rc<dyn GfxDevice> = mock.clone();

        let owned = GfxOwnedResource::create(
            &device,
            GfxHeapType::Default,
            &GfxResourceDesc::buffer(1024),
            GfxResourceState::Common,
            None,
            "scratch",
        )
        .unwrap();
        assert_eq!(mock.live_resource_count(), 1);
        assert_eq!(mock.resource_by_name("scratch"), Some(owned.handle()));

        drop(owned);
        assert_eq!(mock.live_resource_count(), 0);
    }
}
