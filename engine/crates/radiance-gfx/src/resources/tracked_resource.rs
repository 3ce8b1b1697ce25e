use crate::{
    commands::barrier::GfxBarrier,
    resources::{
        handles::{GfxGpuAddress, GfxResourceHandle},
        owned_resource::GfxOwnedResource,
        resource_desc::GfxResourceDesc,
        resource_state::GfxResourceState,
    },
    GfxResult,
};

/// 记录当前状态的 GPU 资源
///
/// 状态只在 [`GfxTrackedResource::barrier`] 中改变：调用方拿到 barrier 后必须将其录制到
/// command list 中，否则记录的状态与 GPU 上的真实状态会不一致
pub struct GfxTrackedResource {
    resource: GfxOwnedResource,
    desc: GfxResourceDesc,
    state: GfxResourceState,
}

// new & init
impl GfxTrackedResource {
    pub fn new(resource: GfxOwnedResource, desc: GfxResourceDesc, initial_state: GfxResourceState) -> Self {
        Self {
            resource,
            desc,
            state: initial_state,
        }
    }
}

// getters
impl GfxTrackedResource {
    #[inline]
    pub fn handle(&self) -> GfxResourceHandle {
        self.resource.handle()
    }

    #[inline]
    pub fn desc(&self) -> &GfxResourceDesc {
        &self.desc
    }

    #[inline]
    pub fn state(&self) -> GfxResourceState {
        self.state
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.resource.name()
    }

    #[inline]
    pub fn gpu_address(&self) -> GfxResult<GfxGpuAddress> {
        self.resource.gpu_address()
    }
}

// tools
impl GfxTrackedResource {
    /// 状态相同时返回 None；否则生成一个 transition barrier，并立刻把记录的状态更新为 `new_state`
    pub fn barrier(&mut self, new_state: GfxResourceState) -> Option<GfxBarrier> {
        if self.state == new_state {
            return None;
        }
        let barrier = GfxBarrier::transition(self.handle(), self.state, new_state);
        self.state = new_state;
        Some(barrier)
    }

    /// 同一资源上前后两次 UAV 访问之间的依赖，不改变状态
    #[inline]
    pub fn uav_barrier(&self) -> GfxBarrier {
        GfxBarrier::uav(self.handle())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{device::GfxDevice, mock::MockGfxDevice, resources::resource_desc::GfxHeapType};

    fn tracked(device: &Rc<dyn GfxDevice>, state: GfxResourceState) -> GfxTrackedResource {
        let desc = GfxResourceDesc::buffer(64);
        let resource = GfxOwnedResource::create(device, GfxHeapType::Default, &desc, state, None, "tracked").unwrap();
        GfxTrackedResource::new(resource, desc, state)
    }

    #[test]
    fn test_barrier_same_state_is_none() {
        let device: Rc<dyn GfxDevice> = Rc::new(MockGfxDevice::new());
        let mut res = tracked(&device, GfxResourceState::Common);
        assert!(res.barrier(GfxResourceState::Common).is_none());
        assert_eq!(res.state(), GfxResourceState::Common);
    }

    #[test]
    fn test_barrier_sequence_chains_states() {
        let device: Rc<dyn GfxDevice> = Rc::new(MockGfxDevice::new());
        let mut res = tracked(&device, GfxResourceState::CopyDest);

        let sequence = [
            GfxResourceState::PixelShaderResource,
            GfxResourceState::PixelShaderResource,
            GfxResourceState::UnorderedAccess,
            GfxResourceState::NonPixelShaderResource,
            GfxResourceState::NonPixelShaderResource,
            GfxResourceState::PixelShaderResource,
        ];

        let mut previous = res.state();
        let mut emitted = 0;
        for next in sequence {
            match res.barrier(next) {
                None => assert_eq!(previous, next),
                Some(GfxBarrier::Transition { resource, before, after }) => {
                    assert_eq!(resource, res.handle());
                    assert_eq!(before, previous);
                    assert_eq!(after, next);
                    emitted += 1;
                }
                Some(other) => panic!("unexpected barrier: {other:?}"),
            }
            assert_eq!(res.state(), next);
            previous = next;
        }
        assert_eq!(emitted, 4);
    }

    #[test]
    fn test_uav_barrier_keeps_state() {
        let device: Rc<dyn GfxDevice> = Rc::new(MockGfxDevice::new());
        let res = tracked(&device, GfxResourceState::UnorderedAccess);
        assert_eq!(res.uav_barrier(), GfxBarrier::uav(res.handle()));
        assert_eq!(res.state(), GfxResourceState::UnorderedAccess);
    }
}
