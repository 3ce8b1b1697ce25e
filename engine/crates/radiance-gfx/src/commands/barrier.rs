use crate::resources::{handles::GfxResourceHandle, resource_state::GfxResourceState};

/// 录制到 command list 中的资源 barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxBarrier {
    /// 资源从 `before` 状态切换到 `after` 状态
    Transition {
        resource: GfxResourceHandle,
        before: GfxResourceState,
        after: GfxResourceState,
    },
    /// 同一资源上两次 UAV 访问之间的执行与内存依赖
    Uav { resource: GfxResourceHandle },
}

impl GfxBarrier {
    #[inline]
    pub fn transition(resource: GfxResourceHandle, before: GfxResourceState, after: GfxResourceState) -> Self {
        Self::Transition {
            resource,
            before,
            after,
        }
    }

    #[inline]
    pub fn uav(resource: GfxResourceHandle) -> Self {
        Self::Uav { resource }
    }

    #[inline]
    pub fn resource(&self) -> GfxResourceHandle {
        match self {
            GfxBarrier::Transition { resource, .. } | GfxBarrier::Uav { resource } => *resource,
        }
    }
}
