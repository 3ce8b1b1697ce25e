/// 资源的使用状态
///
/// 以资源被 GPU 使用的方式来描述，由各个后端映射到具体的
/// pipeline stage / access / image layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GfxResourceState {
    #[default]
    Common,
    CopyDest,
    CopySource,
    PixelShaderResource,
    NonPixelShaderResource,
    AllShaderResource,
    UnorderedAccess,
    RenderTarget,
    GenericRead,
    RaytracingAccelerationStructure,
}

impl GfxResourceState {
    /// 该状态下 GPU 是否会写入资源
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            GfxResourceState::CopyDest | GfxResourceState::UnorderedAccess | GfxResourceState::RenderTarget
        )
    }
}
