use slotmap::new_key_type;

new_key_type! {
    /// buffer 或 texture
    pub struct GfxResourceHandle;
    pub struct GfxDescriptorHeapHandle;
    pub struct GfxRootSignatureHandle;
    /// compute pipeline
    pub struct GfxPipelineHandle;
    pub struct GfxRayTracingPipelineHandle;
}

/// GPU 虚拟地址
pub type GfxGpuAddress = u64;
