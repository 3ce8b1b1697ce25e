use crate::{basic::format::GfxFormat, resources::handles::GfxDescriptorHeapHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxSrvDimension {
    Texture2D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    Texture2DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    TextureCube {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxUavDimension {
    Texture2D {
        mip_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxSrvDesc {
    pub format: GfxFormat,
    pub dimension: GfxSrvDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxUavDesc {
    pub format: GfxFormat,
    pub dimension: GfxUavDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxRtvDesc {
    pub format: GfxFormat,
    pub mip_slice: u32,
}

/// 写入 descriptor slot 的 view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxViewDesc {
    Srv(GfxSrvDesc),
    Uav(GfxUavDesc),
    Rtv(GfxRtvDesc),
}

// new & init
impl GfxViewDesc {
    pub fn srv_texture_2d(format: GfxFormat, mip_levels: u32) -> Self {
        Self::Srv(GfxSrvDesc {
            format,
            dimension: GfxSrvDimension::Texture2D {
                most_detailed_mip: 0,
                mip_levels,
            },
        })
    }

    pub fn srv_texture_cube(format: GfxFormat, mip_levels: u32) -> Self {
        Self::Srv(GfxSrvDesc {
            format,
            dimension: GfxSrvDimension::TextureCube {
                most_detailed_mip: 0,
                mip_levels,
            },
        })
    }

    pub fn uav_texture_2d(format: GfxFormat, mip_slice: u32) -> Self {
        Self::Uav(GfxUavDesc {
            format,
            dimension: GfxUavDimension::Texture2D { mip_slice },
        })
    }

    pub fn uav_texture_2d_array(format: GfxFormat, mip_slice: u32, array_size: u32) -> Self {
        Self::Uav(GfxUavDesc {
            format,
            dimension: GfxUavDimension::Texture2DArray {
                mip_slice,
                first_array_slice: 0,
                array_size,
            },
        })
    }

    pub fn rtv_texture_2d(format: GfxFormat) -> Self {
        Self::Rtv(GfxRtvDesc { format, mip_slice: 0 })
    }
}

// getters
impl GfxViewDesc {
    #[inline]
    pub fn format(&self) -> GfxFormat {
        match self {
            GfxViewDesc::Srv(srv) => srv.format,
            GfxViewDesc::Uav(uav) => uav.format,
            GfxViewDesc::Rtv(rtv) => rtv.format,
        }
    }

    /// 该 view 可以放入哪一类 heap
    #[inline]
    pub fn heap_type(&self) -> GfxDescriptorHeapType {
        match self {
            GfxViewDesc::Srv(_) | GfxViewDesc::Uav(_) => GfxDescriptorHeapType::CbvSrvUav,
            GfxViewDesc::Rtv(_) => GfxDescriptorHeapType::Rtv,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorHeapType {
    CbvSrvUav,
    Rtv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorHeapDesc {
    pub ty: GfxDescriptorHeapType,
    pub capacity: u32,
    pub shader_visible: bool,
}

/// CPU 侧 descriptor 句柄：heap 起点 + `slot * stride`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxCpuDescriptorHandle {
    pub heap: GfxDescriptorHeapHandle,
    pub offset: u64,
}

/// GPU 侧 descriptor 句柄，只存在于 shader-visible heap 中
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxGpuDescriptorHandle {
    pub heap: GfxDescriptorHeapHandle,
    pub offset: u64,
}
