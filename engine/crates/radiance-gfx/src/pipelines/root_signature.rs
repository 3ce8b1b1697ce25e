#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorRangeType {
    Srv,
    Uav,
}

/// root signature 中的单个参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxRootParameter {
    /// 以 GPU 地址绑定的 constant buffer
    ConstantBufferView { shader_register: u32 },
    /// 以 GPU 地址绑定的 buffer / 加速结构
    ShaderResourceView { shader_register: u32 },
    /// 指向 shader-visible heap 中一段连续 slot 的 table
    DescriptorTable {
        range_type: GfxDescriptorRangeType,
        num_descriptors: u32,
        base_shader_register: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxFilter {
    Point,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxAddressMode {
    Wrap,
    Clamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxStaticSampler {
    pub shader_register: u32,
    pub filter: GfxFilter,
    pub address_mode: GfxAddressMode,
}

impl GfxStaticSampler {
    pub const fn linear_wrap(shader_register: u32) -> Self {
        Self {
            shader_register,
            filter: GfxFilter::Linear,
            address_mode: GfxAddressMode::Wrap,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxRootSignatureDesc {
    pub parameters: Vec<GfxRootParameter>,
    pub static_samplers: Vec<GfxStaticSampler>,
}

// builder
impl GfxRootSignatureDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cbv(mut self, shader_register: u32) -> Self {
        self.parameters.push(GfxRootParameter::ConstantBufferView { shader_register });
        self
    }

    pub fn srv(mut self, shader_register: u32) -> Self {
        self.parameters.push(GfxRootParameter::ShaderResourceView { shader_register });
        self
    }

    pub fn table(mut self, range_type: GfxDescriptorRangeType, num_descriptors: u32, base_shader_register: u32) -> Self {
        self.parameters.push(GfxRootParameter::DescriptorTable {
            range_type,
            num_descriptors,
            base_shader_register,
        });
        self
    }

    pub fn static_sampler(mut self, sampler: GfxStaticSampler) -> Self {
        self.static_samplers.push(sampler);
        self
    }
}
