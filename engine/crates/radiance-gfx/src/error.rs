use thiserror::Error;

/// GFX 层以及建立在其上的渲染组件共用的错误类型
#[derive(Debug, Error)]
pub enum GfxError {
    /// 设备调用失败，`code` 为后端返回的原始错误码
    #[error("device call `{call}` failed ({code}): {message}")]
    Device {
        call: &'static str,
        code: i32,
        message: String,
    },

    #[error("descriptor heap `{name}` is full: capacity {capacity}, {requested} more slot(s) requested")]
    DescriptorHeapFull {
        name: String,
        capacity: u32,
        requested: u32,
    },

    #[error("mip generation batch overflow: {queued} queued + {requested} requested > capacity {capacity}")]
    MipBatchOverflow { queued: u32, requested: u32, capacity: u32 },

    #[error("image decode failed ({code}): {message}")]
    ImageDecode { code: u32, message: String },

    #[error("{level} acceleration structure prebuild returned an empty size")]
    EmptyPrebuild { level: &'static str },

    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    #[error("{what} index {index} is out of range (len {len})")]
    OutOfRange { what: &'static str, index: u64, len: u64 },

    #[error("shader export `{0}` not found in pipeline")]
    MissingShaderExport(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GfxError {
    #[inline]
    pub fn device(call: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self::Device {
            call,
            code,
            message: message.into(),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
