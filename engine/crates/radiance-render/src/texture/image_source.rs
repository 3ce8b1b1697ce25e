use std::path::Path;

use image::{DynamicImage, ImageError};
use radiance_gfx::{GfxError, GfxResult, basic::format::GfxFormat};

/// 纹理数据的来源
#[derive(Clone, Copy, Debug)]
pub enum ImageSource<'a> {
    File(&'a Path),
    Memory(&'a [u8]),
}

impl ImageSource<'_> {
    /// 用作资源的调试名称
    pub fn name(&self) -> String {
        match self {
            ImageSource::File(path) => path.display().to_string(),
            ImageSource::Memory(bytes) => format!("memory texture ({} bytes)", bytes.len()),
        }
    }
}

/// 解码后紧密排列的像素
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: GfxFormat,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// 浮点格式（HDR / EXR）转换为 RGBA32F，其余转换为 RGBA8
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => Self {
                width,
                height,
                format: GfxFormat::R32G32B32A32Float,
                pixels: bytemuck::cast_slice(image.to_rgba32f().as_raw()).to_vec(),
            },
            _ => Self {
                width,
                height,
                format: GfxFormat::R8G8B8A8Unorm,
                pixels: image.to_rgba8().into_raw(),
            },
        }
    }

    #[inline]
    pub fn row_pitch(&self) -> u32 {
        self.width * self.format.pixel_size()
    }
}

pub fn decode_image(source: ImageSource<'_>) -> GfxResult<DecodedImage> {
    let image = match source {
        ImageSource::File(path) => image::ImageReader::open(path)
            .map_err(ImageError::IoError)
            .and_then(|reader| reader.with_guessed_format().map_err(ImageError::IoError))
            .and_then(|reader| reader.decode()),
        ImageSource::Memory(bytes) => image::load_from_memory(bytes),
    };
    image.map(DecodedImage::from_dynamic).map_err(decode_error)
}

fn decode_error(e: ImageError) -> GfxError {
    let code = match &e {
        ImageError::Decoding(_) => 1,
        ImageError::Encoding(_) => 2,
        ImageError::Parameter(_) => 3,
        ImageError::Limits(_) => 4,
        ImageError::Unsupported(_) => 5,
        ImageError::IoError(_) => 6,
    };
    GfxError::ImageDecode {
        code,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, Rgb32FImage};

    use super::*;
    use crate::test_utils::white_png;

    #[test]
    fn test_decode_png_to_rgba8() {
        let png = white_png(4, 4);
        let decoded = decode_image(ImageSource::Memory(&png)).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 4));
        assert_eq!(decoded.format, GfxFormat::R8G8B8A8Unorm);
        assert_eq!(decoded.pixels.len(), 4 * 4 * 4);
        assert!(decoded.pixels.iter().all(|&b| b == 255));
        assert_eq!(decoded.row_pitch(), 16);
    }

    #[test]
    fn test_float_image_becomes_rgba32f() {
        let image = DynamicImage::ImageRgb32F(Rgb32FImage::from_pixel(2, 1, Rgb([0.5, 1.5, 2.0])));
        let decoded = DecodedImage::from_dynamic(image);
        assert_eq!(decoded.format, GfxFormat::R32G32B32A32Float);
        let floats: &[f32] = bytemuck::cast_slice(&decoded.pixels);
        assert_eq!(floats, &[0.5, 1.5, 2.0, 1.0, 0.5, 1.5, 2.0, 1.0]);
    }

    #[test]
    fn test_garbage_reports_decode_error() {
        let err = decode_image(ImageSource::Memory(b"definitely not an image")).err().unwrap();
        assert!(matches!(err, GfxError::ImageDecode { code, .. } if code != 0));
    }

    #[test]
    fn test_missing_file_reports_io_code() {
        let path = std::env::temp_dir().join("radiance-missing-texture.png");
        let err = decode_image(ImageSource::File(&path)).err().unwrap();
        assert!(matches!(err, GfxError::ImageDecode { code: 6, .. }));
    }
}
