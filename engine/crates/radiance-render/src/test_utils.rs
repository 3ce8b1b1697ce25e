use std::{io::Cursor, rc::Rc};

use image::{ImageFormat, Rgba, RgbaImage};
use radiance_gfx::{
    device::GfxDevice,
    mock::{MockCommandList, MockGfxDevice},
};

use crate::{log_sink::BufferedLogSink, render_context::RenderContext, render_settings::RenderSettings};

/// 编码一张纯白的 PNG
pub fn white_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([255; 4]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// mock 设备 + 录制命令的 command list + 缓存日志
pub struct TestRig {
    pub mock: Rc<MockGfxDevice>,
    pub device: Rc<dyn GfxDevice>,
    pub cmd: MockCommandList,
    pub log: BufferedLogSink,
    pub settings: RenderSettings,
}

impl TestRig {
    pub fn new() -> Self {
        let mock = Rc::new(MockGfxDevice::new());
        let device: Rc<dyn GfxDevice> = mock.clone();
        Self {
            mock,
            device,
            cmd: MockCommandList::new(),
            log: BufferedLogSink::new(),
            settings: RenderSettings::default(),
        }
    }

    pub fn ctx(&mut self) -> RenderContext<'_> {
        RenderContext {
            device: &self.device,
            pipelines: &*self.mock,
            cmd: &mut self.cmd,
            log: &self.log,
            settings: &self.settings,
        }
    }
}
