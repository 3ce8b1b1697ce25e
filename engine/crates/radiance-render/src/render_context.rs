use std::rc::Rc;

use radiance_gfx::{
    commands::command_list::GfxCommandList,
    device::{GfxDevice, GfxPipelineLibrary},
};

use crate::{log_sink::LogSink, render_settings::RenderSettings};

/// 一次录制过程中各组件共享的协作者
///
/// 所有 GPU 命令都录制到同一个 `cmd` 中，因此组件之间的执行顺序与调用顺序一致
pub struct RenderContext<'a> {
    pub device: &'a Rc<dyn GfxDevice>,
    pub pipelines: &'a dyn GfxPipelineLibrary,
    pub cmd: &'a mut dyn GfxCommandList,
    pub log: &'a dyn LogSink,
    pub settings: &'a RenderSettings,
}

impl RenderContext<'_> {
    /// 用 debug label 包裹 `f` 中录制的命令
    pub fn scoped_event<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.cmd.begin_event(name);
        let result = f(self);
        self.cmd.end_event();
        result
    }
}
