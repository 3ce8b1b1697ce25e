/// debug label 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);

    /// 用户通过 begin_event 标记的区段
    pub const COLOR_EVENT: glam::Vec4 = Self::BLUE;
    /// command list 本身（每次 execute 之后重新开始的录制区段）
    pub const COLOR_CMD: glam::Vec4 = Self::GREEN;
    /// 加速结构构建
    pub const COLOR_BUILD: glam::Vec4 = Self::YELLOW;
}
