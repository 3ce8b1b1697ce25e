pub mod align;
pub mod color;
pub mod format;
