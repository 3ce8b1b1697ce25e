//! Radiance 工具集
//!
//! 提供日志初始化、资源路径管理等在各个 crate 之间共享的工具。

pub mod init_log;
pub mod resource;
