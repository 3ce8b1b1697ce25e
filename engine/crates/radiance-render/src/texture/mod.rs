pub mod environment_map;
pub mod image_source;
pub mod mip_generator;
pub mod texture_manager;
