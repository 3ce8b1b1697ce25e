pub mod acceleration_builder;
pub mod rt_scene;
pub mod shader_table;
