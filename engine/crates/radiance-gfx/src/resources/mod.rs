pub mod handles;
pub mod owned_resource;
pub mod resource_desc;
pub mod resource_state;
pub mod tracked_resource;
pub mod upload_buffer;
