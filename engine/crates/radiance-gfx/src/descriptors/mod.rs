pub mod descriptor_heap;
pub mod view_desc;
