pub mod pipeline_desc;
pub mod root_signature;
