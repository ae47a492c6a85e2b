pub mod clock;
pub mod metadata_store;
pub mod object_store;
pub mod pipeline;
pub mod preview_cache;
pub mod provisioner;
pub mod records;
pub mod schema_inference;
pub mod uploader;
pub mod validator;
