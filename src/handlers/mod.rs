pub mod dataset_handlers;
pub mod health_handlers;
pub mod storage_handlers;
