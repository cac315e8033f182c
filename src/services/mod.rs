pub mod discovery_service;
pub mod executor_service;
pub mod image_service;
pub mod ocr_service;
pub mod progress_service;
pub mod search_service;
pub mod worker_service;
