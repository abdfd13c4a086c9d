pub mod classifier;
pub mod image_service;
