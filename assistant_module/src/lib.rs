pub mod adapters;
pub mod blob_store;
pub mod errors;
pub mod extraction;
pub mod models;
pub mod service;
pub mod store;
pub mod validation;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
