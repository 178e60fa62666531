pub mod analytics;
pub mod config;
pub mod engine;
pub mod models;
pub mod storage;
