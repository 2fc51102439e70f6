pub mod app;
pub mod manifest;
pub mod models;
