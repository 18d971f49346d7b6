use std::sync::Arc;

pub mod agent;
pub mod config;
pub mod service;
pub mod sidecar;
pub mod utils;

pub type AppConfig = Arc<config::Config>;
