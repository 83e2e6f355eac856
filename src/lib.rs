// easydocker library: build context packaging and container telemetry

pub mod build_context;
pub mod config;
pub mod docker_repo;
pub mod error;
pub mod models;
pub mod telemetry;
pub mod version;
