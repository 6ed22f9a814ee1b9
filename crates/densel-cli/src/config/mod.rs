mod builder;
mod file;
mod models;

pub use builder::{MapOverrides, build_config};
pub use models::AppConfig;
