use densel::engine::config::EngineConfig;

/// Fully resolved settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine_program: String,
    pub engine_args: Vec<String>,
    pub engine: EngineConfig,
}
