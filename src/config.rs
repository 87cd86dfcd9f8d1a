use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: String,

    /// Row cap of every batch an operator emits.
    pub batch_size: usize,
    /// Row cap of a whole query result, 0 means unbounded.
    pub max_results: usize,

    pub max_optimizer_passes: usize,
}

impl Config {
    pub fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("log_level", "info")?
            .set_default("batch_size", 2048)?
            .set_default("max_results", 0)?
            .set_default("max_optimizer_passes", 16)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("SBOXQL"));
        Ok(cfg.build()?.try_deserialize()?)
    }

    /// Install an env_logger using the configured level unless `RUST_LOG`
    /// says otherwise. Repeated calls are no-ops.
    pub fn init_logger(&self) {
        let env = env_logger::Env::default().default_filter_or(self.log_level.as_str());
        let _ = env_logger::Builder::from_env(env).try_init();
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            batch_size: 2048,
            max_results: 0,
            max_optimizer_passes: 16,
        }
    }
}
