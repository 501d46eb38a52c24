use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use pipeline_logging::pipeline_info;
use tripdata_core::PipelineConfig;

pub const CONFIG_FILENAME: &str = "tripdata.ron";

/// Reads the pipeline configuration from `path`, falling back to defaults
/// when the file does not exist. The result is validated either way.
pub fn load(path: &Path) -> Result<PipelineConfig> {
    let config = match fs::read_to_string(path) {
        Ok(text) => {
            let config: PipelineConfig = ron::from_str(&text)
                .with_context(|| format!("failed to parse configuration {path:?}"))?;
            pipeline_info!("Loaded configuration from {:?}", path);
            config
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            pipeline_info!("No {:?} found; using default configuration", path);
            PipelineConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read configuration {path:?}"));
        }
    };
    config
        .validate()
        .with_context(|| format!("invalid configuration in {path:?}"))?;
    Ok(config)
}
