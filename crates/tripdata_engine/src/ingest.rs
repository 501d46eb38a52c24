use std::io;

use pipeline_logging::pipeline_info;
use thiserror::Error;
use tripdata_core::{Category, ConfigError, PipelineConfig};

use crate::fetch::RetryingFetcher;
use crate::loader::{CategoryLoad, TableLoader};
use crate::persist::{ensure_dir, remove_dir_if_empty, PersistError};
use crate::pool::FetchPool;
use crate::store::{Store, StoreError};
use crate::{FetchFailure, FetchJob};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("download directory: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to start fetch pool: {0}")]
    Pool(#[source] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub categories: Vec<CategoryLoad>,
}

impl IngestReport {
    pub fn category(&self, category: Category) -> Option<&CategoryLoad> {
        self.categories.iter().find(|load| load.category == category)
    }

    pub fn total_rows(&self) -> u64 {
        self.categories.iter().map(|load| load.rows).sum()
    }

    pub fn skipped(&self) -> usize {
        self.categories.iter().map(|load| load.skipped.len()).sum()
    }
}

/// Full-refresh ingest of every configured category.
///
/// The whole partition space is enumerated first. Each category's table is
/// then rebuilt from whatever partitions download; a partition that fails
/// in any way is skipped. Only store failures abort the run.
pub fn run_ingestion(
    store: &mut Store,
    fetcher: &RetryingFetcher,
    config: &PipelineConfig,
) -> Result<IngestReport, IngestError> {
    let base_url = config.source.base_url()?;
    let format = config.source.format()?;
    let extension = config.source.file_extension.as_str();
    ensure_dir(&config.download_dir)?;

    let partitions = config.partitions();
    pipeline_info!(
        "Enumerated {} partition(s) for {} categor(ies)",
        partitions.len(),
        config.source.categories.len()
    );

    let mut report = IngestReport::default();
    for &category in &config.source.categories {
        pipeline_info!("--- Starting processing for {} taxi data ---", category);
        let mut loader = TableLoader::begin(store, category.schema(), format)?;

        let mut jobs = Vec::new();
        for &key in partitions.iter().filter(|key| key.category == category) {
            match FetchJob::for_partition(key, &base_url, extension, &config.download_dir) {
                Ok(job) => jobs.push(job),
                Err(last_error) => loader.skip_unfetched(
                    key,
                    FetchFailure::Exhausted {
                        attempts: 0,
                        last_error,
                    },
                ),
            }
        }

        let mut pool = FetchPool::spawn(fetcher.clone(), jobs, config.fetch.concurrency)
            .map_err(IngestError::Pool)?;
        while let Some(event) = pool.recv() {
            match event.result {
                Ok(file) => {
                    loader.consume(file)?;
                }
                Err(failure) => loader.skip_unfetched(event.key, failure),
            }
        }
        report.categories.push(loader.finish());
    }

    if remove_dir_if_empty(&config.download_dir) {
        pipeline_info!("Removed download directory {:?}", config.download_dir);
    }
    pipeline_info!(
        "Ingest finished: {} rows loaded, {} partition(s) skipped",
        report.total_rows(),
        report.skipped()
    );
    Ok(report)
}
