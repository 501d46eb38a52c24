use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pipeline_logging::{pipeline_info, pipeline_warn};
use tripdata_core::{Category, CleaningAudit, PipelineConfig};
use tripdata_engine::{
    run_analysis, run_cleaning, run_ingestion, with_session, FetchSettings, IngestReport,
    ReqwestFetcher, RetryingFetcher, StoreError,
};

pub fn ingest(config: &PipelineConfig) -> Result<()> {
    let transport = ReqwestFetcher::new(FetchSettings::from_config(&config.fetch))
        .context("failed to build http client")?;
    let fetcher = RetryingFetcher::new(
        Arc::new(transport),
        config.fetch.retry_policy(),
        config.fetch.jitter(),
    );
    let report = with_session(&config.database_path, |store| {
        run_ingestion(store, &fetcher, config)
    })
    .context("ingest failed")?;
    log_ingest(&report);
    Ok(())
}

fn log_ingest(report: &IngestReport) {
    for load in &report.categories {
        pipeline_info!(
            "{}: {} partition(s) loaded, {} skipped, {} rows",
            load.category,
            load.loaded.len(),
            load.skipped.len(),
            load.rows
        );
        for (key, reason) in &load.skipped {
            pipeline_warn!("  skipped {}: {}", key, reason);
        }
    }
}

pub fn clean(config: &PipelineConfig) -> Result<()> {
    let results = with_session::<_, StoreError>(&config.database_path, |store| {
        Ok(run_cleaning(
            store,
            &config.source.categories,
            &config.cleaning,
        ))
    })
    .context("cleaning failed")?;

    let mut failed: Vec<Category> = Vec::new();
    for (category, result) in results {
        match result {
            Ok(audit) => log_audit(&audit),
            Err(err) => {
                pipeline_warn!("{}: {}", category, err);
                failed.push(category);
            }
        }
    }
    if !failed.is_empty() {
        bail!("cleaning failed for {:?}", failed);
    }
    Ok(())
}

fn log_audit(audit: &CleaningAudit) {
    pipeline_info!("Cleaning audit for {}:", audit.category);
    pipeline_info!("  {:<24} {:>12} {:>12}", "stage", "removed", "remaining");
    pipeline_info!("  {:<24} {:>12} {:>12}", "initial", "", audit.initial_rows);
    for stage in &audit.stages {
        pipeline_info!(
            "  {:<24} {:>12} {:>12}",
            stage.stage.name(),
            stage.removed,
            stage.remaining
        );
    }
}

pub fn analyze(config: &PipelineConfig) -> Result<()> {
    let report = with_session(&config.database_path, |store| run_analysis(store, config))
        .context("analysis failed")?;
    for export in &report.exports {
        pipeline_info!(
            "{}: {} rows exported to {:?}",
            export.category,
            export.rows,
            export.csv_path
        );
    }
    pipeline_info!("Manifest written to {:?}", report.manifest_path);
    Ok(())
}

pub fn all(config: &PipelineConfig) -> Result<()> {
    ingest(config)?;
    clean(config)?;
    analyze(config)
}
