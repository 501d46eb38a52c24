//! Tripdata engine: downloads, analytical store, loading and cleaning.
mod analysis;
mod clean;
mod fetch;
mod ingest;
mod loader;
mod persist;
mod pool;
mod store;
mod types;

pub use analysis::{
    build_trip_metrics, carbon_summary, run_analysis, AnalysisError, AnalysisReport,
    CarbonSummary, CategoryExport, Extremes, LargestTrip, MANIFEST_FILENAME,
};
pub use clean::{run_cleaning, CleanError, CleaningPipeline};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, RetryingFetcher, Sleeper, TokioSleeper};
pub use ingest::{run_ingestion, IngestError, IngestReport};
pub use loader::{CategoryLoad, LoadSkip, PartitionLoad, TableLoader};
pub use persist::{
    ensure_dir, remove_dir_if_empty, remove_partition_file, AtomicFileWriter, PersistError,
};
pub use pool::FetchPool;
pub use store::{partition_select, with_session, Store, StoreError};
pub use types::{FailureKind, FetchError, FetchEvent, FetchFailure, FetchJob, FetchedFile};
