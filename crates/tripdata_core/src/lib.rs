//! Tripdata core: partition space, configuration, retry state machine and
//! cleaning plans. Pure; all IO lives in `tripdata_engine`.
mod category;
mod cleaning;
mod config;
mod metrics;
mod partition;
pub mod retry;
pub mod sql;

pub use category::{Category, CategorySchema, GREEN_SCHEMA, YELLOW_SCHEMA};
pub use cleaning::{cleaning_plan, CleaningAudit, Stage, StageAction, StageAudit, StageSpec};
pub use config::{
    AnalysisConfig, CleaningConfig, ConfigError, DurationCutoff, DurationMeasure, FetchConfig,
    NullPolicy, PartitionFormat, PipelineConfig, SourceConfig, DEFAULT_BASE_URL,
    DEFAULT_USER_AGENT,
};
pub use metrics::{trip_metrics_select, METRIC_COLUMNS, SUMMARY_ROW_FILTER};
pub use partition::{enumerate_partitions, PartitionKey, MONTHS};
pub use retry::{Backoff, FixedBackoff, JitterRange, RetryEvent, RetryPolicy, RetryState};
