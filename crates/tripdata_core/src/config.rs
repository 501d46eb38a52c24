use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::retry::{JitterRange, RetryPolicy};
use crate::{enumerate_partitions, Category, PartitionKey};

pub const DEFAULT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

/// The source host rejects default client identifiers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base url {url}: {reason}")]
    BaseUrl { url: String, reason: String },
    #[error("unsupported partition file extension: {0}")]
    FileExtension(String),
    #[error("at least one category is required")]
    NoCategories,
    #[error("category {0} is listed more than once")]
    DuplicateCategory(Category),
    #[error("start year {start} is after end year {end}")]
    YearRange { start: i32, end: i32 },
    #[error("retry budget must allow at least one attempt")]
    RetryBudget,
    #[error("minimum retry delay {min_secs}s exceeds maximum {max_secs}s")]
    DelayRange { min_secs: u64, max_secs: u64 },
    #[error("fetch concurrency must be at least 1")]
    Concurrency,
    #[error("maximum trip distance must be positive, got {0}")]
    MaxDistance(String),
    #[error("duration cutoff must be at least one hour")]
    DurationCutoff,
    #[error("co2 factor must be non-negative, got {0}")]
    Co2Factor(String),
}

/// Static configuration for every entry point. All fields have defaults so a
/// partial RON file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub cleaning: CleaningConfig,
    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("traffic.duckdb"),
            download_dir: PathBuf::from("temp_downloads"),
            output_dir: PathBuf::from("output"),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            cleaning: CleaningConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.fetch.validate()?;
        self.cleaning.validate()?;
        self.analysis.validate()
    }

    /// Every partition the ingest run will attempt, enumerated up front.
    pub fn partitions(&self) -> Vec<PartitionKey> {
        enumerate_partitions(
            &self.source.categories,
            self.source.start_year..=self.source.end_year,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub file_extension: String,
    pub categories: Vec<Category>,
    pub start_year: i32,
    pub end_year: i32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            file_extension: "parquet".to_string(),
            categories: Category::ALL.to_vec(),
            start_year: 2015,
            end_year: 2025,
        }
    }
}

impl SourceConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|err| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            reason: err.to_string(),
        })
    }

    pub fn format(&self) -> Result<PartitionFormat, ConfigError> {
        PartitionFormat::from_extension(&self.file_extension)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        self.format()?;
        if self.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        for (idx, category) in self.categories.iter().enumerate() {
            if self.categories[..idx].contains(category) {
                return Err(ConfigError::DuplicateCategory(*category));
            }
        }
        if self.start_year > self.end_year {
            return Err(ConfigError::YearRange {
                start: self.start_year,
                end: self.end_year,
            });
        }
        Ok(())
    }
}

/// On-disk layout of a partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFormat {
    Parquet,
    Csv,
}

impl PartitionFormat {
    pub fn from_extension(extension: &str) -> Result<Self, ConfigError> {
        match extension.to_ascii_lowercase().as_str() {
            "parquet" => Ok(PartitionFormat::Parquet),
            "csv" => Ok(PartitionFormat::Csv),
            _ => Err(ConfigError::FileExtension(extension.to_string())),
        }
    }

    /// DuckDB table function reading one file of this format.
    pub fn reader_function(self) -> &'static str {
        match self {
            PartitionFormat::Parquet => "read_parquet",
            PartitionFormat::Csv => "read_csv_auto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub concurrency: usize,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            min_delay_secs: 4,
            max_delay_secs: 15,
            concurrency: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn jitter(&self) -> JitterRange {
        JitterRange::new(
            Duration::from_secs(self.min_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::RetryBudget);
        }
        if self.min_delay_secs > self.max_delay_secs {
            return Err(ConfigError::DelayRange {
                min_secs: self.min_delay_secs,
                max_secs: self.max_delay_secs,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }
        Ok(())
    }
}

/// Which rows the null filter treats as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum NullPolicy {
    /// Every critical column is null.
    #[default]
    AllNull,
    /// At least one critical column is null.
    AnyNull,
}

/// How a trip's duration is measured against the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DurationMeasure {
    /// Exact elapsed time at microsecond resolution.
    #[default]
    Elapsed,
    /// Whole hours elapsed, remainder discarded.
    TruncatedHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DurationCutoff {
    pub max_hours: u32,
    pub measure: DurationMeasure,
    /// When set, a duration equal to the cutoff is removed as well.
    pub inclusive: bool,
}

impl Default for DurationCutoff {
    fn default() -> Self {
        Self {
            max_hours: 24,
            measure: DurationMeasure::Elapsed,
            inclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub null_policy: NullPolicy,
    /// Upper distance bound in miles; larger values are logging errors.
    pub max_distance: f64,
    pub duration: DurationCutoff,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            null_policy: NullPolicy::AllNull,
            max_distance: 100.0,
            duration: DurationCutoff::default(),
        }
    }
}

impl CleaningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            return Err(ConfigError::MaxDistance(self.max_distance.to_string()));
        }
        if self.duration.max_hours == 0 {
            return Err(ConfigError::DurationCutoff);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Average passenger-vehicle emissions per mile driven.
    pub co2_kg_per_mile: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            co2_kg_per_mile: 0.404,
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.co2_kg_per_mile.is_finite() && self.co2_kg_per_mile >= 0.0) {
            return Err(ConfigError::Co2Factor(self.co2_kg_per_mile.to_string()));
        }
        Ok(())
    }
}
