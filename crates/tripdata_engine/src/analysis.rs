//! Downstream consumer of the cleaned tables: derived per-trip metrics,
//! CSV export and a carbon summary written to the run log.
use std::path::PathBuf;

use chrono::Utc;
use pipeline_logging::pipeline_info;
use serde_json::json;
use thiserror::Error;
use tripdata_core::sql::quote_ident;
use tripdata_core::{
    trip_metrics_select, AnalysisConfig, Category, CategorySchema, PipelineConfig,
    SUMMARY_ROW_FILTER,
};

use crate::persist::{ensure_dir, AtomicFileWriter, PersistError};
use crate::store::{Store, StoreError};

pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cleaned table {0} not found; run ingest and clean first")]
    TableNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("output directory: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to query {context}: {source}")]
    Query {
        context: String,
        #[source]
        source: duckdb::Error,
    },
}

fn query_err(context: &str) -> impl FnOnce(duckdb::Error) -> AnalysisError + '_ {
    move |source| AnalysisError::Query {
        context: context.to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LargestTrip {
    pub pickup: String,
    pub dropoff: String,
    pub trip_distance: f64,
    pub trip_co2_kgs: f64,
    pub duration_minutes: f64,
}

/// Highest and lowest group by average CO2 per trip: `(group, average)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremes {
    pub highest: (i64, f64),
    pub lowest: (i64, f64),
}

impl Extremes {
    /// First group wins ties, so the result is stable for sorted input.
    fn from_groups(groups: &[(i64, f64)]) -> Option<Self> {
        let (&first, rest) = groups.split_first()?;
        let mut extremes = Extremes {
            highest: first,
            lowest: first,
        };
        for &group in rest {
            if group.1 > extremes.highest.1 {
                extremes.highest = group;
            }
            if group.1 < extremes.lowest.1 {
                extremes.lowest = group;
            }
        }
        Some(extremes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarbonSummary {
    pub trips: u64,
    pub largest_trip: Option<LargestTrip>,
    pub by_hour: Option<Extremes>,
    pub by_day_of_week: Option<Extremes>,
    pub by_week: Option<Extremes>,
    pub by_month: Option<Extremes>,
    /// Total kg CO2 for months 1..=12; months without trips are 0.
    pub monthly_totals: [f64; 12],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryExport {
    pub category: Category,
    pub table: String,
    pub rows: u64,
    pub csv_path: PathBuf,
    pub summary: CarbonSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub exports: Vec<CategoryExport>,
    pub manifest_path: PathBuf,
}

/// Rebuilds `{table}_trips` from the cleaned category table.
pub fn build_trip_metrics(
    store: &mut Store,
    schema: &CategorySchema,
    config: &AnalysisConfig,
) -> Result<u64, AnalysisError> {
    if !store.table_exists(schema.table)? {
        return Err(AnalysisError::TableNotFound(schema.table.to_string()));
    }
    let select = trip_metrics_select(schema, config.co2_kg_per_mile);
    let rows = store.replace_table(&schema.metrics_table(), &select, |_| Ok(()))?;
    pipeline_info!("Built '{}' ({} rows)", schema.metrics_table(), rows);
    Ok(rows)
}

pub fn carbon_summary(store: &Store, metrics_table: &str) -> Result<CarbonSummary, AnalysisError> {
    let conn = store.connection();
    let table = quote_ident(metrics_table);

    let trips: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {SUMMARY_ROW_FILTER}"),
            [],
            |row| row.get(0),
        )
        .map_err(query_err("trip count"))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT CAST(pickup_datetime AS VARCHAR), CAST(dropoff_datetime AS VARCHAR), \
             trip_distance, trip_co2_kgs, duration_minutes \
             FROM {table} WHERE {SUMMARY_ROW_FILTER} \
             ORDER BY trip_co2_kgs DESC, pickup_datetime LIMIT 1"
        ))
        .map_err(query_err("largest trip"))?;
    let largest_trip = stmt
        .query_map([], |row| {
            Ok(LargestTrip {
                pickup: row.get(0)?,
                dropoff: row.get(1)?,
                trip_distance: row.get(2)?,
                trip_co2_kgs: row.get(3)?,
                duration_minutes: row.get(4)?,
            })
        })
        .map_err(query_err("largest trip"))?
        .next()
        .transpose()
        .map_err(query_err("largest trip"))?;

    let mut monthly_totals = [0.0; 12];
    for (month, total) in grouped(store, &table, "month_of_year", "sum")? {
        if (1..=12).contains(&month) {
            monthly_totals[(month - 1) as usize] = total;
        }
    }

    Ok(CarbonSummary {
        trips: trips as u64,
        largest_trip,
        by_hour: Extremes::from_groups(&grouped(store, &table, "hour_of_day", "avg")?),
        by_day_of_week: Extremes::from_groups(&grouped(store, &table, "day_of_week", "avg")?),
        by_week: Extremes::from_groups(&grouped(store, &table, "week_of_year", "avg")?),
        by_month: Extremes::from_groups(&grouped(store, &table, "month_of_year", "avg")?),
        monthly_totals,
    })
}

/// `(group, aggregate(trip_co2_kgs))` sorted by group.
fn grouped(
    store: &Store,
    table: &str,
    column: &str,
    aggregate: &str,
) -> Result<Vec<(i64, f64)>, AnalysisError> {
    let sql = format!(
        "SELECT CAST({column} AS BIGINT), CAST({aggregate}(trip_co2_kgs) AS DOUBLE) \
         FROM {table} WHERE {SUMMARY_ROW_FILTER} GROUP BY 1 ORDER BY 1"
    );
    let mut stmt = store
        .connection()
        .prepare(&sql)
        .map_err(query_err(column))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))
        .map_err(query_err(column))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err(column))?;
    Ok(rows)
}

/// Builds, exports and summarises every configured category, then writes
/// the manifest.
pub fn run_analysis(
    store: &mut Store,
    config: &PipelineConfig,
) -> Result<AnalysisReport, AnalysisError> {
    ensure_dir(&config.output_dir)?;

    let mut exports = Vec::new();
    for &category in &config.source.categories {
        let schema = category.schema();
        pipeline_info!("=== Analysis for {} trips ===", category);
        let rows = build_trip_metrics(store, schema, &config.analysis)?;
        let metrics_table = schema.metrics_table();
        let csv_path = config.output_dir.join(format!("{metrics_table}.csv"));
        store.export_csv(&metrics_table, &csv_path)?;
        let summary = carbon_summary(store, &metrics_table)?;
        log_summary(category, &summary);
        exports.push(CategoryExport {
            category,
            table: metrics_table,
            rows,
            csv_path,
            summary,
        });
    }

    let manifest = json!({
        "generated_utc": Utc::now().to_rfc3339(),
        "co2_kg_per_mile": config.analysis.co2_kg_per_mile,
        "exports": exports.iter().map(|e| {
            json!({
                "category": e.category.slug(),
                "table": e.table,
                "rows": e.rows,
                "file": e.csv_path.file_name().map(|n| n.to_string_lossy().into_owned()),
            })
        }).collect::<Vec<_>>()
    });
    let writer = AtomicFileWriter::new(config.output_dir.clone());
    let manifest_path = writer.write(MANIFEST_FILENAME, &manifest.to_string())?;

    Ok(AnalysisReport {
        exports,
        manifest_path,
    })
}

fn log_summary(category: Category, summary: &CarbonSummary) {
    pipeline_info!("{} trips considered: {}", category, summary.trips);
    if let Some(trip) = &summary.largest_trip {
        pipeline_info!(
            "  Largest trip: {} to {}, {:.2} mi, {:.1} min, CO2 {:.6} kg",
            trip.pickup,
            trip.dropoff,
            trip.trip_distance,
            trip.duration_minutes,
            trip.trip_co2_kgs
        );
    }
    log_extremes("hour", summary.by_hour, |h| format!("{h}:00"));
    log_extremes("day", summary.by_day_of_week, day_name);
    log_extremes("week", summary.by_week, |w| w.to_string());
    log_extremes("month", summary.by_month, month_name);
    for (idx, total) in summary.monthly_totals.iter().enumerate() {
        pipeline_info!("  {} total: {:.3} kg CO2", month_name(idx as i64 + 1), total);
    }
}

fn log_extremes(label: &str, extremes: Option<Extremes>, name: impl Fn(i64) -> String) {
    if let Some(e) = extremes {
        pipeline_info!(
            "  Most carbon-heavy {}: {} (avg CO2 {:.6} kg/trip)",
            label,
            name(e.highest.0),
            e.highest.1
        );
        pipeline_info!(
            "  Least carbon-heavy {}: {} (avg CO2 {:.6} kg/trip)",
            label,
            name(e.lowest.0),
            e.lowest.1
        );
    }
}

/// Sunday = 0.
fn day_name(day: i64) -> String {
    const DAYS: [&str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];
    usize::try_from(day)
        .ok()
        .and_then(|d| DAYS.get(d))
        .map(|d| d.to_string())
        .unwrap_or_else(|| day.to_string())
}

fn month_name(month: i64) -> String {
    const MONTHS: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    usize::try_from(month - 1)
        .ok()
        .and_then(|m| MONTHS.get(m))
        .map(|m| m.to_string())
        .unwrap_or_else(|| month.to_string())
}
