use crate::sql::quote_ident;
use crate::CategorySchema;

/// Column order of the derived per-trip metrics table.
pub const METRIC_COLUMNS: [&str; 10] = [
    "pickup_datetime",
    "dropoff_datetime",
    "trip_distance",
    "trip_co2_kgs",
    "duration_minutes",
    "avg_mph",
    "hour_of_day",
    "day_of_week",
    "week_of_year",
    "month_of_year",
];

/// Projection of a cleaned category table into the metrics layout.
///
/// `day_of_week` counts from Sunday = 0 and `week_of_year` is the ISO week.
/// `avg_mph` is null when the duration is not positive.
pub fn trip_metrics_select(schema: &CategorySchema, co2_kg_per_mile: f64) -> String {
    let pickup = quote_ident(schema.pickup_column);
    let dropoff = quote_ident(schema.dropoff_column);
    let distance = quote_ident(schema.distance_column);
    let table = quote_ident(schema.table);
    let elapsed_us = format!("CAST(epoch_us({dropoff}) - epoch_us({pickup}) AS DOUBLE)");

    format!(
        "SELECT \
            {pickup} AS pickup_datetime, \
            {dropoff} AS dropoff_datetime, \
            CAST({distance} AS DOUBLE) AS trip_distance, \
            CAST({distance} AS DOUBLE) * {co2_kg_per_mile:?} AS trip_co2_kgs, \
            {elapsed_us} / 60000000.0 AS duration_minutes, \
            CASE WHEN {elapsed_us} > 0 \
                THEN CAST({distance} AS DOUBLE) / ({elapsed_us} / 3600000000.0) \
            END AS avg_mph, \
            hour({pickup}) AS hour_of_day, \
            dayofweek({pickup}) AS day_of_week, \
            weekofyear({pickup}) AS week_of_year, \
            month({pickup}) AS month_of_year \
         FROM {table}"
    )
}

/// Rows the carbon summary considers; mirrors the guards of the metrics
/// consumer.
pub const SUMMARY_ROW_FILTER: &str = "pickup_datetime IS NOT NULL \
    AND dropoff_datetime IS NOT NULL \
    AND trip_distance IS NOT NULL \
    AND trip_co2_kgs IS NOT NULL \
    AND trip_distance > 0 \
    AND duration_minutes > 0 \
    AND trip_co2_kgs >= 0";
