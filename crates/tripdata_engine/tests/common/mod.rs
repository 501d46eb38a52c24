#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tripdata_core::sql::{quote_ident, quote_literal};
use tripdata_core::{Category, CategorySchema, PartitionKey};
use tripdata_engine::{FetchedFile, Store};

/// One synthetic trip. `None` renders as SQL NULL; `codes` fills every column
/// not named here (vendor, locations, fees and so on).
#[derive(Debug, Clone, Copy)]
pub struct Trip {
    pub pickup: Option<&'static str>,
    pub dropoff: Option<&'static str>,
    pub passengers: Option<i64>,
    pub distance: Option<f64>,
    pub fare: Option<f64>,
    pub codes: Option<i64>,
}

impl Trip {
    pub fn new(
        pickup: &'static str,
        dropoff: &'static str,
        passengers: i64,
        distance: f64,
    ) -> Self {
        Self {
            pickup: Some(pickup),
            dropoff: Some(dropoff),
            passengers: Some(passengers),
            distance: Some(distance),
            fare: Some(12.5),
            codes: Some(1),
        }
    }

    /// A row with every column null.
    pub fn empty() -> Self {
        Self {
            pickup: None,
            dropoff: None,
            passengers: None,
            distance: None,
            fare: None,
            codes: None,
        }
    }

    pub fn without_fare(mut self) -> Self {
        self.fare = None;
        self
    }

    pub fn fare(mut self, fare: f64) -> Self {
        self.fare = Some(fare);
        self
    }
}

/// An ordinary trip starting at `pickup` on 2024-01-01 and lasting 30 minutes.
pub fn trip_at(hour: u32) -> Trip {
    let (pickup, dropoff) = match hour {
        8 => ("2024-01-01 08:00:00", "2024-01-01 08:30:00"),
        9 => ("2024-01-01 09:00:00", "2024-01-01 09:30:00"),
        10 => ("2024-01-01 10:00:00", "2024-01-01 10:30:00"),
        11 => ("2024-01-01 11:00:00", "2024-01-01 11:30:00"),
        _ => ("2024-01-01 12:00:00", "2024-01-01 12:30:00"),
    };
    Trip::new(pickup, dropoff, 1, 2.5)
}

fn column_type(schema: &CategorySchema, column: &str) -> &'static str {
    if column == schema.pickup_column || column == schema.dropoff_column {
        return "TIMESTAMP";
    }
    match column {
        "store_and_fwd_flag" => "VARCHAR",
        "VendorID" | "RatecodeID" | "PULocationID" | "DOLocationID" | "passenger_count"
        | "payment_type" | "trip_type" => "BIGINT",
        _ => "DOUBLE",
    }
}

fn render(schema: &CategorySchema, trip: &Trip, column: &str) -> String {
    fn opt<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "NULL".to_string(), |v| v.to_string())
    }
    fn timestamp(value: Option<&str>) -> String {
        value.map_or_else(|| "NULL".to_string(), |v| format!("TIMESTAMP '{v}'"))
    }

    if column == schema.pickup_column {
        return timestamp(trip.pickup);
    }
    if column == schema.dropoff_column {
        return timestamp(trip.dropoff);
    }
    match column {
        "passenger_count" => opt(trip.passengers),
        "trip_distance" => opt(trip.distance),
        "fare_amount" => opt(trip.fare),
        "store_and_fwd_flag" => opt(trip.codes.map(|_| "'N'")),
        _ => opt(trip.codes),
    }
}

/// Creates `table` with the full column layout of `category` and fills it.
pub fn create_table_as(store: &Store, table: &str, category: Category, trips: &[Trip]) {
    create_table_renamed(store, table, category, trips, &[]);
}

/// Like [`create_table_as`], with columns `(from, to)` declared under a
/// different spelling.
pub fn create_table_renamed(
    store: &Store,
    table: &str,
    category: Category,
    trips: &[Trip],
    renames: &[(&str, &str)],
) {
    let schema = category.schema();
    let columns = schema
        .critical_columns
        .iter()
        .map(|&c| {
            let name = renames
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |&(_, to)| to);
            format!("{} {}", quote_ident(name), column_type(schema, c))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("CREATE TABLE {} ({columns});", quote_ident(table));
    if !trips.is_empty() {
        let rows = trips
            .iter()
            .map(|trip| {
                let values = schema
                    .critical_columns
                    .iter()
                    .map(|c| render(schema, trip, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({values})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!("INSERT INTO {} VALUES {rows};", quote_ident(table)));
    }
    store.execute_batch(&sql).expect("create fixture table");
}

/// Creates the category's own table (`yellow`, `green`).
pub fn create_table(store: &Store, category: Category, trips: &[Trip]) {
    create_table_as(store, category.schema().table, category, trips);
}

/// Writes `trips` as a parquet partition file at `dir/file_name`.
pub fn write_partition(
    dir: &Path,
    file_name: &str,
    category: Category,
    trips: &[Trip],
) -> PathBuf {
    write_partition_renamed(dir, file_name, category, trips, &[])
}

/// Like [`write_partition`], with columns renamed `(from, to)` in the file.
pub fn write_partition_renamed(
    dir: &Path,
    file_name: &str,
    category: Category,
    trips: &[Trip],
    renames: &[(&str, &str)],
) -> PathBuf {
    let path = dir.join(file_name);
    let staging = Store::open_in_memory().expect("staging store");
    create_table_renamed(&staging, "staging", category, trips, renames);
    staging
        .execute_batch(&format!(
            "COPY staging TO {} (FORMAT PARQUET)",
            quote_literal(&path.to_string_lossy())
        ))
        .expect("write parquet partition");
    path
}

/// Raw parquet bytes for serving from a mock server.
pub fn partition_bytes(category: Category, trips: &[Trip]) -> Vec<u8> {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = write_partition(dir.path(), "partition.parquet", category, trips);
    fs::read(path).expect("read partition bytes")
}

pub fn fetched(key: PartitionKey, path: PathBuf) -> FetchedFile {
    let byte_len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    FetchedFile {
        key,
        path,
        byte_len,
        attempts: 1,
    }
}

/// Values of a DOUBLE column, ascending.
pub fn column_f64(store: &Store, table: &str, column: &str) -> Vec<f64> {
    let sql = format!(
        "SELECT {c} FROM {t} ORDER BY {c}",
        c = quote_ident(column),
        t = quote_ident(table)
    );
    let mut stmt = store.connection().prepare(&sql).expect("prepare");
    stmt.query_map([], |row| row.get::<_, f64>(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
