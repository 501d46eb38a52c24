use std::fmt;

use serde::Deserialize;

/// One of the two parallel trip datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Yellow,
    Green,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Yellow, Category::Green];

    /// Lowercase name used in remote file names and as the table name.
    pub fn slug(self) -> &'static str {
        match self {
            Category::Yellow => "yellow",
            Category::Green => "green",
        }
    }

    pub fn schema(self) -> &'static CategorySchema {
        match self {
            Category::Yellow => &YELLOW_SCHEMA,
            Category::Green => &GREEN_SCHEMA,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Per-category column layout consumed by the loader, the cleaning plan and
/// the metrics projection. The two categories share one code path and differ
/// only in the values held here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySchema {
    pub category: Category,
    pub table: &'static str,
    pub pickup_column: &'static str,
    pub dropoff_column: &'static str,
    pub passenger_column: &'static str,
    pub distance_column: &'static str,
    /// Columns whose simultaneous absence marks a row as empty.
    pub critical_columns: &'static [&'static str],
}

impl CategorySchema {
    /// Table holding the derived per-trip metrics for this category.
    pub fn metrics_table(&self) -> String {
        format!("{}_trips", self.table)
    }

    /// Every column the cleaning plan references, critical set first.
    pub fn required_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = self.critical_columns.to_vec();
        for column in [
            self.pickup_column,
            self.dropoff_column,
            self.passenger_column,
            self.distance_column,
        ] {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }
}

pub static YELLOW_SCHEMA: CategorySchema = CategorySchema {
    category: Category::Yellow,
    table: "yellow",
    pickup_column: "tpep_pickup_datetime",
    dropoff_column: "tpep_dropoff_datetime",
    passenger_column: "passenger_count",
    distance_column: "trip_distance",
    critical_columns: &[
        "VendorID",
        "tpep_pickup_datetime",
        "tpep_dropoff_datetime",
        "store_and_fwd_flag",
        "RatecodeID",
        "PULocationID",
        "DOLocationID",
        "passenger_count",
        "trip_distance",
        "fare_amount",
        "extra",
        "mta_tax",
        "tip_amount",
        "tolls_amount",
        "improvement_surcharge",
        "total_amount",
        "payment_type",
        "congestion_surcharge",
        "airport_fee",
    ],
};

pub static GREEN_SCHEMA: CategorySchema = CategorySchema {
    category: Category::Green,
    table: "green",
    pickup_column: "lpep_pickup_datetime",
    dropoff_column: "lpep_dropoff_datetime",
    passenger_column: "passenger_count",
    distance_column: "trip_distance",
    critical_columns: &[
        "VendorID",
        "lpep_pickup_datetime",
        "lpep_dropoff_datetime",
        "store_and_fwd_flag",
        "RatecodeID",
        "PULocationID",
        "DOLocationID",
        "passenger_count",
        "trip_distance",
        "fare_amount",
        "extra",
        "mta_tax",
        "tip_amount",
        "tolls_amount",
        "ehail_fee",
        "improvement_surcharge",
        "total_amount",
        "payment_type",
        "trip_type",
        "congestion_surcharge",
    ],
};
