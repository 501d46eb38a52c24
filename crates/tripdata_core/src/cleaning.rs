use std::fmt;

use crate::sql::quote_ident;
use crate::{Category, CategorySchema, CleaningConfig, DurationMeasure, NullPolicy};

/// Cleaning stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dedup,
    AllNull,
    PassengerCount,
    DistanceNonPositive,
    DistanceAboveMax,
    Duration,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Dedup => "dedup",
            Stage::AllNull => "all_null",
            Stage::PassengerCount => "passenger_count",
            Stage::DistanceNonPositive => "distance_non_positive",
            Stage::DistanceAboveMax => "distance_above_max",
            Stage::Duration => "duration",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    /// Replace the table with the result of `select`.
    Rebuild { select: String },
    /// Delete every row matching `predicate`.
    Delete { predicate: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: Stage,
    pub action: StageAction,
}

/// Ordered stage list for one category. The order is the same for every
/// schema; only column names and thresholds vary.
pub fn cleaning_plan(schema: &CategorySchema, config: &CleaningConfig) -> Vec<StageSpec> {
    let table = quote_ident(schema.table);
    let distance = quote_ident(schema.distance_column);

    vec![
        StageSpec {
            stage: Stage::Dedup,
            action: StageAction::Rebuild {
                select: format!("SELECT DISTINCT * FROM {table}"),
            },
        },
        StageSpec {
            stage: Stage::AllNull,
            action: StageAction::Delete {
                predicate: null_predicate(schema.critical_columns, config.null_policy),
            },
        },
        StageSpec {
            stage: Stage::PassengerCount,
            action: StageAction::Delete {
                predicate: format!("{} = 0", quote_ident(schema.passenger_column)),
            },
        },
        StageSpec {
            stage: Stage::DistanceNonPositive,
            action: StageAction::Delete {
                predicate: format!("{distance} <= 0"),
            },
        },
        StageSpec {
            stage: Stage::DistanceAboveMax,
            action: StageAction::Delete {
                predicate: format!("{distance} > {:?}", config.max_distance),
            },
        },
        StageSpec {
            stage: Stage::Duration,
            action: StageAction::Delete {
                predicate: duration_predicate(schema, config),
            },
        },
    ]
}

fn null_predicate(columns: &[&str], policy: NullPolicy) -> String {
    let joiner = match policy {
        NullPolicy::AllNull => " AND ",
        NullPolicy::AnyNull => " OR ",
    };
    columns
        .iter()
        .map(|column| format!("{} IS NULL", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(joiner)
}

fn duration_predicate(schema: &CategorySchema, config: &CleaningConfig) -> String {
    let pickup = quote_ident(schema.pickup_column);
    let dropoff = quote_ident(schema.dropoff_column);
    let cutoff = config.duration;
    let op = if cutoff.inclusive { ">=" } else { ">" };
    match cutoff.measure {
        DurationMeasure::Elapsed => {
            let max_micros = u64::from(cutoff.max_hours) * 3_600_000_000;
            format!("(epoch_us({dropoff}) - epoch_us({pickup})) {op} {max_micros}")
        }
        DurationMeasure::TruncatedHours => {
            format!(
                "date_sub('hour', {pickup}, {dropoff}) {op} {}",
                cutoff.max_hours
            )
        }
    }
}

/// Row-count effect of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageAudit {
    pub stage: Stage,
    pub removed: u64,
    pub remaining: u64,
}

/// Per-category record of what each stage removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningAudit {
    pub category: Category,
    pub initial_rows: u64,
    pub stages: Vec<StageAudit>,
}

impl CleaningAudit {
    pub fn new(category: Category, initial_rows: u64) -> Self {
        Self {
            category,
            initial_rows,
            stages: Vec::new(),
        }
    }

    /// Records a stage given the row counts before and after it ran.
    pub fn record(&mut self, stage: Stage, before: u64, after: u64) -> StageAudit {
        let entry = StageAudit {
            stage,
            removed: before.saturating_sub(after),
            remaining: after,
        };
        self.stages.push(entry);
        entry
    }

    pub fn final_rows(&self) -> u64 {
        self.stages
            .last()
            .map(|s| s.remaining)
            .unwrap_or(self.initial_rows)
    }

    pub fn total_removed(&self) -> u64 {
        self.stages.iter().map(|s| s.removed).sum()
    }

    pub fn removed_by(&self, stage: Stage) -> Option<u64> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.removed)
    }
}
