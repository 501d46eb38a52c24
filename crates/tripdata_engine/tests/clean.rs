mod common;

use common::{
    column_f64, create_table, create_table_as, create_table_renamed, fetched, files_in,
    write_partition, Trip,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tripdata_core::{
    Category, CleaningAudit, CleaningConfig, DurationCutoff, DurationMeasure, NullPolicy,
    PartitionFormat, PartitionKey, Stage,
};
use tripdata_engine::{
    run_cleaning, CleanError, CleaningPipeline, PartitionLoad, Store, TableLoader,
};

const PICKUP: &str = "2024-03-01 00:00:00";

fn ride(dropoff: &'static str, passengers: i64, distance: f64) -> Trip {
    Trip::new(PICKUP, dropoff, passengers, distance)
}

fn durations(store: &Store, table: &str, pickup: &str, dropoff: &str) -> Vec<i64> {
    let sql = format!(
        "SELECT (epoch({dropoff}) - epoch({pickup}))::BIGINT FROM {table} ORDER BY 1"
    );
    let mut stmt = store.connection().prepare(&sql).unwrap();
    stmt.query_map([], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn clean(store: &mut Store, category: Category, config: &CleaningConfig) -> CleaningAudit {
    CleaningPipeline::new(category.schema(), config)
        .run(store)
        .expect("cleaning succeeds")
}

#[test]
fn each_stage_removes_its_own_rows() {
    pipeline_logging::initialize_for_tests();
    let mut store = Store::open_in_memory().unwrap();
    let good = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table(
        &store,
        Category::Yellow,
        &[
            good,
            good,
            Trip::empty(),
            ride("2024-03-01 00:10:00", 0, 1.0),
            ride("2024-03-01 00:10:00", 2, 0.0),
            ride("2024-03-01 02:00:00", 1, 150.0),
            ride("2024-03-02 01:00:00", 1, 8.0),
            ride("2024-03-01 00:40:00", 3, 5.0),
            ride("2024-03-01 00:50:00", 1, 7.5),
            ride("2024-03-01 01:00:00", 2, 9.0),
        ],
    );

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    let removed: Vec<(Stage, u64)> = audit.stages.iter().map(|s| (s.stage, s.removed)).collect();
    assert_eq!(
        removed,
        vec![
            (Stage::Dedup, 1),
            (Stage::AllNull, 1),
            (Stage::PassengerCount, 1),
            (Stage::DistanceNonPositive, 1),
            (Stage::DistanceAboveMax, 1),
            (Stage::Duration, 1),
        ]
    );
    assert_eq!(audit.initial_rows, 10);
    assert_eq!(audit.final_rows(), 4);
    assert_eq!(audit.total_removed(), 6);
    assert_eq!(store.row_count("yellow").unwrap(), 4);
    assert_eq!(
        column_f64(&store, "yellow", "trip_distance"),
        vec![3.0, 5.0, 7.5, 9.0]
    );
}

#[test]
fn duplicates_nulls_and_empty_cabs_are_audited_in_order() {
    let mut store = Store::open_in_memory().unwrap();
    let dup = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table(
        &store,
        Category::Yellow,
        &[
            dup,
            dup,
            dup,
            Trip::empty(),
            ride("2024-03-01 00:15:00", 0, 2.0),
            ride("2024-03-01 00:25:00", 1, 4.0),
            ride("2024-03-01 00:30:00", 2, 5.0),
            ride("2024-03-01 00:35:00", 1, 6.0),
            ride("2024-03-01 00:40:00", 3, 7.0),
            ride("2024-03-01 00:45:00", 1, 8.0),
        ],
    );

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    let removed: Vec<u64> = audit.stages.iter().map(|s| s.removed).take(3).collect();
    assert_eq!(removed, vec![2, 1, 1]);
    assert_eq!(audit.final_rows(), 6);
    assert_eq!(store.row_count("yellow").unwrap(), 6);
}

#[test]
fn a_loaded_partition_is_cleaned_with_the_same_audit() {
    let temp = TempDir::new().unwrap();
    let mut store = Store::open_in_memory().unwrap();
    let dup = ride("2024-03-01 00:20:00", 1, 3.0);
    let partition = write_partition(
        temp.path(),
        "yellow_tripdata_2024-03.parquet",
        Category::Yellow,
        &[
            dup,
            dup,
            dup,
            Trip::empty(),
            ride("2024-03-01 00:15:00", 0, 2.0),
            ride("2024-03-01 00:25:00", 1, 4.0),
            ride("2024-03-01 00:30:00", 2, 5.0),
            ride("2024-03-01 00:35:00", 1, 6.0),
            ride("2024-03-01 00:40:00", 3, 7.0),
            ride("2024-03-01 00:45:00", 1, 8.0),
        ],
    );

    let mut loader =
        TableLoader::begin(&mut store, Category::Yellow.schema(), PartitionFormat::Parquet)
            .unwrap();
    let key = PartitionKey::new(Category::Yellow, 2024, 3);
    let outcome = loader.consume(fetched(key, partition)).unwrap();
    loader.finish();
    assert!(matches!(outcome, PartitionLoad::Created { rows: 10 }), "got {outcome:?}");
    assert!(files_in(temp.path()).is_empty());

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    let removed: Vec<u64> = audit.stages.iter().map(|s| s.removed).take(3).collect();
    assert_eq!(removed, vec![2, 1, 1]);
    assert_eq!(audit.total_removed(), 4);
    assert_eq!(audit.final_rows(), 6);
    assert_eq!(store.row_count("yellow").unwrap(), 6);
}

#[test]
fn cleaning_twice_removes_nothing_the_second_time() {
    let mut store = Store::open_in_memory().unwrap();
    let good = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table(
        &store,
        Category::Yellow,
        &[good, good, Trip::empty(), ride("2024-03-01 00:10:00", 0, 1.0)],
    );
    let config = CleaningConfig::default();

    let first = clean(&mut store, Category::Yellow, &config);
    let second = clean(&mut store, Category::Yellow, &config);

    assert_eq!(first.final_rows(), 1);
    assert_eq!(second.initial_rows, 1);
    assert_eq!(second.total_removed(), 0);
    assert!(second.stages.iter().all(|s| s.removed == 0));
}

#[test]
fn dedup_keeps_one_copy_of_each_distinct_row() {
    let mut store = Store::open_in_memory().unwrap();
    let a = ride("2024-03-01 00:20:00", 1, 3.0);
    let b = ride("2024-03-01 00:25:00", 1, 4.0);
    create_table(&store, Category::Green, &[a, a, a, b, b, a.fare(99.0)]);

    let audit = clean(&mut store, Category::Green, &CleaningConfig::default());

    assert_eq!(audit.removed_by(Stage::Dedup), Some(3));
    assert_eq!(store.row_count("green").unwrap(), 3);
}

#[test]
fn null_policy_controls_partially_null_rows() {
    let partial = ride("2024-03-01 00:20:00", 1, 3.0).without_fare();
    let rows = [partial, Trip::empty(), ride("2024-03-01 00:30:00", 1, 4.0)];

    let mut all_null = Store::open_in_memory().unwrap();
    create_table(&all_null, Category::Yellow, &rows);
    let audit = clean(&mut all_null, Category::Yellow, &CleaningConfig::default());
    assert_eq!(audit.removed_by(Stage::AllNull), Some(1));
    assert_eq!(audit.final_rows(), 2);

    let mut any_null = Store::open_in_memory().unwrap();
    create_table(&any_null, Category::Yellow, &rows);
    let config = CleaningConfig {
        null_policy: NullPolicy::AnyNull,
        ..CleaningConfig::default()
    };
    let audit = clean(&mut any_null, Category::Yellow, &config);
    assert_eq!(audit.removed_by(Stage::AllNull), Some(2));
    assert_eq!(audit.final_rows(), 1);
}

#[test]
fn distance_bounds_are_exclusive_of_zero_and_inclusive_of_max() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(
        &store,
        Category::Yellow,
        &[
            ride("2024-03-01 00:20:00", 1, -1.5),
            ride("2024-03-01 00:21:00", 1, 0.0),
            ride("2024-03-01 00:22:00", 1, 0.0001),
            ride("2024-03-01 00:23:00", 1, 100.0),
            ride("2024-03-01 00:24:00", 1, 100.0001),
        ],
    );

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    assert_eq!(audit.removed_by(Stage::DistanceNonPositive), Some(2));
    assert_eq!(audit.removed_by(Stage::DistanceAboveMax), Some(1));
    assert_eq!(column_f64(&store, "yellow", "trip_distance"), vec![0.0001, 100.0]);
}

#[test]
fn configured_max_distance_is_honoured() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(
        &store,
        Category::Green,
        &[ride("2024-03-01 00:20:00", 1, 30.0), ride("2024-03-01 00:21:00", 1, 60.0)],
    );
    let config = CleaningConfig {
        max_distance: 50.0,
        ..CleaningConfig::default()
    };
    clean(&mut store, Category::Green, &config);
    assert_eq!(column_f64(&store, "green", "trip_distance"), vec![30.0]);
}

fn duration_rows() -> [Trip; 4] {
    [
        ride("2024-03-01 23:59:00", 1, 2.0), // 23h59m
        ride("2024-03-02 00:00:00", 1, 2.0), // exactly 24h
        ride("2024-03-02 00:00:01", 1, 2.0), // 24h and one second
        ride("2024-03-02 00:59:00", 1, 2.0), // 24h59m
    ]
}

#[test]
fn elapsed_cutoff_keeps_exactly_twenty_four_hours() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(&store, Category::Yellow, &duration_rows());

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    assert_eq!(audit.removed_by(Stage::Duration), Some(2));
    let kept = durations(&store, "yellow", "tpep_pickup_datetime", "tpep_dropoff_datetime");
    assert_eq!(kept, vec![23 * 3600 + 59 * 60, 24 * 3600]);
}

#[test]
fn inclusive_cutoff_also_removes_exactly_twenty_four_hours() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(&store, Category::Yellow, &duration_rows());
    let config = CleaningConfig {
        duration: DurationCutoff {
            inclusive: true,
            ..DurationCutoff::default()
        },
        ..CleaningConfig::default()
    };

    let audit = clean(&mut store, Category::Yellow, &config);

    assert_eq!(audit.removed_by(Stage::Duration), Some(3));
    assert_eq!(audit.final_rows(), 1);
}

#[test]
fn truncated_hours_cutoff_ignores_the_partial_hour() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(&store, Category::Green, &duration_rows());
    let config = CleaningConfig {
        duration: DurationCutoff {
            measure: DurationMeasure::TruncatedHours,
            ..DurationCutoff::default()
        },
        ..CleaningConfig::default()
    };

    let audit = clean(&mut store, Category::Green, &config);

    assert_eq!(audit.removed_by(Stage::Duration), Some(0));
    assert_eq!(audit.final_rows(), 4);
}

#[test]
fn truncated_hours_cutoff_removes_twenty_five_hours() {
    let mut store = Store::open_in_memory().unwrap();
    let mut rows = duration_rows().to_vec();
    rows.push(ride("2024-03-02 01:00:00", 1, 2.0)); // 25h
    create_table(&store, Category::Yellow, &rows);
    let config = CleaningConfig {
        duration: DurationCutoff {
            measure: DurationMeasure::TruncatedHours,
            ..DurationCutoff::default()
        },
        ..CleaningConfig::default()
    };

    let audit = clean(&mut store, Category::Yellow, &config);

    assert_eq!(audit.removed_by(Stage::Duration), Some(1));
    let kept = durations(&store, "yellow", "tpep_pickup_datetime", "tpep_dropoff_datetime");
    assert_eq!(
        kept,
        vec![23 * 3600 + 59 * 60, 24 * 3600, 24 * 3600 + 1, 24 * 3600 + 59 * 60]
    );
}

#[test]
fn inclusive_truncated_hours_cutoff_removes_every_twenty_fourth_hour() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(&store, Category::Green, &duration_rows());
    let config = CleaningConfig {
        duration: DurationCutoff {
            measure: DurationMeasure::TruncatedHours,
            inclusive: true,
            ..DurationCutoff::default()
        },
        ..CleaningConfig::default()
    };

    let audit = clean(&mut store, Category::Green, &config);

    assert_eq!(audit.removed_by(Stage::Duration), Some(3));
    let kept = durations(&store, "green", "lpep_pickup_datetime", "lpep_dropoff_datetime");
    assert_eq!(kept, vec![23 * 3600 + 59 * 60]);
}

#[test]
fn both_categories_run_the_same_stage_sequence() {
    let mut store = Store::open_in_memory().unwrap();
    let trip = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table(&store, Category::Yellow, &[trip]);
    create_table(&store, Category::Green, &[trip]);

    let results = run_cleaning(&mut store, &Category::ALL, &CleaningConfig::default());

    let sequences: Vec<Vec<Stage>> = results
        .iter()
        .map(|(_, result)| {
            result
                .as_ref()
                .expect("cleaning succeeds")
                .stages
                .iter()
                .map(|s| s.stage)
                .collect()
        })
        .collect();
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(
        CleaningPipeline::new(Category::Green.schema(), &CleaningConfig::default())
            .stages()
            .collect::<Vec<_>>(),
        sequences[0]
    );
}

#[test]
fn missing_table_is_reported_and_other_categories_continue() {
    let mut store = Store::open_in_memory().unwrap();
    create_table(&store, Category::Yellow, &[ride("2024-03-01 00:20:00", 1, 3.0)]);

    let results = run_cleaning(&mut store, &Category::ALL, &CleaningConfig::default());

    assert_eq!(results[0].0, Category::Yellow);
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, Category::Green);
    assert!(matches!(results[1].1, Err(CleanError::TableNotFound(ref t)) if t == "green"));
}

#[test]
fn store_failure_stops_the_remaining_categories() {
    let mut store = Store::open_in_memory().unwrap();
    let trip = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table_as(&store, "yellow_source", Category::Yellow, &[trip]);
    // Every required column is present, but counting rows fails at runtime.
    store
        .execute_batch(
            "CREATE VIEW yellow AS SELECT * FROM yellow_source \
             WHERE CAST(store_and_fwd_flag AS INTEGER) = 1",
        )
        .unwrap();
    create_table(&store, Category::Green, &[trip, trip]);

    let results = run_cleaning(&mut store, &Category::ALL, &CleaningConfig::default());

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, Category::Yellow);
    assert!(
        matches!(results[0].1, Err(CleanError::Store(_))),
        "got {:?}",
        results[0].1
    );
    assert_eq!(store.row_count("green").unwrap(), 2, "green was never cleaned");
}

#[test]
fn column_names_are_matched_without_regard_to_case() {
    let mut store = Store::open_in_memory().unwrap();
    let trip = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table_renamed(
        &store,
        "yellow",
        Category::Yellow,
        &[trip, trip, ride("2024-03-01 00:10:00", 0, 1.0)],
        &[("airport_fee", "Airport_fee")],
    );

    let audit = clean(&mut store, Category::Yellow, &CleaningConfig::default());

    assert_eq!(audit.removed_by(Stage::Dedup), Some(1));
    assert_eq!(audit.removed_by(Stage::PassengerCount), Some(1));
    assert_eq!(audit.final_rows(), 1);
}

#[test]
fn missing_columns_are_reported_before_any_stage_runs() {
    let mut store = Store::open_in_memory().unwrap();
    // A yellow-shaped table stored under the green name lacks lpep_* columns.
    let trip = ride("2024-03-01 00:20:00", 1, 3.0);
    create_table_as(&store, "green", Category::Yellow, &[trip]);

    let err = CleaningPipeline::new(Category::Green.schema(), &CleaningConfig::default())
        .run(&mut store)
        .unwrap_err();

    match err {
        CleanError::MissingColumns { table, missing } => {
            assert_eq!(table, "green");
            assert!(missing.contains(&"lpep_pickup_datetime".to_string()));
            assert!(missing.contains(&"ehail_fee".to_string()));
        }
        other => panic!("expected missing columns, got {other:?}"),
    }
    assert_eq!(store.row_count("green").unwrap(), 1);
}
