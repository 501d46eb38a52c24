use pipeline_logging::{pipeline_error, pipeline_info, pipeline_warn};
use thiserror::Error;
use tripdata_core::{Category, CategorySchema, PartitionFormat, PartitionKey};

use crate::persist::remove_partition_file;
use crate::store::{partition_select, Store, StoreError};
use crate::{FetchFailure, FetchedFile};

/// Why a partition contributed no rows. Never escalates past the partition.
#[derive(Debug, Error)]
pub enum LoadSkip {
    #[error("schema mismatch: table has {expected:?}, partition has {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("unreadable partition file: {0}")]
    Unreadable(#[source] StoreError),
    #[error("insert failed: {0}")]
    InsertFailed(#[source] StoreError),
    #[error("download failed: {0}")]
    Unfetched(#[source] FetchFailure),
}

#[derive(Debug)]
pub enum PartitionLoad {
    Created { rows: u64 },
    Appended { rows: u64 },
    Skipped(LoadSkip),
}

/// Per-category ingest result.
#[derive(Debug)]
pub struct CategoryLoad {
    pub category: Category,
    pub loaded: Vec<(PartitionKey, u64)>,
    pub skipped: Vec<(PartitionKey, String)>,
    pub rows: u64,
}

/// Full-refresh loader for one category table.
///
/// `begin` drops the table, the first partition that loads creates it, and
/// later partitions append. Every consumed file is deleted afterwards.
pub struct TableLoader<'s> {
    store: &'s mut Store,
    schema: &'static CategorySchema,
    format: PartitionFormat,
    created: bool,
    report: CategoryLoad,
}

impl<'s> TableLoader<'s> {
    pub fn begin(
        store: &'s mut Store,
        schema: &'static CategorySchema,
        format: PartitionFormat,
    ) -> Result<Self, StoreError> {
        store.drop_table_if_exists(schema.table)?;
        pipeline_info!("Dropped table '{}' if it existed", schema.table);
        Ok(Self {
            store,
            schema,
            format,
            created: false,
            report: CategoryLoad {
                category: schema.category,
                loaded: Vec::new(),
                skipped: Vec::new(),
                rows: 0,
            },
        })
    }

    pub fn category(&self) -> Category {
        self.schema.category
    }

    /// Loads one fetched partition and deletes its file. `Err` only for
    /// failures of the store itself; partition problems come back as
    /// [`PartitionLoad::Skipped`].
    pub fn consume(&mut self, file: FetchedFile) -> Result<PartitionLoad, StoreError> {
        let outcome = self.ingest(&file);
        remove_partition_file(&file.path);
        let outcome = outcome?;

        match &outcome {
            PartitionLoad::Created { rows } => {
                pipeline_info!(
                    "Created table '{}' from {} ({} rows)",
                    self.schema.table,
                    file.key,
                    rows
                );
                self.report.loaded.push((file.key, *rows));
                self.report.rows += rows;
            }
            PartitionLoad::Appended { rows } => {
                pipeline_info!("Loaded {} into '{}' ({} rows)", file.key, self.schema.table, rows);
                self.report.loaded.push((file.key, *rows));
                self.report.rows += rows;
            }
            PartitionLoad::Skipped(reason) => {
                pipeline_error!("Skipping {}: {}", file.key, reason);
                self.report.skipped.push((file.key, reason.to_string()));
            }
        }
        Ok(outcome)
    }

    /// Records a partition whose download never succeeded.
    pub fn skip_unfetched(&mut self, key: PartitionKey, failure: FetchFailure) {
        let reason = LoadSkip::Unfetched(failure);
        pipeline_warn!("Skipping file for {} due to download failure: {}", key, reason);
        self.report.skipped.push((key, reason.to_string()));
    }

    pub fn finish(self) -> CategoryLoad {
        pipeline_info!(
            "Finished loading '{}': {} partition(s), {} skipped, {} rows",
            self.schema.table,
            self.report.loaded.len(),
            self.report.skipped.len(),
            self.report.rows
        );
        self.report
    }

    fn ingest(&mut self, file: &FetchedFile) -> Result<PartitionLoad, StoreError> {
        let table = self.schema.table;
        let select = partition_select(self.format, &file.path);
        let found = match self.store.query_columns(&select) {
            Ok(columns) => columns,
            Err(err) => return Ok(PartitionLoad::Skipped(LoadSkip::Unreadable(err))),
        };

        if !self.created {
            return Ok(match self.store.replace_table(table, &select, |_| Ok(())) {
                Ok(rows) => {
                    self.created = true;
                    PartitionLoad::Created { rows }
                }
                Err(err) => PartitionLoad::Skipped(LoadSkip::InsertFailed(err)),
            });
        }

        let expected = self.store.table_columns(table)?;
        if expected.is_empty() {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        if !same_columns(&expected, &found) {
            return Ok(PartitionLoad::Skipped(LoadSkip::SchemaMismatch { expected, found }));
        }
        Ok(match self.store.append(table, &select) {
            Ok(rows) => PartitionLoad::Appended { rows },
            Err(err) => PartitionLoad::Skipped(LoadSkip::InsertFailed(err)),
        })
    }
}

/// Positional match. DuckDB resolves identifiers case-insensitively, so the
/// upstream `airport_fee`/`Airport_fee` spelling change is the same column.
fn same_columns(expected: &[String], found: &[String]) -> bool {
    expected.len() == found.len()
        && expected
            .iter()
            .zip(found)
            .all(|(want, have)| want.eq_ignore_ascii_case(have))
}
