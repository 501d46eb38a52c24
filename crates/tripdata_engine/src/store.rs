//! Analytical store session over a DuckDB database file.
//!
//! A [`Store`] owns one connection. [`with_session`] scopes a session to a
//! closure and closes it on every exit path, error paths included.
use std::path::{Path, PathBuf};

use duckdb::{params, Connection};
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};
use thiserror::Error;
use tripdata_core::sql::{quote_ident, quote_literal};
use tripdata_core::PartitionFormat;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: duckdb::Error,
    },
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("candidate for {table} rejected: {reason}")]
    CandidateRejected { table: String, reason: String },
    #[error("statement failed ({context}): {source}")]
    Statement {
        context: String,
        #[source]
        source: duckdb::Error,
    },
    #[error("failed to close store: {0}")]
    Close(#[source] duckdb::Error),
}

impl StoreError {
    fn statement(context: impl Into<String>) -> impl FnOnce(duckdb::Error) -> StoreError {
        let context = context.into();
        move |source| StoreError::Statement { context, source }
    }
}

pub struct Store {
    conn: Connection,
    label: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        pipeline_info!("Connected to store {:?}", path);
        Ok(Self {
            conn,
            label: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(Self {
            conn,
            label: ":memory:".to_string(),
        })
    }

    /// Read access for downstream consumers and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<(), StoreError> {
        let label = self.label;
        self.conn
            .close()
            .map_err(|(_conn, err)| StoreError::Close(err))?;
        pipeline_info!("Store {} closed", label);
        Ok(())
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn
            .execute_batch(sql)
            .map_err(StoreError::statement("batch"))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
                params![table],
                |row| row.get(0),
            )
            .map_err(StoreError::statement(format!("lookup table {table}")))?;
        Ok(count > 0)
    }

    pub fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        if !self.table_exists(table)? {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(StoreError::statement(format!("count {table}")))?;
        Ok(count as u64)
    }

    /// Column names of `table` in declaration order; empty if absent.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position",
            )
            .map_err(StoreError::statement(format!("columns of {table}")))?;
        let columns = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(StoreError::statement(format!("columns of {table}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::statement(format!("columns of {table}")))?;
        Ok(columns)
    }

    /// Column names produced by an arbitrary query, without running it.
    pub fn query_columns(&self, select: &str) -> Result<Vec<String>, StoreError> {
        let sql = format!("DESCRIBE {select}");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(StoreError::statement("describe query"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::statement("describe query"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::statement("describe query"))?;
        Ok(columns)
    }

    pub fn drop_table_if_exists(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        self.conn
            .execute_batch(&sql)
            .map_err(StoreError::statement(format!("drop {table}")))?;
        pipeline_debug!("Dropped table {} if it existed", table);
        Ok(())
    }

    /// Builds a candidate table from `select`, hands its row count to
    /// `verify`, then swaps it in for `table`. The swap (drop old, rename
    /// candidate) is one transaction. A failed build or a rejected candidate
    /// leaves `table` untouched and the candidate discarded. Returns the new
    /// row count.
    pub fn replace_table(
        &mut self,
        table: &str,
        select: &str,
        verify: impl FnOnce(u64) -> Result<(), String>,
    ) -> Result<u64, StoreError> {
        let candidate = format!("{table}__candidate");
        let target_ident = quote_ident(table);
        let candidate_ident = quote_ident(&candidate);

        self.drop_table_if_exists(&candidate)?;
        if let Err(err) = self
            .conn
            .execute_batch(&format!("CREATE TABLE {candidate_ident} AS {select}"))
        {
            self.discard_candidate(&candidate);
            return Err(StoreError::Statement {
                context: format!("build candidate for {table}"),
                source: err,
            });
        }

        let rows = match self.row_count(&candidate) {
            Ok(rows) => rows,
            Err(err) => {
                self.discard_candidate(&candidate);
                return Err(err);
            }
        };
        if let Err(reason) = verify(rows) {
            self.discard_candidate(&candidate);
            return Err(StoreError::CandidateRejected {
                table: table.to_string(),
                reason,
            });
        }

        let tx = self
            .conn
            .transaction()
            .map_err(StoreError::statement(format!("begin swap of {table}")))?;
        // Dropping `tx` on an error path rolls the swap back.
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {target_ident}; \
             ALTER TABLE {candidate_ident} RENAME TO {target_ident};"
        ))
        .map_err(StoreError::statement(format!("swap candidate into {table}")))?;
        tx.commit()
            .map_err(StoreError::statement(format!("commit swap of {table}")))?;
        pipeline_debug!("Replaced table {} ({} rows)", table, rows);
        Ok(rows)
    }

    fn discard_candidate(&self, candidate: &str) {
        if let Err(err) = self.drop_table_if_exists(candidate) {
            pipeline_warn!("Could not discard candidate table {}: {}", candidate, err);
        }
    }

    /// Appends the result of `select` to `table`. A single statement, so the
    /// batch lands entirely or not at all. Returns rows inserted.
    pub fn append(&self, table: &str, select: &str) -> Result<u64, StoreError> {
        let sql = format!("INSERT INTO {} {select}", quote_ident(table));
        let rows = self
            .conn
            .execute(&sql, [])
            .map_err(StoreError::statement(format!("append to {table}")))?;
        Ok(rows as u64)
    }

    /// Deletes rows matching `predicate`; returns how many went.
    pub fn delete_where(&self, table: &str, predicate: &str) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {} WHERE {predicate}", quote_ident(table));
        let rows = self
            .conn
            .execute(&sql, [])
            .map_err(StoreError::statement(format!("delete from {table}")))?;
        Ok(rows as u64)
    }

    /// Writes `table` to `path` as comma-separated values with a header row.
    pub fn export_csv(&self, table: &str, path: &Path) -> Result<(), StoreError> {
        let sql = format!(
            "COPY {} TO {} (HEADER, DELIMITER ',')",
            quote_ident(table),
            quote_literal(&path.to_string_lossy())
        );
        self.conn
            .execute_batch(&sql)
            .map_err(StoreError::statement(format!("export {table}")))?;
        pipeline_info!("Exported table {} to {:?}", table, path);
        Ok(())
    }
}

/// `SELECT * FROM <reader>('<path>')` for a partition file.
pub fn partition_select(format: PartitionFormat, path: &Path) -> String {
    format!(
        "SELECT * FROM {}({})",
        format.reader_function(),
        quote_literal(&path.to_string_lossy())
    )
}

/// Opens a session on `path`, runs `work`, and closes the session whether
/// `work` succeeded or not. A close failure is reported only if `work`
/// itself succeeded.
pub fn with_session<T, E>(
    path: &Path,
    work: impl FnOnce(&mut Store) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let mut store = Store::open(path)?;
    let result = work(&mut store);
    match store.close() {
        Ok(()) => result,
        Err(err) => match result {
            Ok(_) => Err(err.into()),
            Err(work_err) => {
                pipeline_warn!("Store close failed after an earlier error: {}", err);
                Err(work_err)
            }
        },
    }
}
