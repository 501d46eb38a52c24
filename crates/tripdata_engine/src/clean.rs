use pipeline_logging::{pipeline_fatal, pipeline_info};
use thiserror::Error;
use tripdata_core::{
    cleaning_plan, Category, CategorySchema, CleaningAudit, CleaningConfig, Stage, StageAction,
    StageSpec,
};

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("table {table} lacks columns {missing:?}")]
    MissingColumns { table: String, missing: Vec<String> },
    /// Stages listed in `completed` stay committed.
    #[error("stage {stage} failed on {table}: {source}")]
    StageFailed {
        table: String,
        stage: Stage,
        completed: CleaningAudit,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ordered cleaning stages for one category table.
pub struct CleaningPipeline {
    schema: &'static CategorySchema,
    plan: Vec<StageSpec>,
}

impl CleaningPipeline {
    pub fn new(schema: &'static CategorySchema, config: &CleaningConfig) -> Self {
        Self {
            schema,
            plan: cleaning_plan(schema, config),
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.plan.iter().map(|spec| spec.stage)
    }

    /// Runs every stage in order. Each stage commits on its own; a failure
    /// stops the run and leaves earlier stages in place.
    pub fn run(&self, store: &mut Store) -> Result<CleaningAudit, CleanError> {
        let table = self.schema.table;
        let category = self.schema.category;
        self.check_table(store)?;

        let initial = store.row_count(table)?;
        pipeline_info!("Cleaning '{}' ({} rows)", table, initial);
        let mut audit = CleaningAudit::new(category, initial);
        let mut before = initial;

        for spec in &self.plan {
            let result = match &spec.action {
                StageAction::Rebuild { select } => store.replace_table(table, select, |rows| {
                    if rows <= before {
                        Ok(())
                    } else {
                        Err(format!("rebuild grew the table from {before} to {rows} rows"))
                    }
                }),
                StageAction::Delete { predicate } => store
                    .delete_where(table, predicate)
                    .and_then(|_| store.row_count(table)),
            };
            let after = match result {
                Ok(after) => after,
                Err(source) => {
                    pipeline_fatal!(
                        "Cleaning '{}' failed at stage {}: {}",
                        table,
                        spec.stage,
                        source
                    );
                    return Err(CleanError::StageFailed {
                        table: table.to_string(),
                        stage: spec.stage,
                        completed: audit,
                        source,
                    });
                }
            };
            let entry = audit.record(spec.stage, before, after);
            pipeline_info!(
                "[{}] {}: removed {} row(s), {} remaining",
                category,
                entry.stage,
                entry.removed,
                entry.remaining
            );
            before = after;
        }

        pipeline_info!(
            "Cleaned '{}': {} -> {} rows ({} removed)",
            table,
            audit.initial_rows,
            audit.final_rows(),
            audit.total_removed()
        );
        Ok(audit)
    }

    fn check_table(&self, store: &Store) -> Result<(), CleanError> {
        let table = self.schema.table;
        let columns = store.table_columns(table)?;
        if columns.is_empty() {
            return Err(CleanError::TableNotFound(table.to_string()));
        }
        let missing: Vec<String> = self
            .schema
            .required_columns()
            .into_iter()
            .filter(|required| !columns.iter().any(|c| c.eq_ignore_ascii_case(required)))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(CleanError::MissingColumns {
                table: table.to_string(),
                missing,
            });
        }
        Ok(())
    }
}

/// Cleans each category in turn. A failed category is reported with a fatal
/// entry and does not stop the others, unless the store itself failed: then
/// the remaining categories are not attempted.
pub fn run_cleaning(
    store: &mut Store,
    categories: &[Category],
    config: &CleaningConfig,
) -> Vec<(Category, Result<CleaningAudit, CleanError>)> {
    let mut results = Vec::with_capacity(categories.len());
    for &category in categories {
        let result = CleaningPipeline::new(category.schema(), config).run(store);
        let store_failed = matches!(result, Err(CleanError::Store(_)));
        if let Err(err) = &result {
            if !matches!(err, CleanError::StageFailed { .. }) {
                pipeline_fatal!("Cleaning {} aborted: {}", category, err);
            }
        }
        results.push((category, result));
        if store_failed {
            break;
        }
    }
    results
}
