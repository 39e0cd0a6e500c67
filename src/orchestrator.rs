//! Load orchestrator.
//!
//! Tables are processed one at a time in sorted order. Each one is probed,
//! planned, created when absent, then filled from its CSV through a staging
//! table. A table-level failure is recorded and the run moves on; a
//! connectivity failure stops the run with the statistics gathered so far
//! and the list of targets it never reached.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{ScanOptions, SourceDatabase, SourceTable, SourceType};
use crate::config::LoaderSettings;
use crate::creator::{CreateResult, ErrorPatterns, TableCreator};
use crate::ddl::parser::parse_create_table;
use crate::ddl::repair::force_quote_identifiers;
use crate::ddl::{DdlGenerator, TablePlan, validate_ddl};
use crate::error::{ErrorKind, WarehouseError};
use crate::existence::{TableState, table_exists_and_has_data};
use crate::naming::TargetTableName;
use crate::warehouse::{CellValue, InsertTarget, Warehouse};

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { rows: u64 },
    SkippedAlreadyLoaded { rows: u64 },
    FailedCreate { kind: ErrorKind, reason: String },
    FailedLoad { kind: ErrorKind, reason: String },
}

impl LoadOutcome {
    pub fn failed_create(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self::FailedCreate {
            kind,
            reason: reason.into(),
        }
    }

    pub fn failed_load(reason: impl Into<String>) -> Self {
        Self::FailedLoad {
            kind: ErrorKind::LoadFailure,
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedCreate { .. } | Self::FailedLoad { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::SkippedAlreadyLoaded { .. } => "skipped",
            Self::FailedCreate { .. } => "create failed",
            Self::FailedLoad { .. } => "load failed",
        }
    }
}

/// One line of the run report.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub database: String,
    pub table: String,
    pub target: TargetTableName,
    pub outcome: LoadOutcome,
    /// CREATE statements executed for this table.
    pub attempts: usize,
    pub warnings: Vec<String>,
}

impl TableReport {
    fn new(table: &SourceTable, outcome: LoadOutcome) -> Self {
        Self {
            database: table.database.clone(),
            table: table.name.clone(),
            target: table.target(),
            outcome,
            attempts: 0,
            warnings: Vec::new(),
        }
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, Serialize)]
pub struct RunAbort {
    pub kind: ErrorKind,
    /// Table being processed when the run stopped.
    pub target: TargetTableName,
    pub message: String,
}

/// Per-outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub loaded: usize,
    pub skipped: usize,
    pub failed_create: usize,
    pub failed_load: usize,
    pub rows_loaded: u64,
}

/// Result of a run, threaded through it and returned at the end.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tables: Vec<TableReport>,
    pub aborted: Option<RunAbort>,
    /// Selected targets the run never reached because it was aborted.
    pub not_processed: Vec<TargetTableName>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            tables: Vec::new(),
            aborted: None,
            not_processed: Vec::new(),
        }
    }

    pub fn record(&mut self, report: TableReport) {
        self.tables.push(report);
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.tables
            .iter()
            .fold(OutcomeCounts::default(), |mut c, r| {
                match r.outcome {
                    LoadOutcome::Loaded { rows } => {
                        c.loaded += 1;
                        c.rows_loaded += rows;
                    }
                    LoadOutcome::SkippedAlreadyLoaded { .. } => c.skipped += 1,
                    LoadOutcome::FailedCreate { .. } => c.failed_create += 1,
                    LoadOutcome::FailedLoad { .. } => c.failed_load += 1,
                }
                c
            })
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|r| r.outcome.is_failure())
    }

    /// Targets to pass to `--only` to retry what did not finish, including
    /// the ones an aborted run never reached.
    pub fn rerun_targets(&self) -> Vec<&TargetTableName> {
        let mut targets: Vec<_> = self.failures().map(|r| &r.target).collect();
        if let Some(abort) = &self.aborted {
            targets.push(&abort.target);
        }
        targets.extend(self.not_processed.iter());
        targets
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failures().next().is_none()
    }

    /// 0 on success, 1 when some tables failed, 2 when the run was aborted.
    pub fn exit_code(&self) -> i32 {
        if self.aborted.is_some() {
            2
        } else if self.failures().next().is_some() {
            1
        } else {
            0
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Progress callbacks for a run.
pub trait RunObserver {
    fn on_database(&mut self, _database: &SourceDatabase) {}
    fn on_table(&mut self, _report: &TableReport) {}
    fn on_abort(&mut self, _abort: &RunAbort) {}
}

impl RunObserver for () {}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub max_rows_per_batch: usize,
    pub max_attempts: usize,
    pub use_exported_ddl: bool,
    pub scan: ScanOptions,
    /// Uppercased target names to restrict the run to; empty means all.
    pub only: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_rows_per_batch: 500,
            max_attempts: crate::creator::DEFAULT_MAX_ATTEMPTS,
            use_exported_ddl: false,
            scan: ScanOptions::default(),
            only: Vec::new(),
        }
    }
}

impl LoadOptions {
    pub fn from_settings(settings: &LoaderSettings) -> Self {
        Self {
            max_rows_per_batch: settings.max_rows_per_batch,
            max_attempts: settings.max_attempts,
            use_exported_ddl: settings.use_exported_ddl,
            scan: settings.scan_options(),
            only: Vec::new(),
        }
    }

    fn selected(&self, target: &TargetTableName) -> bool {
        self.only.is_empty() || self.only.iter().any(|o| o.eq_ignore_ascii_case(target.as_str()))
    }
}

/// Spelling of an existing table's statement as the repair machine would
/// have left it: statements with unsafe bare names come out fully quoted.
fn existing_shape(sql: String) -> String {
    if validate_ddl(&sql).is_ok() {
        return sql;
    }
    force_quote_identifiers(&sql).unwrap_or(sql)
}

enum LoadFailure {
    Fatal(WarehouseError),
    Table(String),
}

impl From<WarehouseError> for LoadFailure {
    fn from(err: WarehouseError) -> Self {
        if err.is_connectivity() {
            Self::Fatal(err)
        } else {
            Self::Table(err.message)
        }
    }
}

/// Drives a run over scanned databases.
pub struct LoadOrchestrator<'a, W: Warehouse> {
    warehouse: &'a W,
    generator: DdlGenerator,
    patterns: ErrorPatterns,
    options: LoadOptions,
}

impl<'a, W: Warehouse> LoadOrchestrator<'a, W> {
    pub fn new(warehouse: &'a W, generator: DdlGenerator, patterns: ErrorPatterns, options: LoadOptions) -> Self {
        Self {
            warehouse,
            generator,
            patterns,
            options,
        }
    }

    pub async fn run(&self, databases: &[SourceDatabase], observer: &mut dyn RunObserver) -> RunStatistics {
        let mut stats = RunStatistics::new();
        let mut claimed: HashMap<TargetTableName, String> = HashMap::new();

        'databases: for (db_index, database) in databases.iter().enumerate() {
            observer.on_database(database);

            for (table_index, table) in database.tables.iter().enumerate() {
                let target = table.target();
                if !self.options.selected(&target) {
                    continue;
                }

                let source = format!("{}.{}", table.database, table.name);
                if let Some(first) = claimed.get(&target) {
                    let report = TableReport::new(
                        table,
                        LoadOutcome::failed_create(
                            ErrorKind::IdentifierConflict,
                            format!("target name {} already used by {}", target, first),
                        ),
                    );
                    observer.on_table(&report);
                    stats.record(report);
                    continue;
                }
                claimed.insert(target.clone(), source);

                match self.process_table(table).await {
                    Ok(report) => {
                        observer.on_table(&report);
                        stats.record(report);
                    }
                    Err(err) => {
                        tracing::error!(table = %target, error = %err, "warehouse unreachable, stopping run");
                        let abort = RunAbort {
                            kind: ErrorKind::ConnectivityFailure,
                            target,
                            message: err.message,
                        };
                        observer.on_abort(&abort);
                        stats.aborted = Some(abort);
                        stats.not_processed = self.remaining(databases, db_index, table_index + 1, &claimed);
                        break 'databases;
                    }
                }
            }
        }

        stats.finished_at = Some(Utc::now());
        stats
    }

    /// Selected targets from `(db_index, table_index)` onwards, skipping
    /// names already claimed by this run.
    fn remaining(
        &self,
        databases: &[SourceDatabase],
        db_index: usize,
        table_index: usize,
        claimed: &HashMap<TargetTableName, String>,
    ) -> Vec<TargetTableName> {
        let mut targets: Vec<TargetTableName> = Vec::new();
        let rest = databases[db_index..].iter().enumerate().flat_map(|(k, db)| {
            let skip = if k == 0 { table_index } else { 0 };
            db.tables.iter().skip(skip)
        });
        for table in rest {
            let target = table.target();
            if self.options.selected(&target) && !claimed.contains_key(&target) && !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    /// Process one table. `Err` only for connectivity failures.
    pub async fn process_table(&self, table: &SourceTable) -> Result<TableReport, WarehouseError> {
        let target = table.target();
        let done = |outcome: LoadOutcome| -> Result<TableReport, WarehouseError> {
            Ok(TableReport::new(table, outcome))
        };

        let state = match table_exists_and_has_data(self.warehouse, &target).await {
            Ok(state) => state,
            Err(err) if err.is_connectivity() => return Err(err),
            Err(err) => {
                return done(LoadOutcome::failed_create(
                    ErrorKind::CreationFailure,
                    format!("existence probe failed: {}", err.message),
                ));
            }
        };
        if let TableState::ExistsWithData(rows) = state {
            tracing::info!(table = %target, rows, "already loaded, skipping");
            return done(LoadOutcome::SkippedAlreadyLoaded { rows });
        }

        let (plan, csv_width) = match self.plan(table) {
            Ok(planned) => planned,
            Err(outcome) => return done(outcome),
        };
        let mut report = TableReport::new(table, LoadOutcome::Loaded { rows: 0 });
        report.warnings = plan.warnings.clone();
        for warning in &plan.warnings {
            tracing::warn!(table = %target, "{}", warning);
        }

        let creation_sql = self.creation_sql(table, &plan);
        let shape_sql = if state == TableState::Absent {
            let creator = TableCreator::new(self.warehouse, &self.patterns).max_attempts(self.options.max_attempts);
            let result = creator.create_table_with_retry(&creation_sql, &target).await?;
            report.attempts = result.attempts().len();
            match result {
                CreateResult::Created { sql, .. } => sql,
                CreateResult::Failed { kind, cause, reason, .. } => {
                    tracing::warn!(table = %target, ?cause, "table creation failed");
                    report.outcome = LoadOutcome::failed_create(kind, reason);
                    return Ok(report);
                }
            }
        } else {
            existing_shape(creation_sql)
        };

        let insert = match self.insert_target(&plan, &shape_sql, csv_width) {
            Ok(insert) => insert,
            Err(reason) => {
                report.outcome = LoadOutcome::failed_load(reason);
                return Ok(report);
            }
        };
        let load_types: Vec<SourceType> = plan.columns.iter().map(|c| c.load_type).collect();

        report.outcome = match self.load_staged(table, &insert, &load_types).await {
            Ok(rows) => {
                tracing::info!(table = %target, rows, "loaded");
                LoadOutcome::Loaded { rows }
            }
            Err(LoadFailure::Fatal(err)) => return Err(err),
            Err(LoadFailure::Table(reason)) => LoadOutcome::failed_load(reason),
        };
        Ok(report)
    }

    /// Plan the table and report how many fields its CSV rows carry.
    fn plan(&self, table: &SourceTable) -> Result<(TablePlan, usize), LoadOutcome> {
        let columns = table
            .describe(&self.options.scan)
            .map_err(|e| LoadOutcome::failed_create(ErrorKind::SchemaGeneration, e.to_string()))?;
        let plan = self
            .generator
            .plan(&table.database, &table.name, &columns)
            .map_err(|e| {
                LoadOutcome::failed_create(e.kind().unwrap_or(ErrorKind::SchemaGeneration), e.to_string())
            })?;
        Ok((plan, columns.len()))
    }

    /// The exported statement when configured and present, else the plan's.
    fn creation_sql(&self, table: &SourceTable, plan: &TablePlan) -> String {
        if !self.options.use_exported_ddl {
            return plan.ddl.clone();
        }
        match table.exported_ddl() {
            Ok(Some(sql)) => sql.trim().trim_end_matches(';').trim_end().to_string(),
            Ok(None) => plan.ddl.clone(),
            Err(e) => {
                tracing::warn!(table = %plan.target, error = %e, "unreadable DDL file, generating instead");
                plan.ddl.clone()
            }
        }
    }

    /// Insert identifiers spelled as the executed CREATE spelled them.
    fn insert_target(&self, plan: &TablePlan, shape_sql: &str, csv_width: usize) -> Result<InsertTarget, String> {
        let insert = match parse_create_table(shape_sql) {
            Ok(stmt) => InsertTarget::from_create_table(&stmt),
            Err(_) => {
                let names: Vec<String> = plan.columns.iter().map(|c| c.name.clone()).collect();
                InsertTarget::quoted(&plan.target, &names)
            }
        };
        if insert.columns.len() != plan.columns.len() {
            return Err(format!(
                "CREATE statement declares {} columns but the plan has {}",
                insert.columns.len(),
                plan.columns.len()
            ));
        }
        // A headerless empty file has no width to compare.
        if csv_width != 0 && csv_width != plan.columns.len() {
            return Err(format!(
                "table has {} columns but the CSV has {}",
                plan.columns.len(),
                csv_width
            ));
        }
        Ok(insert)
    }

    /// Load rows into a staging copy of the target, then publish them with a
    /// single `INSERT ... SELECT`. The target never holds part of a load, so
    /// an interrupted table probes as empty and is loaded again next run.
    async fn load_staged(
        &self,
        table: &SourceTable,
        insert: &InsertTarget,
        load_types: &[SourceType],
    ) -> Result<u64, LoadFailure> {
        let stage = InsertTarget {
            table: table.target().stage_quoted(),
            columns: insert.columns.clone(),
        };

        // A stage left behind by an interrupted run is discarded.
        self.statement(&format!("DROP TABLE IF EXISTS {}", stage.table)).await?;
        self.statement(&format!(
            "CREATE TABLE {} AS SELECT * FROM {} WHERE 1 = 0",
            stage.table, insert.table
        ))
        .await?;

        let rows = match self.load_rows(table, &stage, load_types).await {
            Ok(rows) => rows,
            Err(LoadFailure::Table(reason)) => {
                self.drop_stage(&stage).await?;
                return Err(LoadFailure::Table(reason));
            }
            Err(fatal) => return Err(fatal),
        };

        let columns = insert.columns.join(", ");
        let publish = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            insert.table, columns, columns, stage.table
        );
        if let Err(err) = self.statement(&publish).await {
            if let LoadFailure::Table(_) = err {
                self.drop_stage(&stage).await?;
            }
            return Err(err);
        }
        self.drop_stage(&stage).await?;
        Ok(rows)
    }

    async fn load_rows(
        &self,
        table: &SourceTable,
        insert: &InsertTarget,
        load_types: &[SourceType],
    ) -> Result<u64, LoadFailure> {
        let mut reader = table
            .rows(&self.options.scan)
            .map_err(|e| LoadFailure::Table(e.to_string()))?;

        let mut inserted = 0u64;
        loop {
            let batch = reader
                .next_batch(self.options.max_rows_per_batch)
                .map_err(|e| LoadFailure::Table(e.to_string()))?;
            if batch.is_empty() {
                return Ok(inserted);
            }

            let rows: Vec<Vec<CellValue>> = batch
                .iter()
                .map(|row| {
                    row.iter()
                        .zip(load_types)
                        .map(|(field, ty)| CellValue::from_field(field, *ty))
                        .collect()
                })
                .collect();

            inserted += self
                .warehouse
                .bulk_load(insert, &rows)
                .await
                .map_err(LoadFailure::from)?;
            tracing::debug!(table = %insert.table, inserted, "batch staged");
        }
    }

    async fn statement(&self, sql: &str) -> Result<u64, LoadFailure> {
        self.warehouse.execute(sql).await.map_err(LoadFailure::from)
    }

    /// Failing to drop the stage does not fail the table; the next run
    /// drops it before staging again.
    async fn drop_stage(&self, stage: &InsertTarget) -> Result<(), LoadFailure> {
        match self.statement(&format!("DROP TABLE IF EXISTS {}", stage.table)).await {
            Ok(_) => Ok(()),
            Err(LoadFailure::Table(reason)) => {
                tracing::warn!(table = %stage.table, error = %reason, "could not drop staging table");
                Ok(())
            }
            Err(fatal) => Err(fatal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: LoadOutcome) -> TableReport {
        TableReport {
            database: "db".into(),
            table: "t".into(),
            target: crate::naming::target_table_name("db", "t"),
            outcome,
            attempts: 0,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_counts_and_exit_codes() {
        let mut stats = RunStatistics::new();
        assert_eq!(stats.exit_code(), 0);

        stats.record(report(LoadOutcome::Loaded { rows: 3 }));
        stats.record(report(LoadOutcome::SkippedAlreadyLoaded { rows: 9 }));
        assert!(stats.is_success());

        stats.record(report(LoadOutcome::failed_load("boom")));
        let counts = stats.counts();
        assert_eq!(counts.loaded, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.failed_load, 1);
        assert_eq!(counts.rows_loaded, 3);
        assert_eq!(stats.exit_code(), 1);
        assert_eq!(stats.rerun_targets().len(), 1);

        stats.aborted = Some(RunAbort {
            kind: ErrorKind::ConnectivityFailure,
            target: crate::naming::target_table_name("db", "u"),
            message: "connection refused".into(),
        });
        assert_eq!(stats.exit_code(), 2);
        assert_eq!(stats.rerun_targets().len(), 2);
    }

    #[test]
    fn test_only_filter_is_case_insensitive() {
        let options = LoadOptions {
            only: vec!["school_table_order".into()],
            ..LoadOptions::default()
        };
        assert!(options.selected(&crate::naming::target_table_name("school", "order")));
        assert!(!options.selected(&crate::naming::target_table_name("school", "student")));
    }

    #[test]
    fn test_existing_shape_quotes_unsafe_exports() {
        let exported = "CREATE TABLE SCHOOL_TABLE_ORDER (\n    ID NUMBER,\n    order date VARCHAR()\n)".to_string();
        assert_eq!(
            existing_shape(exported),
            "CREATE TABLE \"SCHOOL_TABLE_ORDER\" (\n    \"ID\" NUMBER,\n    \"order date\" VARCHAR(16777216)\n)"
        );

        let safe = "CREATE TABLE T (\n    ID NUMBER\n)".to_string();
        assert_eq!(existing_shape(safe.clone()), safe);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(LoadOutcome::Loaded { rows: 2 }).unwrap();
        assert_eq!(json["outcome"], "loaded");
        assert_eq!(json["rows"], 2);
    }
}
