//! Query executor
//!
//! Runs validated SQL against the warehouse with the safety caps: a dry run
//! always precedes the wet run when a byte-bill cap is set, and a dry-run
//! estimate over the cap fails the request before any query runs. Row
//! payloads are capped and numeric values outside i64 arrive stringified
//! from the client layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlscout_config::ExecutorConfig;
use sqlscout_core::{
    Deadline, Error, ExecutionResult, QueryJob, QueryOutcome, Result, ValidatedSql, Warehouse,
};

/// Per-call execution options.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    pub max_bytes_billed: Option<u64>,
    pub deadline: Deadline,
}

pub struct QueryExecutor {
    warehouse: Arc<dyn Warehouse>,
    max_rows: usize,
    dry_run_timeout: Duration,
    query_timeout: Duration,
    default_max_bytes: u64,
}

impl QueryExecutor {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: &ExecutorConfig) -> Self {
        Self {
            warehouse,
            max_rows: config.max_rows,
            dry_run_timeout: Duration::from_millis(config.dry_run_timeout_ms),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            default_max_bytes: config.max_bytes_billed,
        }
    }

    pub fn default_max_bytes(&self) -> u64 {
        self.default_max_bytes
    }

    /// Execute validated SQL.
    ///
    /// Refuses SQL whose validation status is `error`. When a byte cap is in
    /// force the dry run gates the wet run; `options.dry_run` stops after
    /// the estimate.
    pub async fn execute(
        &self,
        validated: &ValidatedSql,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        if !validated.is_ok() || !validated.read_only {
            let detail = validated
                .findings
                .iter()
                .find(|f| f.level == sqlscout_core::FindingLevel::Error)
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "statement is not a validated read-only query".to_string());
            return Err(Error::ValidationRejected(detail));
        }

        let sql = validated.normalized_sql.as_str();
        let cap = options.max_bytes_billed.or(Some(self.default_max_bytes));
        let started = Instant::now();

        options.deadline.check()?;

        // Dry run: always first while a cap is set, and the whole job when
        // the caller asked for one.
        let estimate = self
            .run_with_timeout(
                QueryJob {
                    sql: sql.to_string(),
                    dry_run: true,
                    max_bytes_billed: cap,
                    timeout: self.dry_run_timeout,
                },
                options.deadline.clamp(self.dry_run_timeout),
            )
            .await?;

        tracing::debug!(
            estimated_bytes = estimate.bytes_processed,
            cap = ?cap,
            dry_run = options.dry_run,
            "Dry-run estimate"
        );

        if options.dry_run {
            return Ok(ExecutionResult {
                rows: Vec::new(),
                columns: Vec::new(),
                row_count: 0,
                bytes_processed: estimate.bytes_processed,
                bytes_billed: 0,
                cache_hit: estimate.cache_hit,
                dry_run: true,
                job_id: estimate.job_id,
                execution_time_ms: started.elapsed().as_millis() as u64,
                truncated: false,
            });
        }

        if let Some(cap) = cap {
            if estimate.bytes_processed > cap {
                return Err(Error::BudgetExceeded {
                    estimated_bytes: estimate.bytes_processed,
                    max_bytes_billed: cap,
                });
            }
        }

        options.deadline.check()?;

        let outcome = self
            .run_with_timeout(
                QueryJob {
                    sql: sql.to_string(),
                    dry_run: false,
                    max_bytes_billed: cap,
                    timeout: self.query_timeout,
                },
                options.deadline.clamp(self.query_timeout),
            )
            .await?;

        Ok(self.shape(outcome, started))
    }

    async fn run_with_timeout(&self, job: QueryJob, budget: Duration) -> Result<QueryOutcome> {
        match tokio::time::timeout(budget, self.warehouse.run(&job)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExecutionTimeout),
        }
    }

    fn shape(&self, outcome: QueryOutcome, started: Instant) -> ExecutionResult {
        let truncated = outcome.rows.len() > self.max_rows;
        let mut rows = outcome.rows;
        if truncated {
            rows.truncate(self.max_rows);
        }
        let row_count = rows.len() as u64;

        ExecutionResult {
            rows,
            columns: outcome.columns,
            row_count,
            bytes_processed: outcome.bytes_processed,
            bytes_billed: outcome.bytes_billed,
            cache_hit: outcome.cache_hit,
            dry_run: false,
            job_id: outcome.job_id,
            execution_time_ms: started.elapsed().as_millis() as u64,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::StaticWarehouse;
    use sqlscout_core::{Finding, ValidationStatus};

    fn ok_sql() -> ValidatedSql {
        ValidatedSql {
            status: ValidationStatus::Ok,
            findings: Vec::new(),
            normalized_sql: "SELECT id FROM ds.users".to_string(),
            read_only: true,
        }
    }

    fn rejected_sql() -> ValidatedSql {
        ValidatedSql {
            status: ValidationStatus::Error,
            findings: vec![Finding::error("write_verb", "DELETE is not allowed")],
            normalized_sql: "DELETE FROM ds.orders".to_string(),
            read_only: false,
        }
    }

    fn options(dry_run: bool, cap: Option<u64>) -> ExecuteOptions {
        ExecuteOptions {
            dry_run,
            max_bytes_billed: cap,
            deadline: Deadline::after(Duration::from_secs(10)),
        }
    }

    fn executor(warehouse: Arc<StaticWarehouse>) -> QueryExecutor {
        QueryExecutor::new(warehouse, &ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_rejects_invalid_sql() {
        let warehouse = Arc::new(StaticWarehouse::new());
        let executor = executor(Arc::clone(&warehouse));

        let err = executor
            .execute(&rejected_sql(), &options(false, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationRejected(_)));
        assert_eq!(warehouse.dry_runs(), 0);
        assert_eq!(warehouse.wet_runs(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_returns_no_rows() {
        let warehouse = Arc::new(StaticWarehouse::new().with_bytes_estimate(1_000));
        let executor = executor(Arc::clone(&warehouse));

        let result = executor
            .execute(&ok_sql(), &options(true, None))
            .await
            .unwrap();
        assert!(result.dry_run);
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.bytes_processed, 1_000);
        assert_eq!(warehouse.wet_runs(), 0);
    }

    #[tokio::test]
    async fn test_budget_gate_blocks_wet_run() {
        // Dry run reports 10 GB against a 1 GB cap
        let warehouse =
            Arc::new(StaticWarehouse::new().with_bytes_estimate(10 * (1 << 30) as u64));
        let executor = executor(Arc::clone(&warehouse));

        let err = executor
            .execute(&ok_sql(), &options(false, Some(1 << 30)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { .. }));
        assert_eq!(warehouse.dry_runs(), 1);
        assert_eq!(warehouse.wet_runs(), 0);
    }

    #[tokio::test]
    async fn test_wet_run_within_budget() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), serde_json::json!(1));
        let warehouse = Arc::new(
            StaticWarehouse::new()
                .with_bytes_estimate(1_000)
                .with_outcome(QueryOutcome {
                    columns: vec!["id".to_string()],
                    rows: vec![row],
                    total_rows: 1,
                    bytes_processed: 1_000,
                    bytes_billed: 1_000,
                    cache_hit: false,
                    job_id: "job-1".to_string(),
                }),
        );
        let executor = executor(Arc::clone(&warehouse));

        let result = executor
            .execute(&ok_sql(), &options(false, Some(1 << 30)))
            .await
            .unwrap();
        assert!(!result.dry_run);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["id".to_string()]);
        assert_eq!(warehouse.dry_runs(), 1);
        assert_eq!(warehouse.wet_runs(), 1);
    }

    #[tokio::test]
    async fn test_row_truncation() {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = (0..20)
            .map(|i| {
                let mut row = serde_json::Map::new();
                row.insert("n".to_string(), serde_json::json!(i));
                row
            })
            .collect();
        let warehouse = Arc::new(StaticWarehouse::new().with_outcome(QueryOutcome {
            columns: vec!["n".to_string()],
            total_rows: rows.len() as u64,
            rows,
            ..QueryOutcome::default()
        }));

        let mut config = ExecutorConfig::default();
        config.max_rows = 10;
        let executor = QueryExecutor::new(Arc::clone(&warehouse) as Arc<dyn Warehouse>, &config);

        let result = executor
            .execute(&ok_sql(), &options(false, None))
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.row_count, 10);
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels() {
        let warehouse = Arc::new(StaticWarehouse::new());
        let executor = executor(Arc::clone(&warehouse));

        let opts = ExecuteOptions {
            dry_run: false,
            max_bytes_billed: None,
            deadline: Deadline::after(Duration::ZERO),
        };
        let err = executor.execute(&ok_sql(), &opts).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(warehouse.wet_runs(), 0);
    }
}
