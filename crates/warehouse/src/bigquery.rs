//! BigQuery REST client (`jobs.query`).
//!
//! Sends each job through the synchronous query endpoint with
//! `useLegacySql: false`. Dry runs use the same endpoint with the `dryRun`
//! flag, which returns byte estimates without starting a job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use sqlscout_config::constants::endpoints;
use sqlscout_core::{QueryJob, QueryOutcome, Result, Warehouse};

use crate::WarehouseError;

/// Configuration for the BigQuery client
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Billing project id
    pub project: String,
    /// OAuth bearer token (from WAREHOUSE_ACCESS_TOKEN or direct)
    pub access_token: String,
    /// API endpoint (for testing or emulators)
    pub endpoint: String,
    /// Page size requested from the API
    pub max_results: usize,
}

impl BigQueryConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            access_token: std::env::var("WAREHOUSE_ACCESS_TOKEN").unwrap_or_default(),
            endpoint: endpoints::BIGQUERY_DEFAULT.clone(),
            max_results: 10_000,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

pub struct BigQueryWarehouse {
    config: BigQueryConfig,
    client: Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    total_rows: Option<String>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    total_bytes_billed: Option<String>,
    #[serde(default)]
    cache_hit: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    errors: Option<Vec<JobError>>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Deserialize)]
struct Field {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
}

#[derive(Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    #[serde(default)]
    job_id: String,
}

#[derive(Deserialize)]
struct JobError {
    #[serde(default)]
    message: String,
}

impl BigQueryWarehouse {
    pub fn new(config: BigQueryConfig) -> std::result::Result<Self, WarehouseError> {
        if config.project.is_empty() {
            return Err(WarehouseError::Configuration(
                "warehouse project is not configured (WAREHOUSE_PROJECT)".to_string(),
            ));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| WarehouseError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn query_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.endpoint, self.config.project
        )
    }

    /// Convert one warehouse cell to JSON, keyed by the field type.
    ///
    /// Integers that fit i64 become JSON numbers; anything larger stays a
    /// string. Floats and booleans are parsed; everything else passes
    /// through as returned.
    fn convert_cell(value: &Value, field_type: &str) -> Value {
        let Some(text) = value.as_str() else {
            return value.clone();
        };
        match field_type {
            "INTEGER" | "INT64" => match text.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => json!(text),
            },
            "FLOAT" | "FLOAT64" => match text.parse::<f64>() {
                Ok(n) => json!(n),
                Err(_) => json!(text),
            },
            "BOOLEAN" | "BOOL" => match text.parse::<bool>() {
                Ok(b) => json!(b),
                Err(_) => json!(text),
            },
            _ => json!(text),
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn run(&self, job: &QueryJob) -> Result<QueryOutcome> {
        let mut body = json!({
            "query": job.sql,
            "useLegacySql": false,
            "dryRun": job.dry_run,
            "maxResults": self.config.max_results,
            "timeoutMs": job.timeout.as_millis() as u64,
        });
        if let Some(cap) = job.max_bytes_billed {
            body["maximumBytesBilled"] = json!(cap.to_string());
        }

        let timeout = job.timeout + Duration::from_secs(5);
        let response = self
            .client
            .post(self.query_url())
            .bearer_auth(&self.config.access_token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(WarehouseError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Http {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::Decode(e.to_string()))?;

        if let Some(errors) = &parsed.errors {
            if let Some(first) = errors.first() {
                return Err(WarehouseError::Http {
                    status: 400,
                    message: first.message.clone(),
                }
                .into());
            }
        }

        let fields = parsed.schema.map(|s| s.fields).unwrap_or_default();
        let columns: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();

        let rows = parsed
            .rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (field, cell) in fields.iter().zip(&row.f) {
                    object.insert(
                        field.name.clone(),
                        Self::convert_cell(&cell.v, &field.field_type),
                    );
                }
                object
            })
            .collect();

        Ok(QueryOutcome {
            columns,
            rows,
            total_rows: parsed
                .total_rows
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
            bytes_processed: parsed
                .total_bytes_processed
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
            bytes_billed: parsed
                .total_bytes_billed
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
            cache_hit: parsed.cache_hit.unwrap_or(false),
            job_id: parsed.job_reference.map(|j| j.job_id).unwrap_or_default(),
        })
    }
}
