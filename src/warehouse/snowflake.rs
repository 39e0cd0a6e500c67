//! Snowflake SQL API v2 backend.
//!
//! Each statement is one `POST /api/v2/statements`. Statements still running
//! when the request returns come back as HTTP 202 with a status URL, which is
//! polled until the result is ready.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CellValue, InsertTarget, Placeholder, Warehouse, build_insert_sql};
use crate::config::WarehouseConfig;
use crate::error::{LoadError, LoadResult, WarehouseError};
use crate::naming::TargetTableName;

const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const MAX_POLLS: u32 = 120;

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: Option<String>,
}

impl From<&CellValue> for Binding {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Null => Binding { kind: "TEXT", value: None },
            CellValue::Int(v) => Binding { kind: "FIXED", value: Some(v.to_string()) },
            CellValue::Float(v) => Binding { kind: "REAL", value: Some(v.to_string()) },
            CellValue::Text(v) => Binding { kind: "TEXT", value: Some(v.clone()) },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    statement_status_url: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    stats: Option<ResultStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultStats {
    #[serde(default)]
    num_rows_inserted: Option<u64>,
    #[serde(default)]
    num_rows_updated: Option<u64>,
    #[serde(default)]
    num_rows_deleted: Option<u64>,
}

impl StatementResponse {
    fn first_cell(&self) -> Option<&str> {
        self.data.as_ref()?.first()?.first()?.as_deref()
    }

    fn affected_rows(&self) -> u64 {
        self.stats
            .as_ref()
            .map(|s| {
                s.num_rows_inserted.unwrap_or(0)
                    + s.num_rows_updated.unwrap_or(0)
                    + s.num_rows_deleted.unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

/// Warehouse reached through the Snowflake SQL API.
pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    base_url: String,
    token: String,
    token_type: String,
    user: Option<String>,
    database: String,
    schema: String,
    warehouse: Option<String>,
    role: Option<String>,
    timeout_secs: u64,
    poll_interval: Duration,
}

impl SnowflakeWarehouse {
    /// Build a client from resolved settings. No request is made until the
    /// first statement.
    pub fn from_config(config: &WarehouseConfig) -> LoadResult<Self> {
        let require = |value: &Option<String>, field: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| LoadError::Config(format!("warehouse.{} is required", field)))
        };

        let base_url = match (&config.host, &config.account) {
            (Some(host), _) if host.starts_with("http") => host.trim_end_matches('/').to_string(),
            (Some(host), _) => format!("https://{}", host.trim_end_matches('/')),
            (None, Some(account)) => format!("https://{}.snowflakecomputing.com", account),
            (None, None) => {
                return Err(LoadError::Config(
                    "warehouse.account or warehouse.url is required".to_string(),
                ));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs + 30))
            .build()
            .map_err(|e| LoadError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: require(&config.token, "token")?,
            token_type: config.token_type.clone(),
            user: config.user.clone().filter(|u| !u.is_empty()),
            database: require(&config.database, "database")?,
            schema: require(&config.schema, "schema")?,
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            timeout_secs: config.timeout_secs,
            poll_interval: Duration::from_millis(500),
        })
    }

    async fn submit(&self, sql: &str, bindings: BTreeMap<String, Binding>) -> Result<StatementResponse, WarehouseError> {
        let body = StatementRequest {
            statement: sql,
            timeout: self.timeout_secs,
            database: &self.database,
            schema: &self.schema,
            warehouse: self.warehouse.as_deref(),
            role: self.role.as_deref(),
            bindings,
        };

        tracing::trace!(sql, "submitting statement");
        let resp = self
            .client
            .post(format!("{}/api/v2/statements", self.base_url))
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, &self.token_type)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::connectivity(format!("request failed: {}", e)))?;

        self.finish(resp).await
    }

    /// Read a response, polling while the statement is still running.
    async fn finish(&self, mut resp: reqwest::Response) -> Result<StatementResponse, WarehouseError> {
        let mut polls = 0;
        loop {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| WarehouseError::connectivity(format!("reading response: {}", e)))?;
            let body: StatementResponse = serde_json::from_str(&text).unwrap_or_else(|_| StatementResponse {
                message: Some(text.clone()),
                ..Default::default()
            });

            if status == StatusCode::OK {
                return Ok(body);
            }
            if status != StatusCode::ACCEPTED {
                return Err(status_error(status, body));
            }

            polls += 1;
            let Some(handle) = body.statement_status_url else {
                return Err(WarehouseError::statement("statement accepted without a status URL"));
            };
            if polls > MAX_POLLS {
                return Err(WarehouseError::statement(format!(
                    "statement still running after {} polls",
                    MAX_POLLS
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
            resp = self
                .client
                .get(format!("{}{}", self.base_url, handle))
                .bearer_auth(&self.token)
                .header(TOKEN_TYPE_HEADER, &self.token_type)
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| WarehouseError::connectivity(format!("request failed: {}", e)))?;
        }
    }
}

/// Authentication and server-side failures end the run; anything else is a
/// statement the warehouse rejected.
fn status_error(status: StatusCode, body: StatementResponse) -> WarehouseError {
    let message = body
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.to_string());

    let connectivity = status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    if connectivity {
        return WarehouseError::connectivity(format!("{} ({})", message, status));
    }

    let error = WarehouseError::statement(message);
    match body.sql_state {
        Some(state) => error.with_sql_state(state),
        None => error,
    }
}

fn positional(cells: impl IntoIterator<Item = Binding>) -> BTreeMap<String, Binding> {
    // Keys sort as strings; the API reads them as positions.
    cells
        .into_iter()
        .enumerate()
        .map(|(i, b)| ((i + 1).to_string(), b))
        .collect()
}

impl Warehouse for SnowflakeWarehouse {
    fn describe(&self) -> String {
        match &self.user {
            Some(user) => format!("snowflake {} as {} ({}.{})", self.base_url, user, self.database, self.schema),
            None => format!("snowflake {} ({}.{})", self.base_url, self.database, self.schema),
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        let resp = self.submit(sql, BTreeMap::new()).await?;
        Ok(resp.affected_rows())
    }

    async fn query_count(&self, sql: &str) -> Result<u64, WarehouseError> {
        let resp = self.submit(sql, BTreeMap::new()).await?;
        parse_count(&resp)
    }

    async fn table_exists(&self, table: &TargetTableName) -> Result<bool, WarehouseError> {
        let sql = "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
                   WHERE TABLE_SCHEMA = CURRENT_SCHEMA() AND TABLE_NAME = ?";
        let bindings = positional([Binding {
            kind: "TEXT",
            value: Some(table.as_str().to_string()),
        }]);
        let resp = self.submit(sql, bindings).await?;
        Ok(parse_count(&resp)? > 0)
    }

    async fn bulk_load(&self, target: &InsertTarget, rows: &[Vec<CellValue>]) -> Result<u64, WarehouseError> {
        let mut written = 0u64;
        for chunk in rows.chunks(target.rows_per_statement()) {
            let sql = build_insert_sql(target, chunk.len(), Placeholder::Question);
            let bindings = positional(chunk.iter().flatten().map(Binding::from));
            self.submit(&sql, bindings).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

fn parse_count(resp: &StatementResponse) -> Result<u64, WarehouseError> {
    resp.first_cell()
        .and_then(|c| c.parse::<u64>().ok())
        .ok_or_else(|| WarehouseError::statement("count query returned no rows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WarehouseConfig {
        WarehouseConfig {
            account: Some("xy12345".into()),
            token: Some("secret".into()),
            database: Some("MIGRATION".into()),
            schema: Some("PUBLIC".into()),
            ..WarehouseConfig::default()
        }
    }

    #[test]
    fn test_base_url_from_account() {
        let wh = SnowflakeWarehouse::from_config(&config()).unwrap();
        assert_eq!(wh.base_url, "https://xy12345.snowflakecomputing.com");
        assert!(!wh.describe().contains("secret"));
        assert_eq!(wh.describe(), "snowflake https://xy12345.snowflakecomputing.com (MIGRATION.PUBLIC)");
    }

    #[test]
    fn test_describe_names_user() {
        let mut cfg = config();
        cfg.user = Some("LOADER".into());
        let wh = SnowflakeWarehouse::from_config(&cfg).unwrap();
        assert_eq!(
            wh.describe(),
            "snowflake https://xy12345.snowflakecomputing.com as LOADER (MIGRATION.PUBLIC)"
        );
    }

    #[test]
    fn test_host_override() {
        let mut cfg = config();
        cfg.host = Some("http://localhost:8080/".into());
        let wh = SnowflakeWarehouse::from_config(&cfg).unwrap();
        assert_eq!(wh.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let mut cfg = config();
        cfg.token = None;
        let err = SnowflakeWarehouse::from_config(&cfg).err().unwrap();
        assert!(err.to_string().contains("warehouse.token"));
    }

    #[test]
    fn test_status_classification() {
        let body = || StatementResponse {
            message: Some("SQL compilation error: syntax error line 1".into()),
            sql_state: Some("42000".into()),
            ..Default::default()
        };
        let stmt = status_error(StatusCode::UNPROCESSABLE_ENTITY, body());
        assert!(!stmt.is_connectivity());
        assert_eq!(stmt.sql_state.as_deref(), Some("42000"));

        assert!(status_error(StatusCode::UNAUTHORIZED, body()).is_connectivity());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, body()).is_connectivity());
    }

    #[test]
    fn test_bindings_are_typed() {
        let bindings = positional(
            [CellValue::Int(7), CellValue::Null, CellValue::Text("x".into())]
                .iter()
                .map(Binding::from),
        );
        let json = serde_json::to_value(&bindings).unwrap();
        assert_eq!(json["1"]["type"], "FIXED");
        assert_eq!(json["1"]["value"], "7");
        assert!(json["2"]["value"].is_null());
        assert_eq!(json["3"]["type"], "TEXT");
    }

    #[test]
    fn test_parse_count() {
        let resp: StatementResponse =
            serde_json::from_str(r#"{"data": [["42"]], "sqlState": "00000"}"#).unwrap();
        assert_eq!(parse_count(&resp).unwrap(), 42);
        assert!(parse_count(&StatementResponse::default()).is_err());
    }
}
