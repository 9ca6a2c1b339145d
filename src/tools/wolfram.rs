//! Wolfram Alpha client
//!
//! Full-results API with a sqlite-backed monthly quota counter and a
//! TTL cache keyed by the normalized query. Cache hits cost nothing
//! against the quota.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CONFIG;

use super::{ComputeTool, ToolError};

const TRANSPORT_RETRIES: u32 = 3;

pub struct WolframTool {
    client: reqwest::Client,
    db: SqlitePool,
    base_url: String,
    app_id: String,
    monthly_limit: i64,
    cache_ttl_secs: i64,
}

impl WolframTool {
    pub fn new(db: SqlitePool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            db,
            base_url: CONFIG.wolfram_base_url.clone(),
            app_id: CONFIG.wolfram_app_id.clone(),
            monthly_limit: CONFIG.wolfram_monthly_limit,
            cache_ttl_secs: CONFIG.wolfram_cache_ttl_secs,
        })
    }

    /// Quota rows are keyed per calendar month so the counter resets
    /// naturally when the month rolls over.
    fn month_key() -> String {
        let now = chrono::Utc::now();
        format!("wolfram_usage_{}", now.format("%Y_%m"))
    }

    fn cache_key(query: &str) -> String {
        format!("wolfram:{}", query.trim().to_lowercase())
    }

    async fn quota_used(&self) -> i64 {
        let row: Result<Option<(i64,)>, sqlx::Error> =
            sqlx::query_as("SELECT used FROM tool_quota WHERE month_key = $1")
                .bind(Self::month_key())
                .fetch_optional(&self.db)
                .await;
        match row {
            Ok(Some((used,))) => used,
            Ok(None) => 0,
            Err(e) => {
                warn!("quota read failed: {} - treating as 0", e);
                0
            }
        }
    }

    async fn quota_increment(&self) {
        let result = sqlx::query(
            "INSERT INTO tool_quota (month_key, used) VALUES ($1, 1)
             ON CONFLICT(month_key) DO UPDATE SET used = used + 1",
        )
        .bind(Self::month_key())
        .execute(&self.db)
        .await;
        if let Err(e) = result {
            warn!("quota increment failed: {}", e);
        }
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        let cutoff = chrono::Utc::now().timestamp() - self.cache_ttl_secs;
        let row: Result<Option<(String,)>, sqlx::Error> = sqlx::query_as(
            "SELECT response FROM query_cache WHERE cache_key = $1 AND created_at > $2",
        )
        .bind(key)
        .bind(cutoff)
        .fetch_optional(&self.db)
        .await;
        row.ok().flatten().map(|(r,)| r)
    }

    async fn cache_put(&self, key: &str, response: &str) {
        let result = sqlx::query(
            "INSERT INTO query_cache (cache_key, response, created_at) VALUES ($1, $2, $3)
             ON CONFLICT(cache_key) DO UPDATE SET
                 response = excluded.response, created_at = excluded.created_at",
        )
        .bind(key)
        .bind(response)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.db)
        .await;
        if let Err(e) = result {
            warn!("cache write failed: {}", e);
        }
    }

    /// Flatten the query result into markdown, one `**Title**: text` block
    /// per pod. Pods without plaintext are skipped.
    fn format_pods(body: &Value) -> Option<String> {
        let result = body.get("queryresult")?;
        if result.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let pods = result.get("pods")?.as_array()?;
        let mut blocks = Vec::new();
        for pod in pods {
            let title = pod.get("title").and_then(Value::as_str).unwrap_or("Result");
            let texts: Vec<&str> = pod
                .get("subpods")
                .and_then(Value::as_array)
                .map(|subs| {
                    subs.iter()
                        .filter_map(|s| s.get("plaintext").and_then(Value::as_str))
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            if !texts.is_empty() {
                blocks.push(format!("**{}**: {}", title, texts.join("\n")));
            }
        }
        if blocks.is_empty() { None } else { Some(blocks.join("\n\n")) }
    }

    async fn fetch(&self, input: &str) -> Result<Value, ToolError> {
        let mut last_err = String::new();
        for attempt in 1..=TRANSPORT_RETRIES {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("appid", self.app_id.as_str()),
                    ("input", input),
                    ("output", "json"),
                    ("format", "plaintext"),
                ])
                .send()
                .await;
            match response {
                Ok(resp) => {
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| ToolError::Transport(e.to_string()));
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(attempt, "Wolfram request failed: {}", last_err);
                }
            }
        }
        Err(ToolError::Transport(last_err))
    }
}

#[async_trait]
impl ComputeTool for WolframTool {
    async fn query(&self, input: &str) -> Result<String, ToolError> {
        let key = Self::cache_key(input);
        if let Some(cached) = self.cache_get(&key).await {
            debug!("Wolfram cache hit for: {}", input);
            return Ok(cached);
        }

        let used = self.quota_used().await;
        if used >= self.monthly_limit {
            return Err(ToolError::QuotaExceeded { used, limit: self.monthly_limit });
        }

        let body = self.fetch(input).await?;
        self.quota_increment().await;

        match Self::format_pods(&body) {
            Some(text) => {
                self.cache_put(&key, &text).await;
                info!("Wolfram query succeeded ({} chars)", text.len());
                Ok(text)
            }
            None => Err(ToolError::NoResult(
                "Wolfram Alpha returned no usable result".to_string(),
            )),
        }
    }

    async fn quota_ok(&self) -> bool {
        self.quota_used().await < self.monthly_limit
    }

    async fn quota_usage(&self) -> (i64, i64) {
        (self.quota_used().await, self.monthly_limit)
    }
}
