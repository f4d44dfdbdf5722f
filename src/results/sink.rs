//! Time-series metrics sink
//!
//! Aggregated results can additionally be pushed to a metrics backend. Pushes
//! are best effort: the engine logs failures and carries on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::MetricsConfig;
use crate::models::{AggregatedResult, TestId};

/// Write-only destination for aggregated results
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(&self, run_id: &str, test_id: TestId, result: &AggregatedResult) -> Result<()>;
}

/// Sink that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl MetricsSink for NoopSink {
    async fn push(&self, _run_id: &str, _test_id: TestId, _result: &AggregatedResult) -> Result<()> {
        Ok(())
    }
}

/// InfluxDB 1.x sink using the HTTP line protocol endpoint
pub struct InfluxSink {
    client: Client,
    write_url: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create metrics HTTP client")?;

        Ok(Self {
            client,
            write_url: format!(
                "{}/write?db={}",
                config.url.trim_end_matches('/'),
                config.database
            ),
            measurement: config.measurement.clone(),
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn push(&self, run_id: &str, test_id: TestId, result: &AggregatedResult) -> Result<()> {
        let line = line_protocol(&self.measurement, run_id, test_id, result);
        debug!("Pushing metrics to {}: {}", self.write_url, line);

        let response = self
            .client
            .post(&self.write_url)
            .body(line)
            .send()
            .await
            .context("Failed to send metrics")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metrics backend returned {status}: {}", body.trim());
        }
        Ok(())
    }
}

/// Render one InfluxDB line protocol point
pub fn line_protocol(
    measurement: &str,
    run_id: &str,
    test_id: TestId,
    result: &AggregatedResult,
) -> String {
    let mut fields = vec![
        format!("total={}i", result.total),
        format!("success_count={}i", result.success_count),
        format!("failure_count={}i", result.failure_count),
    ];
    if let Some(timing) = &result.timing {
        fields.push(format!("min_ms={}", timing.min_ms));
        fields.push(format!("max_ms={}", timing.max_ms));
        fields.push(format!("mean_ms={}", timing.mean_ms));
    }
    if let Some(code) = result.exit_code {
        fields.push(format!("exit_code={code}i"));
    }

    format!(
        "{},run_id={},test_id={} {}",
        escape_key(measurement),
        escape_key(run_id),
        test_id,
        fields.join(",")
    )
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
