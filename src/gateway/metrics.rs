//! Metrics sink (collaborator, spec §6): `record(metadata, user_id,
//! client_ip, path, timings, request_size, response_size, status)` called
//! once per tracked response. The spec treats persistence here as an
//! external collaborator's concern — only the call shape is specified —
//! but a complete crate still carries a concrete default the way the
//! teacher's `log_service` persists every proxied request today.

use std::time::Duration;

use sqlx::PgPool;

use crate::gateway::types::ResponseMetadata;
use crate::services::log_service::{self, NewRequestLog};

pub struct MetricsRecord<'a> {
    pub metadata: Option<&'a ResponseMetadata>,
    pub user_id: &'a str,
    pub client_ip: &'a str,
    pub path: &'a str,
    pub latency: Duration,
    pub request_size: u64,
    pub response_size: u64,
    pub status: u16,
}

#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: MetricsRecord<'_>);
}

/// Default sink: structured `tracing` events. Guaranteed to exist
/// regardless of whether a persistent sink is wired up, matching spec §7's
/// framing that logging never gates business logic.
pub struct TracingMetricsSink;

#[async_trait::async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record(&self, record: MetricsRecord<'_>) {
        tracing::info!(
            provider = record.metadata.map(|m| m.provider.as_str()).unwrap_or(""),
            model = record.metadata.and_then(|m| m.model.as_deref()).unwrap_or(""),
            user_id = record.user_id,
            client_ip = record.client_ip,
            path = record.path,
            latency_ms = record.latency.as_millis() as u64,
            request_size = record.request_size,
            response_size = record.response_size,
            status = record.status,
            input_tokens = record.metadata.and_then(|m| m.input_tokens),
            output_tokens = record.metadata.and_then(|m| m.output_tokens),
            total_tokens = record.metadata.and_then(|m| m.total_tokens),
            "tracked request completed"
        );
    }
}

/// Persists every tracked request to Postgres, adapting the teacher's
/// `log_service` to the provider-agnostic `ResponseMetadata` shape.
pub struct PersistentMetricsSink {
    db: PgPool,
}

impl PersistentMetricsSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl MetricsSink for PersistentMetricsSink {
    async fn record(&self, record: MetricsRecord<'_>) {
        let log = NewRequestLog {
            request_id: record.metadata.and_then(|m| m.request_id.clone()),
            user_id: record.user_id.to_string(),
            client_ip: record.client_ip.to_string(),
            path: record.path.to_string(),
            provider: record.metadata.map(|m| m.provider.clone()).unwrap_or_default(),
            model: record.metadata.and_then(|m| m.model.clone()),
            input_tokens: record.metadata.and_then(|m| m.input_tokens),
            output_tokens: record.metadata.and_then(|m| m.output_tokens),
            thought_tokens: record.metadata.and_then(|m| m.thought_tokens),
            total_tokens: record.metadata.and_then(|m| m.total_tokens),
            is_streaming: record.metadata.map(|m| m.is_streaming).unwrap_or(false),
            status_code: record.status as i16,
            latency_ms: record.latency.as_millis() as i64,
            request_size: record.request_size as i64,
            response_size: record.response_size as i64,
        };

        if let Err(e) = log_service::insert_log(&self.db, log).await {
            tracing::error!("failed to persist request log: {e}");
        }
    }
}
