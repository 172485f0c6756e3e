//! Prometheus-backed metric source.
//!
//! Issues three instant queries per service (`/api/v1/query`) over a
//! plain HTTP/1.1 connection and maps the first sample of each result to
//! one field of `MetricSnapshot`. A signal whose query fails or comes
//! back empty is left as `None`; only when every query fails is the
//! whole sample reported as an error.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use voxgrid_core::{MetricSnapshot, RetryConfig, epoch_secs, retry_budget, retry_with_backoff};

use crate::source::{MetricSource, SourceError, SourceResult};

/// PromQL expressions for the three signals of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQueries {
    pub queue_depth: String,
    pub cpu_percent: String,
    pub p95_processing_time: String,
}

impl ServiceQueries {
    /// Queries for a service, using the broker queue and histogram names
    /// the ASR and translation workers export.
    pub fn for_service(service: &str) -> Self {
        let (queue, histogram) = match service {
            "asr" => ("asr_processing_queue", "asr_processing_duration_seconds".to_string()),
            "translator" | "translation" => {
                ("translation_queue", "translation_duration_seconds".to_string())
            }
            other => {
                return Self::with_names(
                    service,
                    &format!("{other}_queue"),
                    &format!("{other}_processing_duration_seconds"),
                );
            }
        };
        Self::with_names(service, queue, &histogram)
    }

    fn with_names(service: &str, queue: &str, histogram: &str) -> Self {
        Self {
            queue_depth: format!("rabbitmq_queue_size{{queue_name='{queue}'}}"),
            cpu_percent: format!("avg(cpu_usage_percent{{service='{service}'}})"),
            p95_processing_time: format!(
                "histogram_quantile(0.95, sum(rate({histogram}_bucket[5m])) by (le))"
            ),
        }
    }
}

/// Metric source that queries a Prometheus server.
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    /// `host:port` of the server.
    authority: String,
    /// Path prefix the API is mounted under (usually empty).
    base_path: String,
    /// Per attempt of one query.
    timeout: Duration,
    retry: RetryConfig,
}

impl PrometheusSource {
    /// Create a source for `base_url` (`http://host[:port][/prefix]`).
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> SourceResult<Self> {
        let uri: http::Uri = base_url
            .parse()
            .map_err(|e| SourceError::InvalidEndpoint(format!("{base_url}: {e}")))?;

        match uri.scheme_str() {
            Some("http") | None => {}
            Some(other) => {
                return Err(SourceError::InvalidEndpoint(format!(
                    "{base_url}: unsupported scheme {other}"
                )));
            }
        }

        let authority = uri
            .authority()
            .ok_or_else(|| SourceError::InvalidEndpoint(format!("{base_url}: missing host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };

        Ok(Self {
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
            timeout,
            retry,
        })
    }

    /// Longest one `sample` may take: its queries run concurrently, each
    /// retried with every attempt cut off at the per-attempt timeout.
    pub fn deadline(&self) -> Duration {
        retry_budget(&self.retry, self.timeout)
    }

    /// Run one instant query, with retries, returning the first sample.
    pub async fn query(&self, promql: &str) -> SourceResult<Option<f64>> {
        retry_with_backoff(&self.retry, "prometheus query", move || async move {
            match tokio::time::timeout(self.timeout, self.query_once(promql)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            }
        })
        .await
    }

    async fn query_once(&self, promql: &str) -> SourceResult<Option<f64>> {
        let path = format!(
            "{}/api/v1/query?query={}",
            self.base_path,
            encode_query_component(promql)
        );

        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| SourceError::Unreachable(format!("{}: {e}", self.authority)))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| SourceError::Unreachable(format!("handshake failed: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&path)
            .header("host", &self.authority)
            .header("user-agent", "voxgrid-autoscaler/0.1")
            .header("accept", "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| SourceError::BadResponse(format!("building request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| SourceError::Unreachable(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SourceError::Unreachable(format!("reading body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            debug!(status = %status, query = promql, "prometheus query non-2xx");
            return Err(SourceError::Status(status.as_u16()));
        }

        parse_query_response(&body)
    }
}

impl MetricSource for PrometheusSource {
    async fn sample(&self, service: &str) -> SourceResult<Option<MetricSnapshot>> {
        let queries = ServiceQueries::for_service(service);

        let (queue, cpu, p95) = tokio::join!(
            self.query(&queries.queue_depth),
            self.query(&queries.cpu_percent),
            self.query(&queries.p95_processing_time),
        );

        if let (Err(e), Err(_), Err(_)) = (&queue, &cpu, &p95) {
            return Err(e.clone());
        }

        let queue = field(service, "queue_depth", queue);
        let cpu = field(service, "cpu_percent", cpu);
        let p95 = field(service, "p95_processing_time", p95);

        if queue.is_none() && cpu.is_none() && p95.is_none() {
            return Ok(None);
        }

        Ok(Some(MetricSnapshot {
            service: service.to_string(),
            queue_depth: queue.filter(|q| q.is_finite() && *q >= 0.0).map(|q| q.round() as u64),
            cpu_percent: cpu,
            p95_processing_time_secs: p95,
            observed_at: epoch_secs(),
        }))
    }
}

fn field(service: &str, signal: &str, result: SourceResult<Option<f64>>) -> Option<f64> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(%service, signal, error = %e, "metric query failed, signal treated as unknown");
            None
        }
    }
}

/// Extract the first sample value from a Prometheus query response.
///
/// Handles both `vector` results (`[{"metric":…,"value":[ts,"v"]}]`) and
/// `scalar` results (`[ts,"v"]`). Non-numeric values such as `"NaN"` parse
/// to NaN and are filtered out later by the snapshot accessors.
pub fn parse_query_response(body: &[u8]) -> SourceResult<Option<f64>> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| SourceError::BadResponse(e.to_string()))?;

    if json.get("status").and_then(|s| s.as_str()) != Some("success") {
        let error = json
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("status is not success");
        return Err(SourceError::BadResponse(error.to_string()));
    }

    let result = json
        .pointer("/data/result")
        .ok_or_else(|| SourceError::BadResponse("missing data.result".to_string()))?;

    let raw = match json.pointer("/data/resultType").and_then(|t| t.as_str()) {
        Some("scalar") => result.get(1),
        _ => result
            .as_array()
            .and_then(|samples| samples.first())
            .and_then(|sample| sample.pointer("/value/1")),
    };

    match raw {
        None => Ok(None),
        Some(value) => {
            let text = value
                .as_str()
                .ok_or_else(|| SourceError::BadResponse(format!("sample value {value} is not a string")))?;
            text.parse::<f64>()
                .map(Some)
                .map_err(|e| SourceError::BadResponse(format!("sample value {text:?}: {e}")))
        }
    }
}

/// Percent-encode a query-string component (RFC 3986 unreserved set kept).
fn encode_query_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
